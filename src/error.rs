use std::io;
use thiserror::Error;

/// Fatal errors. Any of these aborts the run.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("corrupt {format} stream in frame {frame}: {detail}")]
    CorruptStream {
        format: &'static str,
        frame: u64,
        detail: String,
    },

    #[error("input ended inside {format} frame {frame}")]
    TruncatedStream { format: &'static str, frame: u64 },

    #[error("malformed XML at byte {position}: {message}")]
    MalformedMarkup { position: u64, message: String },

    #[error("input error: {0}")]
    Input(#[source] io::Error),

    #[error("output error: {0}")]
    Output(#[source] io::Error),

    #[error("invalid base URL '{0}'")]
    InvalidBase(String),
}

/// Carried inside an `io::Error` so that decoding failures survive the trip
/// through `Read` and the XML reader and come out as the right variant.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("corrupt {format} data in frame {frame}: {detail}")]
    Corrupt {
        format: &'static str,
        frame: u64,
        detail: String,
    },

    #[error("input ended inside {format} frame {frame}")]
    Truncated { format: &'static str, frame: u64 },
}

impl From<FrameError> for io::Error {
    fn from(e: FrameError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, e)
    }
}

impl ExtractError {
    /// Classifies an I/O error coming out of the decoding stack.
    pub fn from_io(e: &io::Error) -> Self {
        match e.get_ref().and_then(|inner| inner.downcast_ref::<FrameError>()) {
            Some(FrameError::Corrupt { format, frame, detail }) => ExtractError::CorruptStream {
                format: *format,
                frame: *frame,
                detail: detail.clone(),
            },
            Some(FrameError::Truncated { format, frame }) => ExtractError::TruncatedStream {
                format: *format,
                frame: *frame,
            },
            None => ExtractError::Input(io::Error::new(e.kind(), e.to_string())),
        }
    }
}

impl From<io::Error> for ExtractError {
    fn from(e: io::Error) -> Self {
        match e.get_ref().map(|inner| inner.is::<FrameError>()) {
            Some(true) => ExtractError::from_io(&e),
            _ => ExtractError::Input(e),
        }
    }
}

/// Non-fatal: the body is skipped and counted, the run continues.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WikitextError {
    #[error("more than {limit} markup constructs, gave up at byte {offset}")]
    TooManyConstructs { limit: usize, offset: usize },
}
