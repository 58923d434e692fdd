use crate::decompress::Chunk;
use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver};
use indicatif::ProgressBar;
use log::{debug, error, info, warn};
use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use url::Url;

/// Where the compressed dump comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    File(PathBuf),
    Http(Url),
}

impl InputSource {
    /// Accepts a plain path, a `file://` URL or an `http(s)://` URL.
    pub fn parse(location: &str) -> Result<Self> {
        match Url::parse(location) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Ok(InputSource::Http(url)),
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map(InputSource::File)
                .map_err(|_| anyhow::anyhow!("Invalid file URL: {}", location)),
            // Windows drive letters parse as a one-letter scheme.
            Ok(url) if url.scheme().len() > 1 => {
                Err(anyhow::anyhow!("Unsupported URL scheme '{}' in {}", url.scheme(), location))
            }
            _ => Ok(InputSource::File(PathBuf::from(location))),
        }
    }

    /// Opens the source. Returns the reader and the total length if known.
    pub fn open(&self, retries: u32) -> Result<(Box<dyn Read + Send>, Option<u64>)> {
        match self {
            InputSource::File(path) => {
                let file = File::open(path)
                    .with_context(|| format!("Failed to open input file: {}", path.display()))?;
                let len = file.metadata().ok().map(|m| m.len());
                info!("Reading {} ({} bytes)", path.display(), len.map_or_else(|| "?".to_string(), |l| l.to_string()));
                Ok((Box::new(file), len))
            }
            InputSource::Http(url) => {
                let reader = HttpReader::connect(url.clone(), retries)?;
                let len = reader.content_length();
                info!("Streaming {} ({} bytes)", url, len.map_or_else(|| "?".to_string(), |l| l.to_string()));
                Ok((Box::new(reader), len))
            }
        }
    }
}

/// Streaming HTTP body that reconnects with a `Range` request after
/// transport errors, up to `max_retries` times over the whole download.
/// A connection closed before `Content-Length` bytes counts as a transport
/// error. A server that answers the range request with anything but
/// `206 Partial Content` ends the download.
pub struct HttpReader {
    client: Client,
    url: Url,
    response: Response,
    offset: u64,
    content_length: Option<u64>,
    retries_left: u32,
    max_retries: u32,
    backoff_unit: Duration,
}

enum Resume {
    Resumed,
    Refused(String),
}

impl HttpReader {
    pub fn connect(url: Url, max_retries: u32) -> Result<Self> {
        Self::connect_with_backoff(url, max_retries, Duration::from_secs(2))
    }

    /// Like [`HttpReader::connect`], waiting `backoff_unit * attempt` before
    /// each retry.
    pub fn connect_with_backoff(url: Url, max_retries: u32, backoff_unit: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(None)
            .build()
            .context("Failed to build HTTP client")?;

        let mut attempt = 0;
        let response = loop {
            match client.get(url.clone()).send().and_then(Response::error_for_status) {
                Ok(response) => break response,
                Err(e) if attempt < max_retries => {
                    attempt += 1;
                    warn!("Request for {} failed ({}), retry {}/{}", url, e, attempt, max_retries);
                    thread::sleep(backoff_unit * attempt);
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e).context(format!("Failed to fetch {}", url)));
                }
            }
        };

        let content_length = response.content_length();
        Ok(Self {
            client,
            url,
            response,
            offset: 0,
            content_length,
            retries_left: max_retries - attempt,
            max_retries,
            backoff_unit,
        })
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    fn ended_early(&self) -> bool {
        self.content_length.is_some_and(|len| self.offset < len)
    }

    fn resume(&mut self) -> reqwest::Result<Resume> {
        let response = self
            .client
            .get(self.url.clone())
            .header(RANGE, format!("bytes={}-", self.offset))
            .send()?;

        if response.status() != StatusCode::PARTIAL_CONTENT {
            return Ok(Resume::Refused(format!("status {}", response.status())));
        }
        // A server may ignore the requested start; only an exact match is usable.
        let expected = format!("bytes {}-", self.offset);
        match response.headers().get(CONTENT_RANGE).and_then(|v| v.to_str().ok()) {
            Some(range) if !range.starts_with(&expected) => {
                Ok(Resume::Refused(format!("Content-Range {:?}", range)))
            }
            _ => {
                self.response = response;
                Ok(Resume::Resumed)
            }
        }
    }

    /// Retries `resume` until it succeeds, the server refuses, or the retry
    /// budget runs out.
    fn recover(&mut self, mut err: io::Error) -> io::Result<()> {
        loop {
            if self.retries_left == 0 {
                error!("Giving up on {} at offset {}: {}", self.url, self.offset, err);
                return Err(err);
            }
            self.retries_left -= 1;
            let attempt = self.max_retries - self.retries_left;
            warn!(
                "Read from {} failed at offset {} ({}), resuming (retry {}/{})",
                self.url, self.offset, err, attempt, self.max_retries
            );
            thread::sleep(self.backoff_unit * attempt);

            match self.resume() {
                Ok(Resume::Resumed) => {
                    debug!("Resumed {} at offset {}", self.url, self.offset);
                    return Ok(());
                }
                Ok(Resume::Refused(reason)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        format!("Cannot resume {} at offset {}: server answered {}", self.url, self.offset, reason),
                    ));
                }
                Err(e) => err = io::Error::new(io::ErrorKind::Other, e),
            }
        }
    }
}

impl Read for HttpReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let err = match self.response.read(buf) {
                Ok(0) if !buf.is_empty() && self.ended_early() => io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("Connection closed after {} of {:?} bytes", self.offset, self.content_length),
                ),
                Ok(n) => {
                    self.offset += n as u64;
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => e,
            };
            self.recover(err)?;
        }
    }
}

/// Reads `reader` on its own thread in `chunk_size` pieces. The channel is
/// bounded so a slow consumer throttles the reads. A read error is sent as
/// the last item.
pub fn spawn_chunk_reader(
    mut reader: Box<dyn Read + Send>,
    chunk_size: usize,
    progress: ProgressBar,
) -> (Receiver<Chunk>, JoinHandle<u64>) {
    let (sender, receiver) = bounded::<Chunk>(4);
    let handle = thread::spawn(move || {
        let mut total: u64 = 0;
        loop {
            let mut chunk = vec![0u8; chunk_size];
            match reader.read(&mut chunk) {
                Ok(0) => {
                    debug!("Reader thread reached end of input after {} bytes", total);
                    break;
                }
                Ok(n) => {
                    chunk.truncate(n);
                    total += n as u64;
                    progress.inc(n as u64);
                    if sender.send(Ok(chunk)).is_err() {
                        debug!("Consumer hung up, reader thread stopping");
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Reader thread failed after {} bytes: {}", total, e);
                    let _ = sender.send(Err(e));
                    break;
                }
            }
        }
        total
    });
    (receiver, handle)
}
