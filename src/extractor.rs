use crate::error::ExtractError;
use log::trace;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::io::BufRead;

/// One article, alive only while it is being scanned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    /// Site URL from the `base` element seen most recently.
    pub base: String,
    pub title: String,
    /// Raw wiki markup of the article.
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Base,
    Title,
    Text,
}

impl Field {
    fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"base" => Some(Field::Base),
            b"title" => Some(Field::Title),
            b"text" => Some(Field::Text),
            _ => None,
        }
    }
}

/// Pull-based record source over decompressed XML. Only the text of the
/// element being collected is buffered.
pub struct RecordExtractor<R> {
    reader: Reader<R>,
    buf: Vec<u8>,
    field: Option<Field>,
    chars: String,
    base: String,
    title: String,
    depth: usize,
    finished: bool,
}

impl<R: BufRead> RecordExtractor<R> {
    pub fn new(input: R) -> Self {
        Self {
            reader: Reader::from_reader(input),
            buf: Vec::with_capacity(8192),
            field: None,
            chars: String::new(),
            base: String::new(),
            title: String::new(),
            depth: 0,
            finished: false,
        }
    }

    /// The most recent `base` value, empty until one has been seen.
    pub fn base(&self) -> &str {
        &self.base
    }

    fn malformed(&self, message: impl Into<String>) -> ExtractError {
        ExtractError::MalformedMarkup {
            position: self.reader.buffer_position() as u64,
            message: message.into(),
        }
    }

    fn xml_error(&self, e: quick_xml::Error) -> ExtractError {
        match e {
            quick_xml::Error::Io(io) => ExtractError::from_io(&io),
            other => self.malformed(other.to_string()),
        }
    }

    /// Stores the finished field. Returns a record when a `text` closes.
    fn close(&mut self, field: Field) -> Option<Record> {
        let value = std::mem::take(&mut self.chars);
        match field {
            Field::Base => {
                self.base = value;
                None
            }
            Field::Title => {
                self.title = value;
                None
            }
            Field::Text => Some(Record {
                base: self.base.clone(),
                title: self.title.clone(),
                body: value,
            }),
        }
    }

    fn next_record(&mut self) -> Result<Option<Record>, ExtractError> {
        loop {
            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event,
                Err(e) => return Err(self.xml_error(e)),
            };

            match event {
                Event::Start(e) => {
                    self.depth += 1;
                    self.field = Field::from_name(e.local_name().as_ref());
                    self.chars.clear();
                }
                Event::Empty(e) => {
                    self.chars.clear();
                    self.field = None;
                    if let Some(field) = Field::from_name(e.local_name().as_ref()) {
                        if let Some(record) = self.close(field) {
                            return Ok(Some(record));
                        }
                    }
                }
                Event::Text(e) => {
                    if self.field.is_some() {
                        let text = match e.unescape() {
                            Ok(text) => text,
                            Err(err) => {
                                let message = err.to_string();
                                return Err(self.malformed(message));
                            }
                        };
                        self.chars.push_str(&text);
                    }
                }
                Event::CData(e) => {
                    if self.field.is_some() {
                        let bytes = e.into_inner();
                        match std::str::from_utf8(&bytes) {
                            Ok(text) => self.chars.push_str(text),
                            Err(err) => {
                                let message = format!("invalid UTF-8 in CDATA: {}", err);
                                return Err(self.malformed(message));
                            }
                        }
                    }
                }
                Event::End(e) => {
                    self.depth = self.depth.saturating_sub(1);
                    let closed = Field::from_name(e.local_name().as_ref());
                    let current = self.field.take();
                    if let Some(field) = closed.filter(|f| Some(*f) == current) {
                        if let Some(record) = self.close(field) {
                            trace!("Record '{}' ({} bytes)", record.title, record.body.len());
                            return Ok(Some(record));
                        }
                    }
                }
                Event::Eof => {
                    if self.depth > 0 {
                        return Err(self.malformed(format!("document ended with {} open element(s)", self.depth)));
                    }
                    return Ok(None);
                }
                _ => {}
            }
        }
    }
}

impl<R: BufRead> Iterator for RecordExtractor<R> {
    type Item = Result<Record, ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
