use crate::error::ExtractError;
use serde::Serialize;
use std::io::{self, Write};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogoResult {
    pub img: String,
    pub name: String,
    pub src: String,
}

/// Metadata wrapped around the `images` array in the index document.
#[derive(Debug, Clone, Serialize)]
pub struct IndexDocument {
    pub handle: String,
    pub name: String,
    pub lastmodified: String,
    pub logo: String,
    pub provider: String,
    pub provider_icon: String,
    pub url: String,
    pub website: String,
    pub images: Vec<LogoResult>,
}

impl IndexDocument {
    pub fn wikipedia_en(lastmodified: String) -> Self {
        Self {
            handle: "wikipedia-en-infobox".to_string(),
            name: "Wikipedia en Infobox Logos".to_string(),
            lastmodified,
            logo: "https://www.vectorlogo.zone/logos/wikipedia/wikipedia-icon.svg".to_string(),
            provider: "remote".to_string(),
            provider_icon: "https://logosear.ch/images/remote.svg".to_string(),
            url: "https://en.wikipedia.org/wiki/Main_Page".to_string(),
            website: "https://en.wikipedia.org/wiki/Main_Page".to_string(),
            images: Vec::new(),
        }
    }
}

/// Destination for results. `end` must be called exactly once, after the
/// last `add`; it is skipped when the run fails.
pub trait ResultSink {
    fn add(&mut self, result: &LogoResult) -> Result<(), ExtractError>;
    fn end(&mut self) -> Result<(), ExtractError>;
}

/// Streams a JSON document whose single array is filled element by element.
pub struct JsonSink<W: Write> {
    writer: W,
    head: String,
    tail: String,
    head_written: bool,
    count: usize,
}

impl<W: Write> JsonSink<W> {
    /// Wraps the results in `document`, whose `images` array must be empty.
    pub fn index(writer: W, document: &IndexDocument) -> Result<Self, ExtractError> {
        let template = serde_json::to_string_pretty(document).map_err(|e| ExtractError::Output(io::Error::from(e)))?;
        Self::from_template(writer, &template)
    }

    /// A bare JSON array.
    pub fn array(writer: W) -> Result<Self, ExtractError> {
        Self::from_template(writer, "[]")
    }

    /// Splits `template` at its last empty array: the head ends with `[`,
    /// the tail starts with `]`.
    fn from_template(writer: W, template: &str) -> Result<Self, ExtractError> {
        let split = template.rfind("[]").ok_or_else(|| {
            ExtractError::Output(io::Error::new(io::ErrorKind::InvalidInput, "template has no empty array"))
        })?;
        Ok(Self {
            writer,
            head: template[..=split].to_string(),
            tail: template[split + 1..].to_string(),
            head_written: false,
            count: 0,
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_head(&mut self) -> io::Result<()> {
        if !self.head_written {
            self.writer.write_all(self.head.as_bytes())?;
            self.head_written = true;
        }
        Ok(())
    }

    fn write_element(&mut self, result: &LogoResult) -> io::Result<()> {
        self.write_head()?;
        if self.count > 0 {
            self.writer.write_all(b",")?;
        }
        self.writer.write_all(b"\n    ")?;
        serde_json::to_writer(&mut self.writer, result)?;
        self.count += 1;
        Ok(())
    }

    fn write_tail(&mut self) -> io::Result<()> {
        self.write_head()?;
        if self.count > 0 {
            self.writer.write_all(b"\n  ")?;
        }
        self.writer.write_all(self.tail.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

impl<W: Write> ResultSink for JsonSink<W> {
    fn add(&mut self, result: &LogoResult) -> Result<(), ExtractError> {
        self.write_element(result).map_err(ExtractError::Output)
    }

    fn end(&mut self) -> Result<(), ExtractError> {
        self.write_tail().map_err(ExtractError::Output)
    }
}

/// Human-readable trace: `name<TAB>img<TAB>src` per result.
pub struct TextSink<W: Write> {
    writer: W,
}

impl<W: Write> TextSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ResultSink for TextSink<W> {
    fn add(&mut self, result: &LogoResult) -> Result<(), ExtractError> {
        writeln!(self.writer, "{}\t{}\t{}", result.name, result.img, result.src).map_err(ExtractError::Output)
    }

    fn end(&mut self) -> Result<(), ExtractError> {
        self.writer.flush().map_err(ExtractError::Output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn result(n: usize) -> LogoResult {
        LogoResult {
            img: format!("https://example.org/file/Logo{}.svg", n),
            name: format!("Article \"{}\"", n),
            src: format!("https://example.org/wiki/Article_{}", n),
        }
    }

    fn parse(bytes: Vec<u8>) -> Value {
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn two_elements_round_trip() {
        let mut sink = JsonSink::array(Vec::new()).unwrap();
        sink.add(&result(1)).unwrap();
        sink.add(&result(2)).unwrap();
        sink.end().unwrap();
        assert_eq!(sink.count(), 2);

        let value = parse(sink.into_inner());
        let items = value.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["img"], "https://example.org/file/Logo1.svg");
        assert_eq!(items[0]["name"], "Article \"1\"");
        assert_eq!(items[1]["src"], "https://example.org/wiki/Article_2");
    }

    #[test]
    fn end_alone_gives_empty_array() {
        let mut sink = JsonSink::array(Vec::new()).unwrap();
        sink.end().unwrap();
        let bytes = sink.into_inner();
        assert_eq!(String::from_utf8(bytes.clone()).unwrap(), "[]\n");
        assert_eq!(parse(bytes), Value::Array(Vec::new()));
    }

    #[test]
    fn index_document_wraps_results() {
        let document = IndexDocument::wikipedia_en("2026-01-01T00:00:00Z".to_string());
        let mut sink = JsonSink::index(Vec::new(), &document).unwrap();
        sink.add(&result(1)).unwrap();
        sink.end().unwrap();

        let value = parse(sink.into_inner());
        assert_eq!(value["handle"], "wikipedia-en-infobox");
        assert_eq!(value["provider"], "remote");
        assert_eq!(value["lastmodified"], "2026-01-01T00:00:00Z");
        assert_eq!(value["images"].as_array().unwrap().len(), 1);
        assert_eq!(value["images"][0]["img"], "https://example.org/file/Logo1.svg");
    }

    #[test]
    fn empty_index_document_is_valid() {
        let document = IndexDocument::wikipedia_en("x".to_string());
        let mut sink = JsonSink::index(Vec::new(), &document).unwrap();
        sink.end().unwrap();
        let value = parse(sink.into_inner());
        assert_eq!(value["images"], Value::Array(Vec::new()));
        assert_eq!(value["website"], "https://en.wikipedia.org/wiki/Main_Page");
    }

    #[test]
    fn nothing_is_written_before_the_first_result() {
        let sink = JsonSink::array(Vec::new()).unwrap();
        assert!(sink.into_inner().is_empty());
    }

    #[test]
    fn text_sink_writes_one_line_per_result() {
        let mut sink = TextSink::new(Vec::new());
        sink.add(&result(1)).unwrap();
        sink.add(&result(2)).unwrap();
        sink.end().unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "Article \"1\"\thttps://example.org/file/Logo1.svg\thttps://example.org/wiki/Article_1"
        );
    }
}
