//! Streaming extraction of article logos from compressed MediaWiki XML dumps.
//!
//! Bytes flow from an [`input::InputSource`] through a
//! [`decompress::DecodedStream`] into the [`extractor::RecordExtractor`];
//! each record is scanned for infobox templates, their logo values are
//! resolved to image URLs and written to a [`sink::ResultSink`] as they are
//! found. Memory stays bounded by the largest single article.

pub mod config;
pub mod decompress;
pub mod error;
pub mod extractor;
pub mod input;
pub mod pipeline;
pub mod progress;
pub mod resolver;
pub mod scanner;
pub mod sink;
pub mod wikitext;

pub use config::ExtractConfig;
pub use error::{ExtractError, WikitextError};
pub use extractor::Record;
pub use pipeline::Pipeline;
pub use sink::{JsonSink, LogoResult, ResultSink, TextSink};
