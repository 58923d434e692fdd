use crate::config::ExtractConfig;
use crate::error::ExtractError;
use crate::extractor::{Record, RecordExtractor};
use crate::progress::{CounterSnapshot, Counters, ProgressReporter};
use crate::resolver::{page_url, LogoResolver};
use crate::scanner::TemplateScanner;
use crate::sink::{LogoResult, ResultSink};
use indicatif::ProgressBar;
use log::{debug, trace, warn};
use std::io::BufRead;

pub struct Pipeline {
    scanner: TemplateScanner,
    resolver: LogoResolver,
    site_base: String,
    counters: Counters,
    reporter: ProgressReporter,
}

impl Pipeline {
    pub fn new(config: &ExtractConfig, bar: ProgressBar) -> Self {
        Self {
            scanner: TemplateScanner::new(&config.template_prefix, &config.params),
            resolver: LogoResolver::new(&config.logo_base, &config.extension),
            site_base: config.site_base.clone(),
            counters: Counters::new(),
            reporter: ProgressReporter::new(&config.prefix, config.progress_interval, bar),
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    /// Processes every record of `input`, then closes the sink. On error the
    /// sink is left open and what it has written so far is not valid output.
    pub fn run<R: BufRead>(&self, input: R, sink: &mut dyn ResultSink) -> Result<CounterSnapshot, ExtractError> {
        for record in RecordExtractor::new(input) {
            let record = record?;
            self.process_record(&record, sink)?;
        }
        sink.end()?;
        Ok(self.counters.snapshot())
    }

    /// Scans one record and emits its results. Returns how many were emitted.
    pub fn process_record(&self, record: &Record, sink: &mut dyn ResultSink) -> Result<usize, ExtractError> {
        self.reporter.on_record(&self.counters);
        self.counters.add_article();

        let matches = match self.scanner.scan(&record.body) {
            Ok(matches) => matches,
            Err(e) => {
                warn!("Skipping '{}': {}", record.title, e);
                self.counters.add_skipped();
                return Ok(0);
            }
        };
        self.counters.add_templates(matches.templates_matched());

        let mut page: Option<String> = None;
        let mut emitted = 0;
        for found in matches {
            self.counters.add_param();
            let images = self.resolver.resolve(found.raw_value);
            if images.is_empty() {
                trace!("'{}': no usable {} in {:?}", record.title, found.parameter_name, found.raw_value);
                continue;
            }

            let src = match &page {
                Some(src) => src.clone(),
                None => {
                    let src = self.page_url(record)?;
                    page = Some(src.clone());
                    src
                }
            };
            for img in images {
                sink.add(&LogoResult {
                    img,
                    name: record.title.clone(),
                    src: src.clone(),
                })?;
                emitted += 1;
            }
        }

        self.counters.add_results(emitted);
        Ok(emitted)
    }

    fn page_url(&self, record: &Record) -> Result<String, ExtractError> {
        if !record.base.is_empty() {
            match page_url(&record.base, &record.title) {
                Ok(url) => return Ok(url),
                Err(e) => debug!("{}, using site base {}", e, self.site_base),
            }
        }
        page_url(&self.site_base, &record.title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::JsonSink;

    fn pipeline() -> Pipeline {
        Pipeline::new(&ExtractConfig::default(), ProgressBar::hidden())
    }

    fn record(title: &str, body: &str) -> Record {
        Record {
            base: "https://en.wikipedia.org/wiki/Main_Page".to_string(),
            title: title.to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn emits_one_result_per_image() {
        let pipeline = pipeline();
        let mut sink = JsonSink::array(Vec::new()).unwrap();
        let body = "{{Infobox company | logo = [[File:A.svg]] [[File:B.svg|x]] | image = C.svg }}";
        let emitted = pipeline.process_record(&record("AT&T", body), &mut sink).unwrap();
        assert_eq!(emitted, 2);
        sink.end().unwrap();

        let value: serde_json::Value = serde_json::from_slice(&sink.into_inner()).unwrap();
        assert_eq!(value[0]["src"], "https://en.wikipedia.org/wiki/AT%26T");
        assert_eq!(value[1]["img"], "https://en.wikipedia.org/wiki/Special:Redirect/file/B.svg");
        assert_eq!(value[1]["name"], "AT&T");
    }

    #[test]
    fn counts_parameters_without_results() {
        let pipeline = pipeline();
        let mut sink = JsonSink::array(Vec::new()).unwrap();
        let body = "{{Infobox company | logo = A.png }} {{Infobox person | name = x }}";
        pipeline.process_record(&record("A", body), &mut sink).unwrap();

        let snapshot = pipeline.counters().snapshot();
        assert_eq!(snapshot.articles, 1);
        assert_eq!(snapshot.templates, 2);
        assert_eq!(snapshot.params, 1);
        assert_eq!(snapshot.results, 0);
    }

    #[test]
    fn unparseable_body_is_skipped() {
        let pipeline = pipeline();
        let mut sink = JsonSink::array(Vec::new()).unwrap();
        let body = format!(
            "{{{{Infobox | logo = A.svg }}}} {}",
            "[[a]]".repeat(crate::wikitext::MAX_CONSTRUCTS)
        );
        assert_eq!(pipeline.process_record(&record("Huge", &body), &mut sink).unwrap(), 0);
        assert_eq!(pipeline.counters().snapshot().skipped, 1);
        assert_eq!(pipeline.counters().snapshot().articles, 1);
    }

    #[test]
    fn missing_base_falls_back_to_site_base() {
        let pipeline = pipeline();
        let mut sink = JsonSink::array(Vec::new()).unwrap();
        let mut rec = record("Foo", "{{Infobox | logo = Foo.svg }}");
        rec.base = String::new();
        pipeline.process_record(&rec, &mut sink).unwrap();
        sink.end().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&sink.into_inner()).unwrap();
        assert_eq!(value[0]["src"], "https://en.wikipedia.org/wiki/Foo");
    }

    #[test]
    fn run_closes_the_sink() {
        let xml = "<mediawiki><siteinfo><base>https://en.wikipedia.org/wiki/Main_Page</base></siteinfo>\
                   <page><title>Foo</title><revision><text>{{Infobox | logo = Foo.svg }}</text></revision></page>\
                   </mediawiki>";
        let pipeline = pipeline();
        let mut sink = JsonSink::array(Vec::new()).unwrap();
        let snapshot = pipeline.run(xml.as_bytes(), &mut sink).unwrap();
        assert_eq!(snapshot.results, 1);
        let value: serde_json::Value = serde_json::from_slice(&sink.into_inner()).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 1);
    }

    #[test]
    fn run_leaves_sink_open_on_fatal_error() {
        let xml = "<mediawiki><page><title>Foo</title><text>{{Infobox | logo = Foo.svg }}</text></page><page>";
        let pipeline = pipeline();
        let mut sink = JsonSink::array(Vec::new()).unwrap();
        assert!(pipeline.run(xml.as_bytes(), &mut sink).is_err());
        let written = String::from_utf8(sink.into_inner()).unwrap();
        assert!(!written.trim_end().ends_with(']'));
    }
}
