use indicatif::ProgressBar;
use log::{info, warn};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Process-wide run counters. Increments are atomic.
#[derive(Debug, Default)]
pub struct Counters {
    articles: AtomicUsize,
    templates: AtomicUsize,
    params: AtomicUsize,
    results: AtomicUsize,
    skipped: AtomicUsize,
    bytes_read: AtomicU64,
}

/// Point-in-time copy of [`Counters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub articles: usize,
    /// Matched templates.
    pub templates: usize,
    /// Targeted parameters in matched templates.
    pub params: usize,
    pub results: usize,
    /// Unparseable bodies.
    pub skipped: usize,
    pub bytes_read: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_article(&self) {
        self.articles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_templates(&self, n: usize) {
        self.templates.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_param(&self) {
        self.params.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_results(&self, n: usize) {
        self.results.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, n: u64) {
        self.bytes_read.fetch_add(n, Ordering::Relaxed);
    }

    pub fn articles(&self) -> usize {
        self.articles.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            articles: self.articles.load(Ordering::Relaxed),
            templates: self.templates.load(Ordering::Relaxed),
            params: self.params.load(Ordering::Relaxed),
            results: self.results.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
        }
    }
}

/// Writes a progress line for every `interval`-th record.
pub struct ProgressReporter {
    prefix: String,
    interval: usize,
    start: Instant,
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new(prefix: &str, interval: usize, bar: ProgressBar) -> Self {
        Self {
            prefix: prefix.to_string(),
            interval: interval.max(1),
            start: Instant::now(),
            bar,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Whether the record numbered `article_index` (zero-based) gets a line.
    pub fn is_due(&self, article_index: usize) -> bool {
        article_index % self.interval == 0
    }

    /// Called with the counters as they are before the record is counted.
    pub fn on_record(&self, counters: &Counters) {
        if !self.is_due(counters.articles()) {
            return;
        }
        let line = self.progress_line(&counters.snapshot());
        self.bar.suspend(|| info!("{}", line));
        self.bar.set_message(format!("{} articles", counters.articles()));
    }

    pub fn progress_line(&self, snapshot: &CounterSnapshot) -> String {
        format!(
            "{}{} elapsed={:.1}s articles={} boxes={} params={} logos={} rss={}",
            self.prefix,
            timestamp(),
            self.elapsed().as_secs_f64(),
            snapshot.articles,
            snapshot.templates,
            snapshot.params,
            snapshot.results,
            memory_usage::rss_description(),
        )
    }

    pub fn print_final_summary(&self, snapshot: &CounterSnapshot) {
        let prefix = &self.prefix;
        self.bar.suspend(|| {
            info!("{}-------------------- FINAL SUMMARY --------------------", prefix);
            let elapsed = self.elapsed();
            let rate = snapshot.articles as f64 / elapsed.as_secs_f64().max(1e-3);
            info!("{}Total execution time: {} ({:.0} articles/s)", prefix, format_elapsed(elapsed), rate);
            info!("{}articleCount: {}", prefix, snapshot.articles);
            info!("{}templateCount: {}", prefix, snapshot.templates);
            info!("{}infoCount: {}", prefix, snapshot.params);
            info!("{}svgLogoCount: {}", prefix, snapshot.results);
            if snapshot.skipped > 0 {
                warn!("{}Bodies skipped (unparseable markup): {}", prefix, snapshot.skipped);
            }
            info!("{}Compressed bytes read: {}", prefix, snapshot.bytes_read);
            memory_usage::log_memory_usage("final");
            info!("{}-------------------------------------------------------", prefix);
        });
    }
}

/// UTC timestamp in RFC 3339 form.
pub fn timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "-".to_string())
}

/// `12.3s` under a minute, `4m05s` under an hour, `1h02m05s` beyond.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    match (secs / 3600, secs / 60 % 60, secs % 60) {
        (0, 0, _) => format!("{:.1}s", elapsed.as_secs_f64()),
        (0, m, s) => format!("{}m{:02}s", m, s),
        (h, m, s) => format!("{}h{:02}m{:02}s", h, m, s),
    }
}

pub mod memory_usage {
    use log::info;

    #[derive(Debug)]
    pub struct MemoryStats {
        pub rss_mb: f64,
        pub vm_size_mb: f64,
    }

    #[cfg(target_os = "linux")]
    pub fn get_memory_usage() -> Option<MemoryStats> {
        let content = std::fs::read_to_string("/proc/self/status").ok()?;
        let field = |name: &str| {
            content
                .lines()
                .find(|line| line.starts_with(name))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|s| s.parse::<f64>().ok())
        };
        Some(MemoryStats {
            rss_mb: field("VmRSS:")? / 1024.0,
            vm_size_mb: field("VmSize:")? / 1024.0,
        })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn get_memory_usage() -> Option<MemoryStats> {
        None
    }

    pub fn rss_description() -> String {
        get_memory_usage().map_or_else(|| "n/a".to_string(), |stats| format!("{:.1}MB", stats.rss_mb))
    }

    pub fn log_memory_usage(note: &str) {
        if let Some(stats) = get_memory_usage() {
            info!(
                "Memory usage ({}): {:.1} MB physical (RSS), {:.1} MB virtual",
                note, stats.rss_mb, stats.vm_size_mb
            );
        } else {
            info!("Memory usage tracking not available on this platform ({})", std::env::consts::OS);
        }
    }
}
