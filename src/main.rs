use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use flate2::write::GzEncoder;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, LevelFilter};
use simple_logger::SimpleLogger;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use time::macros::format_description;
use wiki_logo_extract::config::{parse_parameter_names, DEFAULT_LOGO_BASE, DEFAULT_SITE_BASE};
use wiki_logo_extract::decompress::{Compression, DecodedStream};
use wiki_logo_extract::input::{spawn_chunk_reader, InputSource};
use wiki_logo_extract::progress::{self, memory_usage, CounterSnapshot};
use wiki_logo_extract::sink::IndexDocument;
use wiki_logo_extract::{ExtractConfig, ExtractError, JsonSink, Pipeline, TextSink};

const DECODED_BUFFER_SIZE: usize = 1 << 20;

#[derive(Parser)]
#[command(name = "Wikipedia Infobox Logo Extractor")]
#[command(about = "Stream a compressed MediaWiki XML dump and extract infobox logo URLs as JSON")]
#[command(version = "0.1.0")]
struct Cli {
    #[arg(help = "Dump to read: local path, file:// URL or http(s):// URL")]
    input: String,

    #[arg(long, default_value = "", help = "String prepended to progress and summary lines")]
    prefix: String,

    #[arg(short, long, default_value = "INFO", help = "Logging level (OFF, ERROR, WARN, INFO, DEBUG, TRACE)")]
    log_level: String,

    #[arg(short, long, value_enum, default_value_t = CompressionArg::Auto, help = "Input compression")]
    compression: CompressionArg,

    #[arg(long, default_value = "infobox", help = "Case-insensitive template name prefix")]
    template_prefix: String,

    #[arg(short, long, default_value = "logo", help = "Comma-separated parameter names to extract")]
    params: String,

    #[arg(long, default_value = ".svg", help = "Required file name suffix (case-sensitive)")]
    extension: String,

    #[arg(long, default_value = DEFAULT_LOGO_BASE, help = "Base URL for image links")]
    logo_base: String,

    #[arg(long, default_value = DEFAULT_SITE_BASE, help = "Site URL used until the dump names its own base")]
    site_base: String,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Index, help = "Output format")]
    format: OutputFormat,

    #[arg(short, long, help = "Output file (stdout if omitted, gzip if it ends in .gz)")]
    output: Option<String>,

    #[arg(long, default_value = "131072", help = "Bytes per read from the input")]
    chunk_size: usize,

    #[arg(long, default_value = "5", help = "Retries for failed HTTP transfers")]
    retries: u32,

    #[arg(long, default_value = "1000", help = "Articles between progress lines")]
    progress_interval: usize,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CompressionArg {
    Auto,
    Bzip2,
    Gzip,
    None,
}

impl From<CompressionArg> for Compression {
    fn from(arg: CompressionArg) -> Self {
        match arg {
            CompressionArg::Auto => Compression::Auto,
            CompressionArg::Bzip2 => Compression::Bzip2,
            CompressionArg::Gzip => Compression::Gzip,
            CompressionArg::None => Compression::None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// JSON object with site metadata and an `images` array.
    Index,
    /// Bare JSON array of results.
    Array,
    /// One tab-separated line per result.
    Text,
}

/// Level names as accepted by `--log-level`. `None` for anything else.
fn parse_log_level(name: &str) -> Option<LevelFilter> {
    match name.trim().to_ascii_lowercase().as_str() {
        "off" => Some(LevelFilter::Off),
        "error" => Some(LevelFilter::Error),
        "warn" | "warning" => Some(LevelFilter::Warn),
        "info" => Some(LevelFilter::Info),
        "debug" => Some(LevelFilter::Debug),
        "trace" => Some(LevelFilter::Trace),
        _ => None,
    }
}

fn setup_logging(log_level_str: &str) -> Result<()> {
    let log_level = parse_log_level(log_level_str).unwrap_or(LevelFilter::Info);

    // HTTP client internals log every connection at DEBUG; keep them at WARN
    // unless tracing is asked for.
    let dependency_level = if log_level == LevelFilter::Trace {
        LevelFilter::Trace
    } else {
        log_level.min(LevelFilter::Warn)
    };

    SimpleLogger::new()
        .with_level(log_level)
        .with_module_level("reqwest", dependency_level)
        .with_module_level("hyper_util", dependency_level)
        .with_module_level("rustls", dependency_level)
        .with_timestamp_format(format_description!("[hour]:[minute]:[second].[subsecond digits:3]"))
        .init()?;

    if parse_log_level(log_level_str).is_none() {
        log::warn!("Unknown log level '{}', using INFO", log_level_str);
    }
    Ok(())
}

fn build_config(cli: &Cli) -> Result<ExtractConfig> {
    let config = ExtractConfig {
        template_prefix: cli.template_prefix.clone(),
        params: parse_parameter_names(&cli.params),
        extension: cli.extension.clone(),
        logo_base: cli.logo_base.clone(),
        site_base: cli.site_base.clone(),
        prefix: cli.prefix.clone(),
        progress_interval: cli.progress_interval,
    };
    config.validate()?;
    Ok(config)
}

fn create_progress_bar(total_bytes: Option<u64>) -> Result<ProgressBar> {
    let bar = match total_bytes {
        Some(len) => {
            let bar = ProgressBar::new(len);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta} @ {bytes_per_sec}) {msg}")
                    .context("Failed to create progress bar template")?
                    .progress_chars("=> "),
            );
            bar
        }
        None => {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("[{elapsed_precise}] {spinner} {bytes} ({bytes_per_sec}) {msg}")
                    .context("Failed to create progress spinner template")?,
            );
            bar
        }
    };
    Ok(bar)
}

/// Runs the pipeline into a sink of the requested format and hands the
/// writer back once the sink has been closed.
fn run_to_writer<R: BufRead, W: Write>(
    pipeline: &Pipeline,
    format: OutputFormat,
    input: R,
    writer: W,
) -> Result<(W, CounterSnapshot), ExtractError> {
    match format {
        OutputFormat::Index => {
            let document = IndexDocument::wikipedia_en(progress::timestamp());
            let mut sink = JsonSink::index(writer, &document)?;
            let snapshot = pipeline.run(input, &mut sink)?;
            Ok((sink.into_inner(), snapshot))
        }
        OutputFormat::Array => {
            let mut sink = JsonSink::array(writer)?;
            let snapshot = pipeline.run(input, &mut sink)?;
            Ok((sink.into_inner(), snapshot))
        }
        OutputFormat::Text => {
            let mut sink = TextSink::new(writer);
            let snapshot = pipeline.run(input, &mut sink)?;
            Ok((sink.into_inner(), snapshot))
        }
    }
}

fn run_extraction(cli: &Cli, config: &ExtractConfig) -> Result<(Pipeline, CounterSnapshot)> {
    let source = InputSource::parse(&cli.input)?;
    let (reader, total_bytes) = source.open(cli.retries)?;
    let bar = create_progress_bar(total_bytes)?;

    let (receiver, reader_handle) = spawn_chunk_reader(reader, cli.chunk_size.max(1), bar.clone());
    let decoded = DecodedStream::open(receiver.into_iter(), cli.compression.into())
        .map_err(ExtractError::from)
        .context("Failed to read the start of the input")?;
    info!("Input format: {}", decoded.format());
    let input = BufReader::with_capacity(DECODED_BUFFER_SIZE, decoded);

    let pipeline = Pipeline::new(config, bar.clone());

    let snapshot = match cli.output.as_deref() {
        None => {
            let stdout = io::stdout();
            let writer = BufWriter::new(stdout.lock());
            let (mut writer, snapshot) = run_to_writer(&pipeline, cli.format, input, writer)?;
            writer.flush().context("Failed to flush stdout")?;
            snapshot
        }
        Some(path) => {
            let path = Path::new(path);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory structure for: {}", path.display()))?;
            }
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            info!("Writing results to {}", path.display());

            if path.extension().map_or(false, |ext| ext == "gz") {
                let encoder = GzEncoder::new(BufWriter::new(file), flate2::Compression::default());
                let (encoder, snapshot) = run_to_writer(&pipeline, cli.format, input, encoder)?;
                encoder
                    .finish()
                    .and_then(|mut inner| inner.flush())
                    .with_context(|| format!("Failed to finish gzip output: {}", path.display()))?;
                snapshot
            } else {
                let (mut writer, snapshot) = run_to_writer(&pipeline, cli.format, input, BufWriter::new(file))?;
                writer
                    .flush()
                    .with_context(|| format!("Failed to flush output file: {}", path.display()))?;
                snapshot
            }
        }
    };

    let bytes_read = reader_handle
        .join()
        .map_err(|_| anyhow!("Input reader thread panicked"))?;
    pipeline.counters().add_bytes(bytes_read);
    bar.finish_and_clear();
    debug!("Reader thread finished after {} bytes", bytes_read);

    let snapshot = CounterSnapshot { bytes_read, ..snapshot };
    Ok((pipeline, snapshot))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level)?;
    info!("{}Starting logo extraction from {}", cli.prefix, cli.input);
    memory_usage::log_memory_usage("initial");

    let config = build_config(&cli)?;
    debug!("Configuration: {:?}", config);

    match run_extraction(&cli, &config) {
        Ok((pipeline, snapshot)) => {
            pipeline.reporter().print_final_summary(&snapshot);
            info!("{}Extraction process finished.", cli.prefix);
            Ok(())
        }
        Err(e) => {
            error!("{}Extraction failed, output is incomplete and not valid: {:#}", cli.prefix, e);
            Err(e)
        }
    }
}
