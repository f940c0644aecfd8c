//! specdaq command-line interface.
//!
//! Inspects and decodes Pixie-4 list-mode dumps, replays them through an
//! acquisition session into coincidence histograms, and converts exported
//! matrices between formats.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use clap::{Parser, Subcommand};
use specdaq_io::{ListModeFile, PipelineConfig, Session};
use specdaq_pixie::{decode_buffer, DecoderConfig};
use specdaq_sink::{create_sink, output_formats, sink_from_file, Metadata};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    SpecdaqIo(#[from] specdaq_io::Error),

    #[error("Decoder error: {0}")]
    Decoder(#[from] specdaq_pixie::Error),

    #[error("Histogram error: {0}")]
    Sink(#[from] specdaq_sink::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Usage(String),
}

/// Pixie-4 list-mode decoder and coincidence histogrammer.
#[derive(Parser)]
#[command(name = "specdaq")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show record, event and hit statistics of a list-mode dump
    Info {
        /// Input list-mode file
        input: PathBuf,

        /// Channel topology and hit model (JSON)
        #[arg(short, long)]
        topology: Option<PathBuf>,
    },

    /// Print decoded hits
    Decode {
        /// Input list-mode file
        input: PathBuf,

        /// Channel topology and hit model (JSON)
        #[arg(short, long)]
        topology: Option<PathBuf>,

        /// Maximum number of hits to print
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Print one JSON object per hit
        #[arg(long)]
        json: bool,
    },

    /// Replay a dump through a session and export the histogram
    Histogram {
        /// Input list-mode file
        input: PathBuf,

        /// Source channels, one per axis
        #[arg(short, long, value_delimiter = ',', required = true)]
        channels: Vec<usize>,

        /// Bit resolution per axis
        #[arg(short, long, default_value = "12")]
        bits: u16,

        /// Channel topology and hit model (JSON)
        #[arg(short, long)]
        topology: Option<PathBuf>,

        /// Coincidence window (nanoseconds)
        #[arg(long, default_value = "50.0")]
        window_ns: f64,

        /// Only return cells touched since the previous range read
        #[arg(long)]
        buffered: bool,

        /// Histogram name, used for output file names
        #[arg(short, long, default_value = "coinc")]
        name: String,

        /// Output directory
        #[arg(short, long)]
        out: PathBuf,

        /// Export formats
        #[arg(short, long, value_delimiter = ',', default_value = "m4b")]
        format: Vec<String>,

        /// Spill size in 16-bit words
        #[arg(long)]
        spill_words: Option<usize>,

        /// Inter-stage queue depth
        #[arg(long, default_value = "4")]
        queue_depth: usize,

        /// Cap queue depth by this fraction of available memory
        #[arg(long)]
        memory_fraction: Option<f64>,

        /// Print the final metadata as JSON
        #[arg(long)]
        json: bool,
    },

    /// Convert an exported matrix to other formats
    Convert {
        /// Input matrix file
        input: PathBuf,

        /// Input format (m4b, mat or tka)
        #[arg(long)]
        from: String,

        /// Output formats
        #[arg(long, value_delimiter = ',', required = true)]
        to: Vec<String>,

        /// Output directory
        #[arg(short, long)]
        out: PathBuf,
    },
}

fn load_decoder(topology: Option<&Path>) -> Result<DecoderConfig> {
    match topology {
        Some(path) => Ok(DecoderConfig::from_file(path)?),
        None => Ok(DecoderConfig::pixie4_defaults()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match cli.command {
        Commands::Info { input, topology } => {
            let decoder = load_decoder(topology.as_deref())?;
            let file = ListModeFile::open(&input)?;
            let (records, consumed, stop) = file.scan(decoder.max_record_words);

            println!("File: {}", input.display());
            println!(
                "Size: {} bytes ({:.2} MB)",
                file.len(),
                file.len() as f64 / 1_000_000.0
            );
            println!("Records: {} ({} bytes)", records.len(), consumed);
            println!("Scan stopped: {:?}", stop);

            let mut modules: BTreeMap<u16, usize> = BTreeMap::new();
            for record in &records {
                *modules.entry(record.module).or_default() += 1;
            }
            for (module, count) in &modules {
                println!("  module {}: {} records", module, count);
            }

            let start = Instant::now();
            let outcome = decode_buffer(&file.as_bytes()[..consumed], &decoder);
            println!(
                "Events: {}, hits: {} (decoded in {:.2?})",
                outcome.events,
                outcome.hits.len(),
                start.elapsed()
            );
            if let Some(e) = &outcome.error {
                println!("Decode stopped early: {}", e);
            }

            let mut per_source: BTreeMap<i16, usize> = BTreeMap::new();
            for hit in &outcome.hits {
                *per_source.entry(hit.source_channel()).or_default() += 1;
            }
            for (source, count) in &per_source {
                println!("  source {}: {} hits", source, count);
            }

            let times = outcome.hits.iter().map(|h| h.timestamp().to_nanoseconds());
            let (first, last) = times.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), t| {
                (lo.min(t), hi.max(t))
            });
            if first <= last {
                println!(
                    "Time range: {:.0} - {:.0} ns ({:.6} s)",
                    first,
                    last,
                    (last - first) / 1e9
                );
            }
        }

        Commands::Decode {
            input,
            topology,
            limit,
            json,
        } => {
            let decoder = load_decoder(topology.as_deref())?;
            let file = ListModeFile::open(&input)?;
            let outcome = decode_buffer(file.as_bytes(), &decoder);
            if let Some(e) = &outcome.error {
                log::warn!("decoding stopped early: {e}");
            }

            let names: Vec<&str> = (0..decoder.model.value_count())
                .map(|i| decoder.model.name_of(i).unwrap_or("?"))
                .collect();

            for hit in outcome.hits.iter().take(limit) {
                if json {
                    let values: serde_json::Map<String, serde_json::Value> = names
                        .iter()
                        .enumerate()
                        .map(|(i, name)| ((*name).to_string(), hit.value(i).raw().into()))
                        .collect();
                    let line = serde_json::json!({
                        "source": hit.source_channel(),
                        "timestamp": hit.timestamp().native(),
                        "ns": hit.timestamp().to_nanoseconds(),
                        "values": values,
                        "trace": hit.trace(),
                    });
                    println!("{}", serde_json::to_string(&line)?);
                } else {
                    let values: Vec<String> = names
                        .iter()
                        .enumerate()
                        .map(|(i, name)| format!("{}={}", name, hit.value(i).raw()))
                        .collect();
                    println!(
                        "{:>4} {:>16} {}",
                        hit.source_channel(),
                        hit.timestamp().native(),
                        values.join(" ")
                    );
                }
            }
            if !json {
                println!(
                    "{} of {} hits shown",
                    outcome.hits.len().min(limit),
                    outcome.hits.len()
                );
            }
        }

        Commands::Histogram {
            input,
            channels,
            bits,
            topology,
            window_ns,
            buffered,
            name,
            out,
            format,
            spill_words,
            queue_depth,
            memory_fraction,
            json,
        } => {
            let dimensions = u16::try_from(channels.len())
                .map_err(|_| CliError::Usage("too many channels".to_string()))?;
            let supported = output_formats(dimensions);
            if let Some(bad) = format.iter().find(|f| !supported.contains(&f.as_str())) {
                return Err(CliError::Usage(format!(
                    "format '{}' not available for {} axes (supported: {})",
                    bad,
                    dimensions,
                    supported.join(", ")
                )));
            }

            let decoder = load_decoder(topology.as_deref())?;
            let mut config = PipelineConfig::default().try_with_queue_depth(queue_depth)?;
            if let Some(words) = spill_words {
                config = config.try_with_spill_words(words)?;
            }
            if let Some(fraction) = memory_fraction {
                config = config.try_with_memory_fraction(fraction)?;
                let depth = config.resolve_queue_depth()?;
                config = config.with_queue_depth(depth);
            }

            let sink = create_sink(
                Metadata::new(name, dimensions)
                    .with_channels(&channels)
                    .with_bits(bits)
                    .with_coinc_window_ns(window_ns)
                    .with_buffered(buffered),
            )?;

            let file = ListModeFile::open(&input)?;
            let source = file.spills(&decoder, &config);
            let summary = Session::run(source, decoder, vec![Arc::clone(&sink)], &config)?;

            std::fs::create_dir_all(&out)?;
            for f in &format {
                if !sink.write_file(&out, f)? {
                    log::warn!("no writer for format '{f}'");
                }
            }

            let metadata = sink.metadata();
            if json {
                println!("{}", serde_json::to_string_pretty(&metadata)?);
            } else {
                println!(
                    "Processed {} spills ({} hits) in {:.2}s",
                    summary.delivered,
                    summary.hits,
                    summary.elapsed.as_secs_f64()
                );
                println!("Events histogrammed: {}", metadata.total_count);
                if let Some(symmetric) = sink.check_symmetry() {
                    println!("Symmetric: {}", symmetric);
                }
                println!("Wrote {} to {}", format.join(", "), out.display());
            }
        }

        Commands::Convert {
            input,
            from,
            to,
            out,
        } => {
            let Some(sink) = sink_from_file(&input, &from)? else {
                return Err(CliError::Usage(format!("cannot read format '{}'", from)));
            };
            std::fs::create_dir_all(&out)?;
            let metadata = sink.metadata();
            for f in &to {
                if sink.write_file(&out, f)? {
                    println!("Wrote {}/{}.{}", out.display(), metadata.name, f);
                } else {
                    return Err(CliError::Usage(format!(
                        "format '{}' not available for {} axes",
                        f, metadata.dimensions
                    )));
                }
            }
        }
    }

    Ok(())
}
