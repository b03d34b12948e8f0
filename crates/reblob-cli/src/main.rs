use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::error::ErrorKind;
use clap::{Parser, ValueEnum};
use reblob_core::{
    Compression, MAX_BLOB_SIZE, MIN_BLOB_SIZE, ReblobOptions, ReblobPipeline, RunStats,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "pbf-reblob",
    version,
    about = "Merge the small blobs of an OSM PBF file into larger ones",
    long_about = "Rewrites an OSM PBF file so that consecutive data blocks are merged into \
                  blocks of at most --size bytes. Entities and their order are unchanged."
)]
struct Cli {
    /// Log progress at info level (RUST_LOG takes precedence).
    #[arg(short, long)]
    verbose: bool,

    /// Maximum serialized size of a merged block (supports suffixes k/K and m/M).
    #[arg(short, long, default_value = "16M", value_parser = parse_size)]
    size: usize,

    /// Compression applied to data blocks.
    #[arg(short, long, value_enum, default_value_t = CompressionArg::Zlib)]
    compression: CompressionArg,

    /// Number of decode and encode worker threads (defaults to CPU count).
    #[arg(long, default_value_t = num_cpus::get(), value_parser = parse_workers)]
    workers: usize,

    /// PBF file to read.
    input: PathBuf,

    /// File to write; must not exist yet.
    output: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CompressionArg {
    Raw,
    Zlib,
    Zstd,
}

impl From<CompressionArg> for Compression {
    fn from(value: CompressionArg) -> Self {
        match value {
            CompressionArg::Raw => Compression::Raw,
            CompressionArg::Zlib => Compression::Zlib,
            CompressionArg::Zstd => Compression::Zstd,
        }
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error)
            if matches!(error.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) =>
        {
            error.exit()
        }
        Err(error) => {
            let _ = error.print();
            std::process::exit(1);
        }
    };

    init_logging(cli.verbose);

    if let Err(error) = run(cli) {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if cli.output.exists() {
        bail!("output file {} already exists", cli.output.display());
    }

    let options = ReblobOptions::default()
        .with_workers(cli.workers)
        .with_max_blob_size(cli.size)
        .with_compression(cli.compression.into());
    tracing::debug!(?options, input = %cli.input.display(), "starting reblob");

    let pipeline = ReblobPipeline::new(options).context("invalid options")?;
    let stats = pipeline.run(&cli.input, &cli.output).with_context(|| {
        format!(
            "reblobbing {} into {}",
            cli.input.display(),
            cli.output.display()
        )
    })?;

    if cli.verbose {
        print_summary(&stats, pipeline.buffer_pool().metrics());
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_summary(stats: &RunStats, pool: reblob_core::PoolMetricsSnapshot) {
    eprintln!("reblob complete");
    eprintln!("  elapsed: {}", format_duration(stats.elapsed));
    eprintln!(
        "  blocks: {} in, {} out ({:.2} per output block)",
        stats.blocks_in,
        stats.blocks_out,
        stats.merge_ratio()
    );
    if stats.oversized_blocks > 0 {
        eprintln!("  oversized input blocks: {}", stats.oversized_blocks);
    }
    eprintln!("  bytes written: {}", format_bytes(stats.bytes_written));
    eprintln!(
        "  buffer pool: created {} | recycled {} | dropped {}",
        pool.created, pool.recycled, pool.dropped
    );
}

fn parse_size(value: &str) -> Result<usize, String> {
    let size = reblob_core::parse_size(value).map_err(|error| error.to_string())?;
    if !(MIN_BLOB_SIZE..=MAX_BLOB_SIZE).contains(&size) {
        return Err(format!(
            "size must lie between {MIN_BLOB_SIZE} and {MAX_BLOB_SIZE} bytes"
        ));
    }
    Ok(size)
}

fn parse_workers(value: &str) -> Result<usize, String> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err("worker count must be at least 1".to_string()),
        Ok(workers) => Ok(workers),
        Err(error) => Err(format!("invalid worker count: {error}")),
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0usize;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[unit])
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs >= 60.0 {
        format!("{}m {:.1}s", (secs / 60.0).floor() as u64, secs % 60.0)
    } else if secs >= 1.0 {
        format!("{secs:.2}s")
    } else {
        format!("{:.1}ms", secs * 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_ones() {
        let cli = Cli::try_parse_from(["pbf-reblob", "in.pbf", "out.pbf"]).expect("parse");
        assert_eq!(cli.size, 16 * 1024 * 1024);
        assert_eq!(cli.compression, CompressionArg::Zlib);
        assert!(!cli.verbose);
    }

    #[test]
    fn size_suffixes_are_binary() {
        assert_eq!(parse_size("64k"), Ok(64 * 1024));
        assert_eq!(parse_size("2M"), Ok(2 * 1024 * 1024));
        assert_eq!(parse_size("1024"), Ok(1024));
    }

    #[test]
    fn sizes_outside_the_range_are_refused() {
        assert!(parse_size("1023").is_err());
        assert!(parse_size("33M").is_err());
        assert!(parse_size("12x").is_err());
        assert!(Cli::try_parse_from(["pbf-reblob", "-s", "512", "a", "b"]).is_err());
    }

    #[test]
    fn short_flags_parse() {
        let cli = Cli::try_parse_from(["pbf-reblob", "-v", "-c", "zstd", "-s", "8M", "a", "b"])
            .expect("parse");
        assert!(cli.verbose);
        assert_eq!(Compression::from(cli.compression), Compression::Zstd);
        assert_eq!(cli.size, 8 * 1024 * 1024);
    }

    #[test]
    fn zero_workers_are_refused() {
        assert!(parse_workers("0").is_err());
        assert_eq!(parse_workers("3"), Ok(3));
    }

    #[test]
    fn formats_bytes_with_binary_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MiB");
    }
}
