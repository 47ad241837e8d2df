use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use crimp_core::{
    init_plugins, list_plugins, CancellationToken, CompressOptions, CompressStats, CrimpError,
    DecompressOptions, DecompressStats, Engine, HeaderInfo, ScoringWeights, FILE_EXTENSION,
};
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
const CANCELLED_EXIT_CODE: i32 = 130;
#[cfg(not(unix))]
const CANCELLED_EXIT_CODE: i32 = 3;

#[derive(Parser)]
#[command(
    name = "crimp",
    version,
    about = "Pluggable compression engine CLI",
    long_about = "Compress and restore .crz files with weighted algorithm selection, \
                  deadline supervision, and safe cancellation."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a file into a .crz file.
    Compress {
        /// Source file to compress.
        input: PathBuf,

        /// Destination file path (defaults to <input>.crz).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Use this algorithm instead of weighted selection.
        #[arg(long)]
        algorithm: Option<String>,

        /// Selection weights as THROUGHPUT,RATIO (e.g. 0.9,0.1 favors speed).
        #[arg(long, default_value = "0.7,0.3", value_parser = parse_weights)]
        weights: ScoringWeights,

        /// Worker deadline in seconds before the fallback kicks in.
        #[arg(long, default_value_t = 30)]
        timeout: u64,

        /// Print machine-readable stats instead of the summary.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Restore the original data from a .crz file.
    Decompress {
        /// Source .crz file.
        input: PathBuf,

        /// Destination file path (defaults to the input without its .crz
        /// extension).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Worker deadline in seconds.
        #[arg(long, default_value_t = 30)]
        timeout: u64,

        /// Print machine-readable stats instead of the summary.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List the registered compression algorithms.
    List {
        /// Print machine-readable output.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Show the header of a .crz file without decompressing it.
    Inspect {
        /// File to inspect.
        input: PathBuf,

        /// Print machine-readable output.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() {
    init_tracing();
    if let Err(error) = run() {
        if matches!(error.downcast_ref::<CrimpError>(), Some(CrimpError::Cancelled)) {
            eprintln!("operation cancelled");
            std::process::exit(CANCELLED_EXIT_CODE);
        }
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_plugins()?;

    match cli.command {
        Commands::Compress {
            input,
            output,
            algorithm,
            weights,
            timeout,
            json,
        } => compress_command(input, output, algorithm, weights, timeout, json),
        Commands::Decompress {
            input,
            output,
            timeout,
            json,
        } => decompress_command(input, output, timeout, json),
        Commands::List { json } => list_command(json),
        Commands::Inspect { input, json } => inspect_command(input, json),
    }
}

fn compress_command(
    input: PathBuf,
    output: Option<PathBuf>,
    algorithm: Option<String>,
    weights: ScoringWeights,
    timeout: u64,
    json: bool,
) -> anyhow::Result<()> {
    let output_path = output.unwrap_or_else(|| default_output_path(&input));
    let cancel = CancellationToken::new();
    install_interrupt_handler(cancel.clone())?;

    let options = CompressOptions {
        algorithm,
        weights,
        timeout: Duration::from_secs(timeout),
        cancel: cancel.clone(),
    };
    let engine = Engine::new();
    match engine.compress_file(&input, &output_path, &options) {
        Ok(stats) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_compress_summary(&input, &output_path, &stats);
            }
            Ok(())
        }
        Err(error) => Err(report_interrupt_lag(error, &cancel).into()),
    }
}

fn decompress_command(
    input: PathBuf,
    output: Option<PathBuf>,
    timeout: u64,
    json: bool,
) -> anyhow::Result<()> {
    let output_path = output.unwrap_or_else(|| default_decompress_output_path(&input));
    let cancel = CancellationToken::new();
    install_interrupt_handler(cancel.clone())?;

    let options = DecompressOptions {
        timeout: Duration::from_secs(timeout),
        cancel: cancel.clone(),
    };
    let engine = Engine::new();
    match engine.decompress_file(&input, &output_path, &options) {
        Ok(stats) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_decompress_summary(&input, &output_path, &stats);
            }
            Ok(())
        }
        Err(error) => Err(report_interrupt_lag(error, &cancel).into()),
    }
}

fn list_command(json: bool) -> anyhow::Result<()> {
    let plugins = list_plugins();
    if json {
        println!("{}", serde_json::to_string_pretty(&plugins)?);
        return Ok(());
    }

    println!("registered algorithms:");
    println!(
        "  {:<10} {:<8} {:<6} {:>12} {:>7}",
        "name", "version", "magic", "throughput", "ratio"
    );
    for plugin in plugins {
        println!(
            "  {:<10} {:<8} {:<6} {:>7.1} MB/s {:>7.2}",
            plugin.name,
            plugin.version,
            format_magic(plugin.magic),
            plugin.throughput_mbps,
            plugin.ratio
        );
    }
    Ok(())
}

fn inspect_command(input: PathBuf, json: bool) -> anyhow::Result<()> {
    let engine = Engine::new();
    let info: HeaderInfo = engine.inspect(File::open(&input)?)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("header: {}", input.display());
    println!("  magic: {}", format_magic(info.magic));
    println!(
        "  algorithm: {}",
        info.algorithm.as_deref().unwrap_or("(unknown)")
    );
    println!("  version: {}", info.version);
    println!(
        "  original size: {} ({} bytes)",
        format_bytes(info.original_size),
        info.original_size
    );
    println!("  crc32: {:#010x}", info.crc32);
    Ok(())
}

/// Wires Ctrl+C to the operation token. The first interrupt starts
/// cancellation; further ones only report that teardown is in progress.
fn install_interrupt_handler(cancel: CancellationToken) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        if cancel.cancel() {
            eprintln!();
            eprintln!("interrupt received, cancelling and removing partial output...");
        } else {
            eprintln!("already cancelling, waiting for in-flight blocks to finish");
        }
    })?;
    Ok(())
}

fn report_interrupt_lag(error: CrimpError, cancel: &CancellationToken) -> CrimpError {
    if matches!(error, CrimpError::Cancelled) {
        if let Some(lag) = cancel.time_since_cancel() {
            tracing::info!(?lag, "operation stopped after interrupt");
        }
    }
    error
}

fn print_compress_summary(input: &Path, output: &Path, stats: &CompressStats) {
    println!("compression complete");
    println!(
        "  input: {} ({})",
        input.display(),
        format_bytes(stats.original_size)
    );
    println!(
        "  output: {} ({})",
        output.display(),
        format_bytes(stats.compressed_size)
    );
    if stats.fell_back {
        println!("  algorithm: {} (fallback)", stats.algorithm);
    } else {
        println!("  algorithm: {}", stats.algorithm);
    }
    println!("  ratio: {:.1}%", stats.ratio * 100.0);
    let rate = stats.original_size as f64 / stats.elapsed.as_secs_f64().max(1e-9);
    println!(
        "  elapsed: {} ({}/s)",
        format_duration(stats.elapsed),
        format_rate(rate)
    );
}

fn print_decompress_summary(input: &Path, output: &Path, stats: &DecompressStats) {
    println!("decompression complete");
    println!("  input: {}", input.display());
    println!(
        "  output: {} ({})",
        output.display(),
        format_bytes(stats.output_size)
    );
    println!("  algorithm: {}", stats.algorithm);
    println!("  crc32: {:#010x} (verified)", stats.crc32);
    let rate = stats.output_size as f64 / stats.elapsed.as_secs_f64().max(1e-9);
    println!(
        "  elapsed: {} ({}/s)",
        format_duration(stats.elapsed),
        format_rate(rate)
    );
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn default_output_path(input: &Path) -> PathBuf {
    let mut out = input.as_os_str().to_os_string();
    out.push(".");
    out.push(FILE_EXTENSION);
    PathBuf::from(out)
}

fn default_decompress_output_path(input: &Path) -> PathBuf {
    let has_crz_extension = input
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(FILE_EXTENSION))
        .unwrap_or(false);

    if has_crz_extension {
        let mut out = input.to_path_buf();
        out.set_extension("");
        if out != input {
            return out;
        }
    }

    let mut fallback = input.as_os_str().to_os_string();
    fallback.push(".out");
    PathBuf::from(fallback)
}

fn parse_weights(value: &str) -> Result<ScoringWeights, String> {
    let (throughput, ratio) = value
        .split_once(',')
        .ok_or_else(|| format!("expected THROUGHPUT,RATIO, got '{value}'"))?;
    let throughput: f64 = throughput
        .trim()
        .parse()
        .map_err(|_| format!("invalid throughput weight '{throughput}'"))?;
    let ratio: f64 = ratio
        .trim()
        .parse()
        .map_err(|_| format!("invalid ratio weight '{ratio}'"))?;
    ScoringWeights::new(throughput, ratio).map_err(|error| error.to_string())
}

fn format_magic(magic: [u8; 4]) -> String {
    if magic.iter().all(|byte| byte.is_ascii_graphic()) {
        String::from_utf8_lossy(&magic).into_owned()
    } else {
        format!(
            "0x{:02x}{:02x}{:02x}{:02x}",
            magic[0], magic[1], magic[2], magic[3]
        )
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0usize;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[unit])
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

fn format_rate(bytes_per_second: f64) -> String {
    if !bytes_per_second.is_finite() || bytes_per_second <= 0.0 {
        return "0 B".to_string();
    }

    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes_per_second;
    let mut unit = 0usize;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{value:.0} {}", UNITS[unit])
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let millis = duration.subsec_millis();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else if minutes > 0 {
        format!("{minutes:02}:{seconds:02}")
    } else {
        format!("{seconds}.{millis:03}s")
    }
}
