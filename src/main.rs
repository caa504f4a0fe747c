use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process;

use clap_verbosity_flag::{Verbosity, WarnLevel};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use vmsnoop_lib::{CaptureReader, DecodeSummary, Decoded, Decoder, DecoderConfig};

mod render;

use render::RenderOptions;

/// Decode a btsnoop capture of a phone talking to a VanMoof bike.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The btsnoop_hci.log file to decode
    file: PathBuf,
    /// Bike encryption key as 32 hex characters
    #[arg(short = 'k', long)]
    encryption_key: Option<String>,
    /// Bike MAC address, needed when several bikes were around during the capture
    #[arg(short, long)]
    bike_id: Option<String>,
    /// Hide challenge reads and the nonce bytes of challenge writes
    #[arg(long)]
    hide_challenges: bool,
    /// Only print the first part of each UUID
    #[arg(short, long)]
    short_uuids: bool,
    /// Print one JSON object per line instead of text
    #[arg(long)]
    json: bool,
    /// Print the capture time of each event
    #[arg(short, long)]
    timestamps: bool,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<WarnLevel>,
}

fn setup_logging(log_file_path: Option<PathBuf>, verbosity: &Verbosity<WarnLevel>) -> Result<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .without_time();

    let (file_layer, guard) = if let Some(ref path) = log_file_path {
        let log_file = File::create(path).with_context(|| format!("Failed to create log file at: {:?}", path))?;
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(log_file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    // WARN by default, -v for INFO, -vv for DEBUG; RUST_LOG overrides
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file_path {
        info!("Logging to file: {:?}", path);
    }

    Ok(guard)
}

fn main() {
    let cli = Cli::parse();
    let _guard = match setup_logging(cli.log_file.clone(), &cli.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: {:#}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run(&cli) {
        eprintln!("error: {:#}", e);
        process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = DecoderConfig::from_options(
        cli.bike_id.as_deref(),
        cli.encryption_key.as_deref(),
        cli.hide_challenges,
    )
    .context("invalid configuration")?;

    let data = std::fs::read(&cli.file).with_context(|| format!("Failed to read capture {:?}", cli.file))?;
    let reader = CaptureReader::new(data).with_context(|| format!("{} is not a usable capture", cli.file.display()))?;
    debug!("capture header: {:?}", reader.header());

    let options = RenderOptions {
        short_uuids: cli.short_uuids,
        hide_challenges: cli.hide_challenges,
        timestamps: cli.timestamps,
    };

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut decoder = Decoder::new(config);

    for record in reader {
        let record = record?;
        for decoded in decoder.push_record(&record)? {
            print_decoded(&mut out, &decoded, cli.json, &options)?;
        }
    }

    print_summary(&mut out, &decoder.finish(), cli.json)?;
    out.flush()?;
    Ok(())
}

fn print_decoded(out: &mut impl Write, decoded: &Decoded, json: bool, options: &RenderOptions) -> Result<()> {
    if json {
        writeln!(out, "{}", serde_json::to_string(decoded)?)?;
        return Ok(());
    }

    match decoded {
        Decoded::Event(event) => writeln!(out, "{}", render::event_line(event, options))?,
        Decoded::Diagnostic(diagnostic) => writeln!(out, "{}", render::warning_line(diagnostic))?,
    }
    Ok(())
}

fn print_summary(out: &mut impl Write, summary: &DecodeSummary, json: bool) -> Result<()> {
    info!(
        "{} records, {} events, {} attribute handles",
        summary.records, summary.events, summary.attributes
    );
    if json {
        writeln!(out, "{}", serde_json::json!({ "summary": summary }))?;
        return Ok(());
    }

    for warning in &summary.warnings {
        writeln!(out, "{}", render::warning_line(warning))?;
    }
    Ok(())
}
