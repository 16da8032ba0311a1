use std::path::PathBuf;
use std::process::ExitCode;

use autohold::{PlayerConfig, Sheet, SustainClassifier, TracingEmitter, Transport};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Play a sheet by emitting timed key presses.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Sheet file (JSON)
    sheet: PathBuf,

    /// Player config (RON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Playback speed multiplier
    #[arg(short, long, default_value_t = 1.0)]
    speed: f64,

    /// Classify and print the sheet without playing it
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &args.config {
        Some(path) => PlayerConfig::load(path)?,
        None => PlayerConfig::default(),
    };

    let sheet = Sheet::load(&args.sheet)?;
    let mut piece = sheet.to_piece(&config.inference, args.speed)?;
    let report = SustainClassifier::from(&config.sustain).classify(&mut piece);
    info!(
        name = sheet.name.as_deref().unwrap_or("untitled"),
        notes = piece.len(),
        held = report.held,
        tapped = report.tapped,
        merged = report.merged,
        "loaded sheet"
    );

    if args.dry_run {
        for event in piece.events() {
            info!(
                key = %event.key,
                onset_ms = event.onset_ms,
                hold_ms = ?event.effective_ms(),
                "note"
            );
        }
        return Ok(());
    }

    let transport = Transport::new(TracingEmitter::new(config.layout.clone()), &config)?;
    transport.start(piece);
    while !transport.wait_for_stop(std::time::Duration::from_secs(1)) {
        let status = transport.status();
        info!(cursor = status.cursor, elapsed_ms = status.elapsed.as_millis() as u64, "playing");
    }
    Ok(())
}
