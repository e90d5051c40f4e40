//! # Telemetry Sink Entry Point
//!
//! Reads one JSON event per line from stdin and records it through the
//! full pipeline. Host processes pipe their agent lifecycle events here:
//!
//! ```text
//! agent-host --emit-events | telemetry-sink --config telemetry.json
//! ```

use clap::Parser;
use log::{error, info, warn};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use telemetry::{EventInput, RecordOutcome, TelemetryConfig, TelemetryService};
use tokio::io::{AsyncBufReadExt, BufReader as AsyncBufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "telemetry-sink")]
#[command(about = "Record agent telemetry events read from stdin", long_about = None)]
struct Cli {
    /// JSON configuration file (camelCase keys, every field optional)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Active log file; overrides the configuration and TELEMETRY_FILE
    #[arg(short, long)]
    file: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> Result<TelemetryConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => {
            let reader = BufReader::new(File::open(path)?);
            serde_json::from_reader(reader)?
        }
        None => TelemetryConfig::default(),
    };

    if let Ok(path) = std::env::var("TELEMETRY_FILE") {
        config.file_path = PathBuf::from(path);
    }
    if let Some(path) = &cli.file {
        config.file_path = path.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let service = match TelemetryService::start(config) {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to start telemetry: {}", e);
            return Err(e.into());
        }
    };

    let mut lines = AsyncBufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0usize;
    let mut malformed = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let input: EventInput = match serde_json::from_str(&line) {
            Ok(input) => input,
            Err(e) => {
                malformed += 1;
                warn!("Skipping malformed event on line {}: {}", line_no, e);
                continue;
            }
        };

        match service.record(input) {
            Ok(RecordOutcome::Recorded { .. }) | Ok(RecordOutcome::Dropped { .. }) => {}
            Ok(RecordOutcome::Disabled) => {
                info!("Telemetry disabled; discarding input");
                break;
            }
            Err(e) => {
                error!("Failed to record event on line {}: {}", line_no, e);
            }
        }
    }

    let stats = service.stats();
    service.close().await?;

    println!("=================================================");
    println!("  Telemetry Sink Summary");
    println!("=================================================");
    println!("  - Recorded:  {}", stats.recorded);
    println!("  - Dropped:   {}", stats.dropped);
    println!("  - Malformed: {}", malformed);
    if let Some(head) = stats.chain_head {
        println!("  - Chain head: {}", head);
    }

    Ok(())
}
