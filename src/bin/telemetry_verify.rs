//! # Telemetry Verify CLI
//!
//! Checks the hash chain of a telemetry log.
//!
//! Usage:
//!   telemetry-verify telemetry.jsonl
//!   telemetry-verify telemetry.jsonl --include-rotated
//!   telemetry-verify telemetry.jsonl --tail 1000 --algorithm sha512

use clap::Parser;
use std::path::PathBuf;
use telemetry::pipeline::HashAlgorithm;
use telemetry::verify::{log_files, verify_files, VerifyReport};

#[derive(Parser)]
#[command(name = "telemetry-verify")]
#[command(about = "Verify the integrity chain of agent telemetry logs", long_about = None)]
struct Cli {
    /// Active log file
    path: PathBuf,

    /// Digest the chain was built with
    #[arg(short, long, default_value = "sha256")]
    algorithm: String,

    /// Also verify rotated generations (oldest first), including .gz files
    #[arg(short = 'r', long)]
    include_rotated: bool,

    /// Only verify the last N records
    #[arg(short, long)]
    tail: Option<usize>,
}

fn main() -> Result<(), String> {
    let cli = Cli::parse();

    let algorithm: HashAlgorithm = cli.algorithm.parse().map_err(|e| format!("{}", e))?;
    let files = log_files(&cli.path, cli.include_rotated)
        .map_err(|e| format!("Failed to list {}: {}", cli.path.display(), e))?;

    if files.is_empty() {
        return Err(format!("No telemetry log found at {}", cli.path.display()));
    }

    println!("Verifying {} file(s) with {}:", files.len(), algorithm.name());
    for file in &files {
        println!("  - {}", file.display());
    }
    println!();

    let report = verify_files(algorithm, &files, cli.tail)
        .map_err(|e| format!("Failed to read telemetry log: {}", e))?;

    print_report(&report);

    match report.first_break {
        Some(brk) => Err(format!("chain broken at {}", brk)),
        None => Ok(()),
    }
}

fn print_report(report: &VerifyReport) {
    println!("Records:    {}", report.records);
    println!("Signed:     {}", report.signed);
    println!("Unsigned:   {}", report.unsigned);
    println!("Segments:   {}", report.segments);

    if report.is_intact() {
        println!("Status:     ✅ intact");
    } else {
        println!("Status:     🚫 BROKEN");
    }
}
