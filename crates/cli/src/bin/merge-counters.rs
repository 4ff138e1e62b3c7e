//! Merge multiple saved `Counter` files into one report.
//!
//! Mirrors the reference tool's `merge-counters` script: each input
//! file is the `{"version":1,...}` document `pipesim --save-counters`
//! writes, and the merge is the same additive fold `Counter: Add`
//! already implements for in-process counter accumulation.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use pipesim_core::Counter;

#[derive(Parser, Debug)]
#[command(name = "merge-counters", about = "Merge saved pipesim counter files")]
struct Cli {
    /// Print the merged report to FILE instead of stdout.
    #[arg(short = 'r', long)]
    report: Option<PathBuf>,

    /// Counter files to merge.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[derive(serde::Deserialize)]
struct Versioned {
    version: u32,
    #[serde(flatten)]
    counter: Counter,
}

fn read_counter(path: &PathBuf) -> std::io::Result<Counter> {
    let reader = BufReader::new(File::open(path)?);
    let versioned: Versioned = serde_json::from_reader(reader)?;
    if versioned.version != 1 {
        eprintln!(
            "warning: {} has counter file version {}, expected 1",
            path.display(),
            versioned.version
        );
    }
    Ok(versioned.counter)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut merged: Option<Counter> = None;
    for path in &cli.files {
        let counter = match read_counter(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("error reading {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        };
        merged = Some(match merged {
            Some(acc) => acc + counter,
            None => counter,
        });
    }

    let Some(merged) = merged else {
        eprintln!("no counter files given");
        return ExitCode::FAILURE;
    };

    let result = match &cli.report {
        Some(path) => File::create(path).and_then(|f| merged.print(&mut BufWriter::new(f))),
        None => merged.print(&mut std::io::stdout()),
    };
    if let Err(e) = result {
        eprintln!("error writing report: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
