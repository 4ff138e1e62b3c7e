//! `pipesim` CLI: loads a microarchitecture configuration, replays an
//! instruction trace through it, and reports the resulting cycle-level
//! counters.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write as _};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::{error, info, instrument};
use tracing_subscriber::EnvFilter;

use pipesim_core::common::{SimError, TraceError};
use pipesim_core::config::{self, Config};
use pipesim_core::trace_source::{BinaryFrameTraceSource, JsonLineTraceSource, TraceRecord, TraceSource};
use pipesim_core::{Counter, Cpu};

/// `-t`/`--trace` dump mode: which per-cycle snapshot format, if any,
/// to print as the simulation runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum TraceDumpKind {
    /// A verbose, multi-line dump of every structural unit's state.
    Detailed,
    /// A one-line-per-cycle `-`/`P`/`F` occupancy summary.
    ThreeValued,
}

#[derive(Parser, Debug)]
#[command(
    name = "pipesim",
    author,
    version,
    about = "Trace-driven, cycle-accurate microarchitecture pipeline simulator"
)]
struct Cli {
    /// Microarchitecture configuration file.
    #[arg(short = 'u', long, value_name = "JSON")]
    uarch: PathBuf,

    /// Extension used to modify the microarchitecture. May be repeated.
    #[arg(short = 'e', long = "extend", action = clap::ArgAction::Append, value_name = "JSON")]
    extensions: Vec<PathBuf>,

    /// Modify one field of the microarchitecture. May be repeated.
    #[arg(short = 's', long = "set", action = clap::ArgAction::Append, value_name = "PATH=VALUE")]
    overrides: Vec<String>,

    /// Print a cycle-by-cycle trace in the given format.
    #[arg(short = 't', long)]
    trace: Option<TraceDumpKind>,

    /// Start printing the `-t` trace only from cycle N.
    #[arg(long, default_value_t = 0)]
    print_from_cycle: u64,

    /// Stop running after N cycles.
    #[arg(long)]
    cycles: Option<u64>,

    /// Restrict the run to the instructions between N and M (`N:[M]`).
    #[arg(long)]
    instructions: Option<String>,

    /// Save counters to FILE for later processing (see `merge-counters`).
    #[arg(long)]
    save_counters: Option<PathBuf>,

    /// Print the end-of-run report to FILE instead of stdout.
    #[arg(short = 'r', long)]
    report: Option<PathBuf>,

    /// Increase log verbosity (repeatable: warn, info, debug).
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Input trace file. A `.json`/`.jsonl` extension selects the
    /// newline-delimited JSON reader; anything else is read as the
    /// length-prefixed binary frame format.
    trace_file: PathBuf,
}

/// Parsed `--instructions N:[M]`: skip the first `start` retirable
/// records and, if `end` is set, stop after record `end` (exclusive).
struct InstructionBound {
    start: u64,
    end: Option<u64>,
}

fn parse_instruction_bound(text: &str) -> Result<InstructionBound, String> {
    let (start, end) = text
        .split_once(':')
        .ok_or_else(|| format!("--instructions must be `N:[M]`, got `{text}`"))?;
    let start: u64 = start
        .parse()
        .map_err(|_| format!("--instructions start `{start}` is not a number"))?;
    let end = if end.is_empty() {
        None
    } else {
        Some(
            end.parse()
                .map_err(|_| format!("--instructions end `{end}` is not a number"))?,
        )
    };
    Ok(InstructionBound { start, end })
}

/// Wraps a `TraceSource`, skipping its first `start` records and
/// reporting end-of-stream once `end` records (if any) have been
/// returned. Grounded in the reference tool's `FunctionalTrace.from_*`
/// constructors, which take the same `(start, end)` window.
struct BoundedTraceSource<'a> {
    inner: &'a mut dyn TraceSource,
    index: u64,
    start: u64,
    end: Option<u64>,
    skipped: bool,
}

impl<'a> BoundedTraceSource<'a> {
    fn new(inner: &'a mut dyn TraceSource, bound: InstructionBound) -> Self {
        Self {
            inner,
            index: 0,
            start: bound.start,
            end: bound.end,
            skipped: false,
        }
    }
}

impl TraceSource for BoundedTraceSource<'_> {
    fn next_record(&mut self) -> Result<Option<TraceRecord>, TraceError> {
        if !self.skipped {
            for _ in 0..self.start {
                if self.inner.next_record()?.is_none() {
                    break;
                }
            }
            self.skipped = true;
        }
        if let Some(end) = self.end {
            if self.index >= end.saturating_sub(self.start) {
                return Ok(None);
            }
        }
        let record = self.inner.next_record()?;
        if record.is_some() {
            self.index += 1;
        }
        Ok(record)
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[instrument(skip(cli))]
fn run(cli: &Cli) -> Result<Counter, SimError> {
    let config: Config = config::load_config(&cli.uarch, &cli.extensions, &cli.overrides)?;

    let mem = config::build_memory_system(&config);
    let exec = config::build_exec_unit(&config)?;
    let (sched, fetch) = config::build_sched_and_fetch(&config);
    let mut cpu = Cpu::new(mem, exec, sched, fetch);

    let file = File::open(&cli.trace_file).map_err(TraceError::Io)?;
    let reader = BufReader::new(file);
    let is_json = cli
        .trace_file
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json") || ext.eq_ignore_ascii_case("jsonl"));

    let mut json_source;
    let mut binary_source;
    let raw_source: &mut dyn TraceSource = if is_json {
        json_source = JsonLineTraceSource::new(reader);
        &mut json_source
    } else {
        binary_source = BinaryFrameTraceSource::new(reader);
        &mut binary_source
    };

    let bound = match &cli.instructions {
        Some(text) => parse_instruction_bound(text).map_err(|reason| {
            pipesim_core::ConfigError::SchemaViolation {
                path: "--instructions".to_string(),
                reason,
            }
        })?,
        None => InstructionBound { start: 0, end: None },
    };
    let mut trace = BoundedTraceSource::new(raw_source, bound);

    info!(trace_file = %cli.trace_file.display(), "starting simulation");

    let mut three_valued_header_printed = false;
    loop {
        if cpu.is_done() {
            break;
        }
        if let Some(limit) = cli.cycles {
            if cpu.counter().cycles >= limit {
                break;
            }
        }
        cpu.tick_once(&mut trace)?;

        if cpu.counter().cycles >= cli.print_from_cycle {
            match cli.trace {
                Some(TraceDumpKind::Detailed) => {
                    let mut s = String::new();
                    cpu.print_state_detailed(&mut s);
                    print!("{s}");
                }
                Some(TraceDumpKind::ThreeValued) => {
                    if !three_valued_header_printed {
                        println!("{}", cpu.three_valued_header());
                        three_valued_header_printed = true;
                    }
                    println!("cycle {:>6} {}", cpu.counter().cycles, cpu.three_valued_row());
                }
                None => {}
            }
        }
    }

    Ok(cpu.counter().clone())
}

fn write_report(counter: &Counter, path: Option<&PathBuf>) -> std::io::Result<()> {
    match path {
        Some(path) => {
            let mut out = BufWriter::new(File::create(path)?);
            counter.print(&mut out)
        }
        None => counter.print(&mut std::io::stdout()),
    }
}

fn save_counters(counter: &Counter, path: &PathBuf) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    #[derive(serde::Serialize)]
    struct Versioned<'a> {
        version: u32,
        #[serde(flatten)]
        counter: &'a Counter,
    }
    serde_json::to_writer(&mut out, &Versioned { version: 1, counter })?;
    out.flush()
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let counter = match run(&cli) {
        Ok(counter) => counter,
        Err(err) => {
            error!(%err, "simulation aborted");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = write_report(&counter, cli.report.as_ref()) {
        error!(%err, "failed to write report");
        return ExitCode::FAILURE;
    }
    if let Some(path) = &cli.save_counters {
        if let Err(err) = save_counters(&counter, path) {
            error!(%err, "failed to save counters");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}
