//! systate: replay a kernel trace and report the reconstructed state.

use std::cell::RefCell;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::info;

use systate::{Automaton, Completions, Config, JsonLinesSource, Summary, Topic};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Table,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "systate")]
#[command(about = "Reconstruct kernel state from a JSON-lines trace")]
#[command(version)]
struct Cli {
    /// Trace file, one JSON event per line
    trace: PathBuf,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbosity: u8,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    format: Format,

    /// Bytes per block sector, overrides the config file
    #[arg(long)]
    sector_size: Option<u64>,

    /// Do not keep per-FD and per-disk I/O request histories
    #[arg(long)]
    no_io_requests: bool,
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(sector_size) = cli.sector_size {
        config.sector_size = sector_size;
    }
    if cli.no_io_requests {
        config.record_io_requests = false;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbosity);
    let config = load_config(&cli)?;

    let file = File::open(&cli.trace)
        .with_context(|| format!("Failed to open trace {}", cli.trace.display()))?;

    let mut automaton = Automaton::new(config);
    let completions = Rc::new(RefCell::new(Completions::default()));
    for topic in [Topic::IrqHandlerExit, Topic::SoftirqExit, Topic::SyscallExit] {
        let completions = Rc::clone(&completions);
        automaton.subscribe(topic, move |_| {
            let mut c = completions.borrow_mut();
            match topic {
                Topic::IrqHandlerExit => c.irq += 1,
                Topic::SoftirqExit => c.softirq += 1,
                _ => c.syscall += 1,
            }
        });
    }

    for event in JsonLinesSource::new(BufReader::new(file)) {
        let event = event.with_context(|| format!("Failed to read {}", cli.trace.display()))?;
        automaton.process_event(&event);
    }
    let (events, handled) = automaton.event_counts();
    info!("processed {events} events, {handled} handled");

    let summary = Summary::from_state(automaton.state(), completions.borrow().clone());
    match cli.format {
        Format::Table => print!("{}", summary.to_table()),
        Format::Json => println!("{}", summary.to_json()?),
    }
    Ok(())
}
