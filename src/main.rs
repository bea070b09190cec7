use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;

use rusty_dram::bus::BusLayout;
use rusty_dram::config::BoardConfig;
use rusty_dram::console::{run_monitor, SessionReport};
use rusty_dram::engine::{select_boot_mode, BootMode, BusEngine};
use rusty_dram::flash::{load_trace, trace_region_size, FileFlash};
use rusty_dram::sim::{BusOp, SimulatedRequester};
use rusty_dram::store::MemoryStore;
use rusty_dram::trace::TraceRecorder;
use rusty_dram::types::{DramAddress, ADDRESS_SPACE};

#[derive(Parser)]
#[command(
    name = "rusty_dram",
    about = "Multiplexed DRAM bus emulator with memory emulation and trace capture"
)]
struct Cli {
    /// Board configuration file (JSON). Defaults to the observed board.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve a scripted workload from the emulated store
    Emulate {
        /// Number of bus operations in the generated workload
        #[arg(long, default_value_t = 256)]
        operations: usize,

        /// Workload generator seed
        #[arg(long, default_value_t = 1)]
        seed: u64,

        /// Print one line per decoded transaction
        #[arg(long)]
        verbose: bool,

        /// Open the terminal monitor after the run
        #[arg(long)]
        monitor: bool,
    },

    /// Capture a transaction trace and persist it when the log fills
    Capture {
        /// Flash image file the trace table is persisted to
        #[arg(long, default_value = "trace_flash.bin")]
        flash: PathBuf,

        /// Workload generator seed
        #[arg(long, default_value_t = 2)]
        seed: u64,

        /// Override the configured trace capacity
        #[arg(long)]
        capacity: Option<usize>,
    },

    /// Print a previously persisted trace table
    Dump {
        /// Flash image file to read the trace table from
        #[arg(long, default_value = "trace_flash.bin")]
        flash: PathBuf,
    },
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let config = match &cli.config {
        Some(path) => BoardConfig::from_json_file(path)?,
        None => BoardConfig::default(),
    };
    let layout = BusLayout::new(&config.pins)?;

    match cli.command {
        Command::Emulate {
            operations,
            seed,
            verbose,
            monitor,
        } => run_emulate(&config, layout, operations, seed, verbose, monitor),
        Command::Capture {
            flash,
            seed,
            capacity,
        } => run_capture(&config, layout, &flash, seed, capacity),
        Command::Dump { flash } => run_dump(&config, &flash),
    }
}

fn run_emulate(
    config: &BoardConfig,
    layout: BusLayout,
    operations: usize,
    seed: u64,
    verbose: bool,
    monitor: bool,
) -> Result<(), String> {
    println!("{} - memory emulation", config.name);
    println!("Workload: {} operations, seed {}", operations, seed);

    let workload = generate_workload(operations, seed);
    let expected_reads = shadow_reads(&workload);

    let mut sim = SimulatedRequester::new(layout);
    sim.script(&workload);
    let events_to_run = sim.expected_events();

    let mut engine = BusEngine::new(sim, layout, MemoryStore::new());

    let mut events = Vec::with_capacity(events_to_run);
    for _ in 0..events_to_run {
        let event = engine.step();
        if verbose {
            println!("{:06}: {}", events.len(), event);
        }
        events.push(event);
    }

    let stats = engine.stats();
    let (sim, store) = engine.into_parts();

    println!();
    println!("Row strobes | Reads | Writes");
    println!("------------|-------|-------");
    println!(
        "{:11} | {:5} | {:6}",
        stats.row_strobes, stats.reads, stats.writes
    );

    let observed = sim.observed_reads();
    let mismatches = expected_reads
        .iter()
        .zip(observed.iter())
        .filter(|(expected, observed)| expected != observed)
        .count();

    if observed.len() != expected_reads.len() {
        return Err(format!(
            "Requester latched {} read values, expected {}",
            observed.len(),
            expected_reads.len()
        ));
    }
    if mismatches > 0 {
        return Err(format!(
            "{} of {} reads returned the wrong value",
            mismatches,
            observed.len()
        ));
    }
    println!("All {} reads returned the expected value", observed.len());

    if monitor {
        run_monitor(SessionReport {
            title: format!("{} - memory emulation", config.name),
            stats,
            events,
            store: Some(store.snapshot()),
        })?;
    }

    Ok(())
}

fn run_capture(
    config: &BoardConfig,
    layout: BusLayout,
    flash_path: &PathBuf,
    seed: u64,
    capacity: Option<usize>,
) -> Result<(), String> {
    let capacity = capacity.unwrap_or(config.trace_capacity);
    println!("{} - trace capture", config.name);
    println!(
        "Capacity: {} entries, flash image: {}",
        capacity,
        flash_path.display()
    );

    let mut sim = SimulatedRequester::new(layout);
    // The operator grounds the mode-select line to allow a new capture
    sim.set_mode_select(false);

    match select_boot_mode(&mut sim, &layout) {
        BootMode::DumpTrace => {
            // Mode-select read back asserted: refuse to overwrite the trace
            println!("Mode-select asserted, dumping existing trace instead");
            let flash = FileFlash::open(flash_path)?;
            return dump_flash(&flash, config.trace_flash_offset, capacity);
        }
        BootMode::RunBus => {}
    }

    let image_size = config.trace_flash_offset + trace_region_size(capacity);
    let flash = FileFlash::create(flash_path, image_size)?;
    let recorder = TraceRecorder::new(capacity, flash, config.trace_flash_offset);

    // One column transaction per operation; exactly enough to fill the log
    sim.script(&generate_workload(capacity, seed));

    let mut engine = BusEngine::new(sim, layout, recorder);
    engine.run();

    let stats = engine.stats();
    let (_, recorder) = engine.into_parts();

    if let Some(error) = recorder.persist_error() {
        return Err(format!("Trace captured but persistence failed: {}", error));
    }

    info!("Capture halted after {} transactions", stats.transactions());
    println!(
        "Captured {} entries ({} reads, {} writes), persisted and verified",
        recorder.log().len(),
        stats.reads,
        stats.writes
    );
    Ok(())
}

fn run_dump(config: &BoardConfig, flash_path: &PathBuf) -> Result<(), String> {
    let flash = FileFlash::open(flash_path)?;
    dump_flash(&flash, config.trace_flash_offset, config.trace_capacity)
}

fn dump_flash(flash: &FileFlash, offset: usize, capacity: usize) -> Result<(), String> {
    let entries = load_trace(flash, offset, capacity)?;

    println!("Trace table start");
    println!("=================");
    for (index, entry) in entries.iter().enumerate() {
        println!(
            "{:06}: RAS addr: 0x{:02X}, CAS addr: 0x{:02X}, Addr: 0x{:04X}, WR: {}",
            index,
            entry.row_address,
            entry.column_address,
            entry.address().value(),
            entry.direction.label()
        );
    }
    println!("Trace table end");
    println!("===============");
    println!("{} entries", entries.len());
    Ok(())
}

fn xorshift(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    x
}

/// Deterministic mixed workload: writes and reads over pseudo-random rows
/// and columns, with short page-mode runs of reads against one row.
fn generate_workload(operations: usize, seed: u64) -> Vec<BusOp> {
    let mut state = seed | 1;
    let mut ops = Vec::with_capacity(operations);

    while ops.len() < operations {
        let word = xorshift(&mut state);
        let row = (word >> 8) as u8 & 0x7F;
        let column = (word >> 16) as u8 & 0x7F;
        let value = (word >> 24) as u8;

        match word & 0x03 {
            0 | 1 => ops.push(BusOp::Write { row, column, value }),
            2 => ops.push(BusOp::Read { row, column }),
            _ => {
                // A short page-mode burst over consecutive columns
                let burst = 2 + (word >> 32 & 0x03) as u8;
                for i in 0..burst {
                    if ops.len() >= operations {
                        break;
                    }
                    ops.push(BusOp::Read {
                        row,
                        column: column.wrapping_add(i) & 0x7F,
                    });
                }
            }
        }
    }

    ops
}

/// Replays the workload against a shadow store and returns the value each
/// read should observe, in order.
fn shadow_reads(workload: &[BusOp]) -> Vec<u8> {
    let mut shadow = vec![0u8; ADDRESS_SPACE];
    let mut reads = Vec::new();

    for op in workload {
        match *op {
            BusOp::Write { row, column, value } => {
                shadow[DramAddress::combine(row, column).value() as usize] = value;
            }
            BusOp::Read { row, column } => {
                reads.push(shadow[DramAddress::combine(row, column).value() as usize]);
            }
        }
    }

    reads
}
