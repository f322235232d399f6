///
/// tessel-bench - Exercise the tessel substrate from the command line
///
/// Subcommands:
/// - tessel-bench task --count N: parallel for over N indices
/// - tessel-bench pool --initial I --max M --jobs J --sleep-ms S: push J
///   sleeping jobs through a bounded pool and report peak concurrency
/// - tessel-bench route --bytes N --fanout K [--file PATH]: send N bytes
///   through a root input fanned out to K leaves
///
/// Results are written to the diagnostic sink, which the runtime attaches
/// to stderr (and to `[log] file` when configured).
///

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tessel_runtime::{
    CaptureOutput, FileMode, FileOutput, OutputNode, RouterInput, Runtime, RuntimeConfig,
    ThreadPool, execute_threaded_task, processor_count, sink,
};

#[derive(Parser)]
#[command(name = "tessel-bench")]
#[command(author, version, about = "Exercise tessel pools, tasks and routers", long_about = None)]
struct Cli {
    /// Runtime configuration file (defaults to $TESSEL_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parallel for over an index range
    Task {
        /// Number of indices
        #[arg(long, default_value_t = 10_000_000)]
        count: usize,
    },

    /// Push sleeping jobs through a bounded thread pool
    Pool {
        /// Threads started up front
        #[arg(long, default_value_t = 0)]
        initial: usize,

        /// Thread limit
        #[arg(long, default_value_t = 4)]
        max: usize,

        /// Number of jobs to run
        #[arg(long, default_value_t = 32)]
        jobs: usize,

        /// How long each job sleeps
        #[arg(long, default_value_t = 10)]
        sleep_ms: u64,
    },

    /// Route bytes through a fanned-out router tree
    Route {
        /// Total bytes to send
        #[arg(long, default_value_t = 1 << 20)]
        bytes: usize,

        /// Number of leaf outputs
        #[arg(long, default_value_t = 4)]
        fanout: usize,

        /// Also write everything to this file
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RuntimeConfig::from_path(path),
        None => RuntimeConfig::from_env(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            std::process::exit(1);
        }
    };

    let runtime = match Runtime::init(config) {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error starting runtime: {}", e);
            std::process::exit(1);
        }
    };

    let ok = match cli.command {
        Commands::Task { count } => run_task(count),
        Commands::Pool {
            initial,
            max,
            jobs,
            sleep_ms,
        } => run_pool(initial, max, jobs, Duration::from_millis(sleep_ms)),
        Commands::Route {
            bytes,
            fanout,
            file,
        } => run_route(bytes, fanout, file),
    };

    runtime.shutdown();
    if !ok {
        std::process::exit(1);
    }
}

fn report(args: std::fmt::Arguments<'_>) {
    sink().output_fmt(format_args!("[bench] {}\n", args));
}

fn run_task(count: usize) -> bool {
    let slots: Vec<AtomicU64> = (0..count).map(|_| AtomicU64::new(0)).collect();

    let start = Instant::now();
    execute_threaded_task(count, &slots, |i, slots| {
        slots[i].store((i as u64).wrapping_mul(i as u64) | 1, Ordering::Relaxed);
    });
    let elapsed = start.elapsed();

    let missed = slots.iter().filter(|slot| slot.load(Ordering::Relaxed) == 0).count();
    report(format_args!(
        "task: {} indices on {} processors in {:.3?} ({} missed)",
        count,
        processor_count(),
        elapsed,
        missed
    ));
    missed == 0
}

fn run_pool(initial: usize, max: usize, jobs: usize, sleep: Duration) -> bool {
    let pool = ThreadPool::new(initial, max);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut inline = 0;
    for _ in 0..jobs {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        let done = Arc::clone(&done);
        let handed_off = pool.run_thread(move || {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(sleep);
            running.fetch_sub(1, Ordering::SeqCst);
            done.fetch_add(1, Ordering::SeqCst);
        });
        if !handed_off {
            inline += 1;
        }
    }
    let threads = pool.thread_count();
    drop(pool);
    let elapsed = start.elapsed();

    let peak = peak.load(Ordering::SeqCst);
    report(format_args!(
        "pool: {} jobs, {} threads, peak {} concurrent, {} inline, {:.3?}",
        done.load(Ordering::SeqCst),
        threads,
        peak,
        inline,
        elapsed
    ));
    done.load(Ordering::SeqCst) == jobs && peak <= max.max(initial).max(1)
}

fn run_route(bytes: usize, fanout: usize, file: Option<PathBuf>) -> bool {
    let root = RouterInput::new();
    let leaves: Vec<_> = (0..fanout).map(|_| OutputNode::new(CaptureOutput::new())).collect();
    for leaf in &leaves {
        root.add_output(leaf);
    }

    let file_node = match file {
        Some(path) => match FileOutput::create(&path, FileMode::Binary) {
            Ok(output) => Some(OutputNode::new(output)),
            Err(e) => {
                report(format_args!("route: {}", e));
                return false;
            }
        },
        None => None,
    };
    if let Some(node) = &file_node {
        root.add_output(node);
    }

    let chunk: Vec<u8> = (0..1024).map(|i| (i % 251) as u8).collect();
    let start = Instant::now();
    let mut sent = 0;
    while sent < bytes {
        let n = chunk.len().min(bytes - sent);
        root.output(&chunk[..n]);
        sent += n;
    }
    root.flush();
    let elapsed = start.elapsed();

    let short = leaves.iter().filter(|leaf| leaf.len() != bytes).count();
    let rate = bytes as f64 / elapsed.as_secs_f64().max(f64::EPSILON) / (1024.0 * 1024.0);
    report(format_args!(
        "route: {} bytes to {} leaves in {:.3?} ({:.1} MiB/s, threaded={}, {} short)",
        bytes,
        fanout,
        elapsed,
        rate,
        root.is_threaded(),
        short
    ));
    tracing::debug!(outputs = root.output_count(), "route finished");
    short == 0
}
