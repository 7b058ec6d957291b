//! Arbor Stress Binary
//!
//! Runs a concurrent create/update/move/delete workload against one tree and
//! reports throughput and retry counts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arbor::config::LockConfig;
use arbor::instrumentation::CountingInstrumentation;
use arbor::persist::MemoryReplicator;
use arbor::{ArborError, Config, DataTree, Request, SessionAuth};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::{fmt, EnvFilter};

/// Arbor Stress Tool
#[derive(Parser, Debug)]
#[command(name = "arbor-stress")]
#[command(about = "Concurrent workload against an in-memory data tree")]
#[command(version)]
struct Args {
    /// Worker threads
    #[arg(short, long, default_value = "8")]
    threads: usize,

    /// Operations per worker
    #[arg(short, long, default_value = "10000")]
    ops: usize,

    /// Top-level branches the workload spreads over
    #[arg(short, long, default_value = "16")]
    fanout: usize,

    /// Lock strategy (MultiLevelRWLocks, SingleRWLock, LocksByBackend[|ReaderGoUnlocked])
    #[arg(short = 's', long)]
    strategy: Option<String>,

    /// Lock pool sizes per level, comma separated
    #[arg(short = 'l', long)]
    lock_sizes: Option<String>,

    /// Max lock wait in milliseconds
    #[arg(short = 'w', long, default_value = "5000")]
    max_wait_ms: u64,

    /// Retries for retriable failures
    #[arg(short, long, default_value = "5")]
    retries: usize,

    /// Workload seed; each worker derives its own stream from it
    #[arg(long, default_value = "42")]
    seed: u64,
}

#[derive(Default)]
struct Counters {
    ok: AtomicU64,
    expected_failures: AtomicU64,
    retries: AtomicU64,
    gave_up: AtomicU64,
}

fn pick_request(rng: &mut StdRng, fanout: usize, worker: usize) -> Request {
    let branch = format!("/b{}", rng.gen_range(0..fanout.max(1)));
    let leaf = format!("{}/n{}", branch, rng.gen_range(0..64));
    match rng.gen_range(0..10) {
        0..=3 => Request::create(leaf, format!("w{}", worker)),
        4..=5 => Request::set_data(leaf, format!("w{}", worker), -1),
        6 => Request::delete(leaf),
        7 => Request::Move {
            path: leaf,
            new_parent: format!("/b{}", rng.gen_range(0..fanout.max(1))),
            version: -1,
        },
        8 => Request::get_children(branch),
        _ => Request::get_data(leaf),
    }
}

fn main() {
    // Initialize tracing/logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,arbor=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("Arbor stress v{}", arbor::VERSION);

    let mut config = Config::builder().build();
    config.lock = LockConfig::from_settings(args.strategy.as_deref(), args.lock_sizes.as_deref());
    config.lock.max_acquire_wait = std::time::Duration::from_millis(args.max_wait_ms);

    let replicator = MemoryReplicator::new();
    let instrumentation = Arc::new(CountingInstrumentation::new());
    let tree = match DataTree::open_with(
        config,
        Arc::new(replicator.clone()),
        Arc::clone(&instrumentation) as _,
    ) {
        Ok(tree) => tree,
        Err(e) => {
            tracing::error!("Failed to open tree: {}", e);
            std::process::exit(1);
        }
    };

    let auth = SessionAuth::anonymous();
    for b in 0..args.fanout {
        if let Err(e) = tree.execute(&Request::create(format!("/b{}", b), ""), &auth) {
            tracing::error!("Failed to create branch /b{}: {}", b, e);
            std::process::exit(1);
        }
    }

    let counters = Counters::default();
    let start = Instant::now();

    let result = crossbeam::thread::scope(|s| {
        for worker in 0..args.threads {
            let tree = &tree;
            let counters = &counters;
            let args = &args;
            s.spawn(move |_| {
                let auth = SessionAuth::anonymous().with_identity(format!("worker-{}", worker));
                let mut rng = StdRng::seed_from_u64(args.seed ^ (worker as u64 + 1));

                for _ in 0..args.ops {
                    let request = pick_request(&mut rng, args.fanout, worker);
                    let mut attempt = 0;
                    loop {
                        match tree.execute(&request, &auth) {
                            Ok(_) => {
                                counters.ok.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) if e.is_retriable() && attempt < args.retries => {
                                attempt += 1;
                                counters.retries.fetch_add(1, Ordering::Relaxed);
                                continue;
                            }
                            Err(e) if e.is_retriable() => {
                                counters.gave_up.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(
                                ArborError::NoNode(_)
                                | ArborError::NodeExists(_)
                                | ArborError::NotEmpty(_)
                                | ArborError::BadVersion(_),
                            ) => {
                                counters.expected_failures.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                tracing::error!(worker, error = %e, "unexpected failure");
                                counters.gave_up.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        break;
                    }
                }
            });
        }
    });

    if result.is_err() {
        tracing::error!("A worker thread panicked");
        std::process::exit(1);
    }

    let elapsed = start.elapsed();
    let total = (args.threads * args.ops) as f64;
    tracing::info!(
        ok = counters.ok.load(Ordering::Relaxed),
        expected_failures = counters.expected_failures.load(Ordering::Relaxed),
        retries = counters.retries.load(Ordering::Relaxed),
        gave_up = counters.gave_up.load(Ordering::Relaxed),
        "workload finished in {:.2?} ({:.0} ops/s)",
        elapsed,
        total / elapsed.as_secs_f64()
    );
    tracing::info!(
        nodes = tree.node_count(),
        locks_acquired = instrumentation.acquired(),
        lock_timeouts = instrumentation.failed(),
        committed = replicator.committed_count(),
        aborted = replicator.aborted_count(),
        "final state"
    );
}
