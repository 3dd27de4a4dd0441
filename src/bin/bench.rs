//! Benchmark harness: drives configured read/put/add/replace/remove/view percentages across N
//! threads against any table variant in this crate and reports aggregate throughput.
//!
//! Fingerprints are computed here, never inside the library: each `u64` key is hashed to a 128-bit
//! `Hv` via `xxhash-rust`'s XXH3. Per-thread throughput samples are shuttled to the reporting
//! thread through a `RingBuffer` rather than a shared atomic counter, so the hot path never
//! contends across threads.
use clap::{Parser, ValueEnum};
use epoch_hash::adaptive::AdaptiveTable;
use epoch_hash::config::{AdaptiveTarget, Config};
use epoch_hash::fingerprint::Hv;
use epoch_hash::locked::{LockedOrderedTable, LockedUnorderedTable};
use epoch_hash::lockfree::{LockFreeOrderedTable, LockFreeUnorderedTable};
use epoch_hash::reference::ReferenceTable;
use epoch_hash::ring_buffer::RingBuffer;
use epoch_hash::Table;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum Variant {
    Reference,
    LockedUnordered,
    LockedOrdered,
    LockfreeUnordered,
    LockfreeOrdered,
    Adaptive,
}

/// Concurrent hash table benchmark harness.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
struct Args {
    /// Table variant to drive.
    #[arg(long, value_enum, default_value = "lockfree-ordered")]
    variant: Variant,

    /// Worker thread count.
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Operations performed by each worker thread.
    #[arg(long, default_value_t = 200_000)]
    ops_per_thread: u64,

    /// Number of distinct keys operations are drawn from.
    #[arg(long, default_value_t = 100_000)]
    keyspace: u64,

    /// Minimum store size passed to `Config`.
    #[arg(long, default_value_t = 1024)]
    min_store_size: usize,

    /// Percent of operations that are `get`. All six `pct_*` flags must sum to 100.
    #[arg(long, default_value_t = 70)]
    pct_get: u32,
    #[arg(long, default_value_t = 15)]
    pct_put: u32,
    #[arg(long, default_value_t = 5)]
    pct_add: u32,
    #[arg(long, default_value_t = 5)]
    pct_replace: u32,
    #[arg(long, default_value_t = 4)]
    pct_remove: u32,
    #[arg(long, default_value_t = 1)]
    pct_view: u32,

    /// Pin each worker thread to a distinct core, if enough are available.
    #[arg(long, default_value_t = false)]
    pin_cores: bool,
}

#[derive(Copy, Clone, Default)]
struct OpCounts {
    get: u64,
    put: u64,
    add: u64,
    replace: u64,
    remove: u64,
    view: u64,
}

impl OpCounts {
    fn total(&self) -> u64 {
        self.get + self.put + self.add + self.replace + self.remove + self.view
    }

    fn add_from(&mut self, other: &OpCounts) {
        self.get += other.get;
        self.put += other.put;
        self.add += other.add;
        self.replace += other.replace;
        self.remove += other.remove;
        self.view += other.view;
    }
}

/// A per-thread throughput sample shuttled to the reporting thread.
struct Sample {
    thread_id: usize,
    counts: OpCounts,
    elapsed: Duration,
}

fn hash_key(key: u64) -> Hv {
    let digest = xxhash_rust::xxh3::xxh3_128(&key.to_le_bytes());
    Hv::new((digest >> 64) as u64, digest as u64)
}

/// Picks which operation to perform for this iteration, given a roll in `0..100`.
fn pick_op(roll: u32, args: &Args) -> &'static str {
    let mut acc = 0;
    acc += args.pct_get;
    if roll < acc {
        return "get";
    }
    acc += args.pct_put;
    if roll < acc {
        return "put";
    }
    acc += args.pct_add;
    if roll < acc {
        return "add";
    }
    acc += args.pct_replace;
    if roll < acc {
        return "replace";
    }
    acc += args.pct_remove;
    if roll < acc {
        return "remove";
    }
    "view"
}

fn run_worker(
    table: &(dyn Table<u64> + Send + Sync),
    thread_id: usize,
    args: &Args,
    samples: &RingBuffer<Sample>,
) {
    let mut rng = rand::thread_rng();
    let mut counts = OpCounts::default();
    let started = Instant::now();
    let mut last_report = started;

    for _ in 0..args.ops_per_thread {
        let key = rng.gen_range(0..args.keyspace);
        let hv = hash_key(key);
        let roll = rng.gen_range(0..100u32);
        match pick_op(roll, args) {
            "get" => {
                table.get(hv);
                counts.get += 1;
            }
            "put" => {
                table.put(hv, key);
                counts.put += 1;
            }
            "add" => {
                table.add(hv, key);
                counts.add += 1;
            }
            "replace" => {
                table.replace(hv, key);
                counts.replace += 1;
            }
            "remove" => {
                table.remove(hv);
                counts.remove += 1;
            }
            _ => {
                table.view(false);
                counts.view += 1;
            }
        }

        if counts.total() % 4096 == 0 {
            let now = Instant::now();
            while !samples.push(Sample {
                thread_id,
                counts,
                elapsed: now - last_report,
            }) {
                std::thread::yield_now();
            }
            last_report = now;
            counts = OpCounts::default();
        }
    }

    let now = Instant::now();
    while !samples.push(Sample {
        thread_id,
        counts,
        elapsed: now - last_report,
    }) {
        std::thread::yield_now();
    }
}

fn build_table(variant: Variant, config: &Config) -> Box<dyn Table<u64> + Send + Sync> {
    match variant {
        Variant::Reference => Box::new(ReferenceTable::<u64>::new(config)),
        Variant::LockedUnordered => Box::new(LockedUnorderedTable::<u64>::new(config)),
        Variant::LockedOrdered => Box::new(LockedOrderedTable::<u64>::new(config)),
        Variant::LockfreeUnordered => Box::new(LockFreeUnorderedTable::<u64>::new(config)),
        Variant::LockfreeOrdered => Box::new(LockFreeOrderedTable::<u64>::new(config)),
        Variant::Adaptive => Box::new(AdaptiveTable::<u64>::new(config)),
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let pct_sum = args.pct_get + args.pct_put + args.pct_add + args.pct_replace + args.pct_remove + args.pct_view;
    assert_eq!(pct_sum, 100, "pct_get + pct_put + pct_add + pct_replace + pct_remove + pct_view must sum to 100, got {}", pct_sum);

    let config = Config::default()
        .with_min_store_size(args.min_store_size)
        .with_adaptive_target(AdaptiveTarget::LockFreeOrdered);
    let table: Arc<Box<dyn Table<u64> + Send + Sync>> = Arc::new(build_table(args.variant, &config));

    let core_ids = if args.pin_cores { core_affinity::get_core_ids() } else { None };
    let samples: Arc<RingBuffer<Sample>> = Arc::new(RingBuffer::new(4096));
    let stop = Arc::new(AtomicU64::new(0));

    log::info!(
        "starting benchmark: variant={:?} threads={} ops_per_thread={} keyspace={}",
        args.variant,
        args.threads,
        args.ops_per_thread,
        args.keyspace
    );

    let reporter = {
        let samples = samples.clone();
        let stop = stop.clone();
        std::thread::spawn(move || {
            let mut totals = OpCounts::default();
            let mut buf = Vec::new();
            loop {
                samples.drain_into(&mut buf);
                for s in buf.drain(..) {
                    log::trace!("thread {} reported {} ops in {:?}", s.thread_id, s.counts.total(), s.elapsed);
                    totals.add_from(&s.counts);
                }
                if stop.load(Ordering::Acquire) == 1 {
                    samples.drain_into(&mut buf);
                    for s in buf.drain(..) {
                        totals.add_from(&s.counts);
                    }
                    break;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            totals
        })
    };

    let wall_start = Instant::now();
    let mut handles = Vec::with_capacity(args.threads);
    for thread_id in 0..args.threads {
        let table = table.clone();
        let args_clone = args.clone();
        let samples = samples.clone();
        let core_ids = core_ids.clone();
        handles.push(std::thread::spawn(move || {
            if let Some(ids) = &core_ids {
                if let Some(id) = ids.get(thread_id % ids.len()) {
                    core_affinity::set_for_current(*id);
                }
            }
            run_worker(&**table, thread_id, &args_clone, &samples);
        }));
    }

    for h in handles {
        h.join().expect("worker thread panicked");
    }
    stop.store(1, Ordering::Release);
    let totals = reporter.join().expect("reporter thread panicked");
    let wall = wall_start.elapsed();

    let total_ops = totals.total();
    let throughput = total_ops as f64 / wall.as_secs_f64();
    println!("wall time:        {:?}", wall);
    println!("total operations: {}", total_ops);
    println!("throughput:       {:.0} ops/sec", throughput);
    println!(
        "breakdown:        get={} put={} add={} replace={} remove={} view={}",
        totals.get, totals.put, totals.add, totals.replace, totals.remove, totals.view
    );
}
