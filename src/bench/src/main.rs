use cluster::{CounterManager, HttpTransport, PushPolicy, ReplicaRegistry};
use storage::{CounterStore, Storage, StorageConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

const NUM_VIEWS: usize = 500_000;
const NUM_CONTENTS: u64 = 10_000;
const REPLICA_ID: &str = "bench_replica";

fn report(label: &str, ops: usize, elapsed: Duration) {
    let ops_per_sec = ops as f64 / elapsed.as_secs_f64();
    println!("  {} {} in {:?}", ops, label, elapsed);
    println!("  {:.0} ops/sec", ops_per_sec);
}

async fn benchmark_sequential_views(manager: &CounterManager, name: &str) {
    println!("\n=== Sequential Views ({}) ===", name);

    let mut rng = StdRng::seed_from_u64(7);
    let start = Instant::now();

    for _ in 0..NUM_VIEWS {
        let content_id = rng.gen_range(0..NUM_CONTENTS);
        if let Err(e) = manager.record_view(content_id).await {
            eprintln!("  view failed: {}", e);
            return;
        }
    }

    report("views", NUM_VIEWS, start.elapsed());
}

/// Every task hammers the same content id; the final count must equal the
/// number of views issued.
async fn benchmark_hot_content(manager: Arc<CounterManager>, num_tasks: usize, content_id: u64, name: &str) {
    println!("\n=== Hot Content ({} tasks) ({}) ===", num_tasks, name);

    let views_per_task = NUM_VIEWS / num_tasks;
    let barrier = Arc::new(Barrier::new(num_tasks + 1));
    let mut handles = Vec::new();

    for _ in 0..num_tasks {
        let manager = Arc::clone(&manager);
        let barrier = Arc::clone(&barrier);

        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            let mut failures = 0usize;
            for _ in 0..views_per_task {
                if manager.record_view(content_id).await.is_err() {
                    failures += 1;
                }
            }
            failures
        }));
    }

    let start = Instant::now();
    barrier.wait().await;

    let mut failures = 0;
    for handle in handles {
        failures += handle.await.unwrap_or(views_per_task);
    }
    let elapsed = start.elapsed();

    let expected = (views_per_task * num_tasks - failures) as u64;
    let counted = manager.get_total(content_id).await.unwrap_or(0);
    report("views", views_per_task * num_tasks, elapsed);
    if counted == expected {
        println!("  no lost updates ({} counted)", counted);
    } else {
        println!("  LOST UPDATES: expected {}, counted {}", expected, counted);
    }
}

async fn benchmark_concurrent_views(manager: Arc<CounterManager>, num_tasks: usize, name: &str) {
    println!("\n=== Concurrent Views ({} tasks) ({}) ===", num_tasks, name);

    let views_per_task = NUM_VIEWS / num_tasks;
    let barrier = Arc::new(Barrier::new(num_tasks + 1));
    let mut handles = Vec::new();

    for task_id in 0..num_tasks {
        let manager = Arc::clone(&manager);
        let barrier = Arc::clone(&barrier);

        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            let mut rng = StdRng::seed_from_u64(task_id as u64);

            for _ in 0..views_per_task {
                let _ = manager.record_view(rng.gen_range(0..NUM_CONTENTS)).await;
            }
        }));
    }

    let start = Instant::now();
    barrier.wait().await;

    for handle in handles {
        let _ = handle.await;
    }

    report("views", views_per_task * num_tasks, start.elapsed());
}

async fn benchmark_merges(manager: &CounterManager, name: &str) {
    println!("\n=== Inbound Merges ({}) ===", name);

    let mut rng = StdRng::seed_from_u64(11);
    let start = Instant::now();
    let mut applied = 0usize;

    for i in 0..NUM_VIEWS {
        let content_id = rng.gen_range(0..NUM_CONTENTS);
        // mostly increasing counts with some stale redeliveries
        let count = (i as u64) / 4 + rng.gen_range(0..3);
        if let Ok(true) = manager.merge(content_id, "peer_replica", count).await {
            applied += 1;
        }
    }

    report("merges", NUM_VIEWS, start.elapsed());
    println!("  {} applied, {} stale", applied, NUM_VIEWS - applied);
}

async fn benchmark_mixed_workload(manager: Arc<CounterManager>, num_tasks: usize, name: &str) {
    println!("\n=== Mixed Workload (80% reads, 20% views) ({} tasks) ({}) ===", num_tasks, name);

    let ops_per_task = NUM_VIEWS / num_tasks;
    let barrier = Arc::new(Barrier::new(num_tasks + 1));
    let mut handles = Vec::new();

    for task_id in 0..num_tasks {
        let manager = Arc::clone(&manager);
        let barrier = Arc::clone(&barrier);

        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            let mut rng = StdRng::seed_from_u64(task_id as u64);

            for _ in 0..ops_per_task {
                let content_id = rng.gen_range(0..NUM_CONTENTS);
                if rng.gen_ratio(1, 5) {
                    // 20% views
                    let _ = manager.record_view(content_id).await;
                } else {
                    // 80% reads
                    let _ = manager.get_total(content_id).await;
                }
            }
        }));
    }

    let start = Instant::now();
    barrier.wait().await;

    for handle in handles {
        let _ = handle.await;
    }

    report("ops", ops_per_task * num_tasks, start.elapsed());
}

async fn run_benchmarks(store: Arc<dyn CounterStore>, transport: Arc<HttpTransport>, name: &str) {
    println!("\n######################################");
    println!("# Benchmarking: {}", name);
    println!("######################################");

    // No peers: measures the local write path only
    let registry = ReplicaRegistry::new::<&str>(REPLICA_ID, &[], None);
    let manager = Arc::new(CounterManager::new(registry, store, transport, PushPolicy::default()));

    benchmark_sequential_views(&manager, name).await;

    for (i, num_tasks) in [10, 100, 1000].into_iter().enumerate() {
        benchmark_hot_content(Arc::clone(&manager), num_tasks, NUM_CONTENTS + i as u64, name).await;
        benchmark_concurrent_views(Arc::clone(&manager), num_tasks, name).await;
    }

    benchmark_merges(&manager, name).await;
    benchmark_mixed_workload(Arc::clone(&manager), 1000, name).await;
}

#[tokio::main]
async fn main() {
    println!("TALLY Counter Benchmark");
    println!("=======================");
    println!("Views: {}", NUM_VIEWS);
    println!("Content ids: {}", NUM_CONTENTS);

    let transport = match HttpTransport::new(Duration::from_millis(2000)) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            eprintln!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    let memory_store = Arc::new(Storage::new());
    run_benchmarks(memory_store, transport.clone(), "In-memory").await;

    let wal_path = std::env::temp_dir().join(format!("tally-bench-{}.wal", std::process::id()));
    match Storage::open(StorageConfig::with_wal(&wal_path)).await {
        Ok(store) => {
            run_benchmarks(Arc::new(store), transport, "WAL").await;
        }
        Err(e) => eprintln!("\nSkipping WAL benchmarks: {}", e),
    }
    let _ = std::fs::remove_file(&wal_path);

    println!("\n######################################");
    println!("# Benchmark Complete");
    println!("######################################");
}
