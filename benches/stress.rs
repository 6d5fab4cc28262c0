use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use seatd::catalog::Catalog;
use seatd::engine::{Engine, RetryPolicy};
use seatd::model::*;
use seatd::store::{AllocationStore, InMemoryStore, WalStore};

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    let max = latencies[latencies.len() - 1];
    println!("  {label}:");
    println!(
        "    n={}, avg={:.3}ms, p50={:.3}ms, p95={:.3}ms, p99={:.3}ms, max={:.3}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        max.as_secs_f64() * 1000.0,
    );
}

/// `n` tables with capacities cycling 2, 4, 6, 8.
fn dining_room(n: usize) -> Arc<Catalog> {
    let tables = (0..n)
        .map(|i| Resource::new(format!("T{i:03}"), 2 + 2 * (i as u32 % 4)))
        .collect();
    Arc::new(Catalog::new(tables).expect("valid bench catalog"))
}

#[derive(Default)]
struct Tally {
    reserved: usize,
    no_capacity: usize,
    contention: usize,
    rejected: usize,
}

impl Tally {
    fn add(&mut self, outcome: &AllocationOutcome) {
        match outcome {
            AllocationOutcome::Allocated(_) => self.reserved += 1,
            AllocationOutcome::Failed(AllocationFailure::NoCapacity) => self.no_capacity += 1,
            AllocationOutcome::Failed(AllocationFailure::Contention) => self.contention += 1,
            AllocationOutcome::Failed(AllocationFailure::Rejected(_)) => self.rejected += 1,
        }
    }

    fn print(&self) {
        println!(
            "  outcomes: reserved={} no_capacity={} contention={} rejected={}",
            self.reserved, self.no_capacity, self.contention, self.rejected
        );
    }
}

async fn phase1_sequential(store: Arc<dyn AllocationStore>) {
    let engine = Engine::new(dining_room(64), store);
    let mut latencies = Vec::new();
    let mut tally = Tally::default();
    let start = Instant::now();

    for slot in 0..24 {
        for i in 0..64u32 {
            let t = Instant::now();
            let outcome = engine
                .make_allocation(AllocationRequest::new(slot, 1 + i % 8))
                .await
                .expect("store fault");
            latencies.push(t.elapsed());
            tally.add(&outcome);
        }
    }

    let elapsed = start.elapsed();
    let ops = latencies.len() as f64 / elapsed.as_secs_f64();
    println!(
        "  {} requests in {:.2}s = {ops:.0} ops/sec",
        latencies.len(),
        elapsed.as_secs_f64()
    );
    tally.print();
    print_latency("allocation latency", &mut latencies);
}

/// Many tasks hammer one slot so commits collide.
async fn phase2_contended(store: Arc<dyn AllocationStore>, retry: RetryPolicy) {
    let catalog = dining_room(16);
    let engine = Arc::new(Engine::with_retry(catalog.clone(), store, retry));
    let n_tasks = 64;
    let per_task = 4;

    let start = Instant::now();
    let mut handles = Vec::new();
    for task in 0..n_tasks {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let mut samples = Vec::with_capacity(per_task);
            for j in 0..per_task {
                let size = 1 + ((task + j) as u32 % 6);
                let t = Instant::now();
                let outcome = engine
                    .make_allocation(AllocationRequest::new(12, size))
                    .await
                    .expect("store fault");
                samples.push((t.elapsed(), outcome));
            }
            samples
        }));
    }

    let mut latencies = Vec::new();
    let mut tally = Tally::default();
    for h in handles {
        for (latency, outcome) in h.await.expect("bench task panicked") {
            latencies.push(latency);
            tally.add(&outcome);
        }
    }
    let elapsed = start.elapsed();

    let held = engine.list_all_allocations().await.expect("store fault");
    let keys: HashSet<_> = held.iter().map(|r| r.resource_id.as_str()).collect();
    assert_eq!(keys.len(), held.len(), "double booking under contention");
    assert_eq!(held.len(), tally.reserved);

    println!(
        "  {} tasks x {per_task} requests on one slot ({} tables) in {:.2}s, {} attempts max",
        n_tasks,
        catalog.len(),
        elapsed.as_secs_f64(),
        retry.max_attempts
    );
    tally.print();
    print_latency("contended allocation latency", &mut latencies);
}

async fn phase3_churn(store: Arc<dyn AllocationStore>) {
    let engine = Arc::new(Engine::new(dining_room(8), store));
    let n_tasks = 16;
    let rounds = 200;

    let start = Instant::now();
    let mut handles = Vec::new();
    for task in 0..n_tasks {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let mut cancels = 0usize;
            for round in 0..rounds {
                let slot = (task + round) as Slot % 24;
                let outcome = engine
                    .make_allocation(AllocationRequest::new(slot, 2))
                    .await
                    .expect("store fault");
                if let AllocationOutcome::Allocated(record) = outcome {
                    if engine.cancel(record.id).await.expect("store fault") {
                        cancels += 1;
                    }
                }
            }
            cancels
        }));
    }

    let mut cancels = 0;
    for h in handles {
        cancels += h.await.expect("bench task panicked");
    }
    let elapsed = start.elapsed();
    let ops = (n_tasks * rounds + cancels) as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {rounds} reserve+cancel rounds, {cancels} cancels in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

fn bench_wal_path(phase: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("seatd_bench");
    std::fs::create_dir_all(&dir).expect("create bench dir");
    let path = dir.join(format!("{phase}.wal"));
    let _ = std::fs::remove_file(&path);
    path
}

fn wal_store(phase: &str) -> Arc<dyn AllocationStore> {
    Arc::new(WalStore::open(&bench_wal_path(phase)).expect("open bench WAL"))
}

#[tokio::main]
async fn main() {
    let backoff_ms: u64 = std::env::var("SEATD_BENCH_BACKOFF_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let retry = RetryPolicy::new(3, Duration::from_millis(backoff_ms));

    println!("=== seatd allocation benchmark ===\n");

    println!("[phase 1] sequential allocation (memory)");
    phase1_sequential(Arc::new(InMemoryStore::new())).await;

    println!("\n[phase 1] sequential allocation (wal)");
    phase1_sequential(wal_store("sequential")).await;

    println!("\n[phase 2] contended allocation (memory)");
    phase2_contended(Arc::new(InMemoryStore::new()), retry).await;

    println!("\n[phase 2] contended allocation (wal)");
    phase2_contended(wal_store("contended"), retry).await;

    println!("\n[phase 3] reserve/cancel churn (wal)");
    phase3_churn(wal_store("churn")).await;

    println!("\n=== benchmark complete ===");
}
