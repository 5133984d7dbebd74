//! Persistent scan example.
//!
//! Builds one scan schedule per process and starts it every iteration, the way
//! an iterative solver would accumulate per-rank offsets.
//!
//! Run with: cargo run --example persistent_scan

use std::time::Instant;

use ferroscan::local::Fabric;
use ferroscan::{NodeMap, Operator, ReduceOp, Result};
use tracing_subscriber::EnvFilter;

const ITERATIONS: usize = 100;
const LEN: usize = 1000;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let fabric = Fabric::with_nodes(NodeMap::uniform(2, 4)?);

    let outcomes = fabric.run(|world, engine| -> Result<f64> {
        let rank = world.rank();
        let op: Operator<f64> = ReduceOp::Sum.into();

        let mut scan = world.scan_init(LEN, &op)?;
        let start = Instant::now();
        let mut recv = vec![0.0; LEN];
        for iter in 0..ITERATIONS {
            let send: Vec<f64> = (0..LEN).map(|i| (iter * LEN + i) as f64 + rank as f64).collect();
            scan.start(&engine, &send, recv)?;
            recv = scan.wait()?;

            // Sum over ranks 0..=rank of (base + r)
            let base = (iter * LEN) as f64;
            let expected = (rank + 1) as f64 * base + (rank * (rank + 1) / 2) as f64;
            assert!((recv[0] - expected).abs() < 1e-6, "Rank {rank} iteration {iter}");
        }
        Ok(start.elapsed().as_secs_f64())
    })?;

    for (rank, elapsed) in outcomes.into_iter().enumerate() {
        let elapsed = elapsed?;
        println!(
            "Rank {rank}: {ITERATIONS} scans of {LEN} elements in {elapsed:.3}s ({:.1} us/scan)",
            elapsed * 1e6 / ITERATIONS as f64
        );
    }
    Ok(())
}
