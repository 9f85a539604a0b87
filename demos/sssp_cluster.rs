//! Shortest paths on a synthetic road-like graph, split over an in-memory
//! cluster.
//!
//! ```text
//! cargo run --release --example sssp_cluster -- [hosts] [side] [config.json]
//! ```
//!
//! Threads per host come from `PARSYNC_THREADS` (or the config file). Each
//! host prints its distance histogram contribution and sync traffic as JSON.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use parsync::graph::{GlobalId, GraphPartition, LocalId};
use parsync::net::HostId;
use parsync::sync::{atomic_min_u32, BroadcastField, ReduceField};
use parsync::{
    Accumulator, DirtyBitset, MemoryCluster, Network, PartitionPlan, Runtime, RuntimeConfig, SyncEngine, SyncStats,
};
use serde::Serialize;

struct Node {
    dist: AtomicU32,
}

struct Dist;

impl ReduceField<Node> for Dist {
    type Value = u32;

    fn name(&self) -> &str {
        "dist"
    }

    fn extract(&self, _: LocalId, node: &Node) -> u32 {
        node.dist.load(Ordering::Relaxed)
    }

    fn reduce(&self, _: LocalId, node: &Node, v: u32) -> bool {
        atomic_min_u32(&node.dist, v)
    }

    fn reset(&self, _: LocalId, _: &Node) {}
}

impl BroadcastField<Node> for Dist {
    type Value = u32;

    fn name(&self) -> &str {
        "dist"
    }

    fn extract(&self, _: LocalId, node: &Node) -> u32 {
        node.dist.load(Ordering::Relaxed)
    }

    fn set_val(&self, _: LocalId, node: &Node, v: u32) {
        node.dist.store(v, Ordering::Relaxed);
    }
}

#[derive(Serialize)]
struct HostReport {
    host: HostId,
    masters: usize,
    mirrors: usize,
    rounds: u32,
    reached: usize,
    max_dist: u32,
    processed: usize,
    sync: SyncStats,
}

/// Grid with pseudo-random weights, edges in both directions.
fn grid(side: u64) -> Vec<(GlobalId, GlobalId, u32)> {
    let mut state = 0x2545_f491_4f6c_dd1du64;
    let mut weight = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state % 100) as u32 + 1
    };
    let mut edges = Vec::new();
    for r in 0..side {
        for c in 0..side {
            let u = r * side + c;
            if c + 1 < side {
                edges.push((u, u + 1, weight()));
                edges.push((u + 1, u, weight()));
            }
            if r + 1 < side {
                edges.push((u, u + side, weight()));
                edges.push((u + side, u, weight()));
            }
        }
    }
    edges
}

fn run_host(rt: &Runtime, net: &Arc<Network>, part: &GraphPartition<Node, u32>) -> Result<HostReport> {
    let mut engine = SyncEngine::new(Arc::clone(net), part, rt.config())?;
    let dirty = DirtyBitset::new(part.num_nodes());
    let work = Accumulator::<u64>::new(0);
    let mut wl = rt.obim_worklist(|lid: &LocalId| u64::from(part.node(*lid).dist.load(Ordering::Relaxed)));

    let mut active: Vec<LocalId> = part
        .masters()
        .filter(|&lid| part.node(lid).dist.load(Ordering::Relaxed) == 0)
        .collect();
    let mut rounds = 0;
    let mut processed = 0;
    loop {
        rounds += 1;
        let report = rt.for_each(&wl, active.drain(..), |lid, ctx| {
            let d = part.node(lid).dist.load(Ordering::Relaxed);
            for (v, &w) in part.graph().neighbors(lid) {
                if atomic_min_u32(&part.node(v).dist, d.saturating_add(w)) {
                    dirty.set(v as usize);
                    if part.is_master(v) {
                        ctx.push(v);
                    }
                }
            }
        });
        processed += report.processed();
        wl.retire_empty_buckets();
        rt.on_each(|tid| rt.barrier().wait(tid));

        engine.sync_reduce(part, &Dist, &dirty);
        active = part.masters().filter(|&lid| dirty.test(lid as usize)).collect();
        engine.sync_broadcast(part, &Dist, &dirty);

        work.reset();
        work.add(active.len() as u64);
        if work.reduce(net) == 0 {
            break;
        }
    }

    let dists: Vec<u32> = part
        .masters()
        .map(|lid| part.node(lid).dist.load(Ordering::Relaxed))
        .filter(|&d| d != u32::MAX)
        .collect();
    Ok(HostReport {
        host: part.host(),
        masters: part.num_masters(),
        mirrors: part.num_mirrors(),
        rounds,
        reached: dists.len(),
        max_dist: dists.iter().copied().max().unwrap_or(0),
        processed,
        sync: engine.stats(),
    })
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let hosts: usize = args.first().map_or(Ok(4), |s| s.parse()).context("hosts")?;
    let side: u64 = args.get(1).map_or(Ok(64), |s| s.parse()).context("grid side")?;
    let config = match args.get(2) {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::from_env()?,
    };
    if hosts == 0 || side == 0 {
        bail!("hosts and side must be positive");
    }

    let n = (side * side) as usize;
    let plan = PartitionPlan::blocked(n, hosts, grid(side))?;
    let start = Instant::now();

    let reports: Vec<Result<HostReport>> = thread::scope(|s| {
        let handles: Vec<_> = MemoryCluster::new(hosts)
            .into_iter()
            .enumerate()
            .map(|(host, transport)| {
                let plan = &plan;
                let config = config.clone();
                s.spawn(move || -> Result<HostReport> {
                    let part = plan.partition(host as HostId, |gid| Node {
                        dist: AtomicU32::new(if gid == 0 { 0 } else { u32::MAX }),
                    })?;
                    let net = Arc::new(Network::new(transport, config.trace_network));
                    let rt = Runtime::distributed(config, Arc::clone(&net))?;
                    run_host(&rt, &net, &part)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
            .collect()
    });

    println!("{hosts} hosts, {n} nodes, {:.2?}", start.elapsed());
    for report in reports {
        println!("{}", serde_json::to_string(&report?)?);
    }
    Ok(())
}
