//! The runtime context.
//!
//! A [`Runtime`] owns everything that would otherwise be process-wide: the
//! configuration, the thread topology, the barrier, and (for multi-host runs)
//! the network. Independent runtimes can coexist in one process, which is how
//! the tests simulate a cluster.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::Backoff;
use serde::Serialize;

use crate::barrier::Barrier;
use crate::config::{RuntimeConfig, MAX_THREADS};
use crate::error::{Error, Result};
use crate::net::{HostId, Network, Transport};
use crate::topology::Topology;
use crate::worklist::{ChunkedWorklist, Indexer, LocalQueue, OrderedByIntegerMetric, Worklist};

/// Per-host execution context.
#[derive(Debug)]
pub struct Runtime {
    config: RuntimeConfig,
    topology: Topology,
    barrier: Barrier,
    network: Option<Arc<Network>>,
}

impl Runtime {
    /// Single-host runtime.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        let topology = Topology::for_config(&config)?;
        let barrier = Barrier::local(config.barrier, &topology, config.threads);
        log_debug!(
            "runtime: {} threads on {} packages",
            config.threads,
            topology.packages_for(config.threads)
        );
        Ok(Self {
            config,
            topology,
            barrier,
            network: None,
        })
    }

    /// Runtime for one host of a multi-host run over `network`.
    pub fn distributed(config: RuntimeConfig, network: Arc<Network>) -> Result<Self> {
        config.validate()?;
        let topology = Topology::for_config(&config)?;
        let barrier = Barrier::distributed(config.barrier, &topology, config.threads, Arc::clone(&network))?;
        log_debug!(
            "runtime: host {}/{} with {} threads",
            network.host_id(),
            network.num_hosts(),
            config.threads
        );
        Ok(Self {
            config,
            topology,
            barrier,
            network: Some(network),
        })
    }

    /// Like [`distributed`](Self::distributed), wrapping `transport` in a
    /// [`Network`] that traces according to the configuration.
    pub fn with_transport(config: RuntimeConfig, transport: impl Transport + 'static) -> Result<Self> {
        let network = Arc::new(Network::new(transport, config.trace_network));
        Self::distributed(config, network)
    }

    /// Active configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Active threads.
    pub fn threads(&self) -> usize {
        self.config.threads
    }

    /// Thread placement.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// The barrier for this runtime's threads (and hosts, if distributed).
    pub fn barrier(&self) -> &Barrier {
        &self.barrier
    }

    /// Network, for multi-host runtimes.
    pub fn network(&self) -> Option<&Arc<Network>> {
        self.network.as_ref()
    }

    /// This host's id; 0 for single-host runtimes.
    pub fn host_id(&self) -> HostId {
        self.network.as_ref().map_or(0, |n| n.host_id())
    }

    /// Hosts in the run; 1 for single-host runtimes.
    pub fn num_hosts(&self) -> usize {
        self.network.as_ref().map_or(1, |n| n.num_hosts())
    }

    /// Changes the number of active threads and rebuilds the barrier.
    ///
    /// Worklists created earlier keep their old thread count.
    pub fn set_active_threads(&mut self, threads: usize) -> Result<()> {
        if threads == 0 || threads > MAX_THREADS || threads > self.topology.max_threads() {
            return Err(Error::InvalidConfig(format!(
                "cannot run {threads} threads (topology places {})",
                self.topology.max_threads()
            )));
        }
        self.barrier.reinit(threads);
        self.config.threads = threads;
        Ok(())
    }

    /// Chunked worklist sized for this runtime.
    pub fn chunked_worklist<T: Send>(&self) -> ChunkedWorklist<T> {
        ChunkedWorklist::with_config(&self.config)
    }

    /// Bucketed worklist sized for this runtime.
    pub fn obim_worklist<T: Send, I: Indexer<T>>(&self, indexer: I) -> OrderedByIntegerMetric<T, I> {
        OrderedByIntegerMetric::with_config(&self.config, indexer)
    }

    /// Runs `f(tid)` once on each active thread and collects the results in
    /// thread order. Thread 0 is the calling thread.
    pub fn on_each<R, F>(&self, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize) -> R + Sync,
    {
        let threads = self.config.threads;
        std::thread::scope(|scope| {
            let f = &f;
            let handles: Vec<_> = (1..threads).map(|tid| scope.spawn(move || f(tid))).collect();
            let mut out = Vec::with_capacity(threads);
            out.push(f(0));
            for h in handles {
                out.push(h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)));
            }
            out
        })
    }

    /// Seeds `worklist` with `initial` and runs `op` on every item until no
    /// thread has work left, including items `op` pushes.
    ///
    /// An operator that calls [`UserContext::break_loop`] ends the loop early:
    /// calls already running finish, no new item is started, and whatever is
    /// still queued is dropped so the worklist is empty on return.
    pub fn for_each<T, W, F, I>(&self, worklist: &W, initial: I, op: F) -> LoopReport
    where
        T: Send,
        W: Worklist<T>,
        F: Fn(T, &mut UserContext<'_, T>) + Sync,
        I: IntoIterator<Item = T>,
    {
        let initial: Vec<T> = initial.into_iter().collect();
        let pending = AtomicUsize::new(initial.len());
        let stop = AtomicBool::new(false);
        worklist.push_initial(initial);

        let per_thread = self.on_each(|tid| {
            let mut queue = worklist.local(tid);
            let mut report = ThreadReport::default();
            let backoff = Backoff::new();
            loop {
                if stop.load(Ordering::Acquire) {
                    while queue.pop().is_some() {
                        report.discarded += 1;
                    }
                    break;
                }
                match queue.pop() {
                    Some(item) => {
                        let mut ctx = UserContext {
                            tid,
                            queue: &mut queue,
                            pending: &pending,
                            stop: &stop,
                            pushed: 0,
                        };
                        op(item, &mut ctx);
                        report.pushed += ctx.pushed;
                        report.processed += 1;
                        pending.fetch_sub(1, Ordering::AcqRel);
                        backoff.reset();
                    }
                    None if pending.load(Ordering::Acquire) == 0 => break,
                    None => backoff.snooze(),
                }
            }
            report
        });
        let report = LoopReport {
            per_thread,
            broke: stop.into_inner(),
        };
        if report.broke {
            log_debug!(
                "loop broken after {} items, {} dropped",
                report.processed(),
                report.discarded()
            );
        } else {
            log_debug!("loop finished: {} items", report.processed());
        }
        report
    }
}

/// What an operator can do besides reading its item.
pub struct UserContext<'a, T> {
    tid: usize,
    queue: &'a mut dyn LocalQueue<T>,
    pending: &'a AtomicUsize,
    stop: &'a AtomicBool,
    pushed: usize,
}

impl<T> UserContext<'_, T> {
    /// Thread running the operator.
    pub fn tid(&self) -> usize {
        self.tid
    }

    /// Schedules `item` in the same loop.
    pub fn push(&mut self, item: T) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.queue.push(item);
        self.pushed += 1;
    }

    /// Ends the loop on every thread once the running operator calls return.
    pub fn break_loop(&self) {
        if !self.stop.swap(true, Ordering::AcqRel) {
            log_trace!("thread {} broke the loop", self.tid);
        }
    }
}

/// Per-thread counters of one `for_each`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThreadReport {
    /// Items this thread ran the operator on.
    pub processed: usize,
    /// Items this thread's operator calls pushed.
    pub pushed: usize,
    /// Items this thread dropped after the loop was broken.
    pub discarded: usize,
}

/// Outcome of one `for_each`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopReport {
    /// Indexed by thread id.
    pub per_thread: Vec<ThreadReport>,
    /// Whether an operator ended the loop early.
    pub broke: bool,
}

impl LoopReport {
    /// Items processed by all threads.
    pub fn processed(&self) -> usize {
        self.per_thread.iter().map(|t| t.processed).sum()
    }

    /// Items pushed by operators.
    pub fn pushed(&self) -> usize {
        self.per_thread.iter().map(|t| t.pushed).sum()
    }

    /// Items dropped unprocessed because the loop was broken.
    pub fn discarded(&self) -> usize {
        self.per_thread.iter().map(|t| t.discarded).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worklist::Discipline;

    fn config(threads: usize) -> RuntimeConfig {
        RuntimeConfig {
            packages: Some(vec![threads]),
            ..RuntimeConfig::with_threads(threads)
        }
    }

    #[test]
    fn on_each_runs_every_tid_once() {
        let rt = Runtime::new(config(4)).unwrap();
        assert_eq!(rt.on_each(|tid| tid * 10), vec![0, 10, 20, 30]);
        assert_eq!(rt.num_hosts(), 1);
        assert_eq!(rt.host_id(), 0);
    }

    #[test]
    fn for_each_runs_pushed_work() {
        let rt = Runtime::new(config(3)).unwrap();
        let wl = ChunkedWorklist::new(3, 2, Discipline::Lifo);
        let sum = AtomicUsize::new(0);
        // every n > 0 pushes n - 1
        let report = rt.for_each(&wl, [5usize, 3], |n, ctx| {
            sum.fetch_add(n, Ordering::Relaxed);
            if n > 0 {
                ctx.push(n - 1);
            }
        });
        assert_eq!(report.processed(), 6 + 4);
        assert_eq!(report.pushed(), 5 + 3);
        assert_eq!(sum.load(Ordering::Relaxed), 15 + 6);
        assert!(wl.is_empty());
        assert!(!report.broke);
    }

    #[test]
    fn break_loop_stops_every_thread() {
        let rt = Runtime::new(config(4)).unwrap();
        let wl = ChunkedWorklist::new(4, 8, Discipline::Fifo);
        let found = AtomicBool::new(false);
        // each item spawns two more until someone finds the target
        let report = rt.for_each(&wl, 0..16u64, |n, ctx| {
            if n == 1_000 {
                found.store(true, Ordering::Relaxed);
                ctx.break_loop();
                return;
            }
            if n < 100_000 {
                ctx.push(2 * n + 1);
                ctx.push(2 * n + 2);
            }
        });
        assert!(report.broke);
        assert!(found.load(Ordering::Relaxed));
        assert_eq!(report.processed() + report.discarded(), report.pushed() + 16);
        assert!(report.discarded() > 0);
        assert!(wl.is_empty());

        // the same worklist runs a fresh loop to completion afterwards
        let again = rt.for_each(&wl, [3u64], |n, ctx| {
            if n > 0 {
                ctx.push(n - 1);
            }
        });
        assert!(!again.broke);
        assert_eq!(again.processed(), 4);
    }

    #[test]
    fn set_active_threads_rebuilds_the_barrier() {
        let mut rt = Runtime::new(config(4)).unwrap();
        rt.set_active_threads(2).unwrap();
        assert_eq!(rt.barrier().threads(), 2);
        let hits = rt.on_each(|tid| {
            rt.barrier().wait(tid);
            tid
        });
        assert_eq!(hits, vec![0, 1]);
        assert!(rt.set_active_threads(0).is_err());
        assert!(rt.set_active_threads(5).is_err());
    }
}
