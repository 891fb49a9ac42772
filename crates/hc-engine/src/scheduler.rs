//! Multi-threaded cycle execution
//!
//! A pool of worker threads drains a ready queue of graph nodes. A node
//! enters the queue only when every one of its producers has completed, so
//! workers never need edge-level locking: completing a node decrements each
//! consumer's refcount and the worker that brings a count to zero enqueues
//! that consumer. The cycle is over when every node has completed, which
//! the last worker signals through a condvar.
//!
//! Work items carry their own `Arc<Graph>`, so a hard rebuild can swap the
//! router's graph without invalidating anything already queued.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::{Condvar, Mutex};

use hc_core::ProcessTimeInfo;

use crate::graph::Graph;
use crate::node::NodeKey;

/// Upper bound on worker threads; beyond this the scheduling overhead
/// outweighs the parallelism for audio-sized graphs
const MAX_WORKERS: usize = 16;

enum WorkItem {
    Node {
        graph: Arc<Graph>,
        key: NodeKey,
        time: ProcessTimeInfo,
        preroll: u32,
    },
    Terminate,
}

/// End-of-cycle rendezvous between the workers and `run_cycle`
struct CycleState {
    /// Nodes not yet completed in the current cycle
    remaining: AtomicU32,
    done: Mutex<bool>,
    cvar: Condvar,
}

impl CycleState {
    fn new() -> Self {
        Self {
            remaining: AtomicU32::new(0),
            done: Mutex::new(true),
            cvar: Condvar::new(),
        }
    }
}

pub struct GraphScheduler {
    sender: Sender<WorkItem>,
    receiver: Receiver<WorkItem>,
    state: Arc<CycleState>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    num_workers: usize,
}

impl GraphScheduler {
    /// Pool sized from hardware concurrency, leaving one core for the
    /// audio callback thread
    pub fn new() -> Self {
        Self::with_workers(num_cpus::get().saturating_sub(1))
    }

    pub fn with_workers(workers: usize) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            state: Arc::new(CycleState::new()),
            handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            num_workers: workers.clamp(1, MAX_WORKERS),
        }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Spawn the worker pool. Idempotent; called on the first graph build
    /// rather than at construction so an engine that never routes anything
    /// never pays for threads.
    pub fn start_threads(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut handles = self.handles.lock();
        for i in 0..self.num_workers {
            let receiver = self.receiver.clone();
            let sender = self.sender.clone();
            let state = self.state.clone();
            let handle = std::thread::Builder::new()
                .name(format!("hc-graph-worker-{i}"))
                .spawn(move || worker_loop(&receiver, &sender, &state));
            match handle {
                Ok(h) => handles.push(h),
                Err(e) => log::error!("failed to spawn graph worker {i}: {e}"),
            }
        }
        log::info!("started {} graph workers", handles.len());
    }

    /// Run one full cycle over `graph` and block until every node has
    /// completed.
    ///
    /// The timing nodes are processed synchronously here, before any worker
    /// sees the cycle, so tempo and time-signature caches are consistent for
    /// the whole graph. They are then credited as completed (releasing any
    /// consumers) and the remaining trigger nodes are handed to the pool.
    pub fn run_cycle(&self, graph: &Arc<Graph>, time: ProcessTimeInfo, preroll: u32) {
        let total = graph.num_nodes() as u32;
        if total == 0 {
            return;
        }

        graph.reset_refcounts();
        self.state.remaining.store(total, Ordering::Release);
        *self.state.done.lock() = false;

        for key in graph.timing_nodes() {
            graph.node(key).process(time, preroll);
            complete_node(&self.sender, &self.state, graph, key, time, preroll);
        }

        for &key in &graph.trigger_nodes {
            let item = WorkItem::Node {
                graph: graph.clone(),
                key,
                time,
                preroll,
            };
            if self.sender.send(item).is_err() {
                log::error!("graph work queue disconnected");
                return;
            }
        }

        let mut done = self.state.done.lock();
        while !*done {
            self.state.cvar.wait(&mut done);
        }
    }
}

impl Default for GraphScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for GraphScheduler {
    fn drop(&mut self) {
        let mut handles = self.handles.lock();
        for _ in handles.iter() {
            let _ = self.sender.send(WorkItem::Terminate);
        }
        for handle in handles.drain(..) {
            if handle.join().is_err() {
                log::error!("graph worker exited by panic");
            }
        }
    }
}

fn worker_loop(receiver: &Receiver<WorkItem>, sender: &Sender<WorkItem>, state: &Arc<CycleState>) {
    while let Ok(item) = receiver.recv() {
        match item {
            WorkItem::Terminate => break,
            WorkItem::Node {
                graph,
                key,
                time,
                preroll,
            } => {
                let node = graph.node(key);
                // A panicking owner must not take the cycle down with it;
                // its output stays whatever the port clear left behind.
                let result =
                    panic::catch_unwind(AssertUnwindSafe(|| node.process(time, preroll)));
                if result.is_err() {
                    log::error!("node '{}' panicked during processing", node.owner.name());
                    node.owner.clear_outputs(&time);
                }
                complete_node(sender, state, &graph, key, time, preroll);
            }
        }
    }
}

/// Mark `key` completed: release consumers whose last producer this was,
/// and signal the cycle's end when it was the last node overall.
fn complete_node(
    sender: &Sender<WorkItem>,
    state: &CycleState,
    graph: &Arc<Graph>,
    key: NodeKey,
    time: ProcessTimeInfo,
    preroll: u32,
) {
    for &child in &graph.node(key).childnodes {
        if graph.node(child).refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            let item = WorkItem::Node {
                graph: graph.clone(),
                key: child,
                time,
                preroll,
            };
            if sender.send(item).is_err() {
                log::error!("graph work queue disconnected");
            }
        }
    }

    if state.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
        *state.done.lock() = true;
        state.cvar.notify_all();
    }
}
