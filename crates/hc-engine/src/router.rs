//! The router: owns the active graph and drives one cycle per callback
//!
//! Access to the graph is a single mutex over `Option<Arc<Graph>>`. The
//! audio thread only ever try-locks it: if a rebuild holds the lock, the
//! cycle is skipped and the callback emits silence rather than blocking.
//! Rebuilds take the lock outright, which is safe because they run on
//! non-real-time threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::{Mutex, RwLock};

use hc_core::{ProcessTimeInfo, Project};

use crate::builder::GraphBuilder;
use crate::graph::Graph;
use crate::scheduler::GraphScheduler;

pub struct Router {
    project: Arc<RwLock<Project>>,
    scheduler: GraphScheduler,
    graph_access: Mutex<Option<Arc<Graph>>>,
    /// Cached copy of the active graph's worst route latency, readable
    /// without touching the graph lock
    max_route_playback_latency: AtomicU32,
    /// Frames of latency preroll not yet consumed by cycles
    remaining_latency_preroll: AtomicU32,
    max_block_size: u32,
}

impl Router {
    pub fn new(project: Arc<RwLock<Project>>) -> Self {
        Self::with_scheduler(project, GraphScheduler::new())
    }

    /// Router with an explicit worker-count override
    pub fn with_workers(project: Arc<RwLock<Project>>, workers: usize) -> Self {
        Self::with_scheduler(project, GraphScheduler::with_workers(workers))
    }

    fn with_scheduler(project: Arc<RwLock<Project>>, scheduler: GraphScheduler) -> Self {
        let max_block_size = project.read().max_block_size as u32;
        Self {
            project,
            scheduler,
            graph_access: Mutex::new(None),
            max_route_playback_latency: AtomicU32::new(0),
            remaining_latency_preroll: AtomicU32::new(0),
            max_block_size,
        }
    }

    /// Rebuild the graph after a project edit.
    ///
    /// `soft` recomputes playback latencies in place on the existing graph
    /// (for plugins whose reported latency changed); anything structural
    /// needs a hard rebuild, which constructs a fresh graph from the
    /// project and swaps it in. A soft request with no graph yet falls back
    /// to a hard build. Blocks until any in-flight cycle has finished.
    pub fn recalc_graph(&self, soft: bool) {
        let mut guard = self.graph_access.lock();

        match (guard.as_ref(), soft) {
            (Some(graph), true) => {
                graph.update_latencies();
                log::debug!(
                    "soft graph rebuild: max route latency {}",
                    graph.max_route_playback_latency()
                );
            }
            _ => {
                let graph = {
                    let project = self.project.read();
                    Arc::new(GraphBuilder::build(&project))
                };
                self.scheduler.start_threads();
                log::debug!("hard graph rebuild: {graph:?}");
                *guard = Some(graph);
            }
        }

        // Latency growth needs a fresh preroll so compensated routes do not
        // read ahead of material that was never rendered
        if let Some(graph) = guard.as_ref() {
            let new_max = graph.max_route_playback_latency();
            let old_max = self.max_route_playback_latency.swap(new_max, Ordering::AcqRel);
            if new_max > old_max {
                self.remaining_latency_preroll.store(new_max, Ordering::Release);
            }
        }
    }

    /// Process one cycle on the audio thread.
    ///
    /// Returns `false` without processing when no graph exists yet or a
    /// rebuild currently holds the graph; the caller should output silence
    /// for this callback.
    pub fn start_cycle(&self, time: ProcessTimeInfo) -> bool {
        debug_assert!(
            time.local_offset + time.nframes <= self.max_block_size,
            "cycle window {}+{} exceeds the engine block size {}",
            time.local_offset,
            time.nframes,
            self.max_block_size
        );
        let mut time = time;
        time.nframes = time
            .nframes
            .min(self.max_block_size.saturating_sub(time.local_offset));

        let Some(guard) = self.graph_access.try_lock() else {
            log::trace!("graph locked by a rebuild, skipping cycle");
            return false;
        };
        let Some(graph) = guard.as_ref() else {
            return false;
        };

        let preroll = self.remaining_latency_preroll.load(Ordering::Acquire);
        self.scheduler.run_cycle(graph, time, preroll);
        self.remaining_latency_preroll
            .store(preroll.saturating_sub(time.nframes), Ordering::Release);
        true
    }

    pub fn max_route_playback_latency(&self) -> u32 {
        self.max_route_playback_latency.load(Ordering::Acquire)
    }

    pub fn remaining_latency_preroll(&self) -> u32 {
        self.remaining_latency_preroll.load(Ordering::Acquire)
    }

    /// Re-arm the preroll to the full compensation depth, as at transport
    /// start: the first cycles after this render compensated routes without
    /// reading ahead of the playhead.
    pub fn reset_latency_preroll(&self) {
        self.remaining_latency_preroll
            .store(self.max_route_playback_latency(), Ordering::Release);
    }

    /// How far compensated routes currently read ahead of the playhead
    pub fn global_offset(&self) -> u32 {
        self.max_route_playback_latency()
            .saturating_sub(self.remaining_latency_preroll())
    }

    /// Snapshot of the active graph, or `None` before the first rebuild.
    /// Blocks on the graph lock; not for the audio thread.
    pub fn graph(&self) -> Option<Arc<Graph>> {
        self.graph_access.lock().clone()
    }

    pub fn project(&self) -> &Arc<RwLock<Project>> {
        &self.project
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("max_route_playback_latency", &self.max_route_playback_latency())
            .field("remaining_latency_preroll", &self.remaining_latency_preroll())
            .field("max_block_size", &self.max_block_size)
            .finish()
    }
}
