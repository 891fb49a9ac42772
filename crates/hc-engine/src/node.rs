//! Graph nodes: one schedulable unit of audio/MIDI work per cycle

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use smallvec::SmallVec;

use hc_core::{
    FaderRef, PluginSlot, PortRef, ProcessTimeInfo, ProcessorRef, SendRef, StereoPorts, TempoMap,
};

/// Index of a node in the graph arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(pub usize);

impl NodeKey {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// The owner a node delegates its processing to.
///
/// A closed set: every schedulable thing in the project maps to exactly one
/// of these. The three timing variants share the tempo map and exist so
/// tempo/time-signature state is refreshed before any other node runs.
#[derive(Clone)]
pub enum NodeOwner {
    Port(PortRef),
    Plugin(Arc<PluginSlot>),
    Fader(FaderRef),
    Send(SendRef),
    TrackProcessor(ProcessorRef),
    Tempo(Arc<TempoMap>),
    BeatsPerBar(Arc<TempoMap>),
    BeatUnit(Arc<TempoMap>),
}

impl NodeOwner {
    /// Run the owner's processing for one cycle window
    pub fn process(&self, time: &ProcessTimeInfo) {
        match self {
            Self::Port(port) => port.write().process(time),
            Self::Plugin(slot) => slot.process(time),
            Self::Fader(fader) => fader.read().process(time),
            Self::Send(send) => send.read().process(time),
            Self::TrackProcessor(proc) => proc.read().process(time),
            Self::Tempo(map) => map.refresh_tempo(),
            Self::BeatsPerBar(map) => map.refresh_beats_per_bar(),
            Self::BeatUnit(map) => map.refresh_beat_unit(),
        }
    }

    /// Silence the owner's output buffers for the cycle window. Used when
    /// processing fails, so consumers sum zeros instead of stale data.
    pub fn clear_outputs(&self, time: &ProcessTimeInfo) {
        let clear_stereo = |outs: &StereoPorts| {
            outs.l.write().clear_range(time);
            outs.r.write().clear_range(time);
        };
        match self {
            Self::Port(port) => port.write().clear_range(time),
            Self::Plugin(slot) => clear_stereo(&slot.outs),
            Self::Fader(fader) => clear_stereo(&fader.read().outs),
            Self::Send(send) => clear_stereo(&send.read().outs),
            Self::TrackProcessor(proc) => clear_stereo(&proc.read().outs),
            Self::Tempo(_) | Self::BeatsPerBar(_) | Self::BeatUnit(_) => {}
        }
    }

    /// Latency in frames this owner alone introduces
    pub fn single_playback_latency(&self) -> u32 {
        match self {
            Self::Plugin(slot) => slot.latency(),
            _ => 0,
        }
    }

    /// Human readable label, for logs and graph dumps
    pub fn name(&self) -> String {
        match self {
            Self::Port(port) => format!("port: {}", port.read().name()),
            Self::Plugin(slot) => format!("plugin: {}", slot.name()),
            Self::Fader(_) => "fader".to_string(),
            Self::Send(_) => "send".to_string(),
            Self::TrackProcessor(_) => "track processor".to_string(),
            Self::Tempo(_) => "tempo".to_string(),
            Self::BeatsPerBar(_) => "beats per bar".to_string(),
            Self::BeatUnit(_) => "beat unit".to_string(),
        }
    }

    pub fn is_timing(&self) -> bool {
        matches!(self, Self::Tempo(_) | Self::BeatsPerBar(_) | Self::BeatUnit(_))
    }
}

impl std::fmt::Debug for NodeOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}

/// One node in the processing graph.
///
/// Nodes are created fresh on every hard rebuild and live in the graph's
/// arena; edges are arena indices. The per-cycle state (`refcount`) and the
/// latency caches are atomics so a cycle and a soft latency update can both
/// work through a shared `Arc<Graph>`.
pub struct GraphNode {
    pub key: NodeKey,
    pub owner: NodeOwner,
    /// Downstream nodes released when this node completes
    pub childnodes: SmallVec<[NodeKey; 4]>,
    /// Upstream nodes; used at build time and by the latency pass
    pub parentnodes: SmallVec<[NodeKey; 4]>,
    /// Remaining-input template the counter is reset to each cycle
    pub init_refcount: u32,
    /// Remaining not-yet-completed producers in the current cycle
    pub refcount: AtomicU32,
    /// This node's own latency in frames
    pub playback_latency: AtomicU32,
    /// Max cumulative latency over all paths from a trigger node to here
    pub route_playback_latency: AtomicU32,
    /// No producers: seeded as ready at cycle start
    pub initial: bool,
    /// No consumers
    pub terminal: bool,
    skip: AtomicBool,
}

impl GraphNode {
    pub fn new(key: NodeKey, owner: NodeOwner) -> Self {
        let latency = owner.single_playback_latency();
        Self {
            key,
            owner,
            childnodes: SmallVec::new(),
            parentnodes: SmallVec::new(),
            init_refcount: 0,
            refcount: AtomicU32::new(0),
            playback_latency: AtomicU32::new(latency),
            route_playback_latency: AtomicU32::new(latency),
            initial: false,
            terminal: false,
            skip: AtomicBool::new(false),
        }
    }

    /// Bypass processing while keeping the node in the graph (its
    /// dependents are still released normally).
    pub fn set_skip_processing(&self, skip: bool) {
        self.skip.store(skip, Ordering::Relaxed);
    }

    pub fn skipped(&self) -> bool {
        self.skip.load(Ordering::Relaxed)
    }

    /// Process the node for one cycle.
    ///
    /// When this node's route carries more playback latency than the
    /// remaining preroll, the time window is shifted forward by the
    /// difference so every path converges on the same musical position.
    pub fn process(&self, time: ProcessTimeInfo, remaining_preroll: u32) {
        if self.skipped() {
            return;
        }
        let route_latency = self.route_playback_latency.load(Ordering::Relaxed);
        let time = if route_latency > remaining_preroll {
            time.with_global_offset(route_latency - remaining_preroll)
        } else {
            time
        };
        self.owner.process(&time);
    }
}

impl std::fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphNode")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .field("init_refcount", &self.init_refcount)
            .field("initial", &self.initial)
            .field("terminal", &self.terminal)
            .field(
                "route_playback_latency",
                &self.route_playback_latency.load(Ordering::Relaxed),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hc_core::{SamplePosition, TempoMap};

    #[test]
    fn test_timing_owner_is_timing() {
        let map = Arc::new(TempoMap::new(48000.0));
        assert!(NodeOwner::Tempo(map.clone()).is_timing());
        assert!(NodeOwner::BeatsPerBar(map.clone()).is_timing());
        assert!(NodeOwner::BeatUnit(map).is_timing());
    }

    #[test]
    fn test_skip_processing() {
        let map = Arc::new(TempoMap::new(48000.0));
        let node = GraphNode::new(NodeKey(0), NodeOwner::Tempo(map.clone()));
        node.set_skip_processing(true);
        map.set_bpm(60.0);
        node.process(ProcessTimeInfo::new(SamplePosition::ZERO, 0, 64), 0);
        // Skipped: the tempo cache was not refreshed
        assert_eq!(map.frames_per_beat(), (60.0 / 120.0) * 48000.0);
    }
}
