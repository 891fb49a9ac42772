//! Ports: the buffer-carrying endpoints of all routing
//!
//! Every signal endpoint in the project (track processor I/O, plugin I/O,
//! fader I/O, send I/O) is a port. A port owns its buffer and knows the
//! source ports feeding it; processing a port clears its buffer for the
//! cycle window and sums every source in. The graph guarantees a port is
//! processed after all of its sources, so readers downstream always see a
//! complete buffer.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{ProcessTimeInfo, Sample};

/// Unique port identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortId(pub u64);

/// Signal type carried by a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortKind {
    Audio,
    Midi,
    Control,
    Cv,
}

/// Port direction relative to its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortFlow {
    Input,
    Output,
}

/// Shared handle to a port
pub type PortRef = Arc<RwLock<Port>>;

/// A signal endpoint owning its own buffer
#[derive(Debug)]
pub struct Port {
    id: PortId,
    name: String,
    kind: PortKind,
    flow: PortFlow,
    buf: Vec<Sample>,
    /// Ports feeding this one (mirrors the connection table plus the
    /// locked intra-channel wiring)
    srcs: Vec<PortRef>,
}

impl Port {
    pub fn new(id: PortId, name: impl Into<String>, kind: PortKind, flow: PortFlow, block_size: usize) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            flow,
            buf: vec![0.0; block_size],
            srcs: Vec::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> PortKind {
        self.kind
    }

    #[inline]
    pub fn flow(&self) -> PortFlow {
        self.flow
    }

    #[inline]
    pub fn buffer(&self) -> &[Sample] {
        &self.buf
    }

    #[inline]
    pub fn buffer_mut(&mut self) -> &mut [Sample] {
        &mut self.buf
    }

    pub fn num_srcs(&self) -> usize {
        self.srcs.len()
    }

    pub(crate) fn add_src(&mut self, src: PortRef) {
        self.srcs.push(src);
    }

    pub(crate) fn remove_src(&mut self, src_id: PortId) {
        self.srcs.retain(|s| s.read().id != src_id);
    }

    /// Zero the cycle window of the buffer
    pub fn clear_range(&mut self, time: &ProcessTimeInfo) {
        let (start, end) = time.range();
        let end = end.min(self.buf.len());
        if start < end {
            self.buf[start..end].fill(0.0);
        }
    }

    /// Process this port for one cycle: clear the window, then sum every
    /// source buffer in. A port with no sources produces silence.
    ///
    /// Output ports are rendered by their owner, which runs before this
    /// port's graph node; they are left untouched here (validation never
    /// lets an output port acquire sources).
    pub fn process(&mut self, time: &ProcessTimeInfo) {
        if self.flow == PortFlow::Output {
            return;
        }
        self.clear_range(time);
        let (start, end) = time.range();
        let end = end.min(self.buf.len());
        if start >= end {
            return;
        }
        for src in &self.srcs {
            let src = src.read();
            let src_buf = src.buffer();
            let src_end = end.min(src_buf.len());
            for i in start..src_end {
                self.buf[i] += src_buf[i];
            }
        }
    }
}

/// Stereo pair of ports
#[derive(Debug, Clone)]
pub struct StereoPorts {
    pub l: PortRef,
    pub r: PortRef,
}

impl StereoPorts {
    pub fn new(l: PortRef, r: PortRef) -> Self {
        Self { l, r }
    }

    pub fn ids(&self) -> (PortId, PortId) {
        (self.l.read().id(), self.r.read().id())
    }
}
