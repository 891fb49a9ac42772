//! Tracks and the ordered track list

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{Channel, PortId, ProcessTimeInfo, StereoPorts};

/// Unique track identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TrackId(pub u64);

impl TrackId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Shared handle to a track processor
pub type ProcessorRef = Arc<RwLock<TrackProcessor>>;

/// Per-track input stage
///
/// In the full application this renders clips and live input into the
/// track; here it forwards its input ports to its output ports, which is
/// all the routing core needs from it.
#[derive(Debug)]
pub struct TrackProcessor {
    pub ins: StereoPorts,
    pub outs: StereoPorts,
}

impl TrackProcessor {
    pub fn new(ins: StereoPorts, outs: StereoPorts) -> Self {
        Self { ins, outs }
    }

    pub fn process(&self, time: &ProcessTimeInfo) {
        let (start, end) = time.range();
        for (input, output) in [(&self.ins.l, &self.outs.l), (&self.ins.r, &self.outs.r)] {
            let input = input.read();
            let mut output = output.write();
            let in_buf = input.buffer();
            let out_buf = output.buffer_mut();
            let end = end.min(in_buf.len()).min(out_buf.len());
            if start < end {
                out_buf[start..end].copy_from_slice(&in_buf[start..end]);
            }
        }
    }
}

/// One track: processor plus channel strip plus routing target
#[derive(Debug)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    pub processor: ProcessorRef,
    pub channel: Channel,
    /// Track this one's channel output feeds; `None` makes it terminal
    /// (the master track, or an unrouted track)
    pub output: Option<TrackId>,
}

impl Track {
    /// Enumerate the (input, output) port-id pairs of every owner inside
    /// this track, used by cycle validation: a signal entering an owner's
    /// input can reach all of that owner's outputs.
    pub fn owner_port_edges(&self, mut f: impl FnMut(PortId, PortId)) {
        let mut owner = |ins: &StereoPorts, outs: &StereoPorts| {
            let (il, ir) = ins.ids();
            let (ol, or) = outs.ids();
            for i in [il, ir] {
                for o in [ol, or] {
                    f(i, o);
                }
            }
        };

        {
            let p = self.processor.read();
            owner(&p.ins, &p.outs);
        }
        for slot in self.channel.slots() {
            owner(&slot.ins, &slot.outs);
        }
        {
            let fader = self.channel.fader.read();
            owner(&fader.ins, &fader.outs);
        }
        for send in &self.channel.sends {
            let send = send.read();
            owner(&send.ins, &send.outs);
        }
    }
}

/// Ordered track list
#[derive(Debug, Default)]
pub struct Tracklist {
    tracks: Vec<Track>,
}

impl Tracklist {
    pub fn new() -> Self {
        Self { tracks: Vec::new() }
    }

    pub fn push(&mut self, track: Track) {
        self.tracks.push(track);
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Track> {
        self.tracks.iter()
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.id == id)
    }

    pub fn remove(&mut self, id: TrackId) -> Option<Track> {
        let idx = self.tracks.iter().position(|t| t.id == id)?;
        Some(self.tracks.remove(idx))
    }
}
