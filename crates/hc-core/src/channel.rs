//! Channel strip: plugin chain, fader, sends
//!
//! Processing order inside a channel honors the slot layout: MIDI FX, then
//! the instrument, then inserts, then the fader; sends tap the fader output.
//! The actual inter-stage routing is expressed as locked port connections so
//! that the graph builder sees one uniform edge model.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::{Decibels, PluginSlot, ProcessTimeInfo, StereoPorts};

/// Shared handle to a fader
pub type FaderRef = Arc<RwLock<Fader>>;

/// Shared handle to a channel send
pub type SendRef = Arc<RwLock<ChannelSend>>;

/// Channel gain/mute stage
#[derive(Debug)]
pub struct Fader {
    amp: f64,
    muted: bool,
    pub ins: StereoPorts,
    pub outs: StereoPorts,
}

impl Fader {
    pub fn new(ins: StereoPorts, outs: StereoPorts) -> Self {
        Self {
            amp: 1.0,
            muted: false,
            ins,
            outs,
        }
    }

    pub fn gain(&self) -> Decibels {
        Decibels::from_gain(self.amp)
    }

    pub fn set_gain(&mut self, gain: Decibels) {
        self.amp = gain.to_gain();
    }

    pub fn muted(&self) -> bool {
        self.muted
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    /// Apply gain from the in ports to the out ports for one cycle window
    pub fn process(&self, time: &ProcessTimeInfo) {
        let amp = if self.muted { 0.0 } else { self.amp };
        let (start, end) = time.range();
        for (input, output) in [(&self.ins.l, &self.outs.l), (&self.ins.r, &self.outs.r)] {
            let input = input.read();
            let mut output = output.write();
            let in_buf = input.buffer();
            let out_buf = output.buffer_mut();
            let end = end.min(in_buf.len()).min(out_buf.len());
            for i in start..end {
                out_buf[i] = in_buf[i] * amp;
            }
        }
    }
}

/// Post-fader send tap
#[derive(Debug)]
pub struct ChannelSend {
    enabled: bool,
    amount: f64,
    pub ins: StereoPorts,
    pub outs: StereoPorts,
}

impl ChannelSend {
    pub fn new(ins: StereoPorts, outs: StereoPorts) -> Self {
        Self {
            enabled: false,
            amount: 1.0,
            ins,
            outs,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn amount(&self) -> Decibels {
        Decibels::from_gain(self.amount)
    }

    pub fn set_amount(&mut self, amount: Decibels) {
        self.amount = amount.to_gain();
    }

    /// Copy the tap input to the send output, scaled by the send amount.
    /// A disabled send still writes (silence) so downstream sums stay valid.
    pub fn process(&self, time: &ProcessTimeInfo) {
        let amp = if self.enabled { self.amount } else { 0.0 };
        let (start, end) = time.range();
        for (input, output) in [(&self.ins.l, &self.outs.l), (&self.ins.r, &self.outs.r)] {
            let input = input.read();
            let mut output = output.write();
            let in_buf = input.buffer();
            let out_buf = output.buffer_mut();
            let end = end.min(in_buf.len()).min(out_buf.len());
            for i in start..end {
                out_buf[i] = in_buf[i] * amp;
            }
        }
    }
}

/// One track's channel strip
#[derive(Debug)]
pub struct Channel {
    /// MIDI FX slots, processed before the instrument
    pub midi_fx: Vec<PluginSlot>,
    /// Instrument slot
    pub instrument: Option<PluginSlot>,
    /// Insert effect slots, processed after the instrument
    pub inserts: Vec<PluginSlot>,
    pub fader: FaderRef,
    pub sends: Vec<SendRef>,
}

impl Channel {
    pub fn new(fader: FaderRef) -> Self {
        Self {
            midi_fx: Vec::new(),
            instrument: None,
            inserts: Vec::new(),
            fader,
            sends: Vec::new(),
        }
    }

    /// Plugin slots in processing order (MIDI FX, instrument, inserts)
    pub fn slots(&self) -> impl Iterator<Item = &PluginSlot> {
        self.midi_fx
            .iter()
            .chain(self.instrument.iter())
            .chain(self.inserts.iter())
    }

    pub fn num_slots(&self) -> usize {
        self.midi_fx.len() + usize::from(self.instrument.is_some()) + self.inserts.len()
    }
}
