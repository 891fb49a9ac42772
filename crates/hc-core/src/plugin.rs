//! Plugin hosting seam
//!
//! Format-specific hosting (CLAP/VST/LV2 bridges) lives outside the core;
//! the engine only sees the `PluginInstance` trait plus the slot that pairs
//! an instance with its audio ports.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::{ProcessTimeInfo, Sample, StereoPorts};

/// Hosted plugin instance
///
/// Implementations must tolerate being processed with any window inside the
/// engine's maximum block size. `latency()` is re-read on every latency
/// recalculation, so a plugin may change its reported latency at runtime
/// (the host then triggers a soft graph rebuild).
pub trait PluginInstance: Send + Sync {
    fn name(&self) -> &str;

    /// Processing latency in frames introduced by this instance
    fn latency(&self) -> u32 {
        0
    }

    /// Process one cycle window. Slices cover the full engine block; the
    /// window to touch is `time.range()`.
    fn process(&mut self, time: &ProcessTimeInfo, inputs: &[&[Sample]], outputs: &mut [&mut [Sample]]);
}

/// Shared handle to a plugin instance
pub type PluginRef = Arc<RwLock<dyn PluginInstance>>;

/// A channel slot hosting one plugin instance together with its ports
#[derive(Clone)]
pub struct PluginSlot {
    pub instance: PluginRef,
    pub ins: StereoPorts,
    pub outs: StereoPorts,
}

impl PluginSlot {
    pub fn new(instance: PluginRef, ins: StereoPorts, outs: StereoPorts) -> Self {
        Self { instance, ins, outs }
    }

    pub fn name(&self) -> String {
        self.instance.read().name().to_string()
    }

    pub fn latency(&self) -> u32 {
        self.instance.read().latency()
    }

    /// Run the hosted instance over this slot's ports
    pub fn process(&self, time: &ProcessTimeInfo) {
        let in_l = self.ins.l.read();
        let in_r = self.ins.r.read();
        let mut out_l = self.outs.l.write();
        let mut out_r = self.outs.r.write();
        let inputs = [in_l.buffer(), in_r.buffer()];
        let mut instance = self.instance.write();
        instance.process(time, &inputs, &mut [out_l.buffer_mut(), out_r.buffer_mut()]);
    }
}

impl std::fmt::Debug for PluginSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSlot")
            .field("name", &self.name())
            .field("latency", &self.latency())
            .finish()
    }
}

/// Copies inputs to outputs unchanged, optionally reporting latency.
///
/// Stands in for a real hosted plugin in tests and as the disabled-slot
/// placeholder.
pub struct PassthroughPlugin {
    name: String,
    latency: u32,
}

impl PassthroughPlugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latency: 0,
        }
    }

    pub fn with_latency(name: impl Into<String>, latency: u32) -> Self {
        Self {
            name: name.into(),
            latency,
        }
    }

    pub fn set_latency(&mut self, latency: u32) {
        self.latency = latency;
    }
}

impl PluginInstance for PassthroughPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn latency(&self) -> u32 {
        self.latency
    }

    fn process(&mut self, time: &ProcessTimeInfo, inputs: &[&[Sample]], outputs: &mut [&mut [Sample]]) {
        let (start, end) = time.range();
        for (input, output) in inputs.iter().zip(outputs.iter_mut()) {
            let end = end.min(input.len()).min(output.len());
            if start < end {
                output[start..end].copy_from_slice(&input[start..end]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Port, PortFlow, PortId, PortKind, SamplePosition};

    fn stereo(base: u64, flow: PortFlow, block: usize) -> StereoPorts {
        let mk = |id: u64, n: &str| {
            Arc::new(RwLock::new(Port::new(PortId(id), n, PortKind::Audio, flow, block)))
        };
        StereoPorts::new(mk(base, "L"), mk(base + 1, "R"))
    }

    #[test]
    fn test_passthrough_slot() {
        let ins = stereo(1, PortFlow::Input, 8);
        let outs = stereo(3, PortFlow::Output, 8);
        ins.l.write().buffer_mut().fill(0.5);
        ins.r.write().buffer_mut().fill(-0.5);

        let slot = PluginSlot::new(
            Arc::new(RwLock::new(PassthroughPlugin::new("thru"))),
            ins,
            outs.clone(),
        );
        let time = ProcessTimeInfo::new(SamplePosition::ZERO, 0, 8);
        slot.process(&time);

        assert!(outs.l.read().buffer().iter().all(|&s| s == 0.5));
        assert!(outs.r.read().buffer().iter().all(|&s| s == -0.5));
        assert_eq!(slot.latency(), 0);
    }

    #[test]
    fn test_reported_latency() {
        let slot_latency = PassthroughPlugin::with_latency("lookahead", 64);
        assert_eq!(slot_latency.latency(), 64);
    }
}
