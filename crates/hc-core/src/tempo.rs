//! Tempo and time signature state
//!
//! The tempo map is shared between the non-real-time side (setters driven by
//! user actions) and the processing graph, where three synthetic timing nodes
//! (tempo, beats-per-bar, beat-unit) refresh the derived caches at the start
//! of every cycle before any other node runs.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Minimum tempo
pub const MIN_TEMPO: f64 = 20.0;

/// Maximum tempo
pub const MAX_TEMPO: f64 = 400.0;

/// Time signature (e.g., 4/4, 3/4, 6/8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    /// Numerator (beats per bar)
    pub numerator: u8,
    /// Denominator (note value that gets one beat)
    pub denominator: u8,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }
}

impl TimeSignature {
    pub fn new(numerator: u8, denominator: u8) -> Self {
        Self {
            numerator,
            denominator,
        }
    }
}

#[derive(Debug)]
struct TempoState {
    bpm: f64,
    time_sig: TimeSignature,
    /// Derived cache, refreshed per cycle by the tempo timing node
    frames_per_beat: f64,
}

/// Shared tempo/time-signature state
#[derive(Debug)]
pub struct TempoMap {
    sample_rate: f64,
    state: RwLock<TempoState>,
}

impl TempoMap {
    pub fn new(sample_rate: f64) -> Self {
        let bpm = 120.0;
        Self {
            sample_rate,
            state: RwLock::new(TempoState {
                bpm,
                time_sig: TimeSignature::default(),
                frames_per_beat: (60.0 / bpm) * sample_rate,
            }),
        }
    }

    pub fn bpm(&self) -> f64 {
        self.state.read().bpm
    }

    pub fn set_bpm(&self, bpm: f64) {
        let mut state = self.state.write();
        state.bpm = bpm.clamp(MIN_TEMPO, MAX_TEMPO);
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.state.read().time_sig
    }

    pub fn set_time_signature(&self, time_sig: TimeSignature) {
        self.state.write().time_sig = time_sig;
    }

    pub fn beats_per_bar(&self) -> u8 {
        self.state.read().time_sig.numerator
    }

    pub fn beat_unit(&self) -> u8 {
        self.state.read().time_sig.denominator
    }

    pub fn frames_per_beat(&self) -> f64 {
        self.state.read().frames_per_beat
    }

    /// Called by the tempo timing node at cycle start: recompute the caches
    /// derived from bpm so every other node sees a consistent value.
    pub fn refresh_tempo(&self) {
        let mut state = self.state.write();
        state.frames_per_beat = (60.0 / state.bpm) * self.sample_rate;
    }

    /// Called by the beats-per-bar timing node at cycle start.
    ///
    /// The numerator has no derived caches today; the hook exists so the
    /// node ordering guarantee (timing nodes before everything else) covers
    /// future derived state the same way it covers tempo.
    pub fn refresh_beats_per_bar(&self) {}

    /// Called by the beat-unit timing node at cycle start.
    pub fn refresh_beat_unit(&self) {}
}
