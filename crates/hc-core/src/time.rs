//! Time-related types for audio processing

use serde::{Deserialize, Serialize};

/// Sample position on the timeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SamplePosition(pub u64);

impl SamplePosition {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub fn from_seconds(seconds: f64, sample_rate: f64) -> Self {
        Self((seconds * sample_rate) as u64)
    }

    #[inline]
    pub fn to_seconds(self, sample_rate: f64) -> f64 {
        self.0 as f64 / sample_rate
    }

    #[inline]
    pub fn advance(&mut self, samples: u64) {
        self.0 += samples;
    }
}

impl std::ops::Add<u64> for SamplePosition {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

/// One processing cycle's timing window.
///
/// `g_start_frame` is the playback position at the start of the engine
/// callback; `g_start_frame_w_offset` additionally accounts for the local
/// offset inside the callback buffer and for latency compensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessTimeInfo {
    /// Global (timeline) frame at the start of the callback
    pub g_start_frame: u64,
    /// Global frame including local offset and latency adjustment
    pub g_start_frame_w_offset: u64,
    /// Offset into the engine buffer where this slice starts
    pub local_offset: u32,
    /// Number of frames to process in this cycle
    pub nframes: u32,
}

impl ProcessTimeInfo {
    pub fn new(position: SamplePosition, local_offset: u32, nframes: u32) -> Self {
        Self {
            g_start_frame: position.0,
            g_start_frame_w_offset: position.0 + local_offset as u64,
            local_offset,
            nframes,
        }
    }

    /// Shift the latency-adjusted global start forward by `offset` frames.
    ///
    /// Used when a route carries more playback latency than the remaining
    /// preroll, so the node reads ahead of the nominal playhead.
    #[inline]
    pub fn with_global_offset(mut self, offset: u32) -> Self {
        self.g_start_frame += offset as u64;
        self.g_start_frame_w_offset += offset as u64;
        self
    }

    /// Buffer range covered by this cycle, as usize bounds
    #[inline]
    pub fn range(&self) -> (usize, usize) {
        let start = self.local_offset as usize;
        (start, start + self.nframes as usize)
    }
}

impl Default for ProcessTimeInfo {
    fn default() -> Self {
        Self::new(SamplePosition::ZERO, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_info_offsets() {
        let t = ProcessTimeInfo::new(SamplePosition(1000), 64, 128);
        assert_eq!(t.g_start_frame, 1000);
        assert_eq!(t.g_start_frame_w_offset, 1064);
        assert_eq!(t.range(), (64, 192));
    }

    #[test]
    fn test_time_info_global_offset() {
        let t = ProcessTimeInfo::new(SamplePosition(1000), 0, 128).with_global_offset(64);
        assert_eq!(t.g_start_frame, 1064);
        assert_eq!(t.g_start_frame_w_offset, 1064);
        assert_eq!(t.nframes, 128);
    }
}
