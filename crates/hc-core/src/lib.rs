//! hc-core: Shared types and project model for Helicon
//!
//! This crate provides the foundational types used across all Helicon crates:
//! sample/time/tempo primitives and the live project model (tracks, channels,
//! plugins, sends, ports) that the processing graph is built from.

mod channel;
mod error;
mod plugin;
mod port;
mod project;
mod routing;
mod sample;
mod tempo;
mod time;
mod track;

pub use channel::*;
pub use error::*;
pub use plugin::*;
pub use port::*;
pub use project::*;
pub use routing::*;
pub use sample::*;
pub use tempo::*;
pub use time::*;
pub use track::*;

/// Standard sample rate options
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u32)]
pub enum SampleRate {
    Hz44100 = 44100,
    Hz48000 = 48000,
    Hz88200 = 88200,
    Hz96000 = 96000,
    Hz176400 = 176400,
    Hz192000 = 192000,
}

impl SampleRate {
    #[inline]
    pub fn as_f64(self) -> f64 {
        self as u32 as f64
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl Default for SampleRate {
    fn default() -> Self {
        Self::Hz48000
    }
}

/// Buffer size options
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u32)]
pub enum BufferSize {
    Samples32 = 32,
    Samples64 = 64,
    Samples128 = 128,
    Samples256 = 256,
    Samples512 = 512,
    Samples1024 = 1024,
    Samples2048 = 2048,
}

impl BufferSize {
    #[inline]
    pub fn as_usize(self) -> usize {
        self as u32 as usize
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl Default for BufferSize {
    fn default() -> Self {
        Self::Samples512
    }
}

/// Gain expressed in decibels
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, serde::Serialize, serde::Deserialize)]
pub struct Decibels(pub f64);

impl Decibels {
    pub const ZERO: Self = Self(0.0);
    pub const NEG_INF: Self = Self(f64::NEG_INFINITY);

    #[inline]
    pub fn from_gain(gain: f64) -> Self {
        if gain <= 0.0 {
            Self::NEG_INF
        } else {
            Self(20.0 * gain.log10())
        }
    }

    #[inline]
    pub fn to_gain(self) -> f64 {
        if self.0 <= -144.0 {
            0.0
        } else {
            10.0_f64.powf(self.0 / 20.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decibels_roundtrip() {
        let db = Decibels(-6.0);
        let back = Decibels::from_gain(db.to_gain());
        assert!((back.0 - db.0).abs() < 1e-9);
    }

    #[test]
    fn test_decibels_silence() {
        assert_eq!(Decibels::NEG_INF.to_gain(), 0.0);
        assert_eq!(Decibels::from_gain(0.0), Decibels::NEG_INF);
    }

    #[test]
    fn test_buffer_size_as_usize() {
        assert_eq!(BufferSize::Samples256.as_usize(), 256);
        assert_eq!(BufferSize::default().as_usize(), 512);
    }
}
