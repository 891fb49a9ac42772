//! Sample types and audio buffer definitions

/// Type alias for audio samples (f64 end to end, like the mix bus)
pub type Sample = f64;

/// Stereo sample pair
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct StereoSample {
    pub left: Sample,
    pub right: Sample,
}

impl StereoSample {
    #[inline]
    pub const fn new(left: Sample, right: Sample) -> Self {
        Self { left, right }
    }

    #[inline]
    pub const fn mono(value: Sample) -> Self {
        Self {
            left: value,
            right: value,
        }
    }
}
