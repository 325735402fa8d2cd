//! Audio sink boundary.
//!
//! The player opens, configures, prepares and writes to a [`Sink`]. Hardware
//! parameters are negotiated through a separate [`HwParams`] object that is
//! handed back to the sink once all steps succeeded.

use crate::error::{SinkError, WriteError};

/// Sample access layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    /// Interleaved frames written with read/write calls.
    RwInterleaved,
}

/// Sample formats the player can produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    U8,
    S16Le,
}

impl SampleFormat {
    /// Pick the sink format for a stream bit depth: 8-bit stays unsigned, anything else is S16LE.
    pub fn for_bits(bits_per_sample: u16) -> Self {
        if bits_per_sample == 8 {
            SampleFormat::U8
        } else {
            SampleFormat::S16Le
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16Le => 2,
        }
    }
}

/// Hardware parameter set under negotiation.
///
/// The `_near` setters accept the closest value the hardware supports and
/// return what was actually chosen.
pub trait HwParams {
    fn set_access(&mut self, access: Access) -> Result<(), SinkError>;
    fn set_channels(&mut self, channels: u16) -> Result<(), SinkError>;
    fn set_format(&mut self, format: SampleFormat) -> Result<(), SinkError>;
    fn set_rate_near(&mut self, rate: u32) -> Result<u32, SinkError>;
    fn set_buffer_time_near(&mut self, micros: u32) -> Result<u32, SinkError>;
    fn set_buffer_size_near(&mut self, frames: u64) -> Result<u64, SinkError>;
}

/// Frame-oriented audio output.
pub trait Sink: Send {
    type Params: HwParams;

    /// Open the output identified by `name`.
    fn open(&mut self, name: &str) -> Result<(), SinkError>;

    /// A fresh parameter set for the open output.
    fn hw_params(&mut self) -> Result<Self::Params, SinkError>;

    /// Install negotiated parameters.
    fn set_hw_params(&mut self, params: Self::Params) -> Result<(), SinkError>;

    /// Make the output ready for writes; also clears an underrun.
    fn prepare(&mut self) -> Result<(), SinkError>;

    /// Write up to `frames` interleaved frames from `buf`, returning how many were taken.
    fn writei(&mut self, buf: &[u8], frames: usize) -> Result<usize, WriteError>;

    fn bytes_to_frames(&self, bytes: usize) -> usize;

    /// Release the output. Safe to call on an already closed sink.
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_bits_maps_eight_bit_to_unsigned() {
        assert_eq!(SampleFormat::for_bits(8), SampleFormat::U8);
        assert_eq!(SampleFormat::for_bits(16), SampleFormat::S16Le);
        assert_eq!(SampleFormat::for_bits(24), SampleFormat::S16Le);
        assert_eq!(SampleFormat::U8.bytes_per_sample(), 1);
        assert_eq!(SampleFormat::S16Le.bytes_per_sample(), 2);
    }
}
