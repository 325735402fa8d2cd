//! Hardware parameter negotiation for a stream's format.
//!
//! Steps run in a fixed order and the first rejection aborts the whole
//! negotiation. Nothing is rolled back; the caller abandons the session.

use crate::error::{HwStep, PlayerError, Result};
use crate::sink::{Access, HwParams, SampleFormat};
use crate::stream::SoundStream;

/// Values the hardware accepted during negotiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NegotiatedParams {
    pub channels: u16,
    pub format: SampleFormat,
    pub rate: u32,
    pub buffer_time_us: u32,
    pub buffer_size: u64,
}

/// Configure `hw` for `stream`.
///
/// `buffer_time_us` is the requested buffer time; the buffer size request is the
/// stream's byte rate.
pub fn configure<P: HwParams + ?Sized>(
    hw: &mut P,
    stream: Option<&dyn SoundStream>,
    buffer_time_us: u32,
) -> Result<NegotiatedParams> {
    let stream = stream.ok_or(PlayerError::StreamNotSet)?;

    let channels = stream.channels();
    let format = SampleFormat::for_bits(stream.bits_per_sample());

    hw.set_access(Access::RwInterleaved)
        .map_err(|e| PlayerError::hw(HwStep::Access, e))?;
    hw.set_channels(channels)
        .map_err(|e| PlayerError::hw(HwStep::Channels, e))?;
    hw.set_format(format)
        .map_err(|e| PlayerError::hw(HwStep::Format, e))?;
    let rate = hw
        .set_rate_near(stream.sample_rate())
        .map_err(|e| PlayerError::hw(HwStep::Rate, e))?;
    let buffer_time_us = hw
        .set_buffer_time_near(buffer_time_us)
        .map_err(|e| PlayerError::hw(HwStep::BufferTime, e))?;
    let buffer_size = hw
        .set_buffer_size_near(u64::from(stream.byte_rate()))
        .map_err(|e| PlayerError::hw(HwStep::BufferSize, e))?;

    if rate != stream.sample_rate() {
        tracing::warn!(
            requested = stream.sample_rate(),
            achieved = rate,
            "sink rate differs from stream rate"
        );
    }
    tracing::debug!(
        channels,
        format = ?format,
        rate,
        buffer_time_us,
        buffer_size,
        "hardware parameters negotiated"
    );

    Ok(NegotiatedParams {
        channels,
        format,
        rate,
        buffer_time_us,
        buffer_size,
    })
}
