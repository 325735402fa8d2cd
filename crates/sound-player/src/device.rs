//! Output device discovery and selection.
//!
//! Thin wrappers around CPAL for:
//! - listing available output devices
//! - selecting either the default device or a device by substring match
//! - ranking supported configs when negotiating a rate

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Names that select the host default output device.
pub fn is_default_name(name: &str) -> bool {
    let name = name.trim();
    name.is_empty() || name.eq_ignore_ascii_case("default")
}

/// Pick the first output device whose name contains `name` (case-insensitive),
/// or the host default when `name` is `None` or a default alias.
pub fn pick_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device> {
    let needle = match name {
        Some(n) if !is_default_name(n) => n,
        _ => {
            return host
                .default_output_device()
                .ok_or_else(|| anyhow!("No default output device"));
        }
    };

    let mut devices = host.output_devices().context("No output devices")?;
    devices
        .find(|d| {
            d.description()
                .ok()
                .map(|desc| matches_device_name(&desc.name(), needle))
                .unwrap_or(false)
        })
        .ok_or_else(|| anyhow!("No output device matched: {needle}"))
}

/// Human-readable name used to find the same device again later.
pub fn device_name(device: &cpal::Device) -> Result<String> {
    Ok(device.description()?.name().to_string())
}

/// Names of every output device on the host.
pub fn list_device_names(host: &cpal::Host) -> Result<Vec<String>> {
    let devices = host.output_devices().context("No output devices")?;
    let mut out = Vec::new();
    for d in devices {
        match device_name(&d) {
            Ok(name) => out.push(name),
            Err(e) => tracing::debug!("skipping unnamed device: {e:#}"),
        }
    }
    Ok(out)
}

/// Closest rate to `target` inside `[min, max]`.
pub fn nearest_rate(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

/// Preference order for device sample formats (lower is better).
///
/// `None` for formats the sink cannot convert to.
pub fn sample_format_rank(format: cpal::SampleFormat) -> Option<u8> {
    match format {
        cpal::SampleFormat::F32 => Some(0),
        cpal::SampleFormat::I32 => Some(1),
        cpal::SampleFormat::I16 => Some(2),
        cpal::SampleFormat::U16 => Some(3),
        cpal::SampleFormat::U8 => Some(4),
        _ => None,
    }
}

/// Whether a candidate `(distance, format rank)` beats the current best.
pub fn is_better_candidate(distance: u32, rank: u8, best_distance: u32, best_rank: u8) -> bool {
    if distance != best_distance {
        distance < best_distance
    } else {
        rank < best_rank
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_aliases() {
        assert!(is_default_name("default"));
        assert!(is_default_name(" Default "));
        assert!(is_default_name(""));
        assert!(!is_default_name("hw:0"));
    }

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", ""));
    }

    #[test]
    fn nearest_rate_prefers_target_in_range() {
        assert_eq!(nearest_rate(44_100, 96_000, 48_000), 48_000);
    }

    #[test]
    fn nearest_rate_clamps_to_bounds() {
        assert_eq!(nearest_rate(44_100, 96_000, 22_050), 44_100);
        assert_eq!(nearest_rate(44_100, 96_000, 192_000), 96_000);
        assert_eq!(nearest_rate(48_000, 48_000, 44_100), 48_000);
    }

    #[test]
    fn format_rank_prefers_float() {
        assert_eq!(sample_format_rank(cpal::SampleFormat::F32), Some(0));
        assert!(sample_format_rank(cpal::SampleFormat::I16) < sample_format_rank(cpal::SampleFormat::U8));
        assert_eq!(sample_format_rank(cpal::SampleFormat::F64), None);
    }

    #[test]
    fn better_candidate_prefers_distance_then_rank() {
        assert!(is_better_candidate(0, 3, 100, 0));
        assert!(!is_better_candidate(100, 0, 0, 3));
        assert!(is_better_candidate(0, 0, 0, 2));
    }
}
