//! Host and device resolution for the duplex graph.
//!
//! Devices are re-resolved on every engine (re)start so that recovery
//! after a route change picks up the current defaults.

use cpal::traits::{DeviceTrait, HostTrait};

use voice_loop_core::{AudioFormat, RoutePolicy, SessionError};

/// Resolve the capture device: always the host default input.
pub fn resolve_input_device() -> Result<cpal::Device, SessionError> {
    cpal::default_host()
        .default_input_device()
        .ok_or_else(|| SessionError::EngineStart("no input device available".into()))
}

/// Resolve the render device according to the route policy.
///
/// `PreferSpeaker` scans for a loudspeaker-named endpoint and falls back
/// to the host default when none is found — the default route wins only
/// when no speaker-class output exists.
pub fn resolve_output_device(policy: RoutePolicy) -> Result<cpal::Device, SessionError> {
    let host = cpal::default_host();

    if policy == RoutePolicy::PreferSpeaker {
        if let Ok(devices) = host.output_devices() {
            for device in devices {
                let name = device.name().unwrap_or_default();
                if is_speaker_name(&name) {
                    log::debug!("routing output to loudspeaker device '{}'", name);
                    return Ok(device);
                }
            }
        }
    }

    host.default_output_device()
        .ok_or_else(|| SessionError::EngineStart("no output device available".into()))
}

/// Whether a device name identifies a loudspeaker-class endpoint.
pub fn is_speaker_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("speaker") || lower.contains("loudspeaker")
}

/// Check that `device` can capture `format` exactly: same rate, same
/// channel count, f32 samples. No conversion is attempted on mismatch.
pub fn validate_input_format(
    device: &cpal::Device,
    format: &AudioFormat,
) -> Result<(), SessionError> {
    let configs = device
        .supported_input_configs()
        .map_err(|e| SessionError::FormatUnsupported(format!("query input configs: {}", e)))?;

    for range in configs {
        if range.channels() == format.channels
            && range.sample_format() == cpal::SampleFormat::F32
            && range.min_sample_rate().0 <= format.sample_rate
            && range.max_sample_rate().0 >= format.sample_rate
        {
            return Ok(());
        }
    }

    Err(SessionError::FormatUnsupported(format!(
        "input device '{}' cannot capture {}",
        device.name().unwrap_or_default(),
        format
    )))
}

/// Check that `device` can render f32 at the format's sample rate. The
/// render side may have any channel count; mono is duplicated across
/// channels at the mixer stage, which is layout fan-out, not resampling.
pub fn validate_output_format(
    device: &cpal::Device,
    format: &AudioFormat,
) -> Result<cpal::StreamConfig, SessionError> {
    let configs = device
        .supported_output_configs()
        .map_err(|e| SessionError::FormatUnsupported(format!("query output configs: {}", e)))?;

    for range in configs {
        if range.sample_format() == cpal::SampleFormat::F32
            && range.min_sample_rate().0 <= format.sample_rate
            && range.max_sample_rate().0 >= format.sample_rate
        {
            return Ok(cpal::StreamConfig {
                channels: range.channels(),
                sample_rate: cpal::SampleRate(format.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            });
        }
    }

    Err(SessionError::FormatUnsupported(format!(
        "output device '{}' cannot render f32 at {} Hz",
        device.name().unwrap_or_default(),
        format.sample_rate
    )))
}

/// Whether any input config of the default device covers `sample_rate`.
/// Best effort: the session logs and continues on rejection.
pub fn preferred_rate_available(sample_rate: u32) -> Result<(), SessionError> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| SessionError::ConfigRejected("no input device to query".into()))?;

    let configs = device
        .supported_input_configs()
        .map_err(|e| SessionError::ConfigRejected(format!("query input configs: {}", e)))?;

    for range in configs {
        if range.min_sample_rate().0 <= sample_rate && range.max_sample_rate().0 >= sample_rate {
            return Ok(());
        }
    }

    Err(SessionError::ConfigRejected(format!(
        "hardware does not offer {} Hz",
        sample_rate
    )))
}
