//! Audio device lookup

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::error::{CaptureError, OutputError};

/// Description of an audio device for collaborators and logs
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices: Vec<AudioDeviceInfo> = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = device_capabilities(&device, true);
                devices.push(AudioDeviceInfo {
                    is_default: default_input_name.as_ref() == Some(&name),
                    name,
                    is_input: true,
                    is_output: false,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let is_default = default_output_name.as_ref() == Some(&name);
                if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                    existing.is_output = true;
                    existing.is_default |= is_default;
                } else {
                    let (sample_rates, channels) = device_capabilities(&device, false);
                    devices.push(AudioDeviceInfo {
                        name,
                        is_input: false,
                        is_output: true,
                        is_default,
                        sample_rates,
                        channels,
                    });
                }
            }
        }
    }

    devices
}

/// Rates relevant to voice sessions that the device can run at
fn device_capabilities(device: &cpal::Device, is_input: bool) -> (Vec<u32>, Vec<u16>) {
    let configs: Vec<cpal::SupportedStreamConfigRange> = if is_input {
        device
            .supported_input_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default()
    } else {
        device
            .supported_output_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default()
    };

    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();
    for config in &configs {
        for rate_val in [16000u32, 24000, 44100, 48000] {
            let rate = cpal::SampleRate(rate_val);
            if rate >= config.min_sample_rate()
                && rate <= config.max_sample_rate()
                && !sample_rates.contains(&rate_val)
            {
                sample_rates.push(rate_val);
            }
        }
        if !channels.contains(&config.channels()) {
            channels.push(config.channels());
        }
    }
    sample_rates.sort_unstable();
    channels.sort_unstable();
    (sample_rates, channels)
}

/// Get the default input device
pub fn default_input_device() -> Result<cpal::Device, CaptureError> {
    cpal::default_host()
        .default_input_device()
        .ok_or_else(|| CaptureError::ResourceUnavailable("No default input device".to_string()))
}

/// Get the default output device
pub fn default_output_device() -> Result<cpal::Device, OutputError> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| OutputError::DeviceNotFound("No default output device".to_string()))
}

/// Map a cpal stream build failure onto the capture taxonomy.
///
/// cpal has no dedicated permission variant; hosts report refused access as
/// a backend-specific error whose description mentions it.
pub fn classify_build_error(err: &cpal::BuildStreamError) -> CaptureError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => {
            CaptureError::ResourceUnavailable(err.to_string())
        }
        cpal::BuildStreamError::StreamConfigNotSupported
        | cpal::BuildStreamError::InvalidArgument => {
            CaptureError::UnsupportedFormat(err.to_string())
        }
        cpal::BuildStreamError::BackendSpecific { err: backend } => {
            classify_backend_message(&backend.description)
        }
        other => CaptureError::StreamError(other.to_string()),
    }
}

fn classify_backend_message(description: &str) -> CaptureError {
    let lowered = description.to_ascii_lowercase();
    if ["permission", "denied", "not authorized", "access"]
        .iter()
        .any(|needle| lowered.contains(needle))
    {
        CaptureError::PermissionDenied(description.to_string())
    } else {
        CaptureError::StreamError(description.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_device_not_available() {
        let err = cpal::BuildStreamError::DeviceNotAvailable;
        assert!(matches!(
            classify_build_error(&err),
            CaptureError::ResourceUnavailable(_)
        ));
    }

    #[test]
    fn test_classify_permission_message() {
        let err = cpal::BuildStreamError::BackendSpecific {
            err: cpal::BackendSpecificError {
                description: "Access denied by the system privacy settings".to_string(),
            },
        };
        assert!(matches!(
            classify_build_error(&err),
            CaptureError::PermissionDenied(_)
        ));
    }

    #[test]
    fn test_classify_other_backend_message() {
        let err = cpal::BuildStreamError::BackendSpecific {
            err: cpal::BackendSpecificError {
                description: "buffer size out of range".to_string(),
            },
        };
        assert!(matches!(
            classify_build_error(&err),
            CaptureError::StreamError(_)
        ));
    }
}
