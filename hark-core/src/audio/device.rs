//! Input device enumeration and the hardware probe used by the self-test.

use serde::{Deserialize, Serialize};

/// An input device as seen by the host audio API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
    /// Name suggests it records system output rather than a microphone.
    pub is_loopback_like: bool,
    pub default_sample_rate: Option<u32>,
}

/// Result of probing the input hardware without opening a stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProbe {
    pub device_count: usize,
    /// Device a session would open.
    pub device_name: Option<String>,
    pub default_sample_rate: Option<u32>,
    pub is_loopback_like: bool,
}

/// Device rates within this distance of the configured rate count as matching.
pub const RATE_MATCH_TOLERANCE_HZ: u32 = 1_000;

impl DeviceProbe {
    pub fn hardware_ok(&self) -> bool {
        self.device_count > 0 && self.device_name.is_some()
    }

    /// Whether the device's native rate is close to `target_hz`.
    /// Unknown rates are not reported as a mismatch.
    pub fn rate_matches(&self, target_hz: u32) -> bool {
        self.default_sample_rate
            .map(|rate| rate.abs_diff(target_hz) <= RATE_MATCH_TOLERANCE_HZ)
            .unwrap_or(true)
    }
}

const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "what u hear",
    "what you hear",
    "loopback",
    "monitor of",
    "wave out",
    "virtual output",
    "speakers (",
];

/// Heuristic for capture devices that mirror the speaker output.
pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// List input devices, default first, loopback-looking ones last.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = match host.input_devices() {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!(error = %e, "failed to enumerate input devices");
            return Vec::new();
        }
    };

    let mut list: Vec<DeviceInfo> = devices
        .enumerate()
        .map(|(idx, device)| {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
            DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                is_loopback_like: is_loopback_like_name(&name),
                default_sample_rate: device.default_input_config().ok().map(|c| c.sample_rate().0),
                name,
            }
        })
        .collect();

    list.sort_by_key(|d| (!d.is_default, d.is_loopback_like, d.name.to_ascii_lowercase()));
    list
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_common_loopback_names() {
        assert!(is_loopback_like_name("Stereo Mix (Realtek Audio)"));
        assert!(is_loopback_like_name("Monitor of Built-in Audio"));
        assert!(!is_loopback_like_name("USB Kiosk Microphone"));
    }

    #[test]
    fn rate_match_allows_one_khz() {
        let probe = DeviceProbe {
            device_count: 1,
            device_name: Some("mic".into()),
            default_sample_rate: Some(16_800),
            is_loopback_like: false,
        };
        assert!(probe.hardware_ok());
        assert!(probe.rate_matches(16_000));
        assert!(!probe.rate_matches(48_000));
    }

    #[test]
    fn empty_probe_is_not_hardware_ok() {
        let probe = DeviceProbe::default();
        assert!(!probe.hardware_ok());
        assert!(probe.rate_matches(16_000));
    }
}
