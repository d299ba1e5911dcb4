//! Audio device enumeration and selection

use cpal::traits::{DeviceTrait, HostTrait};

use super::engine::EngineError;

/// Information about an audio device.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    /// Position in the host's enumeration order; pass as the configured
    /// device index.
    pub index: usize,
    pub name: String,
    pub max_channels: u16,
    pub default_sample_rate: u32,
    pub is_default: bool,
}

/// List all available input (microphone) devices.
pub fn list_input_devices() -> Result<Vec<DeviceInfo>, EngineError> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = host
        .input_devices()
        .map_err(|e| EngineError::Enumerate(e.to_string()))?
        .enumerate()
        .filter_map(|(index, device)| {
            let name = device.name().ok()?;
            let config = device.default_input_config().ok()?;
            Some(DeviceInfo {
                index,
                is_default: default_name.as_deref() == Some(name.as_str()),
                max_channels: config.channels(),
                default_sample_rate: config.sample_rate().0,
                name,
            })
        })
        .collect();

    Ok(devices)
}

/// List all available output devices.
pub fn list_output_devices() -> Result<Vec<DeviceInfo>, EngineError> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let devices = host
        .output_devices()
        .map_err(|e| EngineError::Enumerate(e.to_string()))?
        .enumerate()
        .filter_map(|(index, device)| {
            let name = device.name().ok()?;
            let config = device.default_output_config().ok()?;
            Some(DeviceInfo {
                index,
                is_default: default_name.as_deref() == Some(name.as_str()),
                max_channels: config.channels(),
                default_sample_rate: config.sample_rate().0,
                name,
            })
        })
        .collect();

    Ok(devices)
}

/// Map a configured input index to a device. Negative selects the host
/// default.
pub(crate) fn resolve_input_device(
    host: &cpal::Host,
    index: i32,
) -> Result<cpal::Device, EngineError> {
    if index < 0 {
        host.default_input_device()
            .ok_or(EngineError::NoInputDevice)
    } else {
        host.input_devices()
            .map_err(|e| EngineError::Enumerate(e.to_string()))?
            .nth(index as usize)
            .ok_or(EngineError::NoInputDevice)
    }
}

/// Map a configured output index to a device. Negative selects the host
/// default.
pub(crate) fn resolve_output_device(
    host: &cpal::Host,
    index: i32,
) -> Result<cpal::Device, EngineError> {
    if index < 0 {
        host.default_output_device()
            .ok_or(EngineError::NoOutputDevice)
    } else {
        host.output_devices()
            .map_err(|e| EngineError::Enumerate(e.to_string()))?
            .nth(index as usize)
            .ok_or(EngineError::NoOutputDevice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_devices_does_not_panic() {
        let _ = list_input_devices();
        let _ = list_output_devices();
    }
}
