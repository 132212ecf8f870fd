use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait};

pub fn input_device_names() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let mut result = Vec::new();
    for device in host.input_devices()? {
        if let Ok(name) = device.name() {
            result.push(name);
        }
    }
    Ok(result)
}

pub fn output_device_names() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let mut result = Vec::new();
    for device in host.output_devices()? {
        if let Ok(name) = device.name() {
            result.push(name);
        }
    }
    Ok(result)
}
