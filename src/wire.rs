//! JSON wire format consumed by the surrounding CLI/export layer
//!
//! ```text
//! {"gpus":[{"index":0,"name":"...","gpu_utilization":85,"memory_utilization":75,
//!           "memory_total":24564498432,"memory_used":18423373824,"memory_free":6141124608,
//!           "temperature":72,"power_usage":350.5}]}
//! ```
//!
//! Every key is always present. Absent temperature or power is written as `0`.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::snapshot::{CollectionSnapshot, DeviceSnapshot};

/// Top-level payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuPayload {
    pub gpus: Vec<WireDevice>,
}

/// One device entry on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireDevice {
    pub index: u32,
    pub name: String,
    pub gpu_utilization: u8,
    pub memory_utilization: u8,
    pub memory_total: u64,
    pub memory_used: u64,
    pub memory_free: u64,
    pub temperature: f64,
    pub power_usage: f64,
}

impl From<&DeviceSnapshot> for WireDevice {
    fn from(device: &DeviceSnapshot) -> Self {
        Self {
            index: device.index,
            name: device.name.clone(),
            gpu_utilization: device.gpu_utilization_percent,
            memory_utilization: device.memory_utilization_percent,
            memory_total: device.memory_total_bytes,
            memory_used: device.memory_used_bytes,
            memory_free: device.memory_free_bytes,
            temperature: device.temperature_celsius.unwrap_or(0.0),
            power_usage: device.power_watts.unwrap_or(0.0),
        }
    }
}

impl From<&CollectionSnapshot> for GpuPayload {
    fn from(snapshot: &CollectionSnapshot) -> Self {
        Self {
            gpus: snapshot.devices.iter().map(WireDevice::from).collect(),
        }
    }
}

/// Render a snapshot as compact JSON
pub fn to_json(snapshot: &CollectionSnapshot) -> Result<String> {
    Ok(serde_json::to_string(&GpuPayload::from(snapshot))?)
}

/// Render a snapshot as indented JSON
pub fn to_json_pretty(snapshot: &CollectionSnapshot) -> Result<String> {
    Ok(serde_json::to_string_pretty(&GpuPayload::from(snapshot))?)
}

/// Parse a payload previously produced by [`to_json`]
pub fn from_json(payload: &str) -> Result<GpuPayload> {
    Ok(serde_json::from_str(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::GpuVendor;

    fn device(index: u32, name: &str) -> DeviceSnapshot {
        DeviceSnapshot {
            index,
            name: name.to_string(),
            vendor: GpuVendor::Nvidia,
            gpu_utilization_percent: 85,
            memory_utilization_percent: 75,
            memory_total_bytes: 24_564_498_432,
            memory_used_bytes: 18_423_373_824,
            memory_free_bytes: 6_141_124_608,
            temperature_celsius: Some(72.0),
            power_watts: Some(350.5),
        }
    }

    #[test]
    fn empty_collection_renders_empty_list() {
        let json = to_json(&CollectionSnapshot::empty()).unwrap();
        assert_eq!(json, r#"{"gpus":[]}"#);
    }

    #[test]
    fn all_keys_present_and_absent_values_render_as_zero() {
        let mut snapshot = CollectionSnapshot::empty();
        let mut dev = device(0, "GeForce RTX 4090");
        dev.temperature_celsius = None;
        dev.power_watts = None;
        snapshot.devices.push(dev);

        let json = to_json(&snapshot).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let entry = &value["gpus"][0];
        for key in [
            "index",
            "name",
            "gpu_utilization",
            "memory_utilization",
            "memory_total",
            "memory_used",
            "memory_free",
            "temperature",
            "power_usage",
        ] {
            assert!(entry.get(key).is_some(), "missing key {key}");
            assert!(!entry[key].is_null(), "null value for {key}");
        }
        assert_eq!(entry["temperature"].as_f64(), Some(0.0));
        assert_eq!(entry["power_usage"].as_f64(), Some(0.0));
    }

    #[test]
    fn names_with_quotes_stay_valid_json() {
        let mut snapshot = CollectionSnapshot::empty();
        snapshot.devices.push(device(0, "Radeon \"Pro\" \\ W7900"));
        let json = to_json(&snapshot).unwrap();
        let parsed = from_json(&json).unwrap();
        assert_eq!(parsed.gpus[0].name, "Radeon \"Pro\" \\ W7900");
    }

    #[test]
    fn parsing_preserves_counts_and_values() {
        let mut snapshot = CollectionSnapshot::empty();
        snapshot.devices.push(device(0, "GPU A"));
        snapshot.devices.push(device(1, "GPU B"));

        let parsed = from_json(&to_json(&snapshot).unwrap()).unwrap();
        assert_eq!(parsed, GpuPayload::from(&snapshot));
        assert_eq!(parsed.gpus[1].memory_total, 24_564_498_432);
        assert_eq!(parsed.gpus[1].power_usage, 350.5);
    }
}
