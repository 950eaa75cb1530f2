//! Normalized telemetry data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::{BackendKind, DeviceInfo, DeviceStats, GpuVendor};

/// One physical GPU's telemetry at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    /// Stable within a session only
    pub index: u32,
    pub name: String,
    pub vendor: GpuVendor,
    pub gpu_utilization_percent: u8,
    pub memory_utilization_percent: u8,
    pub memory_total_bytes: u64,
    pub memory_used_bytes: u64,
    pub memory_free_bytes: u64,
    /// `None` when the backend cannot read it (rendered as 0 on the wire)
    pub temperature_celsius: Option<f64>,
    /// Always watts, whatever the backend's native unit
    pub power_watts: Option<f64>,
}

impl DeviceSnapshot {
    /// Normalize raw backend readings into a snapshot.
    ///
    /// `name` has already been resolved through the name chain. Missing stats
    /// (a failed query) produce zeroed numeric fields.
    pub fn normalize(
        index: u32,
        name: String,
        vendor: GpuVendor,
        info: &DeviceInfo,
        stats: Option<&DeviceStats>,
    ) -> Self {
        let stats = stats.cloned().unwrap_or_default();

        let memory_total_bytes = stats
            .memory_total_bytes
            .or(info.memory_total_bytes)
            .unwrap_or(0);
        let memory_used_bytes = stats.memory_used_bytes.unwrap_or(0);

        Self {
            index,
            name,
            vendor,
            gpu_utilization_percent: clamp_percent(stats.gpu_utilization.unwrap_or(0.0)),
            memory_utilization_percent: memory_percent(memory_used_bytes, memory_total_bytes),
            memory_total_bytes,
            memory_used_bytes,
            memory_free_bytes: memory_total_bytes.saturating_sub(memory_used_bytes),
            temperature_celsius: stats.temperature_celsius.filter(|t| t.is_finite()),
            power_watts: stats
                .power
                .map(|p| p.to_watts())
                .filter(|w| w.is_finite() && *w >= 0.0),
        }
    }
}

/// Every enumerated device, in device-index order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    /// `None` when no backend is active
    pub source: Option<BackendKind>,
    pub captured_at: DateTime<Utc>,
    pub devices: Vec<DeviceSnapshot>,
}

impl CollectionSnapshot {
    pub fn empty() -> Self {
        Self {
            source: None,
            captured_at: Utc::now(),
            devices: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }
}

/// Truncate and clamp a raw percentage into 0-100. NaN maps to 0.
pub fn clamp_percent(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.trunc().clamp(0.0, 100.0) as u8
}

/// `used * 100 / total` (integer division), 0 when total is 0, capped at 100
pub fn memory_percent(used: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = (used as u128 * 100) / total as u128;
    percent.min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PowerReading;

    const GIB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn percentages_are_clamped() {
        assert_eq!(clamp_percent(-12.0), 0);
        assert_eq!(clamp_percent(154.7), 100);
        assert_eq!(clamp_percent(42.4), 42);
        assert_eq!(clamp_percent(41.6), 41);
        assert_eq!(clamp_percent(99.9), 99);
        assert_eq!(clamp_percent(-0.5), 0);
        assert_eq!(clamp_percent(f64::NAN), 0);
        assert_eq!(clamp_percent(f64::INFINITY), 100);
    }

    #[test]
    fn memory_percent_handles_zero_and_overflowing_inputs() {
        assert_eq!(memory_percent(10, 0), 0);
        assert_eq!(memory_percent(18_423_373_824, 24_564_498_432), 75);
        assert_eq!(memory_percent(3 * GIB, 2 * GIB), 100);
        assert_eq!(memory_percent(u64::MAX, u64::MAX), 100);
    }

    #[test]
    fn free_memory_never_underflows() {
        let info = DeviceInfo {
            name: None,
            memory_total_bytes: Some(2 * GIB),
        };
        let stats = DeviceStats {
            memory_used_bytes: Some(3 * GIB),
            ..Default::default()
        };
        let snap = DeviceSnapshot::normalize(0, "gpu".into(), GpuVendor::Amd, &info, Some(&stats));
        assert_eq!(snap.memory_free_bytes, 0);
        assert_eq!(snap.memory_utilization_percent, 100);
    }

    #[test]
    fn stats_total_wins_over_info_total() {
        let info = DeviceInfo {
            name: None,
            memory_total_bytes: Some(4 * GIB),
        };
        let stats = DeviceStats {
            gpu_utilization: Some(250.0),
            memory_used_bytes: Some(GIB),
            memory_total_bytes: Some(8 * GIB),
            temperature_celsius: Some(71.5),
            power: Some(PowerReading::Milliwatts(120_000.0)),
        };
        let snap =
            DeviceSnapshot::normalize(2, "gpu".into(), GpuVendor::Intel, &info, Some(&stats));
        assert_eq!(snap.memory_total_bytes, 8 * GIB);
        assert_eq!(snap.memory_free_bytes, 7 * GIB);
        assert_eq!(snap.memory_utilization_percent, 12);
        assert_eq!(snap.gpu_utilization_percent, 100);
        assert_eq!(snap.temperature_celsius, Some(71.5));
        assert_eq!(snap.power_watts, Some(120.0));
    }

    #[test]
    fn failed_stats_zero_the_numeric_fields() {
        let snap = DeviceSnapshot::normalize(
            1,
            "Unknown GPU".into(),
            GpuVendor::Nvidia,
            &DeviceInfo::default(),
            None,
        );
        assert_eq!(snap.gpu_utilization_percent, 0);
        assert_eq!(snap.memory_utilization_percent, 0);
        assert_eq!(snap.memory_total_bytes, 0);
        assert_eq!(snap.memory_used_bytes, 0);
        assert_eq!(snap.memory_free_bytes, 0);
        assert_eq!(snap.temperature_celsius, None);
        assert_eq!(snap.power_watts, None);
    }
}
