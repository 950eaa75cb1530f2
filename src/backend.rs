//! Backend capability set
//!
//! Every source of GPU telemetry (one per vendor SDK, plus the OS counter fallback)
//! implements [`GpuBackend`]. Backends report raw values in their native units; the
//! aggregator owns normalization.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// GPU vendor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
}

impl std::fmt::Display for GpuVendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuVendor::Nvidia => write!(f, "NVIDIA"),
            GpuVendor::Amd => write!(f, "AMD"),
            GpuVendor::Intel => write!(f, "Intel"),
        }
    }
}

impl GpuVendor {
    /// All vendors, in default probing order
    pub const ALL: [GpuVendor; 3] = [GpuVendor::Nvidia, GpuVendor::Amd, GpuVendor::Intel];

    /// Guess the vendor from an adapter description (e.g. a registry `DriverDesc`)
    pub fn from_name(name: &str) -> Option<Self> {
        if name.contains("NVIDIA")
            || name.contains("GeForce")
            || name.contains("RTX")
            || name.contains("GTX")
            || name.contains("Quadro")
        {
            Some(GpuVendor::Nvidia)
        } else if name.contains("AMD") || name.contains("Radeon") {
            Some(GpuVendor::Amd)
        } else if name.contains("Intel")
            || name.contains("Arc")
            || name.contains("Iris")
            || name.contains("UHD")
        {
            Some(GpuVendor::Intel)
        } else {
            None
        }
    }

    /// Map a PCI vendor id (`0x10de`, `0x1002`, `0x8086`) to a vendor
    pub fn from_pci_vendor_id(id: &str) -> Option<Self> {
        match id.trim().to_ascii_lowercase().as_str() {
            "0x10de" => Some(GpuVendor::Nvidia),
            "0x1002" => Some(GpuVendor::Amd),
            "0x8086" => Some(GpuVendor::Intel),
            _ => None,
        }
    }

    /// Last-resort device name when neither the SDK nor the OS registry provides one
    pub fn generic_device_name(&self) -> &'static str {
        match self {
            GpuVendor::Nvidia => "Unknown GPU",
            GpuVendor::Amd => "AMD Graphics Card",
            GpuVendor::Intel => "Intel Integrated Graphics",
        }
    }
}

/// Which tier produced the telemetry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Vendor(GpuVendor),
    Fallback,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Vendor(vendor) => write!(f, "{}", vendor),
            BackendKind::Fallback => write!(f, "performance counter"),
        }
    }
}

/// Power draw as reported by the backend, before normalization
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PowerReading {
    Milliwatts(f64),
    Watts(f64),
}

impl PowerReading {
    pub fn to_watts(self) -> f64 {
        match self {
            PowerReading::Milliwatts(mw) => mw / 1000.0,
            PowerReading::Watts(w) => w,
        }
    }
}

/// Mostly-static description of one device
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceInfo {
    pub name: Option<String>,
    pub memory_total_bytes: Option<u64>,
}

/// Live readings for one device. Values are raw: percentages may fall outside 0-100.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceStats {
    pub gpu_utilization: Option<f64>,
    pub memory_used_bytes: Option<u64>,
    /// Some SDKs bundle the total with live stats; preferred over [`DeviceInfo`] when present
    pub memory_total_bytes: Option<u64>,
    pub temperature_celsius: Option<f64>,
    pub power: Option<PowerReading>,
}

/// Uniform capability set implemented by every telemetry backend.
///
/// `shutdown` must be idempotent and safe after a failed `initialize`. Implementations
/// also call it from `Drop`, so native resources are released on every path.
pub trait GpuBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Vendor attributed to every device this backend reports
    fn vendor(&self) -> GpuVendor;

    fn initialize(&mut self) -> Result<()>;

    fn shutdown(&mut self);

    fn device_count(&mut self) -> Result<u32>;

    fn device_info(&mut self, index: u32) -> Result<DeviceInfo>;

    fn device_stats(&mut self, index: u32) -> Result<DeviceStats>;
}
