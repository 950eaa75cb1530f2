//! OS performance counter sources used by the fallback backend

#[cfg(target_os = "windows")]
pub mod pdh;
#[cfg(target_os = "linux")]
pub mod sysfs;

use std::time::Duration;

use crate::backend::GpuVendor;
use crate::error::Result;

/// One reading from the OS counters. Anything the OS does not expose is `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CounterSample {
    pub utilization_percent: Option<f64>,
    pub memory_used_bytes: Option<u64>,
    pub memory_total_bytes: Option<u64>,
}

/// An open counter query. Closing happens on drop.
pub trait CounterSource: Send {
    /// Collect a fresh sample
    fn collect(&mut self) -> Result<CounterSample>;

    /// The counter paths that were accepted, for logging
    fn describe(&self) -> String;
}

/// Open the platform's GPU counters, including the warm-up sample
pub fn open_system_counters(
    vendor_hint: Option<GpuVendor>,
    warmup: Duration,
) -> Result<Box<dyn CounterSource>> {
    #[cfg(target_os = "windows")]
    {
        Ok(Box::new(pdh::PdhGpuCounters::open(vendor_hint, warmup)?))
    }

    #[cfg(target_os = "linux")]
    {
        let _ = vendor_hint;
        Ok(Box::new(sysfs::DrmSysfsCounters::open(
            std::path::Path::new(crate::os_device::DRM_ROOT),
            warmup,
        )?))
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux")))]
    {
        let _ = (vendor_hint, warmup);
        Err(crate::error::TelemetryError::CounterUnavailable(
            "no GPU performance counters on this platform".to_string(),
        ))
    }
}
