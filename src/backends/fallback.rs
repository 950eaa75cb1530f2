//! Vendor-independent backend over OS performance counters
//!
//! Used only when no vendor SDK initializes. It cannot enumerate adapters, so it always
//! reports exactly one device, and supplies utilization and memory usage only. Total
//! memory falls back to a static estimate when the counters do not expose it.

use std::time::Duration;
use sysinfo::System;
use tracing::{debug, info};

use crate::backend::{BackendKind, DeviceInfo, DeviceStats, GpuBackend, GpuVendor};
use crate::config::FallbackConfig;
use crate::counters::{self, CounterSource};
use crate::error::{Result, TelemetryError};
use crate::os_device::{self, AdapterDescriptor};

/// Estimated dedicated memory for AMD adapters when nothing better is known
pub const AMD_ESTIMATED_MEMORY_BYTES: u64 = 8 * 1024 * 1024 * 1024;
/// Integrated adapters are assumed to carve out this fraction (1/N) of system memory
pub const INTEGRATED_SHARE_DIVISOR: u64 = 8;

type CounterOpener =
    Box<dyn Fn(Option<GpuVendor>, Duration) -> Result<Box<dyn CounterSource>> + Send>;

/// Static total-memory estimate for a vendor
pub fn estimated_memory_total(vendor: GpuVendor, system_memory_bytes: u64) -> u64 {
    match vendor {
        GpuVendor::Intel => system_memory_bytes / INTEGRATED_SHARE_DIVISOR,
        GpuVendor::Amd => AMD_ESTIMATED_MEMORY_BYTES,
        GpuVendor::Nvidia => 0,
    }
}

/// Performance-counter telemetry for the primary adapter
pub struct CounterBackend {
    adapter: AdapterDescriptor,
    vendor: GpuVendor,
    warmup: Duration,
    opener: CounterOpener,
    counters: Option<Box<dyn CounterSource>>,
    system_memory_bytes: u64,
}

impl CounterBackend {
    /// Fallback over the platform's own counters and adapter registry
    pub fn system(config: &FallbackConfig) -> Self {
        Self::with_opener(
            os_device::primary_adapter(),
            config,
            Box::new(counters::open_system_counters),
        )
    }

    pub fn with_opener(
        adapter: AdapterDescriptor,
        config: &FallbackConfig,
        opener: CounterOpener,
    ) -> Self {
        let vendor = adapter
            .vendor
            .or(config.vendor_hint)
            .unwrap_or(GpuVendor::Intel);
        Self {
            adapter,
            vendor,
            warmup: Duration::from_millis(config.warmup_ms),
            opener,
            counters: None,
            system_memory_bytes: 0,
        }
    }

    fn device_name(&self) -> String {
        self.adapter
            .name
            .clone()
            .unwrap_or_else(|| self.vendor.generic_device_name().to_string())
    }

    fn check_index(&self, index: u32) -> Result<()> {
        if index == 0 {
            Ok(())
        } else {
            Err(TelemetryError::query(
                BackendKind::Fallback,
                Some(index),
                "counter device lookup",
                -2,
            ))
        }
    }

    fn estimated_total(&self) -> u64 {
        estimated_memory_total(self.vendor, self.system_memory_bytes)
    }
}

impl GpuBackend for CounterBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Fallback
    }

    fn vendor(&self) -> GpuVendor {
        self.vendor
    }

    fn initialize(&mut self) -> Result<()> {
        if self.counters.is_some() {
            return Ok(());
        }

        let counters = (self.opener)(Some(self.vendor), self.warmup)?;
        info!(
            "Using performance counters for {} ({})",
            self.device_name(),
            counters.describe()
        );

        let mut sys = System::new();
        sys.refresh_memory();
        self.system_memory_bytes = sys.total_memory();

        self.counters = Some(counters);
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.counters.take().is_some() {
            debug!("Performance counter query closed");
        }
    }

    fn device_count(&mut self) -> Result<u32> {
        Ok(1)
    }

    fn device_info(&mut self, index: u32) -> Result<DeviceInfo> {
        self.check_index(index)?;
        Ok(DeviceInfo {
            name: Some(self.device_name()),
            memory_total_bytes: Some(self.estimated_total()),
        })
    }

    fn device_stats(&mut self, index: u32) -> Result<DeviceStats> {
        self.check_index(index)?;
        let estimated_total = self.estimated_total();
        let counters = self.counters.as_mut().ok_or_else(|| {
            TelemetryError::query(BackendKind::Fallback, Some(index), "counters (not open)", -1)
        })?;

        let sample = counters.collect()?;
        Ok(DeviceStats {
            gpu_utilization: sample.utilization_percent,
            memory_used_bytes: sample.memory_used_bytes,
            memory_total_bytes: sample.memory_total_bytes.or(Some(estimated_total)),
            temperature_celsius: None,
            power: None,
        })
    }
}

impl Drop for CounterBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}
