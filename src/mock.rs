//! Scripted backend and counter source for tests
//!
//! `MockBackend` acquires a fake native handle when constructed (like a loaded library) and
//! releases it on `shutdown`, so handle leaks across init/shutdown cycles are observable
//! through a shared [`HandleCounter`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::backend::{BackendKind, DeviceInfo, DeviceStats, GpuBackend, GpuVendor};
use crate::counters::{CounterSample, CounterSource};
use crate::error::{Result, TelemetryError};

/// Live fake handles, shared between a test and the mocks it creates
#[derive(Debug, Clone, Default)]
pub struct HandleCounter {
    live: Arc<AtomicUsize>,
    acquired: Arc<AtomicUsize>,
}

impl HandleCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles currently held
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Handles ever acquired
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    fn acquire(&self) {
        self.live.fetch_add(1, Ordering::SeqCst);
        self.acquired.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One scripted device
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    pub info: DeviceInfo,
    /// `None` makes `device_stats` fail for this device
    pub stats: Option<DeviceStats>,
    pub fail_info: bool,
}

impl MockDevice {
    pub fn named(name: &str) -> Self {
        Self {
            info: DeviceInfo {
                name: Some(name.to_string()),
                memory_total_bytes: None,
            },
            stats: Some(DeviceStats::default()),
            fail_info: false,
        }
    }

    pub fn with_stats(mut self, stats: DeviceStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn failing_stats(mut self) -> Self {
        self.stats = None;
        self
    }

    /// `device_info` fails for this device; stats are unaffected
    pub fn failing_info(mut self) -> Self {
        self.fail_info = true;
        self
    }
}

/// Where a scripted backend should fail
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MockFailure {
    #[default]
    None,
    /// `initialize` fails as if the SDK init routine returned an error
    Init,
    /// `device_count` fails
    Count,
}

pub struct MockBackend {
    kind: BackendKind,
    vendor: GpuVendor,
    devices: Vec<MockDevice>,
    failure: MockFailure,
    handles: HandleCounter,
    holding: bool,
    initialized: bool,
}

impl MockBackend {
    pub fn vendor(vendor: GpuVendor, handles: &HandleCounter) -> Self {
        Self::build(BackendKind::Vendor(vendor), vendor, handles)
    }

    pub fn fallback(vendor: GpuVendor, handles: &HandleCounter) -> Self {
        Self::build(BackendKind::Fallback, vendor, handles)
    }

    fn build(kind: BackendKind, vendor: GpuVendor, handles: &HandleCounter) -> Self {
        handles.acquire();
        Self {
            kind,
            vendor,
            devices: Vec::new(),
            failure: MockFailure::None,
            handles: handles.clone(),
            holding: true,
            initialized: false,
        }
    }

    pub fn with_device(mut self, device: MockDevice) -> Self {
        self.devices.push(device);
        self
    }

    pub fn failing(mut self, failure: MockFailure) -> Self {
        self.failure = failure;
        self
    }

    fn device(&self, index: u32, call: &'static str) -> Result<&MockDevice> {
        if !self.initialized {
            return Err(TelemetryError::query(self.kind, Some(index), call, -1));
        }
        self.devices
            .get(index as usize)
            .ok_or_else(|| TelemetryError::query(self.kind, Some(index), call, -2))
    }
}

impl GpuBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn vendor(&self) -> GpuVendor {
        self.vendor
    }

    fn initialize(&mut self) -> Result<()> {
        if self.failure == MockFailure::Init {
            self.shutdown();
            return Err(TelemetryError::SdkInitFailed {
                backend: self.kind,
                reason: "scripted init failure".to_string(),
            });
        }
        self.initialized = true;
        Ok(())
    }

    fn shutdown(&mut self) {
        self.initialized = false;
        if self.holding {
            self.holding = false;
            self.handles.release();
        }
    }

    fn device_count(&mut self) -> Result<u32> {
        if !self.initialized || self.failure == MockFailure::Count {
            return Err(TelemetryError::query(self.kind, None, "mock_device_count", -1));
        }
        Ok(self.devices.len() as u32)
    }

    fn device_info(&mut self, index: u32) -> Result<DeviceInfo> {
        let device = self.device(index, "mock_device_info")?;
        if device.fail_info {
            return Err(TelemetryError::query(self.kind, Some(index), "mock_device_info", 3));
        }
        Ok(device.info.clone())
    }

    fn device_stats(&mut self, index: u32) -> Result<DeviceStats> {
        let kind = self.kind;
        self.device(index, "mock_device_stats")?
            .stats
            .clone()
            .ok_or_else(|| TelemetryError::query(kind, Some(index), "mock_device_stats", 999))
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Counter source replaying scripted utilization readings; the last one repeats
pub struct ScriptedCounters {
    readings: VecDeque<f64>,
    memory_used_bytes: Option<u64>,
    handles: HandleCounter,
}

impl ScriptedCounters {
    pub fn open(readings: &[f64], memory_used_bytes: Option<u64>, handles: &HandleCounter) -> Self {
        handles.acquire();
        Self {
            readings: readings.iter().copied().collect(),
            memory_used_bytes,
            handles: handles.clone(),
        }
    }
}

impl CounterSource for ScriptedCounters {
    fn collect(&mut self) -> Result<CounterSample> {
        let reading = if self.readings.len() > 1 {
            self.readings.pop_front()
        } else {
            self.readings.front().copied()
        };
        Ok(CounterSample {
            utilization_percent: reading,
            memory_used_bytes: self.memory_used_bytes,
            memory_total_bytes: None,
        })
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

impl Drop for ScriptedCounters {
    fn drop(&mut self) {
        self.handles.release();
    }
}
