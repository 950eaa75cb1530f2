//! Telemetry session: backend selection and snapshot aggregation
//!
//! A [`Telemetry`] session walks its [`BackendChain`] on `init`: each vendor tier in order,
//! then the counter fallback. The first backend that loads and initializes becomes active.
//! If none does the session is `Unavailable` and every query reports "no GPU telemetry".
//! `shutdown` releases the active backend and returns the session to `Uninitialized`.

use tracing::{debug, info, warn};

use crate::backend::{DeviceInfo, GpuBackend, GpuVendor};
use crate::backends;
use crate::config::TelemetryConfig;
use crate::error::{Result, TelemetryError};
use crate::os_device::{self, AdapterDescriptor};
use crate::snapshot::{clamp_percent, CollectionSnapshot, DeviceSnapshot};
use crate::wire;

/// Opens and initializes one backend tier
pub type BackendOpener = Box<dyn Fn(&TelemetryConfig) -> Result<Box<dyn GpuBackend>> + Send>;

/// Looks up the primary adapter in the OS device registry
pub type AdapterLookup = Box<dyn Fn() -> AdapterDescriptor + Send>;

/// Ordered backend tiers tried by `init`
pub struct BackendChain {
    vendors: Vec<(GpuVendor, BackendOpener)>,
    fallback: Option<BackendOpener>,
    registry: AdapterLookup,
}

impl BackendChain {
    /// An empty chain; `init` on it always ends `Unavailable`
    pub fn new() -> Self {
        Self {
            vendors: Vec::new(),
            fallback: None,
            registry: Box::new(os_device::primary_adapter),
        }
    }

    /// The real vendor SDKs in configured order, then the OS counter fallback if enabled
    pub fn system(config: &TelemetryConfig) -> Self {
        let mut chain = Self::new();
        for &vendor in &config.backends.order {
            if chain.vendors.iter().any(|(v, _)| *v == vendor) {
                continue;
            }
            chain = chain.vendor(
                vendor,
                Box::new(move |config: &TelemetryConfig| {
                    backends::open_vendor(vendor, &config.backends)
                }),
            );
        }
        if config.fallback.enabled {
            chain = chain.fallback(Box::new(|config: &TelemetryConfig| {
                backends::open_fallback(&config.fallback)
            }));
        }
        chain
    }

    pub fn vendor(mut self, vendor: GpuVendor, opener: BackendOpener) -> Self {
        self.vendors.push((vendor, opener));
        self
    }

    pub fn fallback(mut self, opener: BackendOpener) -> Self {
        self.fallback = Some(opener);
        self
    }

    /// Replace the OS registry lookup used for unnamed devices
    pub fn registry(mut self, lookup: AdapterLookup) -> Self {
        self.registry = lookup;
        self
    }

    /// Vendor tiers, in the order they are tried
    pub fn vendor_order(&self) -> Vec<GpuVendor> {
        self.vendors.iter().map(|(vendor, _)| *vendor).collect()
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

impl Default for BackendChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Backend-selection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    VendorActive(GpuVendor),
    FallbackActive,
    /// Every tier failed; terminal until the next `shutdown`/`init`
    Unavailable,
}

/// Result of `init`, as exposed over the C ABI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    /// No vendor library was found and the fallback could not open
    NoSdkFound = -1,
    /// A vendor library was present but failed to initialize, and the fallback could not open
    SdkInitFailed = -2,
}

impl StatusCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// One monitoring session over a single active backend
pub struct Telemetry {
    config: TelemetryConfig,
    chain: BackendChain,
    active: Option<Box<dyn GpuBackend>>,
    state: SessionState,
    // Registry name, looked up at most once per session
    registry_name: Option<Option<String>>,
}

impl Telemetry {
    /// A session over the real backends described by `config`
    pub fn new(config: TelemetryConfig) -> Self {
        let chain = BackendChain::system(&config);
        Self::with_chain(config, chain)
    }

    pub fn with_chain(config: TelemetryConfig, chain: BackendChain) -> Self {
        Self {
            config,
            chain,
            active: None,
            state: SessionState::Uninitialized,
            registry_name: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Select and initialize a backend. Calling it on an active session is a no-op.
    pub fn init(&mut self) -> StatusCode {
        match self.state {
            SessionState::VendorActive(_) | SessionState::FallbackActive => return StatusCode::Ok,
            SessionState::Unavailable => self.shutdown(),
            SessionState::Uninitialized => {}
        }

        let mut sdk_found = false;
        for (vendor, open) in &self.chain.vendors {
            match open(&self.config) {
                Ok(backend) => {
                    info!("Using {} backend", backend.kind());
                    self.state = SessionState::VendorActive(*vendor);
                    self.active = Some(backend);
                    return StatusCode::Ok;
                }
                Err(err) => {
                    sdk_found |= err.sdk_was_found();
                    debug!("{} tier unavailable: {}", vendor, err);
                }
            }
        }

        if let Some(open) = &self.chain.fallback {
            match open(&self.config) {
                Ok(backend) => {
                    info!("No vendor SDK available; using {} backend", backend.kind());
                    self.state = SessionState::FallbackActive;
                    self.active = Some(backend);
                    return StatusCode::Ok;
                }
                Err(err) => debug!("Fallback tier unavailable: {}", err),
            }
        }

        warn!("{}", TelemetryError::NoBackendAvailable);
        self.state = SessionState::Unavailable;
        if sdk_found {
            StatusCode::SdkInitFailed
        } else {
            StatusCode::NoSdkFound
        }
    }

    /// Release the active backend. Idempotent, and safe after a failed `init`.
    pub fn shutdown(&mut self) {
        if let Some(mut backend) = self.active.take() {
            backend.shutdown();
            debug!("{} backend shut down", backend.kind());
        }
        self.registry_name = None;
        self.state = SessionState::Uninitialized;
    }

    fn backend(&mut self) -> Result<&mut Box<dyn GpuBackend>> {
        self.active.as_mut().ok_or(TelemetryError::NoBackendAvailable)
    }

    pub fn device_count(&mut self) -> Result<u32> {
        self.backend()?.device_count()
    }

    /// Collect every device. Per-device query failures zero that device's fields;
    /// an inactive session or a failed count yields an empty collection.
    pub fn snapshot(&mut self) -> CollectionSnapshot {
        let mut snapshot = CollectionSnapshot::empty();
        let Some(backend) = self.active.as_mut() else {
            return snapshot;
        };
        snapshot.source = Some(backend.kind());
        let vendor = backend.vendor();

        let count = match backend.device_count() {
            Ok(count) => count,
            Err(err) => {
                warn!("Device enumeration failed: {}", err);
                return snapshot;
            }
        };

        let mut devices = Vec::new();
        for index in 0..count {
            let info = backend.device_info(index).unwrap_or_else(|err| {
                warn!("{}", err);
                DeviceInfo::default()
            });
            let stats = match backend.device_stats(index) {
                Ok(stats) => Some(stats),
                Err(err) => {
                    warn!("{}", err);
                    None
                }
            };
            devices.push((index, info, stats));
        }

        for (index, info, stats) in devices {
            let name = match info.name.clone() {
                Some(name) => name,
                None => self
                    .registry_name()
                    .unwrap_or_else(|| vendor.generic_device_name().to_string()),
            };
            snapshot.devices.push(DeviceSnapshot::normalize(
                index,
                name,
                vendor,
                &info,
                stats.as_ref(),
            ));
        }
        snapshot
    }

    fn registry_name(&mut self) -> Option<String> {
        if self.registry_name.is_none() {
            self.registry_name = Some((self.chain.registry)().name);
        }
        self.registry_name.clone().flatten()
    }

    /// Device 0 utilization, or `None` when there is no device or the query fails
    pub fn usage(&mut self) -> Option<u8> {
        let backend = self.active.as_mut()?;
        match backend.device_count() {
            Ok(0) => return None,
            Ok(_) => {}
            Err(err) => {
                warn!("Device enumeration failed: {}", err);
                return None;
            }
        }
        match backend.device_stats(0) {
            Ok(stats) => Some(clamp_percent(stats.gpu_utilization.unwrap_or(0.0))),
            Err(err) => {
                warn!("{}", err);
                None
            }
        }
    }

    /// The wire payload; `{"gpus":[]}` when no backend is active
    pub fn snapshot_json(&mut self) -> Result<String> {
        wire::to_json(&self.snapshot())
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
