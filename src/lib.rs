//! Multi-vendor GPU telemetry
//!
//! Vendor SDKs (NVML, AGS, IGCL) are loaded at runtime, so the crate builds and runs on
//! machines that have none of them. When no SDK initializes, OS performance counters
//! provide a single-device approximation.
//!
//! ```no_run
//! use gpu_telemetry::{Telemetry, TelemetryConfig};
//!
//! let mut telemetry = Telemetry::new(TelemetryConfig::default());
//! telemetry.init();
//! println!("{}", telemetry.snapshot_json().unwrap_or_default());
//! telemetry.shutdown();
//! ```

pub mod backend;
pub mod backends;
pub mod config;
pub mod counters;
pub mod error;
pub mod ffi;
pub mod loader;
pub mod logging;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod os_device;
pub mod snapshot;
pub mod telemetry;
pub mod wire;

pub use backend::{BackendKind, DeviceInfo, DeviceStats, GpuBackend, GpuVendor, PowerReading};
pub use config::TelemetryConfig;
pub use error::{Result, TelemetryError};
pub use snapshot::{CollectionSnapshot, DeviceSnapshot};
pub use telemetry::{BackendChain, SessionState, StatusCode, Telemetry};
