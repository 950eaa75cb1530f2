//! Concrete telemetry backends
//!
//! - `nvidia`: NVML
//! - `amd`: AMD GPU Services (AGS)
//! - `intel`: Intel Graphics Control Library (IGCL)
//! - `fallback`: OS performance counters

pub mod amd;
pub mod fallback;
pub mod intel;
pub mod nvidia;

use std::path::PathBuf;
use tracing::debug;

use crate::backend::{GpuBackend, GpuVendor};
use crate::config::{BackendConfig, FallbackConfig};
use crate::error::Result;
use crate::loader::candidate_paths;

pub use amd::AgsBackend;
pub use fallback::CounterBackend;
pub use intel::IgclBackend;
pub use nvidia::NvmlBackend;

/// Ordered library candidates for a vendor
pub fn vendor_candidates(vendor: GpuVendor, config: &BackendConfig) -> Vec<PathBuf> {
    let (env_var, defaults) = match vendor {
        GpuVendor::Nvidia => (nvidia::ENV_OVERRIDE, nvidia::DEFAULT_CANDIDATES),
        GpuVendor::Amd => (amd::ENV_OVERRIDE, amd::DEFAULT_CANDIDATES),
        GpuVendor::Intel => (intel::ENV_OVERRIDE, intel::DEFAULT_CANDIDATES),
    };
    candidate_paths(env_var, config.extra_paths(vendor), defaults)
}

/// Load, resolve and initialize one vendor SDK. Every failure releases what was acquired.
pub fn open_vendor(vendor: GpuVendor, config: &BackendConfig) -> Result<Box<dyn GpuBackend>> {
    let candidates = vendor_candidates(vendor, config);
    debug!("Probing {} SDK ({} candidate(s))", vendor, candidates.len());

    let mut backend: Box<dyn GpuBackend> = match vendor {
        GpuVendor::Nvidia => Box::new(NvmlBackend::load(&candidates)?),
        GpuVendor::Amd => Box::new(AgsBackend::load(&candidates)?),
        GpuVendor::Intel => Box::new(IgclBackend::load(&candidates)?),
    };
    backend.initialize()?;
    Ok(backend)
}

/// Open the OS counter fallback, including its warm-up sample
pub fn open_fallback(config: &FallbackConfig) -> Result<Box<dyn GpuBackend>> {
    let mut backend = CounterBackend::system(config);
    backend.initialize()?;
    Ok(Box::new(backend))
}
