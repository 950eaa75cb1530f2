//! Intel backend over the Intel Graphics Control Library (IGCL)
//!
//! IGCL keeps device info (name, total memory) and live stats in separate calls, and
//! reports power in milliwatts. Every entry point is mandatory.

use std::ffi::{c_char, c_int};
use std::path::PathBuf;
use tracing::{debug, info};

use super::nvidia::c_buffer_to_string;
use crate::backend::{BackendKind, DeviceInfo, DeviceStats, GpuBackend, GpuVendor, PowerReading};
use crate::error::{Result, TelemetryError};
use crate::loader::VendorLibrary;

type IgclResult = c_int;

const IGCL_SUCCESS: IgclResult = 0;

#[cfg(target_os = "windows")]
pub const DEFAULT_CANDIDATES: &[&str] = &[
    r"C:\Windows\System32\igcl64.dll",
    r"C:\Windows\SysWOW64\igcl32.dll",
    r"C:\Program Files\Intel\Intel(R) Graphics\igcl64.dll",
    r"C:\Program Files (x86)\Intel\Intel(R) Graphics\igcl32.dll",
    "igcl64.dll",
    "igcl32.dll",
];

#[cfg(not(target_os = "windows"))]
pub const DEFAULT_CANDIDATES: &[&str] = &[];

pub const ENV_OVERRIDE: &str = "GPU_TELEMETRY_IGCL_PATH";

#[allow(dead_code)]
#[repr(C)]
struct IgclDeviceInfo {
    device_id: u32,
    device_name: [c_char; 256],
    vendor_id: u32,
    total_memory: u64,
}

#[allow(dead_code)]
#[repr(C)]
#[derive(Default)]
struct IgclDeviceStats {
    gpu_utilization: u32,
    memory_utilization: u32,
    memory_used: u64,
    memory_total: u64,
    temperature: u32,
    power_usage: u32,
}

type InitFn = unsafe extern "C" fn() -> IgclResult;
type ShutdownFn = unsafe extern "C" fn() -> IgclResult;
type GetDeviceCountFn = unsafe extern "C" fn(*mut u32) -> IgclResult;
type GetDeviceInfoFn = unsafe extern "C" fn(u32, *mut IgclDeviceInfo) -> IgclResult;
type GetDeviceStatsFn = unsafe extern "C" fn(u32, *mut IgclDeviceStats) -> IgclResult;

struct IgclApi {
    init: InitFn,
    shutdown: ShutdownFn,
    get_device_count: GetDeviceCountFn,
    get_device_info: GetDeviceInfoFn,
    get_device_stats: GetDeviceStatsFn,
}

/// IGCL-backed telemetry
pub struct IgclBackend {
    api: IgclApi,
    library: VendorLibrary,
    initialized: bool,
}

impl IgclBackend {
    const KIND: BackendKind = BackendKind::Vendor(GpuVendor::Intel);

    /// Load IGCL and resolve every entry point
    pub fn load(candidates: &[PathBuf]) -> Result<Self> {
        let library = VendorLibrary::open("igcl", candidates)?;
        let api = unsafe {
            IgclApi {
                init: library.required(&["igcl_init"])?,
                shutdown: library.required(&["igcl_shutdown"])?,
                get_device_count: library.required(&["igcl_get_device_count"])?,
                get_device_info: library.required(&["igcl_get_device_info"])?,
                get_device_stats: library.required(&["igcl_get_device_stats"])?,
            }
        };
        Ok(Self {
            api,
            library,
            initialized: false,
        })
    }

    fn check(&self, index: Option<u32>, call: &'static str, code: IgclResult) -> Result<()> {
        if code == IGCL_SUCCESS {
            Ok(())
        } else {
            Err(TelemetryError::query(Self::KIND, index, call, code))
        }
    }

    fn ensure_initialized(&self, index: Option<u32>) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(TelemetryError::query(Self::KIND, index, "igcl (not initialized)", -1))
        }
    }
}

impl GpuBackend for IgclBackend {
    fn kind(&self) -> BackendKind {
        Self::KIND
    }

    fn vendor(&self) -> GpuVendor {
        GpuVendor::Intel
    }

    fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        let code = unsafe { (self.api.init)() };
        if code != IGCL_SUCCESS {
            self.shutdown();
            return Err(TelemetryError::SdkInitFailed {
                backend: Self::KIND,
                reason: format!("igcl_init returned {}", code),
            });
        }
        self.initialized = true;
        info!("IGCL initialized from {}", self.library.path().display());
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.initialized {
            let code = unsafe { (self.api.shutdown)() };
            if code != IGCL_SUCCESS {
                debug!("igcl_shutdown returned {}", code);
            }
            self.initialized = false;
        }
        self.library.close();
    }

    fn device_count(&mut self) -> Result<u32> {
        self.ensure_initialized(None)?;
        let mut count: u32 = 0;
        let code = unsafe { (self.api.get_device_count)(&mut count) };
        self.check(None, "igcl_get_device_count", code)?;
        Ok(count)
    }

    fn device_info(&mut self, index: u32) -> Result<DeviceInfo> {
        self.ensure_initialized(Some(index))?;
        let mut info = IgclDeviceInfo {
            device_id: 0,
            device_name: [0; 256],
            vendor_id: 0,
            total_memory: 0,
        };
        let code = unsafe { (self.api.get_device_info)(index, &mut info) };
        self.check(Some(index), "igcl_get_device_info", code)?;
        Ok(DeviceInfo {
            name: c_buffer_to_string(&info.device_name),
            memory_total_bytes: Some(info.total_memory),
        })
    }

    fn device_stats(&mut self, index: u32) -> Result<DeviceStats> {
        self.ensure_initialized(Some(index))?;
        let mut stats = IgclDeviceStats::default();
        let code = unsafe { (self.api.get_device_stats)(index, &mut stats) };
        self.check(Some(index), "igcl_get_device_stats", code)?;
        Ok(DeviceStats {
            gpu_utilization: Some(stats.gpu_utilization as f64),
            memory_used_bytes: Some(stats.memory_used),
            memory_total_bytes: (stats.memory_total > 0).then_some(stats.memory_total),
            temperature_celsius: Some(stats.temperature as f64),
            power: Some(PowerReading::Milliwatts(stats.power_usage as f64)),
        })
    }
}

impl Drop for IgclBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}
