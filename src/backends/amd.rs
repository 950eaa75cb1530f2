//! AMD backend over AMD GPU Services (AGS)
//!
//! AGS hands back the whole device table from `agsInitialize`, so `device_count` and
//! `device_info` are served from a copy taken at init. Live stats come from the optional
//! `agsGetGPUMemoryUsage` entry point and report power in watts.

use std::ffi::{c_char, c_int, c_void};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::nvidia::c_buffer_to_string;
use crate::backend::{BackendKind, DeviceInfo, DeviceStats, GpuBackend, GpuVendor, PowerReading};
use crate::error::{Result, TelemetryError};
use crate::loader::VendorLibrary;

const AGS_SUCCESS: c_int = 0;
/// API version passed to `agsInitialize`
const AGS_API_VERSION: c_int = 5;
/// Oldest library major version whose structure layouts match ours
const AGS_MIN_MAJOR: i32 = 5;

#[cfg(target_os = "windows")]
pub const DEFAULT_CANDIDATES: &[&str] = &[
    r"C:\Program Files\AMD\ags_lib\lib\amd_ags_x64.dll",
    r"C:\Program Files (x86)\AMD\ags_lib\lib\amd_ags_x86.dll",
    r"C:\Windows\System32\amd_ags_x64.dll",
    r"C:\Windows\SysWOW64\amd_ags_x86.dll",
    "amd_ags_x64.dll",
    "amd_ags_x86.dll",
];

#[cfg(not(target_os = "windows"))]
pub const DEFAULT_CANDIDATES: &[&str] = &[];

pub const ENV_OVERRIDE: &str = "GPU_TELEMETRY_AGS_PATH";

#[allow(dead_code)]
#[repr(C)]
struct AgsDeviceInfo {
    adapter_index: c_int,
    vendor_id: c_int,
    device_id: c_int,
    revision_id: c_int,
    adapter_string: [c_char; 256],
    num_cus: c_int,
    num_wgps: c_int,
    num_rops: c_int,
    local_memory_in_bytes: i64,
    shared_memory_in_bytes: i64,
    memory_bandwidth: c_int,
    tera_flops: f32,
}

#[allow(dead_code)]
#[repr(C)]
#[derive(Default)]
struct AgsGpuUsage {
    gpu_usage_percent: f32,
    memory_usage_percent: f32,
    memory_used_in_bytes: i64,
    temperature_in_c: f32,
    fan_speed_percent: f32,
    engine_clock_in_mhz: f32,
    memory_clock_in_mhz: f32,
    power_usage_in_watts: f32,
}

#[repr(C)]
struct AgsGpuInfo {
    num_devices: c_int,
    devices: *mut AgsDeviceInfo,
}

type AgsContext = *mut c_void;

type InitializeFn =
    unsafe extern "C" fn(c_int, *const c_void, *mut AgsContext, *mut AgsGpuInfo) -> c_int;
type DeInitializeFn = unsafe extern "C" fn(AgsContext) -> c_int;
type GetUsageFn = unsafe extern "C" fn(AgsContext, c_int, *mut AgsGpuUsage) -> c_int;
type GetVersionFn = unsafe extern "C" fn() -> c_int;

struct AgsApi {
    initialize: InitializeFn,
    deinitialize: DeInitializeFn,
    get_usage: Option<GetUsageFn>,
    get_version: Option<GetVersionFn>,
}

/// Adapter entry copied out of the AGS device table
#[derive(Debug, Clone)]
struct AgsAdapter {
    name: Option<String>,
    local_memory_bytes: u64,
}

/// AGS-backed telemetry
pub struct AgsBackend {
    api: AgsApi,
    library: VendorLibrary,
    context: AgsContext,
    adapters: Vec<AgsAdapter>,
}

// The AGS context is only touched through `&mut self`; the session serializes access.
unsafe impl Send for AgsBackend {}

/// Decode a packed `AGS_MAKE_VERSION` value (major << 22 | minor << 12 | patch)
pub fn decode_version(raw: i32) -> (i32, i32, i32) {
    if raw < (1 << 22) {
        // Older libraries return the bare major number.
        return (raw, 0, 0);
    }
    (raw >> 22, (raw >> 12) & 0x3ff, raw & 0xfff)
}

/// Reject libraries older than the 5.x `AGSGPUInfo` layout and negative version codes
pub fn check_version(raw: i32) -> Result<()> {
    if raw < 0 {
        return Err(TelemetryError::SdkInitFailed {
            backend: AgsBackend::KIND,
            reason: format!("agsGetVersionNumber returned {}", raw),
        });
    }
    let (major, minor, patch) = decode_version(raw);
    debug!("AGS library reports version {}.{}.{}", major, minor, patch);
    if major < AGS_MIN_MAJOR {
        return Err(TelemetryError::SdkInitFailed {
            backend: AgsBackend::KIND,
            reason: format!(
                "AGS {}.{}.{} is older than the supported {}.x layout",
                major, minor, patch, AGS_MIN_MAJOR
            ),
        });
    }
    Ok(())
}

impl AgsBackend {
    const KIND: BackendKind = BackendKind::Vendor(GpuVendor::Amd);

    /// Load AGS and resolve its entry points
    pub fn load(candidates: &[PathBuf]) -> Result<Self> {
        let library = VendorLibrary::open("ags", candidates)?;
        let api = unsafe {
            AgsApi {
                initialize: library.required(&["agsInitialize"])?,
                deinitialize: library.required(&["agsDeInitialize"])?,
                get_usage: library.optional(&["agsGetGPUMemoryUsage"]),
                get_version: library.optional(&["agsGetVersionNumber"]),
            }
        };
        Ok(Self {
            api,
            library,
            context: std::ptr::null_mut(),
            adapters: Vec::new(),
        })
    }

    fn initialized(&self) -> bool {
        !self.context.is_null()
    }

    fn probe_version(&self) -> Result<()> {
        let Some(get_version) = self.api.get_version else {
            debug!("agsGetVersionNumber absent; assuming API version {}", AGS_API_VERSION);
            return Ok(());
        };

        check_version(unsafe { get_version() })
    }

    fn adapter(&self, index: u32) -> Result<&AgsAdapter> {
        if !self.initialized() {
            return Err(TelemetryError::query(Self::KIND, Some(index), "ags (not initialized)", -1));
        }
        self.adapters
            .get(index as usize)
            .ok_or_else(|| TelemetryError::query(Self::KIND, Some(index), "ags device lookup", -2))
    }
}

/// Copy the device table AGS owns into Rust values
unsafe fn copy_adapters(info: &AgsGpuInfo) -> Vec<AgsAdapter> {
    if info.devices.is_null() || info.num_devices <= 0 {
        return Vec::new();
    }
    std::slice::from_raw_parts(info.devices, info.num_devices as usize)
        .iter()
        .map(|device| AgsAdapter {
            name: c_buffer_to_string(&device.adapter_string),
            local_memory_bytes: device.local_memory_in_bytes.max(0) as u64,
        })
        .collect()
}

impl GpuBackend for AgsBackend {
    fn kind(&self) -> BackendKind {
        Self::KIND
    }

    fn vendor(&self) -> GpuVendor {
        GpuVendor::Amd
    }

    fn initialize(&mut self) -> Result<()> {
        if self.initialized() {
            return Ok(());
        }

        if let Err(err) = self.probe_version() {
            self.shutdown();
            return Err(err);
        }

        let mut context: AgsContext = std::ptr::null_mut();
        let mut info = AgsGpuInfo {
            num_devices: 0,
            devices: std::ptr::null_mut(),
        };
        let code = unsafe {
            (self.api.initialize)(AGS_API_VERSION, std::ptr::null(), &mut context, &mut info)
        };
        if code != AGS_SUCCESS || context.is_null() {
            self.shutdown();
            return Err(TelemetryError::SdkInitFailed {
                backend: Self::KIND,
                reason: format!("agsInitialize returned {}", code),
            });
        }

        self.context = context;
        self.adapters = unsafe { copy_adapters(&info) };
        info!(
            "AGS initialized from {} ({} adapter(s))",
            self.library.path().display(),
            self.adapters.len()
        );
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.initialized() {
            let code = unsafe { (self.api.deinitialize)(self.context) };
            if code != AGS_SUCCESS {
                warn!("agsDeInitialize returned {}", code);
            }
            self.context = std::ptr::null_mut();
            self.adapters.clear();
        }
        self.library.close();
    }

    fn device_count(&mut self) -> Result<u32> {
        if !self.initialized() {
            return Err(TelemetryError::query(Self::KIND, None, "ags (not initialized)", -1));
        }
        Ok(self.adapters.len() as u32)
    }

    fn device_info(&mut self, index: u32) -> Result<DeviceInfo> {
        let adapter = self.adapter(index)?;
        Ok(DeviceInfo {
            name: adapter.name.clone(),
            memory_total_bytes: Some(adapter.local_memory_bytes),
        })
    }

    fn device_stats(&mut self, index: u32) -> Result<DeviceStats> {
        let total = self.adapter(index)?.local_memory_bytes;
        let Some(get_usage) = self.api.get_usage else {
            return Err(TelemetryError::query(
                Self::KIND,
                Some(index),
                "agsGetGPUMemoryUsage (unavailable)",
                -1,
            ));
        };

        let mut usage = AgsGpuUsage::default();
        let code = unsafe { get_usage(self.context, index as c_int, &mut usage) };
        if code != AGS_SUCCESS {
            return Err(TelemetryError::query(
                Self::KIND,
                Some(index),
                "agsGetGPUMemoryUsage",
                code,
            ));
        }

        Ok(DeviceStats {
            gpu_utilization: Some(usage.gpu_usage_percent as f64),
            memory_used_bytes: Some(usage.memory_used_in_bytes.max(0) as u64),
            memory_total_bytes: Some(total),
            temperature_celsius: Some(usage.temperature_in_c as f64),
            power: Some(PowerReading::Watts(usage.power_usage_in_watts as f64)),
        })
    }
}

impl Drop for AgsBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_versions_decode() {
        let packed = (6 << 22) | (2 << 12) | 1;
        assert_eq!(decode_version(packed), (6, 2, 1));
        assert_eq!(decode_version(5), (5, 0, 0));
    }

    #[test]
    fn versions_below_five_are_rejected() {
        for raw in [(4 << 22) | (6 << 12), 4, -1, i32::MIN] {
            assert!(
                matches!(check_version(raw), Err(TelemetryError::SdkInitFailed { .. })),
                "raw version {} accepted",
                raw
            );
        }
        for raw in [5 << 22, 5, (6 << 22) | (2 << 12) | 1] {
            assert!(check_version(raw).is_ok(), "raw version {} rejected", raw);
        }
    }

    #[test]
    fn device_table_is_copied_out() {
        let mut name = [0 as c_char; 256];
        for (slot, byte) in name.iter_mut().zip(b"AMD Radeon RX 7900 XTX") {
            *slot = *byte as c_char;
        }
        let mut devices = vec![AgsDeviceInfo {
            adapter_index: 0,
            vendor_id: 0x1002,
            device_id: 0x744c,
            revision_id: 0,
            adapter_string: name,
            num_cus: 96,
            num_wgps: 48,
            num_rops: 192,
            local_memory_in_bytes: 24 * 1024 * 1024 * 1024,
            shared_memory_in_bytes: 0,
            memory_bandwidth: 960,
            tera_flops: 61.4,
        }];
        let info = AgsGpuInfo {
            num_devices: 1,
            devices: devices.as_mut_ptr(),
        };

        let adapters = unsafe { copy_adapters(&info) };
        assert_eq!(adapters.len(), 1);
        assert_eq!(adapters[0].name.as_deref(), Some("AMD Radeon RX 7900 XTX"));
        assert_eq!(adapters[0].local_memory_bytes, 24 * 1024 * 1024 * 1024);

        let empty = AgsGpuInfo {
            num_devices: 3,
            devices: std::ptr::null_mut(),
        };
        assert!(unsafe { copy_adapters(&empty) }.is_empty());
    }

    #[test]
    fn absent_library_fails_cleanly() {
        let result = AgsBackend::load(&[PathBuf::from("/nonexistent/amd/amd_ags_x64.dll")]);
        assert!(matches!(result, Err(TelemetryError::LibraryNotFound { .. })));
    }
}
