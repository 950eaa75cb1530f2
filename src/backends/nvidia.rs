//! NVIDIA backend over NVML
//!
//! NVML splits enumeration into handle lookup plus one call per metric. Utilization and
//! memory are mandatory; temperature and power (milliwatts) are optional entry points.

use std::ffi::{c_char, c_int, c_uint, c_ulonglong, c_void};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::backend::{BackendKind, DeviceInfo, DeviceStats, GpuBackend, GpuVendor, PowerReading};
use crate::error::{Result, TelemetryError};
use crate::loader::VendorLibrary;

type NvmlReturn = c_int;
type NvmlDevice = *mut c_void;

const NVML_SUCCESS: NvmlReturn = 0;
const NVML_TEMPERATURE_GPU: c_int = 0;
const NAME_BUFFER_LEN: usize = 256;

#[cfg(target_os = "windows")]
pub const DEFAULT_CANDIDATES: &[&str] = &[
    r"C:\Program Files\NVIDIA Corporation\NVSMI\nvml.dll",
    r"C:\Windows\System32\nvml.dll",
    "nvml.dll",
];

#[cfg(not(target_os = "windows"))]
pub const DEFAULT_CANDIDATES: &[&str] = &["libnvidia-ml.so.1", "libnvidia-ml.so"];

pub const ENV_OVERRIDE: &str = "GPU_TELEMETRY_NVML_PATH";

// Layouts mirror nvmlUtilization_t / nvmlMemory_t; some fields are only written by NVML.
#[allow(dead_code)]
#[repr(C)]
#[derive(Default)]
struct NvmlUtilization {
    gpu: c_uint,
    memory: c_uint,
}

#[allow(dead_code)]
#[repr(C)]
#[derive(Default)]
struct NvmlMemory {
    total: c_ulonglong,
    free: c_ulonglong,
    used: c_ulonglong,
}

type InitFn = unsafe extern "C" fn() -> NvmlReturn;
type ShutdownFn = unsafe extern "C" fn() -> NvmlReturn;
type GetCountFn = unsafe extern "C" fn(*mut c_uint) -> NvmlReturn;
type GetHandleFn = unsafe extern "C" fn(c_uint, *mut NvmlDevice) -> NvmlReturn;
type GetNameFn = unsafe extern "C" fn(NvmlDevice, *mut c_char, c_uint) -> NvmlReturn;
type GetUtilizationFn = unsafe extern "C" fn(NvmlDevice, *mut NvmlUtilization) -> NvmlReturn;
type GetMemoryFn = unsafe extern "C" fn(NvmlDevice, *mut NvmlMemory) -> NvmlReturn;
type GetTemperatureFn = unsafe extern "C" fn(NvmlDevice, c_int, *mut c_uint) -> NvmlReturn;
type GetPowerFn = unsafe extern "C" fn(NvmlDevice, *mut c_uint) -> NvmlReturn;

struct NvmlApi {
    init: InitFn,
    shutdown: ShutdownFn,
    get_count: GetCountFn,
    get_handle: GetHandleFn,
    get_name: GetNameFn,
    get_utilization: GetUtilizationFn,
    get_memory: GetMemoryFn,
    get_temperature: Option<GetTemperatureFn>,
    get_power: Option<GetPowerFn>,
}

impl NvmlApi {
    unsafe fn resolve(library: &VendorLibrary) -> Result<Self> {
        Ok(Self {
            init: library.required(&["nvmlInit_v2", "nvmlInit"])?,
            shutdown: library.required(&["nvmlShutdown"])?,
            get_count: library.required(&["nvmlDeviceGetCount_v2", "nvmlDeviceGetCount"])?,
            get_handle: library.required(&[
                "nvmlDeviceGetHandleByIndex_v2",
                "nvmlDeviceGetHandleByIndex",
            ])?,
            get_name: library.required(&["nvmlDeviceGetName"])?,
            get_utilization: library.required(&["nvmlDeviceGetUtilizationRates"])?,
            get_memory: library.required(&["nvmlDeviceGetMemoryInfo"])?,
            get_temperature: library.optional(&["nvmlDeviceGetTemperature"]),
            get_power: library.optional(&["nvmlDeviceGetPowerUsage"]),
        })
    }
}

/// NVML-backed telemetry
pub struct NvmlBackend {
    api: NvmlApi,
    library: VendorLibrary,
    initialized: bool,
}

impl NvmlBackend {
    const KIND: BackendKind = BackendKind::Vendor(GpuVendor::Nvidia);

    /// Load NVML and resolve every required entry point
    pub fn load(candidates: &[PathBuf]) -> Result<Self> {
        let library = VendorLibrary::open("nvml", candidates)?;
        // On error `library` drops here and the module is released.
        let api = unsafe { NvmlApi::resolve(&library)? };
        Ok(Self {
            api,
            library,
            initialized: false,
        })
    }

    fn handle(&self, index: u32) -> Result<NvmlDevice> {
        self.ensure_initialized(Some(index))?;
        let mut device: NvmlDevice = std::ptr::null_mut();
        let code = unsafe { (self.api.get_handle)(index, &mut device) };
        if code != NVML_SUCCESS {
            return Err(TelemetryError::query(
                Self::KIND,
                Some(index),
                "nvmlDeviceGetHandleByIndex",
                code,
            ));
        }
        Ok(device)
    }

    fn ensure_initialized(&self, index: Option<u32>) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(TelemetryError::query(Self::KIND, index, "nvml (not initialized)", -1))
        }
    }
}

impl GpuBackend for NvmlBackend {
    fn kind(&self) -> BackendKind {
        Self::KIND
    }

    fn vendor(&self) -> GpuVendor {
        GpuVendor::Nvidia
    }

    fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        let code = unsafe { (self.api.init)() };
        if code != NVML_SUCCESS {
            self.shutdown();
            return Err(TelemetryError::SdkInitFailed {
                backend: Self::KIND,
                reason: format!("nvmlInit returned {}", code),
            });
        }
        self.initialized = true;
        info!("NVML initialized from {}", self.library.path().display());
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.initialized {
            let code = unsafe { (self.api.shutdown)() };
            if code != NVML_SUCCESS {
                debug!("nvmlShutdown returned {}", code);
            }
            self.initialized = false;
        }
        self.library.close();
    }

    fn device_count(&mut self) -> Result<u32> {
        self.ensure_initialized(None)?;
        let mut count: c_uint = 0;
        let code = unsafe { (self.api.get_count)(&mut count) };
        if code != NVML_SUCCESS {
            return Err(TelemetryError::query(Self::KIND, None, "nvmlDeviceGetCount", code));
        }
        Ok(count)
    }

    fn device_info(&mut self, index: u32) -> Result<DeviceInfo> {
        let device = self.handle(index)?;
        let mut buffer = [0 as c_char; NAME_BUFFER_LEN];
        let code =
            unsafe { (self.api.get_name)(device, buffer.as_mut_ptr(), NAME_BUFFER_LEN as c_uint) };
        if code != NVML_SUCCESS {
            return Err(TelemetryError::query(Self::KIND, Some(index), "nvmlDeviceGetName", code));
        }
        Ok(DeviceInfo {
            name: c_buffer_to_string(&buffer),
            memory_total_bytes: None,
        })
    }

    fn device_stats(&mut self, index: u32) -> Result<DeviceStats> {
        let device = self.handle(index)?;

        let mut utilization = NvmlUtilization::default();
        let code = unsafe { (self.api.get_utilization)(device, &mut utilization) };
        if code != NVML_SUCCESS {
            return Err(TelemetryError::query(
                Self::KIND,
                Some(index),
                "nvmlDeviceGetUtilizationRates",
                code,
            ));
        }

        let mut memory = NvmlMemory::default();
        let code = unsafe { (self.api.get_memory)(device, &mut memory) };
        if code != NVML_SUCCESS {
            return Err(TelemetryError::query(
                Self::KIND,
                Some(index),
                "nvmlDeviceGetMemoryInfo",
                code,
            ));
        }

        let temperature = self.api.get_temperature.and_then(|get_temperature| {
            let mut celsius: c_uint = 0;
            let code = unsafe { get_temperature(device, NVML_TEMPERATURE_GPU, &mut celsius) };
            (code == NVML_SUCCESS).then_some(celsius as f64)
        });

        let power = self.api.get_power.and_then(|get_power| {
            let mut milliwatts: c_uint = 0;
            let code = unsafe { get_power(device, &mut milliwatts) };
            (code == NVML_SUCCESS).then_some(PowerReading::Milliwatts(milliwatts as f64))
        });

        Ok(DeviceStats {
            gpu_utilization: Some(utilization.gpu as f64),
            memory_used_bytes: Some(memory.used),
            memory_total_bytes: Some(memory.total),
            temperature_celsius: temperature,
            power,
        })
    }
}

impl Drop for NvmlBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Decode a NUL-terminated name buffer filled by a vendor SDK
pub(crate) fn c_buffer_to_string(buffer: &[c_char]) -> Option<String> {
    let bytes: Vec<u8> = buffer
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    let name = String::from_utf8_lossy(&bytes).trim().to_string();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_library_fails_cleanly() {
        let result = NvmlBackend::load(&[PathBuf::from("/nonexistent/nvidia/libnvidia-ml.so.1")]);
        assert!(matches!(result, Err(TelemetryError::LibraryNotFound { .. })));
    }

    #[test]
    fn name_buffers_stop_at_nul() {
        let mut buffer = [0 as c_char; 16];
        for (slot, byte) in buffer.iter_mut().zip(b"RTX 4090\0junk") {
            *slot = *byte as c_char;
        }
        assert_eq!(c_buffer_to_string(&buffer).as_deref(), Some("RTX 4090"));
        assert_eq!(c_buffer_to_string(&[0 as c_char; 4]), None);
    }
}
