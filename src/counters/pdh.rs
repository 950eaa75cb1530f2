//! Windows PDH GPU counters
//!
//! Utilization and memory counter paths are tried in a fixed order and the first one PDH
//! accepts is kept. Wildcard paths expand to many instances, which are summed.

use std::time::Duration;
use tracing::{debug, info};
use windows_sys::Win32::System::Performance::{
    PdhAddEnglishCounterW, PdhCloseQuery, PdhCollectQueryData, PdhGetFormattedCounterArrayW,
    PdhOpenQueryW, PDH_FMT_COUNTERVALUE_ITEM_W, PDH_FMT_DOUBLE, PDH_FMT_LARGE, PDH_HCOUNTER,
    PDH_HQUERY,
};

use super::{CounterSample, CounterSource};
use crate::backend::GpuVendor;
use crate::error::{Result, TelemetryError};
use crate::os_device::wide_null;

const ERROR_SUCCESS: u32 = 0;
const PDH_MORE_DATA: u32 = 0x8000_07D2;
const PDH_CSTATUS_VALID_DATA: u32 = 0;
const PDH_CSTATUS_NEW_DATA: u32 = 1;

const ENGINE_3D_UTILIZATION: &str = r"\GPU Engine(*engtype_3D)\Utilization Percentage";
const ANY_ENGINE_UTILIZATION: &str = r"\GPU Engine(*)\Utilization Percentage";
const AMD_UTILIZATION: &str = r"\AMD Graphics\GPU Utilization";
const INTEL_UTILIZATION: &str = r"\Intel(R) Graphics\GPU Utilization";

const MEMORY_COUNTERS: [&str; 3] = [
    r"\GPU Adapter Memory(*)\Dedicated Usage",
    r"\GPU Process Memory(*)\Dedicated Usage",
    r"\GPU Process Memory(*)\Shared Usage",
];

/// Utilization paths in priority order: engine-specific, vendor-specific, then wildcard
pub fn utilization_candidates(vendor_hint: Option<GpuVendor>) -> Vec<&'static str> {
    let mut paths = vec![ENGINE_3D_UTILIZATION];
    match vendor_hint {
        Some(GpuVendor::Amd) => paths.push(AMD_UTILIZATION),
        Some(GpuVendor::Intel) => paths.push(INTEL_UTILIZATION),
        _ => {}
    }
    paths.push(ANY_ENGINE_UTILIZATION);
    paths
}

/// Open PDH query holding one utilization counter and, if available, one memory counter
pub struct PdhGpuCounters {
    query: PDH_HQUERY,
    utilization: PDH_HCOUNTER,
    utilization_path: &'static str,
    memory: Option<(PDH_HCOUNTER, &'static str)>,
}

// PDH handles are plain process-wide handles; the session serializes all access.
unsafe impl Send for PdhGpuCounters {}

impl PdhGpuCounters {
    pub fn open(vendor_hint: Option<GpuVendor>, warmup: Duration) -> Result<Self> {
        unsafe {
            let mut query: PDH_HQUERY = std::mem::zeroed();
            let status = PdhOpenQueryW(std::ptr::null(), 0, &mut query);
            if status != ERROR_SUCCESS {
                return Err(TelemetryError::CounterUnavailable(format!(
                    "PdhOpenQueryW failed (0x{status:08x})"
                )));
            }

            let Some((utilization, utilization_path)) =
                add_first(query, &utilization_candidates(vendor_hint))
            else {
                let _ = PdhCloseQuery(query);
                return Err(TelemetryError::CounterUnavailable(
                    "no GPU utilization counter accepted".to_string(),
                ));
            };

            let memory = add_first(query, &MEMORY_COUNTERS);
            if memory.is_none() {
                debug!("No GPU memory counter accepted; memory usage will read 0");
            }

            // First sample after opening is not meaningful for rate counters.
            let _ = PdhCollectQueryData(query);
            std::thread::sleep(warmup);

            info!("PDH GPU counters opened: {}", utilization_path);
            Ok(Self {
                query,
                utilization,
                utilization_path,
                memory,
            })
        }
    }
}

unsafe fn add_first(
    query: PDH_HQUERY,
    candidates: &[&'static str],
) -> Option<(PDH_HCOUNTER, &'static str)> {
    for path in candidates {
        let wide = wide_null(path);
        let mut counter: PDH_HCOUNTER = std::mem::zeroed();
        let status = PdhAddEnglishCounterW(query, wide.as_ptr(), 0, &mut counter);
        if status == ERROR_SUCCESS {
            return Some((counter, path));
        }
        debug!("PDH rejected {} (0x{:08x})", path, status);
    }
    None
}

/// Read every instance of a (possibly wildcard) counter
unsafe fn counter_items(
    counter: PDH_HCOUNTER,
    format: u32,
) -> Option<Vec<PDH_FMT_COUNTERVALUE_ITEM_W>> {
    let mut buffer_size: u32 = 0;
    let mut item_count: u32 = 0;
    let status = PdhGetFormattedCounterArrayW(
        counter,
        format,
        &mut buffer_size,
        &mut item_count,
        std::ptr::null_mut(),
    );
    if status != PDH_MORE_DATA || buffer_size == 0 {
        return None;
    }

    // The buffer also holds the instance name strings, so size it in bytes.
    let item_size = std::mem::size_of::<PDH_FMT_COUNTERVALUE_ITEM_W>();
    let capacity = (buffer_size as usize).div_ceil(item_size);
    let mut items: Vec<PDH_FMT_COUNTERVALUE_ITEM_W> = Vec::with_capacity(capacity);
    let mut buffer_size = (capacity * item_size) as u32;

    let status = PdhGetFormattedCounterArrayW(
        counter,
        format,
        &mut buffer_size,
        &mut item_count,
        items.as_mut_ptr(),
    );
    if status != ERROR_SUCCESS {
        return None;
    }
    items.set_len((item_count as usize).min(capacity));
    Some(items)
}

fn is_valid(status: u32) -> bool {
    status == PDH_CSTATUS_VALID_DATA || status == PDH_CSTATUS_NEW_DATA
}

impl CounterSource for PdhGpuCounters {
    fn collect(&mut self) -> Result<CounterSample> {
        unsafe {
            let status = PdhCollectQueryData(self.query);
            if status != ERROR_SUCCESS {
                return Err(TelemetryError::CounterUnavailable(format!(
                    "PdhCollectQueryData failed (0x{status:08x})"
                )));
            }

            let utilization = counter_items(self.utilization, PDH_FMT_DOUBLE).map(|items| {
                items
                    .iter()
                    .filter(|item| is_valid(item.FmtValue.CStatus))
                    .map(|item| item.FmtValue.Anonymous.doubleValue)
                    .filter(|v| v.is_finite())
                    .sum::<f64>()
            });

            let memory_used = self.memory.and_then(|(counter, _)| {
                counter_items(counter, PDH_FMT_LARGE).map(|items| {
                    items
                        .iter()
                        .filter(|item| is_valid(item.FmtValue.CStatus))
                        .map(|item| item.FmtValue.Anonymous.largeValue.max(0) as u64)
                        .fold(0u64, u64::saturating_add)
                })
            });

            Ok(CounterSample {
                utilization_percent: utilization,
                memory_used_bytes: memory_used,
                memory_total_bytes: None,
            })
        }
    }

    fn describe(&self) -> String {
        match self.memory {
            Some((_, memory_path)) => format!("{} + {}", self.utilization_path, memory_path),
            None => self.utilization_path.to_string(),
        }
    }
}

impl Drop for PdhGpuCounters {
    fn drop(&mut self) {
        unsafe {
            let _ = PdhCloseQuery(self.query);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_specific_paths_come_before_wildcards() {
        let paths = utilization_candidates(Some(GpuVendor::Intel));
        assert_eq!(paths.first(), Some(&ENGINE_3D_UTILIZATION));
        assert_eq!(paths.last(), Some(&ANY_ENGINE_UTILIZATION));
        assert!(paths.contains(&INTEL_UTILIZATION));
        assert!(!paths.contains(&AMD_UTILIZATION));
    }
}
