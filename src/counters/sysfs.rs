//! Linux DRM sysfs GPU counters (`gpu_busy_percent`, `mem_info_vram_*`)

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use super::{CounterSample, CounterSource};
use crate::error::{Result, TelemetryError};
use crate::os_device::drm_card_devices;

const BUSY_PERCENT: &str = "gpu_busy_percent";
const VRAM_USED: &str = "mem_info_vram_used";
const VRAM_TOTAL: &str = "mem_info_vram_total";

pub struct DrmSysfsCounters {
    device: PathBuf,
}

impl DrmSysfsCounters {
    /// Use the first card under `root` that exposes a busy counter
    pub fn open(root: &Path, warmup: Duration) -> Result<Self> {
        let device = drm_card_devices(root)
            .into_iter()
            .find(|device| read_number::<f64>(&device.join(BUSY_PERCENT)).is_some())
            .ok_or_else(|| {
                TelemetryError::CounterUnavailable(format!(
                    "no {} under {}",
                    BUSY_PERCENT,
                    root.display()
                ))
            })?;

        let mut counters = Self { device };
        // Warm-up sample; the first read after a runtime resume can report 0.
        counters.collect()?;
        std::thread::sleep(warmup);

        info!("DRM sysfs GPU counters opened: {}", counters.device.display());
        Ok(counters)
    }
}

fn read_number<T: std::str::FromStr>(path: &Path) -> Option<T> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

impl CounterSource for DrmSysfsCounters {
    fn collect(&mut self) -> Result<CounterSample> {
        let utilization = read_number::<f64>(&self.device.join(BUSY_PERCENT)).ok_or_else(|| {
            TelemetryError::CounterUnavailable(format!(
                "{} no longer readable",
                self.device.join(BUSY_PERCENT).display()
            ))
        })?;

        Ok(CounterSample {
            utilization_percent: Some(utilization),
            memory_used_bytes: read_number(&self.device.join(VRAM_USED)),
            memory_total_bytes: read_number(&self.device.join(VRAM_TOTAL)),
        })
    }

    fn describe(&self) -> String {
        self.device.join(BUSY_PERCENT).display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_card_with_busy_counter_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let card0 = dir.path().join("card0").join("device");
        let card1 = dir.path().join("card1").join("device");
        fs::create_dir_all(&card0).unwrap();
        fs::create_dir_all(&card1).unwrap();
        fs::write(card1.join(BUSY_PERCENT), "37\n").unwrap();
        fs::write(card1.join(VRAM_USED), "1073741824\n").unwrap();
        fs::write(card1.join(VRAM_TOTAL), "8589934592\n").unwrap();

        let mut counters = DrmSysfsCounters::open(dir.path(), Duration::ZERO).unwrap();
        let sample = counters.collect().unwrap();
        assert_eq!(sample.utilization_percent, Some(37.0));
        assert_eq!(sample.memory_used_bytes, Some(1_073_741_824));
        assert_eq!(sample.memory_total_bytes, Some(8_589_934_592));
    }

    #[test]
    fn no_busy_counter_means_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("card0").join("device")).unwrap();

        let err = DrmSysfsCounters::open(dir.path(), Duration::ZERO)
            .err()
            .unwrap();
        assert!(matches!(err, TelemetryError::CounterUnavailable(_)));
    }
}
