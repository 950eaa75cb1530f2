//! OS hardware-class registry lookup
//!
//! Supplies the adapter name (second tier of the name chain, after the vendor SDK) and a
//! vendor hint for the counter fallback:
//! - Windows: display-class registry key, value `DriverDesc`
//! - Linux: `/sys/class/drm/cardN/device` vendor id and `PCI_ID`

use std::path::{Path, PathBuf};

use crate::backend::GpuVendor;

/// What the OS knows about the primary display adapter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdapterDescriptor {
    pub name: Option<String>,
    pub vendor: Option<GpuVendor>,
}

/// Look up the primary display adapter
pub fn primary_adapter() -> AdapterDescriptor {
    #[cfg(target_os = "windows")]
    {
        let name = registry::driver_desc();
        let vendor = name.as_deref().and_then(GpuVendor::from_name);
        AdapterDescriptor { name, vendor }
    }

    #[cfg(target_os = "linux")]
    {
        primary_adapter_in(Path::new(DRM_ROOT))
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux")))]
    {
        AdapterDescriptor::default()
    }
}

/// Root of the DRM class directory
pub const DRM_ROOT: &str = "/sys/class/drm";

/// `device` directories of every `cardN` node under `root`, sorted by name
pub fn drm_card_devices(root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };

    let mut cards: Vec<(String, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            // card0-HDMI-A-1 and friends are connectors, not devices
            if name.starts_with("card") && !name.contains('-') {
                Some((name, entry.path().join("device")))
            } else {
                None
            }
        })
        .collect();

    cards.sort_by(|a, b| a.0.cmp(&b.0));
    cards.into_iter().map(|(_, path)| path).collect()
}

/// First DRM card with a readable vendor id
pub fn primary_adapter_in(root: &Path) -> AdapterDescriptor {
    for device in drm_card_devices(root) {
        let Ok(vendor_id) = std::fs::read_to_string(device.join("vendor")) else {
            continue;
        };
        let vendor = GpuVendor::from_pci_vendor_id(&vendor_id);

        let pci_id = std::fs::read_to_string(device.join("uevent"))
            .ok()
            .and_then(|uevent| {
                uevent
                    .lines()
                    .find(|l| l.starts_with("PCI_ID="))
                    .map(|l| l.replace("PCI_ID=", ""))
            });

        let name = match (vendor, pci_id) {
            (Some(vendor), Some(id)) => format!("{} GPU ({})", vendor, id),
            (Some(vendor), None) => format!("{} GPU", vendor),
            (None, Some(id)) => format!("GPU ({})", id),
            (None, None) => continue,
        };

        return AdapterDescriptor {
            name: Some(name),
            vendor,
        };
    }

    AdapterDescriptor::default()
}

/// NUL-terminated UTF-16 string for wide Win32 APIs
#[cfg(target_os = "windows")]
pub(crate) fn wide_null(value: &str) -> Vec<u16> {
    use std::os::windows::ffi::OsStrExt;

    std::ffi::OsStr::new(value)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

#[cfg(target_os = "windows")]
mod registry {
    use super::wide_null;
    use windows_sys::Win32::Foundation::ERROR_SUCCESS;
    use windows_sys::Win32::System::Registry::{
        RegCloseKey, RegOpenKeyExW, RegQueryValueExW, HKEY, HKEY_LOCAL_MACHINE, KEY_READ,
    };

    const DISPLAY_CLASS_KEY: &str =
        r"SYSTEM\CurrentControlSet\Control\Class\{4d36e968-e325-11ce-bfc1-08002be10318}\0000";

    pub(super) fn driver_desc() -> Option<String> {
        let subkey = wide_null(DISPLAY_CLASS_KEY);
        let value_name = wide_null("DriverDesc");

        unsafe {
            let mut hkey: HKEY = std::mem::zeroed();
            if RegOpenKeyExW(HKEY_LOCAL_MACHINE, subkey.as_ptr(), 0, KEY_READ, &mut hkey)
                != ERROR_SUCCESS
            {
                return None;
            }

            let mut buffer = [0u16; 256];
            let mut size = std::mem::size_of_val(&buffer) as u32;
            let status = RegQueryValueExW(
                hkey,
                value_name.as_ptr(),
                std::ptr::null(),
                std::ptr::null_mut(),
                buffer.as_mut_ptr().cast(),
                &mut size,
            );
            let _ = RegCloseKey(hkey);

            if status != ERROR_SUCCESS {
                return None;
            }

            let chars = (size as usize / 2).min(buffer.len());
            let end = buffer[..chars].iter().position(|&c| c == 0).unwrap_or(chars);
            let name = String::from_utf16_lossy(&buffer[..end]).trim().to_string();
            if name.is_empty() {
                None
            } else {
                Some(name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fake_card(root: &Path, card: &str, vendor: &str, pci_id: Option<&str>) {
        let device = root.join(card).join("device");
        fs::create_dir_all(&device).unwrap();
        fs::write(device.join("vendor"), format!("{vendor}\n")).unwrap();
        if let Some(id) = pci_id {
            fs::write(
                device.join("uevent"),
                format!("DRIVER=amdgpu\nPCI_CLASS=30000\nPCI_ID={id}\n"),
            )
            .unwrap();
        }
    }

    #[test]
    fn connectors_are_skipped_and_cards_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fake_card(dir.path(), "card1", "0x10de", None);
        fake_card(dir.path(), "card0", "0x1002", Some("1002:744C"));
        fs::create_dir_all(dir.path().join("card0-DP-1")).unwrap();

        let cards = drm_card_devices(dir.path());
        assert_eq!(
            cards,
            vec![
                dir.path().join("card0").join("device"),
                dir.path().join("card1").join("device"),
            ]
        );
    }

    #[test]
    fn primary_adapter_uses_first_card_with_vendor() {
        let dir = tempfile::tempdir().unwrap();
        fake_card(dir.path(), "card0", "0x1002", Some("1002:744C"));
        fake_card(dir.path(), "card1", "0x8086", None);

        let adapter = primary_adapter_in(dir.path());
        assert_eq!(adapter.vendor, Some(GpuVendor::Amd));
        assert_eq!(adapter.name.as_deref(), Some("AMD GPU (1002:744C)"));
    }

    #[test]
    fn missing_drm_root_yields_nothing() {
        let adapter = primary_adapter_in(Path::new("/nonexistent/drm/root"));
        assert_eq!(adapter, AdapterDescriptor::default());
    }
}
