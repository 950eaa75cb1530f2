//! C ABI over one process-wide telemetry session
//!
//! Hosts serialize calls themselves; the mutex only keeps a background poller from racing
//! `gpu_shutdown`. Strings returned by `gpu_get_info_json` belong to the caller and must be
//! released with `gpu_free_string`.

use std::ffi::{c_char, c_int, CString};
use std::ptr;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

use crate::config::TelemetryConfig;
use crate::snapshot::CollectionSnapshot;
use crate::telemetry::{SessionState, Telemetry};
use crate::wire;

static SESSION: Mutex<Option<Telemetry>> = Mutex::new(None);

fn session() -> MutexGuard<'static, Option<Telemetry>> {
    SESSION.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn active(session: &mut Option<Telemetry>) -> Option<&mut Telemetry> {
    session.as_mut().filter(|telemetry| {
        matches!(
            telemetry.state(),
            SessionState::VendorActive(_) | SessionState::FallbackActive
        )
    })
}

/// 0 on success, -1 when no SDK was found, -2 when an SDK was found but failed to initialize
#[no_mangle]
pub extern "C" fn gpu_init() -> c_int {
    let mut session = session();
    if let Some(telemetry) = active(&mut session) {
        return telemetry.init().code();
    }

    let config = TelemetryConfig::load().unwrap_or_else(|err| {
        warn!("Using default configuration: {:#}", err);
        TelemetryConfig::default()
    });
    let mut telemetry = Telemetry::new(config);
    let status = telemetry.init();
    *session = Some(telemetry);
    status.code()
}

#[no_mangle]
pub extern "C" fn gpu_shutdown() {
    if let Some(mut telemetry) = session().take() {
        telemetry.shutdown();
    }
}

/// Number of devices, -1 when no backend is active or enumeration fails
#[no_mangle]
pub extern "C" fn gpu_get_count() -> c_int {
    let mut session = session();
    let Some(telemetry) = active(&mut session) else {
        return -1;
    };
    match telemetry.device_count() {
        Ok(count) => c_int::try_from(count).unwrap_or(c_int::MAX),
        Err(err) => {
            warn!("{}", err);
            -1
        }
    }
}

/// Device 0 utilization percent, -1 on error
#[no_mangle]
pub extern "C" fn gpu_get_usage() -> c_int {
    let mut session = session();
    active(&mut session)
        .and_then(|telemetry| telemetry.usage())
        .map_or(-1, c_int::from)
}

/// JSON payload for every device. Null only when the payload cannot be produced.
#[no_mangle]
pub extern "C" fn gpu_get_info_json() -> *mut c_char {
    let snapshot = match active(&mut session()) {
        Some(telemetry) => telemetry.snapshot(),
        None => CollectionSnapshot::empty(),
    };

    let json = match wire::to_json(&snapshot) {
        Ok(json) => json,
        Err(err) => {
            warn!("{}", err);
            return ptr::null_mut();
        }
    };
    match CString::new(json) {
        Ok(json) => json.into_raw(),
        Err(err) => {
            warn!("Payload contains an interior NUL: {}", err);
            ptr::null_mut()
        }
    }
}

/// Release a string returned by `gpu_get_info_json`
///
/// # Safety
///
/// `payload` must be null or a pointer returned by `gpu_get_info_json` that has not
/// already been freed.
#[no_mangle]
pub unsafe extern "C" fn gpu_free_string(payload: *mut c_char) {
    if !payload.is_null() {
        drop(CString::from_raw(payload));
    }
}
