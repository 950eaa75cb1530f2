//! Error taxonomy for GPU telemetry
//!
//! Load, symbol and SDK-init failures are recovered by the aggregator, which falls through
//! to the next backend tier. Per-device query failures are recovered per device. Only the
//! terminal `NoBackendAvailable` state is ever observable by callers of the session API.

use std::path::PathBuf;
use thiserror::Error;

use crate::backend::BackendKind;

/// Result type for telemetry operations
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors raised while loading, initializing or querying a telemetry backend
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("{library} not found (tried {} candidate(s))", .candidates.len())]
    LibraryNotFound {
        library: &'static str,
        candidates: Vec<PathBuf>,
    },

    #[error("{library}: required entry point missing: {symbol}")]
    SymbolMissing { library: String, symbol: String },

    #[error("{backend} SDK initialization failed: {reason}")]
    SdkInitFailed { backend: BackendKind, reason: String },

    #[error("{backend} {call} failed for device {index:?} (code {code})")]
    DeviceQueryFailed {
        backend: BackendKind,
        index: Option<u32>,
        call: &'static str,
        code: i64,
    },

    #[error("Performance counters unavailable: {0}")]
    CounterUnavailable(String),

    #[error("No GPU telemetry backend available")]
    NoBackendAvailable,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TelemetryError {
    /// Whether this error means the whole backend tier is unusable, so selection should move on
    pub fn is_fatal_for_backend(&self) -> bool {
        matches!(
            self,
            TelemetryError::LibraryNotFound { .. }
                | TelemetryError::SymbolMissing { .. }
                | TelemetryError::SdkInitFailed { .. }
                | TelemetryError::CounterUnavailable(_)
        )
    }

    /// Whether a vendor library was present on disk when this error was raised.
    ///
    /// Distinguishes "no SDK found" from "SDK found but failed to initialize".
    pub fn sdk_was_found(&self) -> bool {
        matches!(
            self,
            TelemetryError::SymbolMissing { .. } | TelemetryError::SdkInitFailed { .. }
        )
    }

    pub(crate) fn query(
        backend: BackendKind,
        index: Option<u32>,
        call: &'static str,
        code: impl Into<i64>,
    ) -> Self {
        TelemetryError::DeviceQueryFailed {
            backend,
            index,
            call,
            code: code.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::GpuVendor;

    #[test]
    fn selection_errors_are_fatal_for_the_tier_but_queries_are_not() {
        let missing = TelemetryError::LibraryNotFound {
            library: "nvml",
            candidates: vec![PathBuf::from("nvml.dll")],
        };
        assert!(missing.is_fatal_for_backend());
        assert!(!missing.sdk_was_found());

        let init = TelemetryError::SdkInitFailed {
            backend: BackendKind::Vendor(GpuVendor::Amd),
            reason: "agsInitialize returned -6".to_string(),
        };
        assert!(init.is_fatal_for_backend());
        assert!(init.sdk_was_found());

        let query = TelemetryError::query(BackendKind::Vendor(GpuVendor::Nvidia), Some(1), "x", 3);
        assert!(!query.is_fatal_for_backend());
    }

    #[test]
    fn library_not_found_message_counts_candidates() {
        let err = TelemetryError::LibraryNotFound {
            library: "igcl",
            candidates: vec![PathBuf::from("a"), PathBuf::from("b")],
        };
        assert_eq!(err.to_string(), "igcl not found (tried 2 candidate(s))");
    }
}
