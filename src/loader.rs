//! Dynamic loading of vendor SDK libraries
//!
//! A [`VendorLibrary`] is opened from an ordered list of candidate locations (absolute
//! install paths and bare names resolved through the default search path). Entry points
//! are resolved by name, trying versioned names before legacy ones.

use libloading::Library;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

use crate::error::{Result, TelemetryError};

static OPEN_LIBRARIES: AtomicUsize = AtomicUsize::new(0);

/// Number of vendor library handles currently held by this process
pub fn open_library_count() -> usize {
    OPEN_LIBRARIES.load(Ordering::SeqCst)
}

/// Held by tests that load real libraries and assert on [`open_library_count`]
#[cfg(test)]
pub(crate) static LIBRARY_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// A loaded vendor SDK. The OS handle is released by [`VendorLibrary::close`] or on drop.
pub struct VendorLibrary {
    library: Option<Library>,
    label: &'static str,
    path: PathBuf,
}

impl VendorLibrary {
    /// Load the first candidate that the OS accepts
    pub fn open(label: &'static str, candidates: &[PathBuf]) -> Result<Self> {
        for candidate in candidates {
            // SAFETY: vendor SDK initializers are trusted to be side-effect free on load.
            match unsafe { Library::new(candidate) } {
                Ok(library) => {
                    OPEN_LIBRARIES.fetch_add(1, Ordering::SeqCst);
                    debug!("Loaded {} from {}", label, candidate.display());
                    return Ok(Self {
                        library: Some(library),
                        label,
                        path: candidate.clone(),
                    });
                }
                Err(err) => {
                    debug!("{} candidate {} rejected: {}", label, candidate.display(), err);
                }
            }
        }

        Err(TelemetryError::LibraryNotFound {
            library: label,
            candidates: candidates.to_vec(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve a mandatory entry point, trying each name in order.
    ///
    /// # Safety
    /// `T` must be the exact function-pointer type exported under these names, and the
    /// returned pointer must not be called after this library is closed.
    pub unsafe fn required<T: Copy>(&self, names: &[&str]) -> Result<T> {
        self.resolve(names).ok_or_else(|| TelemetryError::SymbolMissing {
            library: self.path.display().to_string(),
            symbol: names.join("|"),
        })
    }

    /// Resolve an entry point that callers check for before use.
    ///
    /// # Safety
    /// Same contract as [`VendorLibrary::required`].
    pub unsafe fn optional<T: Copy>(&self, names: &[&str]) -> Option<T> {
        let symbol = self.resolve(names);
        if symbol.is_none() {
            debug!("{}: optional entry point {} absent", self.label, names.join("|"));
        }
        symbol
    }

    unsafe fn resolve<T: Copy>(&self, names: &[&str]) -> Option<T> {
        let library = self.library.as_ref()?;
        for (attempt, name) in names.iter().enumerate() {
            if let Ok(symbol) = library.get::<T>(name.as_bytes()) {
                if attempt > 0 {
                    debug!("{}: using legacy entry point {}", self.label, name);
                }
                return Some(*symbol);
            }
        }
        None
    }

    /// Release the OS handle. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(library) = self.library.take() {
            OPEN_LIBRARIES.fetch_sub(1, Ordering::SeqCst);
            if let Err(err) = library.close() {
                warn!("Failed to unload {} ({}): {}", self.label, self.path.display(), err);
            } else {
                debug!("Unloaded {}", self.label);
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.library.is_some()
    }
}

impl Drop for VendorLibrary {
    fn drop(&mut self) {
        self.close();
    }
}

/// Build the ordered candidate list: env override, configured extras, then built-in defaults
pub fn candidate_paths(env_var: &str, configured: &[PathBuf], defaults: &[&str]) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(path) = std::env::var(env_var) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            candidates.push(PathBuf::from(trimmed));
        }
    }

    candidates.extend(configured.iter().cloned());
    candidates.extend(defaults.iter().map(PathBuf::from));
    candidates
}
