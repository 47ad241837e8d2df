use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Tracks the files an operation creates so nothing partial survives a
/// failure.
///
/// Register the intended output and any scratch files up front, hand over
/// open handles once writing is done, and call
/// [`mark_complete`](Self::mark_complete) after the last byte is flushed.
/// Cleanup then removes scratch files and keeps the output; without the
/// completion mark the output is removed as well. Dropping the tracker runs
/// the same cleanup, so early returns and panics cannot leak a truncated
/// file.
#[derive(Debug)]
pub struct ResourceTracker {
    inner: Mutex<TrackerInner>,
}

#[derive(Debug, Default)]
struct TrackerInner {
    output: Option<PathBuf>,
    temp_paths: Vec<PathBuf>,
    handles: Vec<File>,
    completed: bool,
    cleaned: bool,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TrackerInner::default()),
        }
    }

    /// Records the final output path. At most one output is tracked; a later
    /// registration replaces the earlier one.
    pub fn register_output(&self, path: impl Into<PathBuf>) {
        self.lock().output = Some(path.into());
    }

    /// Records a scratch file that is always deleted during cleanup.
    pub fn register_temp_file(&self, path: impl Into<PathBuf>) {
        self.lock().temp_paths.push(path.into());
    }

    /// Takes ownership of an open handle so cleanup can close it before any
    /// deletion. Required on platforms where an open file cannot be removed.
    pub fn track_handle(&self, file: File) {
        self.lock().handles.push(file);
    }

    /// Marks the operation as successfully finished; cleanup will keep the
    /// output file.
    pub fn mark_complete(&self) {
        self.lock().completed = true;
    }

    pub fn is_complete(&self) -> bool {
        self.lock().completed
    }

    /// Closes tracked handles, deletes scratch files, and deletes the output
    /// unless [`mark_complete`](Self::mark_complete) was called. Idempotent;
    /// the drop hook reuses it.
    pub fn cleanup_all(&self) {
        let mut inner = self.lock();
        if inner.cleaned {
            return;
        }
        inner.cleaned = true;

        // Handles must be closed before their paths are unlinked.
        inner.handles.clear();

        for path in inner.temp_paths.drain(..) {
            remove_tracked_file(&path, "temporary file");
        }
        if !inner.completed {
            if let Some(path) = inner.output.take() {
                remove_tracked_file(&path, "partial output");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ResourceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ResourceTracker {
    fn drop(&mut self) {
        self.cleanup_all();
    }
}

fn remove_tracked_file(path: &Path, kind: &str) {
    match fs::remove_file(path) {
        Ok(()) => {}
        // Already gone is the state we wanted.
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "failed to remove {kind}");
        }
    }
}
