/// Self-write suppression for the file watcher.
///
/// Every write the engine makes is bracketed by a scoped guard: while at
/// least one guard is alive for a path, the watcher must treat change
/// events on that path as our own and not re-trigger a reconcile. The
/// guard releases on drop, so suppression ends no matter how the write
/// path exits.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Tracks paths currently being written by this process.
#[derive(Debug, Default)]
pub struct WriteSuppressor {
    /// path -> number of live guards (nested writes are possible)
    pending: Mutex<HashMap<PathBuf, usize>>,
}

impl WriteSuppressor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a write to `path`. Watcher events for the path are suppressed
    /// until the returned guard is dropped.
    pub fn begin_write(&self, path: &Path) -> SuppressGuard<'_> {
        let mut pending = self.pending.lock().unwrap();
        *pending.entry(path.to_path_buf()).or_insert(0) += 1;
        SuppressGuard {
            suppressor: self,
            path: path.to_path_buf(),
        }
    }

    /// Should a change event for `path` be ignored?
    pub fn is_suppressed(&self, path: &Path) -> bool {
        self.pending
            .lock()
            .unwrap()
            .get(path)
            .map_or(false, |n| *n > 0)
    }

    fn release(&self, path: &Path) {
        let mut pending = self.pending.lock().unwrap();
        if let Some(n) = pending.get_mut(path) {
            *n -= 1;
            if *n == 0 {
                pending.remove(path);
            }
        }
    }
}

/// RAII handle for one in-progress write.
pub struct SuppressGuard<'a> {
    suppressor: &'a WriteSuppressor,
    path: PathBuf,
}

impl Drop for SuppressGuard<'_> {
    fn drop(&mut self) {
        self.suppressor.release(&self.path);
    }
}
