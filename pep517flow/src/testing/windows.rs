//! Write-window recording for overlap detection.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// One closed write window.
#[derive(Debug, Clone)]
pub struct WriteWindow {
    /// The path written to.
    pub path: PathBuf,
    /// Who wrote (the command line).
    pub writer: String,
    /// When the window opened.
    pub opened: Instant,
    /// When the window closed.
    pub closed: Instant,
}

#[derive(Debug, Default)]
struct State {
    active: HashMap<PathBuf, usize>,
    peak_per_path: HashMap<PathBuf, usize>,
    running: usize,
    peak_running: usize,
    windows: Vec<WriteWindow>,
}

/// Records when processes write to target paths.
///
/// A window is open from process start until its outcome is produced.
/// Nested or equal paths count as the same resource.
#[derive(Debug, Default)]
pub struct WindowRecorder {
    state: Mutex<State>,
}

impl WindowRecorder {
    /// Creates a new recorder.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Opens a write window; it closes when the guard drops.
    #[must_use]
    pub fn open(self: &Arc<Self>, path: impl Into<PathBuf>, writer: impl Into<String>) -> WindowGuard {
        let path = path.into();
        let mut state = self.state.lock();
        let overlapping: usize = state
            .active
            .iter()
            .filter(|(p, _)| p.starts_with(&path) || path.starts_with(p))
            .map(|(_, n)| *n)
            .sum();
        *state.active.entry(path.clone()).or_default() += 1;
        let peak = state.peak_per_path.entry(path.clone()).or_default();
        *peak = (*peak).max(overlapping + 1);
        state.running += 1;
        state.peak_running = state.peak_running.max(state.running);
        drop(state);

        WindowGuard {
            recorder: Arc::clone(self),
            path,
            writer: writer.into(),
            opened: Instant::now(),
        }
    }

    /// Returns the largest number of simultaneous writers seen for `path`.
    #[must_use]
    pub fn peak_writers(&self, path: &Path) -> usize {
        self.state.lock().peak_per_path.get(path).copied().unwrap_or_default()
    }

    /// Returns true if any path ever had two writers at once.
    #[must_use]
    pub fn any_overlap(&self) -> bool {
        self.state.lock().peak_per_path.values().any(|n| *n > 1)
    }

    /// Returns the largest number of windows open at once across all paths.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.state.lock().peak_running
    }

    /// Returns the closed windows in closing order.
    #[must_use]
    pub fn windows(&self) -> Vec<WriteWindow> {
        self.state.lock().windows.clone()
    }

    fn close(&self, window: WriteWindow) {
        let mut state = self.state.lock();
        if let Some(n) = state.active.get_mut(&window.path) {
            *n = n.saturating_sub(1);
            if *n == 0 {
                state.active.remove(&window.path);
            }
        }
        state.running = state.running.saturating_sub(1);
        state.windows.push(window);
    }
}

/// An open write window.
#[derive(Debug)]
pub struct WindowGuard {
    recorder: Arc<WindowRecorder>,
    path: PathBuf,
    writer: String,
    opened: Instant,
}

impl Drop for WindowGuard {
    fn drop(&mut self) {
        self.recorder.close(WriteWindow {
            path: std::mem::take(&mut self.path),
            writer: std::mem::take(&mut self.writer),
            opened: self.opened,
            closed: Instant::now(),
        });
    }
}
