//! Resource-release stack for a dataflow's lifetime.
//!
//! Actions run most-recently-registered first, exactly once, whether the
//! run succeeded or not. A handle can disarm its action, which is how the
//! orchestrator keeps a staging table alive after a failed merge.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type Action = Box<dyn FnOnce() + Send + 'static>;

struct Entry {
    name: String,
    armed: Arc<AtomicBool>,
    action: Action,
}

/// Handle to one registered cleanup action.
#[derive(Debug, Clone)]
pub struct CleanupHandle {
    name: String,
    armed: Arc<AtomicBool>,
}

impl CleanupHandle {
    /// Prevent the action from running at teardown.
    pub fn disarm(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            tracing::debug!(cleanup = %self.name, "Cleanup action disarmed");
        }
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// LIFO stack of cleanup actions.
#[derive(Default)]
pub struct CleanupStack {
    entries: Vec<Entry>,
}

impl CleanupStack {
    pub fn push(&mut self, name: impl Into<String>, action: impl FnOnce() + Send + 'static) -> CleanupHandle {
        let name = name.into();
        let armed = Arc::new(AtomicBool::new(true));
        self.entries.push(Entry {
            name: name.clone(),
            armed: Arc::clone(&armed),
            action: Box::new(action),
        });
        CleanupHandle { name, armed }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run every armed action in reverse registration order, leaving the
    /// stack empty. Returns the number of actions that ran.
    pub fn run_all(&mut self) -> usize {
        let mut ran = 0;
        while let Some(entry) = self.entries.pop() {
            if !entry.armed.swap(false, Ordering::SeqCst) {
                continue;
            }
            tracing::debug!(cleanup = %entry.name, "Running cleanup action");
            (entry.action)();
            ran += 1;
        }
        ran
    }
}

impl std::fmt::Debug for CleanupStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupStack")
            .field("entries", &self.entries.iter().map(|e| e.name.as_str()).collect::<Vec<_>>())
            .finish()
    }
}
