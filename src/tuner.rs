//! Tunable-parameter housekeeping
//!
//! The GUI's auto-generated parameter panel is an external collaborator; the
//! core only provides the tick-safe plumbing. UI-thread writes land in a
//! shared pending queue and are merged into the live table (and forwarded to
//! the active pipeline) during the loop's `update` step. The table is bound
//! to one pipeline at a time and resets when the active pipeline changes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::pipeline::PipelineManager;

/// Shared queue of parameter writes issued from any thread
pub type PendingParams = Arc<Mutex<Vec<(String, f64)>>>;

/// Tick-safe bridge between UI parameter edits and the active pipeline
pub struct TunerManager {
    values: HashMap<String, f64>,
    bound_to: Option<String>,
    pending: PendingParams,
}

impl Default for TunerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TunerManager {
    /// Create an empty manager with its own pending queue
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
            bound_to: None,
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Clone of the shared pending queue, safe to hand to any thread
    pub fn pending_handle(&self) -> PendingParams {
        Arc::clone(&self.pending)
    }

    /// Queue a parameter write from any thread; applied at the next `update`
    pub fn set_param(&self, name: impl Into<String>, value: f64) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((name.into(), value));
    }

    /// Current value of a parameter, if one has been applied
    pub fn value(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Per-tick housekeeping: rebind on pipeline change, then drain pending
    /// writes into the live table and the active pipeline.
    pub fn update(&mut self, pipelines: &mut PipelineManager) {
        let active = pipelines.active_name().map(str::to_string);
        if active != self.bound_to {
            self.values.clear();
            self.bound_to = active;
        }

        let drained: Vec<(String, f64)> = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for (name, value) in drained {
            self.values.insert(name.clone(), value);
            pipelines.apply_param(&name, value);
        }
    }
}
