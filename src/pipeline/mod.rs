//! Vision pipelines and their manager
//!
//! A [`VisionPipeline`] encapsulates one end-to-end processing routine
//! applied to a single frame per tick. The [`PipelineManager`] owns the
//! registered pipelines, the active pipeline's [`Telemetry`] record and the
//! pause state, and is the boundary where processing failures are absorbed.
//!
//! # Failure contract
//!
//! `update()` converts both `Err` returns and panics from the active
//! pipeline into a [`SimError::Pipeline`]. The main loop logs that error and
//! surfaces it through the reserved telemetry error item; it never tears
//! down the loop. A failing pipeline is simply retried on the next tick.
//!
//! # Cross-thread requests
//!
//! The pause flag and the pending-selection slot are the only fields safe to
//! touch from a non-loop thread. Swap requests are consumed at the start of
//! the next `update()`, a tick-safe point; the outgoing pipeline's
//! `on_deactivate` runs only after the switch completes.

pub mod builtin;

pub use builtin::{register_builtin_pipelines, DefaultPipeline, ThresholdPipeline};

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{panic_message, Result, SimError};
use crate::input::PendingSelection;
use crate::types::{Frame, Telemetry};

/// Capability interface for one end-to-end vision routine
pub trait VisionPipeline: Send {
    /// Display name used in pipeline lists and the status line
    fn name(&self) -> &str;

    /// Process one frame, writing telemetry items as a side effect.
    ///
    /// Returning `Err` (or panicking) marks this tick as failed; the loop
    /// absorbs it and the pipeline gets the next frame regardless.
    fn process(&mut self, input: &Frame, telemetry: &mut Telemetry) -> Result<Frame>;

    /// Called when this pipeline becomes the active one
    fn on_activate(&mut self) {}

    /// Called when this pipeline stops being the active one
    fn on_deactivate(&mut self) {}

    /// Receive a tuned parameter value. Unknown names are ignored.
    fn apply_param(&mut self, _name: &str, _value: f64) {}
}

/// Owns the registered pipelines, the active selection and its telemetry
pub struct PipelineManager {
    pipelines: Vec<Box<dyn VisionPipeline>>,
    active: Option<usize>,
    telemetry: Option<Telemetry>,
    last_output: Option<Frame>,
    paused: Arc<AtomicBool>,
    pending: PendingSelection,
}

impl Default for PipelineManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineManager {
    /// Create an empty manager with its own pause flag and pending slot
    pub fn new() -> Self {
        Self::with_shared(
            Arc::new(AtomicBool::new(false)),
            Arc::new(Mutex::new(None)),
        )
    }

    /// Create an empty manager around externally-owned shared state.
    ///
    /// Lets an owner hand out the pause flag and pending slot before the
    /// manager itself is constructed (its construction is deferred until
    /// after the one-time runtime setup).
    pub fn with_shared(paused: Arc<AtomicBool>, pending: PendingSelection) -> Self {
        Self {
            pipelines: Vec::new(),
            active: None,
            telemetry: None,
            last_output: None,
            paused,
            pending,
        }
    }

    /// Register a pipeline; registration order is selection-index order
    pub fn register(&mut self, pipeline: Box<dyn VisionPipeline>) {
        tracing::debug!(pipeline = pipeline.name(), "Registered pipeline");
        self.pipelines.push(pipeline);
    }

    /// Names of all registered pipelines, in index order
    pub fn list(&self) -> Vec<String> {
        self.pipelines.iter().map(|p| p.name().to_string()).collect()
    }

    /// Index of the active pipeline, if one is selected
    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    /// Name of the active pipeline, if one is selected
    pub fn active_name(&self) -> Option<&str> {
        self.active.map(|i| self.pipelines[i].name())
    }

    /// Shared pause flag, safe to hand to any thread
    pub fn pause_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.paused)
    }

    /// Whether processing is currently paused
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Set the pause flag; effective from the next tick
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    /// Clone of the shared pending-selection slot, safe to hand to any thread
    pub fn pending_handle(&self) -> PendingSelection {
        Arc::clone(&self.pending)
    }

    /// Request a pipeline change from any thread; applied at the next `update`
    pub fn set_pending_selection(&self, index: usize) {
        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = Some(index);
    }

    /// Switch the active pipeline immediately. Loop thread only.
    ///
    /// The outgoing pipeline's telemetry record is discarded; the incoming
    /// one starts with a fresh record.
    pub fn select(&mut self, index: usize) -> Result<()> {
        if index >= self.pipelines.len() {
            return Err(SimError::Selection {
                index,
                available: self.pipelines.len(),
            });
        }
        if self.active == Some(index) {
            return Ok(());
        }

        if let Some(old) = self.active {
            self.pipelines[old].on_deactivate();
        }
        self.active = Some(index);
        self.telemetry = Some(Telemetry::new());
        self.last_output = None;
        self.pipelines[index].on_activate();
        tracing::info!(pipeline = self.pipelines[index].name(), "Pipeline selected");
        Ok(())
    }

    /// Per-tick update with the frame produced this tick.
    ///
    /// Pending structural changes are applied first, even while paused.
    /// When paused, no processing happens and no new output is produced.
    pub fn update(&mut self, frame: &Frame) -> Result<()> {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(index) = pending {
            if let Err(e) = self.select(index) {
                tracing::warn!("Ignoring pipeline selection request: {}", e);
            }
        }

        if self.is_paused() {
            return Ok(());
        }

        let Some(active) = self.active else {
            return Ok(());
        };

        let pipeline = &mut self.pipelines[active];
        let telemetry = self.telemetry.get_or_insert_with(Telemetry::new);

        let outcome = catch_unwind(AssertUnwindSafe(|| pipeline.process(frame, telemetry)));
        match outcome {
            Ok(Ok(output)) => {
                self.last_output = Some(output);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(payload) => Err(SimError::Pipeline(format!(
                "pipeline panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }

    /// Apply a tuned parameter to the active pipeline
    pub fn apply_param(&mut self, name: &str, value: f64) {
        if let Some(active) = self.active {
            self.pipelines[active].apply_param(name, value);
        }
    }

    /// Borrow the active pipeline's telemetry record
    pub fn telemetry(&self) -> Option<&Telemetry> {
        self.telemetry.as_ref()
    }

    /// Clone the active pipeline's telemetry for the presentation handoff
    pub fn telemetry_snapshot(&self) -> Option<Telemetry> {
        self.telemetry.clone()
    }

    /// Clear the reserved error item after a successful tick
    pub fn clear_error(&mut self) {
        if let Some(telemetry) = self.telemetry.as_mut() {
            telemetry.clear_error();
        }
    }

    /// Populate the reserved error item after a failed tick
    pub fn set_error(&mut self, message: impl Into<String>) {
        if let Some(telemetry) = self.telemetry.as_mut() {
            telemetry.set_error(message);
        }
    }

    /// The frame produced by the last successful processing pass
    pub fn last_output(&self) -> Option<&Frame> {
        self.last_output.as_ref()
    }
}
