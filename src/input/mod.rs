//! Input sources and their manager
//!
//! An [`InputSource`] is a swappable unit producing frames: a synthetic
//! generator, a still frame, a recorded sequence. The
//! [`InputSourceManager`] owns the registered sources, advances the active
//! one every tick and exposes the latest frame to the main loop.
//!
//! # Cross-thread swaps
//!
//! Only the loop thread touches the sources themselves. A non-loop thread
//! requests a source change through [`InputSourceManager::set_pending_selection`]
//! (or the shared handle from [`InputSourceManager::pending_handle`]); the
//! request is consumed at the start of the next [`update`], a tick-safe
//! point, never mid-production.
//!
//! [`update`]: InputSourceManager::update

pub mod sources;

pub use sources::{
    register_builtin_sources, FrameSequenceSource, StillFrameSource, SyntheticSource, TestPattern,
};

use std::sync::{Arc, Mutex};

use crate::error::{Result, SimError};
use crate::types::Frame;

/// Shared single-slot "pending selection" exchanged between threads
pub type PendingSelection = Arc<Mutex<Option<usize>>>;

/// Capability interface for frame producers.
///
/// Implementations live on the loop thread once registered; `Send` is needed
/// only to move them there.
pub trait InputSource: Send {
    /// Display name used in source lists and the status line
    fn name(&self) -> &str;

    /// Advance by one step.
    ///
    /// A paused source must not consume or generate new data, but keeps
    /// reporting its last frame.
    fn update(&mut self, paused: bool) -> Result<()>;

    /// The most recently produced frame, if any
    fn latest_frame(&self) -> Option<&Frame>;

    /// Called when this source becomes the active one
    fn on_activate(&mut self) {}

    /// Called when this source stops being the active one
    fn on_deactivate(&mut self) {}
}

/// Owns the registered input sources and the active selection
pub struct InputSourceManager {
    sources: Vec<Box<dyn InputSource>>,
    active: Option<usize>,
    pending: PendingSelection,
}

impl Default for InputSourceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl InputSourceManager {
    /// Create an empty manager with its own pending-selection slot
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            active: None,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    /// Register a source; registration order is selection-index order
    pub fn register(&mut self, source: Box<dyn InputSource>) {
        tracing::debug!(source = source.name(), "Registered input source");
        self.sources.push(source);
    }

    /// Names of all registered sources, in index order
    pub fn list(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    /// Index of the active source, if one is selected
    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    /// Name of the active source, if one is selected
    pub fn active_name(&self) -> Option<&str> {
        self.active.map(|i| self.sources[i].name())
    }

    /// Clone of the shared pending-selection slot, safe to hand to any thread
    pub fn pending_handle(&self) -> PendingSelection {
        Arc::clone(&self.pending)
    }

    /// Request a source change from any thread; applied at the next `update`
    pub fn set_pending_selection(&self, index: usize) {
        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = Some(index);
    }

    /// Switch the active source immediately. Loop thread only.
    pub fn select(&mut self, index: usize) -> Result<()> {
        if index >= self.sources.len() {
            return Err(SimError::Selection {
                index,
                available: self.sources.len(),
            });
        }
        if self.active == Some(index) {
            return Ok(());
        }

        if let Some(old) = self.active {
            self.sources[old].on_deactivate();
        }
        self.active = Some(index);
        self.sources[index].on_activate();
        tracing::info!(source = self.sources[index].name(), "Input source selected");
        Ok(())
    }

    /// Per-tick advance: consume a pending swap request, then step the
    /// active source. Source errors are logged, not propagated; the loop
    /// sees them as "no frame this tick".
    pub fn update(&mut self, paused: bool) {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(index) = pending {
            if let Err(e) = self.select(index) {
                tracing::warn!("Ignoring source selection request: {}", e);
            }
        }

        if let Some(active) = self.active {
            if let Err(e) = self.sources[active].update(paused) {
                tracing::warn!(
                    source = self.sources[active].name(),
                    "Input source update failed: {}",
                    e
                );
            }
        }
    }

    /// The latest frame from the active source
    pub fn latest_frame(&self) -> Option<&Frame> {
        self.active.and_then(|i| self.sources[i].latest_frame())
    }
}
