//! Error handling for the VisionSim core
//!
//! This module defines custom error types and a Result alias for use
//! throughout the simulator.

use thiserror::Error;

/// Main error type for VisionSim operations
#[derive(Error, Debug)]
pub enum SimError {
    /// Errors raised by a pipeline while processing a frame
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Errors raised by an input source while producing a frame
    #[error("Input source error: {0}")]
    InputSource(String),

    /// Errors related to the one-time imaging runtime setup
    #[error("Imaging runtime error: {0}")]
    ImagingRuntime(String),

    /// A selection index that doesn't match any registered entry
    #[error("Invalid selection index {index}: only {available} registered")]
    Selection { index: usize, available: usize },

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<SimError>,
    },
}

impl SimError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        SimError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for VisionSim operations
pub type Result<T> = std::result::Result<T, SimError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

/// Extract a readable message from a panic payload.
///
/// Used wherever the core absorbs a panic from user-supplied code
/// (pipelines, event listeners) into a log entry.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}
