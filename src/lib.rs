//! # VisionSim-RS: vision-pipeline simulator core
//!
//! An interactive simulator core for iterative development of computer-vision
//! pipelines: pick an input source, activate a pipeline, watch the processed
//! output live while tuning parameters. Built for robotics-competition teams
//! prototyping vision code against recorded or synthetic footage before
//! deploying to embedded hardware.
//!
//! ## Architecture
//!
//! - **Simulator**: a single-threaded main loop that each tick drains
//!   cross-thread requests, pulls a frame from the active input source, runs
//!   it through the active pipeline, and throttles to the configured rate
//! - **Event primitive**: thread-safe one-shot/persistent listener dispatch,
//!   the only way other threads run code on the loop thread
//! - **Managers**: swappable input sources and pipelines behind capability
//!   traits, with cross-thread swap requests applied at tick-safe points
//! - **Presentation**: a sink trait plus a poster thread that decouples
//!   display cadence from processing cadence
//! - **Communication**: crossbeam channels with `try_send` backpressure
//!
//! ## Configuration
//!
//! Simulator settings and launcher state are stored in the
//! platform-appropriate data directory under `org.visionsim.visionsim-rs`:
//!
//! - **Linux**: `~/.local/share/org.visionsim.visionsim-rs/`
//! - **macOS**: `~/Library/Application Support/org.visionsim.visionsim-rs/`
//! - **Windows**: `%APPDATA%\org.visionsim.visionsim-rs\`
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use visionsim_rs::{
//!     config::FileConfigStore,
//!     sim::{launch, SimFactory, Simulator},
//!     viewport::ChannelPresentationSink,
//! };
//!
//! fn main() -> anyhow::Result<()> {
//!     let factory: Arc<SimFactory> = Arc::new(|| {
//!         let (sink, receiver) = ChannelPresentationSink::new();
//!         std::thread::spawn(move || {
//!             // Feed `receiver` into your UI of choice
//!             while let Some(event) = receiver.recv_timeout(std::time::Duration::from_secs(1)) {
//!                 let _ = event;
//!             }
//!         });
//!         let store = FileConfigStore::default_location().expect("config dir");
//!         Simulator::new(Box::new(sink), Box::new(store))
//!     });
//!
//!     let (handle, join) = launch(factory)?;
//!     handle.request_pipeline(1);
//!     // ... later:
//!     handle.stop();
//!     join.join().unwrap();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod fps;
pub mod input;
pub mod pipeline;
pub mod runtime;
pub mod sim;
pub mod tuner;
pub mod types;
pub mod viewport;

// Re-export commonly used types
pub use config::{AppState, ConfigStore, FileConfigStore, SimConfig, Theme};
pub use error::{Result, SimError};
pub use event::{EventHandler, ListenerId};
pub use input::{InputSource, InputSourceManager};
pub use pipeline::{PipelineManager, VisionPipeline};
pub use sim::{launch, DestroyReason, SimHandle, SimState, Simulator};
pub use types::{CancelToken, Frame, Telemetry, TelemetryItem};
pub use viewport::{ChannelPresentationSink, FramePoster, PresentationSink, SinkEvent};

/// Crate version, surfaced in the startup log line
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
