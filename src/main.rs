//! VisionSim - Main Entry Point
//!
//! Launches the simulator core headless: the built-in synthetic sources feed
//! the built-in pipelines, and presentation events are drained into the log.
//! A GUI shell embeds the same core through [`visionsim_rs::sim::launch`]
//! with its own `PresentationSink` implementation.

use std::sync::Arc;

use visionsim_rs::config::{AppState, FileConfigStore};
use visionsim_rs::sim::{launch, SimFactory, Simulator};
use visionsim_rs::viewport::{ChannelPresentationSink, SinkEvent};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,visionsim_rs=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting VisionSim v{}", visionsim_rs::VERSION);

    // Record the launch in the app state
    let mut app_state = AppState::load_or_default();
    app_state.record_run();
    if let Err(e) = app_state.save() {
        tracing::warn!("Failed to save app state: {}", e);
    }

    let factory: Arc<SimFactory> = Arc::new(|| {
        let (sink, receiver) = ChannelPresentationSink::new();

        // Headless presentation consumer: status lines and telemetry go to
        // the log, frames are counted and dropped
        std::thread::spawn(move || {
            let mut last_status = String::new();
            loop {
                match receiver.recv_timeout(std::time::Duration::from_secs(5)) {
                    Some(SinkEvent::Status(status)) => {
                        if status != last_status {
                            tracing::info!("{}", status);
                            last_status = status;
                        }
                    }
                    Some(SinkEvent::Telemetry(Some(telemetry))) if telemetry.has_error() => {
                        tracing::warn!("{}", telemetry.error().value);
                    }
                    Some(SinkEvent::Closed) => break,
                    Some(_) => {}
                    None => {}
                }
            }
        });

        let store = match FileConfigStore::default_location() {
            Ok(store) => store,
            Err(e) => {
                tracing::warn!("Falling back to config in working directory: {}", e);
                FileConfigStore::new("simulator.toml")
            }
        };
        Simulator::new(Box::new(sink), Box::new(store))
    });

    let (handle, join) = launch(factory)?;
    tracing::info!(
        "Simulator instance {:08x} launched; Ctrl+C to exit",
        handle.instance_id()
    );

    // The loop thread owns the process lifetime from here
    join.join()
        .map_err(|_| anyhow::anyhow!("simulator thread panicked"))?;

    tracing::info!("Shutting down...");
    Ok(())
}
