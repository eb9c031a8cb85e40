//! Shared helpers for integration tests
#![allow(dead_code)] // each test binary uses its own subset

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use visionsim_rs::config::{ConfigStore, SimConfig};
use visionsim_rs::error::{Result, SimError};
use visionsim_rs::pipeline::VisionPipeline;
use visionsim_rs::types::{Frame, Telemetry};
use visionsim_rs::viewport::{ChannelPresentationSink, SinkReceiver};
use visionsim_rs::Simulator;

/// In-memory [`ConfigStore`] whose call counts and saved value stay
/// observable from the test after the simulator takes ownership.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    config: Mutex<SimConfig>,
    loads: AtomicU32,
    saves: AtomicU32,
    last_saved: Mutex<Option<SimConfig>>,
}

impl SharedStore {
    pub fn new(config: SimConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                config: Mutex::new(config),
                loads: AtomicU32::new(0),
                saves: AtomicU32::new(0),
                last_saved: Mutex::new(None),
            }),
        }
    }

    pub fn load_count(&self) -> u32 {
        self.inner.loads.load(Ordering::SeqCst)
    }

    pub fn save_count(&self) -> u32 {
        self.inner.saves.load(Ordering::SeqCst)
    }

    pub fn last_saved(&self) -> Option<SimConfig> {
        self.inner.last_saved.lock().unwrap().clone()
    }
}

impl ConfigStore for SharedStore {
    fn load(&self) -> Result<SimConfig> {
        self.inner.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.inner.config.lock().unwrap().clone())
    }

    fn save(&self, config: &SimConfig) -> Result<()> {
        self.inner.saves.fetch_add(1, Ordering::SeqCst);
        *self.inner.last_saved.lock().unwrap() = Some(config.clone());
        *self.inner.config.lock().unwrap() = config.clone();
        Ok(())
    }
}

/// Pass-through pipeline counting how many frames it processed
pub struct CountingPipeline {
    pub processed: Arc<AtomicU32>,
}

impl CountingPipeline {
    pub fn new() -> (Self, Arc<AtomicU32>) {
        let processed = Arc::new(AtomicU32::new(0));
        (
            Self {
                processed: processed.clone(),
            },
            processed,
        )
    }
}

impl VisionPipeline for CountingPipeline {
    fn name(&self) -> &str {
        "CountingPipeline"
    }

    fn process(&mut self, input: &Frame, telemetry: &mut Telemetry) -> Result<Frame> {
        let n = self.processed.fetch_add(1, Ordering::SeqCst) + 1;
        telemetry.set("Processed", n.to_string());
        Ok(input.clone())
    }
}

/// Pipeline that fails its first `fail_first` calls, then succeeds
pub struct FlakyPipeline {
    calls: u32,
    fail_first: u32,
}

impl FlakyPipeline {
    pub fn new(fail_first: u32) -> Self {
        Self {
            calls: 0,
            fail_first,
        }
    }
}

impl VisionPipeline for FlakyPipeline {
    fn name(&self) -> &str {
        "FlakyPipeline"
    }

    fn process(&mut self, input: &Frame, telemetry: &mut Telemetry) -> Result<Frame> {
        self.calls += 1;
        if self.calls <= self.fail_first {
            return Err(SimError::Pipeline(format!(
                "synthetic failure #{}",
                self.calls
            )));
        }
        telemetry.set("Calls", self.calls.to_string());
        Ok(input.clone())
    }
}

/// Build a simulator around a headless sink and an in-memory store
pub fn test_sim(config: SimConfig) -> (Simulator, SinkReceiver, SharedStore) {
    let (sink, receiver) = ChannelPresentationSink::new();
    let store = SharedStore::new(config);
    let sim = Simulator::new(Box::new(sink), Box::new(store.clone()));
    (sim, receiver, store)
}
