//! The simulator process instance and its main loop
//!
//! A [`Simulator`] is one "process instance": the lifecycle state machine,
//! the owned managers, the event primitive and the tick loop tying them
//! together. Exactly one instance loops at a time; [`SimHandle::restart`]
//! tears the current one down and spawns a brand-new instance on a fresh
//! thread.
//!
//! # Threading
//!
//! The loop runs on one dedicated thread and never shares its managers.
//! Other threads interact only through a [`SimHandle`]: enqueue a closure on
//! the event primitive, flip the pause flag, drop a selection request into a
//! pending slot, or request destroy/restart. All of those are consumed at
//! tick-safe points.
//!
//! # Tick order
//!
//! Every iteration: drain cross-thread requests, publish the status line,
//! advance the input source (pause-aware), run tuner housekeeping, process
//! the frame (absorbing pipeline failures into the telemetry error item),
//! post the output and telemetry, update the rate counter, then throttle.
//! Frameless ticks skip processing and posting but still hand telemetry to
//! the sink and still respect the frame budget.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::config::{ConfigStore, SimConfig};
use crate::error::{Result, SimError};
use crate::event::{EventHandler, ListenerId};
use crate::fps::{FpsCounter, FpsLimiter};
use crate::input::{register_builtin_sources, InputSource, InputSourceManager, PendingSelection};
use crate::pipeline::{register_builtin_pipelines, PipelineManager, VisionPipeline};
use crate::runtime;
use crate::tuner::{PendingParams, TunerManager};
use crate::types::CancelToken;
use crate::viewport::{shared_sink, FramePoster, PresentationSink, SharedSink};

/// Instance ids are monotonic per OS process; used only for log correlation
static NEXT_INSTANCE_ID: AtomicU32 = AtomicU32::new(1);

/// Lifecycle state of a simulator instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimState {
    /// Constructed, `init` not called yet
    Uninitialized,
    /// Inside `init`, before the loop starts
    Initializing,
    /// Looping
    Running,
    /// Teardown in progress
    Destroying,
    /// Teardown complete; the loop has stopped or is about to observe the stop
    Destroyed,
}

/// Why a running instance is being destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    /// User-requested shutdown
    UserRequested,
    /// Display-theme change requiring a full presentation teardown
    ThemeChanging,
    /// Restart: a new instance spawns as this one winds down
    Restart,
}

/// Builds a fresh, un-run simulator instance; used by restart
pub type SimFactory = dyn Fn() -> Simulator + Send + Sync;

/// Coarse-interval process resident-memory probe for the status line
struct MemorySampler {
    system: System,
    pid: Pid,
    last_refresh: Option<Instant>,
    cached_mb: u64,
}

impl MemorySampler {
    fn new() -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(std::process::id()),
            last_refresh: None,
            cached_mb: 0,
        }
    }

    /// Resident set size in MB, refreshed at most once per second
    fn sample(&mut self) -> u64 {
        let due = self
            .last_refresh
            .map_or(true, |t| t.elapsed() >= Duration::from_secs(1));
        if due {
            self.system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[self.pid]),
                true,
                ProcessRefreshKind::nothing().with_memory(),
            );
            self.cached_mb = self
                .system
                .process(self.pid)
                .map(|p| p.memory() / (1024 * 1024))
                .unwrap_or(0);
            self.last_refresh = Some(Instant::now());
        }
        self.cached_mb
    }
}

/// One simulator process instance
pub struct Simulator {
    instance_id: u32,
    state: Arc<Mutex<SimState>>,
    config: SimConfig,
    store: Box<dyn ConfigStore>,
    on_main_update: Arc<EventHandler>,
    inputs: InputSourceManager,
    pipelines: Option<PipelineManager>,
    pending_sources: Vec<Box<dyn InputSource>>,
    pending_pipelines: Vec<Box<dyn VisionPipeline>>,
    tuner: TunerManager,
    sink: SharedSink,
    poster: Option<FramePoster>,
    limiter: FpsLimiter,
    fps: FpsCounter,
    cancel: CancelToken,
    pending_destroy: Arc<Mutex<Option<DestroyReason>>>,
    destroyed_for: Option<DestroyReason>,
    // Shared with the pipeline manager once it is constructed in init()
    paused: Arc<AtomicBool>,
    pipeline_selector: PendingSelection,
    respawn: Option<Arc<SimFactory>>,
    memory: MemorySampler,
    last_active_source: Option<String>,
    last_active_pipeline: Option<String>,
}

impl Simulator {
    /// Create an un-run instance around its two boundary collaborators
    pub fn new(sink: Box<dyn PresentationSink>, store: Box<dyn ConfigStore>) -> Self {
        Self {
            instance_id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::SeqCst),
            state: Arc::new(Mutex::new(SimState::Uninitialized)),
            config: SimConfig::default(),
            store,
            on_main_update: Arc::new(EventHandler::new("on_main_update")),
            inputs: InputSourceManager::new(),
            pipelines: None,
            pending_sources: Vec::new(),
            pending_pipelines: Vec::new(),
            tuner: TunerManager::new(),
            sink: shared_sink(sink),
            poster: None,
            limiter: FpsLimiter::new(crate::config::DEFAULT_TARGET_FPS),
            fps: FpsCounter::new(),
            cancel: CancelToken::new(),
            pending_destroy: Arc::new(Mutex::new(None)),
            destroyed_for: None,
            paused: Arc::new(AtomicBool::new(false)),
            pipeline_selector: Arc::new(Mutex::new(None)),
            respawn: None,
            memory: MemorySampler::new(),
            last_active_source: None,
            last_active_pipeline: None,
        }
    }

    /// Opaque identity for log correlation, stable for this instance's lifetime
    pub fn instance_id(&self) -> u32 {
        self.instance_id
    }

    /// Current lifecycle state
    pub fn state(&self) -> SimState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install the factory used to spawn a fresh instance on restart
    pub fn set_respawn(&mut self, factory: Arc<SimFactory>) {
        self.respawn = Some(factory);
    }

    /// Register an extra input source before `init`; built-ins come first
    pub fn register_source(&mut self, source: Box<dyn InputSource>) {
        self.pending_sources.push(source);
    }

    /// Register an extra pipeline before `init`; built-ins come first
    pub fn register_pipeline(&mut self, pipeline: Box<dyn VisionPipeline>) {
        self.pending_pipelines.push(pipeline);
    }

    /// Cross-thread control handle for this instance
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            instance_id: self.instance_id,
            state: Arc::clone(&self.state),
            on_main_update: Arc::clone(&self.on_main_update),
            paused: Arc::clone(&self.paused),
            source_selector: self.inputs.pending_handle(),
            pipeline_selector: Arc::clone(&self.pipeline_selector),
            tuner_params: self.tuner.pending_handle(),
            pending_destroy: Arc::clone(&self.pending_destroy),
            cancel: self.cancel.clone(),
        }
    }

    /// Initialize this instance and enter the main loop.
    ///
    /// Performs, in order: one-time imaging-runtime setup (fatal if both
    /// strategies fail), deferred pipeline-manager construction, config
    /// load, asynchronous sink initialization, source/pipeline registration,
    /// blocking on sink readiness, initial selection, then the loop. Returns
    /// after the loop has been stopped by `destroy`.
    pub fn init(&mut self) -> Result<()> {
        self.set_state(SimState::Initializing);
        tracing::info!(
            "Initializing VisionSim v{} (instance {:08x})",
            crate::VERSION,
            self.instance_id
        );

        runtime::init_imaging_runtime()?;

        // Deferred until after runtime setup: kernels picked there feed the
        // built-in pipelines
        let mut pipelines =
            PipelineManager::with_shared(Arc::clone(&self.paused), Arc::clone(&self.pipeline_selector));
        register_builtin_pipelines(&mut pipelines);
        for pipeline in self.pending_pipelines.drain(..) {
            pipelines.register(pipeline);
        }

        self.config = match self.store.load() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load configuration, using defaults: {}", e);
                SimConfig::default()
            }
        };
        self.limiter.set_target_fps(self.config.target_fps);

        self.lock_sink().init_async(self.config.theme);

        register_builtin_sources(&mut self.inputs);
        for source in self.pending_sources.drain(..) {
            self.inputs.register(source);
        }

        self.lock_sink().wait_for_init();

        let source_names = self.inputs.list();
        if !source_names.is_empty() {
            let index = preferred_index(&self.config.preferred_source, &source_names);
            if let Err(e) = self.inputs.select(index) {
                tracing::warn!("Failed to select initial source: {}", e);
            }
        }
        let pipeline_names = pipelines.list();
        if !pipeline_names.is_empty() {
            let index = preferred_index(&self.config.preferred_pipeline, &pipeline_names);
            if let Err(e) = pipelines.select(index) {
                tracing::warn!("Failed to select initial pipeline: {}", e);
            }
        }

        self.poster = Some(FramePoster::new(Arc::clone(&self.sink))?);

        self.set_state(SimState::Running);
        let pipelines = self.begin_loop(pipelines);
        self.pipelines = Some(pipelines);
        Ok(())
    }

    /// `init` plus restart handling; the usual entry point for a loop thread
    pub fn run(&mut self) -> Result<()> {
        self.init()?;
        if matches!(self.destroyed_for, Some(DestroyReason::Restart)) {
            self.spawn_successor();
        }
        Ok(())
    }

    fn begin_loop(&mut self, mut pipelines: PipelineManager) -> PipelineManager {
        tracing::info!("Begin simulator loop");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            if let Some(reason) = self.take_pending_destroy() {
                self.destroy(reason);
                break;
            }

            // Drain cross-thread requests first so swaps/pauses they issue
            // take effect within this same tick
            self.on_main_update.dispatch();

            self.publish_status(&pipelines);

            let paused = pipelines.is_paused();
            self.inputs.update(paused);
            self.tuner.update(&mut pipelines);

            let frame = self
                .inputs
                .latest_frame()
                .filter(|f| !f.is_empty())
                .cloned();

            match frame {
                Some(frame) => {
                    match pipelines.update(&frame) {
                        Ok(()) => pipelines.clear_error(),
                        Err(e) => {
                            tracing::error!("Error while processing pipeline: {}", e);
                            pipelines.set_error(
                                "Error while processing pipeline\nCheck console for details.",
                            );
                        }
                    }

                    if !paused {
                        if let (Some(poster), Some(output)) =
                            (self.poster.as_ref(), pipelines.last_output())
                        {
                            poster.post(output.clone());
                        }
                    }

                    self.lock_sink().update_telemetry(pipelines.telemetry_snapshot());

                    if !paused {
                        self.fps.update();
                    }
                }
                None => {
                    // No-op tick: nothing processed or posted, but telemetry
                    // still flows and the frame budget still applies
                    self.lock_sink().update_telemetry(pipelines.telemetry_snapshot());
                }
            }

            if self.limiter.sync(&self.cancel).is_err() {
                break;
            }
        }

        tracing::warn!(
            "Simulator loop ended (instance {:08x})",
            self.instance_id
        );
        pipelines
    }

    /// Tear this instance down: best-effort config save, presentation
    /// close, then the cancellation-token trip that stops the loop.
    pub fn destroy(&mut self, reason: DestroyReason) {
        self.set_state(SimState::Destroying);
        tracing::warn!(
            "Destroying simulator instance {:08x} due to {:?}",
            self.instance_id,
            reason
        );

        // Remember the live selections for the next run
        self.config.preferred_source = self.last_active_source.clone();
        self.config.preferred_pipeline = self.last_active_pipeline.clone();

        tracing::info!("Saving configuration...");
        if let Err(e) = self.store.save(&self.config) {
            tracing::error!("Failed to save configuration: {}", e);
        }

        if let Some(mut poster) = self.poster.take() {
            poster.close();
        }
        self.lock_sink().close();

        self.destroyed_for = Some(reason);
        self.set_state(SimState::Destroyed);
        self.cancel.cancel();
    }

    /// Reason this instance was destroyed, once it has been
    pub fn destroyed_for(&self) -> Option<DestroyReason> {
        self.destroyed_for
    }

    fn spawn_successor(&self) {
        let Some(factory) = self.respawn.as_ref() else {
            tracing::warn!("Restart requested but no respawn factory is configured");
            return;
        };
        tracing::info!("Restarting...");

        let factory = Arc::clone(factory);
        let spawned = std::thread::Builder::new()
            .name("visionsim-main".to_string())
            .spawn(move || {
                let mut sim = (factory)();
                sim.set_respawn(factory);
                if let Err(e) = sim.run() {
                    tracing::error!("Simulator terminated with error: {}", e);
                }
            });
        if let Err(e) = spawned {
            tracing::error!("Failed to spawn restarted simulator: {}", e);
        }
    }

    fn publish_status(&mut self, pipelines: &PipelineManager) {
        self.last_active_source = self.inputs.active_name().map(str::to_string);
        self.last_active_pipeline = pipelines.active_name().map(str::to_string);

        let poster_fps = self.poster.as_ref().map(|p| p.fps()).unwrap_or(0);
        let paused = if pipelines.is_paused() { " (Paused)" } else { "" };
        let suffix = format!(
            " ({} Pipeline FPS) ({} Poster FPS){} ({} MB resident)",
            self.fps.fps(),
            poster_fps,
            paused,
            self.memory.sample()
        );

        let status = match &self.last_active_pipeline {
            Some(name) => format!("{}{}", name, suffix),
            None => format!("No pipeline{}", suffix),
        };
        self.lock_sink().set_status(status);
    }

    fn take_pending_destroy(&self) -> Option<DestroyReason> {
        self.pending_destroy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    fn set_state(&self, state: SimState) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        tracing::debug!(
            "State {:?} -> {:?} (instance {:08x})",
            *guard,
            state,
            self.instance_id
        );
        *guard = state;
    }

    fn lock_sink(&self) -> std::sync::MutexGuard<'_, Box<dyn PresentationSink>> {
        self.sink.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Spawn a simulator built by `factory` on a fresh loop thread.
///
/// The factory is retained for restarts. Returns the instance's control
/// handle and the loop thread's join handle.
pub fn launch(
    factory: Arc<SimFactory>,
) -> Result<(SimHandle, std::thread::JoinHandle<()>)> {
    let (handle_tx, handle_rx) = std::sync::mpsc::sync_channel(1);
    let thread_factory = Arc::clone(&factory);

    let join = std::thread::Builder::new()
        .name("visionsim-main".to_string())
        .spawn(move || {
            let mut sim = (thread_factory)();
            sim.set_respawn(thread_factory);
            let _ = handle_tx.send(sim.handle());
            if let Err(e) = sim.run() {
                tracing::error!("Simulator terminated with error: {}", e);
            }
        })?;

    let handle = handle_rx.recv().map_err(|_| {
        SimError::Channel("simulator thread died before reporting its handle".to_string())
    })?;
    Ok((handle, join))
}

/// Cross-thread control surface for one simulator instance.
///
/// Everything here is safe from any thread; requests are applied by the
/// loop at tick-safe points.
#[derive(Clone)]
pub struct SimHandle {
    instance_id: u32,
    state: Arc<Mutex<SimState>>,
    on_main_update: Arc<EventHandler>,
    paused: Arc<AtomicBool>,
    source_selector: PendingSelection,
    pipeline_selector: PendingSelection,
    tuner_params: PendingParams,
    pending_destroy: Arc<Mutex<Option<DestroyReason>>>,
    cancel: CancelToken,
}

impl SimHandle {
    /// Identity of the instance this handle controls
    pub fn instance_id(&self) -> u32 {
        self.instance_id
    }

    /// Current lifecycle state of the instance
    pub fn state(&self) -> SimState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the instance is in its loop
    pub fn is_running(&self) -> bool {
        self.state() == SimState::Running
    }

    /// The instance's event primitive, for arbitrary loop-thread requests
    pub fn on_main_update(&self) -> &Arc<EventHandler> {
        &self.on_main_update
    }

    /// Enqueue a one-shot closure for the next tick's dispatch
    pub fn run_on_loop(&self, callback: impl FnMut() + Send + 'static) -> ListenerId {
        self.on_main_update.do_once(callback)
    }

    /// Flip the processing pause flag; effective from the next tick
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    /// Whether processing is paused
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Request an input-source switch, applied at the next tick-safe point
    pub fn request_source(&self, index: usize) {
        *self
            .source_selector
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(index);
    }

    /// Request a pipeline switch, applied at the next tick-safe point
    pub fn request_pipeline(&self, index: usize) {
        *self
            .pipeline_selector
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(index);
    }

    /// Queue a tuned-parameter write for the active pipeline
    pub fn set_param(&self, name: impl Into<String>, value: f64) {
        self.tuner_params
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((name.into(), value));
    }

    /// Request teardown with the given reason.
    ///
    /// The first request wins; later requests before the loop consumes it
    /// are ignored so an instance is destroyed exactly once.
    pub fn destroy(&self, reason: DestroyReason) {
        let mut pending = self
            .pending_destroy
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if pending.is_none() {
            *pending = Some(reason);
        }
    }

    /// Request a user-initiated shutdown
    pub fn stop(&self) {
        self.destroy(DestroyReason::UserRequested);
    }

    /// Request a restart: this instance is destroyed and a fresh one spawns
    pub fn restart(&self) {
        self.destroy(DestroyReason::Restart);
    }

    /// Whether the instance's cancellation token has tripped
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

fn preferred_index(preferred: &Option<String>, names: &[String]) -> usize {
    preferred
        .as_ref()
        .and_then(|wanted| names.iter().position(|name| name == wanted))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MockConfigStore;
    use crate::viewport::ChannelPresentationSink;
    use serial_test::serial;

    fn quick_config() -> SimConfig {
        SimConfig {
            target_fps: 120,
            ..SimConfig::default()
        }
    }

    #[test]
    fn test_preferred_index_falls_back_to_zero() {
        let names = vec!["a".to_string(), "b".to_string()];
        assert_eq!(preferred_index(&None, &names), 0);
        assert_eq!(preferred_index(&Some("b".to_string()), &names), 1);
        assert_eq!(preferred_index(&Some("missing".to_string()), &names), 0);
    }

    #[test]
    fn test_instance_ids_are_unique() {
        let (sink_a, _rx_a) = ChannelPresentationSink::new();
        let (sink_b, _rx_b) = ChannelPresentationSink::new();
        let mut store_a = MockConfigStore::new();
        store_a.expect_load().returning(|| Ok(SimConfig::default()));
        store_a.expect_save().returning(|_| Ok(()));
        let mut store_b = MockConfigStore::new();
        store_b.expect_load().returning(|| Ok(SimConfig::default()));
        store_b.expect_save().returning(|_| Ok(()));

        let a = Simulator::new(Box::new(sink_a), Box::new(store_a));
        let b = Simulator::new(Box::new(sink_b), Box::new(store_b));
        assert_ne!(a.instance_id(), b.instance_id());
        assert_eq!(a.state(), SimState::Uninitialized);
    }

    #[test]
    #[serial]
    fn test_lifecycle_save_happens_once() {
        let (sink, _rx) = ChannelPresentationSink::new();
        let mut store = MockConfigStore::new();
        store.expect_load().times(1).returning(|| Ok(quick_config()));
        store.expect_save().times(1).returning(|_| Ok(()));

        let mut sim = Simulator::new(Box::new(sink), Box::new(store));
        let handle = sim.handle();

        let join = std::thread::spawn(move || {
            sim.run().unwrap();
            sim
        });

        // Let it tick a bit, then shut down
        std::thread::sleep(Duration::from_millis(100));
        handle.stop();
        let sim = join.join().unwrap();

        assert_eq!(sim.state(), SimState::Destroyed);
        assert_eq!(sim.destroyed_for(), Some(DestroyReason::UserRequested));
        assert!(handle.is_cancelled());
        // MockConfigStore verifies the load/save counts on drop
    }

    #[test]
    #[serial]
    fn test_save_failure_does_not_prevent_teardown() {
        let (sink, rx) = ChannelPresentationSink::new();
        let mut store = MockConfigStore::new();
        store.expect_load().returning(|| Ok(quick_config()));
        store
            .expect_save()
            .returning(|_| Err(SimError::Config("disk full".to_string())));

        let mut sim = Simulator::new(Box::new(sink), Box::new(store));
        let handle = sim.handle();

        let join = std::thread::spawn(move || {
            sim.run().unwrap();
            sim
        });

        std::thread::sleep(Duration::from_millis(50));
        handle.stop();
        let sim = join.join().unwrap();

        assert_eq!(sim.state(), SimState::Destroyed);
        // The sink was still closed despite the save failure
        let events = rx.drain();
        assert!(events
            .iter()
            .any(|e| matches!(e, crate::viewport::SinkEvent::Closed)));
    }

    #[test]
    fn test_memory_sampler_reports_something() {
        let mut sampler = MemorySampler::new();
        // A running test binary has a nonzero resident set
        assert!(sampler.sample() > 0);
    }

    #[test]
    fn test_handle_destroy_first_reason_wins() {
        let (sink, _rx) = ChannelPresentationSink::new();
        let mut store = MockConfigStore::new();
        store.expect_load().returning(|| Ok(SimConfig::default()));
        store.expect_save().returning(|_| Ok(()));

        let sim = Simulator::new(Box::new(sink), Box::new(store));
        let handle = sim.handle();

        handle.restart();
        handle.stop();

        assert_eq!(sim.take_pending_destroy(), Some(DestroyReason::Restart));
        assert_eq!(sim.take_pending_destroy(), None);
    }
}
