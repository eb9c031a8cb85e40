//! Integration tests for the main-loop tick contract
//!
//! These tests drive a full simulator instance on its own thread, observe
//! the presentation sink's event stream, and validate the tick-level
//! guarantees: frameless ticks, per-tick error absorption, pause semantics
//! and cross-thread swaps.

mod common;

use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use common::{test_sim, CountingPipeline, FlakyPipeline};
use visionsim_rs::config::SimConfig;
use visionsim_rs::input::FrameSequenceSource;
use visionsim_rs::types::TELEMETRY_ERROR_MARKER;
use visionsim_rs::viewport::SinkEvent;
use visionsim_rs::SimState;

fn fast_config() -> SimConfig {
    SimConfig {
        target_fps: 100,
        ..SimConfig::default()
    }
}

#[test]
fn test_frameless_ticks_skip_processing_but_keep_telemetry_flowing() {
    let mut config = fast_config();
    config.preferred_source = Some("Empty".to_string());
    config.preferred_pipeline = Some("CountingPipeline".to_string());

    let (mut sim, receiver, _store) = test_sim(config);
    sim.register_source(Box::new(FrameSequenceSource::new("Empty", Vec::new())));
    let (pipeline, processed) = CountingPipeline::new();
    sim.register_pipeline(Box::new(pipeline));

    let handle = sim.handle();
    let join = thread::spawn(move || sim.run().unwrap());

    thread::sleep(Duration::from_millis(200));
    handle.stop();
    join.join().unwrap();

    // The pipeline never saw a frame
    assert_eq!(processed.load(Ordering::SeqCst), 0);

    let events = receiver.drain();
    let frames = events
        .iter()
        .filter(|e| matches!(e, SinkEvent::Frame(_)))
        .count();
    let telemetry_updates = events
        .iter()
        .filter(|e| matches!(e, SinkEvent::Telemetry(_)))
        .count();

    assert_eq!(frames, 0, "no frame may reach the sink without input");
    assert!(
        telemetry_updates > 5,
        "telemetry must still flow every tick, got {}",
        telemetry_updates
    );
}

#[test]
fn test_pipeline_error_is_surfaced_then_cleared() {
    let mut config = fast_config();
    config.preferred_pipeline = Some("FlakyPipeline".to_string());

    let (mut sim, receiver, _store) = test_sim(config);
    sim.register_pipeline(Box::new(FlakyPipeline::new(3)));

    let handle = sim.handle();
    let join = thread::spawn(move || sim.run().unwrap());

    thread::sleep(Duration::from_millis(300));
    handle.stop();
    join.join().unwrap();

    let telemetry: Vec<_> = receiver
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            SinkEvent::Telemetry(Some(t)) => Some(t),
            _ => None,
        })
        .collect();

    let first_error = telemetry.iter().position(|t| t.has_error());
    let error_index = first_error.expect("the failing ticks must surface an error item");

    let errored = &telemetry[error_index];
    assert_eq!(errored.error().caption, TELEMETRY_ERROR_MARKER);
    assert!(!errored.error().value.is_empty());

    // Error state is not sticky: a later successful tick clears it
    assert!(
        telemetry[error_index..].iter().any(|t| !t.has_error()),
        "a successful tick after the failures must clear the error item"
    );

    // And the loop survived the failures
    assert!(telemetry.len() > 5);
}

#[test]
fn test_pause_stops_frames_and_keeps_telemetry() {
    let (mut sim, receiver, _store) = test_sim(fast_config());
    let handle = sim.handle();
    let join = thread::spawn(move || sim.run().unwrap());

    // Let it produce some frames first
    thread::sleep(Duration::from_millis(150));
    handle.set_paused(true);
    thread::sleep(Duration::from_millis(100));
    receiver.drain();

    // Paused window: no frames, telemetry still flowing
    thread::sleep(Duration::from_millis(200));
    let paused_events = receiver.drain();
    let frames = paused_events
        .iter()
        .filter(|e| matches!(e, SinkEvent::Frame(_)))
        .count();
    let telemetry_updates = paused_events
        .iter()
        .filter(|e| matches!(e, SinkEvent::Telemetry(_)))
        .count();
    let paused_status = paused_events
        .iter()
        .any(|e| matches!(e, SinkEvent::Status(s) if s.contains("(Paused)")));

    assert_eq!(frames, 0, "paused ticks must not post frames");
    assert!(telemetry_updates > 5, "telemetry must still flow while paused");
    assert!(paused_status, "the status line must carry the paused marker");

    // Unpausing resumes frame posting
    handle.set_paused(false);
    thread::sleep(Duration::from_millis(200));
    let resumed = receiver
        .drain()
        .iter()
        .filter(|e| matches!(e, SinkEvent::Frame(_)))
        .count();
    assert!(resumed > 0, "frames must resume after unpausing");

    handle.stop();
    join.join().unwrap();
}

#[test]
fn test_pipeline_swap_from_another_thread() {
    let (mut sim, receiver, _store) = test_sim(fast_config());
    let (pipeline, processed) = CountingPipeline::new();
    sim.register_pipeline(Box::new(pipeline));

    let handle = sim.handle();
    let join = thread::spawn(move || sim.run().unwrap());
    thread::sleep(Duration::from_millis(100));

    // Built-ins occupy indices 0 and 1; the registered extra is index 2
    handle.request_pipeline(2);
    thread::sleep(Duration::from_millis(200));

    assert!(
        processed.load(Ordering::SeqCst) > 0,
        "the swapped-in pipeline must start processing"
    );
    let status_mentions_it = receiver
        .drain()
        .iter()
        .any(|e| matches!(e, SinkEvent::Status(s) if s.starts_with("CountingPipeline")));
    assert!(status_mentions_it, "the status line must name the new pipeline");

    handle.stop();
    join.join().unwrap();
}

#[test]
fn test_source_swap_from_another_thread() {
    let mut config = fast_config();
    config.preferred_source = Some("Empty".to_string());

    let (mut sim, receiver, _store) = test_sim(config);
    sim.register_source(Box::new(FrameSequenceSource::new("Empty", Vec::new())));

    let handle = sim.handle();
    let join = thread::spawn(move || sim.run().unwrap());
    thread::sleep(Duration::from_millis(100));

    // Nothing flows from the empty source
    receiver.drain();

    // Swap to the built-in gradient source (index 0)
    handle.request_source(0);
    thread::sleep(Duration::from_millis(200));

    let frames = receiver
        .drain()
        .iter()
        .filter(|e| matches!(e, SinkEvent::Frame(_)))
        .count();
    assert!(frames > 0, "frames must flow after swapping to a live source");

    handle.stop();
    join.join().unwrap();
}

#[test]
fn test_loop_respects_frame_budget() {
    let mut config = fast_config();
    config.target_fps = 30;

    let (mut sim, receiver, _store) = test_sim(config);
    let handle = sim.handle();
    let join = thread::spawn(move || sim.run().unwrap());

    // Wait for the loop to reach steady state, then measure a one-second
    // window of status updates (exactly one per tick)
    thread::sleep(Duration::from_millis(300));
    receiver.drain();
    let window_start = Instant::now();
    thread::sleep(Duration::from_secs(1));
    let ticks = receiver
        .drain()
        .iter()
        .filter(|e| matches!(e, SinkEvent::Status(_)))
        .count();
    let window = window_start.elapsed();

    handle.stop();
    join.join().unwrap();

    // 30 ticks/second with scheduler tolerance
    let expected = 30.0 * window.as_secs_f64();
    assert!(
        (ticks as f64) >= expected * 0.6 && (ticks as f64) <= expected * 1.35,
        "expected ~{:.0} ticks in {:?}, got {}",
        expected,
        window,
        ticks
    );
}

#[test]
fn test_run_on_loop_executes_once() {
    let (mut sim, _receiver, _store) = test_sim(fast_config());
    let handle = sim.handle();
    let join = thread::spawn(move || sim.run().unwrap());

    let hits = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
    let hits_clone = hits.clone();
    handle.run_on_loop(move || {
        hits_clone.fetch_add(1, Ordering::SeqCst);
    });

    thread::sleep(Duration::from_millis(200));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    handle.stop();
    join.join().unwrap();
    assert_eq!(handle.state(), SimState::Destroyed);
}
