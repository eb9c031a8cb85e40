//! Presentation boundary: sink trait, headless sink and the frame poster
//!
//! The GUI viewport is an external collaborator; the core only talks to the
//! [`PresentationSink`] trait. [`ChannelPresentationSink`] is the headless
//! implementation used by tests and embedders: every call becomes a
//! [`SinkEvent`] on a bounded crossbeam channel, with `try_send`
//! backpressure so a slow consumer can never stall the loop.
//!
//! [`FramePoster`] decouples display cadence from processing cadence: the
//! loop hands it a frame copy with a non-blocking `post`, and a dedicated
//! poster thread forwards frames to the sink at whatever rate the sink can
//! absorb, maintaining its own FPS counter for the status line.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::config::Theme;
use crate::error::Result;
use crate::fps::FpsCounter;
use crate::types::{Frame, Telemetry};

/// Default capacity of the poster's frame queue
pub const POSTER_QUEUE_CAPACITY: usize = 4;

/// Default capacity of the headless sink's event queue.
///
/// Roughly thirty seconds of events at the default tick rate; a consumer
/// that falls further behind starts losing events to backpressure.
pub const SINK_QUEUE_CAPACITY: usize = 10_000;

/// Boundary to the asynchronous presentation layer.
///
/// Implementations must not block the caller beyond a bounded handoff;
/// the loop calls these methods every tick.
pub trait PresentationSink: Send {
    /// Start asynchronous initialization with the given theme
    fn init_async(&mut self, theme: Theme);

    /// Block until asynchronous initialization has completed
    fn wait_for_init(&mut self);

    /// Hand over a finished frame for display
    fn post_frame(&mut self, frame: Frame);

    /// Hand over the current telemetry record (absent when no pipeline is active)
    fn update_telemetry(&mut self, telemetry: Option<Telemetry>);

    /// Replace the human-readable status line
    fn set_status(&mut self, status: String);

    /// Tear the presentation layer down; no calls follow
    fn close(&mut self);
}

/// A sink shared between the loop thread and the poster thread
pub type SharedSink = Arc<Mutex<Box<dyn PresentationSink>>>;

/// Wrap a sink for shared use
pub fn shared_sink(sink: Box<dyn PresentationSink>) -> SharedSink {
    Arc::new(Mutex::new(sink))
}

/// One presentation-layer call, reified for the headless sink's consumer
#[derive(Debug, Clone)]
pub enum SinkEvent {
    /// `init_async` was called with this theme
    Initialized(Theme),
    /// A frame arrived for display
    Frame(Frame),
    /// A telemetry handoff (absent when no pipeline is active)
    Telemetry(Option<Telemetry>),
    /// The status line changed
    Status(String),
    /// The sink was closed
    Closed,
}

/// Consumer side of a [`ChannelPresentationSink`]
pub struct SinkReceiver {
    receiver: Receiver<SinkEvent>,
}

impl SinkReceiver {
    /// Receive one event without blocking
    pub fn try_recv(&self) -> Option<SinkEvent> {
        self.receiver.try_recv().ok()
    }

    /// Receive one event, waiting up to `timeout`
    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Option<SinkEvent> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Receive all pending events
    pub fn drain(&self) -> Vec<SinkEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Headless [`PresentationSink`] that forwards every call as a [`SinkEvent`]
pub struct ChannelPresentationSink {
    sender: Sender<SinkEvent>,
    dropped: u64,
}

impl ChannelPresentationSink {
    /// Create a sink and its consumer half
    pub fn new() -> (Self, SinkReceiver) {
        let (sender, receiver) = bounded(SINK_QUEUE_CAPACITY);
        (
            Self { sender, dropped: 0 },
            SinkReceiver { receiver },
        )
    }

    fn push(&mut self, event: SinkEvent) {
        if self.sender.try_send(event).is_err() {
            self.dropped += 1;
        }
    }
}

impl PresentationSink for ChannelPresentationSink {
    fn init_async(&mut self, theme: Theme) {
        self.push(SinkEvent::Initialized(theme));
    }

    fn wait_for_init(&mut self) {
        // The headless sink is ready as soon as init_async ran
    }

    fn post_frame(&mut self, frame: Frame) {
        self.push(SinkEvent::Frame(frame));
    }

    fn update_telemetry(&mut self, telemetry: Option<Telemetry>) {
        self.push(SinkEvent::Telemetry(telemetry));
    }

    fn set_status(&mut self, status: String) {
        self.push(SinkEvent::Status(status));
    }

    fn close(&mut self) {
        if self.dropped > 0 {
            tracing::warn!(
                dropped = self.dropped,
                "Presentation sink dropped events under backpressure"
            );
        }
        let _ = self.sender.try_send(SinkEvent::Closed);
    }
}

/// Non-blocking frame handoff to a dedicated display-forwarding thread
pub struct FramePoster {
    sender: Option<Sender<Frame>>,
    handle: Option<JoinHandle<()>>,
    fps: Arc<AtomicU32>,
    dropped: Arc<AtomicU64>,
}

impl FramePoster {
    /// Spawn the poster thread forwarding frames into `sink`
    pub fn new(sink: SharedSink) -> Result<Self> {
        let (sender, receiver) = bounded::<Frame>(POSTER_QUEUE_CAPACITY);
        let fps = Arc::new(AtomicU32::new(0));
        let dropped = Arc::new(AtomicU64::new(0));

        let fps_out = Arc::clone(&fps);
        let handle = std::thread::Builder::new()
            .name("visionsim-poster".to_string())
            .spawn(move || {
                let mut counter = FpsCounter::new();
                for frame in receiver {
                    sink.lock().unwrap_or_else(|e| e.into_inner()).post_frame(frame);
                    counter.update();
                    fps_out.store(counter.fps(), Ordering::Relaxed);
                }
                tracing::debug!("Frame poster stopped");
            })?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            fps,
            dropped,
        })
    }

    /// Queue a frame for display. Never blocks; a full queue drops the
    /// frame and counts it.
    pub fn post(&self, frame: Frame) {
        let Some(sender) = &self.sender else { return };
        if sender.try_send(frame).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Achieved presentation rate, frames per second
    pub fn fps(&self) -> u32 {
        self.fps.load(Ordering::Relaxed)
    }

    /// Frames dropped because the display queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Disconnect the queue and join the poster thread
    pub fn close(&mut self) {
        self.sender = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FramePoster {
    fn drop(&mut self) {
        self.close();
    }
}
