//! Built-in input sources
//!
//! Three concrete producers cover the common prototyping setups:
//!
//! - [`SyntheticSource`] - pattern generator that advances one step per
//!   unpaused tick, for working without any recorded footage
//! - [`StillFrameSource`] - a single frame repeated forever
//! - [`FrameSequenceSource`] - a pre-loaded frame sequence that loops like
//!   recorded footage
//!
//! Decoding cameras or video files is left to external source
//! implementations; the core only depends on the [`InputSource`] contract.

use crate::error::Result;
use crate::types::Frame;

use super::InputSource;

/// Pattern rendered by a [`SyntheticSource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPattern {
    /// Horizontal gradient scrolling one column per step
    Gradient,
    /// 8x8 checkerboard whose phase flips every 8 steps
    Checkerboard,
    /// White vertical bar sweeping across a black background
    MovingBar,
}

/// Frame generator driven by a step counter
pub struct SyntheticSource {
    name: String,
    pattern: TestPattern,
    width: usize,
    height: usize,
    step: u64,
    frame: Option<Frame>,
}

impl SyntheticSource {
    /// Create a generator with the given pattern and frame size
    pub fn new(name: impl Into<String>, pattern: TestPattern, width: usize, height: usize) -> Self {
        Self {
            name: name.into(),
            pattern,
            width,
            height,
            step: 0,
            frame: None,
        }
    }

    /// Steps taken since activation
    pub fn step(&self) -> u64 {
        self.step
    }

    fn render(&self) -> Frame {
        let mut frame = Frame::new(self.width, self.height);
        match self.pattern {
            TestPattern::Gradient => {
                for y in 0..self.height {
                    for x in 0..self.width {
                        let v = ((x as u64 + self.step) % 256) as u8;
                        frame.set_pixel(x, y, [v, v, v, 255]);
                    }
                }
            }
            TestPattern::Checkerboard => {
                let phase = (self.step / 8) % 2;
                for y in 0..self.height {
                    for x in 0..self.width {
                        let cell = ((x / 8 + y / 8) as u64 + phase) % 2;
                        let v = if cell == 0 { 0 } else { 255 };
                        frame.set_pixel(x, y, [v, v, v, 255]);
                    }
                }
            }
            TestPattern::MovingBar => {
                let bar_x = (self.step as usize) % self.width.max(1);
                frame.fill([0, 0, 0, 255]);
                for y in 0..self.height {
                    frame.set_pixel(bar_x, y, [255, 255, 255, 255]);
                }
            }
        }
        frame
    }
}

impl InputSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, paused: bool) -> Result<()> {
        if paused {
            return Ok(());
        }
        self.frame = Some(self.render());
        self.step = self.step.wrapping_add(1);
        Ok(())
    }

    fn latest_frame(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    fn on_deactivate(&mut self) {
        self.step = 0;
        self.frame = None;
    }
}

/// A single frame repeated forever
pub struct StillFrameSource {
    name: String,
    frame: Frame,
}

impl StillFrameSource {
    /// Wrap an already-decoded frame
    pub fn new(name: impl Into<String>, frame: Frame) -> Self {
        Self {
            name: name.into(),
            frame,
        }
    }
}

impl InputSource for StillFrameSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, _paused: bool) -> Result<()> {
        Ok(())
    }

    fn latest_frame(&self) -> Option<&Frame> {
        Some(&self.frame)
    }
}

/// A pre-loaded frame sequence that advances one frame per unpaused tick
/// and loops at the end, like recorded footage.
///
/// An empty sequence never produces a frame, which makes it the standard
/// way to exercise the loop's no-frame tick path in tests.
pub struct FrameSequenceSource {
    name: String,
    frames: Vec<Frame>,
    position: usize,
    started: bool,
}

impl FrameSequenceSource {
    /// Wrap a sequence of frames; `frames` may be empty
    pub fn new(name: impl Into<String>, frames: Vec<Frame>) -> Self {
        Self {
            name: name.into(),
            frames,
            position: 0,
            started: false,
        }
    }

    /// Current playback position
    pub fn position(&self) -> usize {
        self.position
    }
}

impl InputSource for FrameSequenceSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, paused: bool) -> Result<()> {
        if self.frames.is_empty() {
            return Ok(());
        }
        if !self.started {
            self.started = true;
            return Ok(());
        }
        if !paused {
            self.position = (self.position + 1) % self.frames.len();
        }
        Ok(())
    }

    fn latest_frame(&self) -> Option<&Frame> {
        if !self.started || self.frames.is_empty() {
            return None;
        }
        self.frames.get(self.position)
    }

    fn on_deactivate(&mut self) {
        self.position = 0;
        self.started = false;
    }
}

/// Register the built-in sources in their default order.
///
/// Index 0 (the synthetic gradient) is what a fresh simulator selects when
/// no preference is configured.
pub fn register_builtin_sources(manager: &mut super::InputSourceManager) {
    manager.register(Box::new(SyntheticSource::new(
        "Synthetic: Gradient",
        TestPattern::Gradient,
        crate::types::DEFAULT_FRAME_WIDTH,
        crate::types::DEFAULT_FRAME_HEIGHT,
    )));
    manager.register(Box::new(SyntheticSource::new(
        "Synthetic: Checkerboard",
        TestPattern::Checkerboard,
        crate::types::DEFAULT_FRAME_WIDTH,
        crate::types::DEFAULT_FRAME_HEIGHT,
    )));
    manager.register(Box::new(SyntheticSource::new(
        "Synthetic: Moving Bar",
        TestPattern::MovingBar,
        crate::types::DEFAULT_FRAME_WIDTH,
        crate::types::DEFAULT_FRAME_HEIGHT,
    )));
}
