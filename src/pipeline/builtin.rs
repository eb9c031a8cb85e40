//! Built-in pipelines
//!
//! [`DefaultPipeline`] is the index-0 fallback a fresh simulator activates
//! so the viewport shows something before the user loads their own code.
//! [`ThresholdPipeline`] is a minimal example of a tunable pipeline.

use crate::error::Result;
use crate::types::{Frame, Telemetry};

use super::VisionPipeline;

/// Pass-through pipeline stamping basic frame telemetry
#[derive(Debug, Default)]
pub struct DefaultPipeline {
    ticks: u64,
}

impl VisionPipeline for DefaultPipeline {
    fn name(&self) -> &str {
        "DefaultPipeline"
    }

    fn process(&mut self, input: &Frame, telemetry: &mut Telemetry) -> Result<Frame> {
        self.ticks += 1;
        telemetry.set("Frame", format!("{}x{}", input.width(), input.height()));
        telemetry.set("Ticks", self.ticks.to_string());
        Ok(input.clone())
    }

    fn on_deactivate(&mut self) {
        self.ticks = 0;
    }
}

/// Binarizes the frame against a tunable luminance threshold.
///
/// The `threshold` parameter (0-255) is exposed through the tuner; values
/// outside that range are clamped.
#[derive(Debug)]
pub struct ThresholdPipeline {
    threshold: u8,
}

impl ThresholdPipeline {
    /// Create a pipeline with the given initial threshold
    pub fn new(threshold: u8) -> Self {
        Self { threshold }
    }

    /// Current threshold value
    pub fn threshold(&self) -> u8 {
        self.threshold
    }
}

impl Default for ThresholdPipeline {
    fn default() -> Self {
        Self::new(128)
    }
}

impl VisionPipeline for ThresholdPipeline {
    fn name(&self) -> &str {
        "ThresholdPipeline"
    }

    fn process(&mut self, input: &Frame, telemetry: &mut Telemetry) -> Result<Frame> {
        let mut output = Frame::new(input.width(), input.height());
        let mut above = 0u64;

        for y in 0..input.height() {
            for x in 0..input.width() {
                // Bounds are loop-guaranteed, luminance can't miss
                let lum = input.luminance(x, y).unwrap_or(0);
                let v = if lum >= self.threshold {
                    above += 1;
                    255
                } else {
                    0
                };
                output.set_pixel(x, y, [v, v, v, 255]);
            }
        }

        telemetry.set("Threshold", self.threshold.to_string());
        telemetry.set("Above", above.to_string());
        Ok(output)
    }

    fn apply_param(&mut self, name: &str, value: f64) {
        if name == "threshold" {
            self.threshold = value.clamp(0.0, 255.0) as u8;
        }
    }
}

/// Register the built-in pipelines in their default order.
///
/// Index 0 is [`DefaultPipeline`], matching what `Simulator::init` selects
/// when no preference is configured.
pub fn register_builtin_pipelines(manager: &mut super::PipelineManager) {
    manager.register(Box::new(DefaultPipeline::default()));
    manager.register(Box::new(ThresholdPipeline::default()));
}
