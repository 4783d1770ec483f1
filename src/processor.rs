//! Frame processor: one frame in, one annotated frame plus detections out.

use anyhow::Result;

use crate::detect::{Detection, InferenceCapability};
use crate::frame::Frame;
use crate::overlay::{Annotator, ClassCountTable};
use crate::track::TrackerKind;

/// Per-session detection options.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectOptions {
    /// Minimum confidence in `[0, 1]`.
    pub confidence: f32,
    pub tracking: bool,
    pub tracker: TrackerKind,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            confidence: 0.4,
            tracking: true,
            tracker: TrackerKind::ByteTrack,
        }
    }
}

/// Output of [`FrameProcessor::process`].
#[derive(Clone, Debug)]
pub struct ProcessedFrame {
    /// Annotated frame at the working resolution.
    pub frame: Frame,
    /// Class identifiers detected in this frame, in detection order.
    pub class_ids: Vec<u32>,
    /// Per-frame count summary that was overlaid (empty when nothing was found).
    pub summary: String,
    pub detections: Vec<Detection>,
}

/// Resizes, runs inference, counts and annotates. Holds no per-video state.
#[derive(Clone, Default)]
pub struct FrameProcessor {
    annotator: Annotator,
}

impl FrameProcessor {
    pub fn new(annotator: Annotator) -> Self {
        Self { annotator }
    }

    pub fn process(
        &self,
        inference: &mut dyn InferenceCapability,
        frame: &Frame,
        options: &DetectOptions,
    ) -> Result<ProcessedFrame> {
        let mut working = frame.to_working_resolution();

        let result = if options.tracking {
            inference.track(&working, options.confidence, options.tracker, true)?
        } else {
            inference.detect(&working, options.confidence)?
        };

        let class_ids = result.class_ids();
        let labels = inference.labels();
        let summary = ClassCountTable::from_class_ids(&class_ids, labels).summary();

        self.annotator
            .draw_detections(&mut working, &result.detections, labels);
        self.annotator.draw_summary(&mut working, &summary);

        Ok(ProcessedFrame {
            frame: working,
            class_ids,
            summary,
            detections: result.detections,
        })
    }
}
