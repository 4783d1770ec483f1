use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::detect::backend::DetectorBackend;
use crate::detect::labels::LabelVocabulary;
use crate::detect::result::{BBox, Detection, DetectionResult};
use crate::frame::{Frame, WORKING_HEIGHT, WORKING_WIDTH};

#[derive(Debug, Deserialize)]
struct ReplayFrame {
    frame: u64,
    #[serde(default)]
    detections: Vec<ReplayDetection>,
}

#[derive(Debug, Deserialize)]
struct ReplayDetection {
    class_id: u32,
    bbox: [f32; 4],
    confidence: f32,
}

/// Replays precomputed detections, one entry per frame index.
///
/// Boxes in the script are in working-resolution pixels and are rescaled to
/// whatever frame size `detect` is called with. Frames without an entry
/// produce no detections.
pub struct ReplayBackend {
    frames: HashMap<u64, Vec<Detection>>,
    labels: LabelVocabulary,
    cursor: u64,
}

impl ReplayBackend {
    /// Load a JSON script: `[{"frame": 0, "detections": [{"class_id": 2,
    /// "bbox": [x1, y1, x2, y2], "confidence": 0.9}]}]`.
    pub fn from_file(path: &Path, labels: LabelVocabulary) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read replay script {}", path.display()))?;
        Self::from_json(&raw, labels)
            .with_context(|| format!("invalid replay script {}", path.display()))
    }

    pub fn from_json(raw: &str, labels: LabelVocabulary) -> Result<Self> {
        let script: Vec<ReplayFrame> = serde_json::from_str(raw)?;
        let mut frames = HashMap::with_capacity(script.len());
        for entry in script {
            let detections = entry
                .detections
                .into_iter()
                .map(|d| {
                    let [x1, y1, x2, y2] = d.bbox;
                    if !(0.0..=1.0).contains(&d.confidence) {
                        return Err(anyhow!(
                            "frame {}: confidence {} outside [0, 1]",
                            entry.frame,
                            d.confidence
                        ));
                    }
                    Ok(Detection::new(d.class_id, BBox::new(x1, y1, x2, y2), d.confidence))
                })
                .collect::<Result<Vec<_>>>()?;
            if frames.insert(entry.frame, detections).is_some() {
                return Err(anyhow!("frame {} listed twice", entry.frame));
            }
        }
        Ok(Self {
            frames,
            labels,
            cursor: 0,
        })
    }

    /// Index of the next frame `detect` will answer for.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Restart from frame 0.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }
}

impl DetectorBackend for ReplayBackend {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn labels(&self) -> &LabelVocabulary {
        &self.labels
    }

    fn detect(&mut self, frame: &Frame, confidence: f32) -> Result<DetectionResult> {
        let index = self.cursor;
        self.cursor += 1;

        let sx = frame.width() as f32 / WORKING_WIDTH as f32;
        let sy = frame.height() as f32 / WORKING_HEIGHT as f32;
        let detections = self
            .frames
            .get(&index)
            .map(|dets| {
                dets.iter()
                    .filter(|d| d.confidence >= confidence)
                    .map(|d| Detection {
                        bbox: d.bbox.scaled(sx, sy),
                        ..d.clone()
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(DetectionResult::new(detections))
    }

    fn warm_up(&mut self) -> Result<()> {
        self.rewind();
        Ok(())
    }
}
