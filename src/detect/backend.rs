use anyhow::Result;

use crate::detect::labels::LabelVocabulary;
use crate::detect::result::DetectionResult;
use crate::frame::Frame;

/// Stateless object detector.
///
/// Backends see one frame at a time and keep no identity across calls;
/// tracking is layered on top by [`crate::detect::Inference`].
pub trait DetectorBackend {
    /// Backend identifier used by the registry and the CLI.
    fn name(&self) -> &'static str;

    /// Vocabulary the backend's class identifiers index into.
    fn labels(&self) -> &LabelVocabulary;

    /// Run detection on a frame, dropping anything below `confidence`.
    ///
    /// Boxes are returned in pixel coordinates of `frame`.
    fn detect(&mut self, frame: &Frame, confidence: f32) -> Result<DetectionResult>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
