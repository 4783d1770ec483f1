use anyhow::Result;

use super::backend::DetectorBackend;
use super::labels::LabelVocabulary;
use super::result::DetectionResult;
use crate::frame::Frame;
use crate::track::{Tracker, TrackerKind};

/// The inference capability the frame processor talks to.
///
/// `detect` is stateless. `track` keeps identity across calls when `persist`
/// is set; that state lives behind this trait and is never inspected by
/// callers.
pub trait InferenceCapability {
    fn labels(&self) -> &LabelVocabulary;

    fn detect(&mut self, frame: &Frame, confidence: f32) -> Result<DetectionResult>;

    fn track(
        &mut self,
        frame: &Frame,
        confidence: f32,
        tracker: TrackerKind,
        persist: bool,
    ) -> Result<DetectionResult>;

    /// Forget tracker state. Called before the first frame of every video.
    fn reset_tracking(&mut self) {}
}

/// Inference over a detector backend, with tracking layered on top.
pub struct Inference {
    backend: Box<dyn DetectorBackend>,
    tracker: Option<(TrackerKind, Tracker)>,
}

impl Inference {
    pub fn new(backend: Box<dyn DetectorBackend>) -> Self {
        Self {
            backend,
            tracker: None,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn warm_up(&mut self) -> Result<()> {
        self.backend.warm_up()
    }

    fn tracker_for(&mut self, kind: TrackerKind, persist: bool) -> &mut Tracker {
        let reuse = persist && matches!(&self.tracker, Some((current, _)) if *current == kind);
        if !reuse {
            self.tracker = None;
        }
        let (_, tracker) = self.tracker.get_or_insert_with(|| {
            log::debug!("starting {} tracker", kind);
            (kind, Tracker::new(kind.config()))
        });
        tracker
    }
}

impl InferenceCapability for Inference {
    fn labels(&self) -> &LabelVocabulary {
        self.backend.labels()
    }

    fn detect(&mut self, frame: &Frame, confidence: f32) -> Result<DetectionResult> {
        self.backend.detect(frame, confidence)
    }

    fn track(
        &mut self,
        frame: &Frame,
        confidence: f32,
        tracker: TrackerKind,
        persist: bool,
    ) -> Result<DetectionResult> {
        let raw = self.backend.detect(frame, confidence)?;
        let tracked = self.tracker_for(tracker, persist).update(&raw.detections);
        Ok(DetectionResult::new(tracked))
    }

    fn reset_tracking(&mut self) {
        self.tracker = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BBox, Detection};

    /// Emits one car that drifts right by 5 px per call.
    struct Drifting {
        calls: u32,
        labels: LabelVocabulary,
    }

    impl DetectorBackend for Drifting {
        fn name(&self) -> &'static str {
            "drifting"
        }

        fn labels(&self) -> &LabelVocabulary {
            &self.labels
        }

        fn detect(&mut self, _frame: &Frame, _confidence: f32) -> Result<DetectionResult> {
            let x = self.calls as f32 * 5.0;
            self.calls += 1;
            Ok(DetectionResult::new(vec![Detection::new(
                2,
                BBox::new(x, 10.0, x + 50.0, 60.0),
                0.9,
            )]))
        }
    }

    fn inference() -> Inference {
        Inference::new(Box::new(Drifting {
            calls: 0,
            labels: LabelVocabulary::coco(),
        }))
    }

    #[test]
    fn detect_leaves_track_ids_unset() -> Result<()> {
        let mut inference = inference();
        let frame = Frame::filled(4, 4, [0, 0, 0])?;
        let result = inference.detect(&frame, 0.5)?;
        assert_eq!(result.detections[0].track_id, None);
        Ok(())
    }

    #[test]
    fn persistent_tracking_keeps_identity() -> Result<()> {
        let mut inference = inference();
        let frame = Frame::filled(4, 4, [0, 0, 0])?;
        for _ in 0..5 {
            let result = inference.track(&frame, 0.5, TrackerKind::ByteTrack, true)?;
            assert_eq!(result.detections[0].track_id, Some(1));
        }
        Ok(())
    }

    #[test]
    fn changing_tracker_or_dropping_persist_starts_over() -> Result<()> {
        let mut inference = inference();
        let frame = Frame::filled(4, 4, [0, 0, 0])?;
        inference.track(&frame, 0.5, TrackerKind::ByteTrack, true)?;
        inference.track(&frame, 0.5, TrackerKind::ByteTrack, true)?;
        let switched = inference.track(&frame, 0.5, TrackerKind::BotSort, true)?;
        assert_eq!(switched.detections[0].track_id, Some(1));
        let fresh = inference.track(&frame, 0.5, TrackerKind::BotSort, false)?;
        assert_eq!(fresh.detections[0].track_id, Some(1));
        Ok(())
    }

    #[test]
    fn reset_tracking_forgets_tracks() -> Result<()> {
        let mut inference = inference();
        let frame = Frame::filled(4, 4, [0, 0, 0])?;
        inference.track(&frame, 0.5, TrackerKind::ByteTrack, true)?;
        inference.reset_tracking();
        assert!(inference.tracker.is_none());
        Ok(())
    }
}
