//! Video Detector
//!
//! Runs object detection (optionally with multi-object tracking) over every
//! frame of a video, overlays boxes and a per-class count summary, and
//! encodes the annotated frames into a new video.
//!
//! # Architecture
//!
//! - A [`FrameProcessor`] turns one raw frame into one annotated frame at the
//!   working resolution (720x405) plus the class identifiers it saw.
//! - A [`Session`] resolves the input (an upload or the bundled default),
//!   streams it through the processor into a sink with the source's frame
//!   rate and size, hands the output to a [`Presenter`] and deletes every
//!   transient file.
//!
//! # Module Structure
//!
//! - `frame`: RGB frames and the working resolution
//! - `detect`: inference capability, detector backends, label vocabularies
//! - `track`: ByteTrack-style multi-object tracking
//! - `overlay`: class count tables and frame annotation
//! - `processor`: per-frame pipeline
//! - `video`: frame sources and sinks (Y4M built in, FFmpeg optional)
//! - `session`: per-video orchestration and cleanup
//! - `presenter`: delivering the output to the user
//! - `config`: file + environment configuration

use rand::RngCore;

pub mod config;
pub mod detect;
pub mod frame;
pub mod overlay;
pub mod presenter;
pub mod processor;
pub mod session;
pub mod track;
pub mod video;

pub use config::AppConfig;
pub use detect::{
    BBox, BackendRegistry, Detection, DetectionResult, DetectorBackend, Inference,
    InferenceCapability, LabelVocabulary, ReplayBackend,
};
pub use frame::{Frame, WORKING_HEIGHT, WORKING_WIDTH};
pub use overlay::{Annotator, ClassCountTable, OverlayStyle};
pub use presenter::{CliPresenter, Presenter};
pub use processor::{DetectOptions, FrameProcessor, ProcessedFrame};
pub use session::{RunReport, Session, SessionConfig, Upload};
pub use track::{Tracker, TrackerKind};
pub use video::{Codec, DefaultCodec, FrameSink, FrameSource};

/// Random 64-bit identifier, hex encoded. Namespaces a session's files.
pub fn new_session_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{:016x}", u64::from_le_bytes(bytes))
}

// -------------------- Input Errors --------------------

/// The requested video could not be resolved or opened.
///
/// Raised before any frame is processed. Callers recognise it by
/// downcasting an `anyhow::Error`.
#[derive(Debug)]
pub struct InputError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for InputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}
impl std::error::Error for InputError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_hex_and_distinct() {
        let a = new_session_id();
        let b = new_session_id();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn input_errors_survive_anyhow() {
        let err: anyhow::Error = InputError {
            code: "DEFAULT_VIDEO_MISSING",
            message: "videos/default.mp4 does not exist".into(),
        }
        .into();
        let input = err.downcast_ref::<InputError>();
        assert_eq!(input.map(|e| e.code), Some("DEFAULT_VIDEO_MISSING"));
        assert_eq!(
            err.to_string(),
            "DEFAULT_VIDEO_MISSING: videos/default.mp4 does not exist"
        );
    }
}
