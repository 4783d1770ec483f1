mod backend;
mod backends;
mod inference;
mod labels;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::ReplayBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use inference::{Inference, InferenceCapability};
pub use labels::{LabelVocabulary, COCO_CLASSES};
pub use registry::BackendRegistry;
pub use result::{BBox, Detection, DetectionResult};
