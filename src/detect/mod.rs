mod backend;
mod backends;
mod decode;
mod labels;
mod nms;
mod output;
mod pipeline;

pub use backend::{InferenceBackend, SharedBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use backends::{open_backend, StubBackend};
pub use decode::{decode, BoundingBox, Detection};
pub use labels::{ClassLabels, LabelDriftError};
pub use nms::{iou, suppress};
pub use output::{RawOutput, BOX_COLUMNS};
pub use pipeline::{
    DetectionThresholds, SpeciesDetector, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_IOU_THRESHOLD,
};
