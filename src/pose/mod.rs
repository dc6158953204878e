pub mod decode;
pub mod extractor;
pub mod landmark;
#[cfg(feature = "onnx")]
pub mod onnx;

pub use decode::{Base64ImageDecoder, DecodeError, FrameDecoder};
pub use extractor::{ExtractorFactory, PoseExtractor};
pub use landmark::{Landmark, LandmarkFrame, LandmarkIndex, OverlayPoint, PostureLandmarks};
#[cfg(feature = "onnx")]
pub use onnx::{OnnxExtractorFactory, OnnxPoseExtractor};
