//! Detection model management and inference

pub mod detector;
pub mod handle;
pub mod yolo;

pub use detector::{ClassNames, Detector, DetectorLoader, LoadedDetector, RawDetection};
pub use handle::{ModelHandle, ModelState};
pub use yolo::{OnnxYoloDetector, OnnxYoloLoader};
