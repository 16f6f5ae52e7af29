//! vigil-eye: object-detection pipeline
//!
//! Turns an encoded image into a list of labelled bounding boxes: decode,
//! bound to the profile's max dimension, run the single shared detector and
//! map its raw output to public predictions. The service stays usable in a
//! degraded mode when the model fails to load.

pub mod codec;
pub mod config;
pub mod error;
pub mod models;
pub mod preprocess;
pub mod processing;
pub mod service;
mod utils;

pub use codec::{Image, ImagePayload};
pub use config::{
    DetectionConfig, ResourceProfile, DEFAULT_CONF_THRESHOLD, DEFAULT_NMS_THRESHOLD,
};
pub use error::{DecodeError, DetectError, InferenceError, LoadFailureReason, ModelLoadError};
pub use models::{
    ClassNames, Detector, DetectorLoader, LoadedDetector, ModelHandle, ModelState, RawDetection,
};
pub use processing::Prediction;
pub use service::{
    DetectionOutcome, DetectionRequest, DetectionService, ServiceHealth, ServiceState,
};
