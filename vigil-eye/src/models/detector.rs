//! Inference capability seams

use crate::codec::Image;
use crate::config::ResourceProfile;
use crate::error::{InferenceError, ModelLoadError};
use std::collections::HashMap;
use std::path::Path;

/// Class id -> display name. Ids need not be contiguous.
pub type ClassNames = HashMap<usize, String>;

/// One object as reported by the detector, in the coordinate space of the
/// image that was passed to `infer`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub bbox: (f32, f32, f32, f32), // x1, y1, x2, y2
    pub confidence: f32,
    pub class_id: usize,
}

impl RawDetection {
    pub fn new(bbox: (f32, f32, f32, f32), confidence: f32, class_id: usize) -> Self {
        Self {
            bbox,
            confidence,
            class_id,
        }
    }
}

/// Forward pass of a loaded network.
///
/// Implementations are not required to be reentrant; the model handle
/// serializes every call.
#[cfg_attr(test, mockall::automock)]
pub trait Detector: Send {
    /// Run detection with the given confidence and overlap thresholds.
    fn infer(
        &mut self,
        image: &Image,
        conf_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Vec<RawDetection>, InferenceError>;

    /// Drop buffers kept between calls.
    fn release_scratch(&mut self) {}
}

/// A detector together with the metadata read at load time.
pub struct LoadedDetector {
    pub detector: Box<dyn Detector>,
    pub class_names: ClassNames,
}

impl LoadedDetector {
    pub fn new(detector: Box<dyn Detector>, class_names: ClassNames) -> Self {
        Self {
            detector,
            class_names,
        }
    }
}

/// Builds a detector from weights on disk.
pub trait DetectorLoader {
    /// Human readable backend label reported by `/health`.
    fn model_type(&self) -> &str;

    fn load(&self, path: &Path, profile: ResourceProfile) -> Result<LoadedDetector, ModelLoadError>;
}
