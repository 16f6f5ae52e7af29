//! Process-wide model handle
//!
//! Owns the single detector instance, its class table and its load outcome.
//! The handle moves from `Unloaded` to `Loaded` or `LoadFailed` once and never
//! goes back.

use crate::codec::Image;
use crate::config::ResourceProfile;
use crate::error::{InferenceError, ModelLoadError};
use crate::models::detector::{ClassNames, Detector, DetectorLoader, LoadedDetector, RawDetection};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Lifecycle of the model handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    Unloaded,
    Loaded,
    LoadFailed,
}

enum Slot {
    Unloaded,
    Loaded(Mutex<Box<dyn Detector>>),
    Failed(ModelLoadError),
}

/// Model handle shared by every request.
pub struct ModelHandle {
    path: PathBuf,
    model_type: String,
    profile: ResourceProfile,
    class_names: ClassNames,
    slot: Slot,
}

impl ModelHandle {
    /// Create an unloaded handle for the weights at `path`.
    pub fn new(path: impl Into<PathBuf>, profile: ResourceProfile) -> Self {
        Self {
            path: path.into(),
            model_type: String::from("unknown"),
            profile,
            class_names: ClassNames::new(),
            slot: Slot::Unloaded,
        }
    }

    /// Create a handle around an already constructed detector.
    pub fn with_detector(
        path: impl Into<PathBuf>,
        model_type: impl Into<String>,
        profile: ResourceProfile,
        loaded: LoadedDetector,
    ) -> Self {
        Self {
            path: path.into(),
            model_type: model_type.into(),
            profile,
            class_names: loaded.class_names,
            slot: Slot::Loaded(Mutex::new(loaded.detector)),
        }
    }

    /// Create a handle that records a failed load.
    pub fn failed(
        path: impl Into<PathBuf>,
        model_type: impl Into<String>,
        profile: ResourceProfile,
        err: ModelLoadError,
    ) -> Self {
        Self {
            path: path.into(),
            model_type: model_type.into(),
            profile,
            class_names: ClassNames::new(),
            slot: Slot::Failed(err),
        }
    }

    /// Load the detector. Only the first call does any work; later calls
    /// report the first outcome.
    pub fn load(&mut self, loader: &dyn DetectorLoader) -> Result<(), ModelLoadError> {
        match &self.slot {
            Slot::Loaded(_) => {
                warn!("Model at {:?} already loaded; ignoring reload", self.path);
                return Ok(());
            }
            Slot::Failed(err) => {
                warn!("Model at {:?} already failed to load; not retrying", self.path);
                return Err(err.clone());
            }
            Slot::Unloaded => {}
        }

        self.model_type = loader.model_type().to_string();
        info!(
            "Loading {} model from {:?} (profile: {})",
            self.model_type, self.path, self.profile
        );

        let start = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            loader.load(&self.path, self.profile)
        }))
        .unwrap_or_else(|payload| {
            Err(ModelLoadError::other(panic_message("loader", payload.as_ref())))
        });
        match outcome {
            Ok(loaded) => {
                info!(
                    "Model loaded in {:?}: {} classes",
                    start.elapsed(),
                    loaded.class_names.len()
                );
                debug!("Class names: {:?}", loaded.class_names);
                self.class_names = loaded.class_names;
                self.slot = Slot::Loaded(Mutex::new(loaded.detector));
                Ok(())
            }
            Err(err) => {
                error!("Model load failed for {:?}: {}", self.path, err);
                self.slot = Slot::Failed(err.clone());
                Err(err)
            }
        }
    }

    pub fn state(&self) -> ModelState {
        match self.slot {
            Slot::Unloaded => ModelState::Unloaded,
            Slot::Loaded(_) => ModelState::Loaded,
            Slot::Failed(_) => ModelState::LoadFailed,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == ModelState::Loaded
    }

    pub fn load_error(&self) -> Option<&ModelLoadError> {
        match &self.slot {
            Slot::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Class table; empty unless loaded.
    pub fn class_names(&self) -> &ClassNames {
        &self.class_names
    }

    pub fn model_type(&self) -> &str {
        &self.model_type
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn profile(&self) -> ResourceProfile {
        self.profile
    }

    /// Run the detector. Calls are serialized; backend panics are reported as
    /// runtime errors.
    pub fn infer(
        &self,
        image: &Image,
        conf_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Vec<RawDetection>, InferenceError> {
        let detector = match &self.slot {
            Slot::Loaded(detector) => detector,
            _ => return Err(InferenceError::NotLoaded),
        };

        let mut detector = detector.lock();
        let start = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            detector.infer(image, conf_threshold, nms_threshold)
        }))
        .unwrap_or_else(|payload| {
            Err(InferenceError::Runtime(panic_message("detector", payload.as_ref())))
        });

        if self.profile.reclaim_eagerly() {
            detector.release_scratch();
        }
        drop(detector);

        debug!(
            "Inference on {}x{} took {:?}",
            image.width(),
            image.height(),
            start.elapsed()
        );
        result
    }
}

fn panic_message(source: &str, payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("{} panicked: {}", source, msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("{} panicked: {}", source, msg)
    } else {
        format!("{} panicked", source)
    }
}
