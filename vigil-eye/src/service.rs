//! Detection request pipeline
//!
//! Decode, bound, infer and map, on top of the process-wide [`ModelHandle`].
//! A service whose model failed to load stays up in `Degraded` state and
//! rejects detection requests before touching the payload.

use crate::codec::{Image, ImagePayload};
use crate::config::DetectionConfig;
use crate::error::{DetectError, InferenceError};
use crate::models::{ClassNames, ModelHandle, ModelState};
use crate::preprocess::resize_if_needed;
use crate::processing::{map_detections, Prediction};
use std::fmt;
use tracing::{debug, info, warn};

/// Service lifecycle, derived from the model handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Model not loaded yet
    Cold,
    Ready,
    /// Model load failed; health and diagnostics only
    Degraded,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Cold => "cold",
            ServiceState::Ready => "ready",
            ServiceState::Degraded => "degraded",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detection request.
#[derive(Debug, Clone)]
pub struct DetectionRequest {
    pub image: Image,
    pub conf_threshold: f32,
    pub nms_threshold: f32,
}

impl DetectionRequest {
    pub fn new(image: Image, conf_threshold: f32, nms_threshold: f32) -> Self {
        Self {
            image,
            conf_threshold,
            nms_threshold,
        }
    }
}

/// Result of a successful detection.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionOutcome {
    pub predictions: Vec<Prediction>,
    pub total_detections: usize,
    /// (width, height) of the image the detector actually saw
    pub inference_dimensions: (u32, u32),
}

/// Health snapshot.
#[derive(Debug, Clone)]
pub struct ServiceHealth {
    pub state: ServiceState,
    pub model_loaded: bool,
    pub model_type: String,
    pub load_error: Option<String>,
    pub class_count: Option<usize>,
    pub class_names: Option<ClassNames>,
}

/// Orchestrates the detection pipeline.
pub struct DetectionService {
    model: ModelHandle,
    config: DetectionConfig,
}

impl DetectionService {
    pub fn new(model: ModelHandle, config: DetectionConfig) -> Self {
        info!(
            "Detection service created: state={}, profile={}, max_dimension={}",
            state_of(&model),
            config.profile,
            config.max_dimension()
        );
        Self { model, config }
    }

    pub fn state(&self) -> ServiceState {
        state_of(&self.model)
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    pub fn health(&self) -> ServiceHealth {
        let loaded = self.model.is_loaded();
        let class_names = self.model.class_names();
        ServiceHealth {
            state: self.state(),
            model_loaded: loaded,
            model_type: self.model.model_type().to_string(),
            load_error: self.model.load_error().map(|e| e.to_string()),
            class_count: loaded.then(|| class_names.len()),
            class_names: loaded.then(|| class_names.clone()),
        }
    }

    /// Fail with `ServiceUnavailable` unless the model is loaded.
    pub fn ensure_ready(&self) -> Result<(), DetectError> {
        match self.state() {
            ServiceState::Ready => Ok(()),
            ServiceState::Degraded => Err(DetectError::ServiceUnavailable {
                reason: self
                    .model
                    .load_error()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "model failed to load".to_string()),
            }),
            ServiceState::Cold => Err(DetectError::ServiceUnavailable {
                reason: "model has not been loaded".to_string(),
            }),
        }
    }

    /// Full request path: readiness, input selection, decode, then
    /// [`detect`](Self::detect). Missing thresholds take the configured
    /// defaults.
    pub fn process(
        &self,
        payload: Option<ImagePayload>,
        conf_threshold: Option<f32>,
        nms_threshold: Option<f32>,
    ) -> Result<DetectionOutcome, DetectError> {
        self.ensure_ready()?;

        let payload = payload.ok_or(DetectError::MissingImage)?;
        let kind = payload.kind();
        let image = payload.decode().map_err(|e| {
            warn!("Rejecting {} payload: {}", kind, e);
            DetectError::from(e)
        })?;

        let request = DetectionRequest::new(
            image,
            conf_threshold.unwrap_or(self.config.default_conf_threshold),
            nms_threshold.unwrap_or(self.config.default_nms_threshold),
        );
        self.detect(request)
    }

    /// Run detection on an already decoded image.
    pub fn detect(&self, request: DetectionRequest) -> Result<DetectionOutcome, DetectError> {
        self.ensure_ready()?;

        let DetectionRequest {
            image,
            conf_threshold,
            nms_threshold,
        } = request;
        let original = image.dimensions();
        let image = resize_if_needed(image, self.config.max_dimension());
        let inference_dimensions = image.dimensions();

        let raw = match self.model.infer(&image, conf_threshold, nms_threshold) {
            Ok(raw) => raw,
            Err(InferenceError::Runtime(message)) => {
                warn!(
                    "Inference failed on {}x{} image (original {}x{}), returning no detections: {}",
                    inference_dimensions.0, inference_dimensions.1, original.0, original.1, message
                );
                Vec::new()
            }
            Err(InferenceError::NotLoaded) => {
                return Err(DetectError::ServiceUnavailable {
                    reason: InferenceError::NotLoaded.to_string(),
                })
            }
        };
        drop(image);

        let predictions = map_detections(&raw, self.model.class_names());
        drop(raw);

        debug!(
            "Detected {} objects on {}x{} image",
            predictions.len(),
            inference_dimensions.0,
            inference_dimensions.1
        );
        Ok(DetectionOutcome {
            total_detections: predictions.len(),
            predictions,
            inference_dimensions,
        })
    }
}

fn state_of(model: &ModelHandle) -> ServiceState {
    match model.state() {
        ModelState::Unloaded => ServiceState::Cold,
        ModelState::Loaded => ServiceState::Ready,
        ModelState::LoadFailed => ServiceState::Degraded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceProfile;
    use crate::error::ModelLoadError;
    use crate::models::detector::MockDetector;
    use crate::models::{LoadedDetector, RawDetection};
    use image::{ImageOutputFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([90, 90, 90]));
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageOutputFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn names() -> ClassNames {
        let mut names = ClassNames::new();
        names.insert(0, "person".to_string());
        names
    }

    fn ready_service(detector: MockDetector, profile: ResourceProfile) -> DetectionService {
        let handle = ModelHandle::with_detector(
            "/app/models/best.onnx",
            "ONNX (.onnx)",
            profile,
            LoadedDetector::new(Box::new(detector), names()),
        );
        DetectionService::new(handle, DetectionConfig::for_profile(profile))
    }

    fn degraded_service() -> DetectionService {
        let handle = ModelHandle::failed(
            "/app/models/best.onnx",
            "ONNX (.onnx)",
            ResourceProfile::Standard,
            ModelLoadError::file_not_found("Model file not found: /app/models/best.onnx"),
        );
        DetectionService::new(handle, DetectionConfig::default())
    }

    #[test]
    fn test_state_mapping() {
        let cold = DetectionService::new(
            ModelHandle::new("/m.onnx", ResourceProfile::Standard),
            DetectionConfig::default(),
        );
        assert_eq!(cold.state(), ServiceState::Cold);
        assert_eq!(degraded_service().state(), ServiceState::Degraded);
        assert_eq!(
            ready_service(MockDetector::new(), ResourceProfile::Standard).state(),
            ServiceState::Ready
        );
    }

    #[test]
    fn test_resized_image_reaches_detector() {
        let mut detector = MockDetector::new();
        detector
            .expect_infer()
            .withf(|image, conf, nms| {
                image.dimensions() == (640, 360) && *conf == 0.5 && *nms == 0.4
            })
            .times(1)
            .returning(|_, _, _| Ok(vec![RawDetection::new((10.9, 20.2, 100.7, 200.1), 0.87, 0)]));

        let service = ready_service(detector, ResourceProfile::Standard);
        let outcome = service
            .process(Some(ImagePayload::Encoded(png_bytes(1280, 720))), None, None)
            .unwrap();
        assert_eq!(outcome.inference_dimensions, (640, 360));
        assert_eq!(outcome.total_detections, 1);
        assert_eq!(outcome.predictions[0].bbox, [10, 20, 100, 200]);
        assert_eq!(outcome.predictions[0].class_name, "person");
    }

    #[test]
    fn test_constrained_profile_bounds_at_416() {
        let mut detector = MockDetector::new();
        detector
            .expect_infer()
            .withf(|image, _, _| image.dimensions() == (416, 234))
            .times(1)
            .returning(|_, _, _| Ok(Vec::new()));
        detector.expect_release_scratch().times(1).return_const(());

        let service = ready_service(detector, ResourceProfile::Constrained);
        let outcome = service
            .process(Some(ImagePayload::Encoded(png_bytes(1280, 720))), None, None)
            .unwrap();
        assert_eq!(outcome.inference_dimensions, (416, 234));
    }

    #[test]
    fn test_degraded_never_reaches_detector() {
        let service = degraded_service();
        let err = service
            .process(Some(ImagePayload::Encoded(b"garbage".to_vec())), None, None)
            .unwrap_err();
        match err {
            DetectError::ServiceUnavailable { reason } => {
                assert!(reason.contains("file_not_found"))
            }
            other => panic!("Expected ServiceUnavailable, got {:?}", other),
        }

        let request = DetectionRequest::new(Image::from_rgb(RgbImage::new(4, 4)), 0.5, 0.4);
        assert!(matches!(
            service.detect(request),
            Err(DetectError::ServiceUnavailable { .. })
        ));
    }

    #[test]
    fn test_missing_image_is_client_error() {
        let mut detector = MockDetector::new();
        detector.expect_infer().never();
        let service = ready_service(detector, ResourceProfile::Standard);

        let err = service.process(None, Some(0.3), None).unwrap_err();
        assert!(matches!(err, DetectError::MissingImage));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_undecodable_payload_is_client_error() {
        let mut detector = MockDetector::new();
        detector.expect_infer().never();
        let service = ready_service(detector, ResourceProfile::Standard);

        let err = service
            .process(Some(ImagePayload::Base64("!!!".to_string())), None, None)
            .unwrap_err();
        assert!(matches!(err, DetectError::Decode(_)));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_runtime_failure_fails_open() {
        let mut detector = MockDetector::new();
        detector
            .expect_infer()
            .returning(|_, _, _| Err(InferenceError::Runtime("session exploded".to_string())));

        let service = ready_service(detector, ResourceProfile::Standard);
        let outcome = service
            .process(Some(ImagePayload::Encoded(png_bytes(32, 32))), None, None)
            .unwrap();
        assert!(outcome.predictions.is_empty());
        assert_eq!(outcome.total_detections, 0);
    }

    #[test]
    fn test_thresholds_pass_through_unchanged() {
        let mut detector = MockDetector::new();
        detector
            .expect_infer()
            .withf(|_, conf, nms| *conf == 1.5 && *nms == -1.0)
            .times(1)
            .returning(|_, _, _| Ok(Vec::new()));

        let service = ready_service(detector, ResourceProfile::Standard);
        let request = DetectionRequest::new(Image::from_rgb(RgbImage::new(8, 8)), 1.5, -1.0);
        assert!(service.detect(request).is_ok());
    }

    #[test]
    fn test_identical_requests_identical_results() {
        let mut detector = MockDetector::new();
        detector.expect_infer().times(2).returning(|_, _, _| {
            Ok(vec![
                RawDetection::new((1.0, 2.0, 3.0, 4.0), 0.9, 0),
                RawDetection::new((5.0, 6.0, 7.0, 8.0), 0.6, 3),
            ])
        });

        let service = ready_service(detector, ResourceProfile::Standard);
        let bytes = png_bytes(64, 48);
        let first = service
            .process(Some(ImagePayload::Encoded(bytes.clone())), None, None)
            .unwrap();
        let second = service
            .process(Some(ImagePayload::Encoded(bytes)), None, None)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(first.predictions[1].class_name, "class_3");
    }

    #[test]
    fn test_health_reports_load_state() {
        let degraded = degraded_service().health();
        assert!(!degraded.model_loaded);
        assert_eq!(degraded.state, ServiceState::Degraded);
        assert!(degraded.load_error.is_some());
        assert!(degraded.class_count.is_none());
        assert!(degraded.class_names.is_none());

        let ready = ready_service(MockDetector::new(), ResourceProfile::Standard).health();
        assert!(ready.model_loaded);
        assert_eq!(ready.class_count, Some(1));
        assert_eq!(ready.model_type, "ONNX (.onnx)");
        assert!(ready.load_error.is_none());
    }
}
