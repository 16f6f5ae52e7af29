//! YOLO object detection on ONNX Runtime

use crate::codec::Image;
use crate::config::ResourceProfile;
use crate::error::{InferenceError, ModelLoadError};
use crate::models::detector::{ClassNames, Detector, DetectorLoader, LoadedDetector, RawDetection};
use crate::utils::{compute_iou, input_tensor, letterbox, write_chw_tensor, Letterbox};
use ndarray::Array4;
use ort::execution_providers::CPUExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Input size used when the model carries no `imgsz` metadata.
pub const DEFAULT_INPUT_SIZE: u32 = 640;

/// Upper bound on boxes returned per image.
pub const MAX_DETECTIONS: usize = 300;

/// Builds [`OnnxYoloDetector`]s from `.onnx` exports.
#[derive(Debug, Clone, Default)]
pub struct OnnxYoloLoader {
    labels_path: Option<PathBuf>,
}

impl OnnxYoloLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read class names from a newline separated file instead of the model
    /// metadata.
    pub fn with_labels(mut self, labels_path: impl Into<PathBuf>) -> Self {
        self.labels_path = Some(labels_path.into());
        self
    }

    fn build_session(
        &self,
        path: &Path,
        profile: ResourceProfile,
    ) -> Result<Session, ModelLoadError> {
        let builder = Session::builder().map_err(|e| {
            ModelLoadError::dependency_missing(format!("Failed to initialize ONNX Runtime: {e}"))
        })?;

        let builder = builder
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| settings_error("optimization level", e))?;

        let builder = match profile {
            ResourceProfile::Standard => builder,
            ResourceProfile::Constrained => builder
                .with_intra_threads(1)
                .map_err(|e| settings_error("intra-thread count", e))?
                .with_memory_pattern(false)
                .map_err(|e| settings_error("memory pattern", e))?
                .with_execution_providers([CPUExecutionProvider::default()
                    .with_arena_allocator(false)
                    .build()])
                .map_err(|e| settings_error("CPU provider", e))?,
        };

        builder
            .commit_from_file(path)
            .map_err(|e| classify_load_error(format!("Failed to load model: {e}")))
    }

    fn class_names(&self, session: &Session) -> Result<ClassNames, ModelLoadError> {
        if let Some(labels_path) = &self.labels_path {
            let text = std::fs::read_to_string(labels_path).map_err(|e| {
                ModelLoadError::file_not_found(format!(
                    "Unable to read labels file {}: {e}",
                    labels_path.display()
                ))
            })?;
            return Ok(parse_labels_file(&text));
        }

        let names = session
            .metadata()
            .ok()
            .and_then(|metadata| metadata.custom("names").ok().flatten());
        match names {
            Some(raw) => Ok(parse_names_metadata(&raw)),
            None => {
                warn!("Model carries no `names` metadata; class names will be synthesized");
                Ok(ClassNames::new())
            }
        }
    }
}

impl DetectorLoader for OnnxYoloLoader {
    fn model_type(&self) -> &str {
        "ONNX (.onnx)"
    }

    fn load(
        &self,
        path: &Path,
        profile: ResourceProfile,
    ) -> Result<LoadedDetector, ModelLoadError> {
        if !path.exists() {
            return Err(ModelLoadError::file_not_found(format!(
                "Model file not found: {}",
                path.display()
            )));
        }

        let session = self.build_session(path, profile)?;
        let class_names = self.class_names(&session)?;

        let input_size = session
            .metadata()
            .ok()
            .and_then(|metadata| metadata.custom("imgsz").ok().flatten())
            .and_then(|raw| parse_imgsz(&raw))
            .unwrap_or(DEFAULT_INPUT_SIZE);

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "images".to_string());
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| ModelLoadError::other("Model declares no outputs"))?;

        info!(
            "YOLO model loaded from {:?}: input {} ({}x{}), {} classes",
            path,
            input_name,
            input_size,
            input_size,
            class_names.len()
        );

        let detector = OnnxYoloDetector {
            session,
            input_name,
            output_name,
            input_size,
            scratch: None,
        };
        Ok(LoadedDetector::new(Box::new(detector), class_names))
    }
}

/// A YOLO detector backed by an ONNX Runtime session.
pub struct OnnxYoloDetector {
    session: Session,
    input_name: String,
    output_name: String,
    input_size: u32,
    scratch: Option<Array4<f32>>,
}

impl OnnxYoloDetector {
    pub fn input_size(&self) -> u32 {
        self.input_size
    }
}

impl Detector for OnnxYoloDetector {
    fn infer(
        &mut self,
        image: &Image,
        conf_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Vec<RawDetection>, InferenceError> {
        let (boxed, geometry) = letterbox(image.as_rgb(), self.input_size);

        let size = self.input_size;
        let tensor = self.scratch.get_or_insert_with(|| input_tensor(size));
        write_chw_tensor(&boxed, tensor.view_mut()).map_err(InferenceError::Runtime)?;
        drop(boxed);

        let input = tensor.as_standard_layout();
        let input_tensor = TensorRef::from_array_view(&input)
            .map_err(|e| InferenceError::Runtime(format!("Failed to create input tensor: {e}")))?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input_tensor])
            .map_err(|e| InferenceError::Runtime(format!("YOLO inference failed: {e}")))?;

        let output = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            InferenceError::Runtime(format!("Output '{}' not found", self.output_name))
        })?;
        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Runtime(format!("Failed to extract output tensor: {e}")))?;
        let shape: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        debug!("YOLO output shape: {:?}", shape);

        let detections = decode_output(
            &shape,
            data,
            conf_threshold,
            nms_threshold,
            &geometry,
            image.dimensions(),
        )?;
        debug!("YOLO detected {} objects", detections.len());
        Ok(detections)
    }

    fn release_scratch(&mut self) {
        self.scratch = None;
    }
}

/// Session option rejected by the runtime; never an allocation failure.
fn settings_error(setting: &str, err: impl std::fmt::Display) -> ModelLoadError {
    ModelLoadError::other(format!("Failed to set {setting}: {err}"))
}

/// Map an ORT failure message to a load failure reason. Only allocation
/// wording counts as out-of-memory.
pub fn classify_load_error(message: String) -> ModelLoadError {
    let lower = message.to_lowercase();
    if lower.contains("alloc") || lower.contains("out of memory") {
        ModelLoadError::out_of_memory(message)
    } else {
        ModelLoadError::other(message)
    }
}

/// Parse Ultralytics `names` metadata, e.g. `{0: 'person', 1: "bicycle"}`.
pub fn parse_names_metadata(raw: &str) -> ClassNames {
    let mut names = ClassNames::new();
    let pattern = match Regex::new(r#"(\d+)\s*:\s*(?:'([^']*)'|"([^"]*)")"#) {
        Ok(pattern) => pattern,
        Err(_) => return names,
    };
    for caps in pattern.captures_iter(raw) {
        let id = caps.get(1).and_then(|m| m.as_str().parse::<usize>().ok());
        let name = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str().to_string());
        if let (Some(id), Some(name)) = (id, name) {
            names.insert(id, name);
        }
    }
    names
}

/// One class name per non-empty line; ids follow line order.
pub fn parse_labels_file(text: &str) -> ClassNames {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(id, name)| (id, name.to_string()))
        .collect()
}

/// Parse `imgsz` metadata such as `[640, 640]` or `640`. Non-square inputs use
/// the larger side.
pub fn parse_imgsz(raw: &str) -> Option<u32> {
    raw.split(|c: char| !c.is_ascii_digit())
        .filter_map(|part| part.parse::<u32>().ok())
        .filter(|&v| v > 0)
        .max()
}

/// Decode a YOLO output tensor into detections in source image coordinates.
///
/// Expects `[1, 4 + nc, N]` as exported by Ultralytics. Boxes are center
/// format `(cx, cy, w, h)` in letterboxed input pixels.
pub(crate) fn decode_output(
    shape: &[usize],
    data: &[f32],
    conf_threshold: f32,
    nms_threshold: f32,
    geometry: &Letterbox,
    source_dims: (u32, u32),
) -> Result<Vec<RawDetection>, InferenceError> {
    if shape.len() != 3 || shape[0] != 1 {
        return Err(InferenceError::Runtime(format!(
            "Unexpected YOLO output shape {:?}",
            shape
        )));
    }

    let (attrs, anchors) = (shape[1], shape[2]);
    if attrs <= 4 {
        return Err(InferenceError::Runtime(format!(
            "YOLO output has no class scores: {:?}",
            shape
        )));
    }
    if data.len() < attrs * anchors {
        return Err(InferenceError::Runtime(format!(
            "YOLO output holds {} values, expected {}",
            data.len(),
            attrs * anchors
        )));
    }

    let at = |anchor: usize, attr: usize| -> f32 { data[attr * anchors + anchor] };

    let (width, height) = (source_dims.0 as f32, source_dims.1 as f32);
    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let mut best_class = 0;
        let mut best_score = f32::MIN;
        for class_id in 0..(attrs - 4) {
            let score = at(anchor, 4 + class_id);
            if score > best_score {
                best_score = score;
                best_class = class_id;
            }
        }
        if !best_score.is_finite() || best_score <= conf_threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(anchor, 0), at(anchor, 1), at(anchor, 2), at(anchor, 3));
        if !(cx.is_finite() && cy.is_finite() && w.is_finite() && h.is_finite()) {
            continue;
        }

        let (x1, y1) = geometry.unmap(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = geometry.unmap(cx + w / 2.0, cy + h / 2.0);
        let bbox = (
            x1.clamp(0.0, width),
            y1.clamp(0.0, height),
            x2.clamp(0.0, width),
            y2.clamp(0.0, height),
        );
        candidates.push(RawDetection::new(bbox, best_score, best_class));
    }

    Ok(apply_nms(candidates, nms_threshold))
}

/// Per-class greedy NMS. Output is ordered by descending confidence and
/// capped at [`MAX_DETECTIONS`].
pub(crate) fn apply_nms(
    mut detections: Vec<RawDetection>,
    iou_threshold: f32,
) -> Vec<RawDetection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<RawDetection> = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        if keep.len() == MAX_DETECTIONS {
            break;
        }

        for j in (i + 1)..detections.len() {
            if suppressed[j] || detections[j].class_id != detections[i].class_id {
                continue;
            }
            if compute_iou(&detections[i].bbox, &detections[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }
        keep.push(detections[i].clone());
    }

    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadFailureReason;

    const IDENTITY: Letterbox = Letterbox {
        scale: 1.0,
        pad_x: 0.0,
        pad_y: 0.0,
    };

    /// Build a channels-first `[1, 4 + nc, N]` buffer from per-anchor rows.
    fn channels_first(rows: &[Vec<f32>]) -> (Vec<usize>, Vec<f32>) {
        let attrs = rows[0].len();
        let anchors = rows.len();
        let mut data = vec![0.0; attrs * anchors];
        for (anchor, row) in rows.iter().enumerate() {
            for (attr, value) in row.iter().enumerate() {
                data[attr * anchors + anchor] = *value;
            }
        }
        (vec![1, attrs, anchors], data)
    }

    #[test]
    fn test_parse_names_metadata() {
        let names =
            parse_names_metadata("{0: 'person', 1: 'bicycle', 5: \"bus\", 12: 'stop sign'}");
        assert_eq!(names.len(), 4);
        assert_eq!(names.get(&0).map(String::as_str), Some("person"));
        assert_eq!(names.get(&5).map(String::as_str), Some("bus"));
        assert_eq!(names.get(&12).map(String::as_str), Some("stop sign"));
        assert!(names.get(&2).is_none());
    }

    #[test]
    fn test_parse_names_metadata_garbage() {
        assert!(parse_names_metadata("not a dict").is_empty());
        assert!(parse_names_metadata("").is_empty());
    }

    #[test]
    fn test_parse_labels_file() {
        let names = parse_labels_file("cat\n\n  dog \nbird\n");
        assert_eq!(names.len(), 3);
        assert_eq!(names.get(&1).map(String::as_str), Some("dog"));
        assert_eq!(names.get(&2).map(String::as_str), Some("bird"));
    }

    #[test]
    fn test_parse_imgsz() {
        assert_eq!(parse_imgsz("[640, 640]"), Some(640));
        assert_eq!(parse_imgsz("320"), Some(320));
        assert_eq!(parse_imgsz("[480, 640]"), Some(640));
        assert_eq!(parse_imgsz("none"), None);
    }

    #[test]
    fn test_classify_load_error() {
        let oom = classify_load_error("Failed to allocate 1GB buffer".to_string());
        assert_eq!(oom.reason, LoadFailureReason::OutOfMemory);
        let mem = classify_load_error("Out of MEMORY".to_string());
        assert_eq!(mem.reason, LoadFailureReason::OutOfMemory);
        let bad_alloc = classify_load_error("std::bad_alloc".to_string());
        assert_eq!(bad_alloc.reason, LoadFailureReason::OutOfMemory);
        let other = classify_load_error("Protobuf parsing failed".to_string());
        assert_eq!(other.reason, LoadFailureReason::Other);
    }

    #[test]
    fn test_memory_settings_message_is_not_oom() {
        let err = classify_load_error(
            "Failed to set memory pattern: invalid memory pattern option".to_string(),
        );
        assert_eq!(err.reason, LoadFailureReason::Other);
    }

    #[test]
    fn test_loader_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("best.onnx");
        let err = OnnxYoloLoader::new()
            .load(&missing, ResourceProfile::Standard)
            .err()
            .unwrap();
        assert_eq!(err.reason, LoadFailureReason::FileNotFound);
        assert!(err.message.contains("best.onnx"));
    }

    #[test]
    fn test_loader_model_type() {
        assert_eq!(OnnxYoloLoader::new().model_type(), "ONNX (.onnx)");
    }

    #[test]
    fn test_decode_output_filters_and_converts_boxes() {
        let (shape, data) = channels_first(&[
            vec![50.0, 50.0, 20.0, 10.0, 0.9, 0.1],
            vec![10.0, 10.0, 4.0, 4.0, 0.2, 0.3],
        ]);
        let detections = decode_output(&shape, &data, 0.5, 0.4, &IDENTITY, (100, 100)).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 0);
        assert_eq!(detections[0].confidence, 0.9);
        assert_eq!(detections[0].bbox, (40.0, 45.0, 60.0, 55.0));
    }

    #[test]
    fn test_decode_output_drops_score_equal_to_threshold() {
        let (shape, data) = channels_first(&[
            vec![50.0, 50.0, 20.0, 10.0, 0.5, 0.1],
            vec![20.0, 20.0, 4.0, 4.0, 0.1, 0.51],
        ]);
        let detections = decode_output(&shape, &data, 0.5, 0.4, &IDENTITY, (100, 100)).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 1);
    }

    #[test]
    fn test_decode_output_unmaps_and_clamps() {
        let geometry = Letterbox {
            scale: 0.5,
            pad_x: 0.0,
            pad_y: 10.0,
        };
        let (shape, data) = channels_first(&[vec![20.0, 20.0, 40.0, 20.0, 0.7]]);
        let detections = decode_output(&shape, &data, 0.5, 0.4, &geometry, (30, 30)).unwrap();
        // (0, 10, 40, 30) -> (0, 0, 80, 40) -> clamped to 30x30
        assert_eq!(detections[0].bbox, (0.0, 0.0, 30.0, 30.0));
    }

    #[test]
    fn test_decode_output_rejects_bad_shape() {
        assert!(decode_output(&[1, 4], &[0.0; 4], 0.5, 0.4, &IDENTITY, (10, 10)).is_err());
        assert!(decode_output(&[1, 4, 10], &[0.0; 40], 0.5, 0.4, &IDENTITY, (10, 10)).is_err());
        assert!(decode_output(&[1, 6, 10], &[0.0; 12], 0.5, 0.4, &IDENTITY, (10, 10)).is_err());
    }

    #[test]
    fn test_nms_suppresses_overlap_within_class() {
        let detections = vec![
            RawDetection::new((0.0, 0.0, 10.0, 10.0), 0.8, 0),
            RawDetection::new((1.0, 1.0, 11.0, 11.0), 0.9, 0),
            RawDetection::new((1.0, 1.0, 11.0, 11.0), 0.7, 1),
            RawDetection::new((50.0, 50.0, 60.0, 60.0), 0.6, 0),
        ];
        let kept = apply_nms(detections, 0.4);
        let confs: Vec<f32> = kept.iter().map(|d| d.confidence).collect();
        assert_eq!(confs, vec![0.9, 0.7, 0.6]);
    }

    #[test]
    fn test_nms_caps_output() {
        let detections: Vec<RawDetection> = (0..(MAX_DETECTIONS + 50))
            .map(|i| {
                let x = (i * 20) as f32;
                RawDetection::new((x, 0.0, x + 10.0, 10.0), 0.5, 0)
            })
            .collect();
        assert_eq!(apply_nms(detections, 0.4).len(), MAX_DETECTIONS);
    }
}
