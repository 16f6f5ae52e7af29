//! Post-processing of detector output

pub mod detection;

pub use detection::{map_detections, Prediction};
