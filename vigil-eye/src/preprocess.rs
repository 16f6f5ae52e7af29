//! Size-bounded preprocessing
//!
//! Images whose longer side exceeds the configured ceiling are downscaled with
//! a single aspect-preserving factor. Detections are reported in the resized
//! image's coordinates; nothing maps them back to the original size.

use crate::codec::Image;
use image::imageops::{self, FilterType};
use tracing::debug;

/// Dimensions after applying the max-dimension policy.
///
/// `new = floor(side * max_dimension / max(width, height))`, never below 1.
pub fn target_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_dimension {
        return (width, height);
    }

    let scale = max_dimension as f64 / longest as f64;
    let new_width = ((width as f64 * scale).floor() as u32).max(1);
    let new_height = ((height as f64 * scale).floor() as u32).max(1);
    (new_width, new_height)
}

/// Downscale `image` if its longer side exceeds `max_dimension`.
///
/// Images already within bounds are returned as-is.
pub fn resize_if_needed(image: Image, max_dimension: u32) -> Image {
    let (width, height) = image.dimensions();
    let (new_width, new_height) = target_dimensions(width, height, max_dimension);
    if (new_width, new_height) == (width, height) {
        return image;
    }

    let resized = imageops::resize(image.as_rgb(), new_width, new_height, FilterType::Triangle);
    debug!(
        "Resized image {}x{} -> {}x{} (max dimension {})",
        width, height, new_width, new_height, max_dimension
    );
    Image::from_rgb(resized)
}
