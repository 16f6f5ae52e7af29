//! Utility functions for tensor preparation

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::{Array4, ArrayViewMut4};

/// Fill value for the padded border, as used by YOLO exports.
pub const LETTERBOX_FILL: u8 = 114;

/// Geometry of a letterbox transform, used to map boxes back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    /// Map a point from model input space back to source image space.
    pub fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Fit `image` into a `size`x`size` square, keeping aspect ratio and padding
/// the remainder with [`LETTERBOX_FILL`].
pub fn letterbox(image: &RgbImage, size: u32) -> (RgbImage, Letterbox) {
    let (width, height) = image.dimensions();
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_width = ((width as f32 * scale).round() as u32).clamp(1, size);
    let new_height = ((height as f32 * scale).round() as u32).clamp(1, size);

    let pad_x = (size - new_width) / 2;
    let pad_y = (size - new_height) / 2;

    let mut canvas = RgbImage::from_pixel(size, size, Rgb([LETTERBOX_FILL; 3]));
    if (new_width, new_height) == (width, height) {
        imageops::replace(&mut canvas, image, pad_x as i64, pad_y as i64);
    } else {
        let resized = imageops::resize(image, new_width, new_height, FilterType::Triangle);
        imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);
    }

    let geometry = Letterbox {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
    };
    (canvas, geometry)
}

/// Write `image` into `tensor` as normalized CHW floats. `tensor` must have
/// shape `[1, 3, height, width]`.
pub fn write_chw_tensor(
    image: &RgbImage,
    mut tensor: ArrayViewMut4<'_, f32>,
) -> Result<(), String> {
    let (width, height) = image.dimensions();
    let expected = [1, 3, height as usize, width as usize];
    if tensor.shape() != expected {
        return Err(format!(
            "Tensor shape {:?} does not match image {}x{}",
            tensor.shape(),
            width,
            height
        ));
    }

    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            tensor[[0, c, y, x]] = pixel[c] as f32 / 255.0;
        }
    }
    Ok(())
}

/// Allocate a zeroed `[1, 3, size, size]` input tensor.
pub fn input_tensor(size: u32) -> Array4<f32> {
    Array4::zeros((1, 3, size as usize, size as usize))
}

/// Intersection over union of two `(x1, y1, x2, y2)` boxes.
pub fn compute_iou(a: &(f32, f32, f32, f32), b: &(f32, f32, f32, f32)) -> f32 {
    let (ax1, ay1, ax2, ay2) = *a;
    let (bx1, by1, bx2, by2) = *b;

    let inter_w = (ax2.min(bx2) - ax1.max(bx1)).max(0.0);
    let inter_h = (ay2.min(by2) - ay1.max(by1)).max(0.0);
    let inter_area = inter_w * inter_h;
    if inter_area <= 0.0 {
        return 0.0;
    }

    let area_a = (ax2 - ax1).max(0.0) * (ay2 - ay1).max(0.0);
    let area_b = (bx2 - bx1).max(0.0) * (by2 - by1).max(0.0);
    let union_area = area_a + area_b - inter_area;
    if union_area <= 0.0 || !union_area.is_finite() {
        return 0.0;
    }

    let iou = inter_area / union_area;
    if iou.is_finite() {
        iou.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
