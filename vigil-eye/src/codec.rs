//! Image ingestion: encoded bytes or base64 text into pixels

use crate::error::DecodeError;
use base64::Engine as _;
use image::RgbImage;
use tracing::debug;

/// Decoded image, 8-bit RGB, row-major.
///
/// There is no mutable access to the pixels; resizing yields a new `Image`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pixels: RgbImage,
}

impl Image {
    pub const CHANNELS: u32 = 3;

    pub fn from_rgb(pixels: RgbImage) -> Self {
        Self { pixels }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn channels(&self) -> u32 {
        Self::CHANNELS
    }

    /// (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn as_raw(&self) -> &[u8] {
        self.pixels.as_raw()
    }
}

/// Which request field the image arrived in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePayload {
    /// Raw encoded file bytes (multipart `image` field)
    Encoded(Vec<u8>),
    /// Base64 text (JSON `image_base64` field)
    Base64(String),
}

impl ImagePayload {
    pub fn kind(&self) -> &'static str {
        match self {
            ImagePayload::Encoded(_) => "multipart",
            ImagePayload::Base64(_) => "base64",
        }
    }

    /// Consume the payload and decode it.
    pub fn decode(self) -> Result<Image, DecodeError> {
        match self {
            ImagePayload::Encoded(bytes) => decode(&bytes),
            ImagePayload::Base64(text) => decode_base64(&text),
        }
    }
}

/// Decode encoded image bytes (PNG, JPEG, ...).
pub fn decode(bytes: &[u8]) -> Result<Image, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let decoded = image::load_from_memory(bytes)?;
    let image = Image::from_rgb(decoded.to_rgb8());
    debug!(
        "Decoded {} bytes into {}x{} image",
        bytes.len(),
        image.width(),
        image.height()
    );
    Ok(image)
}

/// Decode base64 text, tolerating a `data:` URL prefix and embedded whitespace.
pub fn decode_base64(text: &str) -> Result<Image, DecodeError> {
    let body = strip_data_url_prefix(text.trim());
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(DecodeError::Empty);
    }

    let bytes = base64::engine::general_purpose::STANDARD.decode(compact.as_bytes())?;
    decode(&bytes)
}

fn strip_data_url_prefix(text: &str) -> &str {
    if text.starts_with("data:") {
        if let Some(idx) = text.find(";base64,") {
            return &text[idx + ";base64,".len()..];
        }
    }
    text
}
