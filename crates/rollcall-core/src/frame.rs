//! Frame decoding: turns an incoming image payload into a normalized RGB buffer.
//!
//! Payloads arrive as encoded image bytes (JPEG/PNG/...), as a base64 string
//! optionally carrying a `data:image/...;base64,` prefix, or as an already
//! decoded pixel buffer in RGB, BGR or grayscale order. Every path produces the
//! same [`Frame`] layout: interleaved RGB, `width * height * 3` bytes.

use base64::Engine;
use thiserror::Error;

const RGB_CHANNELS: usize = 3;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("empty image payload")]
    Empty,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("malformed data URL: {0}")]
    DataUrl(String),
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("invalid pixel buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}

/// Channel order of a raw pixel buffer handed in by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelOrder {
    Rgb,
    Bgr,
    Gray,
}

impl PixelOrder {
    fn channels(self) -> usize {
        match self {
            PixelOrder::Rgb | PixelOrder::Bgr => 3,
            PixelOrder::Gray => 1,
        }
    }
}

/// An image payload as received from a collaborator.
#[derive(Debug, Clone)]
pub enum ImagePayload {
    /// Encoded image file bytes.
    Bytes(Vec<u8>),
    /// Base64 text, with or without a `data:` URL prefix.
    Text(String),
    /// Already-decoded pixels.
    Pixels {
        data: Vec<u8>,
        width: u32,
        height: u32,
        order: PixelOrder,
    },
}

/// A decoded RGB frame.
#[derive(Clone)]
pub struct Frame {
    /// Interleaved RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Frame {
    /// Build a frame from interleaved RGB pixels, validating the length.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::InvalidDimensions { width, height });
        }
        let expected = width as usize * height as usize * RGB_CHANNELS;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// RGB triple at (x, y). Caller guarantees bounds.
    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        let idx = (y * self.width as usize + x) * RGB_CHANNELS;
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
    }
}

/// Decode any supported payload into an RGB frame. Never partially succeeds.
pub fn decode(payload: ImagePayload) -> Result<Frame, FrameError> {
    match payload {
        ImagePayload::Bytes(bytes) => decode_encoded(&bytes),
        ImagePayload::Text(text) => {
            let bytes = decode_text(&text)?;
            decode_encoded(&bytes)
        }
        ImagePayload::Pixels {
            data,
            width,
            height,
            order,
        } => from_pixels(data, width, height, order),
    }
}

fn decode_encoded(bytes: &[u8]) -> Result<Frame, FrameError> {
    if bytes.is_empty() {
        return Err(FrameError::Empty);
    }
    let rgb = image::load_from_memory(bytes)?.to_rgb8();
    let (width, height) = rgb.dimensions();
    Frame::from_rgb(rgb.into_raw(), width, height)
}

/// Strip an optional `data:<mime>;base64,` prefix and decode the base64 body.
fn decode_text(text: &str) -> Result<Vec<u8>, FrameError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(FrameError::Empty);
    }

    let body = if let Some(rest) = trimmed.strip_prefix("data:") {
        let (header, body) = rest
            .split_once(',')
            .ok_or_else(|| FrameError::DataUrl("missing ',' separator".into()))?;
        if !header.ends_with(";base64") {
            return Err(FrameError::DataUrl(format!(
                "unsupported encoding in header {header:?}"
            )));
        }
        body
    } else {
        trimmed
    };

    let bytes = base64::engine::general_purpose::STANDARD.decode(body)?;
    if bytes.is_empty() {
        return Err(FrameError::Empty);
    }
    Ok(bytes)
}

fn from_pixels(
    data: Vec<u8>,
    width: u32,
    height: u32,
    order: PixelOrder,
) -> Result<Frame, FrameError> {
    if width == 0 || height == 0 {
        return Err(FrameError::InvalidDimensions { width, height });
    }
    let pixels = width as usize * height as usize;
    let expected = pixels * order.channels();
    if data.len() != expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: data.len(),
        });
    }

    let rgb = match order {
        PixelOrder::Rgb => data,
        PixelOrder::Bgr => data
            .chunks_exact(3)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect(),
        PixelOrder::Gray => data.iter().flat_map(|&y| [y, y, y]).collect(),
    };

    Frame::from_rgb(rgb, width, height)
}
