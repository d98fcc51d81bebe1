//! What a batch produces: a resize geometry or an output encoding.

use crate::units::{Unit, to_pixels};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Errors from validating a target specification.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TargetError {
    #[error("width and height must be numbers greater than 0 (got {width} x {height})")]
    NonPositive { width: f64, height: f64 },

    #[error("target size {width:.2} x {height:.2} px is smaller than one pixel")]
    TooSmall { width: f64, height: f64 },

    #[error(
        "target size {width} x {height} px exceeds the canvas limit of {max_side} px per side and {max_pixels} px in total",
        max_side = MAX_CANVAS_SIDE,
        max_pixels = MAX_CANVAS_PIXELS
    )]
    TooLarge { width: u64, height: u64 },

    #[error("unknown output format '{0}'. Use: jpeg, png, gif, webp, avif")]
    UnknownFormat(String),
}

/// Longest canvas side accepted, in pixels.
pub const MAX_CANVAS_SIDE: u64 = 32_767;
/// Largest canvas area accepted, in pixels.
pub const MAX_CANVAS_PIXELS: u64 = 268_435_456;

/// Requested resize geometry in physical units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub unit: Unit,
}

impl Geometry {
    pub fn new(width: f64, height: f64, unit: Unit) -> Self {
        Self {
            width,
            height,
            unit,
        }
    }

    /// Resolve to a pixel box. Done once per batch.
    ///
    /// Canvas sizes are integral, so the fractional part is dropped.
    pub fn resolve(&self) -> Result<PixelBox, TargetError> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if !valid(self.width) || !valid(self.height) {
            return Err(TargetError::NonPositive {
                width: self.width,
                height: self.height,
            });
        }

        let width = to_pixels(self.width, self.unit);
        let height = to_pixels(self.height, self.unit);
        if width < 1.0 || height < 1.0 {
            return Err(TargetError::TooSmall { width, height });
        }

        // Saturating casts; anything past the limits is rejected below
        let (width, height) = (width as u64, height as u64);
        if width > MAX_CANVAS_SIDE
            || height > MAX_CANVAS_SIDE
            || width.saturating_mul(height) > MAX_CANVAS_PIXELS
        {
            return Err(TargetError::TooLarge { width, height });
        }

        Ok(PixelBox {
            width: width as u32,
            height: height as u32,
        })
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x {} {}", self.width, self.height, self.unit)
    }
}

/// Exact output canvas size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBox {
    pub width: u32,
    pub height: u32,
}

/// Output encodings a batch may convert to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[serde(alias = "jpg")]
    Jpeg,
    Png,
    Gif,
    Webp,
    Avif,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 5] = [
        OutputFormat::Jpeg,
        OutputFormat::Png,
        OutputFormat::Gif,
        OutputFormat::Webp,
        OutputFormat::Avif,
    ];

    /// File extension written for this encoding (without the dot).
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
            OutputFormat::Gif => "gif",
            OutputFormat::Webp => "webp",
            OutputFormat::Avif => "avif",
        }
    }

    /// Whether transparent pixels survive encoding.
    pub fn supports_transparency(self) -> bool {
        !matches!(self, OutputFormat::Jpeg)
    }

    /// Map a declared media type (e.g. `image/jpeg`) to an encoding.
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        let essence = media_type.split(';').next().unwrap_or("").trim();
        match essence.to_lowercase().as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(OutputFormat::Jpeg),
            "image/png" => Some(OutputFormat::Png),
            "image/gif" => Some(OutputFormat::Gif),
            "image/webp" => Some(OutputFormat::Webp),
            "image/avif" => Some(OutputFormat::Avif),
            _ => None,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            "png" => Ok(OutputFormat::Png),
            "gif" => Ok(OutputFormat::Gif),
            "webp" => Ok(OutputFormat::Webp),
            "avif" => Ok(OutputFormat::Avif),
            _ => Err(TargetError::UnknownFormat(s.to_string())),
        }
    }
}
