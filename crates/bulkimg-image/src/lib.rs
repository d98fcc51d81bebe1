//! Image transform stage for Bulk Img Tools.
//!
//! Decodes with the `image` crate, fits and centers images on exact-size
//! canvases, and re-encodes to the requested output. Output encodings are
//! enabled via feature flags.
//!
//! # Features
//!
//! - `png` (default) - Portable Network Graphics
//! - `jpeg` (default) - JPEG, flattened onto white
//! - `gif` (default) - Graphics Interchange Format
//! - `webp` (default) - WebP, lossless only
//! - `avif` - AV1 Image File Format
//! - `all` - All output encodings
//!
//! Decoding always accepts PNG, JPEG, GIF, WebP and BMP.

use bulkimg_core::{OutputFormat, PixelBox, SourceItem, TransformError, Transformer};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use std::io::Cursor;
use tracing::debug;

/// Quality used when a resize produces a lossy encoding.
pub const RESIZE_QUALITY: f32 = 0.92;

/// Quality used when converting to a lossy encoding.
pub const CONVERT_QUALITY: f32 = 0.9;

#[cfg(feature = "avif")]
const AVIF_SPEED: u8 = 8;

/// Output encodings compiled into this build.
pub fn supported_encodings() -> Vec<OutputFormat> {
    let mut formats = Vec::new();
    #[cfg(feature = "jpeg")]
    formats.push(OutputFormat::Jpeg);
    #[cfg(feature = "png")]
    formats.push(OutputFormat::Png);
    #[cfg(feature = "gif")]
    formats.push(OutputFormat::Gif);
    #[cfg(feature = "webp")]
    formats.push(OutputFormat::Webp);
    #[cfg(feature = "avif")]
    formats.push(OutputFormat::Avif);
    formats
}

/// Scaled size and centering offset of an image fitted inside a box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fit {
    pub width: u32,
    pub height: u32,
    pub x: u32,
    pub y: u32,
}

/// Fit a `src_w`×`src_h` image inside `box_w`×`box_h`, keeping its aspect ratio.
///
/// The scaled size touches the box on at least one axis and never exceeds it.
pub fn fit_within(src_w: u32, src_h: u32, box_w: u32, box_h: u32) -> Fit {
    if src_w == 0 || src_h == 0 || box_w == 0 || box_h == 0 {
        return Fit {
            width: box_w,
            height: box_h,
            x: 0,
            y: 0,
        };
    }

    let (sw, sh) = (src_w as f64, src_h as f64);
    let (bw, bh) = (box_w as f64, box_h as f64);

    let (w, h) = if bw / bh > sw / sh {
        (bh * sw / sh, bh)
    } else {
        (bw, bw * sh / sw)
    };

    let width = (w.round() as u32).clamp(1, box_w);
    let height = (h.round() as u32).clamp(1, box_h);
    Fit {
        width,
        height,
        x: (box_w - width) / 2,
        y: (box_h - height) / 2,
    }
}

/// [`Transformer`] backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageTransformer;

impl ImageTransformer {
    pub fn new() -> Self {
        Self
    }
}

impl Transformer for ImageTransformer {
    fn resize(&self, source: &SourceItem, size: PixelBox) -> Result<Vec<u8>, TransformError> {
        let img = decode(source)?;
        let (src_w, src_h) = img.dimensions();
        let fit = fit_within(src_w, src_h, size.width, size.height);
        let format = resize_format(source);

        debug!(
            item = %source.name,
            from = %format!("{src_w}x{src_h}"),
            scaled = %format!("{}x{}", fit.width, fit.height),
            %format,
            "resizing"
        );

        let scaled = imageops::resize(&img.to_rgba8(), fit.width, fit.height, FilterType::Lanczos3);
        let background = if format.supports_transparency() {
            Rgba([0, 0, 0, 0])
        } else {
            Rgba([255, 255, 255, 255])
        };
        let mut canvas = RgbaImage::from_pixel(size.width, size.height, background);
        imageops::overlay(&mut canvas, &scaled, i64::from(fit.x), i64::from(fit.y));

        encode(&DynamicImage::ImageRgba8(canvas), format, RESIZE_QUALITY)
    }

    fn convert(
        &self,
        source: &SourceItem,
        format: OutputFormat,
    ) -> Result<Vec<u8>, TransformError> {
        if !supported_encodings().contains(&format) {
            return Err(TransformError::UnsupportedEncoding(format));
        }
        let img = decode(source)?;
        debug!(item = %source.name, %format, "converting");
        encode(&img, format, CONVERT_QUALITY)
    }
}

fn decode(source: &SourceItem) -> Result<DynamicImage, TransformError> {
    image::load_from_memory(&source.bytes).map_err(|e| TransformError::Decode(e.to_string()))
}

/// The source's own encoding when it can be written, PNG otherwise.
fn resize_format(source: &SourceItem) -> OutputFormat {
    let enabled = supported_encodings();
    OutputFormat::from_media_type(&source.media_type)
        .or_else(|| {
            image::guess_format(&source.bytes)
                .ok()
                .and_then(output_format)
        })
        .filter(|format| enabled.contains(format))
        .unwrap_or(OutputFormat::Png)
}

fn output_format(format: ImageFormat) -> Option<OutputFormat> {
    match format {
        ImageFormat::Jpeg => Some(OutputFormat::Jpeg),
        ImageFormat::Png => Some(OutputFormat::Png),
        ImageFormat::Gif => Some(OutputFormat::Gif),
        ImageFormat::WebP => Some(OutputFormat::Webp),
        ImageFormat::Avif => Some(OutputFormat::Avif),
        _ => None,
    }
}

/// Encode `img`. `quality` in `0.0..=1.0` applies to lossy encodings only.
fn encode(img: &DynamicImage, format: OutputFormat, quality: f32) -> Result<Vec<u8>, TransformError> {
    let mut buf = Cursor::new(Vec::new());
    let encode_failed = |e: image::ImageError| TransformError::Encode {
        format,
        detail: e.to_string(),
    };

    match format {
        OutputFormat::Jpeg => {
            let encoder =
                image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality_percent(quality));
            DynamicImage::ImageRgb8(flatten_onto_white(img))
                .write_with_encoder(encoder)
                .map_err(encode_failed)?;
        }
        OutputFormat::Png => img.write_to(&mut buf, ImageFormat::Png).map_err(encode_failed)?,
        OutputFormat::Gif => DynamicImage::ImageRgba8(img.to_rgba8())
            .write_to(&mut buf, ImageFormat::Gif)
            .map_err(encode_failed)?,
        OutputFormat::Webp => DynamicImage::ImageRgba8(img.to_rgba8())
            .write_to(&mut buf, ImageFormat::WebP)
            .map_err(encode_failed)?,
        #[cfg(feature = "avif")]
        OutputFormat::Avif => {
            let encoder = image::codecs::avif::AvifEncoder::new_with_speed_quality(
                &mut buf,
                AVIF_SPEED,
                quality_percent(quality),
            );
            DynamicImage::ImageRgba8(img.to_rgba8())
                .write_with_encoder(encoder)
                .map_err(encode_failed)?;
        }
        #[cfg(not(feature = "avif"))]
        OutputFormat::Avif => return Err(TransformError::UnsupportedEncoding(format)),
    }

    Ok(buf.into_inner())
}

fn quality_percent(quality: f32) -> u8 {
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

/// Composite over an opaque white background.
fn flatten_onto_white(img: &DynamicImage) -> RgbImage {
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    let mut out = RgbImage::new(w, h);
    for (x, y, px) in rgba.enumerate_pixels() {
        let alpha = u32::from(px[3]);
        let blend = |c: u8| ((u32::from(c) * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        out.put_pixel(x, y, Rgb([blend(px[0]), blend(px[1]), blend(px[2])]));
    }
    out
}
