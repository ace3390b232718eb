use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::snapshot::encode_png;

pub const DEFAULT_EXPORT_QUALITY: u8 = 90;
pub const DEFAULT_EXPORT_SCALE: f64 = 1.0;
pub const MAX_EXPORT_SCALE: f64 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Png,
    #[default]
    Jpeg,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    pub fn default_file_name(self) -> String {
        format!("retouch-export.{}", self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            other => bail!("unsupported export format '{other}' (expected png or jpeg)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExportOptions {
    pub format: ExportFormat,
    /// JPEG quality, 1..=100. Ignored for PNG.
    pub quality: u8,
    /// Multiplier applied to both dimensions, in (0, 8].
    pub scale: f64,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: ExportFormat::default(),
            quality: DEFAULT_EXPORT_QUALITY,
            scale: DEFAULT_EXPORT_SCALE,
        }
    }
}

impl ExportOptions {
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.quality) {
            bail!("export quality must be between 1 and 100, got {}", self.quality);
        }
        if !self.scale.is_finite() || self.scale <= 0.0 || self.scale > MAX_EXPORT_SCALE {
            bail!(
                "export scale must be greater than 0 and at most {MAX_EXPORT_SCALE}, got {}",
                self.scale
            );
        }
        Ok(())
    }

    pub fn target_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        let scaled = |value: u32| -> u32 {
            let raw = (f64::from(value) * self.scale).round();
            raw.clamp(1.0, f64::from(u32::MAX)) as u32
        };
        (scaled(width), scaled(height))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportResult {
    pub path: PathBuf,
    pub format: ExportFormat,
    pub width: u32,
    pub height: u32,
    pub bytes: u64,
}

/// Scales and encodes `image` according to `options`.
pub fn render_export(image: &DynamicImage, options: &ExportOptions) -> Result<Vec<u8>> {
    options.validate()?;
    let (width, height) = options.target_dimensions(image.width(), image.height());
    let scaled = if (width, height) == (image.width(), image.height()) {
        image.clone()
    } else {
        image.resize_exact(width, height, FilterType::Lanczos3)
    };

    match options.format {
        ExportFormat::Png => encode_png(&scaled),
        ExportFormat::Jpeg => {
            let flattened = flatten_on_white(&scaled);
            let mut bytes = Vec::new();
            let mut encoder = JpegEncoder::new_with_quality(&mut bytes, options.quality);
            encoder
                .encode_image(&DynamicImage::ImageRgb8(flattened))
                .context("failed to encode JPEG")?;
            Ok(bytes)
        }
    }
}

pub fn export_image(
    image: &DynamicImage,
    options: &ExportOptions,
    out_path: &Path,
) -> Result<ExportResult> {
    let bytes = render_export(image, options)?;
    if let Some(parent) = out_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    fs::write(out_path, &bytes)
        .with_context(|| format!("failed to write {}", out_path.display()))?;
    let (width, height) = options.target_dimensions(image.width(), image.height());
    Ok(ExportResult {
        path: out_path.to_path_buf(),
        format: options.format,
        width,
        height,
        bytes: bytes.len() as u64,
    })
}

/// Exports an image file from disk, e.g. a snapshot recorded in a session summary.
pub fn export_file(
    source: &Path,
    options: &ExportOptions,
    out_path: &Path,
) -> Result<ExportResult> {
    let image =
        image::open(source).with_context(|| format!("failed decoding {}", source.display()))?;
    export_image(&image, options, out_path)
}

/// Directories get the default file name for `format`.
pub fn resolve_export_path(out: &Path, format: ExportFormat) -> PathBuf {
    if out.is_dir() {
        out.join(format.default_file_name())
    } else {
        out.to_path_buf()
    }
}

fn flatten_on_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let mut flattened = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        flattened.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }
    flattened
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, Rgba, RgbaImage};

    use super::{
        export_file, export_image, render_export, resolve_export_path, ExportFormat,
        ExportOptions,
    };

    fn transparent_square(size: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(size, size, Rgba([0, 0, 0, 0])))
    }

    #[test]
    fn format_parsing_and_names() -> anyhow::Result<()> {
        assert_eq!("JPG".parse::<ExportFormat>()?, ExportFormat::Jpeg);
        assert_eq!("png".parse::<ExportFormat>()?, ExportFormat::Png);
        assert!("tiff".parse::<ExportFormat>().is_err());
        assert_eq!(ExportFormat::Jpeg.default_file_name(), "retouch-export.jpg");
        Ok(())
    }

    #[test]
    fn validation_bounds() {
        let mut options = ExportOptions::default();
        assert!(options.validate().is_ok());
        options.quality = 0;
        assert!(options.validate().is_err());
        options.quality = 100;
        options.scale = 0.0;
        assert!(options.validate().is_err());
        options.scale = 8.5;
        assert!(options.validate().is_err());
        options.scale = f64::NAN;
        assert!(options.validate().is_err());
    }

    #[test]
    fn target_dimensions_round_and_never_collapse() {
        let options = ExportOptions {
            scale: 0.25,
            ..ExportOptions::default()
        };
        assert_eq!(options.target_dimensions(10, 3), (3, 1));
        assert_eq!(options.target_dimensions(1, 1), (1, 1));
    }

    #[test]
    fn png_export_scales_and_keeps_alpha() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let out = temp.path().join("nested").join("out.png");
        let options = ExportOptions {
            format: ExportFormat::Png,
            quality: 1,
            scale: 0.5,
        };
        let result = export_image(&transparent_square(8), &options, &out)?;
        assert_eq!((result.width, result.height), (4, 4));

        let decoded = image::open(&out)?.to_rgba8();
        assert_eq!(decoded.dimensions(), (4, 4));
        assert_eq!(decoded.get_pixel(0, 0)[3], 0);
        Ok(())
    }

    #[test]
    fn export_file_into_directory_uses_default_name() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let source = temp.path().join("source.png");
        transparent_square(6).save(&source)?;

        let out = resolve_export_path(temp.path(), ExportFormat::Jpeg);
        assert_eq!(out, temp.path().join("retouch-export.jpg"));
        let result = export_file(&source, &ExportOptions::default(), &out)?;
        assert_eq!(result.format, ExportFormat::Jpeg);
        assert_eq!(image::image_dimensions(&out)?, (6, 6));
        assert!(export_file(&temp.path().join("missing.png"), &ExportOptions::default(), &out).is_err());
        Ok(())
    }

    #[test]
    fn jpeg_export_flattens_transparency_on_white() -> anyhow::Result<()> {
        let options = ExportOptions {
            format: ExportFormat::Jpeg,
            quality: 95,
            scale: 1.0,
        };
        let bytes = render_export(&transparent_square(16), &options)?;
        let decoded = image::load_from_memory(&bytes)?.to_rgb8();
        let pixel = decoded.get_pixel(8, 8);
        assert!(pixel.0.iter().all(|channel| *channel > 240));
        Ok(())
    }
}
