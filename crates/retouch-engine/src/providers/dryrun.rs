use anyhow::{bail, Result};
use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbaImage};
use serde_json::json;
use sha2::{Digest, Sha256};

use super::{map_object, DescribeRequest, EditProvider, EditRequest, EditResponse};
use crate::operations::{EditOperation, Region};
use crate::snapshot::encode_png;

/// Deterministic local stand-in for the edit model. Needs no network.
pub struct DryrunProvider;

impl EditProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn edit(&self, request: &EditRequest) -> Result<EditResponse> {
        let source = request.source.load_image()?.to_rgba8();
        let (width, height) = source.dimensions();
        let color = color_from_prompt(&request.operation.label());

        let edited = match &request.operation {
            EditOperation::Retouch { .. } => {
                let mut image = source;
                if let Some(spot) = request.operation.resolved_hotspot(width, height) {
                    let radius = (width.min(height) / 8).max(2);
                    paint_disc(&mut image, spot.x, spot.y, radius, color);
                }
                image
            }
            EditOperation::Filter { .. } | EditOperation::Adjustment { .. } => {
                let mut image = source;
                for pixel in image.pixels_mut() {
                    for channel in 0..3 {
                        pixel[channel] =
                            ((u16::from(pixel[channel]) + u16::from(color[channel])) / 2) as u8;
                    }
                }
                image
            }
            EditOperation::MagicFill { region } => {
                let mut image = source;
                let fill = border_mean(&image, region);
                for y in region.y..region.y + region.height {
                    for x in region.x..region.x + region.width {
                        image.put_pixel(x, y, fill);
                    }
                }
                image
            }
            EditOperation::Upscale { factor } => DynamicImage::ImageRgba8(source)
                .resize_exact(width * factor, height * factor, FilterType::Triangle)
                .to_rgba8(),
            EditOperation::Crop { .. } => bail!("dryrun provider does not handle local crops"),
        };

        let out_width = edited.width();
        let out_height = edited.height();
        let image_bytes = encode_png(&DynamicImage::ImageRgba8(edited))?;
        Ok(EditResponse {
            image_bytes,
            mime_type: Some("image/png".to_string()),
            provider_request: map_object(json!({
                "endpoint": "dryrun-native",
                "payload": {
                    "operation": request.operation.kind().as_str(),
                    "instruction": request.instruction,
                    "source_snapshot_id": request.source.id,
                    "model": request.model,
                }
            })),
            provider_response: map_object(json!({
                "status": "ok",
                "width": out_width,
                "height": out_height,
            })),
            warnings: Vec::new(),
        })
    }

    fn describe(&self, request: &DescribeRequest) -> Result<String> {
        let image = request.source.load_image()?.to_rgba8();
        let (width, height) = image.dimensions();
        let mut sums = [0u64; 3];
        for pixel in image.pixels() {
            for channel in 0..3 {
                sums[channel] += u64::from(pixel[channel]);
            }
        }
        let count = u64::from(width) * u64::from(height);
        let mean = sums.map(|sum| (sum / count.max(1)) as u8);
        Ok(format!(
            "A {width}x{height} image with mean color #{:02x}{:02x}{:02x}.",
            mean[0], mean[1], mean[2]
        ))
    }
}

fn color_from_prompt(prompt: &str) -> [u8; 3] {
    let digest = Sha256::digest(prompt.as_bytes());
    [digest[0], digest[1], digest[2]]
}

fn paint_disc(image: &mut RgbaImage, cx: u32, cy: u32, radius: u32, color: [u8; 3]) {
    let (width, height) = image.dimensions();
    let r = i64::from(radius);
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy > r * r {
                continue;
            }
            let x = i64::from(cx) + dx;
            let y = i64::from(cy) + dy;
            if x < 0 || y < 0 || x >= i64::from(width) || y >= i64::from(height) {
                continue;
            }
            image.put_pixel(x as u32, y as u32, Rgba([color[0], color[1], color[2], 255]));
        }
    }
}

/// Mean of the one-pixel ring around `region`; the region itself when it covers the image.
fn border_mean(image: &RgbaImage, region: &Region) -> Rgba<u8> {
    let (width, height) = image.dimensions();
    let left = i64::from(region.x) - 1;
    let top = i64::from(region.y) - 1;
    let right = i64::from(region.x + region.width);
    let bottom = i64::from(region.y + region.height);

    let mut sums = [0u64; 4];
    let mut count = 0u64;
    for y in top..=bottom {
        for x in left..=right {
            let on_ring = x == left || x == right || y == top || y == bottom;
            if !on_ring || x < 0 || y < 0 || x >= i64::from(width) || y >= i64::from(height) {
                continue;
            }
            let pixel = image.get_pixel(x as u32, y as u32);
            for channel in 0..4 {
                sums[channel] += u64::from(pixel[channel]);
            }
            count += 1;
        }
    }

    if count == 0 {
        for y in region.y..region.y + region.height {
            for x in region.x..region.x + region.width {
                let pixel = image.get_pixel(x, y);
                for channel in 0..4 {
                    sums[channel] += u64::from(pixel[channel]);
                }
                count += 1;
            }
        }
    }

    let mean = sums.map(|sum| (sum / count.max(1)) as u8);
    Rgba(mean)
}
