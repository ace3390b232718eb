use anyhow::{bail, Result};
use retouch_contracts::session::prompt_log::PromptKind;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const MIN_UPSCALE_FACTOR: u32 = 2;
pub const MAX_UPSCALE_FACTOR: u32 = 4;
pub const DEFAULT_UPSCALE_FACTOR: u32 = 2;

const IMAGE_ONLY_SUFFIX: &str = "Return only the final image, no text.";

/// How a snapshot came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditKind {
    Upload,
    Retouch,
    Filter,
    Adjustment,
    MagicFill,
    Upscale,
    Crop,
}

impl EditKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Retouch => "retouch",
            Self::Filter => "filter",
            Self::Adjustment => "adjustment",
            Self::MagicFill => "magic_fill",
            Self::Upscale => "upscale",
            Self::Crop => "crop",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hotspot {
    pub x: u32,
    pub y: u32,
}

/// Pixel rectangle in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && u64::from(self.x) + u64::from(self.width) <= u64::from(width)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(height)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditOperation {
    Retouch {
        prompt: String,
        hotspot: Option<Hotspot>,
    },
    Filter {
        prompt: String,
    },
    Adjustment {
        prompt: String,
    },
    MagicFill {
        region: Region,
    },
    Upscale {
        factor: u32,
    },
    Crop {
        region: Region,
    },
}

impl EditOperation {
    pub fn kind(&self) -> EditKind {
        match self {
            Self::Retouch { .. } => EditKind::Retouch,
            Self::Filter { .. } => EditKind::Filter,
            Self::Adjustment { .. } => EditKind::Adjustment,
            Self::MagicFill { .. } => EditKind::MagicFill,
            Self::Upscale { .. } => EditKind::Upscale,
            Self::Crop { .. } => EditKind::Crop,
        }
    }

    /// Crop runs locally; everything else goes to the edit model.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Crop { .. })
    }

    pub fn validate(&self, width: u32, height: u32) -> Result<()> {
        match self {
            Self::Retouch { prompt, hotspot } => {
                require_prompt("retouch", prompt)?;
                if let Some(spot) = hotspot {
                    if spot.x >= width || spot.y >= height {
                        bail!(
                            "hotspot ({}, {}) is outside the {width}x{height} image",
                            spot.x,
                            spot.y
                        );
                    }
                }
            }
            Self::Filter { prompt } => require_prompt("filter", prompt)?,
            Self::Adjustment { prompt } => require_prompt("adjustment", prompt)?,
            Self::MagicFill { region } | Self::Crop { region } => {
                if !region.fits_within(width, height) {
                    bail!(
                        "region x:{}, y:{}, w:{}, h:{} does not fit the {width}x{height} image",
                        region.x,
                        region.y,
                        region.width,
                        region.height
                    );
                }
            }
            Self::Upscale { factor } => {
                if !(MIN_UPSCALE_FACTOR..=MAX_UPSCALE_FACTOR).contains(factor) {
                    bail!(
                        "upscale factor must be between {MIN_UPSCALE_FACTOR} and {MAX_UPSCALE_FACTOR}, got {factor}"
                    );
                }
            }
        }
        Ok(())
    }

    /// Retouch without an explicit hotspot targets the image center.
    pub fn resolved_hotspot(&self, width: u32, height: u32) -> Option<Hotspot> {
        match self {
            Self::Retouch { hotspot, .. } => Some(hotspot.unwrap_or(Hotspot {
                x: width / 2,
                y: height / 2,
            })),
            _ => None,
        }
    }

    /// Instruction text for the edit model. `None` for local operations.
    pub fn instruction(&self, width: u32, height: u32) -> Option<String> {
        let body = match self {
            Self::Retouch { prompt, .. } => {
                let spot = self.resolved_hotspot(width, height)?;
                format!(
                    "You are an expert photo editor. Make a natural, localized edit to the provided image.\n\
                     User request: \"{prompt}\"\n\
                     Edit location: the area around pixel coordinates (x: {}, y: {}).\n\
                     Guidelines:\n\
                     - The edit must look realistic and blend seamlessly with its surroundings.\n\
                     - Everything outside the immediate edit area must stay identical to the original.",
                    spot.x, spot.y
                )
            }
            Self::Filter { prompt } => format!(
                "You are an expert photo editor. Apply a stylistic filter to the entire image.\n\
                 Filter request: \"{prompt}\"\n\
                 Guidelines:\n\
                 - Change only the style; keep the composition and content of the image.\n\
                 - Apply the style evenly across the whole frame."
            ),
            Self::Adjustment { prompt } => format!(
                "You are an expert photo editor. Make a global, photorealistic adjustment to the entire image.\n\
                 Adjustment request: \"{prompt}\"\n\
                 Guidelines:\n\
                 - The result must remain photorealistic.\n\
                 - Apply the adjustment consistently across the whole image."
            ),
            Self::MagicFill { region } => format!(
                "You are an expert photo editor. Perform photorealistic inpainting on the provided image.\n\
                 Fill the rectangle at x: {}, y: {}, width: {}, height: {} (pixel coordinates).\n\
                 Guidelines:\n\
                 - Replace the contents of the rectangle with content that matches the surrounding scene.\n\
                 - Match lighting, texture and perspective so the fill blends seamlessly.\n\
                 - Leave everything outside the rectangle unchanged.",
                region.x, region.y, region.width, region.height
            ),
            Self::Upscale { factor } => format!(
                "You are an expert photo restorer. Upscale the provided image by exactly {factor}x.\n\
                 Guidelines:\n\
                 - Reconstruct fine detail and sharpen edges without inventing new content.\n\
                 - Reduce noise and compression artifacts.\n\
                 - Keep colors and composition faithful to the original."
            ),
            Self::Crop { .. } => return None,
        };
        Some(format!("{body}\n\n{IMAGE_ONLY_SUFFIX}"))
    }

    /// Prompt-log kind and content; `None` for operations that are not logged.
    pub fn prompt_entry(&self) -> Option<(PromptKind, String)> {
        match self {
            Self::Retouch { prompt, .. } => Some((PromptKind::Retouch, prompt.trim().to_string())),
            Self::Filter { prompt } => Some((PromptKind::Filter, prompt.trim().to_string())),
            Self::Adjustment { prompt } => {
                Some((PromptKind::Adjustment, prompt.trim().to_string()))
            }
            Self::MagicFill { region } => Some((
                PromptKind::MagicFill,
                format!(
                    "Fill region: x:{}, y:{}, w:{}, h:{}",
                    region.x, region.y, region.width, region.height
                ),
            )),
            Self::Upscale { factor } => {
                Some((PromptKind::Upscale, format!("Upscale by {factor}x")))
            }
            Self::Crop { .. } => None,
        }
    }

    /// Successful filter, adjustment, fill and upscale edits star their log entry.
    pub fn stars_on_success(&self) -> bool {
        matches!(
            self,
            Self::Filter { .. }
                | Self::Adjustment { .. }
                | Self::MagicFill { .. }
                | Self::Upscale { .. }
        )
    }

    /// Human-readable label recorded in receipts and events.
    pub fn label(&self) -> String {
        match self.prompt_entry() {
            Some((_, content)) => content,
            None => match self {
                Self::Crop { region } => format!(
                    "Crop to x:{}, y:{}, w:{}, h:{}",
                    region.x, region.y, region.width, region.height
                ),
                _ => self.kind().as_str().to_string(),
            },
        }
    }

    pub fn parameters(&self) -> Map<String, Value> {
        let value = match self {
            Self::Retouch { prompt, hotspot } => json!({"prompt": prompt, "hotspot": hotspot}),
            Self::Filter { prompt } | Self::Adjustment { prompt } => json!({"prompt": prompt}),
            Self::MagicFill { region } | Self::Crop { region } => json!({"region": region}),
            Self::Upscale { factor } => json!({"factor": factor}),
        };
        value.as_object().cloned().unwrap_or_default()
    }
}

fn require_prompt(operation: &str, prompt: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        bail!("{operation} requires a non-empty prompt");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use retouch_contracts::session::prompt_log::PromptKind;

    use super::{EditKind, EditOperation, Hotspot, Region};

    fn region(x: u32, y: u32, width: u32, height: u32) -> Region {
        Region {
            x,
            y,
            width,
            height,
        }
    }

    #[test]
    fn retouch_without_hotspot_targets_center() {
        let op = EditOperation::Retouch {
            prompt: "remove the sign".to_string(),
            hotspot: None,
        };
        assert_eq!(op.resolved_hotspot(200, 100), Some(Hotspot { x: 100, y: 50 }));
        let instruction = op.instruction(200, 100).unwrap_or_default();
        assert!(instruction.contains("(x: 100, y: 50)"));
        assert!(instruction.contains("remove the sign"));
        assert!(instruction.ends_with("Return only the final image, no text."));
    }

    #[test]
    fn validation_rejects_blank_prompts_and_out_of_bounds_geometry() {
        let blank = EditOperation::Filter {
            prompt: "   ".to_string(),
        };
        assert!(blank.validate(10, 10).is_err());

        let outside = EditOperation::Retouch {
            prompt: "x".to_string(),
            hotspot: Some(Hotspot { x: 10, y: 3 }),
        };
        assert!(outside.validate(10, 10).is_err());

        assert!(EditOperation::Crop {
            region: region(5, 5, 6, 2)
        }
        .validate(10, 10)
        .is_err());
        assert!(EditOperation::MagicFill {
            region: region(0, 0, 0, 4)
        }
        .validate(10, 10)
        .is_err());
        assert!(EditOperation::Crop {
            region: region(0, 0, 10, 10)
        }
        .validate(10, 10)
        .is_ok());
    }

    #[test]
    fn upscale_factor_range() {
        assert!(EditOperation::Upscale { factor: 1 }.validate(8, 8).is_err());
        assert!(EditOperation::Upscale { factor: 2 }.validate(8, 8).is_ok());
        assert!(EditOperation::Upscale { factor: 4 }.validate(8, 8).is_ok());
        assert!(EditOperation::Upscale { factor: 5 }.validate(8, 8).is_err());
    }

    #[test]
    fn prompt_entries_use_synthesized_labels() {
        let fill = EditOperation::MagicFill {
            region: region(1, 2, 3, 4),
        };
        assert_eq!(
            fill.prompt_entry(),
            Some((
                PromptKind::MagicFill,
                "Fill region: x:1, y:2, w:3, h:4".to_string()
            ))
        );
        assert_eq!(
            EditOperation::Upscale { factor: 2 }.prompt_entry(),
            Some((PromptKind::Upscale, "Upscale by 2x".to_string()))
        );
        assert_eq!(
            EditOperation::Crop {
                region: region(0, 0, 1, 1)
            }
            .prompt_entry(),
            None
        );
    }

    #[test]
    fn starring_and_locality() {
        let retouch = EditOperation::Retouch {
            prompt: "a".to_string(),
            hotspot: None,
        };
        assert!(!retouch.stars_on_success());
        assert!(EditOperation::Upscale { factor: 2 }.stars_on_success());
        let crop = EditOperation::Crop {
            region: region(0, 0, 1, 1),
        };
        assert!(crop.is_local());
        assert_eq!(crop.kind(), EditKind::Crop);
        assert_eq!(crop.instruction(4, 4), None);
    }

    #[test]
    fn prompts_carry_operation_details() {
        let fill = EditOperation::MagicFill {
            region: region(7, 8, 9, 10),
        }
        .instruction(100, 100)
        .unwrap_or_default();
        assert!(fill.contains("x: 7, y: 8, width: 9, height: 10"));

        let upscale = EditOperation::Upscale { factor: 3 }
            .instruction(100, 100)
            .unwrap_or_default();
        assert!(upscale.contains("exactly 3x"));
    }
}
