use serde::{Deserialize, Serialize};

use super::EditHistory;

/// How the comparison baseline is presented next to the current image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareMode {
    #[default]
    Slider,
    Flicker,
    Off,
}

impl CompareMode {
    /// `slider -> flicker -> off -> slider`
    pub fn next(self) -> Self {
        match self {
            Self::Slider => Self::Flicker,
            Self::Flicker => Self::Off,
            Self::Off => Self::Slider,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Slider => "slider",
            Self::Flicker => "flicker",
            Self::Off => "off",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareTarget {
    #[default]
    Previous,
    Original,
}

impl CompareTarget {
    pub fn toggled(self) -> Self {
        match self {
            Self::Previous => Self::Original,
            Self::Original => Self::Previous,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Previous => "previous",
            Self::Original => "original",
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct Comparison<'a, T> {
    pub baseline: Option<&'a T>,
    pub mode: CompareMode,
}

/// Picks the snapshot the current image is compared against.
///
/// There is no baseline until at least one edit sits behind the cursor, whatever
/// the mode. With `Original` selected at cursor 0 the baseline would equal the
/// current image, which the `can_undo` gate already excludes.
pub fn resolve_comparison<'a, T>(
    history: &'a EditHistory<T>,
    target: CompareTarget,
    mode: CompareMode,
) -> Comparison<'a, T> {
    if !history.can_undo() {
        return Comparison {
            baseline: None,
            mode,
        };
    }
    let baseline = match target {
        CompareTarget::Previous => history.previous(),
        CompareTarget::Original => history.original(),
    };
    Comparison { baseline, mode }
}
