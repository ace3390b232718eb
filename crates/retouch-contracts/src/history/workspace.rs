use serde::{Deserialize, Serialize};

use super::{resolve_comparison, CompareMode, CompareTarget, Comparison, EditHistory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditorTool {
    #[default]
    Retouch,
    MagicFill,
    Adjust,
    Filters,
    Crop,
    Upscale,
}

impl EditorTool {
    pub const ALL: [EditorTool; 6] = [
        EditorTool::Retouch,
        EditorTool::MagicFill,
        EditorTool::Adjust,
        EditorTool::Filters,
        EditorTool::Crop,
        EditorTool::Upscale,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Retouch => "retouch",
            Self::MagicFill => "magic_fill",
            Self::Adjust => "adjust",
            Self::Filters => "filters",
            Self::Crop => "crop",
            Self::Upscale => "upscale",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "fill" | "magicfill" => Some(Self::MagicFill),
            "adjustment" => Some(Self::Adjust),
            "filter" => Some(Self::Filters),
            other => Self::ALL.into_iter().find(|tool| tool.as_str() == other),
        }
    }
}

/// Editor state owned by one session: the snapshot history plus the view state
/// layered over it (active tool, compare mode, compare target).
#[derive(Debug, Clone)]
pub struct Workspace<T> {
    history: EditHistory<T>,
    tool: EditorTool,
    compare_mode: CompareMode,
    compare_target: CompareTarget,
}

impl<T> Default for Workspace<T> {
    fn default() -> Self {
        Self {
            history: EditHistory::new(),
            tool: EditorTool::default(),
            compare_mode: CompareMode::default(),
            compare_target: CompareTarget::default(),
        }
    }
}

impl<T> Workspace<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> &EditHistory<T> {
        &self.history
    }

    pub fn initialize(&mut self, snapshot: T) {
        self.history.initialize(snapshot);
        self.tool = EditorTool::Retouch;
    }

    /// Records a completed edit and puts the retouch tool back in front.
    pub fn append(&mut self, snapshot: T) {
        self.history.append(snapshot);
        self.tool = EditorTool::Retouch;
    }

    pub fn undo(&mut self) -> bool {
        self.history.undo()
    }

    pub fn redo(&mut self) -> bool {
        self.history.redo()
    }

    pub fn reset(&mut self) {
        self.history.reset();
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    pub fn current(&self) -> Option<&T> {
        self.history.current()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn tool(&self) -> EditorTool {
        self.tool
    }

    pub fn set_tool(&mut self, tool: EditorTool) {
        self.tool = tool;
    }

    pub fn compare_mode(&self) -> CompareMode {
        self.compare_mode
    }

    pub fn compare_target(&self) -> CompareTarget {
        self.compare_target
    }

    pub fn cycle_compare_mode(&mut self) -> CompareMode {
        self.compare_mode = self.compare_mode.next();
        self.compare_mode
    }

    pub fn toggle_compare_target(&mut self) -> CompareTarget {
        self.compare_target = self.compare_target.toggled();
        self.compare_target
    }

    pub fn comparison(&self) -> Comparison<'_, T> {
        resolve_comparison(&self.history, self.compare_target, self.compare_mode)
    }
}
