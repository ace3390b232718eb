mod compare;
mod timeline;
mod workspace;

pub use compare::{resolve_comparison, CompareMode, CompareTarget, Comparison};
pub use timeline::EditHistory;
pub use workspace::{EditorTool, Workspace};
