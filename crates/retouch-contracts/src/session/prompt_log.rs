use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptKind {
    #[serde(rename = "Initial Description")]
    InitialDescription,
    Retouch,
    Filter,
    Adjustment,
    #[serde(rename = "Magic Fill")]
    MagicFill,
    Upscale,
    #[serde(rename = "Final Description")]
    FinalDescription,
}

impl PromptKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::InitialDescription => "Initial Description",
            Self::Retouch => "Retouch",
            Self::Filter => "Filter",
            Self::Adjustment => "Adjustment",
            Self::MagicFill => "Magic Fill",
            Self::Upscale => "Upscale",
            Self::FinalDescription => "Final Description",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptEntry {
    pub id: String,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: PromptKind,
    pub content: String,
    #[serde(rename = "isStarred", default)]
    pub is_starred: bool,
}

/// Append-only log of prompts and descriptions, persisted as `prompts.json`.
///
/// Independent of the image history: resetting or replacing the image leaves
/// the log alone. Every mutation is written through to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptLog {
    path: PathBuf,
    entries: Vec<PromptEntry>,
}

impl PromptLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Vec::new(),
        }
    }

    /// Unreadable or malformed files yield an empty log; malformed rows are skipped.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let mut log = Self::new(path);
        let Some(payload) = read_json(&log.path) else {
            return log;
        };
        let rows = match &payload {
            Value::Array(rows) => rows.as_slice(),
            Value::Object(obj) => obj
                .get("entries")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[]),
            _ => &[],
        };
        for row in rows {
            if let Ok(entry) = serde_json::from_value::<PromptEntry>(row.clone()) {
                log.entries.push(entry);
            }
        }
        log
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[PromptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest first.
    pub fn recent(&self) -> impl Iterator<Item = &PromptEntry> {
        self.entries.iter().rev()
    }

    pub fn add(&mut self, kind: PromptKind, content: &str) -> anyhow::Result<PromptEntry> {
        let timestamp = Utc::now().timestamp_millis();
        let entry = PromptEntry {
            id: format!("entry-{timestamp}-{}", Uuid::new_v4().simple()),
            timestamp,
            kind,
            content: content.to_string(),
            is_starred: false,
        };
        self.entries.push(entry.clone());
        self.save()?;
        Ok(entry)
    }

    /// Stars every entry whose content equals `content`. Returns how many changed.
    pub fn star_matching(&mut self, content: &str) -> anyhow::Result<usize> {
        let mut changed = 0;
        for entry in self
            .entries
            .iter_mut()
            .filter(|entry| entry.content == content && !entry.is_starred)
        {
            entry.is_starred = true;
            changed += 1;
        }
        if changed > 0 {
            self.save()?;
        }
        Ok(changed)
    }

    pub fn clear(&mut self) -> anyhow::Result<()> {
        self.entries.clear();
        self.save()
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let mut payload = Map::new();
        payload.insert("schema_version".to_string(), Value::Number(1.into()));
        payload.insert(
            "entries".to_string(),
            Value::Array(
                self.entries
                    .iter()
                    .map(|entry| serde_json::to_value(entry).unwrap_or(Value::Null))
                    .collect(),
            ),
        );
        write_json(&self.path, Value::Object(payload))
    }
}

fn read_json(path: &Path) -> Option<Value> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

fn write_json(path: &Path, payload: Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&payload)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{PromptKind, PromptLog};

    #[test]
    fn add_persists_and_reloads() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("prompts.json");
        let mut log = PromptLog::new(&path);
        log.add(PromptKind::InitialDescription, "a harbor at dusk")?;
        log.add(PromptKind::Filter, "warm film look")?;

        let loaded = PromptLog::load(&path);
        assert_eq!(loaded.path(), path.as_path());
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.entries()[0].kind, PromptKind::InitialDescription);
        assert_eq!(loaded.entries()[1].content, "warm film look");
        assert!(!loaded.entries()[1].is_starred);
        Ok(())
    }

    #[test]
    fn entries_serialize_with_display_labels() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("prompts.json");
        let mut log = PromptLog::new(&path);
        log.add(PromptKind::MagicFill, "Fill region: x:1, y:2, w:3, h:4")?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(parsed["entries"][0]["type"], json!("Magic Fill"));
        assert_eq!(parsed["entries"][0]["isStarred"], json!(false));
        assert!(parsed["entries"][0]["id"]
            .as_str()
            .unwrap_or("")
            .starts_with("entry-"));
        Ok(())
    }

    #[test]
    fn star_matching_marks_every_equal_entry() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut log = PromptLog::new(temp.path().join("prompts.json"));
        log.add(PromptKind::Filter, "noir")?;
        log.add(PromptKind::Adjustment, "brighter")?;
        log.add(PromptKind::Filter, "noir")?;

        assert_eq!(log.star_matching("noir")?, 2);
        assert_eq!(log.star_matching("noir")?, 0);
        let starred: Vec<bool> = log.entries().iter().map(|entry| entry.is_starred).collect();
        assert_eq!(starred, vec![true, false, true]);
        Ok(())
    }

    #[test]
    fn recent_is_newest_first() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut log = PromptLog::new(temp.path().join("prompts.json"));
        log.add(PromptKind::Retouch, "one")?;
        log.add(PromptKind::Retouch, "two")?;
        let contents: Vec<&str> = log.recent().map(|entry| entry.content.as_str()).collect();
        assert_eq!(contents, vec!["two", "one"]);
        Ok(())
    }

    #[test]
    fn load_tolerates_missing_and_corrupt_files() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let missing = PromptLog::load(temp.path().join("missing.json"));
        assert!(missing.is_empty());

        let corrupt = temp.path().join("corrupt.json");
        std::fs::write(&corrupt, "{not json")?;
        assert!(PromptLog::load(&corrupt).is_empty());

        let mixed = temp.path().join("mixed.json");
        std::fs::write(
            &mixed,
            serde_json::to_string(&json!([
                {"id": "entry-1", "timestamp": 1, "type": "Upscale", "content": "Upscale by 2x", "isStarred": true},
                {"id": "entry-2", "type": "Bogus"}
            ]))?,
        )?;
        let loaded = PromptLog::load(&mixed);
        assert_eq!(loaded.len(), 1);
        assert!(loaded.entries()[0].is_starred);
        Ok(())
    }

    #[test]
    fn clear_empties_log_on_disk() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("prompts.json");
        let mut log = PromptLog::new(&path);
        log.add(PromptKind::Retouch, "remove the lamp post")?;
        log.clear()?;
        assert!(PromptLog::load(&path).is_empty());
        Ok(())
    }
}
