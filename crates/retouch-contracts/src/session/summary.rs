use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub total_snapshots: u64,
    pub cursor: Option<u64>,
    pub current_snapshot: Option<String>,
    pub original_snapshot: Option<String>,
    pub prompt_entries: u64,
}

pub fn write_summary(
    path: &Path,
    summary: &SessionSummary,
    extra: Option<&Map<String, Value>>,
) -> anyhow::Result<()> {
    let mut payload = match serde_json::to_value(summary)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    payload.insert("ts".to_string(), Value::String(now_utc_iso()));
    if let Some(extra) = extra {
        for (key, value) in extra {
            payload.insert(key.clone(), value.clone());
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)?;
    Ok(())
}

/// Reads back a summary written by [`write_summary`]; extra keys are ignored.
pub fn read_summary(path: &Path) -> anyhow::Result<SessionSummary> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{read_summary, write_summary, SessionSummary};

    fn summary() -> SessionSummary {
        SessionSummary {
            session_id: "session-123".to_string(),
            started_at: "2026-02-19T00:00:00+00:00".to_string(),
            finished_at: "2026-02-19T00:10:00+00:00".to_string(),
            total_snapshots: 3,
            cursor: Some(1),
            current_snapshot: Some("/tmp/s/snapshots/01-abc.png".to_string()),
            original_snapshot: Some("/tmp/s/snapshots/00-def.png".to_string()),
            prompt_entries: 4,
        }
    }

    #[test]
    fn write_summary_generates_expected_payload() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("summary.json");
        let mut extra = Map::new();
        extra.insert("compare_mode".to_string(), json!("slider"));
        write_summary(&path, &summary(), Some(&extra))?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(parsed["session_id"], json!("session-123"));
        assert_eq!(parsed["total_snapshots"], json!(3));
        assert_eq!(parsed["cursor"], json!(1));
        assert_eq!(parsed["compare_mode"], json!("slider"));
        assert!(parsed.get("ts").and_then(Value::as_str).is_some());
        Ok(())
    }

    #[test]
    fn read_summary_round_trips_core_fields() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("summary.json");
        write_summary(&path, &summary(), None)?;
        assert_eq!(read_summary(&path)?, summary());
        Ok(())
    }
}
