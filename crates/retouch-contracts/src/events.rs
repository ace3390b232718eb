use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Session event log, one compact JSON object per line in `events.jsonl`.
///
/// Every event carries `type`, `session_id`, `seq` and `ts`; payload keys are
/// merged on top. `seq` is strictly increasing across all clones of a writer
/// and across writers reopening the same file: the first emit resumes after
/// the last `seq` already in the log. The file is opened then and kept open.
#[derive(Debug, Clone)]
pub struct EventWriter {
    shared: Arc<SessionLog>,
}

#[derive(Debug)]
struct SessionLog {
    path: PathBuf,
    session_id: String,
    sink: Mutex<LogSink>,
}

#[derive(Debug, Default)]
struct LogSink {
    file: Option<File>,
    next_seq: u64,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(SessionLog {
                path: path.into(),
                session_id: session_id.into(),
                sink: Mutex::new(LogSink::default()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut sink = self
            .shared
            .sink
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;

        if sink.file.is_none() {
            sink.next_seq = resume_seq(&self.shared.path)?;
            sink.file = Some(self.open_log()?);
        }

        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "session_id".to_string(),
            Value::String(self.shared.session_id.clone()),
        );
        event.insert("seq".to_string(), Value::from(sink.next_seq));
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        event.extend(payload);
        let line = serde_json::to_string(&event)?;

        if let Some(file) = sink.file.as_mut() {
            writeln!(file, "{line}")
                .with_context(|| format!("failed appending to {}", self.shared.path.display()))?;
        }
        sink.next_seq += 1;
        Ok(Value::Object(event))
    }

    fn open_log(&self) -> anyhow::Result<File> {
        if let Some(parent) = self.shared.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.shared.path)
            .with_context(|| format!("failed opening {}", self.shared.path.display()))
    }
}

/// Reads an event log back. Blank lines are skipped; malformed lines are errors.
pub fn read_events(path: &Path) -> anyhow::Result<Vec<EventPayload>> {
    let file = File::open(path).with_context(|| format!("failed opening {}", path.display()))?;
    let mut events = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: EventPayload = serde_json::from_str(&line)
            .with_context(|| format!("{} line {} is not a JSON object", path.display(), idx + 1))?;
        events.push(event);
    }
    Ok(events)
}

/// Next `seq` for a log that may already hold events from an earlier writer.
fn resume_seq(path: &Path) -> anyhow::Result<u64> {
    if !path.exists() {
        return Ok(0);
    }
    let file = File::open(path).with_context(|| format!("failed opening {}", path.display()))?;
    let mut next = 0u64;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let seq = serde_json::from_str::<EventPayload>(&line)
            .ok()
            .and_then(|event| event.get("seq").and_then(Value::as_u64));
        next = match seq {
            Some(seq) => next.max(seq.saturating_add(1)),
            None => next.saturating_add(1),
        };
    }
    Ok(next)
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
