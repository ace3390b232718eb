use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

/// What was asked of the provider for a single edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditRequestRecord {
    /// `retouch`, `filter`, `adjustment`, `magic_fill`, `upscale` or `crop`.
    pub operation: String,
    /// Prompt-log text for the edit (user prompt or synthesized label).
    pub label: String,
    /// Full instruction text sent to the model; empty for local operations.
    #[serde(default)]
    pub instruction: String,
    pub provider: String,
    pub model: Option<String>,
    pub source_snapshot_id: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

pub fn build_receipt(
    request: &EditRequestRecord,
    provider_request: &Map<String, Value>,
    provider_response: &Map<String, Value>,
    warnings: &[String],
    snapshot_path: &Path,
    receipt_path: &Path,
    result_metadata: &Map<String, Value>,
) -> Value {
    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(RECEIPT_SCHEMA_VERSION.into()),
    );
    root.insert(
        "request".to_string(),
        sanitize_payload(&serde_json::to_value(request).unwrap_or(Value::Null)),
    );
    root.insert(
        "provider_request".to_string(),
        sanitize_payload(&Value::Object(provider_request.clone())),
    );
    root.insert(
        "provider_response".to_string(),
        sanitize_payload(&Value::Object(provider_response.clone())),
    );
    root.insert(
        "warnings".to_string(),
        Value::Array(warnings.iter().cloned().map(Value::String).collect()),
    );

    let mut artifacts = Map::new();
    artifacts.insert(
        "snapshot_path".to_string(),
        Value::String(snapshot_path.to_string_lossy().to_string()),
    );
    artifacts.insert(
        "receipt_path".to_string(),
        Value::String(receipt_path.to_string_lossy().to_string()),
    );
    root.insert("artifacts".to_string(), Value::Object(artifacts));
    root.insert(
        "result_metadata".to_string(),
        sanitize_payload(&Value::Object(result_metadata.clone())),
    );
    Value::Object(root)
}

pub fn write_receipt(path: &Path, payload: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)?;
    Ok(())
}

/// Replaces inline image payloads with a placeholder so receipts stay small.
fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(
                    lowered.as_str(),
                    "b64_json" | "image" | "image_bytes" | "data"
                ) {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{build_receipt, write_receipt, EditRequestRecord, RECEIPT_SCHEMA_VERSION};

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn receipt_builder_writes_expected_shape() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let receipt_path = temp.path().join("receipt-1.json");
        let snapshot_path = temp.path().join("snapshot.png");
        std::fs::write(&snapshot_path, b"png")?;

        let request = EditRequestRecord {
            operation: "filter".to_string(),
            label: "warm film look".to_string(),
            instruction: "Apply a stylistic filter".to_string(),
            provider: "dryrun".to_string(),
            model: Some("dryrun-edit-1".to_string()),
            source_snapshot_id: "00-abc".to_string(),
            parameters: obj(json!({"prompt": "warm film look"})),
        };
        let provider_request = obj(json!({
            "endpoint": "dryrun-native",
            "payload": {"contents": [{"parts": [{"inlineData": {"mimeType": "image/png", "data": "AAAA"}}]}]}
        }));
        let provider_response = obj(json!({"status": "ok"}));
        let result_metadata = obj(json!({"latency_s": 0.25}));

        let payload = build_receipt(
            &request,
            &provider_request,
            &provider_response,
            &["note".to_string()],
            &snapshot_path,
            &receipt_path,
            &result_metadata,
        );
        write_receipt(&receipt_path, &payload)?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&receipt_path)?)?;
        assert_eq!(parsed["schema_version"], json!(RECEIPT_SCHEMA_VERSION));
        assert_eq!(parsed["request"]["operation"], json!("filter"));
        assert_eq!(parsed["warnings"], json!(["note"]));
        assert_eq!(
            parsed["artifacts"]["snapshot_path"],
            json!(snapshot_path.to_string_lossy())
        );
        assert_eq!(parsed["result_metadata"]["latency_s"], json!(0.25));
        assert_eq!(
            parsed["provider_request"]["payload"]["contents"][0]["parts"][0]["inlineData"]["data"],
            json!("<omitted>")
        );
        Ok(())
    }
}
