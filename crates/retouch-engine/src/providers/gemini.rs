use std::env;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::{
    map_object, push_unique_warning, truncate_text, value_as_f64, DescribeRequest, EditProvider,
    EditRequest, EditResponse, ProviderRejection,
};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

const DESCRIBE_INSTRUCTION: &str = "You are an expert image analyst. Describe this image in rich detail: \
the subject, setting, composition, lighting, colors and overall mood. \
Respond with a single descriptive paragraph.";

pub struct GeminiProvider {
    api_base: String,
    http: HttpClient,
}

impl Default for GeminiProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl GeminiProvider {
    pub fn new() -> Self {
        Self {
            api_base: env::var("GEMINI_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            http: HttpClient::new(),
        }
    }

    fn api_key() -> Option<String> {
        non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn request_timeout_seconds(options: &Map<String, Value>) -> f64 {
        value_as_f64(options.get("request_timeout"), 90.0, 15.0, 300.0)
    }

    fn transport_retry_count(options: &Map<String, Value>) -> usize {
        value_as_f64(options.get("transport_retries"), 2.0, 0.0, 4.0).round() as usize
    }

    fn retry_backoff_seconds(options: &Map<String, Value>) -> f64 {
        value_as_f64(options.get("retry_backoff"), 1.2, 0.1, 10.0)
    }

    #[allow(clippy::too_many_arguments)]
    fn post_with_transport_retries(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
        timeout_s: f64,
        max_retries: usize,
        retry_backoff_s: f64,
        warnings: &mut Vec<String>,
    ) -> Result<HttpResponse> {
        let mut attempt = 0;
        loop {
            let response = self
                .http
                .post(endpoint)
                .query(&[("key", api_key)])
                .timeout(Duration::from_secs_f64(timeout_s))
                .json(payload)
                .send();

            match response {
                Ok(ok) => return Ok(ok),
                Err(raw) => {
                    let err = anyhow::Error::new(raw)
                        .context(format!("Gemini request failed ({endpoint})"));
                    if !is_retryable_transport_error(&err) || attempt >= max_retries {
                        return Err(err);
                    }
                    warn!(attempt = attempt + 1, max_retries, "retrying Gemini request");
                    push_unique_warning(
                        warnings,
                        format!(
                            "Gemini transport retry {}/{} after transient request failure.",
                            attempt + 1,
                            max_retries
                        ),
                    );
                    let delay_s = retry_backoff_s * (attempt as f64 + 1.0);
                    thread::sleep(Duration::from_secs_f64(delay_s));
                    attempt += 1;
                }
            }
        }
    }

    fn send(
        &self,
        model: &str,
        payload: &Value,
        options: &Map<String, Value>,
        warnings: &mut Vec<String>,
    ) -> Result<(String, Value)> {
        let Some(api_key) = Self::api_key() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let endpoint = self.endpoint_for_model(model);
        debug!(%endpoint, "sending Gemini request");
        let response = self.post_with_transport_retries(
            &endpoint,
            &api_key,
            payload,
            Self::request_timeout_seconds(options),
            Self::transport_retry_count(options),
            Self::retry_backoff_seconds(options),
            warnings,
        )?;
        Ok((endpoint, response_json_or_error("Gemini", response)?))
    }
}

impl EditProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn edit(&self, request: &EditRequest) -> Result<EditResponse> {
        let payload = build_edit_payload(request.source.inline_part()?, &request.instruction);
        let mut warnings = Vec::new();
        let (endpoint, response_payload) = self.send(
            &request.model,
            &payload,
            &request.provider_options,
            &mut warnings,
        )?;
        let (image_bytes, mime_type) = parse_edit_response(&response_payload)?;

        Ok(EditResponse {
            image_bytes,
            mime_type,
            provider_request: map_object(json!({
                "endpoint": endpoint,
                "payload": payload,
            })),
            provider_response: map_object(json!({
                "candidates": response_payload
                    .get("candidates")
                    .and_then(Value::as_array)
                    .map(|rows| rows.len())
                    .unwrap_or(0),
                "usage_metadata": response_payload.get("usageMetadata").cloned().unwrap_or(Value::Null),
            })),
            warnings,
        })
    }

    fn describe(&self, request: &DescribeRequest) -> Result<String> {
        let payload = build_describe_payload(request.source.inline_part()?);
        let mut warnings = Vec::new();
        let (_, response_payload) = self.send(
            &request.model,
            &payload,
            &request.provider_options,
            &mut warnings,
        )?;
        let text = collect_text_parts(&response_payload);
        if text.is_empty() {
            bail!("Gemini returned an empty description");
        }
        Ok(text)
    }
}

/// Image part first, then the instruction; the edit model is asked for image output only.
fn build_edit_payload(image_part: Value, instruction: &str) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [image_part, {"text": instruction}],
        }],
        "generationConfig": {
            "responseModalities": ["IMAGE"],
        },
    })
}

fn build_describe_payload(image_part: Value) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [image_part, {"text": DESCRIBE_INSTRUCTION}],
        }],
    })
}

/// Checks block feedback, then image parts, then the finish reason.
fn parse_edit_response(response: &Value) -> Result<(Vec<u8>, Option<String>)> {
    if let Some(reason) = response
        .get("promptFeedback")
        .and_then(|feedback| feedback.get("blockReason"))
        .and_then(Value::as_str)
    {
        let message = response
            .get("promptFeedback")
            .and_then(|feedback| feedback.get("blockReasonMessage"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(ProviderRejection::Blocked {
            reason: reason.to_string(),
            message: message.to_string(),
        }
        .into());
    }

    for part in candidate_parts(response) {
        let Some(inline) = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)
        else {
            continue;
        };
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let bytes = BASE64
            .decode(data.as_bytes())
            .context("Gemini image base64 decode failed")?;
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .map(str::to_string);
        return Ok((bytes, mime_type));
    }

    if let Some(finish_reason) = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(|candidate| candidate.get("finishReason"))
        .and_then(Value::as_str)
    {
        if finish_reason != "STOP" {
            return Err(ProviderRejection::Stopped {
                finish_reason: finish_reason.to_string(),
            }
            .into());
        }
    }

    Err(ProviderRejection::NoImage {
        text: collect_text_parts(response),
    }
    .into())
}

fn candidate_parts(response: &Value) -> Vec<&Value> {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|candidate| {
            candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
        })
        .flatten()
        .collect()
}

fn collect_text_parts(response: &Value) -> String {
    candidate_parts(response)
        .into_iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("")
        .trim()
        .to_string()
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn is_retryable_transport_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|reqwest_err| {
                reqwest_err.is_timeout() || reqwest_err.is_connect() || reqwest_err.is_request()
            })
            .unwrap_or(false)
    })
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use base64::Engine as _;
    use serde_json::{json, Map};

    use super::{
        build_edit_payload, collect_text_parts, parse_edit_response, GeminiProvider, BASE64,
    };
    use crate::providers::ProviderRejection;

    fn rejection(response: serde_json::Value) -> Option<ProviderRejection> {
        parse_edit_response(&response)
            .err()
            .and_then(|err| err.downcast_ref::<ProviderRejection>().cloned())
    }

    #[test]
    fn edit_payload_puts_image_before_text_and_requests_image_output() {
        let part = json!({"inlineData": {"mimeType": "image/png", "data": "AAAA"}});
        let payload = build_edit_payload(part.clone(), "make it warmer");
        let parts = &payload["contents"][0]["parts"];
        assert_eq!(parts[0], part);
        assert_eq!(parts[1]["text"], "make it warmer");
        assert_eq!(
            payload["generationConfig"]["responseModalities"],
            json!(["IMAGE"])
        );
        assert!(payload.get("safetySettings").is_none());
    }

    #[test]
    fn parse_returns_first_inline_image() -> anyhow::Result<()> {
        let data = BASE64.encode(b"png-bytes");
        let response = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "here you go"},
                    {"inlineData": {"mimeType": "image/png", "data": data}},
                ]},
                "finishReason": "STOP",
            }]
        });
        let (bytes, mime) = parse_edit_response(&response)?;
        assert_eq!(bytes, b"png-bytes");
        assert_eq!(mime.as_deref(), Some("image/png"));
        Ok(())
    }

    #[test]
    fn block_reason_wins_over_everything() {
        let response = json!({
            "promptFeedback": {"blockReason": "SAFETY", "blockReasonMessage": "blocked"},
            "candidates": [{"content": {"parts": [{"inlineData": {"data": "AAAA"}}]}}],
        });
        assert_eq!(
            rejection(response),
            Some(ProviderRejection::Blocked {
                reason: "SAFETY".to_string(),
                message: "blocked".to_string(),
            })
        );
    }

    #[test]
    fn unexpected_finish_reason_is_reported() {
        let response = json!({
            "candidates": [{"content": {"parts": []}, "finishReason": "IMAGE_SAFETY"}]
        });
        assert_eq!(
            rejection(response),
            Some(ProviderRejection::Stopped {
                finish_reason: "IMAGE_SAFETY".to_string()
            })
        );
    }

    #[test]
    fn text_only_answer_becomes_no_image() {
        let response = json!({
            "candidates": [{
                "content": {"parts": [{"text": "I can only describe this image."}]},
                "finishReason": "STOP",
            }]
        });
        assert_eq!(
            rejection(response),
            Some(ProviderRejection::NoImage {
                text: "I can only describe this image.".to_string()
            })
        );
        assert_eq!(
            rejection(json!({})),
            Some(ProviderRejection::NoImage {
                text: String::new()
            })
        );
    }

    #[test]
    fn text_parts_are_joined_and_trimmed() {
        let response = json!({
            "candidates": [{"content": {"parts": [{"text": " A quiet "}, {"text": "harbor. "}]}}]
        });
        assert_eq!(collect_text_parts(&response), "A quiet harbor.");
    }

    #[test]
    fn retry_options_are_clamped() {
        let mut options = Map::new();
        options.insert("transport_retries".to_string(), json!(9));
        options.insert("request_timeout".to_string(), json!("1"));
        assert_eq!(GeminiProvider::transport_retry_count(&options), 4);
        assert_eq!(GeminiProvider::request_timeout_seconds(&options), 15.0);
        assert_eq!(GeminiProvider::retry_backoff_seconds(&options), 1.2);
    }

    #[test]
    fn nan_options_still_yield_valid_durations() {
        let mut options = Map::new();
        options.insert("request_timeout".to_string(), json!("nan"));
        options.insert("retry_backoff".to_string(), json!("NaN"));
        let timeout = GeminiProvider::request_timeout_seconds(&options);
        let backoff = GeminiProvider::retry_backoff_seconds(&options);
        assert_eq!(timeout, 90.0);
        assert_eq!(backoff, 1.2);
        assert_eq!(Duration::from_secs_f64(timeout), Duration::from_secs(90));
    }

    #[test]
    fn endpoint_accepts_prefixed_model_names() {
        let provider = GeminiProvider {
            api_base: "https://example.test/v1beta".to_string(),
            http: reqwest::blocking::Client::new(),
        };
        assert_eq!(
            provider.endpoint_for_model("models/gemini-2.5-flash-image"),
            "https://example.test/v1beta/models/gemini-2.5-flash-image:generateContent"
        );
        assert_eq!(
            provider.endpoint_for_model("gemini-2.5-flash"),
            "https://example.test/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }
}
