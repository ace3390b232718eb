use std::collections::BTreeMap;

use anyhow::Result;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::operations::EditOperation;
use crate::snapshot::Snapshot;

mod dryrun;
mod gemini;

pub use dryrun::DryrunProvider;
pub use gemini::GeminiProvider;

#[derive(Debug, Clone)]
pub struct EditRequest {
    pub source: Snapshot,
    pub operation: EditOperation,
    /// Full instruction text built from the operation.
    pub instruction: String,
    pub model: String,
    pub provider_options: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct EditResponse {
    pub image_bytes: Vec<u8>,
    pub mime_type: Option<String>,
    pub provider_request: Map<String, Value>,
    pub provider_response: Map<String, Value>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DescribeRequest {
    pub source: Snapshot,
    pub model: String,
    pub provider_options: Map<String, Value>,
}

/// The model answered, but not with an image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderRejection {
    #[error("request was blocked ({reason}){}", suffix(.message))]
    Blocked { reason: String, message: String },
    #[error("image generation stopped unexpectedly (finish reason: {finish_reason})")]
    Stopped { finish_reason: String },
    #[error("the model did not return an image{}", suffix(.text))]
    NoImage { text: String },
}

fn suffix(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

pub trait EditProvider: Send + Sync {
    fn name(&self) -> &str;
    fn edit(&self, request: &EditRequest) -> Result<EditResponse>;
    fn describe(&self, request: &DescribeRequest) -> Result<String>;
}

#[derive(Default)]
pub struct EditProviderRegistry {
    providers: BTreeMap<String, Box<dyn EditProvider>>,
}

impl EditProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: EditProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Box::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<&dyn EditProvider> {
        self.providers.get(name).map(|provider| provider.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

pub fn default_provider_registry() -> EditProviderRegistry {
    let mut providers = EditProviderRegistry::new();
    providers.register(DryrunProvider);
    providers.register(GeminiProvider::new());
    providers
}

pub(crate) fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

pub(crate) fn value_as_f64(value: Option<&Value>, default: f64, min: f64, max: f64) -> f64 {
    let parsed = value.and_then(|row| match row {
        Value::Number(num) => num.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    });
    parsed
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}

pub(crate) fn push_unique_warning(warnings: &mut Vec<String>, message: String) {
    if message.trim().is_empty() {
        return;
    }
    if warnings.iter().any(|existing| existing == &message) {
        return;
    }
    warnings.push(message);
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
