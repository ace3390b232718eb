use std::collections::BTreeMap;

use serde_json::{json, Value};

use super::command_registry::{
    CommandSpec, DEFAULT_UPSCALE_FACTOR, EXPORT_COMMAND, NO_ARG_COMMANDS, PROMPT_COMMANDS,
    RAW_ARG_COMMANDS, REGION_COMMANDS, RETOUCH_COMMAND, SINGLE_PATH_COMMANDS, UPSCALE_COMMAND,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }

    fn invalid(raw: &str, error: String) -> Self {
        let mut intent = Self::new("invalid", raw);
        intent
            .command_args
            .insert("error".to_string(), Value::String(error));
        intent
    }

    fn with_prompt(action: &str, raw: &str, prompt: &str) -> Self {
        let mut intent = Self::new(action, raw);
        intent.prompt = Some(prompt.to_string());
        intent
            .command_args
            .insert("prompt".to_string(), Value::String(prompt.to_string()));
        intent
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    let parts = parse_path_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

/// Four non-negative integers, separated by whitespace and/or commas.
fn parse_region_arg(arg: &str) -> Result<Value, String> {
    let parts: Vec<&str> = arg
        .split(|ch: char| ch.is_whitespace() || ch == ',')
        .filter(|part| !part.is_empty())
        .collect();
    if parts.len() != 4 {
        return Err("expected four values: x y width height".to_string());
    }
    let mut values = [0u64; 4];
    for (slot, part) in values.iter_mut().zip(parts) {
        *slot = part
            .parse::<u64>()
            .map_err(|_| format!("'{part}' is not a non-negative integer"))?;
    }
    Ok(json!({
        "x": values[0],
        "y": values[1],
        "width": values[2],
        "height": values[3],
    }))
}

fn parse_retouch_arg(raw: &str, arg: &str) -> Intent {
    let mut tokens = arg.splitn(3, char::is_whitespace);
    let first = tokens.next().unwrap_or("");
    let second = tokens.next().unwrap_or("");
    let rest = tokens.next().unwrap_or("").trim();

    if let (Ok(x), Ok(y)) = (first.parse::<u64>(), second.parse::<u64>()) {
        if rest.is_empty() {
            return Intent::invalid(raw, "/retouch requires a prompt".to_string());
        }
        let mut intent = Intent::with_prompt(RETOUCH_COMMAND.action, raw, rest);
        intent
            .command_args
            .insert("hotspot".to_string(), json!({"x": x, "y": y}));
        return intent;
    }

    if arg.is_empty() {
        return Intent::invalid(raw, "/retouch requires a prompt".to_string());
    }
    Intent::with_prompt(RETOUCH_COMMAND.action, raw, arg)
}

fn parse_export_arg(raw: &str, arg: &str) -> Intent {
    let mut intent = Intent::new(EXPORT_COMMAND.action, raw);
    for token in parse_path_args(arg) {
        let lowered = token.to_ascii_lowercase();
        if matches!(lowered.as_str(), "png" | "jpeg" | "jpg") {
            let format = if lowered == "png" { "png" } else { "jpeg" };
            intent
                .command_args
                .insert("format".to_string(), Value::String(format.to_string()));
            continue;
        }
        let Some((key, value)) = token.split_once('=') else {
            return Intent::invalid(raw, format!("unrecognized export option '{token}'"));
        };
        match key.to_ascii_lowercase().as_str() {
            "quality" => match value.parse::<u64>() {
                Ok(quality) => {
                    intent
                        .command_args
                        .insert("quality".to_string(), Value::from(quality));
                }
                Err(_) => {
                    return Intent::invalid(raw, format!("quality '{value}' is not an integer"));
                }
            },
            "scale" => match value.parse::<f64>() {
                Ok(scale) if scale.is_finite() => {
                    intent
                        .command_args
                        .insert("scale".to_string(), json!(scale));
                }
                _ => return Intent::invalid(raw, format!("scale '{value}' is not a number")),
            },
            "out" => {
                intent
                    .command_args
                    .insert("out".to_string(), Value::String(value.to_string()));
            }
            other => {
                return Intent::invalid(raw, format!("unrecognized export option '{other}'"));
            }
        }
    }
    intent
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let remainder = &slash_tail[command_len..];
            let arg = remainder.trim();

            if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
                let key = if action == "set_tool" { "tool" } else { "model" };
                let mut intent = Intent::new(action, text);
                intent
                    .command_args
                    .insert(key.to_string(), Value::String(arg.to_string()));
                return intent;
            }

            if let Some(action) = find_action(&command, PROMPT_COMMANDS) {
                if arg.is_empty() {
                    return Intent::invalid(text, format!("/{command} requires a prompt"));
                }
                return Intent::with_prompt(action, text, arg);
            }

            if let Some(action) = find_action(&command, SINGLE_PATH_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.command_args.insert(
                    "path".to_string(),
                    Value::String(parse_single_path_arg(arg)),
                );
                return intent;
            }

            if let Some(action) = find_action(&command, REGION_COMMANDS) {
                return match parse_region_arg(arg) {
                    Ok(region) => {
                        let mut intent = Intent::new(action, text);
                        intent.command_args.insert("region".to_string(), region);
                        intent
                    }
                    Err(error) => Intent::invalid(text, format!("/{command}: {error}")),
                };
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            if command == RETOUCH_COMMAND.command {
                return parse_retouch_arg(text, arg);
            }

            if command == UPSCALE_COMMAND.command {
                let factor = if arg.is_empty() {
                    Ok(DEFAULT_UPSCALE_FACTOR)
                } else {
                    arg.trim_end_matches(['x', 'X']).parse::<u64>()
                };
                return match factor {
                    Ok(factor) => {
                        let mut intent = Intent::new(UPSCALE_COMMAND.action, text);
                        intent
                            .command_args
                            .insert("factor".to_string(), Value::from(factor));
                        intent
                    }
                    Err(_) => Intent::invalid(text, format!("/upscale: '{arg}' is not a factor")),
                };
            }

            if command == EXPORT_COMMAND.command {
                return parse_export_arg(text, arg);
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    Intent::with_prompt(RETOUCH_COMMAND.action, text, raw_trimmed)
}
