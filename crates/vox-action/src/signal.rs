//! Action signal extraction from model output.
//!
//! Recognized signals, in priority order:
//! 1. Inline tag: `[action_name key=value key="quoted value"]`
//! 2. JSON object: `{"action": "...", "parameters": {...}, "response": "..."}`
//!    (bare or inside a code fence)
//! 3. Trigger phrase: a literal phrase registered on a capability,
//!    carrying preset arguments
//!
//! Only names present in the registry count as signals; an unrecognized
//! tag or action name is plain text. Tie-break for trigger phrases:
//! longest literal match wins, then registry insertion order.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use vox_core::types::{ArgMap, ArgValue};

use crate::registry::ActionRegistry;

/// How the signal was expressed in the output text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Tag,
    Json,
    TriggerPhrase,
}

/// One extracted action signal.
#[derive(Debug, Clone)]
pub struct Signal {
    pub name: String,
    pub args: ArgMap,
    pub kind: SignalKind,
    /// The output text with the structured signal removed; what the
    /// assistant actually says.
    pub narrative: String,
}

/// Extract at most one action signal from model output.
pub fn extract(text: &str, registry: &ActionRegistry) -> Option<Signal> {
    if let Some(signal) = extract_tag(text, registry) {
        return Some(signal);
    }
    if let Some(signal) = extract_json(text, registry) {
        return Some(signal);
    }
    match_trigger(text, registry)
}

// ---------------------------------------------------------------------------
// Inline tag
// ---------------------------------------------------------------------------

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\[([a-z][a-z0-9_]*)((?:\s+[a-z][a-z0-9_]*=(?:"[^"]*"|[^\s\]]+))*)\s*\]"#)
            .expect("Invalid tag regex")
    })
}

fn tag_arg_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([a-z][a-z0-9_]*)=(?:"([^"]*)"|([^\s\]]+))"#).expect("Invalid tag arg regex")
    })
}

fn extract_tag(text: &str, registry: &ActionRegistry) -> Option<Signal> {
    for mat in tag_regex().captures_iter(text) {
        let name = &mat[1];
        if registry.get(name).is_none() {
            continue;
        }

        let mut args = ArgMap::new();
        for arg in tag_arg_regex().captures_iter(&mat[2]) {
            let value = arg
                .get(2)
                .or_else(|| arg.get(3))
                .map(|m| m.as_str())
                .unwrap_or("");
            args.insert(arg[1].to_string(), ArgValue::Text(value.to_string()));
        }

        let full = mat.get(0).map(|m| m.range()).unwrap_or(0..0);
        let mut remainder = String::with_capacity(text.len());
        remainder.push_str(&text[..full.start]);
        remainder.push(' ');
        remainder.push_str(&text[full.end..]);

        return Some(Signal {
            name: name.to_string(),
            args,
            kind: SignalKind::Tag,
            narrative: normalize(&remainder),
        });
    }
    None
}

// ---------------------------------------------------------------------------
// JSON object
// ---------------------------------------------------------------------------

fn extract_json(text: &str, registry: &ActionRegistry) -> Option<Signal> {
    for (start, end) in json_spans(text) {
        let Ok(value) = serde_json::from_str::<Value>(&text[start..end]) else {
            continue;
        };
        let Some(name) = value.get("action").and_then(Value::as_str) else {
            continue;
        };
        if registry.get(name).is_none() {
            continue;
        }

        let mut args = ArgMap::new();
        if let Some(params) = value.get("parameters").and_then(Value::as_object) {
            for (key, val) in params {
                if let Some(arg) = json_to_arg(val) {
                    args.insert(key.clone(), arg);
                }
            }
        }

        // The original contract lets the model carry the spoken reply in a
        // "response" field; otherwise speak the text around the object.
        let narrative = match value.get("response").and_then(Value::as_str) {
            Some(response) => response.trim().to_string(),
            None => {
                let mut remainder = String::with_capacity(text.len());
                remainder.push_str(&text[..start]);
                remainder.push(' ');
                remainder.push_str(&text[end..]);
                normalize(&strip_fences(&remainder))
            }
        };

        return Some(Signal {
            name: name.to_string(),
            args,
            kind: SignalKind::Json,
            narrative,
        });
    }
    None
}

/// Byte spans of top-level `{...}` objects, honoring strings and escapes.
fn json_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    spans.push((start, i + c.len_utf8()));
                }
            }
            _ => {}
        }
    }
    spans
}

fn json_to_arg(value: &Value) -> Option<ArgValue> {
    match value {
        Value::Bool(b) => Some(ArgValue::Bool(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(ArgValue::Int)
            .or_else(|| n.as_f64().map(ArgValue::Float)),
        Value::String(s) => Some(ArgValue::Text(s.clone())),
        Value::Null => None,
        // Nested structures are not valid primitives; keep the raw JSON so
        // schema validation can reject it deterministically.
        other => Some(ArgValue::Text(other.to_string())),
    }
}

fn strip_fences(text: &str) -> String {
    text.replace("```json", " ").replace("```", " ")
}

// ---------------------------------------------------------------------------
// Trigger phrases
// ---------------------------------------------------------------------------

fn match_trigger(text: &str, registry: &ActionRegistry) -> Option<Signal> {
    let lower = text.to_lowercase();

    let mut best: Option<(usize, Signal)> = None;
    for capability in registry.entries() {
        for trigger in &capability.triggers {
            let phrase = trigger.phrase.to_lowercase();
            if phrase.is_empty() || !lower.contains(&phrase) {
                continue;
            }
            // Strictly-greater keeps the earliest registered capability on ties.
            let better = match &best {
                Some((len, _)) => phrase.len() > *len,
                None => true,
            };
            if better {
                best = Some((
                    phrase.len(),
                    Signal {
                        name: capability.name.clone(),
                        args: trigger.args.clone(),
                        kind: SignalKind::TriggerPhrase,
                        narrative: text.trim().to_string(),
                    },
                ));
            }
        }
    }
    best.map(|(_, signal)| signal)
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::CapabilityHandler;
    use crate::registry::{Capability, Trigger};
    use std::sync::Arc;

    struct NoopHandler;

    #[async_trait::async_trait]
    impl CapabilityHandler for NoopHandler {
        async fn execute(&self, _args: &ArgMap) -> Result<String, crate::error::ActionError> {
            Ok("done".to_string())
        }
    }

    fn test_registry() -> ActionRegistry {
        let mut registry = ActionRegistry::new();
        registry
            .register(
                Capability::new("open_app", "launch app", Arc::new(NoopHandler))
                    .with_trigger(Trigger::new("open cursor").with_arg("app", "cursor"))
                    .with_trigger(Trigger::new("open browser").with_arg("app", "firefox")),
            )
            .unwrap();
        registry
            .register(
                Capability::new("current_time", "clock", Arc::new(NoopHandler))
                    .with_trigger(Trigger::new("what time")),
            )
            .unwrap();
        registry
    }

    // ---- Tag signals ----

    #[test]
    fn test_tag_extraction() {
        let registry = test_registry();
        let signal = extract(
            "Sure, I'll open Cursor for you. [open_app app=cursor]",
            &registry,
        )
        .unwrap();

        assert_eq!(signal.name, "open_app");
        assert_eq!(signal.kind, SignalKind::Tag);
        assert_eq!(
            signal.args.get("app"),
            Some(&ArgValue::Text("cursor".to_string()))
        );
        assert_eq!(signal.narrative, "Sure, I'll open Cursor for you.");
    }

    #[test]
    fn test_tag_with_quoted_value() {
        let registry = test_registry();
        let signal = extract(r#"[open_app app="visual studio"]"#, &registry).unwrap();
        assert_eq!(
            signal.args.get("app"),
            Some(&ArgValue::Text("visual studio".to_string()))
        );
        assert_eq!(signal.narrative, "");
    }

    #[test]
    fn test_tag_with_multiple_args() {
        let registry = test_registry();
        let signal = extract("[open_app app=code profile=work]", &registry).unwrap();
        assert_eq!(signal.args.len(), 2);
        assert_eq!(
            signal.args.get("profile"),
            Some(&ArgValue::Text("work".to_string()))
        );
    }

    #[test]
    fn test_unknown_tag_is_plain_text() {
        let registry = test_registry();
        let signal = extract("[self_destruct now=true]", &registry);
        assert!(signal.is_none());
    }

    #[test]
    fn test_unknown_tag_does_not_shadow_known_one() {
        let registry = test_registry();
        let signal = extract("[made_up x=1] then [open_app app=cursor]", &registry).unwrap();
        assert_eq!(signal.name, "open_app");
    }

    #[test]
    fn test_tag_preferred_over_trigger_phrase() {
        let registry = test_registry();
        // Both a trigger phrase and a tag are present; the tag wins.
        let signal = extract("I'll open cursor now [current_time]", &registry).unwrap();
        assert_eq!(signal.name, "current_time");
        assert_eq!(signal.kind, SignalKind::Tag);
    }

    // ---- JSON signals ----

    #[test]
    fn test_json_extraction_with_response() {
        let registry = test_registry();
        let output = r#"{"action": "open_app", "parameters": {"app": "cursor"}, "response": "Opening Cursor now."}"#;
        let signal = extract(output, &registry).unwrap();

        assert_eq!(signal.name, "open_app");
        assert_eq!(signal.kind, SignalKind::Json);
        assert_eq!(
            signal.args.get("app"),
            Some(&ArgValue::Text("cursor".to_string()))
        );
        assert_eq!(signal.narrative, "Opening Cursor now.");
    }

    #[test]
    fn test_json_extraction_in_fence() {
        let registry = test_registry();
        let output = "On it.\n```json\n{\"action\": \"open_app\", \"parameters\": {\"app\": \"firefox\"}}\n```";
        let signal = extract(output, &registry).unwrap();

        assert_eq!(signal.name, "open_app");
        assert_eq!(
            signal.args.get("app"),
            Some(&ArgValue::Text("firefox".to_string()))
        );
        assert_eq!(signal.narrative, "On it.");
    }

    #[test]
    fn test_json_with_unknown_action_ignored() {
        let registry = test_registry();
        let output = r#"{"action": "self_destruct", "parameters": {}}"#;
        assert!(extract(output, &registry).is_none());
    }

    #[test]
    fn test_json_numeric_and_bool_parameters() {
        let mut registry = ActionRegistry::new();
        registry
            .register(Capability::new("set_timer", "timer", Arc::new(NoopHandler)))
            .unwrap();
        let output = r#"{"action": "set_timer", "parameters": {"minutes": 5, "repeat": false}}"#;
        let signal = extract(output, &registry).unwrap();
        assert_eq!(signal.args.get("minutes"), Some(&ArgValue::Int(5)));
        assert_eq!(signal.args.get("repeat"), Some(&ArgValue::Bool(false)));
    }

    #[test]
    fn test_json_ignores_braces_inside_strings() {
        let registry = test_registry();
        let output = r#"{"action": "open_app", "parameters": {"app": "we{ird}name"}, "response": "ok"}"#;
        let signal = extract(output, &registry).unwrap();
        assert_eq!(
            signal.args.get("app"),
            Some(&ArgValue::Text("we{ird}name".to_string()))
        );
    }

    // ---- Trigger phrases ----

    #[test]
    fn test_trigger_phrase_match() {
        let registry = test_registry();
        let signal = extract("Let me open cursor for you.", &registry).unwrap();

        assert_eq!(signal.name, "open_app");
        assert_eq!(signal.kind, SignalKind::TriggerPhrase);
        assert_eq!(
            signal.args.get("app"),
            Some(&ArgValue::Text("cursor".to_string()))
        );
        assert_eq!(signal.narrative, "Let me open cursor for you.");
    }

    #[test]
    fn test_trigger_is_case_insensitive() {
        let registry = test_registry();
        let signal = extract("OPEN CURSOR please", &registry).unwrap();
        assert_eq!(signal.name, "open_app");
    }

    #[test]
    fn test_longest_trigger_wins() {
        let mut registry = ActionRegistry::new();
        registry
            .register(
                Capability::new("short", "", Arc::new(NoopHandler))
                    .with_trigger(Trigger::new("open")),
            )
            .unwrap();
        registry
            .register(
                Capability::new("long", "", Arc::new(NoopHandler))
                    .with_trigger(Trigger::new("open the pod bay doors")),
            )
            .unwrap();

        let signal = extract("please open the pod bay doors", &registry).unwrap();
        assert_eq!(signal.name, "long");
    }

    #[test]
    fn test_equal_length_triggers_use_insertion_order() {
        let mut registry = ActionRegistry::new();
        registry
            .register(
                Capability::new("first", "", Arc::new(NoopHandler))
                    .with_trigger(Trigger::new("same length!")),
            )
            .unwrap();
        registry
            .register(
                Capability::new("second", "", Arc::new(NoopHandler))
                    .with_trigger(Trigger::new("same length?")),
            )
            .unwrap();

        let signal = extract("same length! and same length?", &registry).unwrap();
        assert_eq!(signal.name, "first");
    }

    // ---- No signal ----

    #[test]
    fn test_plain_text_has_no_signal() {
        let registry = test_registry();
        assert!(extract("The weather looks lovely today.", &registry).is_none());
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let registry = test_registry();
        let output = "Sure. [open_app app=cursor] Also, open browser maybe?";
        let a = extract(output, &registry).unwrap();
        let b = extract(output, &registry).unwrap();
        assert_eq!(a.name, b.name);
        assert_eq!(a.args, b.args);
        assert_eq!(a.narrative, b.narrative);
    }
}
