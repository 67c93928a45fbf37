//! Templated payloads written to the downstream path.
//!
//! A role's `secret_data` is a tree of strings and nested maps. Leaves that
//! consist entirely of an identity template (`{{identity.entity.name}}`) are
//! rendered against the requester before the downstream write; every other
//! leaf passes through untouched.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

static TEMPLATE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{\{.+?\}\}$").expect("template marker regex is valid"));

/// A `secret_data` tree
pub type SecretData = BTreeMap<String, SecretValue>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SecretValue {
    Text(String),
    Map(BTreeMap<String, SecretValue>),
}

impl SecretValue {
    pub fn is_template(&self) -> bool {
        matches!(self, SecretValue::Text(text) if TEMPLATE_MARKER.is_match(text))
    }
}

impl From<&str> for SecretValue {
    fn from(value: &str) -> Self {
        SecretValue::Text(value.to_string())
    }
}

impl From<String> for SecretValue {
    fn from(value: String) -> Self {
        SecretValue::Text(value)
    }
}

/// Render every template leaf in `data` with `render`.
///
/// A leaf whose rendering fails keeps its original text; the failure is
/// logged without the leaf's value.
pub fn render_templates<F>(data: &SecretData, render: &F) -> SecretData
where
    F: Fn(&str) -> Result<String, String>,
{
    data.iter().map(|(key, value)| (key.clone(), render_value(key, value, render))).collect()
}

fn render_value<F>(key: &str, value: &SecretValue, render: &F) -> SecretValue
where
    F: Fn(&str) -> Result<String, String>,
{
    match value {
        SecretValue::Text(text) if TEMPLATE_MARKER.is_match(text) => match render(text) {
            Ok(rendered) => SecretValue::Text(rendered),
            Err(reason) => {
                tracing::warn!(field = %key, reason = %reason, "Failed to render secret_data template");
                value.clone()
            }
        },
        SecretValue::Text(_) => value.clone(),
        SecretValue::Map(map) => SecretValue::Map(render_templates(map, render)),
    }
}

/// Convert a tree into a JSON object for the downstream request body
pub fn to_json(data: &SecretData) -> serde_json::Map<String, serde_json::Value> {
    data.iter()
        .map(|(key, value)| {
            let json = match value {
                SecretValue::Text(text) => serde_json::Value::String(text.clone()),
                SecretValue::Map(map) => serde_json::Value::Object(to_json(map)),
            };
            (key.clone(), json)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SecretData {
        serde_json::from_value(serde_json::json!({
            "user": "{{identity.entity.name}}",
            "static": "plain {{not-a-template}} text",
            "nested": {
                "owner": "{{identity.entity.id}}",
                "broken": "{{identity.unknown}}"
            }
        }))
        .unwrap()
    }

    #[test]
    fn renders_only_full_template_leaves() {
        let rendered = render_templates(&sample(), &|template: &str| match template {
            "{{identity.entity.name}}" => Ok("alice".to_string()),
            "{{identity.entity.id}}" => Ok("e-123".to_string()),
            other => Err(format!("unknown template {}", other)),
        });

        assert_eq!(rendered["user"], SecretValue::from("alice"));
        assert_eq!(rendered["static"], SecretValue::from("plain {{not-a-template}} text"));

        let SecretValue::Map(nested) = &rendered["nested"] else {
            panic!("nested should stay a map");
        };
        assert_eq!(nested["owner"], SecretValue::from("e-123"));
        assert_eq!(nested["broken"], SecretValue::from("{{identity.unknown}}"));
    }

    #[test]
    fn to_json_preserves_structure() {
        let json = serde_json::Value::Object(to_json(&sample()));
        assert_eq!(json["nested"]["owner"], "{{identity.entity.id}}");
        assert_eq!(json["user"], "{{identity.entity.name}}");
    }

    #[test]
    fn template_detection() {
        assert!(SecretValue::from("{{a}}").is_template());
        assert!(!SecretValue::from("x{{a}}").is_template());
        assert!(!SecretValue::from("{{}}").is_template());
    }
}
