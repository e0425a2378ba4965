use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};

const SUMMARY_FIELD_CHARS: usize = 200;
const FALLBACK_SUMMARY_FIELDS: usize = 4;
const SUMMARY_PRIORITY: &[&str] = &[
    "businessname",
    "companyname",
    "name",
    "industry",
    "targetaudience",
    "audience",
    "idealcustomer",
    "mission",
    "offer",
    "productname",
    "brandvoice",
    "tone",
];

/// Questionnaire answers keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputRecord {
    fields: BTreeMap<String, String>,
}

impl InputRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn is_blank(&self) -> bool {
        self.fields.values().all(|value| value.trim().is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Builds a record from a JSON object, flattening nested objects into
    /// dotted keys and stringifying scalars.
    pub fn from_json(value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(CoreError::InvalidInput(
                "expected a JSON object of answers".to_string(),
            ));
        };
        let mut record = Self::new();
        for (key, value) in map {
            flatten_into(&mut record.fields, key, value);
        }
        Ok(record)
    }

    /// Text handed to the chunker: one `key: value` line per answered field.
    pub fn serialize_for_chunking(&self) -> String {
        self.iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .map(|(key, value)| format!("{key}: {}", value.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Short, stable view of the record shown alongside every chunk.
    pub fn summary(&self, max_chars: usize) -> String {
        let answered: Vec<(&str, &str)> = self
            .iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .collect();
        let mut picked: Vec<(&str, &str)> = Vec::new();
        for wanted in SUMMARY_PRIORITY {
            if let Some(entry) = answered
                .iter()
                .find(|(key, _)| normalize_key(key) == *wanted)
            {
                if !picked.iter().any(|(key, _)| *key == entry.0) {
                    picked.push(*entry);
                }
            }
        }
        if picked.is_empty() {
            picked = answered.into_iter().take(FALLBACK_SUMMARY_FIELDS).collect();
        }
        let mut summary = String::new();
        for (key, value) in picked {
            let line = format!(
                "- {key}: {}",
                truncate_chars(value.trim(), SUMMARY_FIELD_CHARS)
            );
            let needed = line.chars().count() + usize::from(!summary.is_empty());
            if summary.chars().count() + needed > max_chars {
                break;
            }
            if !summary.is_empty() {
                summary.push('\n');
            }
            summary.push_str(&line);
        }
        summary
    }
}

impl FromIterator<(String, String)> for InputRecord {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

fn flatten_into(fields: &mut BTreeMap<String, String>, key: String, value: Value) {
    match value {
        Value::Null => {}
        Value::String(text) => {
            fields.insert(key, text);
        }
        Value::Bool(flag) => {
            fields.insert(key, flag.to_string());
        }
        Value::Number(number) => {
            fields.insert(key, number.to_string());
        }
        Value::Array(items) => {
            let joined = items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Null => None,
                    Value::String(text) => Some(text),
                    other => Some(other.to_string()),
                })
                .collect::<Vec<_>>()
                .join(", ");
            fields.insert(key, joined);
        }
        Value::Object(map) => {
            for (child, value) in map {
                flatten_into(fields, format!("{key}.{child}"), value);
            }
        }
    }
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' ' | '.'))
        .flat_map(char::to_lowercase)
        .collect()
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flattens_json_answers() {
        let record = InputRecord::from_json(json!({
            "businessName": "Acme Ropes",
            "employees": 12,
            "remote": true,
            "channels": ["email", "events"],
            "founder": { "name": "Rae" },
            "skipped": null
        }))
        .unwrap();
        assert_eq!(record.get("businessName"), Some("Acme Ropes"));
        assert_eq!(record.get("employees"), Some("12"));
        assert_eq!(record.get("remote"), Some("true"));
        assert_eq!(record.get("channels"), Some("email, events"));
        assert_eq!(record.get("founder.name"), Some("Rae"));
        assert_eq!(record.get("skipped"), None);
    }

    #[test]
    fn rejects_non_object_json() {
        let err = InputRecord::from_json(json!(["a", "b"])).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn serialization_is_sorted_and_skips_blanks() {
        let mut record = InputRecord::new();
        record.insert("zeta", "last");
        record.insert("alpha", "first");
        record.insert("empty", "   ");
        assert_eq!(record.serialize_for_chunking(), "alpha: first\nzeta: last");
        assert!(!record.is_blank());
    }

    #[test]
    fn blank_record_is_detected() {
        let mut record = InputRecord::new();
        assert!(record.is_blank());
        record.insert("a", " ");
        assert!(record.is_blank());
    }

    #[test]
    fn summary_prefers_known_fields() {
        let mut record = InputRecord::new();
        record.insert("aaa_notes", "misc");
        record.insert("target_audience", "Climbing gyms");
        record.insert("businessName", "Acme Ropes");
        let summary = record.summary(500);
        assert_eq!(
            summary,
            "- businessName: Acme Ropes\n- target_audience: Climbing gyms"
        );
    }

    #[test]
    fn summary_falls_back_to_first_fields_and_respects_budget() {
        let mut record = InputRecord::new();
        record.insert("a", "1");
        record.insert("b", "2");
        record.insert("c", "3");
        assert_eq!(record.summary(500), "- a: 1\n- b: 2\n- c: 3");
        assert_eq!(record.summary(14), "- a: 1\n- b: 2");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
