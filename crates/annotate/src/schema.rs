use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ParseError;
use crate::task::AnnotationTask;

/// Restriction on the values a field may take.
#[derive(Debug, Clone, Copy)]
pub enum ValueRule {
    Any,
    /// Closed set, compared case-insensitively; the listed spelling is kept
    OneOf(&'static [&'static str]),
    /// Hyphen-separated single letters, three or four of them
    RootLetters,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Key in the model output
    pub key: &'static str,
    /// Property written to the graph store
    pub property: &'static str,
    pub rule: ValueRule,
}

impl FieldSpec {
    pub const fn new(key: &'static str, property: &'static str, rule: ValueRule) -> Self {
        Self {
            key,
            property,
            rule,
        }
    }
}

/// Declared shape of a task's model output.
#[derive(Debug, Clone, Copy)]
pub enum OutputSchema {
    /// A JSON object with a fixed key set; `id_key` must echo the request id.
    Json {
        fields: &'static [FieldSpec],
        id_key: Option<&'static str>,
    },
    /// Exactly `fields.len()` values joined by `separator`, e.g. `Concrete; MAA`.
    Delimited {
        separator: char,
        fields: &'static [FieldSpec],
    },
    /// A single bare value.
    Label(FieldSpec),
}

pub type Fields = BTreeMap<String, String>;

/// Parsed outcome for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationResult {
    pub correlation_id: String,
    pub task: AnnotationTask,
    /// Store property -> value; only fields the model actually answered
    pub fields: Fields,
}

const NO_ANSWER: &[&str] = &["NA", "N/A"];

impl OutputSchema {
    /// Validate raw model output against the schema.
    ///
    /// Returns the answered fields keyed by store property. Any missing key,
    /// wrong count or disallowed value rejects the whole output.
    pub fn validate(&self, correlation_id: &str, content: &str) -> Result<Fields, ParseError> {
        let content = strip_code_fence(content);
        let mut fields = Fields::new();

        match self {
            OutputSchema::Json {
                fields: specs,
                id_key,
            } => {
                let object: serde_json::Map<String, Value> = serde_json::from_str(content)
                    .map_err(|e| ParseError::Payload(e.to_string()))?;

                if let Some(id_key) = id_key {
                    if let Some(found) = object.get(*id_key) {
                        let found = scalar_to_string(found).ok_or(ParseError::InvalidValue {
                            field: *id_key,
                            value: found.to_string(),
                        })?;
                        if found.trim() != correlation_id {
                            return Err(ParseError::IdMismatch {
                                expected: correlation_id.to_string(),
                                found,
                            });
                        }
                    }
                }

                for spec in specs.iter() {
                    let value = object.get(spec.key).ok_or(ParseError::MissingField(spec.key))?;
                    let value = value.as_str().ok_or(ParseError::InvalidValue {
                        field: spec.key,
                        value: value.to_string(),
                    })?;
                    insert_checked(&mut fields, spec, value)?;
                }
            }
            OutputSchema::Delimited {
                separator,
                fields: specs,
            } => {
                let parts: Vec<&str> = content.split(*separator).collect();
                if parts.len() != specs.len() {
                    return Err(ParseError::FieldCount {
                        expected: specs.len(),
                        found: parts.len(),
                        separator: *separator,
                    });
                }
                for (spec, part) in specs.iter().zip(parts) {
                    insert_checked(&mut fields, spec, part)?;
                }
            }
            OutputSchema::Label(spec) => insert_checked(&mut fields, spec, content)?,
        }

        if fields.is_empty() {
            return Err(ParseError::NoAnswer);
        }
        Ok(fields)
    }

    pub fn properties(&self) -> Vec<&'static str> {
        match self {
            OutputSchema::Json { fields, .. } | OutputSchema::Delimited { fields, .. } => {
                fields.iter().map(|f| f.property).collect()
            }
            OutputSchema::Label(spec) => vec![spec.property],
        }
    }
}

fn insert_checked(fields: &mut Fields, spec: &FieldSpec, raw: &str) -> Result<(), ParseError> {
    let value = clean_value(raw);
    if value.is_empty() {
        return Err(ParseError::InvalidValue {
            field: spec.key,
            value: raw.to_string(),
        });
    }
    if NO_ANSWER.iter().any(|na| value.eq_ignore_ascii_case(na)) {
        return Ok(());
    }

    let value = match spec.rule {
        ValueRule::Any => value.to_string(),
        ValueRule::OneOf(allowed) => allowed
            .iter()
            .find(|a| a.eq_ignore_ascii_case(value))
            .map(|a| a.to_string())
            .ok_or_else(|| ParseError::InvalidValue {
                field: spec.key,
                value: value.to_string(),
            })?,
        ValueRule::RootLetters => {
            let letters: Vec<&str> = value.split('-').map(str::trim).collect();
            let well_formed = (3..=4).contains(&letters.len())
                && letters.iter().all(|l| l.chars().count() == 1);
            if !well_formed {
                return Err(ParseError::InvalidValue {
                    field: spec.key,
                    value: value.to_string(),
                });
            }
            letters.join("-")
        }
    };

    fields.insert(spec.property.to_string(), value);
    Ok(())
}

/// Trim whitespace, wrapping quotes and a trailing full stop.
fn clean_value(raw: &str) -> &str {
    raw.trim()
        .trim_matches(|c| c == '\'' || c == '"')
        .trim_end_matches('.')
        .trim()
}

/// Models sometimes wrap JSON in a Markdown code block.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.strip_prefix("json").unwrap_or(rest);
            rest.strip_suffix("```").unwrap_or(rest).trim()
        }
        None => trimmed,
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAIR: &[FieldSpec] = &[
        FieldSpec::new("a", "prop_a", ValueRule::Any),
        FieldSpec::new("b", "prop_b", ValueRule::OneOf(&["Yes", "No"])),
    ];

    #[test]
    fn test_json_schema_maps_keys_to_properties() {
        let schema = OutputSchema::Json {
            fields: PAIR,
            id_key: None,
        };
        let fields = schema.validate("E1", r#"{"a": "x", "b": "yes"}"#).unwrap();
        assert_eq!(fields.get("prop_a").map(String::as_str), Some("x"));
        assert_eq!(fields.get("prop_b").map(String::as_str), Some("Yes"));
    }

    #[test]
    fn test_json_schema_rejects_missing_key() {
        let schema = OutputSchema::Json {
            fields: PAIR,
            id_key: None,
        };
        assert!(matches!(
            schema.validate("E1", r#"{"a": "x"}"#),
            Err(ParseError::MissingField("b"))
        ));
    }

    #[test]
    fn test_json_schema_checks_echoed_id() {
        let schema = OutputSchema::Json {
            fields: PAIR,
            id_key: Some("id"),
        };
        assert!(schema.validate("E1", r#"{"id": "E1", "a": "x", "b": "No"}"#).is_ok());
        assert!(matches!(
            schema.validate("E1", r#"{"id": "E2", "a": "x", "b": "No"}"#),
            Err(ParseError::IdMismatch { .. })
        ));
    }

    #[test]
    fn test_code_fence_is_stripped() {
        let schema = OutputSchema::Json {
            fields: PAIR,
            id_key: None,
        };
        let content = "```json\n{\"a\": \"x\", \"b\": \"No\"}\n```";
        assert!(schema.validate("E1", content).is_ok());
    }

    #[test]
    fn test_delimited_requires_exact_count() {
        let schema = OutputSchema::Delimited {
            separator: ';',
            fields: PAIR,
        };
        assert!(schema.validate("E1", "x; No").is_ok());
        assert!(matches!(
            schema.validate("E1", "x; No; extra"),
            Err(ParseError::FieldCount { expected: 2, found: 3, .. })
        ));
        assert!(matches!(
            schema.validate("E1", "x; Maybe"),
            Err(ParseError::InvalidValue { field: "b", .. })
        ));
    }

    #[test]
    fn test_no_answer_fields_are_omitted() {
        let schema = OutputSchema::Delimited {
            separator: ';',
            fields: PAIR,
        };
        let fields = schema.validate("E1", "x; NA").unwrap();
        assert_eq!(fields.len(), 1);
        assert!(matches!(
            schema.validate("E1", "NA; NA"),
            Err(ParseError::NoAnswer)
        ));
    }

    #[test]
    fn test_root_letters_rule() {
        let schema = OutputSchema::Label(FieldSpec::new("root", "root", ValueRule::RootLetters));
        let fields = schema.validate("E1", "ك - ت - ب").unwrap();
        assert_eq!(fields.get("root").map(String::as_str), Some("ك-ت-ب"));
        assert!(schema.validate("E1", "كتب").is_err());
    }
}
