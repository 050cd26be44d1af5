//! Schema check applied to untyped ingestion payloads.
//!
//! Ingestion receives arbitrary JSON. [`validate_payload`] turns it into a
//! typed [`EventInput`] or a [`ValidationError`] listing every problem found,
//! in schema field order. Nothing is enqueued unless validation passes.

use crate::event::{EventInput, parse_timestamp};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Fields of the event schema, in the order issues are reported.
pub const EVENT_FIELDS: [&str; 5] = ["site_id", "event_type", "path", "user_id", "timestamp"];

/// A single schema violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// Offending field, `None` when the payload itself is the problem.
    pub field: Option<&'static str>,
    /// What is wrong with it.
    pub problem: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.field {
            Some(field) => write!(f, "{field}: {}", self.problem),
            None => f.write_str(&self.problem),
        }
    }
}

/// Payload rejected by the schema check.
///
/// Displays as all issues joined with `"; "`, which is the message returned
/// to the client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", join_issues(.issues))]
pub struct ValidationError {
    /// Every violation found, in field order.
    pub issues: Vec<Issue>,
}

impl ValidationError {
    /// An error with a single payload-level issue.
    #[must_use]
    pub fn payload(problem: impl Into<String>) -> Self {
        Self {
            issues: vec![Issue {
                field: None,
                problem: problem.into(),
            }],
        }
    }

    /// Whether `field` has at least one issue.
    #[must_use]
    pub fn has_issue_for(&self, field: &str) -> bool {
        self.issues.iter().any(|i| i.field == Some(field))
    }
}

fn join_issues(issues: &[Issue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn string_field(
    object: &Map<String, Value>,
    field: &'static str,
    issues: &mut Vec<Issue>,
) -> Option<String> {
    match object.get(field) {
        None | Some(Value::Null) => {
            issues.push(Issue {
                field: Some(field),
                problem: "required".to_string(),
            });
            None
        }
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            issues.push(Issue {
                field: Some(field),
                problem: format!("expected string, received {}", json_type(other)),
            });
            None
        }
    }
}

/// Validate an untyped payload against the event schema.
///
/// Rules:
/// - the payload must be a JSON object; unknown fields are ignored
/// - every schema field must be present and a string
/// - `site_id` must not be empty
/// - `timestamp` must parse as an ISO-8601 datetime
///
/// # Errors
///
/// Returns [`ValidationError`] carrying every issue found.
///
/// # Example
///
/// ```
/// use beacon_core::validate_payload;
/// use serde_json::json;
///
/// let err = validate_payload(&json!({ "site_id": "s1" })).unwrap_err();
/// assert_eq!(
///     err.to_string(),
///     "event_type: required; path: required; user_id: required; timestamp: required"
/// );
/// ```
pub fn validate_payload(payload: &Value) -> Result<EventInput, ValidationError> {
    let Value::Object(object) = payload else {
        return Err(ValidationError::payload(format!(
            "expected a JSON object, received {}",
            json_type(payload)
        )));
    };

    let mut issues = Vec::new();

    let site_id = string_field(object, "site_id", &mut issues);
    if site_id.as_deref().is_some_and(str::is_empty) {
        issues.push(Issue {
            field: Some("site_id"),
            problem: "must not be empty".to_string(),
        });
    }
    let event_type = string_field(object, "event_type", &mut issues);
    let path = string_field(object, "path", &mut issues);
    let user_id = string_field(object, "user_id", &mut issues);
    let timestamp = string_field(object, "timestamp", &mut issues);
    if let Some(raw) = timestamp.as_deref() {
        if parse_timestamp(raw).is_err() {
            issues.push(Issue {
                field: Some("timestamp"),
                problem: "invalid datetime".to_string(),
            });
        }
    }

    match (site_id, event_type, path, user_id, timestamp) {
        (Some(site_id), Some(event_type), Some(path), Some(user_id), Some(timestamp))
            if issues.is_empty() =>
        {
            Ok(EventInput {
                site_id,
                event_type,
                path,
                user_id,
                timestamp,
            })
        }
        _ => Err(ValidationError { issues }),
    }
}
