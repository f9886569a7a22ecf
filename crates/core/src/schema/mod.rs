//! Structural checks applied to a parsed timeline document before any domain
//! object is built.
//!
//! Each object kind is described by a static list of fields. Fields are checked
//! in order and the first missing key or type mismatch is reported. Keys not
//! listed are ignored.

use serde_json::{Map, Value};

use crate::{ControlMode, Result, ShowlineError};

/// JSON value shapes a field may accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonKind {
    String,
    Integer,
    Number,
    List,
    Object,
}

impl JsonKind {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::List => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::List => "list",
            Self::Object => "object",
        }
    }
}

/// A required key and the shapes its value may take.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub key: &'static str,
    pub accepts: &'static [JsonKind],
}

impl Field {
    const fn new(key: &'static str, accepts: &'static [JsonKind]) -> Self {
        Self { key, accepts }
    }

    fn expected(&self) -> String {
        self.accepts
            .iter()
            .map(JsonKind::name)
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

pub const DOCUMENT: &[Field] = &[
    Field::new("name", &[JsonKind::String]),
    Field::new("ip", &[JsonKind::String]),
    Field::new("listening_port", &[JsonKind::Integer]),
    Field::new("timeline", &[JsonKind::List]),
];

pub const EVENT: &[Field] = &[
    Field::new("time", &[JsonKind::Number]),
    Field::new("command", &[JsonKind::String]),
    Field::new("control", &[JsonKind::Object]),
];

pub const CONTROL: &[Field] = &[Field::new("control_mode", &[JsonKind::String])];

pub const UNIQUE_CONTROL: &[Field] =
    &[Field::new("value", &[JsonKind::Number, JsonKind::String])];

/// A bare number is accepted and later promoted to `[value, value]`.
pub const ANIMATED_CONTROL: &[Field] = &[
    Field::new("value", &[JsonKind::List, JsonKind::Number]),
    Field::new("duration", &[JsonKind::Number]),
];

/// Checks a whole timeline document: top level, then each event, then each
/// event's control, common keys first and mode-specific keys last.
pub fn validate(document: &Value) -> Result<()> {
    let root = as_object("document", document)?;
    check_fields(root, DOCUMENT)?;

    let entries = root
        .get("timeline")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for entry in entries {
        let event = as_object("timeline", entry)?;
        check_fields(event, EVENT)?;

        let control = as_object("control", &event["control"])?;
        validate_control(control)?;
    }

    Ok(())
}

/// Checks one control object, including its mode-specific keys.
pub fn validate_control(control: &Map<String, Value>) -> Result<()> {
    check_fields(control, CONTROL)?;

    let mode = control
        .get("control_mode")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .parse::<ControlMode>()?;

    match mode {
        ControlMode::Unique => check_fields(control, UNIQUE_CONTROL),
        ControlMode::Animated => check_fields(control, ANIMATED_CONTROL),
    }
}

/// Fails on the first field that is missing or has an unaccepted type.
pub fn check_fields(object: &Map<String, Value>, fields: &[Field]) -> Result<()> {
    for field in fields {
        let value = object
            .get(field.key)
            .ok_or_else(|| ShowlineError::SchemaKeyMissing {
                key: field.key.to_string(),
            })?;

        if !field.accepts.iter().any(|kind| kind.matches(value)) {
            return Err(ShowlineError::SchemaTypeMismatch {
                key: field.key.to_string(),
                expected: field.expected(),
                actual: kind_name(value),
            });
        }
    }
    Ok(())
}

/// Human readable name of a JSON value's type.
pub fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(number) if number.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

fn as_object<'a>(key: &str, value: &'a Value) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| ShowlineError::SchemaTypeMismatch {
            key: key.to_string(),
            expected: JsonKind::Object.name().to_string(),
            actual: kind_name(value),
        })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn document(timeline: Value) -> Value {
        json!({
            "name": "show",
            "ip": "192.168.0.140",
            "listening_port": 6666,
            "timeline": timeline,
        })
    }

    fn event(control: Value) -> Value {
        json!({ "time": 1, "command": "/a", "control": control })
    }

    #[test]
    fn accepts_well_formed_documents() {
        let doc = document(json!([
            event(json!({"control_mode": "unique", "value": 2})),
            event(json!({"control_mode": "unique", "value": "add"})),
            event(json!({"control_mode": "animated", "value": [1, 2], "duration": 2})),
            event(json!({"control_mode": "animated", "value": 10, "duration": 4.5})),
        ]));
        validate(&doc).unwrap();
    }

    #[test]
    fn ignores_unknown_keys() {
        let mut doc = document(json!([{
            "time": 0.5,
            "command": "/a",
            "label": "intro",
            "control": {"control_mode": "unique", "value": 1, "colour": "red"},
        }]));
        doc["version"] = json!(3);
        validate(&doc).unwrap();
    }

    #[test]
    fn reports_the_first_missing_key() {
        let doc = json!({ "name": "show", "listening_port": 1, "timeline": [] });
        let err = validate(&doc).unwrap_err();
        assert!(matches!(err, ShowlineError::SchemaKeyMissing { key } if key == "ip"));
    }

    #[test]
    fn reports_expected_and_actual_types() {
        let mut doc = document(json!([]));
        doc["listening_port"] = json!("6666");

        match validate(&doc).unwrap_err() {
            ShowlineError::SchemaTypeMismatch {
                key,
                expected,
                actual,
            } => {
                assert_eq!(key, "listening_port");
                assert_eq!(expected, "integer");
                assert_eq!(actual, "string");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn fractional_ports_are_not_integers() {
        let mut doc = document(json!([]));
        doc["listening_port"] = json!(6666.5);
        assert!(matches!(
            validate(&doc),
            Err(ShowlineError::SchemaTypeMismatch { .. })
        ));
    }

    #[test]
    fn checks_events_before_their_controls() {
        let doc = document(json!([
            { "command": "/a", "control": {"control_mode": "bogus"} },
        ]));
        let err = validate(&doc).unwrap_err();
        assert!(matches!(err, ShowlineError::SchemaKeyMissing { key } if key == "time"));
    }

    #[test]
    fn rejects_animated_controls_without_duration() {
        let doc = document(json!([event(
            json!({"control_mode": "animated", "value": [2, 3]})
        )]));
        let err = validate(&doc).unwrap_err();
        assert!(matches!(err, ShowlineError::SchemaKeyMissing { key } if key == "duration"));
    }

    #[test]
    fn rejects_unknown_modes() {
        let doc = document(json!([event(
            json!({"control_mode": "uniquee", "value": 1})
        )]));
        assert!(matches!(
            validate(&doc),
            Err(ShowlineError::UnknownControlMode(mode)) if mode == "uniquee"
        ));
    }

    #[test]
    fn rejects_mode_specific_type_errors() {
        let list_on_unique = document(json!([event(
            json!({"control_mode": "unique", "value": [2, 3]})
        )]));
        let string_on_animated = document(json!([event(
            json!({"control_mode": "animated", "value": "str", "duration": 2})
        )]));

        for doc in [list_on_unique, string_on_animated] {
            assert!(matches!(
                validate(&doc),
                Err(ShowlineError::SchemaTypeMismatch { key, .. }) if key == "value"
            ));
        }
    }

    #[test]
    fn rejects_non_object_entries() {
        let doc = document(json!([42]));
        assert!(matches!(
            validate(&doc),
            Err(ShowlineError::SchemaTypeMismatch { key, .. }) if key == "timeline"
        ));
    }
}
