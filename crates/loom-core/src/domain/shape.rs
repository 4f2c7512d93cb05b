//! Result shapes: structural schema for delegate replies.
//!
//! A `Shape` is an explicit value (not a convention) describing what a
//! delegate must return. The validator only checks structure: required
//! fields, JSON types, nested objects/arrays and closed string sets.
//! It never coerces a value and never applies domain semantics.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::EffectId;

/// Structural schema value (tagged union).
///
/// Serialized as `{"type": "object", "fields": {...}}` etc. so that shapes can
/// be persisted next to the request they belong to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Shape {
    Any,
    Null,
    Bool,
    Integer,
    Number,
    String {
        /// Closed set of allowed values.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        one_of: Option<Vec<String>>,
    },
    Array {
        items: Box<Shape>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_items: Option<usize>,
    },
    Object(ObjectShape),
    Nullable {
        inner: Box<Shape>,
    },
}

/// Field map of an object shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectShape {
    #[serde(default)]
    pub fields: BTreeMap<String, FieldShape>,

    /// Whether keys not listed in `fields` are accepted.
    #[serde(default = "default_additional")]
    pub additional: bool,
}

fn default_additional() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldShape {
    pub shape: Shape,
    pub required: bool,
}

impl Shape {
    pub fn string() -> Self {
        Shape::String { one_of: None }
    }

    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Shape::String {
            one_of: Some(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn array(items: Shape) -> Self {
        Shape::Array {
            items: Box::new(items),
            min_items: None,
        }
    }

    pub fn non_empty_array(items: Shape) -> Self {
        Shape::Array {
            items: Box::new(items),
            min_items: Some(1),
        }
    }

    pub fn nullable(inner: Shape) -> Self {
        Shape::Nullable {
            inner: Box::new(inner),
        }
    }

    /// Start an open object shape (extra keys allowed).
    pub fn object() -> ObjectShape {
        ObjectShape {
            fields: BTreeMap::new(),
            additional: true,
        }
    }

    /// Short type name used in violation messages.
    fn expected_name(&self) -> String {
        match self {
            Shape::Any => "any".to_string(),
            Shape::Null => "null".to_string(),
            Shape::Bool => "bool".to_string(),
            Shape::Integer => "integer".to_string(),
            Shape::Number => "number".to_string(),
            Shape::String { one_of: None } => "string".to_string(),
            Shape::String { one_of: Some(values) } => format!("one of {values:?}"),
            Shape::Array { .. } => "array".to_string(),
            Shape::Object(_) => "object".to_string(),
            Shape::Nullable { inner } => format!("{} or null", inner.expected_name()),
        }
    }
}

impl ObjectShape {
    pub fn required(mut self, name: impl Into<String>, shape: Shape) -> Self {
        self.fields.insert(
            name.into(),
            FieldShape {
                shape,
                required: true,
            },
        );
        self
    }

    pub fn optional(mut self, name: impl Into<String>, shape: Shape) -> Self {
        self.fields.insert(
            name.into(),
            FieldShape {
                shape,
                required: false,
            },
        );
        self
    }

    /// Reject keys that are not declared.
    pub fn closed(mut self) -> Self {
        self.additional = false;
        self
    }

    pub fn build(self) -> Shape {
        Shape::Object(self)
    }
}

impl From<ObjectShape> for Shape {
    fn from(obj: ObjectShape) -> Self {
        Shape::Object(obj)
    }
}

/// One structural mismatch, located by a JSON path (`$.findings[2].severity`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub path: String,
    pub expected: String,
    pub found: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: expected {}, found {}",
            self.path, self.expected, self.found
        )
    }
}

/// A delegate reply that does not match its declared shape.
///
/// Carries the raw payload so the failure can be diagnosed from the error
/// alone (it is also persisted as `tasks/<effect_id>/error.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub effect_id: Option<EffectId>,
    pub violations: Vec<Violation>,
    pub raw: Value,
}

impl ValidationError {
    pub fn new(violations: Vec<Violation>, raw: Value) -> Self {
        Self {
            effect_id: None,
            violations,
            raw,
        }
    }

    pub fn for_effect(mut self, effect_id: EffectId) -> Self {
        self.effect_id = Some(effect_id);
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.effect_id {
            Some(id) => write!(f, "reply for {id} does not match its result shape")?,
            None => write!(f, "value does not match its shape")?,
        }
        if let Some(first) = self.violations.first() {
            write!(f, ": {first}")?;
            if self.violations.len() > 1 {
                write!(f, " (+{} more)", self.violations.len() - 1)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Validate `value` against `shape`, collecting every violation.
pub fn validate(shape: &Shape, value: &Value) -> Result<(), ValidationError> {
    let mut violations = Vec::new();
    check(shape, value, "$", &mut violations);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new(violations, value.clone()))
    }
}

fn check(shape: &Shape, value: &Value, path: &str, out: &mut Vec<Violation>) {
    let type_ok = match (shape, value) {
        (Shape::Any, _) => true,
        (Shape::Null, Value::Null) => true,
        (Shape::Bool, Value::Bool(_)) => true,
        (Shape::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
        (Shape::Number, Value::Number(_)) => true,
        (Shape::String { one_of }, Value::String(s)) => {
            if let Some(allowed) = one_of
                && !allowed.iter().any(|a| a == s)
            {
                out.push(Violation {
                    path: path.to_string(),
                    expected: shape.expected_name(),
                    found: format!("{s:?}"),
                });
            }
            true
        }
        (Shape::Array { items, min_items }, Value::Array(elements)) => {
            if let Some(min) = min_items
                && elements.len() < *min
            {
                out.push(Violation {
                    path: path.to_string(),
                    expected: format!("at least {min} item(s)"),
                    found: format!("{} item(s)", elements.len()),
                });
            }
            for (i, element) in elements.iter().enumerate() {
                check(items, element, &format!("{path}[{i}]"), out);
            }
            true
        }
        (Shape::Object(obj), Value::Object(map)) => {
            for (name, field) in &obj.fields {
                let field_path = format!("{path}.{name}");
                match map.get(name) {
                    Some(v) => check(&field.shape, v, &field_path, out),
                    None if field.required => out.push(Violation {
                        path: field_path,
                        expected: field.shape.expected_name(),
                        found: "missing".to_string(),
                    }),
                    None => {}
                }
            }
            if !obj.additional {
                for key in map.keys().filter(|k| !obj.fields.contains_key(*k)) {
                    out.push(Violation {
                        path: format!("{path}.{key}"),
                        expected: "no such field".to_string(),
                        found: json_type(&map[key]).to_string(),
                    });
                }
            }
            true
        }
        (Shape::Nullable { .. }, Value::Null) => true,
        (Shape::Nullable { inner }, other) => {
            check(inner, other, path, out);
            true
        }
        _ => false,
    };

    if !type_ok {
        out.push(Violation {
            path: path.to_string(),
            expected: shape.expected_name(),
            found: json_type(value).to_string(),
        });
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn audit_shape() -> Shape {
        Shape::object()
            .required("summary", Shape::string())
            .required(
                "findings",
                Shape::array(
                    Shape::object()
                        .required("id", Shape::string())
                        .required("severity", Shape::one_of(["critical", "high", "low"]))
                        .optional("line", Shape::Integer)
                        .build(),
                ),
            )
            .optional("score", Shape::Number)
            .build()
    }

    fn conforming() -> Value {
        json!({
            "summary": "2 findings",
            "findings": [
                {"id": "F-1", "severity": "critical", "line": 12},
                {"id": "F-2", "severity": "low"}
            ],
            "score": 7.5,
            "extra": true
        })
    }

    #[test]
    fn conforming_value_validates() {
        assert!(validate(&audit_shape(), &conforming()).is_ok());
    }

    #[rstest]
    #[case::missing_required("/summary", None, "$.summary", "missing")]
    #[case::wrong_type("/summary", Some(json!(3)), "$.summary", "integer")]
    #[case::nested_wrong_type("/findings/1/id", Some(json!(false)), "$.findings[1].id", "bool")]
    #[case::float_is_not_integer("/findings/0/line", Some(json!(1.5)), "$.findings[0].line", "number")]
    #[case::closed_string_set("/findings/0/severity", Some(json!("meh")), "$.findings[0].severity", "\"meh\"")]
    fn broken_value_is_rejected(
        #[case] pointer: &str,
        #[case] replacement: Option<Value>,
        #[case] path: &str,
        #[case] found: &str,
    ) {
        let mut value = conforming();
        match replacement {
            Some(v) => *value.pointer_mut(pointer).unwrap() = v,
            None => {
                let key = pointer.trim_start_matches('/');
                value.as_object_mut().unwrap().remove(key);
            }
        }

        let err = validate(&audit_shape(), &value).unwrap_err();
        assert_eq!(err.violations.len(), 1, "{:?}", err.violations);
        assert_eq!(err.violations[0].path, path);
        assert_eq!(err.violations[0].found, found);
        assert_eq!(err.raw, value);
    }

    #[test]
    fn all_violations_are_collected() {
        let err = validate(&audit_shape(), &json!({"findings": "none"})).unwrap_err();
        let paths: Vec<_> = err.violations.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(paths, vec!["$.findings", "$.summary"]);
        assert!(err.to_string().contains("(+1 more)"));
    }

    #[test]
    fn closed_object_rejects_unknown_keys() {
        let shape = Shape::object().required("a", Shape::Bool).closed().build();
        let err = validate(&shape, &json!({"a": true, "b": 1})).unwrap_err();
        assert_eq!(err.violations[0].path, "$.b");
    }

    #[test]
    fn nullable_and_min_items() {
        let shape = Shape::object()
            .required("note", Shape::nullable(Shape::string()))
            .required("tags", Shape::non_empty_array(Shape::string()))
            .build();
        assert!(validate(&shape, &json!({"note": null, "tags": ["x"]})).is_ok());
        let err = validate(&shape, &json!({"note": 1, "tags": []})).unwrap_err();
        assert_eq!(err.violations.len(), 2);
    }

    #[test]
    fn shape_is_a_tagged_union_on_the_wire() {
        let v = serde_json::to_value(audit_shape()).unwrap();
        assert_eq!(v["type"], "object");
        assert_eq!(v["fields"]["summary"]["shape"]["type"], "string");
        assert_eq!(v["fields"]["summary"]["required"], true);
        let back: Shape = serde_json::from_value(v).unwrap();
        assert_eq!(back, audit_shape());
    }
}
