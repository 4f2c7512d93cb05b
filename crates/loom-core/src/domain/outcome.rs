//! Task results and the artifacts they reference.
//!
//! This module is architecture-agnostic: it does not assume a store, a
//! delegate transport or a scheduler. It only defines the "shape" of what a
//! completed task hands back to process logic.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ids::EffectId;
use super::shape::{Shape, ValidationError, Violation, validate};

/// A reference to something produced by a task (file, report, document).
///
/// Immutable once created; the aggregator owns the collected list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Artifact {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            format: None,
            label: None,
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Structural shape of one artifact entry in a reply.
    pub fn shape() -> Shape {
        Shape::object()
            .required("path", Shape::string())
            .optional("format", Shape::string())
            .optional("label", Shape::string())
            .build()
    }
}

/// The validated reply of one task invocation.
///
/// A `TaskResult` can only be built through [`TaskResult::from_reply`], so
/// anything holding one has passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult {
    effect_id: EffectId,
    value: Map<String, Value>,
    artifacts: Vec<Artifact>,
}

impl TaskResult {
    /// Validate a raw reply against `shape` and extract its artifacts.
    ///
    /// - The reply must be a JSON object.
    /// - `artifacts` may be omitted (treated as empty); when present it must
    ///   be an array of `{path, format?, label?}` objects.
    pub fn from_reply(
        effect_id: &EffectId,
        shape: &Shape,
        reply: Value,
    ) -> Result<Self, ValidationError> {
        if !reply.is_object() {
            return Err(not_an_object(effect_id, reply));
        }

        let mut violations = match validate(shape, &reply) {
            Ok(()) => Vec::new(),
            Err(err) => err.violations,
        };

        let artifacts_shape = Shape::array(Artifact::shape());
        if let Some(raw) = reply.get("artifacts")
            && let Err(err) = validate(&artifacts_shape, raw)
        {
            violations.extend(err.violations.into_iter().map(|mut v| {
                v.path = v.path.replacen('$', "$.artifacts", 1);
                v
            }));
        }

        if !violations.is_empty() {
            violations.dedup();
            return Err(ValidationError::new(violations, reply).for_effect(effect_id.clone()));
        }

        let artifacts: Vec<Artifact> = match reply.get("artifacts") {
            Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| {
                ValidationError::new(
                    vec![Violation {
                        path: "$.artifacts".to_string(),
                        expected: "artifact list".to_string(),
                        found: e.to_string(),
                    }],
                    reply.clone(),
                )
                .for_effect(effect_id.clone())
            })?,
            None => Vec::new(),
        };

        match reply {
            Value::Object(value) => Ok(Self {
                effect_id: effect_id.clone(),
                value,
                artifacts,
            }),
            other => Err(not_an_object(effect_id, other)),
        }
    }

    pub fn effect_id(&self) -> &EffectId {
        &self.effect_id
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.value.get(key)
    }

    /// Deserialize one field into a typed value (`None` if absent or mistyped).
    pub fn field<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.value
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Deserialize the whole reply into a typed struct.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.value.clone()))
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.value.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.value)
    }
}

fn not_an_object(effect_id: &EffectId, reply: Value) -> ValidationError {
    let found = match &reply {
        Value::Array(_) => "array",
        Value::String(_) => "string",
        Value::Null => "null",
        _ => "scalar",
    };
    ValidationError::new(
        vec![Violation {
            path: "$".to_string(),
            expected: "object".to_string(),
            found: found.to_string(),
        }],
        reply,
    )
    .for_effect(effect_id.clone())
}
