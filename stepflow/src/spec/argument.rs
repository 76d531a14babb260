//! Argument values: literals, references to other steps, and nested structures.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::SpecValidationError;

/// A reference to another step's result, optionally narrowed to a sub-field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepRef {
    /// Name of the referenced step.
    pub step: String,
    /// Accessor into the referenced result.
    ///
    /// A value starting with `/` is a JSON Pointer (`/metrics/accuracy`);
    /// anything else names a top-level key.
    pub field: Option<String>,
}

impl StepRef {
    /// Creates a reference to a whole step result.
    #[must_use]
    pub fn new(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            field: None,
        }
    }

    /// Narrows the reference to a sub-field.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Applies the accessor to a materialized result.
    ///
    /// Returns `None` if the field does not exist.
    #[must_use]
    pub fn select<'a>(&self, value: &'a serde_json::Value) -> Option<&'a serde_json::Value> {
        match self.field.as_deref() {
            None => Some(value),
            Some(pointer) if pointer.starts_with('/') => value.pointer(pointer),
            Some(key) => value.get(key),
        }
    }
}

impl fmt::Display for StepRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "ref({}:{})", self.step, field),
            None => write!(f, "ref({})", self.step),
        }
    }
}

/// The value of a step argument.
///
/// Literals and references may be nested freely inside sequences and
/// mappings. In JSON form, an object whose only keys are `"ref"` and
/// optionally `"field"` (both strings) is a reference; every other value is a
/// literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub enum ArgumentValue {
    /// The null literal.
    Null,
    /// A boolean literal.
    Bool(bool),
    /// A signed integer literal.
    Integer(i64),
    /// A floating point literal. Must be finite.
    Float(f64),
    /// A string literal.
    String(String),
    /// A reference to another step's result.
    Reference(StepRef),
    /// An ordered sequence.
    Sequence(Vec<ArgumentValue>),
    /// A mapping; key order is irrelevant.
    Mapping(BTreeMap<String, ArgumentValue>),
}

impl ArgumentValue {
    /// Creates a reference to a step's whole result.
    #[must_use]
    pub fn reference(step: impl Into<String>) -> Self {
        Self::Reference(StepRef::new(step))
    }

    /// Creates a reference to a sub-field of a step's result.
    #[must_use]
    pub fn reference_field(step: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Reference(StepRef::new(step).with_field(field))
    }

    /// Returns true if the value contains no references.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs.is_empty()
    }

    /// Collects every reference in depth-first declaration order.
    pub fn collect_references<'a>(&'a self, out: &mut Vec<&'a StepRef>) {
        match self {
            Self::Reference(r) => out.push(r),
            Self::Sequence(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Self::Mapping(map) => {
                for value in map.values() {
                    value.collect_references(out);
                }
            }
            Self::Null | Self::Bool(_) | Self::Integer(_) | Self::Float(_) | Self::String(_) => {}
        }
    }

    /// Checks that the value can be canonicalized.
    ///
    /// # Errors
    ///
    /// Returns an error for non-finite floats.
    pub fn validate(&self, path: &str) -> Result<(), SpecValidationError> {
        match self {
            Self::Float(f) if !f.is_finite() => Err(SpecValidationError::new(format!(
                "Argument '{path}' is a non-finite float ({f})"
            ))),
            Self::Sequence(items) => items
                .iter()
                .enumerate()
                .try_for_each(|(i, item)| item.validate(&format!("{path}[{i}]"))),
            Self::Mapping(map) => map
                .iter()
                .try_for_each(|(k, v)| v.validate(&format!("{path}.{k}"))),
            _ => Ok(()),
        }
    }

    /// Substitutes every reference with a concrete value.
    ///
    /// This is the execution half of the identifier/value split: identifiers
    /// are computed over references, bodies receive values.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `resolve`.
    pub fn materialize<E, F>(&self, resolve: &mut F) -> Result<serde_json::Value, E>
    where
        F: FnMut(&StepRef) -> Result<serde_json::Value, E>,
    {
        Ok(match self {
            Self::Reference(r) => resolve(r)?,
            Self::Sequence(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|item| item.materialize(resolve))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Mapping(map) => {
                let mut out = serde_json::Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), v.materialize(resolve)?);
                }
                serde_json::Value::Object(out)
            }
            literal => serde_json::Value::from(literal.clone()),
        })
    }

    fn reference_from_object(map: &serde_json::Map<String, serde_json::Value>) -> Option<StepRef> {
        let step = map.get("ref")?.as_str()?;
        if map.keys().any(|k| k != "ref" && k != "field") {
            return None;
        }
        let mut r = StepRef::new(step);
        if let Some(field) = map.get("field") {
            r = r.with_field(field.as_str()?);
        }
        Some(r)
    }
}

impl TryFrom<serde_json::Value> for ArgumentValue {
    type Error = SpecValidationError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value;

        Ok(match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Integer(i)
                } else if n.is_u64() {
                    return Err(SpecValidationError::new(format!(
                        "Integer argument {n} does not fit in a signed 64-bit value"
                    )));
                } else {
                    match n.as_f64() {
                        Some(f) if f.is_finite() => Self::Float(f),
                        _ => {
                            return Err(SpecValidationError::new(format!(
                                "Unsupported numeric argument {n}"
                            )))
                        }
                    }
                }
            }
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Sequence(
                items
                    .into_iter()
                    .map(Self::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => {
                if let Some(r) = Self::reference_from_object(&map) {
                    Self::Reference(r)
                } else {
                    Self::Mapping(
                        map.into_iter()
                            .map(|(k, v)| Self::try_from(v).map(|v| (k, v)))
                            .collect::<Result<_, _>>()?,
                    )
                }
            }
        })
    }
}

impl From<ArgumentValue> for serde_json::Value {
    fn from(value: ArgumentValue) -> Self {
        match value {
            ArgumentValue::Null => Self::Null,
            ArgumentValue::Bool(b) => Self::Bool(b),
            ArgumentValue::Integer(i) => Self::from(i),
            ArgumentValue::Float(f) => serde_json::Number::from_f64(f).map_or(Self::Null, Self::Number),
            ArgumentValue::String(s) => Self::String(s),
            ArgumentValue::Reference(r) => {
                let mut map = serde_json::Map::new();
                map.insert("ref".to_string(), Self::String(r.step));
                if let Some(field) = r.field {
                    map.insert("field".to_string(), Self::String(field));
                }
                Self::Object(map)
            }
            ArgumentValue::Sequence(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            ArgumentValue::Mapping(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<bool> for ArgumentValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ArgumentValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for ArgumentValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for ArgumentValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ArgumentValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ArgumentValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<StepRef> for ArgumentValue {
    fn from(value: StepRef) -> Self {
        Self::Reference(value)
    }
}

impl<T: Into<ArgumentValue>> From<Vec<T>> for ArgumentValue {
    fn from(value: Vec<T>) -> Self {
        Self::Sequence(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<ArgumentValue>> From<BTreeMap<String, T>> for ArgumentValue {
    fn from(value: BTreeMap<String, T>) -> Self {
        Self::Mapping(value.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_reference_from_json() {
        let value = ArgumentValue::try_from(json!({"ref": "tokenize"})).unwrap();
        assert_eq!(value, ArgumentValue::reference("tokenize"));

        let value = ArgumentValue::try_from(json!({"ref": "eval", "field": "/metrics/f1"})).unwrap();
        assert_eq!(value, ArgumentValue::reference_field("eval", "/metrics/f1"));
    }

    #[test]
    fn test_object_with_extra_keys_is_mapping() {
        let value = ArgumentValue::try_from(json!({"ref": "a", "other": 1})).unwrap();
        assert!(matches!(value, ArgumentValue::Mapping(_)));
        assert!(value.is_literal());
    }

    #[test]
    fn test_nested_references_collected_in_order() {
        let value = ArgumentValue::try_from(json!({
            "inputs": [{"ref": "a"}, 3, {"ref": "b", "field": "rows"}],
            "model": {"ref": "c"}
        }))
        .unwrap();

        let mut refs = Vec::new();
        value.collect_references(&mut refs);
        let names: Vec<&str> = refs.iter().map(|r| r.step.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_u64_out_of_range_rejected() {
        let err = ArgumentValue::try_from(json!(u64::MAX)).unwrap_err();
        assert!(err.message.contains("signed 64-bit"));
    }

    #[test]
    fn test_non_finite_float_fails_validation() {
        let value = ArgumentValue::Sequence(vec![ArgumentValue::Float(f64::NAN)]);
        let err = value.validate("xs").unwrap_err();
        assert!(err.message.contains("xs[0]"));
    }

    #[test]
    fn test_materialize_substitutes_references() {
        let value = ArgumentValue::try_from(json!({
            "data": {"ref": "load", "field": "rows"},
            "scale": 2
        }))
        .unwrap();

        let upstream = json!({"rows": [1, 2, 3]});
        let resolved: Result<_, String> = value.materialize(&mut |r: &StepRef| {
            r.select(&upstream).cloned().ok_or_else(|| "missing".to_string())
        });

        assert_eq!(resolved.unwrap(), json!({"data": [1, 2, 3], "scale": 2}));
    }

    #[test]
    fn test_select_field_accessors() {
        let value = json!({"metrics": {"acc": 0.9}, "n": 3});
        assert_eq!(StepRef::new("x").with_field("n").select(&value), Some(&json!(3)));
        assert_eq!(
            StepRef::new("x").with_field("/metrics/acc").select(&value),
            Some(&json!(0.9))
        );
        assert_eq!(StepRef::new("x").with_field("missing").select(&value), None);
    }

    #[test]
    fn test_json_roundtrip_keeps_reference_shape() {
        let original = json!({"a": {"ref": "s", "field": "k"}, "b": [1, 2.5, "x", null, true]});
        let value = ArgumentValue::try_from(original.clone()).unwrap();
        assert_eq!(serde_json::Value::from(value), original);
    }
}
