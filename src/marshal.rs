//! Canonical serialization of call arguments and results.
//!
//! Values pass through `serde_json::Value` and object keys are sorted at
//! every depth, so logically identical values always produce the same string.
//! That string is what call cache keys are built from.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SerializationError;

/// Convert any serializable value to its canonical JSON value.
pub fn to_canonical_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, serde_json::Error> {
    serde_json::to_value(value).map(canonicalize)
}

/// Serialize a value to its canonical string.
pub fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<String, SerializationError> {
    encode(value, "value")
}

fn encode<T: Serialize + ?Sized>(value: &T, label: &str) -> Result<String, SerializationError> {
    to_canonical_value(value)
        .map(|v| v.to_string())
        .map_err(|e| SerializationError::Argument {
            argument: label.to_string(),
            reason: e.to_string(),
        })
}

/// Decode a canonical string into `T`.
pub fn deserialize<T: DeserializeOwned>(canonical: &str) -> Result<T, SerializationError> {
    serde_json::from_str(canonical).map_err(|e| SerializationError::Decode {
        type_name: std::any::type_name::<T>(),
        reason: e.to_string(),
    })
}

/// Decode an already parsed JSON value into `T`.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, SerializationError> {
    serde_json::from_value(value).map_err(|e| SerializationError::Decode {
        type_name: std::any::type_name::<T>(),
        reason: e.to_string(),
    })
}

/// Canonical string for a call's arguments. Used as the argument part of the
/// call cache key.
///
/// A failure names the argument as `args`. Build the arguments with
/// [`CallArgs`] to get the position or keyword of the offending value.
pub fn serialize_args<A: Serialize + ?Sized>(args: &A) -> Result<String, SerializationError> {
    encode(args, "args")
}

/// Canonical result value for a definition's return.
pub(crate) fn serialize_result<R: Serialize>(
    definition: &str,
    result: &R,
) -> Result<Value, SerializationError> {
    to_canonical_value(result).map_err(|e| SerializationError::Result {
        definition: definition.to_string(),
        reason: e.to_string(),
    })
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
            Value::Object(sorted.into_iter().collect::<Map<String, Value>>())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Positional and keyword arguments for a call.
///
/// Serializes as `{"args":[...],"kwargs":{...}}`. Keyword arguments are kept
/// sorted by name, so the order in which they were added never changes the
/// cache key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallArgs {
    args: Vec<Value>,
    kwargs: BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg<T: Serialize>(mut self, value: T) -> Result<Self, SerializationError> {
        let position = self.args.len();
        let value = to_canonical_value(&value).map_err(|e| SerializationError::Argument {
            argument: format!("args[{}]", position),
            reason: e.to_string(),
        })?;
        self.args.push(value);
        Ok(self)
    }

    /// Set a keyword argument.
    pub fn kwarg<T: Serialize>(
        mut self,
        name: impl Into<String>,
        value: T,
    ) -> Result<Self, SerializationError> {
        let name = name.into();
        let value = to_canonical_value(&value).map_err(|e| SerializationError::Argument {
            argument: name.clone(),
            reason: e.to_string(),
        })?;
        self.kwargs.insert(name, value);
        Ok(self)
    }

    pub fn positional(&self) -> &[Value] {
        &self.args
    }

    pub fn keywords(&self) -> &BTreeMap<String, Value> {
        &self.kwargs
    }

    /// Decode the positional argument at `index`.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Option<Result<T, SerializationError>> {
        self.args.get(index).cloned().map(from_value)
    }

    /// Decode the keyword argument `name`.
    pub fn get_kwarg<T: DeserializeOwned>(
        &self,
        name: &str,
    ) -> Option<Result<T, SerializationError>> {
        self.kwargs.get(name).cloned().map(from_value)
    }
}

/// Compiled JSON schema attached to a definition's return value.
#[derive(Clone)]
pub(crate) struct ReturnSchema {
    schema: Value,
    validator: Arc<jsonschema::Validator>,
}

impl ReturnSchema {
    pub(crate) fn compile(schema: Value) -> Result<Self, String> {
        let validator = jsonschema::validator_for(&schema).map_err(|e| e.to_string())?;
        Ok(Self {
            schema,
            validator: Arc::new(validator),
        })
    }

    pub(crate) fn schema(&self) -> &Value {
        &self.schema
    }

    pub(crate) fn validate(&self, definition: &str, value: &Value) -> Result<(), SerializationError> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(value)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SerializationError::Schema {
                definition: definition.to_string(),
                reason: errors.join("; "),
            })
        }
    }
}

impl fmt::Debug for ReturnSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReturnSchema").field(&self.schema).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Inner {
        key200: HashMap<String, i64>,
        key100: i64,
    }

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Outer {
        xyz: Inner,
        abc: HashMap<String, i64>,
        middle: Vec<String>,
    }

    fn outer() -> Outer {
        Outer {
            xyz: Inner {
                key200: HashMap::from([("x".to_string(), 99), ("a".to_string(), 50)]),
                key100: 100,
            },
            abc: HashMap::from([("x".to_string(), 2000), ("a".to_string(), 3000)]),
            middle: vec!["a".into(), "b".into(), "c".into()],
        }
    }

    #[test]
    fn call_args_basic() {
        let args = CallArgs::new().arg(1).unwrap().arg(2).unwrap().arg(3).unwrap();
        assert_eq!(
            serialize_args(&args).unwrap(),
            r#"{"args":[1,2,3],"kwargs":{}}"#
        );

        let args = args
            .kwarg("c", 6)
            .unwrap()
            .kwarg("a", 4)
            .unwrap()
            .kwarg("b", 5)
            .unwrap()
            .kwarg("d", vec![7, 8, 9])
            .unwrap();
        assert_eq!(
            serialize_args(&args).unwrap(),
            r#"{"args":[1,2,3],"kwargs":{"a":4,"b":5,"c":6,"d":[7,8,9]}}"#
        );
    }

    #[test]
    fn nested_records_sorted() {
        let args = CallArgs::new()
            .arg(outer())
            .unwrap()
            .arg("something_else")
            .unwrap()
            .kwarg("foo", "bar")
            .unwrap();
        assert_eq!(
            serialize_args(&args).unwrap(),
            r#"{"args":[{"abc":{"a":3000,"x":2000},"middle":["a","b","c"],"xyz":{"key100":100,"key200":{"a":50,"x":99}}},"something_else"],"kwargs":{"foo":"bar"}}"#
        );
    }

    #[test]
    fn map_key_order_ignored() {
        let a = CallArgs::new()
            .arg(json!({"b": 200, "a": 100}))
            .unwrap()
            .kwarg("x", 50)
            .unwrap()
            .kwarg("a", 4)
            .unwrap();
        let b = CallArgs::new()
            .arg(json!({"a": 100, "b": 200}))
            .unwrap()
            .kwarg("a", 4)
            .unwrap()
            .kwarg("x", 50)
            .unwrap();
        assert_eq!(serialize_args(&a).unwrap(), serialize_args(&b).unwrap());
        assert_eq!(
            serialize_args(&a).unwrap(),
            r#"{"args":[{"a":100,"b":200}],"kwargs":{"a":4,"x":50}}"#
        );
    }

    #[test]
    fn non_string_map_keys_rejected() {
        let bad: HashMap<(i32, i32), i32> = HashMap::from([((1, 2), 3)]);
        let err = CallArgs::new()
            .arg(1)
            .unwrap()
            .kwarg("grid", bad)
            .unwrap_err();
        match err {
            SerializationError::Argument { argument, .. } => assert_eq!(argument, "grid"),
            other => panic!("unexpected error: {other}"),
        }

        let bad: HashMap<(i32, i32), i32> = HashMap::from([((1, 2), 3)]);
        let err = CallArgs::new().arg(bad).unwrap_err();
        assert!(err.to_string().contains("args[0]"));
    }

    #[test]
    fn record_round_trip() {
        let s = serialize(&outer()).unwrap();
        let back: Outer = deserialize(&s).unwrap();
        assert_eq!(back, outer());
    }

    #[test]
    fn decode_failure_names_type() {
        let err = deserialize::<Outer>(r#"{"nope":1}"#).unwrap_err();
        assert!(err.to_string().contains("Outer"));
    }

    #[test]
    fn schema_validation() {
        let schema = ReturnSchema::compile(json!({
            "type": "object",
            "required": ["val"],
            "properties": { "val": { "type": "integer" } }
        }))
        .unwrap();
        assert!(schema.validate("s", &json!({"val": 3})).is_ok());
        let err = schema.validate("s", &json!({"val": "x"})).unwrap_err();
        assert!(matches!(err, SerializationError::Schema { .. }));
    }
}
