//! Values flowing into and out of an operation call.

// Internal imports (std, crate)
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::binding::filter::FilterExpression;
use crate::{Error, Result};

// External imports (alphabetized)
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Controller instance produced by an activator.
pub type ControllerInstance = Arc<dyn Any + Send + Sync>;

/// Callable body of an operation: receives the controller instance and the
/// bound arguments.
pub type Handler = Arc<dyn Fn(&(dyn Any + Send + Sync), &Arguments) -> Result<Output> + Send + Sync>;

/// One bound argument value.
#[derive(Clone, Debug, PartialEq)]
pub enum BoundValue {
    Json(JsonValue),
    Filter(FilterExpression),
}

/// Arguments bound for one call, in declaration order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Arguments {
    values: Vec<(String, BoundValue)>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value, replacing an earlier one with the same name.
    pub fn insert<S: Into<String>>(&mut self, name: S, value: BoundValue) {
        let name = name.into();
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name, value)),
        }
    }

    pub fn with<S: Into<String>>(mut self, name: S, value: JsonValue) -> Self {
        self.insert(name, BoundValue::Json(value));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.iter().any(|(n, _)| n == name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BoundValue)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Raw JSON value of an argument.
    pub fn value(&self, name: &str) -> Option<&JsonValue> {
        self.iter().find_map(|(n, v)| match v {
            BoundValue::Json(value) if n == name => Some(value),
            _ => None,
        })
    }

    /// Filter predicate of an argument.
    pub fn filter(&self, name: &str) -> Option<&FilterExpression> {
        self.iter().find_map(|(n, v)| match v {
            BoundValue::Filter(filter) if n == name => Some(filter),
            _ => None,
        })
    }

    /// Deserialize an argument into a concrete type.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self
            .value(name)
            .ok_or_else(|| Error::binding(name, "no value was bound"))?;
        serde_json::from_value(value.clone())
            .map_err(|e| Error::binding(name, format!("unexpected value {value}: {e}")))
    }

    /// JSON object view; filters are rendered as their source text.
    pub fn to_json(&self) -> JsonValue {
        let map: JsonMap<String, JsonValue> = self
            .values
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    BoundValue::Json(json) => json.clone(),
                    BoundValue::Filter(filter) => JsonValue::String(filter.to_string()),
                };
                (name.clone(), value)
            })
            .collect();
        JsonValue::Object(map)
    }
}

/// What an operation produced: its return value and named outputs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Output {
    pub value: Option<JsonValue>,
    pub outputs: BTreeMap<String, JsonValue>,
}

impl Output {
    /// No return value.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn json(value: JsonValue) -> Self {
        Self {
            value: Some(value),
            outputs: BTreeMap::new(),
        }
    }

    pub fn value<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::json(serde_json::to_value(value)?))
    }

    pub fn with_output<S: Into<String>>(mut self, name: S, value: JsonValue) -> Self {
        self.outputs.insert(name.into(), value);
        self
    }

    pub fn output(&self, name: &str) -> Option<&JsonValue> {
        self.outputs.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_deserializes_bound_value() -> Result<()> {
        let args = Arguments::new().with("input", json!(42)).with("tags", json!(["a"]));
        let input: i64 = args.get("input")?;
        let tags: Vec<String> = args.get("tags")?;
        assert_eq!(input, 42);
        assert_eq!(tags, vec!["a".to_string()]);
        assert!(args.get::<i64>("missing").is_err());
        assert!(args.get::<i64>("tags").is_err());
        Ok(())
    }

    #[test]
    fn test_insert_replaces_by_name() {
        let mut args = Arguments::new().with("x", json!(1));
        args.insert("x", BoundValue::Json(json!(2)));
        assert_eq!(args.len(), 1);
        assert_eq!(args.to_json(), json!({"x": 2}));
    }
}
