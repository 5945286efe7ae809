//! Merge strategies ("nuances") and the registry that resolves them.
//!
//! A merge is a pure function `(state, knowledge) -> state`. Peers never
//! exchange code: a write travels with the *name* of a strategy, optionally
//! with a parameter list, and every peer looks the name up in its own
//! [`MergeRegistry`]. The registry therefore has to be the same build
//! artifact on every node that shares a table.
//!
//! Built-in strategies:
//!
//! | name        | parameters     | behaviour                                      |
//! |-------------|----------------|------------------------------------------------|
//! | `overlay`   | none           | shallow overlay of knowledge fields onto state |
//! | `replace`   | none           | state becomes the knowledge                    |
//! | `deep`      | none           | recursive object overlay                       |
//! | `append`    | `[field]`      | push knowledge onto the array at `field`       |
//! | `max`       | none           | numeric fields keep the larger value           |
//! | `increment` | none           | numeric fields are added together              |

use crate::error::MergeError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A resolved, callable merge function.
pub type MergeFn = Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>;

/// A named handler that turns a parameter list into a merge function.
pub type MergeHandler = Arc<dyn Fn(&[Value]) -> Result<MergeFn, MergeError> + Send + Sync>;

pub const OVERLAY: &str = "overlay";
pub const REPLACE: &str = "replace";
pub const DEEP: &str = "deep";
pub const APPEND: &str = "append";
pub const MAX: &str = "max";
pub const INCREMENT: &str = "increment";

/// How a write should be merged into the current state.
#[derive(Clone)]
pub enum Nuance {
    /// A parameterless strategy, by name.
    Named(String),
    /// A handler applied to a parameter list.
    Handler {
        merge_handler: String,
        parameters: Vec<Value>,
    },
    /// A closure that only this process knows about. Usable for local
    /// writes, but never uploaded.
    Local(MergeFn),
}

impl Nuance {
    pub fn named(name: impl Into<String>) -> Self {
        Nuance::Named(name.into())
    }

    pub fn handler(name: impl Into<String>, parameters: Vec<Value>) -> Self {
        Nuance::Handler {
            merge_handler: name.into(),
            parameters,
        }
    }

    pub fn local(merge: impl Fn(&Value, &Value) -> Value + Send + Sync + 'static) -> Self {
        Nuance::Local(Arc::new(merge))
    }

    /// Wire form of this nuance.
    pub fn serialize(&self) -> Result<SerializedMerge, MergeError> {
        match self {
            Nuance::Named(name) => Ok(SerializedMerge::Named(name.clone())),
            Nuance::Handler {
                merge_handler,
                parameters,
            } => Ok(SerializedMerge::Handler {
                merge_handler: merge_handler.clone(),
                parameters: parameters.clone(),
            }),
            Nuance::Local(_) => Err(MergeError::NotSerializable),
        }
    }
}

impl Default for Nuance {
    fn default() -> Self {
        Nuance::Named(OVERLAY.to_string())
    }
}

impl fmt::Debug for Nuance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Nuance::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Nuance::Handler {
                merge_handler,
                parameters,
            } => f
                .debug_struct("Handler")
                .field("merge_handler", merge_handler)
                .field("parameters", parameters)
                .finish(),
            Nuance::Local(_) => f.write_str("Local(<fn>)"),
        }
    }
}

impl From<SerializedMerge> for Nuance {
    fn from(merge: SerializedMerge) -> Self {
        match merge {
            SerializedMerge::Named(name) => Nuance::Named(name),
            SerializedMerge::Handler {
                merge_handler,
                parameters,
            } => Nuance::Handler {
                merge_handler,
                parameters,
            },
        }
    }
}

/// A merge as it travels between peers: either a bare strategy name or a
/// `{ "mergeHandler": name, "parameters": [...] }` object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SerializedMerge {
    Named(String),
    Handler {
        #[serde(rename = "mergeHandler")]
        merge_handler: String,
        #[serde(default)]
        parameters: Vec<Value>,
    },
}

/// Lookup table from strategy name to handler.
pub struct MergeRegistry {
    handlers: HashMap<String, MergeHandler>,
}

impl MergeRegistry {
    /// A registry with no strategies at all.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// A registry preloaded with the built-in strategies.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_fn(OVERLAY, overlay);
        registry.register_fn(REPLACE, |_, knowledge| knowledge.clone());
        registry.register_fn(DEEP, deep);
        registry.register(APPEND, append_handler);
        registry.register_fn(MAX, max);
        registry.register_fn(INCREMENT, increment);
        registry
    }

    /// Register a parameterised handler. Returns the handler it replaced.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: impl Fn(&[Value]) -> Result<MergeFn, MergeError> + Send + Sync + 'static,
    ) -> Option<MergeHandler> {
        self.handlers.insert(name.into(), Arc::new(handler))
    }

    /// Register a strategy that takes no parameters.
    pub fn register_fn(
        &mut self,
        name: impl Into<String>,
        merge: impl Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    ) -> Option<MergeHandler> {
        let name = name.into();
        let merge: MergeFn = Arc::new(merge);
        let strategy = name.clone();
        self.register(name, move |parameters: &[Value]| {
            if parameters.is_empty() {
                Ok(merge.clone())
            } else {
                Err(MergeError::invalid(&strategy, "takes no parameters"))
            }
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered strategy names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Turn a nuance into something callable.
    pub fn resolve(&self, nuance: &Nuance) -> Result<MergeFn, MergeError> {
        match nuance {
            Nuance::Local(merge) => Ok(merge.clone()),
            Nuance::Named(name) => {
                let handler = self.lookup(name)?;
                handler(&[])
            }
            Nuance::Handler {
                merge_handler,
                parameters,
            } => {
                let handler = self.lookup(merge_handler)?;
                handler(parameters)
            }
        }
    }

    fn lookup(&self, name: &str) -> Result<&MergeHandler, MergeError> {
        self.handlers
            .get(name)
            .ok_or_else(|| MergeError::UnknownStrategy(name.to_string()))
    }
}

impl Default for MergeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn fields(value: &Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    }
}

/// Shallow overlay: every top-level field of `knowledge` replaces the field
/// of the same name in `state`. Non-object knowledge contributes nothing.
pub fn overlay(state: &Value, knowledge: &Value) -> Value {
    let mut merged = fields(state);
    if let Value::Object(incoming) = knowledge {
        for (key, value) in incoming {
            merged.insert(key.clone(), value.clone());
        }
    }
    Value::Object(merged)
}

/// Recursive overlay; nested objects are merged instead of replaced.
pub fn deep(state: &Value, knowledge: &Value) -> Value {
    match (state, knowledge) {
        (Value::Object(current), Value::Object(incoming)) => {
            let mut merged = current.clone();
            for (key, value) in incoming {
                let next = match merged.get(key) {
                    Some(existing) => deep(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (_, incoming) => incoming.clone(),
    }
}

fn append_handler(parameters: &[Value]) -> Result<MergeFn, MergeError> {
    let field = match parameters {
        [Value::String(field)] => field.clone(),
        _ => return Err(MergeError::invalid(APPEND, "expected a single field name")),
    };

    Ok(Arc::new(move |state: &Value, knowledge: &Value| {
        let mut merged = fields(state);
        let mut items = match merged.remove(&field) {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other],
        };
        match knowledge {
            Value::Array(more) => items.extend(more.iter().cloned()),
            other => items.push(other.clone()),
        }
        merged.insert(field.clone(), Value::Array(items));
        Value::Object(merged)
    }))
}

fn combine_numbers(
    state: &Value,
    knowledge: &Value,
    combine: impl Fn(&Number, &Number) -> Value,
) -> Value {
    let mut merged = fields(state);
    if let Value::Object(incoming) = knowledge {
        for (key, value) in incoming {
            let next = match (merged.get(key), value) {
                (Some(Value::Number(a)), Value::Number(b)) => combine(a, b),
                _ => value.clone(),
            };
            merged.insert(key.clone(), next);
        }
    }
    Value::Object(merged)
}

/// Numeric fields keep whichever side is larger; everything else overlays.
pub fn max(state: &Value, knowledge: &Value) -> Value {
    combine_numbers(state, knowledge, |a, b| {
        let larger = match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x >= y,
            _ => a.as_f64().unwrap_or(f64::MIN) >= b.as_f64().unwrap_or(f64::MIN),
        };
        Value::Number(if larger { a.clone() } else { b.clone() })
    })
}

/// Numeric fields are summed; everything else overlays.
pub fn increment(state: &Value, knowledge: &Value) -> Value {
    combine_numbers(state, knowledge, |a, b| match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => Value::from(x.saturating_add(y)),
        _ => {
            let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
            Number::from_f64(sum).map_or(Value::Null, Value::Number)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_overlay_keeps_untouched_fields() {
        let merged = overlay(&json!({"a": 1, "b": 1}), &json!({"b": 2, "c": 3}));
        assert_eq!(merged, json!({"a": 1, "b": 2, "c": 3}));
    }

    #[test]
    fn test_overlay_ignores_scalar_knowledge() {
        assert_eq!(overlay(&json!({"a": 1}), &json!(5)), json!({"a": 1}));
        assert_eq!(overlay(&Value::Null, &json!({"a": 1})), json!({"a": 1}));
    }

    #[test]
    fn test_deep_merges_nested_objects() {
        let merged = deep(
            &json!({"ui": {"theme": "dark", "font": "Inter"}}),
            &json!({"ui": {"theme": "light"}}),
        );
        assert_eq!(merged, json!({"ui": {"theme": "light", "font": "Inter"}}));
    }

    #[test]
    fn test_append_with_field_parameter() {
        let registry = MergeRegistry::new();
        let merge = registry
            .resolve(&Nuance::handler(APPEND, vec![json!("messages")]))
            .unwrap();

        let state = merge(&json!({}), &json!("hi"));
        let state = merge(&state, &json!(["there", "friend"]));
        assert_eq!(state, json!({"messages": ["hi", "there", "friend"]}));
    }

    #[test]
    fn test_append_rejects_missing_field() {
        let registry = MergeRegistry::new();
        let err = registry
            .resolve(&Nuance::handler(APPEND, vec![]))
            .err()
            .unwrap();
        assert!(matches!(err, MergeError::InvalidParameters { .. }));
    }

    #[test]
    fn test_max_and_increment() {
        assert_eq!(
            max(&json!({"score": 7, "name": "a"}), &json!({"score": 3, "name": "b"})),
            json!({"score": 7, "name": "b"})
        );
        assert_eq!(
            increment(&json!({"n": 2}), &json!({"n": 3, "m": 1})),
            json!({"n": 5, "m": 1})
        );
        assert_eq!(increment(&json!({"n": 0.5}), &json!({"n": 1})), json!({"n": 1.5}));
    }

    #[test]
    fn test_unknown_strategy() {
        let registry = MergeRegistry::new();
        let err = registry.resolve(&Nuance::named("eval")).err().unwrap();
        assert_eq!(err, MergeError::UnknownStrategy("eval".to_string()));
    }

    #[test]
    fn test_named_strategy_rejects_parameters() {
        let registry = MergeRegistry::new();
        let err = registry
            .resolve(&Nuance::handler(OVERLAY, vec![json!(1)]))
            .err()
            .unwrap();
        assert!(matches!(err, MergeError::InvalidParameters { .. }));
    }

    #[test]
    fn test_serialized_merge_wire_format() {
        let named = Nuance::named(OVERLAY).serialize().unwrap();
        assert_eq!(serde_json::to_value(&named).unwrap(), json!("overlay"));

        let handler = Nuance::handler(APPEND, vec![json!("log")]).serialize().unwrap();
        assert_eq!(
            serde_json::to_value(&handler).unwrap(),
            json!({"mergeHandler": "append", "parameters": ["log"]})
        );

        let parsed: SerializedMerge = serde_json::from_value(json!({"mergeHandler": "max"})).unwrap();
        assert_eq!(
            parsed,
            SerializedMerge::Handler {
                merge_handler: "max".to_string(),
                parameters: vec![],
            }
        );
    }

    #[test]
    fn test_local_merge_is_not_serializable() {
        let nuance = Nuance::local(|_, knowledge| knowledge.clone());
        assert_eq!(nuance.serialize().err(), Some(MergeError::NotSerializable));
    }
}
