//! Value Model Module
//!
//! Defines the set of values the cache can persist and the registry used to
//! rebuild typed objects on decode.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CacheError, Result};

/// Field name -> value map used by maps and typed objects.
pub type Fields = BTreeMap<String, Value>;

/// Class name of an untyped object; never resolved through the registry.
pub const GENERIC_OBJECT_CLASS: &str = "Object";

// == Value ==
/// A value the codec can represent.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(Fields),
    /// A named structure with its public fields
    Object { class: String, fields: Fields },
}

impl Value {
    // == Constructors ==
    /// Converts any serde-serializable value into the cache model.
    ///
    /// Fails with `UnsupportedValueKind` for nulls, unsigned integers above
    /// `i64::MAX` and non-finite floats.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Self::from_json(serde_json::to_value(value)?)
    }

    /// Builds a typed object from a serializable struct.
    pub fn typed<T: Serialize + ?Sized>(class: impl Into<String>, value: &T) -> Result<Self> {
        match Self::from_serialize(value)? {
            Value::Map(fields) => Ok(Value::Object {
                class: class.into(),
                fields,
            }),
            other => Err(CacheError::UnsupportedValueKind(format!(
                "typed object must serialize to a map, got {}",
                other.kind()
            ))),
        }
    }

    /// Converts a JSON document into the cache model.
    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        use serde_json::Value as Json;

        match json {
            Json::Null => Err(CacheError::UnsupportedValueKind("null".to_string())),
            Json::Bool(b) => Ok(Value::Bool(b)),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else if n.is_u64() {
                    Err(CacheError::UnsupportedValueKind(format!(
                        "integer {} exceeds i64 range",
                        n
                    )))
                } else {
                    n.as_f64().map(Value::Float).ok_or_else(|| {
                        CacheError::UnsupportedValueKind(format!("number {}", n))
                    })
                }
            }
            Json::String(s) => Ok(Value::Str(s)),
            Json::Array(items) => items
                .into_iter()
                .map(Self::from_json)
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            Json::Object(map) => map
                .into_iter()
                .map(|(k, v)| Self::from_json(v).map(|v| (k, v)))
                .collect::<Result<Fields>>()
                .map(Value::Map),
        }
    }

    // == Conversions ==
    /// Converts back to JSON. Typed objects lose their class name.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        use serde_json::Value as Json;

        Ok(match self {
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .ok_or_else(|| CacheError::UnsupportedValueKind(format!("float {}", f)))?,
            Value::Str(s) => Json::String(s.clone()),
            Value::List(items) => Json::Array(
                items
                    .iter()
                    .map(Value::to_json)
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Map(fields) | Value::Object { fields, .. } => Json::Object(
                fields
                    .iter()
                    .map(|(k, v)| v.to_json().map(|v| (k.clone(), v)))
                    .collect::<Result<serde_json::Map<_, _>>>()?,
            ),
        })
    }

    /// Deserializes this value into a Rust type.
    pub fn deserialize_into<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.to_json()?)?)
    }

    /// Short name of the variant, used in messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "double",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Object { .. } => "object",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl From<Fields> for Value {
    fn from(v: Fields) -> Self {
        Value::Map(v)
    }
}

// == Type Registry ==
type Populate = Box<dyn Fn(&Fields) -> Option<Fields> + Send + Sync>;

/// Explicit mapping from class name to a field-population function.
///
/// A populate function receives the decoded fields and returns the fields of
/// a freshly built instance, or `None` when the data cannot describe one.
#[derive(Default)]
pub struct TypeRegistry {
    types: HashMap<String, Populate>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a serde type under `class`.
    ///
    /// Population starts from `T::default()`, copies every known field that
    /// is present and ignores unknown ones. `T::default()` must serialize
    /// without nulls.
    pub fn register<T>(&mut self, class: impl Into<String>) -> &mut Self
    where
        T: Default + Serialize + DeserializeOwned + 'static,
    {
        self.register_with(class, |incoming| {
            let mut fields = match Value::from_serialize(&T::default()).ok()? {
                Value::Map(fields) => fields,
                _ => return None,
            };
            for (name, slot) in fields.iter_mut() {
                if let Some(value) = incoming.get(name) {
                    *slot = value.clone();
                }
            }
            let instance: T = Value::Map(fields).deserialize_into().ok()?;
            match Value::from_serialize(&instance).ok()? {
                Value::Map(fields) => Some(fields),
                _ => None,
            }
        })
    }

    /// Registers an arbitrary population function under `class`.
    pub fn register_with<F>(&mut self, class: impl Into<String>, populate: F) -> &mut Self
    where
        F: Fn(&Fields) -> Option<Fields> + Send + Sync + 'static,
    {
        self.types.insert(class.into(), Box::new(populate));
        self
    }

    pub fn contains(&self, class: &str) -> bool {
        self.types.contains_key(class)
    }

    /// Rebuilds the fields of `class`, or `None` if the class is empty,
    /// generic, unregistered, or rejects the data.
    pub fn populate(&self, class: &str, fields: &Fields) -> Option<Fields> {
        if class.is_empty() || class == GENERIC_OBJECT_CLASS {
            return None;
        }
        self.types.get(class).and_then(|populate| populate(fields))
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.types.keys().collect();
        names.sort();
        f.debug_struct("TypeRegistry").field("types", &names).finish()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Point {
        x: i64,
        y: i64,
        label: String,
    }

    #[test]
    fn test_from_serialize_struct_becomes_map() {
        let p = Point {
            x: 1,
            y: 2,
            label: "a".to_string(),
        };
        let value = Value::from_serialize(&p).unwrap();
        let Value::Map(fields) = value else {
            panic!("expected map");
        };
        assert_eq!(fields.get("x"), Some(&Value::Int(1)));
        assert_eq!(fields.get("label"), Some(&Value::Str("a".to_string())));
    }

    #[test]
    fn test_from_serialize_rejects_null() {
        let result = Value::from_serialize(&Option::<i32>::None);
        assert!(matches!(result, Err(CacheError::UnsupportedValueKind(_))));
    }

    #[test]
    fn test_from_serialize_rejects_large_unsigned() {
        let result = Value::from_serialize(&u64::MAX);
        assert!(matches!(result, Err(CacheError::UnsupportedValueKind(_))));
    }

    #[test]
    fn test_from_serialize_rejects_nan() {
        // serde_json maps NaN to null
        let result = Value::from_serialize(&f64::NAN);
        assert!(matches!(result, Err(CacheError::UnsupportedValueKind(_))));
    }

    #[test]
    fn test_typed_and_deserialize_into() {
        let p = Point {
            x: 3,
            y: 4,
            label: "p".to_string(),
        };
        let value = Value::typed("Point", &p).unwrap();
        assert!(matches!(&value, Value::Object { class, .. } if class == "Point"));
        let back: Point = value.deserialize_into().unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn test_typed_rejects_scalar() {
        let result = Value::typed("Num", &5);
        assert!(matches!(result, Err(CacheError::UnsupportedValueKind(_))));
    }

    #[test]
    fn test_registry_populates_defaults_and_ignores_extras() {
        let mut registry = TypeRegistry::new();
        registry.register::<Point>("Point");

        let mut incoming = Fields::new();
        incoming.insert("x".to_string(), Value::Int(7));
        incoming.insert("extra".to_string(), Value::Bool(true));

        let fields = registry.populate("Point", &incoming).unwrap();
        assert_eq!(fields.get("x"), Some(&Value::Int(7)));
        assert_eq!(fields.get("y"), Some(&Value::Int(0)));
        assert_eq!(fields.get("label"), Some(&Value::Str(String::new())));
        assert!(!fields.contains_key("extra"));
    }

    #[test]
    fn test_registry_rejects_mistyped_field() {
        let mut registry = TypeRegistry::new();
        registry.register::<Point>("Point");

        let mut incoming = Fields::new();
        incoming.insert("x".to_string(), Value::Str("nope".to_string()));
        assert!(registry.populate("Point", &incoming).is_none());
    }

    #[test]
    fn test_registry_unknown_and_generic_classes() {
        let mut registry = TypeRegistry::new();
        registry.register_with(GENERIC_OBJECT_CLASS, |f| Some(f.clone()));
        assert!(registry.populate("Missing", &Fields::new()).is_none());
        assert!(registry.populate("", &Fields::new()).is_none());
        assert!(registry.populate(GENERIC_OBJECT_CLASS, &Fields::new()).is_none());
    }

    #[test]
    fn test_to_json_rejects_infinite_float() {
        assert!(Value::Float(f64::INFINITY).to_json().is_err());
    }
}
