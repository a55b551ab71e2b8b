//! Value type descriptors and the class catalog.
//!
//! Types are described once at composition time instead of being discovered
//! at request time. Classes are referenced by name so that recursive domain
//! types (a `Person` with `friends: [Person]`) need no cyclic pointers.

// Internal imports (std, crate)
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::{Error, Result};

// External imports (alphabetized)
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

/// Static type of a parameter, property or return value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TypeInfo {
    Unit,
    Boolean,
    Integer,
    Number,
    String,
    Collection(Box<TypeInfo>),
    /// A declared class, by name.
    Class(String),
    /// A boolean predicate over instances of the named class.
    Filter(String),
}

impl TypeInfo {
    pub fn collection_of(item: TypeInfo) -> Self {
        Self::Collection(Box::new(item))
    }

    pub fn class<S: Into<String>>(name: S) -> Self {
        Self::Class(name.into())
    }

    pub fn filter<S: Into<String>>(name: S) -> Self {
        Self::Filter(name.into())
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Self::Boolean | Self::Integer | Self::Number | Self::String
        )
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, Self::Collection(_))
    }

    /// Item type of a collection, or the type itself.
    pub fn item_type(&self) -> &TypeInfo {
        match self {
            Self::Collection(item) => item.item_type(),
            other => other,
        }
    }

    /// Whether values of this type need a structured representation.
    pub fn requires_structure(&self) -> bool {
        matches!(self.item_type(), Self::Class(_))
    }

    /// Name of the class this type refers to, through collections and filters.
    pub fn class_name(&self) -> Option<&str> {
        match self.item_type() {
            Self::Class(name) | Self::Filter(name) => Some(name),
            _ => None,
        }
    }

    /// Shallow shape check of a JSON value against this type.
    pub fn accepts(&self, value: &JsonValue) -> bool {
        match (self, value) {
            (Self::Unit, JsonValue::Null) => true,
            (Self::Boolean, JsonValue::Bool(_)) => true,
            (Self::Integer, JsonValue::Number(n)) => n.is_i64() || n.is_u64(),
            (Self::Number, JsonValue::Number(_)) => true,
            (Self::String, JsonValue::String(_)) => true,
            (Self::Collection(item), JsonValue::Array(items)) => {
                items.iter().all(|v| item.accepts(v))
            }
            (Self::Class(_), JsonValue::Object(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => f.write_str("unit"),
            Self::Boolean => f.write_str("boolean"),
            Self::Integer => f.write_str("integer"),
            Self::Number => f.write_str("number"),
            Self::String => f.write_str("string"),
            Self::Collection(item) => write!(f, "[{item}]"),
            Self::Class(name) => f.write_str(name),
            Self::Filter(name) => write!(f, "filter<{name}>"),
        }
    }
}

impl FromStr for TypeInfo {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(inner) = s.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            return Ok(Self::collection_of(inner.parse()?));
        }
        if let Some(inner) = s.strip_prefix("filter<").and_then(|r| r.strip_suffix('>')) {
            let inner = inner.trim();
            if !IDENTIFIER.is_match(inner) {
                return Err(Error::construction(format!(
                    "Invalid filter target '{inner}'"
                )));
            }
            return Ok(Self::filter(inner));
        }
        match s {
            "" | "unit" | "void" => Ok(Self::Unit),
            "boolean" | "bool" => Ok(Self::Boolean),
            "integer" | "int" => Ok(Self::Integer),
            "number" | "float" | "double" => Ok(Self::Number),
            "string" | "str" => Ok(Self::String),
            name if IDENTIFIER.is_match(name) => Ok(Self::class(name)),
            other => Err(Error::construction(format!(
                "Invalid type expression '{other}'"
            ))),
        }
    }
}

impl TryFrom<String> for TypeInfo {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TypeInfo> for String {
    fn from(value: TypeInfo) -> Self {
        value.to_string()
    }
}

/// One property of a class.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeInfo,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_true")]
    pub readable: bool,
    #[serde(default = "default_true")]
    pub writeable: bool,
}

impl PropertyInfo {
    pub fn new<S: Into<String>>(name: S, ty: TypeInfo) -> Self {
        Self {
            name: name.into(),
            ty,
            description: None,
            required: false,
            readable: true,
            writeable: true,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.writeable = false;
        self
    }
}

fn default_true() -> bool {
    true
}

/// A domain type exposed through the API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub properties: Vec<PropertyInfo>,
}

impl ClassInfo {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            description: None,
            properties: Vec::new(),
        }
    }

    pub fn with_property(mut self, property: PropertyInfo) -> Self {
        self.properties.push(property);
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyInfo> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// Registered classes keyed by name.
#[derive(Clone, Debug, Default)]
pub struct TypeCatalog {
    classes: BTreeMap<String, Arc<ClassInfo>>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class; names must be unique.
    pub fn register(&mut self, class: ClassInfo) -> Result<Arc<ClassInfo>> {
        if !IDENTIFIER.is_match(&class.name) {
            return Err(Error::construction(format!(
                "Invalid class name '{}'",
                class.name
            )));
        }
        if self.classes.contains_key(&class.name) {
            return Err(Error::construction(format!(
                "Class '{}' is registered twice",
                class.name
            )));
        }
        let class = Arc::new(class);
        self.classes.insert(class.name.clone(), class.clone());
        Ok(class)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ClassInfo>> {
        self.classes.get(name)
    }

    pub fn classes(&self) -> impl Iterator<Item = &Arc<ClassInfo>> {
        self.classes.values()
    }

    /// Fail if the type references a class that is not registered.
    pub fn validate(&self, ty: &TypeInfo) -> Result<()> {
        match ty.class_name() {
            Some(name) if !self.classes.contains_key(name) => Err(Error::construction(format!(
                "Type '{ty}' references unknown class '{name}'"
            ))),
            _ => Ok(()),
        }
    }

    /// Validate every property type of every registered class.
    pub fn validate_all(&self) -> Result<()> {
        for class in self.classes.values() {
            for property in &class.properties {
                self.validate(&property.ty).map_err(|e| {
                    Error::construction(format!("{}.{}: {e}", class.name, property.name))
                })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_type_expressions() -> Result<()> {
        assert_eq!("int".parse::<TypeInfo>()?, TypeInfo::Integer);
        assert_eq!(
            "[string]".parse::<TypeInfo>()?,
            TypeInfo::collection_of(TypeInfo::String)
        );
        assert_eq!("filter<Person>".parse::<TypeInfo>()?, TypeInfo::filter("Person"));
        assert_eq!(
            "[[Person]]".parse::<TypeInfo>()?.to_string(),
            "[[Person]]"
        );
        assert!("not a type".parse::<TypeInfo>().is_err());
        Ok(())
    }

    #[test]
    fn test_structure_requirement() {
        assert!(TypeInfo::class("Person").requires_structure());
        assert!(TypeInfo::collection_of(TypeInfo::class("Person")).requires_structure());
        assert!(!TypeInfo::collection_of(TypeInfo::Integer).requires_structure());
        assert!(!TypeInfo::filter("Person").requires_structure());
    }

    #[test]
    fn test_accepts_checks_shape() {
        assert!(TypeInfo::Integer.accepts(&json!(42)));
        assert!(!TypeInfo::Integer.accepts(&json!(4.2)));
        assert!(TypeInfo::collection_of(TypeInfo::String).accepts(&json!(["a", "b"])));
        assert!(!TypeInfo::collection_of(TypeInfo::String).accepts(&json!(["a", 1])));
        assert!(TypeInfo::class("Person").accepts(&json!({"name": "x"})));
    }

    #[test]
    fn test_catalog_rejects_unknown_and_duplicate_classes() -> Result<()> {
        let mut catalog = TypeCatalog::new();
        catalog.register(
            ClassInfo::new("Person").with_property(PropertyInfo::new(
                "friends",
                TypeInfo::collection_of(TypeInfo::class("Person")),
            )),
        )?;
        assert!(catalog.validate_all().is_ok());
        assert!(catalog.register(ClassInfo::new("Person")).is_err());
        assert!(catalog.validate(&TypeInfo::class("Product")).is_err());
        assert!(catalog.validate(&TypeInfo::filter("Person")).is_ok());
        Ok(())
    }
}
