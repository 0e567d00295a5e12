//! Parameter Types and Values
//!
//! `CwlType` is the closed CWL type vocabulary. It can be written in the
//! compact form used by most tool descriptions:
//!
//! ```text
//! string        a plain string
//! File[]        an array of files
//! int?          an optional integer
//! string[]?     an optional array of strings
//! ```
//!
//! or as a descriptor object (`{type: array, items: File}`, `["null", int]`,
//! records and enums). Both forms normalize to the same value.

use std::fmt;
use std::path::PathBuf;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::{CwlError, Result};

/// Base type name followed by any `[]` / `?` modifiers
static TYPE_ATOM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<base>[A-Za-z]+)(?P<mods>(\[\]|\?)*)$").unwrap());

/// A field of a record type.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordField {
    pub name: String,
    pub field_type: CwlType,
}

/// CWL parameter type.
#[derive(Debug, Clone, PartialEq)]
pub enum CwlType {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    String,
    File,
    Directory,
    Any,
    Stdout,
    Stderr,
    Array(Box<CwlType>),
    Optional(Box<CwlType>),
    Record(Vec<RecordField>),
    Enum(Vec<String>),
}

impl CwlType {
    /// Parses the compact grammar (`T`, `T[]`, `T?`, combinations).
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let caps = TYPE_ATOM
            .captures(text)
            .ok_or_else(|| CwlError::validation(text, "malformed type string"))?;

        let mut ty = Self::primitive(&caps["base"])
            .ok_or_else(|| CwlError::validation(text, format!("unknown type '{}'", &caps["base"])))?;

        let mut mods = &caps["mods"][..];
        while !mods.is_empty() {
            if let Some(rest) = mods.strip_prefix("[]") {
                ty = Self::Array(Box::new(ty));
                mods = rest;
            } else if let Some(rest) = mods.strip_prefix('?') {
                ty = ty.optional();
                mods = rest;
            } else {
                return Err(CwlError::validation(text, "malformed type modifiers"));
            }
        }

        Ok(ty)
    }

    fn primitive(name: &str) -> Option<Self> {
        Some(match name {
            "null" => Self::Null,
            "boolean" => Self::Boolean,
            "int" => Self::Int,
            "long" => Self::Long,
            "float" => Self::Float,
            "double" => Self::Double,
            "string" => Self::String,
            "File" => Self::File,
            "Directory" => Self::Directory,
            "Any" => Self::Any,
            "stdout" => Self::Stdout,
            "stderr" => Self::Stderr,
            _ => return None,
        })
    }

    /// Wraps this type as optional. Optional of optional stays single.
    pub fn optional(self) -> Self {
        if matches!(self, Self::Optional(_) | Self::Null) {
            self
        } else {
            Self::Optional(Box::new(self))
        }
    }

    pub fn array_of(items: CwlType) -> Self {
        Self::Array(Box::new(items))
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, Self::Optional(_) | Self::Null | Self::Any)
    }

    /// The type with any optional wrapper removed.
    pub fn inner(&self) -> &CwlType {
        match self {
            Self::Optional(inner) => inner,
            other => other,
        }
    }

    /// True for `File[]` and `File[]?`.
    pub fn is_file_array(&self) -> bool {
        matches!(self.inner(), Self::Array(items) if **items == Self::File)
    }

    /// Parses a descriptor: a type string, a `["null", T]` union or a
    /// `{type: array|record|enum, ...}` object.
    pub fn from_descriptor(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Self::parse(s),
            Value::Sequence(items) => {
                let mut nullable = false;
                let mut others = Vec::new();
                for item in items {
                    match Self::from_descriptor(item)? {
                        Self::Null => nullable = true,
                        other => others.push(other),
                    }
                }
                match (others.len(), nullable) {
                    (0, true) => Ok(Self::Null),
                    (1, true) => Ok(others.remove(0).optional()),
                    (1, false) => Ok(others.remove(0)),
                    _ => Err(CwlError::validation(
                        format!("{:?}", value),
                        "unions of several non-null types are not supported",
                    )),
                }
            }
            Value::Mapping(map) => {
                let kind = map
                    .get("type")
                    .and_then(Value::as_str)
                    .ok_or_else(|| CwlError::validation("type descriptor", "missing 'type' key"))?;
                match kind {
                    "array" => {
                        let items = map
                            .get("items")
                            .ok_or_else(|| CwlError::validation("array type", "missing 'items'"))?;
                        Ok(Self::array_of(Self::from_descriptor(items)?))
                    }
                    "record" => Ok(Self::Record(parse_record_fields(map.get("fields"))?)),
                    "enum" => {
                        let symbols = map
                            .get("symbols")
                            .and_then(Value::as_sequence)
                            .ok_or_else(|| CwlError::validation("enum type", "missing 'symbols'"))?
                            .iter()
                            .map(|s| {
                                s.as_str().map(str::to_string).ok_or_else(|| {
                                    CwlError::validation("enum type", "symbols must be strings")
                                })
                            })
                            .collect::<Result<Vec<_>>>()?;
                        Ok(Self::Enum(symbols))
                    }
                    other => Self::parse(other),
                }
            }
            _ => Err(CwlError::validation(format!("{:?}", value), "not a type descriptor")),
        }
    }

    /// Compact string form, if the type has one.
    pub fn compact(&self) -> Option<String> {
        Some(match self {
            Self::Array(items) => format!("{}[]", items.compact()?),
            Self::Optional(inner) => format!("{}?", inner.compact()?),
            Self::Record(_) | Self::Enum(_) => return None,
            primitive => primitive.primitive_name().to_string(),
        })
    }

    fn primitive_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::String => "string",
            Self::File => "File",
            Self::Directory => "Directory",
            Self::Any => "Any",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Array(_) => "array",
            Self::Optional(_) => "optional",
            Self::Record(_) => "record",
            Self::Enum(_) => "enum",
        }
    }

    /// Descriptor written into documents; compact when possible.
    pub fn to_descriptor(&self) -> Value {
        if let Some(compact) = self.compact() {
            return Value::String(compact);
        }
        match self {
            Self::Array(items) => {
                let mut map = Mapping::new();
                map.insert("type".into(), "array".into());
                map.insert("items".into(), items.to_descriptor());
                Value::Mapping(map)
            }
            Self::Optional(inner) => Value::Sequence(vec!["null".into(), inner.to_descriptor()]),
            Self::Record(fields) => {
                let mut map = Mapping::new();
                map.insert("type".into(), "record".into());
                let fields = fields
                    .iter()
                    .map(|f| {
                        let mut field = Mapping::new();
                        field.insert("name".into(), f.name.clone().into());
                        field.insert("type".into(), f.field_type.to_descriptor());
                        Value::Mapping(field)
                    })
                    .collect();
                map.insert("fields".into(), Value::Sequence(fields));
                Value::Mapping(map)
            }
            Self::Enum(symbols) => {
                let mut map = Mapping::new();
                map.insert("type".into(), "enum".into());
                map.insert(
                    "symbols".into(),
                    Value::Sequence(symbols.iter().map(|s| s.clone().into()).collect()),
                );
                Value::Mapping(map)
            }
            primitive => Value::String(primitive.primitive_name().to_string()),
        }
    }

    /// Checks whether a value fits this type.
    pub fn accepts(&self, value: &ParamValue) -> bool {
        match (self, value) {
            (Self::Any, _) => true,
            (Self::Optional(_), ParamValue::Null) | (Self::Null, ParamValue::Null) => true,
            (Self::Optional(inner), v) => inner.accepts(v),
            (Self::Boolean, ParamValue::Bool(_)) => true,
            (Self::Int | Self::Long, ParamValue::Int(_)) => true,
            (Self::Float | Self::Double, ParamValue::Int(_) | ParamValue::Float(_)) => true,
            (Self::String, ParamValue::String(_)) => true,
            (Self::File, ParamValue::File(_)) => true,
            (Self::Directory, ParamValue::Directory(_)) => true,
            (Self::Enum(symbols), ParamValue::String(s)) => symbols.contains(s),
            (Self::Array(items), ParamValue::Array(values)) => values.iter().all(|v| items.accepts(v)),
            (Self::Record(fields), ParamValue::Record(values)) => fields.iter().all(|f| {
                values
                    .get(&f.name)
                    .map_or(f.field_type.is_optional(), |v| f.field_type.accepts(v))
            }),
            _ => false,
        }
    }

    /// Converts strings into File/Directory values where the type asks for
    /// them, recursing into arrays and optionals.
    pub fn coerce(&self, value: ParamValue) -> ParamValue {
        match (self, value) {
            (Self::Optional(inner), v) if !matches!(v, ParamValue::Null) => inner.coerce(v),
            (Self::File, ParamValue::String(s)) => ParamValue::File(PathBuf::from(s)),
            (Self::Directory, ParamValue::String(s)) => ParamValue::Directory(PathBuf::from(s)),
            (Self::Array(items), ParamValue::Array(values)) => {
                ParamValue::Array(values.into_iter().map(|v| items.coerce(v)).collect())
            }
            (_, v) => v,
        }
    }
}

fn parse_record_fields(fields: Option<&Value>) -> Result<Vec<RecordField>> {
    let Some(fields) = fields else {
        return Ok(Vec::new());
    };
    match fields {
        Value::Sequence(items) => items
            .iter()
            .map(|item| {
                let name = item
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| CwlError::validation("record type", "field without name"))?;
                let ty = item
                    .get("type")
                    .ok_or_else(|| CwlError::validation(name, "record field without type"))?;
                Ok(RecordField {
                    name: name.to_string(),
                    field_type: CwlType::from_descriptor(ty)?,
                })
            })
            .collect(),
        Value::Mapping(map) => map
            .iter()
            .map(|(name, ty)| {
                let name = name
                    .as_str()
                    .ok_or_else(|| CwlError::validation("record type", "field name must be a string"))?;
                let ty = ty.get("type").unwrap_or(ty);
                Ok(RecordField {
                    name: name.to_string(),
                    field_type: CwlType::from_descriptor(ty)?,
                })
            })
            .collect(),
        _ => Err(CwlError::validation("record type", "fields must be a list or map")),
    }
}

impl fmt::Display for CwlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.compact() {
            Some(s) => f.write_str(&s),
            None => match self {
                Self::Record(_) => f.write_str("record"),
                Self::Enum(symbols) => write!(f, "enum[{}]", symbols.join(",")),
                Self::Array(items) => write!(f, "{}[]", items),
                Self::Optional(inner) => write!(f, "{}?", inner),
                other => f.write_str(other.primitive_name()),
            },
        }
    }
}

impl Serialize for CwlType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_descriptor().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CwlType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        CwlType::from_descriptor(&value).map_err(serde::de::Error::custom)
    }
}

/// A concrete value bound to a parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    File(PathBuf),
    Directory(PathBuf),
    Array(Vec<ParamValue>),
    Record(IndexMap<String, ParamValue>),
}

impl ParamValue {
    /// Short name of the value's kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::File(_) => "File",
            Self::Directory(_) => "Directory",
            Self::Array(_) => "array",
            Self::Record(_) => "record",
        }
    }

    /// Converts to a YAML value. Files and directories become
    /// `{class: File, path: ...}` objects.
    pub fn to_yaml(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Number((*i).into()),
            Self::Float(f) => Value::Number((*f).into()),
            Self::String(s) => Value::String(s.clone()),
            Self::File(p) => location_object("File", p),
            Self::Directory(p) => location_object("Directory", p),
            Self::Array(items) => Value::Sequence(items.iter().map(Self::to_yaml).collect()),
            Self::Record(fields) => {
                let mut map = Mapping::new();
                for (k, v) in fields {
                    map.insert(Value::String(k.clone()), v.to_yaml());
                }
                Value::Mapping(map)
            }
        }
    }

    /// Converts from an untyped YAML value.
    pub fn from_yaml(value: &Value) -> Result<Self> {
        Ok(match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => Self::String(s.clone()),
            Value::Sequence(items) => {
                Self::Array(items.iter().map(Self::from_yaml).collect::<Result<_>>()?)
            }
            Value::Mapping(map) => {
                let class = map.get("class").and_then(Value::as_str);
                let path = map
                    .get("path")
                    .or_else(|| map.get("location"))
                    .and_then(Value::as_str);
                match (class, path) {
                    (Some("File"), Some(p)) => Self::File(PathBuf::from(p)),
                    (Some("Directory"), Some(p)) => Self::Directory(PathBuf::from(p)),
                    _ => {
                        let mut fields = IndexMap::new();
                        for (k, v) in map {
                            let key = k.as_str().ok_or_else(|| {
                                CwlError::validation("record value", "keys must be strings")
                            })?;
                            fields.insert(key.to_string(), Self::from_yaml(v)?);
                        }
                        Self::Record(fields)
                    }
                }
            }
            Value::Tagged(tagged) => Self::from_yaml(&tagged.value)?,
        })
    }
}

fn location_object(class: &str, path: &std::path::Path) -> Value {
    let mut map = Mapping::new();
    map.insert("class".into(), class.into());
    map.insert("path".into(), path.to_string_lossy().into_owned().into());
    Value::Mapping(map)
}

impl Serialize for ParamValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_yaml().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ParamValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        ParamValue::from_yaml(&value).map_err(serde::de::Error::custom)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for ParamValue {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for ParamValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(items: Vec<T>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}
