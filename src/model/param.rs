//! Input and Output Parameters
//!
//! Parameter declarations are kept separate from the values bound to them.
//! Values live in a [`ValueStore`] keyed by input id and are checked against
//! the declared type when bound.
//!
//! # Example
//!
//! ```
//! use cwlsmith::model::{InputParam, OutputParam};
//!
//! let reads = InputParam::new("reads", "File")?.prefix("-U").position(2);
//! let threads = InputParam::new("threads", "int")?.prefix("-p").with_default(4)?;
//! let sam = OutputParam::new("sam", "File")?.glob("aligned.sam");
//! # Ok::<(), cwlsmith::CwlError>(())
//! ```

use std::cmp::Ordering;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::expression::Text;
use super::types::{CwlType, ParamValue};
use crate::error::{CwlError, Result};

/// Letters, digits, `_`, `.` and `-`; no path separators.
static ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.-]*$").unwrap());

/// Bound values keyed by input parameter id.
pub type ValueStore = IndexMap<String, ParamValue>;

/// Checks that an id is usable for a parameter or step.
pub fn validate_id(id: &str, what: &str) -> Result<()> {
    if ID_PATTERN.is_match(id) {
        Ok(())
    } else {
        Err(CwlError::validation(
            id,
            format!("invalid {} id (letters, digits, '_', '.', '-'; no '/')", what),
        ))
    }
}

/// Common surface of input and output parameters.
pub trait Parameter {
    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);
    fn param_type(&self) -> &CwlType;
    fn label_text(&self) -> Option<&str>;
    fn doc_text(&self) -> Option<&str>;

    /// Explicit command-line position, if any.
    fn sort_position(&self) -> Option<i32> {
        None
    }
}

/// How an input is rendered on the command line.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InputBinding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Whether prefix and value are separate tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separate: Option<bool>,

    /// Joins array items into a single token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_separator: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<Text>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell_quote: Option<bool>,
}

/// An input parameter of a tool or workflow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InputParam {
    #[serde(skip)]
    pub id: String,

    #[serde(rename = "type")]
    pub param_type: CwlType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ParamValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_binding: Option<InputBinding>,
}

impl InputParam {
    /// Creates an input from a compact type string such as `File[]`.
    pub fn new(id: impl Into<String>, type_str: &str) -> Result<Self> {
        Self::typed(id, CwlType::parse(type_str)?)
    }

    /// Creates an input from an already-built type.
    pub fn typed(id: impl Into<String>, param_type: CwlType) -> Result<Self> {
        let id = id.into();
        validate_id(&id, "input")?;
        Ok(Self {
            id,
            param_type,
            label: None,
            doc: None,
            default: None,
            input_binding: None,
        })
    }

    fn binding_mut(&mut self) -> &mut InputBinding {
        self.input_binding.get_or_insert_with(InputBinding::default)
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.binding_mut().prefix = Some(prefix.into());
        self
    }

    pub fn position(mut self, position: i32) -> Self {
        self.binding_mut().position = Some(position);
        self
    }

    pub fn separate(mut self, separate: bool) -> Self {
        self.binding_mut().separate = Some(separate);
        self
    }

    pub fn item_separator(mut self, separator: impl Into<String>) -> Self {
        self.binding_mut().item_separator = Some(separator.into());
        self
    }

    pub fn value_from(mut self, value: impl Into<Text>) -> Self {
        self.binding_mut().value_from = Some(value.into());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    /// Sets a default value, checked against the declared type.
    ///
    /// File defaults are not required to exist yet.
    pub fn with_default(mut self, value: impl Into<ParamValue>) -> Result<Self> {
        let value = self.param_type.coerce(value.into());
        if !self.param_type.accepts(&value) {
            return Err(CwlError::validation(
                &self.id,
                format!("default of kind {} does not fit type {}", value.kind(), self.param_type),
            ));
        }
        self.default = Some(value);
        Ok(self)
    }

    /// Coerces and checks a runtime value. Paths of File and Directory
    /// values must exist.
    pub fn check_value(&self, value: ParamValue) -> Result<ParamValue> {
        let value = self.param_type.coerce(value);
        if !self.param_type.accepts(&value) {
            return Err(CwlError::TypeMismatch {
                id: self.id.clone(),
                expected: self.param_type.to_string(),
                found: value.kind().to_string(),
            });
        }
        if let Some(missing) = first_missing_path(&value) {
            return Err(CwlError::TypeMismatch {
                id: self.id.clone(),
                expected: self.param_type.to_string(),
                found: format!("missing path '{}'", missing),
            });
        }
        Ok(value)
    }
}

fn first_missing_path(value: &ParamValue) -> Option<String> {
    match value {
        ParamValue::File(p) | ParamValue::Directory(p) if !p.exists() => {
            Some(p.display().to_string())
        }
        ParamValue::Array(items) => items.iter().find_map(first_missing_path),
        ParamValue::Record(fields) => fields.values().find_map(first_missing_path),
        _ => None,
    }
}

impl Parameter for InputParam {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn param_type(&self) -> &CwlType {
        &self.param_type
    }

    fn label_text(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn doc_text(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    fn sort_position(&self) -> Option<i32> {
        self.input_binding.as_ref().and_then(|b| b.position)
    }
}

/// An output parameter of a tool or workflow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutputParam {
    #[serde(skip)]
    pub id: String,

    #[serde(rename = "type")]
    pub param_type: CwlType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_binding: Option<OutputBinding>,

    /// `<stepId>/<outputId>` reference; workflow outputs only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_source: Option<String>,
}

/// Selection of produced files for a tool output.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutputBinding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glob: Option<Text>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_eval: Option<Text>,
}

impl OutputParam {
    pub fn new(id: impl Into<String>, type_str: &str) -> Result<Self> {
        Self::typed(id, CwlType::parse(type_str)?)
    }

    pub fn typed(id: impl Into<String>, param_type: CwlType) -> Result<Self> {
        let id = id.into();
        validate_id(&id, "output")?;
        Ok(Self {
            id,
            param_type,
            label: None,
            doc: None,
            output_binding: None,
            output_source: None,
        })
    }

    /// An output capturing the tool's standard output.
    pub fn stdout(id: impl Into<String>) -> Result<Self> {
        Self::typed(id, CwlType::Stdout)
    }

    pub fn glob(mut self, pattern: impl Into<Text>) -> Self {
        self.output_binding.get_or_insert_with(OutputBinding::default).glob = Some(pattern.into());
        self
    }

    pub fn output_eval(mut self, eval: impl Into<Text>) -> Self {
        self.output_binding
            .get_or_insert_with(OutputBinding::default)
            .output_eval = Some(eval.into());
        self
    }

    /// Sets the `<stepId>/<outputId>` this workflow output is taken from.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.output_source = Some(source.into());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    /// The glob pattern, if set.
    pub fn glob_pattern(&self) -> Option<&Text> {
        self.output_binding.as_ref().and_then(|b| b.glob.as_ref())
    }
}

impl Parameter for OutputParam {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn param_type(&self) -> &CwlType {
        &self.param_type
    }

    fn label_text(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn doc_text(&self) -> Option<&str> {
        self.doc.as_deref()
    }
}

/// Ordered parameter list with unique ids.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamList<P> {
    params: Vec<P>,
}

impl<P: Parameter> ParamList<P> {
    pub fn new() -> Self {
        Self { params: Vec::new() }
    }

    /// Builds a list, rejecting duplicate ids.
    pub fn from_params(params: Vec<P>, owner: &str) -> Result<Self> {
        let mut list = Self::new();
        for param in params {
            list.push(param, owner)?;
        }
        Ok(list)
    }

    /// Appends a parameter, rejecting duplicate ids.
    pub fn push(&mut self, param: P, owner: &str) -> Result<()> {
        if self.contains(param.id()) {
            return Err(CwlError::validation(
                owner,
                format!("duplicate parameter id '{}'", param.id()),
            ));
        }
        self.params.push(param);
        Ok(())
    }

    /// Replaces the parameter with the same id, or appends it.
    pub fn upsert(&mut self, param: P) {
        match self.params.iter_mut().find(|p| p.id() == param.id()) {
            Some(existing) => *existing = param,
            None => self.params.push(param),
        }
    }

    pub fn get(&self, id: &str) -> Option<&P> {
        self.params.iter().find(|p| p.id() == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut P> {
        self.params.iter_mut().find(|p| p.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, P> {
        self.params.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, P> {
        self.params.iter_mut()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.params.iter().map(|p| p.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Parameters in emission order: positioned ones by (position, id),
    /// then the rest by id.
    pub fn emission_order(&self) -> Vec<&P> {
        let mut sorted: Vec<&P> = self.params.iter().collect();
        sorted.sort_by(|a, b| match (a.sort_position(), b.sort_position()) {
            (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.id().cmp(b.id())),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.id().cmp(b.id()),
        });
        sorted
    }
}

impl<P: Parameter> Default for ParamList<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, P> IntoIterator for &'a ParamList<P> {
    type Item = &'a P;
    type IntoIter = std::slice::Iter<'a, P>;

    fn into_iter(self) -> Self::IntoIter {
        self.params.iter()
    }
}

/// Binds a value to a declared input, checking its type.
pub(crate) fn bind_value(
    inputs: &ParamList<InputParam>,
    store: &mut ValueStore,
    owner: &str,
    id: &str,
    value: ParamValue,
) -> Result<()> {
    let param = inputs
        .get(id)
        .ok_or_else(|| CwlError::not_found("input", id, owner))?;
    let value = param.check_value(value)?;
    store.insert(id.to_string(), value);
    Ok(())
}

/// Values ordered like their inputs are emitted.
pub(crate) fn ordered_values<'a>(
    inputs: &'a ParamList<InputParam>,
    store: &'a ValueStore,
) -> Vec<(&'a str, &'a ParamValue)> {
    inputs
        .emission_order()
        .into_iter()
        .filter_map(|p| store.get(&p.id).map(|v| (p.id.as_str(), v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_param_builder() {
        let param = InputParam::new("reads", "File[]")
            .unwrap()
            .prefix("-i")
            .separate(false)
            .item_separator(",")
            .position(1);

        let binding = param.input_binding.as_ref().unwrap();
        assert_eq!(binding.prefix.as_deref(), Some("-i"));
        assert_eq!(binding.separate, Some(false));
        assert_eq!(binding.item_separator.as_deref(), Some(","));
        assert_eq!(param.sort_position(), Some(1));
    }

    #[test]
    fn test_invalid_ids() {
        assert!(InputParam::new("", "string").is_err());
        assert!(InputParam::new("a/b", "string").is_err());
        assert!(OutputParam::new("1abc", "File").is_err());
        assert!(InputParam::new("sample_id.v2", "string").is_ok());
    }

    #[test]
    fn test_default_type_checked() {
        assert!(InputParam::new("n", "int").unwrap().with_default(3).is_ok());
        assert!(InputParam::new("n", "int").unwrap().with_default("three").is_err());
        // File defaults may point at paths that do not exist yet
        assert!(InputParam::new("f", "File").unwrap().with_default("later.txt").is_ok());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = ParamList::from_params(
            vec![
                InputParam::new("x", "string").unwrap(),
                InputParam::new("x", "int").unwrap(),
            ],
            "tool",
        );
        assert!(matches!(result, Err(CwlError::Validation { .. })));
    }

    #[test]
    fn test_emission_order() {
        let list = ParamList::from_params(
            vec![
                InputParam::new("zeta", "string").unwrap(),
                InputParam::new("beta", "string").unwrap().position(2),
                InputParam::new("alpha", "string").unwrap().position(2),
                InputParam::new("gamma", "string").unwrap().position(1),
                InputParam::new("delta", "string").unwrap(),
            ],
            "tool",
        )
        .unwrap();

        let ids: Vec<&str> = list.emission_order().iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec!["gamma", "alpha", "beta", "delta", "zeta"]);
    }

    #[test]
    fn test_bind_unknown_id() {
        let list = ParamList::from_params(vec![InputParam::new("x", "string").unwrap()], "tool").unwrap();
        let mut store = ValueStore::new();
        let err = bind_value(&list, &mut store, "tool", "y", "v".into()).unwrap_err();
        assert!(matches!(err, CwlError::NotFound { .. }));
    }

    #[test]
    fn test_bind_type_mismatch() {
        let list = ParamList::from_params(vec![InputParam::new("n", "int").unwrap()], "tool").unwrap();
        let mut store = ValueStore::new();
        let err = bind_value(&list, &mut store, "tool", "n", "abc".into()).unwrap_err();
        assert!(matches!(err, CwlError::TypeMismatch { .. }));
    }

    #[test]
    fn test_bind_file_must_exist() {
        use tempfile::tempdir;

        let list = ParamList::from_params(vec![InputParam::new("f", "File").unwrap()], "tool").unwrap();
        let mut store = ValueStore::new();

        let err = bind_value(&list, &mut store, "tool", "f", "/nonexistent/x.txt".into()).unwrap_err();
        assert!(matches!(err, CwlError::TypeMismatch { .. }));

        let dir = tempdir().unwrap();
        let file = dir.path().join("x.txt");
        std::fs::write(&file, "x").unwrap();
        bind_value(&list, &mut store, "tool", "f", file.to_str().unwrap().into()).unwrap();
        assert_eq!(store.get("f"), Some(&ParamValue::File(file)));
    }

    #[test]
    fn test_bind_file_rejects_number() {
        let list = ParamList::from_params(vec![InputParam::new("f", "File").unwrap()], "tool").unwrap();
        let mut store = ValueStore::new();
        let err = bind_value(&list, &mut store, "tool", "f", ParamValue::Int(3)).unwrap_err();
        assert!(matches!(err, CwlError::TypeMismatch { .. }));
    }

    #[test]
    fn test_output_param_glob() {
        let out = OutputParam::new("txt", "File[]").unwrap().glob("*.txt");
        assert_eq!(out.glob_pattern(), Some(&Text::literal("*.txt")));
    }
}
