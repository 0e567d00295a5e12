//! Descriptive Metadata
//!
//! Labels, documentation and extension fields attached to a tool or
//! workflow. Metadata never changes execution; it only travels through the
//! document. Text may contain `{{name}}` placeholders which must be filled
//! before the document is emitted.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{\s*([\w.-]+)\s*\}\}").unwrap());

/// Names of the `{{name}}` placeholders in `text`, in order of appearance.
pub fn placeholders(text: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Annotation bag for a process or workflow.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Meta {
    pub label: Option<String>,
    pub doc: Option<String>,

    /// Extra document keys such as `s:author` or `$namespaces`
    pub extensions: IndexMap<String, JsonValue>,
}

impl Meta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    /// Replaces every `{{name}}` placeholder with `value`.
    pub fn fill(&mut self, name: &str, value: &str) {
        let replace = |text: &str| -> String {
            PLACEHOLDER
                .replace_all(text, |caps: &regex::Captures| {
                    if &caps[1] == name {
                        value.to_string()
                    } else {
                        caps[0].to_string()
                    }
                })
                .into_owned()
        };

        if let Some(label) = &self.label {
            self.label = Some(replace(label));
        }
        if let Some(doc) = &self.doc {
            self.doc = Some(replace(doc));
        }
        for ext in self.extensions.values_mut() {
            fill_json(ext, &replace);
        }
    }

    /// Names of placeholders that have not been filled, sorted.
    pub fn unresolved(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        let mut collect = |text: &str| names.extend(placeholders(text));

        if let Some(label) = &self.label {
            collect(label);
        }
        if let Some(doc) = &self.doc {
            collect(doc);
        }
        for ext in self.extensions.values() {
            visit_json_strings(ext, &mut collect);
        }

        names.into_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.label.is_none() && self.doc.is_none() && self.extensions.is_empty()
    }
}

fn fill_json(value: &mut JsonValue, replace: &dyn Fn(&str) -> String) {
    match value {
        JsonValue::String(s) => *s = replace(s),
        JsonValue::Array(items) => items.iter_mut().for_each(|v| fill_json(v, replace)),
        JsonValue::Object(map) => map.values_mut().for_each(|v| fill_json(v, replace)),
        _ => {}
    }
}

fn visit_json_strings(value: &JsonValue, visit: &mut dyn FnMut(&str)) {
    match value {
        JsonValue::String(s) => visit(s),
        JsonValue::Array(items) => items.iter().for_each(|v| visit_json_strings(v, visit)),
        JsonValue::Object(map) => map.values().for_each(|v| visit_json_strings(v, visit)),
        _ => {}
    }
}
