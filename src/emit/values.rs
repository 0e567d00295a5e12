//! Values Documents
//!
//! A values document maps input ids to bound values, with files written as
//! `{class: File, path: ...}`. A batch file has the same shape, except that
//! each id maps to a list holding one value per job.

use indexmap::IndexMap;
use log::debug;
use serde_yaml::Value;

use crate::error::{CwlError, Result};
use crate::model::{Interface, ParamValue, ValueStore};

/// Per-job values keyed by input id.
pub type BatchValues = IndexMap<String, Vec<ParamValue>>;

/// Emits the values bound on a tool or workflow.
pub fn emit_values(item: &dyn Interface) -> Result<String> {
    let values: IndexMap<&str, &ParamValue> = item.bound_values().into_iter().collect();
    let text = serde_yaml::to_string(&values)?;
    debug!("Emitted {} value(s) for '{}'", values.len(), item.id());
    Ok(text)
}

/// Parses a values document. An empty document holds no values.
pub fn parse_values(text: &str) -> Result<ValueStore> {
    if text.trim().is_empty() {
        return Ok(ValueStore::new());
    }
    Ok(serde_yaml::from_str(text)?)
}

/// Parses a batch file. A single value instead of a list applies to every
/// job.
pub fn parse_batch(text: &str) -> Result<BatchValues> {
    let root: Value = serde_yaml::from_str(text)?;
    let map = root
        .as_mapping()
        .ok_or_else(|| CwlError::validation("batch", "expected a mapping of input id to values"))?;

    let mut batch = BatchValues::new();
    for (key, value) in map {
        let id = key
            .as_str()
            .ok_or_else(|| CwlError::validation("batch", "input ids must be strings"))?;
        let column = match value {
            Value::Sequence(items) => items.iter().map(ParamValue::from_yaml).collect::<Result<_>>()?,
            single => vec![ParamValue::from_yaml(single)?],
        };
        batch.insert(id.to_string(), column);
    }
    Ok(batch)
}

/// Binds every value in `values`, stopping at the first failure.
pub fn apply_values(target: &mut dyn Interface, values: ValueStore) -> Result<()> {
    for (id, value) in values {
        target.bind(&id, value)?;
    }
    Ok(())
}
