//! Loading and Saving
//!
//! Reads and writes documents, values files and batch files on disk.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use super::values::{emit_values, parse_batch, parse_values, BatchValues};
use super::{emit_document, parse_document, Emit};
use crate::error::Result;
use crate::model::{Interface, Run, ValueStore};

/// Writes `<id>.cwl` and `<id>.yml` into `dir`, creating it if needed.
///
/// Returns the document and values paths.
pub fn save<T: Emit + Interface>(item: &T, dir: impl AsRef<Path>) -> Result<(PathBuf, PathBuf)> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let document = emit_document(item)?;
    let values = emit_values(item)?;

    let document_path = dir.join(format!("{}.cwl", item.id()));
    let values_path = dir.join(format!("{}.yml", item.id()));
    fs::write(&document_path, document)?;
    fs::write(&values_path, values)?;

    info!("Saved '{}' to: {}", item.id(), document_path.display());
    Ok((document_path, values_path))
}

/// Loads a tool or workflow document.
pub fn load_document(path: impl AsRef<Path>) -> Result<Run> {
    let path = path.as_ref();
    info!("Loading document from: {}", path.display());
    let text = fs::read_to_string(path)?;
    parse_document(&text)
}

pub fn load_values(path: impl AsRef<Path>) -> Result<ValueStore> {
    let text = fs::read_to_string(path.as_ref())?;
    parse_values(&text)
}

pub fn load_batch(path: impl AsRef<Path>) -> Result<BatchValues> {
    let path = path.as_ref();
    info!("Loading batch values from: {}", path.display());
    let text = fs::read_to_string(path)?;
    parse_batch(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InputParam, Process};
    use crate::CwlError;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load() {
        let temp_dir = tempdir().unwrap();
        let mut echo = Process::new("echo", "echo")
            .unwrap()
            .with_inputs(vec![InputParam::new("sth", "string").unwrap()])
            .unwrap();
        echo.set_value("sth", "Hello World!").unwrap();

        let (document_path, values_path) = save(&echo, temp_dir.path().join("out")).unwrap();
        assert!(document_path.ends_with("echo.cwl"));
        assert!(values_path.ends_with("echo.yml"));

        let loaded = load_document(&document_path).unwrap();
        assert_eq!(loaded.id(), "echo");

        let mut loaded = loaded;
        let values = load_values(&values_path).unwrap();
        crate::emit::apply_values(&mut loaded, values).unwrap();
        assert_eq!(loaded.bound_values().len(), 1);
    }

    #[test]
    fn test_load_document_not_found() {
        let result = load_document("/nonexistent/path/tool.cwl");
        assert!(matches!(result, Err(CwlError::Io(_))));
    }

    #[test]
    fn test_load_invalid_yaml() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("bad.cwl");
        std::fs::write(&path, "this is not valid yaml: [[[").unwrap();
        assert!(matches!(load_document(&path), Err(CwlError::Yaml(_))));
    }

    #[test]
    fn test_load_batch() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("batch.yml");
        std::fs::write(&path, "sth: [one, two]\n").unwrap();
        assert_eq!(load_batch(&path).unwrap()["sth"].len(), 2);
    }
}
