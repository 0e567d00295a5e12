//! Requirements and Hints
//!
//! A requirement is a record tagged by its CWL `class`. Fields that are not
//! set are left out of the document, so a requirement without fields is
//! written as `{class: ShellCommandRequirement}`.
//!
//! [`Requirements`] keeps at most one record per class. Setting a class that
//! is already present replaces the old record in place. Staged file entries
//! are the exception: [`Requirements::stage`] appends to the existing
//! `InitialWorkDirRequirement` listing.

use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::expression::{Expression, Text};
use crate::error::{CwlError, Result};

/// Ids usable with dot access in a parameter reference
static JS_IDENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").unwrap());

/// A file staged into the working directory before the tool runs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Dirent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entryname: Option<Text>,

    /// Literal content, an input reference or an expression
    pub entry: Text,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writable: Option<bool>,
}

impl Dirent {
    pub fn new(entryname: impl Into<Text>, entry: impl Into<Text>) -> Self {
        Self {
            entryname: Some(entryname.into()),
            entry: entry.into(),
            writable: None,
        }
    }

    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = Some(writable);
        self
    }

    /// Stages a file listing the paths of an array-of-File input, one per
    /// separator. The file is named after the input.
    ///
    /// # Example
    ///
    /// ```
    /// use cwlsmith::model::Dirent;
    ///
    /// let dirent = Dirent::manifest("ifiles", "\n")?;
    /// assert_eq!(
    ///     dirent.entry.to_string(),
    ///     r#"$(inputs.ifiles.map(function(f){ return f.path; }).join("\n"))"#
    /// );
    /// # Ok::<(), cwlsmith::CwlError>(())
    /// ```
    pub fn manifest(input_id: &str, separator: &str) -> Result<Self> {
        let expression = Expression::new(format!(
            "$({}.map(function(f){{ return f.path; }}).join({}))",
            input_reference(input_id),
            js_string_literal(separator)
        ))?;
        Ok(Self::new(input_id, Text::Expression(expression)))
    }

    /// Stages the text of a script file verbatim under its own file name.
    pub fn from_script_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| CwlError::validation(path.display().to_string(), "script path has no file name"))?;
        let content = fs::read_to_string(path)?;
        Ok(Self::new(name, Text::literal(content)))
    }
}

/// Renders a string as a double-quoted JavaScript literal.
/// `inputs.id`, or `inputs["id"]` for ids such as `sample-files`.
fn input_reference(id: &str) -> String {
    if JS_IDENT.is_match(id) {
        format!("inputs.{}", id)
    } else {
        format!("inputs[{}]", js_string_literal(id))
    }
}

fn js_string_literal(s: &str) -> String {
    let mut out = String::from("\"");
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// An environment variable definition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentDef {
    pub env_name: String,
    pub env_value: Text,
}

/// A package of a `SoftwareRequirement`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SoftwarePackage {
    pub package: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub version: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specs: Vec<String>,
}

/// A CWL requirement record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "class")]
pub enum Requirement {
    #[serde(rename_all = "camelCase")]
    DockerRequirement {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        docker_pull: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        docker_load: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        docker_file: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        docker_import: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        docker_image_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        docker_output_directory: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    InlineJavascriptRequirement {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        expression_lib: Vec<String>,
    },

    SoftwareRequirement {
        packages: Vec<SoftwarePackage>,
    },

    InitialWorkDirRequirement {
        listing: Vec<Dirent>,
    },

    #[serde(rename_all = "camelCase")]
    ResourceRequirement {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cores_min: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cores_max: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ram_min: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ram_max: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tmpdir_min: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tmpdir_max: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        outdir_min: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        outdir_max: Option<u64>,
    },

    #[serde(rename_all = "camelCase")]
    EnvVarRequirement { env_def: Vec<EnvironmentDef> },

    ShellCommandRequirement,

    #[serde(rename_all = "camelCase")]
    NetworkAccess { network_access: bool },

    SubworkflowFeatureRequirement,

    ScatterFeatureRequirement,

    MultipleInputFeatureRequirement,

    StepInputExpressionRequirement,
}

impl Requirement {
    /// The `class` discriminant.
    pub fn class(&self) -> &'static str {
        match self {
            Self::DockerRequirement { .. } => "DockerRequirement",
            Self::InlineJavascriptRequirement { .. } => "InlineJavascriptRequirement",
            Self::SoftwareRequirement { .. } => "SoftwareRequirement",
            Self::InitialWorkDirRequirement { .. } => "InitialWorkDirRequirement",
            Self::ResourceRequirement { .. } => "ResourceRequirement",
            Self::EnvVarRequirement { .. } => "EnvVarRequirement",
            Self::ShellCommandRequirement => "ShellCommandRequirement",
            Self::NetworkAccess { .. } => "NetworkAccess",
            Self::SubworkflowFeatureRequirement => "SubworkflowFeatureRequirement",
            Self::ScatterFeatureRequirement => "ScatterFeatureRequirement",
            Self::MultipleInputFeatureRequirement => "MultipleInputFeatureRequirement",
            Self::StepInputExpressionRequirement => "StepInputExpressionRequirement",
        }
    }

    /// A container pulled by image name.
    pub fn docker(image: impl Into<String>) -> Self {
        Self::DockerRequirement {
            docker_pull: Some(image.into()),
            docker_load: None,
            docker_file: None,
            docker_import: None,
            docker_image_id: None,
            docker_output_directory: None,
        }
    }

    /// A container built from a Dockerfile, tagged with `image_id`.
    pub fn docker_build(dockerfile: impl Into<String>, image_id: impl Into<String>) -> Self {
        Self::DockerRequirement {
            docker_pull: None,
            docker_load: None,
            docker_file: Some(dockerfile.into()),
            docker_import: None,
            docker_image_id: Some(image_id.into()),
            docker_output_directory: None,
        }
    }

    pub fn inline_javascript() -> Self {
        Self::InlineJavascriptRequirement {
            expression_lib: Vec::new(),
        }
    }

    /// Resource bounds: minimum cores and minimum RAM in MiB.
    pub fn resources(cores_min: Option<u64>, ram_min: Option<u64>) -> Self {
        Self::ResourceRequirement {
            cores_min,
            cores_max: None,
            ram_min,
            ram_max: None,
            tmpdir_min: None,
            tmpdir_max: None,
            outdir_min: None,
            outdir_max: None,
        }
    }

    pub fn env_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Text>,
    {
        Self::EnvVarRequirement {
            env_def: vars
                .into_iter()
                .map(|(k, v)| EnvironmentDef {
                    env_name: k.into(),
                    env_value: v.into(),
                })
                .collect(),
        }
    }

    pub fn staged(listing: Vec<Dirent>) -> Self {
        Self::InitialWorkDirRequirement { listing }
    }

    pub fn network(enabled: bool) -> Self {
        Self::NetworkAccess {
            network_access: enabled,
        }
    }
}

/// Requirements or hints of one process, at most one per class.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct Requirements(Vec<Requirement>);

impl Requirements {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Adds a requirement, replacing any record of the same class.
    pub fn set(&mut self, requirement: Requirement) {
        let class = requirement.class();
        match self.0.iter_mut().find(|r| r.class() == class) {
            Some(existing) => *existing = requirement,
            None => self.0.push(requirement),
        }
    }

    /// Adds a requirement only if its class is absent. Returns whether it
    /// was added.
    pub fn ensure(&mut self, requirement: Requirement) -> bool {
        if self.contains(requirement.class()) {
            return false;
        }
        self.0.push(requirement);
        true
    }

    /// Appends a staged entry to the working-directory listing, creating
    /// the requirement if needed. Entries with the same name are replaced.
    pub fn stage(&mut self, dirent: Dirent) {
        for requirement in &mut self.0 {
            if let Requirement::InitialWorkDirRequirement { listing } = requirement {
                match listing.iter_mut().find(|d| d.entryname == dirent.entryname) {
                    Some(existing) => *existing = dirent,
                    None => listing.push(dirent),
                }
                return;
            }
        }
        self.0.push(Requirement::staged(vec![dirent]));
    }

    pub fn get(&self, class: &str) -> Option<&Requirement> {
        self.0.iter().find(|r| r.class() == class)
    }

    pub fn contains(&self, class: &str) -> bool {
        self.get(class).is_some()
    }

    pub fn remove(&mut self, class: &str) -> Option<Requirement> {
        let index = self.0.iter().position(|r| r.class() == class)?;
        Some(self.0.remove(index))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Requirement> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Builds a set from a list, later records replacing earlier ones.
    pub fn from_list(list: Vec<Requirement>) -> Self {
        let mut set = Self::new();
        for requirement in list {
            set.set(requirement);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_marker_serialization() {
        let yaml = serde_yaml::to_string(&Requirement::ShellCommandRequirement).unwrap();
        assert_eq!(yaml.trim(), "class: ShellCommandRequirement");
    }

    #[test]
    fn test_absent_fields_omitted() {
        let yaml = serde_yaml::to_string(&Requirement::docker("ubuntu:22.04")).unwrap();
        assert!(yaml.contains("class: DockerRequirement"));
        assert!(yaml.contains("dockerPull: ubuntu:22.04"));
        assert!(!yaml.contains("dockerLoad"));
        assert!(!yaml.contains("null"));

        let yaml = serde_yaml::to_string(&Requirement::inline_javascript()).unwrap();
        assert_eq!(yaml.trim(), "class: InlineJavascriptRequirement");
    }

    #[test]
    fn test_requirement_round_trip() {
        let original = Requirement::resources(Some(4), Some(8000));
        let yaml = serde_yaml::to_string(&original).unwrap();
        assert!(yaml.contains("coresMin: 4"));
        let back: Requirement = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_set_replaces_same_class() {
        let mut reqs = Requirements::new();
        reqs.set(Requirement::docker("a:1"));
        reqs.set(Requirement::ShellCommandRequirement);
        reqs.set(Requirement::docker("b:2"));

        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs.iter().next(), Some(&Requirement::docker("b:2")));
    }

    #[test]
    fn test_ensure_keeps_existing() {
        let mut reqs = Requirements::new();
        reqs.set(Requirement::docker("a:1"));
        assert!(!reqs.ensure(Requirement::docker("b:2")));
        assert!(reqs.ensure(Requirement::ScatterFeatureRequirement));
        assert_eq!(reqs.get("DockerRequirement"), Some(&Requirement::docker("a:1")));
    }

    #[test]
    fn test_stage_is_additive() {
        let mut reqs = Requirements::new();
        reqs.stage(Dirent::new("a.txt", "alpha"));
        reqs.stage(Dirent::new("b.txt", "beta"));
        reqs.stage(Dirent::new("a.txt", "alpha2"));

        match reqs.get("InitialWorkDirRequirement") {
            Some(Requirement::InitialWorkDirRequirement { listing }) => {
                assert_eq!(listing.len(), 2);
                assert_eq!(listing[0].entry, Text::literal("alpha2"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_manifest_expression() {
        let dirent = Dirent::manifest("ifiles", "\n").unwrap();
        assert_eq!(dirent.entryname, Some(Text::literal("ifiles")));
        let entry = dirent.entry.to_string();
        assert!(entry.starts_with("$(inputs.ifiles.map("));
        assert!(entry.ends_with(".join(\"\\n\"))"));
        assert!(Expression::new(entry).is_ok());
    }

    #[test]
    fn test_manifest_dashed_input_id() {
        let dirent = Dirent::manifest("sample-files", "\n").unwrap();
        assert_eq!(dirent.entryname, Some(Text::literal("sample-files")));
        assert_eq!(
            dirent.entry.to_string(),
            r#"$(inputs["sample-files"].map(function(f){ return f.path; }).join("\n"))"#
        );

        let dotted = Dirent::manifest("reads.r1", ",").unwrap();
        assert!(dotted.entry.to_string().starts_with(r#"$(inputs["reads.r1"].map("#));
    }

    #[test]
    fn test_manifest_custom_separator() {
        let dirent = Dirent::manifest("bams", "\",\"").unwrap();
        assert!(dirent.entry.to_string().contains(r#".join("\",\"")"#));
    }

    #[test]
    fn test_script_staging() {
        use tempfile::tempdir;

        let dir = tempdir().unwrap();
        let script = dir.path().join("count.py");
        std::fs::write(&script, "print(len(open('x').read()))\n").unwrap();

        let dirent = Dirent::from_script_file(&script).unwrap();
        assert_eq!(dirent.entryname, Some(Text::literal("count.py")));
        assert_eq!(dirent.entry, Text::literal("print(len(open('x').read()))\n"));
    }

    #[test]
    fn test_env_vars() {
        let req = Requirement::env_vars([("LC_ALL", "C")]);
        let yaml = serde_yaml::to_string(&req).unwrap();
        assert!(yaml.contains("envName: LC_ALL"));
        assert!(yaml.contains("envValue: C"));
    }
}
