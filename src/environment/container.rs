//! Containers from Conda Packages
//!
//! Builds the requirements that let a runner provide a tool's software:
//! a `SoftwareRequirement` listing the packages, and a `DockerRequirement`
//! whose Dockerfile installs them with conda.
//!
//! The Dockerfile is a fixed template: one base image, the three channels
//! in priority order and a single install line. Nothing is built here.

use std::fmt;

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{CwlError, Result};
use crate::model::{Process, Requirement, SoftwarePackage};

/// Base image of generated Dockerfiles.
pub const BASE_IMAGE: &str = "continuumio/miniconda3:23.10.0-1";

/// Channels added to the image, lowest priority first.
pub const CHANNELS: [&str; 3] = ["defaults", "bioconda", "conda-forge"];

static PACKAGE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z0-9_.+-]+)(?:==?([A-Za-z0-9_.*+!-]+))?$").unwrap());

/// A conda package, optionally pinned to a version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    pub name: String,
    pub version: Option<String>,
}

impl PackageSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }

    pub fn pinned(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: Some(version.into()),
        }
    }

    /// Parses `name`, `name=version` or `name==version`.
    ///
    /// # Example
    ///
    /// ```
    /// use cwlsmith::environment::PackageSpec;
    ///
    /// let spec = PackageSpec::parse("samtools=1.17")?;
    /// assert_eq!(spec.name, "samtools");
    /// assert_eq!(spec.version.as_deref(), Some("1.17"));
    /// # Ok::<(), cwlsmith::CwlError>(())
    /// ```
    pub fn parse(text: &str) -> Result<Self> {
        let caps = PACKAGE_PATTERN
            .captures(text.trim())
            .ok_or_else(|| CwlError::validation(text, "not a conda package spec"))?;
        Ok(Self {
            name: caps[1].to_string(),
            version: caps.get(2).map(|m| m.as_str().to_string()),
        })
    }

    pub fn parse_list(specs: &[&str]) -> Result<Vec<Self>> {
        specs.iter().map(|s| Self::parse(s)).collect()
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}={}", self.name, version),
            None => f.write_str(&self.name),
        }
    }
}

/// Renders a Dockerfile installing `packages` into the base image. With no
/// packages there is no install line.
pub fn dockerfile_from_packages(packages: &[PackageSpec]) -> String {
    let mut dockerfile = format!("FROM {}\n", BASE_IMAGE);
    for channel in CHANNELS {
        dockerfile.push_str(&format!("RUN conda config --add channels {}\n", channel));
    }
    if packages.is_empty() {
        return dockerfile;
    }
    let list: Vec<String> = packages.iter().map(PackageSpec::to_string).collect();
    dockerfile.push_str(&format!("RUN conda install -y {} && conda clean -afy\n", list.join(" ")));
    dockerfile
}

/// Image tag derived from the package names.
pub fn image_tag(packages: &[PackageSpec]) -> String {
    let names: Vec<String> = packages.iter().map(|p| p.name.to_lowercase()).collect();
    format!("cwlsmith/{}:latest", names.join("-"))
}

pub fn software_requirement(packages: &[PackageSpec]) -> Requirement {
    Requirement::SoftwareRequirement {
        packages: packages
            .iter()
            .map(|p| SoftwarePackage {
                package: p.name.clone(),
                version: p.version.iter().cloned().collect(),
                specs: Vec::new(),
            })
            .collect(),
    }
}

/// A `DockerRequirement` building the image for `packages`.
pub fn container_requirement(packages: &[PackageSpec]) -> Requirement {
    Requirement::docker_build(dockerfile_from_packages(packages), image_tag(packages))
}

/// Gives a tool a container built from `packages`, with the package list
/// as a hint for runners that install software themselves.
pub fn provision(process: &mut Process, packages: &[PackageSpec]) -> Result<()> {
    if packages.is_empty() {
        return Err(CwlError::validation(&process.id, "no packages to provision"));
    }
    process.set_requirement(container_requirement(packages));
    process.set_hint(software_requirement(packages));
    debug!("Provisioned '{}' with {} package(s)", process.id, packages.len());
    Ok(())
}
