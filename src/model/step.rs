//! Workflow Steps
//!
//! A [`Step`] runs a tool or a nested workflow inside a workflow. Each of
//! its inputs is wired to a source written the way it appears in the
//! document: a workflow input id or a `<stepId>/<outputId>` reference.
//! Literal values are wired separately. Sources given as strings stay
//! pending until the step is added to a workflow, which resolves them.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::expression::Text;
use super::meta::Meta;
use super::param::{InputParam, ParamList};
use super::process::{Interface, Process};
use super::requirement::{Requirement, Requirements};
use super::types::ParamValue;
use super::workflow::Workflow;
use crate::error::{CwlError, Result};

/// How several scattered inputs are combined.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScatterMethod {
    /// Element-wise; all scattered arrays must have the same length
    Dotproduct,
    NestedCrossproduct,
    FlatCrossproduct,
}

/// A resolved source reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceRef {
    /// An input of the owning workflow
    Input(String),

    /// An output of an earlier step
    Output { step: String, output: String },
}

impl SourceRef {
    /// Splits `<stepId>/<outputId>`; anything else is a workflow input id.
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('/') {
            Some((step, output)) => Self::Output {
                step: step.to_string(),
                output: output.to_string(),
            },
            None => Self::Input(raw.to_string()),
        }
    }

    pub fn step(&self) -> Option<&str> {
        match self {
            Self::Output { step, .. } => Some(step),
            Self::Input(_) => None,
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input(id) => f.write_str(id),
            Self::Output { step, output } => write!(f, "{}/{}", step, output),
        }
    }
}

/// Where a step input takes its value from.
#[derive(Debug, Clone, PartialEq)]
pub enum StepSource {
    /// Raw source strings not yet classified against a workflow
    Pending(Vec<String>),
    Literal(ParamValue),

    /// One reference, or several merged into one input
    Refs(Vec<SourceRef>),
}

/// Wiring of one input of a step's run target.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepInput {
    pub source: Option<StepSource>,
    pub value_from: Option<Text>,
}

impl StepInput {
    pub fn refs(&self) -> &[SourceRef] {
        match &self.source {
            Some(StepSource::Refs(refs)) => refs,
            _ => &[],
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.source, Some(StepSource::Pending(_)))
    }
}

/// The tool or workflow a step runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Run {
    Tool(Box<Process>),
    Workflow(Box<Workflow>),
}

impl Run {
    pub fn interface(&self) -> &dyn Interface {
        match self {
            Self::Tool(process) => &**process,
            Self::Workflow(workflow) => &**workflow,
        }
    }

    pub fn interface_mut(&mut self) -> &mut dyn Interface {
        match self {
            Self::Tool(process) => &mut **process,
            Self::Workflow(workflow) => &mut **workflow,
        }
    }

    pub fn id(&self) -> &str {
        self.interface().id()
    }

    pub fn has_input(&self, id: &str) -> bool {
        self.interface().inputs().contains(id)
    }

    pub fn has_output(&self, id: &str) -> bool {
        self.interface().output_ids().iter().any(|o| o == id)
    }

    pub fn is_workflow(&self) -> bool {
        matches!(self, Self::Workflow(_))
    }
}

impl Interface for Run {
    fn id(&self) -> &str {
        self.interface().id()
    }

    fn inputs(&self) -> &ParamList<InputParam> {
        self.interface().inputs()
    }

    fn output_ids(&self) -> Vec<String> {
        self.interface().output_ids()
    }

    fn requirements(&self) -> &Requirements {
        self.interface().requirements()
    }

    fn hints(&self) -> &Requirements {
        self.interface().hints()
    }

    fn meta(&self) -> &Meta {
        self.interface().meta()
    }

    fn bind(&mut self, id: &str, value: ParamValue) -> Result<()> {
        self.interface_mut().bind(id, value)
    }

    fn bound_values(&self) -> Vec<(&str, &ParamValue)> {
        self.interface().bound_values()
    }
}

impl From<Process> for Run {
    fn from(process: Process) -> Self {
        Self::Tool(Box::new(process))
    }
}

impl From<Workflow> for Run {
    fn from(workflow: Workflow) -> Self {
        Self::Workflow(Box::new(workflow))
    }
}

/// One invocation of a tool or workflow inside a workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub id: String,
    pub run: Run,
    pub inputs: IndexMap<String, StepInput>,
    pub scatter: Vec<String>,
    pub scatter_method: Option<ScatterMethod>,
    pub label: Option<String>,
    pub doc: Option<String>,
}

impl Step {
    pub fn new(id: impl Into<String>, run: impl Into<Run>) -> Result<Self> {
        let id = id.into();
        super::param::validate_id(&id, "step")?;
        Ok(Self {
            id,
            run: run.into(),
            inputs: IndexMap::new(),
            scatter: Vec::new(),
            scatter_method: None,
            label: None,
            doc: None,
        })
    }

    fn entry(&mut self, key: &str) -> &mut StepInput {
        self.inputs.entry(key.to_string()).or_default()
    }

    /// Wires an input to a workflow input id or a `<stepId>/<outputId>`
    /// reference. Use [`Step::literal`] for values.
    pub fn input(mut self, key: &str, source: &str) -> Self {
        self.entry(key).source = Some(StepSource::Pending(vec![source.to_string()]));
        self
    }

    /// Merges several references into one input.
    pub fn merge(mut self, key: &str, sources: &[&str]) -> Self {
        let sources = sources.iter().map(|s| s.to_string()).collect();
        self.entry(key).source = Some(StepSource::Pending(sources));
        self
    }

    /// Wires an input to a literal value.
    pub fn literal(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.entry(key).source = Some(StepSource::Literal(value.into()));
        self
    }

    pub fn value_from(mut self, key: &str, value: impl Into<Text>) -> Self {
        self.entry(key).value_from = Some(value.into());
        self
    }

    pub fn scatter(mut self, keys: &[&str]) -> Self {
        self.scatter = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn scatter_method(mut self, method: ScatterMethod) -> Self {
        self.scatter_method = Some(method);
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

    /// Output ids exposed by this step, from its run target.
    pub fn output_ids(&self) -> Vec<String> {
        self.run.interface().output_ids()
    }

    /// Checks input keys and scatter keys against the run target.
    pub(crate) fn check_wiring(&self) -> Result<()> {
        for key in self.inputs.keys() {
            if !self.run.has_input(key) {
                return Err(CwlError::validation(
                    &self.id,
                    format!("'{}' is not an input of '{}'", key, self.run.id()),
                ));
            }
        }
        for key in &self.scatter {
            if !self.inputs.contains_key(key) {
                return Err(CwlError::validation(
                    &self.id,
                    format!("scatter key '{}' is not a wired input", key),
                ));
            }
        }
        if self.scatter.is_empty() && self.scatter_method.is_some() {
            return Err(CwlError::validation(&self.id, "scatter method without scatter keys"));
        }
        Ok(())
    }

    /// Capability requirements the owning workflow must carry for this step.
    pub fn capabilities(&self) -> Vec<Requirement> {
        let mut needed = Vec::new();
        if !self.scatter.is_empty() {
            needed.push(Requirement::ScatterFeatureRequirement);
        }
        if self.run.is_workflow() {
            needed.push(Requirement::SubworkflowFeatureRequirement);
        }
        if self.inputs.values().any(|i| i.refs().len() > 1) {
            needed.push(Requirement::MultipleInputFeatureRequirement);
        }
        if self.inputs.values().any(|i| i.value_from.is_some()) {
            needed.push(Requirement::StepInputExpressionRequirement);
        }
        if self
            .inputs
            .values()
            .any(|i| i.value_from.as_ref().is_some_and(Text::is_expression))
        {
            needed.push(Requirement::inline_javascript());
        }
        needed
    }
}
