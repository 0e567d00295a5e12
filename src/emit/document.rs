//! Document Forms
//!
//! Serializable shapes of CWL v1.0 `CommandLineTool` and `Workflow`
//! documents, and the conversions between them and the model. Converting
//! a model into a document runs the pre-emission checks; converting a
//! document back rebuilds the model through the same constructors users
//! call, so a document that loads is as valid as one built in code.

use indexmap::IndexMap;
use log::debug;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_yaml::Value;

use crate::error::{CwlError, Result};
use crate::model::param::Parameter;
use crate::model::{
    validate_process, validate_workflow, Argument, BaseCommand, CwlType, InputParam, Meta,
    OutputParam, ParamList, ParamValue, Process, Requirements, Run, ScatterMethod, SourceRef,
    Step, StepSource, Text, Workflow,
};

/// CWL version written into every document.
pub const CWL_VERSION: &str = "v1.0";

/// Keys extension fields may not use.
const RESERVED_KEYS: &[&str] = &[
    "cwlVersion",
    "class",
    "id",
    "label",
    "doc",
    "baseCommand",
    "arguments",
    "inputs",
    "outputs",
    "requirements",
    "hints",
    "stdout",
    "stderr",
    "steps",
];

/// A parameter written in full or, when reading, as a bare type.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ParamEntry<P> {
    Full(P),
    Short(CwlType),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolDocument {
    pub cwl_version: String,
    pub class: String,
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,

    #[serde(deserialize_with = "one_or_many")]
    pub base_command: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<Argument>,

    pub inputs: IndexMap<String, ParamEntry<InputParam>>,
    pub outputs: IndexMap<String, ParamEntry<OutputParam>>,

    #[serde(default)]
    pub requirements: Requirements,

    #[serde(default)]
    pub hints: Requirements,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<Text>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<Text>,

    #[serde(flatten)]
    pub extensions: IndexMap<String, JsonValue>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDocument {
    pub cwl_version: String,
    pub class: String,
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,

    pub inputs: IndexMap<String, ParamEntry<InputParam>>,
    pub outputs: IndexMap<String, ParamEntry<OutputParam>>,

    #[serde(default)]
    pub requirements: Requirements,

    #[serde(default)]
    pub hints: Requirements,

    pub steps: Vec<StepDocument>,

    #[serde(flatten)]
    pub extensions: IndexMap<String, JsonValue>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepDocument {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,

    pub run: ProcessDocument,

    #[serde(rename = "in", default)]
    pub inputs: IndexMap<String, StepInputEntry>,

    #[serde(default)]
    pub out: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "one_or_many")]
    pub scatter: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scatter_method: Option<ScatterMethod>,
}

/// A step input; `in: {x: other/out}` is read as a bare source.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum StepInputEntry {
    Full(StepInputDocument),
    Source(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StepInputDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Sources>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ParamValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<Text>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Sources {
    One(String),
    Many(Vec<String>),
}

impl Sources {
    fn into_refs(self) -> Vec<SourceRef> {
        match self {
            Self::One(s) => vec![SourceRef::parse(s.trim_start_matches('#'))],
            Self::Many(list) => list
                .iter()
                .map(|s| SourceRef::parse(s.trim_start_matches('#')))
                .collect(),
        }
    }
}

/// A tool or workflow document, told apart by `class` when read.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ProcessDocument {
    Tool(Box<ToolDocument>),
    Workflow(Box<WorkflowDocument>),
}

impl<'de> Deserialize<'de> for ProcessDocument {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let class = value
            .get("class")
            .and_then(Value::as_str)
            .ok_or_else(|| de::Error::missing_field("class"))?;
        match class {
            "CommandLineTool" => serde_yaml::from_value(value)
                .map(|d| Self::Tool(Box::new(d)))
                .map_err(de::Error::custom),
            "Workflow" => serde_yaml::from_value(value)
                .map(|d| Self::Workflow(Box::new(d)))
                .map_err(de::Error::custom),
            other => Err(de::Error::unknown_variant(other, &["CommandLineTool", "Workflow"])),
        }
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    Ok(match Sources::deserialize(deserializer)? {
        Sources::One(s) => vec![s],
        Sources::Many(list) => list,
    })
}

fn check_extensions(owner: &str, meta: &Meta) -> Result<()> {
    if let Some(key) = meta.extensions.keys().find(|k| RESERVED_KEYS.contains(&k.as_str())) {
        return Err(CwlError::emission(
            owner,
            format!("extension key '{}' collides with a document field", key),
        ));
    }
    Ok(())
}

fn param_map<P: Parameter + Clone>(params: &ParamList<P>) -> IndexMap<String, ParamEntry<P>> {
    params
        .emission_order()
        .into_iter()
        .map(|p| (p.id().to_string(), ParamEntry::Full(p.clone())))
        .collect()
}

fn input_list(map: IndexMap<String, ParamEntry<InputParam>>) -> Result<Vec<InputParam>> {
    map.into_iter()
        .map(|(id, entry)| match entry {
            ParamEntry::Full(mut param) => {
                crate::model::param::validate_id(&id, "input")?;
                param.set_id(id);
                match param.default.take() {
                    Some(default) => param.with_default(default),
                    None => Ok(param),
                }
            }
            ParamEntry::Short(param_type) => InputParam::typed(id, param_type),
        })
        .collect()
}

fn output_list(map: IndexMap<String, ParamEntry<OutputParam>>) -> Result<Vec<OutputParam>> {
    map.into_iter()
        .map(|(id, entry)| match entry {
            ParamEntry::Full(mut param) => {
                crate::model::param::validate_id(&id, "output")?;
                param.set_id(id);
                Ok(param)
            }
            ParamEntry::Short(param_type) => OutputParam::typed(id, param_type),
        })
        .collect()
}

fn meta_from(label: Option<String>, doc: Option<String>, extensions: IndexMap<String, JsonValue>) -> Meta {
    Meta {
        label,
        doc,
        extensions,
    }
}

impl ToolDocument {
    /// Builds the document of a tool, after checking it can be emitted.
    pub fn from_process(process: &Process) -> Result<Self> {
        validate_process(process)?;
        check_extensions(&process.id, &process.meta)?;
        let process = process.materialized()?;

        let base_command = match &process.base_command {
            BaseCommand::Tokens(tokens) => tokens.clone(),
            BaseCommand::Script(_) => {
                return Err(CwlError::emission(&process.id, "script base command was not materialized"));
            }
        };

        Ok(Self {
            cwl_version: CWL_VERSION.to_string(),
            class: "CommandLineTool".to_string(),
            id: process.id.clone(),
            label: process.meta.label.clone(),
            doc: process.meta.doc.clone(),
            base_command,
            arguments: process.arguments.clone(),
            inputs: param_map(&process.inputs),
            outputs: param_map(&process.outputs),
            requirements: process.requirements.clone(),
            hints: process.hints.clone(),
            stdout: process.stdout.clone(),
            stderr: process.stderr.clone(),
            extensions: process.meta.extensions.clone(),
        })
    }

    /// Rebuilds the tool described by this document.
    pub fn into_process(self) -> Result<Process> {
        let mut process = Process::new(self.id, BaseCommand::Tokens(self.base_command))?;
        let inputs = input_list(self.inputs)?;
        process = process.with_inputs(inputs)?.with_outputs(output_list(self.outputs)?)?;
        process.arguments = self.arguments;
        process.requirements = self.requirements;
        process.hints = self.hints;
        process.stdout = self.stdout;
        process.stderr = self.stderr;
        process.meta = meta_from(self.label, self.doc, self.extensions);
        Ok(process)
    }
}

impl StepDocument {
    fn from_step(step: &Step) -> Result<Self> {
        let mut inputs = IndexMap::new();
        for (key, input) in &step.inputs {
            let mut entry = StepInputDocument {
                value_from: input.value_from.clone(),
                ..StepInputDocument::default()
            };
            match &input.source {
                Some(StepSource::Refs(refs)) if refs.len() == 1 => {
                    entry.source = Some(Sources::One(refs[0].to_string()));
                }
                Some(StepSource::Refs(refs)) => {
                    entry.source = Some(Sources::Many(refs.iter().map(SourceRef::to_string).collect()));
                }
                Some(StepSource::Literal(value)) => entry.default = Some(value.clone()),
                Some(StepSource::Pending(_)) => {
                    return Err(CwlError::emission(
                        &step.id,
                        format!("source of '{}' was never resolved", key),
                    ));
                }
                None => {}
            }
            inputs.insert(key.clone(), StepInputEntry::Full(entry));
        }

        Ok(Self {
            id: step.id.clone(),
            label: step.label.clone(),
            doc: step.doc.clone(),
            run: ProcessDocument::from_run(&step.run)?,
            inputs,
            out: step.output_ids(),
            scatter: step.scatter.clone(),
            scatter_method: step.scatter_method,
        })
    }

    fn into_step(self) -> Result<Step> {
        let mut step = Step::new(self.id, self.run.into_run()?)?;
        for (key, entry) in self.inputs {
            let document = match entry {
                StepInputEntry::Full(document) => document,
                StepInputEntry::Source(source) => StepInputDocument {
                    source: Some(Sources::One(source)),
                    ..StepInputDocument::default()
                },
            };
            let source = match (document.source, document.default) {
                (Some(sources), _) => Some(StepSource::Refs(sources.into_refs())),
                (None, Some(value)) => Some(StepSource::Literal(value)),
                (None, None) => None,
            };
            let input = step.inputs.entry(key).or_default();
            input.source = source;
            input.value_from = document.value_from;
        }
        step.scatter = self.scatter;
        step.scatter_method = self.scatter_method;
        step.label = self.label;
        step.doc = self.doc;
        Ok(step)
    }
}

impl WorkflowDocument {
    /// Builds the document of a workflow, after checking it can be emitted.
    pub fn from_workflow(workflow: &Workflow) -> Result<Self> {
        validate_workflow(workflow)?;
        check_extensions(&workflow.id, &workflow.meta)?;

        let steps = workflow
            .steps()
            .iter()
            .map(StepDocument::from_step)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            cwl_version: CWL_VERSION.to_string(),
            class: "Workflow".to_string(),
            id: workflow.id.clone(),
            label: workflow.meta.label.clone(),
            doc: workflow.meta.doc.clone(),
            inputs: param_map(&workflow.inputs),
            outputs: param_map(&workflow.outputs),
            requirements: workflow.requirements.clone(),
            hints: workflow.hints.clone(),
            steps,
            extensions: workflow.meta.extensions.clone(),
        })
    }

    /// Rebuilds the workflow, re-resolving every step source in order.
    pub fn into_workflow(self) -> Result<Workflow> {
        let mut workflow = Workflow::new(self.id)?;
        let inputs = input_list(self.inputs)?;
        workflow = workflow.with_inputs(inputs)?;
        workflow.requirements = self.requirements;
        workflow.hints = self.hints;
        workflow.meta = meta_from(self.label, self.doc, self.extensions);

        for step in self.steps {
            workflow.add_step(step.into_step()?)?;
        }
        for output in output_list(self.outputs)? {
            workflow.add_output(output)?;
        }
        Ok(workflow)
    }
}

impl ProcessDocument {
    pub fn from_run(run: &Run) -> Result<Self> {
        Ok(match run {
            Run::Tool(process) => Self::Tool(Box::new(ToolDocument::from_process(process)?)),
            Run::Workflow(workflow) => Self::Workflow(Box::new(WorkflowDocument::from_workflow(workflow)?)),
        })
    }

    pub fn into_run(self) -> Result<Run> {
        let run = match self {
            Self::Tool(document) => Run::from(document.into_process()?),
            Self::Workflow(document) => Run::from(document.into_workflow()?),
        };
        debug!("Rebuilt '{}' from document", run.id());
        Ok(run)
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Tool(document) => &document.id,
            Self::Workflow(document) => &document.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_forms_accepted() {
        let yaml = r#"
cwlVersion: v1.0
class: CommandLineTool
id: wc
baseCommand: wc
inputs:
  files: File[]
  lines:
    type: boolean?
    inputBinding:
      prefix: -l
outputs:
  counts: stdout
stdout: counts.txt
"#;
        let document: ProcessDocument = serde_yaml::from_str(yaml).unwrap();
        let process = match document.into_run().unwrap() {
            Run::Tool(process) => process,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(process.base_command.tokens(), Some(&["wc".to_string()][..]));
        assert_eq!(process.inputs.get("files").unwrap().param_type, CwlType::parse("File[]").unwrap());
        assert_eq!(
            process.inputs.get("lines").unwrap().input_binding.as_ref().unwrap().prefix.as_deref(),
            Some("-l")
        );
        assert_eq!(process.outputs.get("counts").unwrap().param_type, CwlType::Stdout);
    }

    #[test]
    fn test_array_descriptor_input() {
        let yaml = r#"
cwlVersion: v1.0
class: CommandLineTool
id: cat
baseCommand: [cat]
inputs:
  parts:
    type: array
    items: File
outputs: {}
"#;
        let document: ProcessDocument = serde_yaml::from_str(yaml).unwrap();
        let Run::Tool(process) = document.into_run().unwrap() else {
            panic!("expected a tool");
        };
        assert!(process.inputs.get("parts").unwrap().param_type.is_file_array());
    }

    #[test]
    fn test_parsed_default_checked() {
        let tool = |default: &str| {
            format!(
                "cwlVersion: v1.0\nclass: CommandLineTool\nid: head\nbaseCommand: head\n\
                 inputs:\n  n:\n    type: int\n    default: {}\noutputs: {{}}\n",
                default
            )
        };

        let document: ProcessDocument = serde_yaml::from_str(&tool("10")).unwrap();
        let Run::Tool(process) = document.into_run().unwrap() else {
            panic!("expected a tool");
        };
        assert_eq!(process.inputs.get("n").unwrap().default, Some(ParamValue::Int(10)));

        let document: ProcessDocument = serde_yaml::from_str(&tool("many")).unwrap();
        assert!(matches!(document.into_run(), Err(CwlError::Validation { .. })));
    }

    #[test]
    fn test_unknown_class_rejected() {
        let result: std::result::Result<ProcessDocument, _> =
            serde_yaml::from_str("class: ExpressionTool\nid: x\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_reserved_extension_key() {
        let process = Process::new("t", "ls")
            .unwrap()
            .with_meta(Meta::new().with_extension("inputs", JsonValue::Null));
        assert!(matches!(
            ToolDocument::from_process(&process),
            Err(CwlError::Emission { .. })
        ));
    }

    #[test]
    fn test_short_step_input() {
        let entry: StepInputEntry = serde_yaml::from_str("Uncomp/rfile").unwrap();
        assert_eq!(entry, StepInputEntry::Source("Uncomp/rfile".to_string()));
    }
}
