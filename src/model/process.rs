//! Command-Line Tool Model
//!
//! A [`Process`] describes one command-line tool: its base command, extra
//! arguments, inputs, outputs, requirements, hints and stdout/stderr
//! capture. Values for its inputs are bound afterwards with
//! [`Process::set_value`] and kept apart from the declarations.
//!
//! # Example
//!
//! ```
//! use cwlsmith::model::{InputParam, Process};
//!
//! let mut echo = Process::new("echo", "echo")?
//!     .with_inputs(vec![InputParam::new("sth", "string")?])?;
//! echo.set_value("sth", "Hello World!")?;
//! # Ok::<(), cwlsmith::CwlError>(())
//! ```

use std::borrow::Cow;

use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::expression::Text;
use super::meta::Meta;
use super::param::{bind_value, ordered_values, validate_id, InputParam, OutputParam, ParamList, ValueStore};
use super::requirement::{Dirent, Requirement, Requirements};
use super::script::ScriptFunction;
use super::types::{CwlType, ParamValue};
use crate::error::{CwlError, Result};

/// Id given to the output synthesized for tools without outputs.
pub const STDOUT_OUTPUT_ID: &str = "output";

/// What the tool runs.
#[derive(Debug, Clone, PartialEq)]
pub enum BaseCommand {
    /// A command and its leading fixed tokens, e.g. `["samtools", "sort"]`
    Tokens(Vec<String>),

    /// A script function rendered into a staged script at emission time
    Script(Box<ScriptFunction>),
}

impl BaseCommand {
    pub fn tokens(&self) -> Option<&[String]> {
        match self {
            Self::Tokens(tokens) => Some(tokens),
            Self::Script(_) => None,
        }
    }
}

impl From<&str> for BaseCommand {
    fn from(command: &str) -> Self {
        Self::Tokens(command.split_whitespace().map(str::to_string).collect())
    }
}

impl From<Vec<&str>> for BaseCommand {
    fn from(tokens: Vec<&str>) -> Self {
        Self::Tokens(tokens.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for BaseCommand {
    fn from(tokens: Vec<String>) -> Self {
        Self::Tokens(tokens)
    }
}

impl From<ScriptFunction> for BaseCommand {
    fn from(function: ScriptFunction) -> Self {
        Self::Script(Box::new(function))
    }
}

/// A binding record in the `arguments` list.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArgumentBinding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separate: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<Text>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell_quote: Option<bool>,
}

/// An extra command-line token not tied to an input.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Argument {
    Token(Text),
    Binding(ArgumentBinding),
}

impl Argument {
    /// A positioned argument whose value is literal text or an expression.
    pub fn at(position: i32, value: impl Into<Text>) -> Self {
        Self::Binding(ArgumentBinding {
            position: Some(position),
            value_from: Some(value.into()),
            ..ArgumentBinding::default()
        })
    }
}

impl From<&str> for Argument {
    fn from(token: &str) -> Self {
        Self::Token(Text::literal(token))
    }
}

/// A single command-line tool description.
#[derive(Debug, Clone, PartialEq)]
pub struct Process {
    pub id: String,
    pub base_command: BaseCommand,
    pub arguments: Vec<Argument>,
    pub inputs: ParamList<InputParam>,
    pub outputs: ParamList<OutputParam>,
    pub requirements: Requirements,
    pub hints: Requirements,
    pub stdout: Option<Text>,
    pub stderr: Option<Text>,
    pub meta: Meta,
    values: ValueStore,
}

impl Process {
    /// Creates a tool with no parameters.
    pub fn new(id: impl Into<String>, base_command: impl Into<BaseCommand>) -> Result<Self> {
        let id = id.into();
        validate_id(&id, "process")?;
        let base_command = base_command.into();
        if let BaseCommand::Tokens(tokens) = &base_command {
            if tokens.is_empty() {
                return Err(CwlError::validation(&id, "base command is empty"));
            }
        }
        Ok(Self {
            id,
            base_command,
            arguments: Vec::new(),
            inputs: ParamList::new(),
            outputs: ParamList::new(),
            requirements: Requirements::new(),
            hints: Requirements::new(),
            stdout: None,
            stderr: None,
            meta: Meta::new(),
            values: ValueStore::new(),
        })
    }

    pub fn with_inputs(mut self, inputs: Vec<InputParam>) -> Result<Self> {
        for input in inputs {
            self.inputs.push(input, &self.id)?;
        }
        Ok(self)
    }

    pub fn with_outputs(mut self, outputs: Vec<OutputParam>) -> Result<Self> {
        for output in outputs {
            self.outputs.push(output, &self.id)?;
        }
        Ok(self)
    }

    pub fn argument(mut self, argument: impl Into<Argument>) -> Self {
        self.arguments.push(argument.into());
        self
    }

    pub fn requirement(mut self, requirement: Requirement) -> Self {
        self.requirements.set(requirement);
        self
    }

    pub fn hint(mut self, hint: Requirement) -> Self {
        self.hints.set(hint);
        self
    }

    pub fn stdout(mut self, name: impl Into<Text>) -> Self {
        self.stdout = Some(name.into());
        self
    }

    pub fn stderr(mut self, name: impl Into<Text>) -> Self {
        self.stderr = Some(name.into());
        self
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }

    pub fn add_input(&mut self, input: InputParam) -> Result<()> {
        self.inputs.push(input, &self.id)
    }

    pub fn add_output(&mut self, output: OutputParam) -> Result<()> {
        self.outputs.push(output, &self.id)
    }

    pub fn set_base_command(&mut self, base_command: impl Into<BaseCommand>) {
        self.base_command = base_command.into();
    }

    pub fn set_arguments(&mut self, arguments: Vec<Argument>) {
        self.arguments = arguments;
    }

    pub fn set_requirement(&mut self, requirement: Requirement) {
        self.requirements.set(requirement);
    }

    pub fn set_hint(&mut self, hint: Requirement) {
        self.hints.set(hint);
    }

    pub fn set_stdout(&mut self, name: Option<Text>) {
        self.stdout = name;
    }

    /// Binds a value to a declared input.
    ///
    /// Fails with `NotFound` for undeclared ids and `TypeMismatch` when the
    /// value does not fit, including File paths that do not exist.
    pub fn set_value(&mut self, id: &str, value: impl Into<ParamValue>) -> Result<()> {
        bind_value(&self.inputs, &mut self.values, &self.id, id, value.into())?;
        debug!("Bound value for '{}/{}'", self.id, id);
        Ok(())
    }

    pub fn value(&self, id: &str) -> Option<&ParamValue> {
        self.values.get(id)
    }

    pub fn clear_value(&mut self, id: &str) -> Option<ParamValue> {
        self.values.shift_remove(id)
    }

    /// Bound values in emission order.
    pub fn values(&self) -> Vec<(&str, &ParamValue)> {
        ordered_values(&self.inputs, &self.values)
    }

    /// Stages a manifest file listing the paths of an array-of-File input.
    pub fn stage_manifest(&mut self, input_id: &str, separator: &str) -> Result<()> {
        let input = self
            .inputs
            .get(input_id)
            .ok_or_else(|| CwlError::not_found("input", input_id, &self.id))?;
        if !input.param_type.is_file_array() {
            return Err(CwlError::validation(
                &self.id,
                format!("manifest input '{}' must be File[], found {}", input_id, input.param_type),
            ));
        }
        self.requirements.stage(Dirent::manifest(input_id, separator)?);
        self.requirements.ensure(Requirement::inline_javascript());
        Ok(())
    }

    /// Outputs as they will be emitted. A tool with no outputs captures
    /// its standard output.
    pub fn effective_outputs(&self) -> Cow<'_, ParamList<OutputParam>> {
        if !self.outputs.is_empty() {
            return Cow::Borrowed(&self.outputs);
        }
        let mut outputs = ParamList::new();
        outputs.upsert(OutputParam {
            id: STDOUT_OUTPUT_ID.to_string(),
            param_type: CwlType::Stdout,
            label: None,
            doc: None,
            output_binding: None,
            output_source: None,
        });
        Cow::Owned(outputs)
    }

    /// Stdout file name as it will be emitted. Generated when an output
    /// captures stdout but no name was set.
    pub fn effective_stdout(&self) -> Option<Text> {
        if self.stdout.is_some() {
            return self.stdout.clone();
        }
        let captures = self
            .effective_outputs()
            .iter()
            .any(|o| o.param_type == CwlType::Stdout);
        captures.then(|| Text::literal(generated_name(&self.id, "out")))
    }

    pub fn effective_stderr(&self) -> Option<Text> {
        if self.stderr.is_some() {
            return self.stderr.clone();
        }
        let captures = self.outputs.iter().any(|o| o.param_type == CwlType::Stderr);
        captures.then(|| Text::literal(generated_name(&self.id, "err")))
    }

    /// Returns the tool as it is written into a document: script functions
    /// rendered and staged, capture outputs synthesized.
    pub fn materialized(&self) -> Result<Process> {
        let mut process = self.clone();

        if let BaseCommand::Script(function) = &self.base_command {
            // Without declared params the function takes every input.
            let mut function = function.as_ref().clone();
            if function.params.is_empty() {
                function.params = self.inputs.iter().map(|p| p.id.clone()).collect();
            }
            for param in &function.params {
                if !self.inputs.contains(param) {
                    return Err(CwlError::UnsupportedCapture {
                        script: function.name.clone(),
                        name: param.clone(),
                        message: "function parameter is not a declared input".to_string(),
                    });
                }
            }
            let script = function.render()?;
            let file_name = function.file_name();

            process.base_command = BaseCommand::Tokens(vec![
                function.language.interpreter().to_string(),
                file_name.clone(),
            ]);
            process.requirements.stage(Dirent::new(file_name, Text::literal(script)));

            let passed = process
                .inputs
                .iter_mut()
                .filter(|input| function.params.contains(&input.id));
            for (index, input) in passed.enumerate() {
                let binding = input.input_binding.get_or_insert_with(Default::default);
                binding.prefix = Some(format!("{}=", input.id));
                binding.separate = Some(false);
                binding.position = Some(index as i32 + 1);
            }
            debug!("Materialized script base command for '{}'", self.id);
        }

        process.outputs = self.effective_outputs().into_owned();
        process.stdout = self.effective_stdout();
        process.stderr = self.effective_stderr();
        Ok(process)
    }
}

/// Parameter surface shared by tools and workflows, so either can be the
/// target of a step.
pub trait Interface {
    fn id(&self) -> &str;
    fn inputs(&self) -> &ParamList<InputParam>;

    /// Output ids as they will be emitted.
    fn output_ids(&self) -> Vec<String>;
    fn requirements(&self) -> &Requirements;
    fn hints(&self) -> &Requirements;
    fn meta(&self) -> &Meta;
    fn bind(&mut self, id: &str, value: ParamValue) -> Result<()>;
    fn bound_values(&self) -> Vec<(&str, &ParamValue)>;
}

impl Interface for Process {
    fn id(&self) -> &str {
        &self.id
    }

    fn inputs(&self) -> &ParamList<InputParam> {
        &self.inputs
    }

    fn output_ids(&self) -> Vec<String> {
        self.effective_outputs().iter().map(|o| o.id.clone()).collect()
    }

    fn requirements(&self) -> &Requirements {
        &self.requirements
    }

    fn hints(&self) -> &Requirements {
        &self.hints
    }

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn bind(&mut self, id: &str, value: ParamValue) -> Result<()> {
        self.set_value(id, value)
    }

    fn bound_values(&self) -> Vec<(&str, &ParamValue)> {
        self.values()
    }
}

/// Deterministic temporary-looking file name for an owner id.
fn generated_name(owner: &str, extension: &str) -> String {
    let uuid = Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("cwlsmith:{}", owner).as_bytes());
    let hex = uuid.simple().to_string();
    format!("tmp{}.{}", &hex[..10], extension)
}
