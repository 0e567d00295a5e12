//! Workflows
//!
//! A [`Workflow`] has the same parameter surface as a tool plus an ordered
//! list of steps. Steps can only be appended, and a step may only refer to
//! steps already present, so the stored order is always a valid
//! topological order and cycles cannot be built.
//!
//! # Example
//!
//! ```
//! use cwlsmith::model::{InputParam, OutputParam, Process, Step, Workflow};
//!
//! let uncomp = Process::new("uncomp", "gunzip -c")?
//!     .with_inputs(vec![InputParam::new("archive", "File")?.position(1)])?
//!     .with_outputs(vec![OutputParam::stdout("rfile")?])?;
//! let compile = Process::new("compile", "gcc -o app")?
//!     .with_inputs(vec![InputParam::new("rfile", "File")?])?;
//!
//! let mut wf = Workflow::new("build")?
//!     .with_inputs(vec![InputParam::new("archive", "File")?])?;
//! wf.add_step(Step::new("Uncomp", uncomp)?.input("archive", "archive"))?;
//! wf.add_step(Step::new("Compile", compile)?.input("rfile", "Uncomp/rfile"))?;
//! wf.add_output(OutputParam::new("binary", "File")?.source("Compile/output"))?;
//! # Ok::<(), cwlsmith::CwlError>(())
//! ```

use log::debug;

use super::expression::Text;
use super::meta::Meta;
use super::param::{bind_value, ordered_values, validate_id, InputParam, OutputParam, ParamList, ValueStore};
use super::process::{Argument, BaseCommand, Interface, Process};
use super::requirement::{Requirement, Requirements};
use super::step::{Run, SourceRef, Step, StepSource};
use super::types::{CwlType, ParamValue};
use crate::error::{CwlError, Result};

/// A field replaced by [`Workflow::override_at`].
#[derive(Debug, Clone, PartialEq)]
pub enum Override {
    Arguments(Vec<Argument>),
    BaseCommand(BaseCommand),
    Stdout(Option<Text>),

    /// Replaces the record of the same class, or adds it
    Requirement(Requirement),
    Hint(Requirement),
}

/// An ordered pipeline of steps.
#[derive(Debug, Clone, PartialEq)]
pub struct Workflow {
    pub id: String,
    pub inputs: ParamList<InputParam>,
    pub outputs: ParamList<OutputParam>,
    pub requirements: Requirements,
    pub hints: Requirements,
    pub meta: Meta,
    steps: Vec<Step>,
    values: ValueStore,
}

impl Workflow {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_id(&id, "workflow")?;
        Ok(Self {
            id,
            inputs: ParamList::new(),
            outputs: ParamList::new(),
            requirements: Requirements::new(),
            hints: Requirements::new(),
            meta: Meta::new(),
            steps: Vec::new(),
            values: ValueStore::new(),
        })
    }

    pub fn with_inputs(mut self, inputs: Vec<InputParam>) -> Result<Self> {
        for input in inputs {
            self.inputs.push(input, &self.id)?;
        }
        Ok(self)
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
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

    pub fn add_input(&mut self, input: InputParam) -> Result<()> {
        self.inputs.push(input, &self.id)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Appends a step after resolving its sources against the inputs and
    /// the steps already present.
    ///
    /// Capability requirements the step needs are added to the workflow.
    pub fn add_step(&mut self, mut step: Step) -> Result<()> {
        if self.step(&step.id).is_some() {
            return Err(CwlError::validation(
                &self.id,
                format!("duplicate step id '{}'", step.id),
            ));
        }
        step.check_wiring()?;

        let run_id = step.run.id().to_string();
        for (key, input) in step.inputs.iter_mut() {
            let context = format!("{}/{}", step.id, key);
            let resolved = match input.source.take() {
                Some(StepSource::Pending(raw)) => Some(self.classify(&context, raw)?),
                Some(StepSource::Refs(refs)) => {
                    for r in &refs {
                        self.check_ref(&context, r)?;
                    }
                    Some(StepSource::Refs(refs))
                }
                other => other,
            };

            if let Some(StepSource::Literal(value)) = &resolved {
                let param_type = step
                    .run
                    .interface()
                    .inputs()
                    .get(key)
                    .map(|p| p.param_type.clone())
                    .ok_or_else(|| CwlError::not_found("input", key.as_str(), &run_id))?;
                let value = param_type.coerce(value.clone());
                if !param_type.accepts(&value) {
                    return Err(CwlError::TypeMismatch {
                        id: context,
                        expected: param_type.to_string(),
                        found: value.kind().to_string(),
                    });
                }
                input.source = Some(StepSource::Literal(value));
            } else {
                input.source = resolved;
            }
        }

        for requirement in step.capabilities() {
            let class = requirement.class();
            if self.requirements.ensure(requirement) {
                debug!("Added {} to '{}' for step '{}'", class, self.id, step.id);
            }
        }

        debug!("Added step '{}' running '{}' to '{}'", step.id, run_id, self.id);
        self.steps.push(step);
        Ok(())
    }

    pub fn with_step(mut self, step: Step) -> Result<Self> {
        self.add_step(step)?;
        Ok(self)
    }

    /// Appends every step of `other` after the steps of `self`.
    ///
    /// Inputs of `other` are merged in; an input id present in both must
    /// have the same type. Requirements already on `self` are kept.
    pub fn concat(mut self, other: Workflow) -> Result<Self> {
        for input in other.inputs.iter() {
            match self.inputs.get(&input.id) {
                Some(existing) if existing.param_type != input.param_type => {
                    return Err(CwlError::validation(
                        &self.id,
                        format!(
                            "input '{}' is {} here and {} in '{}'",
                            input.id, existing.param_type, input.param_type, other.id
                        ),
                    ));
                }
                Some(_) => {}
                None => self.inputs.push(input.clone(), &self.id)?,
            }
        }
        for requirement in other.requirements.iter() {
            self.requirements.ensure(requirement.clone());
        }
        for hint in other.hints.iter() {
            self.hints.ensure(hint.clone());
        }
        for step in other.steps {
            self.add_step(step)?;
        }
        for output in other.outputs.iter() {
            self.add_output(output.clone())?;
        }
        for (id, value) in other.values {
            self.values.entry(id).or_insert(value);
        }
        Ok(self)
    }

    /// Classifies raw source strings as `step/output` pairs or workflow
    /// input ids. Every one must resolve; literals are never inferred.
    fn classify(&self, context: &str, raw: Vec<String>) -> Result<StepSource> {
        let mut refs = Vec::with_capacity(raw.len());
        for source in &raw {
            let r = SourceRef::parse(source);
            self.check_ref(context, &r)?;
            refs.push(r);
        }
        Ok(StepSource::Refs(refs))
    }

    fn check_ref(&self, context: &str, r: &SourceRef) -> Result<()> {
        match r {
            SourceRef::Input(id) => {
                if !self.inputs.contains(id) {
                    return Err(CwlError::dangling(
                        context,
                        id.as_str(),
                        format!("'{}' has no input with this id", self.id),
                    ));
                }
            }
            SourceRef::Output { step, output } => {
                let target = self.step(step).ok_or_else(|| {
                    CwlError::dangling(context, r.to_string(), "no earlier step with this id")
                })?;
                if !target.run.has_output(output) {
                    return Err(CwlError::dangling(
                        context,
                        r.to_string(),
                        format!("step '{}' has no output '{}'", step, output),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Adds a workflow output taken from a step output or a workflow input.
    pub fn add_output(&mut self, output: OutputParam) -> Result<()> {
        let source = output.output_source.as_deref().ok_or_else(|| {
            CwlError::validation(&self.id, format!("output '{}' has no source", output.id))
        })?;
        let context = format!("{}#{}", self.id, output.id);
        self.check_ref(&context, &SourceRef::parse(source))?;
        self.outputs.push(output, &self.id)
    }

    pub fn with_output(mut self, output: OutputParam) -> Result<Self> {
        self.add_output(output)?;
        Ok(self)
    }

    /// Type the workflow exposes for a source reference.
    pub fn source_type(&self, r: &SourceRef) -> Option<CwlType> {
        match r {
            SourceRef::Input(id) => self.inputs.get(id).map(|p| p.param_type.clone()),
            SourceRef::Output { step, output } => match &self.step(step)?.run {
                Run::Tool(process) => process
                    .effective_outputs()
                    .get(output)
                    .map(|o| o.param_type.clone()),
                Run::Workflow(workflow) => workflow.outputs.get(output).map(|o| o.param_type.clone()),
            },
        }
    }

    /// Binds a value to a workflow input.
    pub fn set_value(&mut self, id: &str, value: impl Into<ParamValue>) -> Result<()> {
        bind_value(&self.inputs, &mut self.values, &self.id, id, value.into())?;
        debug!("Bound value for '{}/{}'", self.id, id);
        Ok(())
    }

    pub fn value(&self, id: &str) -> Option<&ParamValue> {
        self.values.get(id)
    }

    pub fn values(&self) -> Vec<(&str, &ParamValue)> {
        ordered_values(&self.inputs, &self.values)
    }

    /// Looks up the step at a `/`-separated path through nested workflows.
    pub fn step_at_mut(&mut self, path: &str) -> Result<&mut Step> {
        let owner = self.id.clone();
        let (head, rest) = match path.split_once('/') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let step = self
            .steps
            .iter_mut()
            .find(|s| s.id == head)
            .ok_or_else(|| CwlError::not_found("step", head, &owner))?;

        match rest {
            None => Ok(step),
            Some(rest) => match &mut step.run {
                Run::Workflow(nested) => nested.step_at_mut(rest),
                Run::Tool(_) => Err(CwlError::validation(
                    path,
                    format!("step '{}' runs a tool, not a workflow", head),
                )),
            },
        }
    }

    /// Replaces one field of the tool or workflow run by the step at
    /// `path`, leaving every other step untouched.
    pub fn override_at(&mut self, path: &str, field: Override) -> Result<()> {
        let step = self.step_at_mut(path)?;
        match (&mut step.run, field) {
            (Run::Tool(process), field) => apply_to_process(process, field),
            (Run::Workflow(nested), Override::Requirement(r)) => nested.requirements.set(r),
            (Run::Workflow(nested), Override::Hint(h)) => nested.hints.set(h),
            (Run::Workflow(_), other) => {
                return Err(CwlError::validation(
                    path,
                    format!("{:?} cannot be applied to a nested workflow", other),
                ));
            }
        }
        debug!("Applied override at '{}' in '{}'", path, self.id);
        Ok(())
    }

    /// The tool run by the step at `path`.
    pub fn process_at_mut(&mut self, path: &str) -> Result<&mut Process> {
        match &mut self.step_at_mut(path)?.run {
            Run::Tool(process) => Ok(&mut **process),
            Run::Workflow(_) => Err(CwlError::validation(path, "step runs a workflow, not a tool")),
        }
    }
}

fn apply_to_process(process: &mut Process, field: Override) {
    match field {
        Override::Arguments(arguments) => process.set_arguments(arguments),
        Override::BaseCommand(command) => process.set_base_command(command),
        Override::Stdout(stdout) => process.set_stdout(stdout),
        Override::Requirement(r) => process.set_requirement(r),
        Override::Hint(h) => process.set_hint(h),
    }
}

impl Interface for Workflow {
    fn id(&self) -> &str {
        &self.id
    }

    fn inputs(&self) -> &ParamList<InputParam> {
        &self.inputs
    }

    fn output_ids(&self) -> Vec<String> {
        self.outputs.iter().map(|o| o.id.clone()).collect()
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

#[cfg(test)]
mod tests {
    use super::*;

    fn uncomp() -> Process {
        Process::new("uncomp", "gunzip -c")
            .unwrap()
            .with_inputs(vec![InputParam::new("archive", "File").unwrap()])
            .unwrap()
            .with_outputs(vec![OutputParam::stdout("rfile").unwrap()])
            .unwrap()
    }

    fn compile() -> Process {
        Process::new("compile", "gcc")
            .unwrap()
            .with_inputs(vec![
                InputParam::new("rfile", "File").unwrap(),
                InputParam::new("flags", "string?").unwrap(),
            ])
            .unwrap()
    }

    fn base() -> Workflow {
        Workflow::new("build")
            .unwrap()
            .with_inputs(vec![InputParam::new("archive", "File").unwrap()])
            .unwrap()
    }

    fn two_steps() -> Workflow {
        base()
            .with_step(Step::new("Uncomp", uncomp()).unwrap().input("archive", "archive"))
            .unwrap()
            .with_step(Step::new("Compile", compile()).unwrap().input("rfile", "Uncomp/rfile"))
            .unwrap()
    }

    #[test]
    fn test_sources_classified() {
        let wf = two_steps()
            .with_step(
                Step::new("Again", compile())
                    .unwrap()
                    .input("rfile", "Uncomp/rfile")
                    .literal("flags", "-I/usr/include"),
            )
            .unwrap();

        let again = wf.step("Again").unwrap();
        assert_eq!(
            again.inputs["flags"].source,
            Some(StepSource::Literal(ParamValue::from("-I/usr/include")))
        );
        assert_eq!(again.inputs["rfile"].refs(), &[SourceRef::parse("Uncomp/rfile")]);

        let uncomp = wf.step("Uncomp").unwrap();
        assert_eq!(uncomp.inputs["archive"].refs(), &[SourceRef::Input("archive".into())]);
    }

    #[test]
    fn test_misspelled_input_dangles() {
        let mut wf = base();
        let err = wf
            .add_step(Step::new("Uncomp", uncomp()).unwrap().input("archive", "archve"))
            .unwrap_err();
        assert!(matches!(err, CwlError::DanglingReference { ref reference, .. } if reference == "archve"));
        assert!(wf.is_empty());
    }

    #[test]
    fn test_reference_to_missing_step() {
        let mut wf = base();
        let result = wf.add_step(Step::new("Compile", compile()).unwrap().input("rfile", "Uncomp/rfile"));
        assert!(matches!(result, Err(CwlError::DanglingReference { .. })));
        assert!(wf.is_empty());
    }

    #[test]
    fn test_reference_to_missing_output() {
        let mut wf = base();
        wf.add_step(Step::new("Uncomp", uncomp()).unwrap().input("archive", "archive"))
            .unwrap();
        let result = wf.add_step(Step::new("Compile", compile()).unwrap().input("rfile", "Uncomp/nothing"));
        assert!(matches!(result, Err(CwlError::DanglingReference { .. })));
    }

    #[test]
    fn test_duplicate_step_id() {
        let mut wf = two_steps();
        let result = wf.add_step(Step::new("Uncomp", uncomp()).unwrap());
        assert!(matches!(result, Err(CwlError::Validation { .. })));
    }

    #[test]
    fn test_literal_type_checked() {
        let process = Process::new("count", "wc -l")
            .unwrap()
            .with_inputs(vec![InputParam::new("n", "int").unwrap()])
            .unwrap();
        let mut wf = base();
        let result = wf.add_step(Step::new("count", process).unwrap().literal("n", "many"));
        assert!(matches!(result, Err(CwlError::TypeMismatch { .. })));
    }

    #[test]
    fn test_output_source_resolution() {
        let mut wf = two_steps();
        wf.add_output(OutputParam::new("binary", "File").unwrap().source("Compile/output"))
            .unwrap();
        assert_eq!(wf.output_ids(), vec!["binary"]);

        let err = wf
            .add_output(OutputParam::new("x", "File").unwrap().source("Link/output"))
            .unwrap_err();
        assert!(matches!(err, CwlError::DanglingReference { .. }));
        assert!(wf.add_output(OutputParam::new("y", "File").unwrap()).is_err());
    }

    #[test]
    fn test_capabilities_added() {
        let mut wf = Workflow::new("many")
            .unwrap()
            .with_inputs(vec![InputParam::new("archives", "File[]").unwrap()])
            .unwrap();
        wf.add_step(
            Step::new("Uncomp", uncomp())
                .unwrap()
                .input("archive", "archives")
                .scatter(&["archive"]),
        )
        .unwrap();
        assert!(wf.requirements.contains("ScatterFeatureRequirement"));

        let mut outer = base();
        outer.add_step(Step::new("inner", two_steps()).unwrap().input("archive", "archive"))
            .unwrap();
        assert!(outer.requirements.contains("SubworkflowFeatureRequirement"));
    }

    #[test]
    fn test_concat_matches_sequential_append() {
        let first = base()
            .with_step(Step::new("Uncomp", uncomp()).unwrap().input("archive", "archive"))
            .unwrap();
        let second = Workflow::new("tail")
            .unwrap()
            .with_step(Step::new("Compile", compile()).unwrap().literal("flags", "-O2"))
            .unwrap();

        let joined = first.concat(second).unwrap();
        let ids: Vec<&str> = joined.steps().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["Uncomp", "Compile"]);
    }

    #[test]
    fn test_concat_is_associative() {
        let a = base()
            .with_step(Step::new("A", uncomp()).unwrap().input("archive", "archive"))
            .unwrap();
        let b = Workflow::new("b")
            .unwrap()
            .with_step(Step::new("B", compile()).unwrap().literal("flags", "-g"))
            .unwrap();
        let c = Workflow::new("c")
            .unwrap()
            .with_step(Step::new("C", compile()).unwrap().literal("flags", "-O3"))
            .unwrap();

        let left = a.clone().concat(b.clone()).unwrap().concat(c.clone()).unwrap();
        let right = a.concat(b.concat(c).unwrap()).unwrap();
        assert_eq!(left.steps(), right.steps());
    }

    #[test]
    fn test_concat_input_type_conflict() {
        let other = Workflow::new("other")
            .unwrap()
            .with_inputs(vec![InputParam::new("archive", "string").unwrap()])
            .unwrap();
        assert!(base().concat(other).is_err());
    }

    #[test]
    fn test_override_nested_path() {
        let mut outer = base();
        outer
            .add_step(Step::new("inner", two_steps()).unwrap().input("archive", "archive"))
            .unwrap();
        outer
            .add_step(Step::new("sibling", uncomp()).unwrap().input("archive", "archive"))
            .unwrap();

        outer
            .override_at("inner/Compile", Override::Requirement(Requirement::docker("gcc:13")))
            .unwrap();
        outer
            .override_at("inner/Compile", Override::Arguments(vec![Argument::from("-Wall")]))
            .unwrap();

        let compile = outer.process_at_mut("inner/Compile").unwrap();
        assert_eq!(compile.requirements.get("DockerRequirement"), Some(&Requirement::docker("gcc:13")));
        assert_eq!(compile.arguments.len(), 1);

        let uncomp = outer.process_at_mut("inner/Uncomp").unwrap();
        assert!(uncomp.requirements.is_empty());
        let sibling = outer.process_at_mut("sibling").unwrap();
        assert!(sibling.requirements.is_empty());
        assert!(!outer.requirements.contains("DockerRequirement"));
    }

    #[test]
    fn test_override_replaces_whole_record() {
        let mut wf = two_steps();
        wf.override_at("Compile", Override::Requirement(Requirement::resources(Some(4), Some(8000))))
            .unwrap();
        wf.override_at("Compile", Override::Requirement(Requirement::resources(Some(2), None)))
            .unwrap();

        let compile = wf.process_at_mut("Compile").unwrap();
        assert_eq!(
            compile.requirements.get("ResourceRequirement"),
            Some(&Requirement::resources(Some(2), None))
        );
    }

    #[test]
    fn test_override_bad_paths() {
        let mut wf = two_steps();
        assert!(matches!(
            wf.override_at("Link", Override::Stdout(None)),
            Err(CwlError::NotFound { .. })
        ));
        assert!(wf.override_at("Uncomp/deeper", Override::Stdout(None)).is_err());
    }

    #[test]
    fn test_set_value() {
        let mut wf = base();
        assert!(matches!(wf.set_value("missing", "x"), Err(CwlError::NotFound { .. })));
        assert!(matches!(wf.set_value("archive", 3), Err(CwlError::TypeMismatch { .. })));
    }
}
