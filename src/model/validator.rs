//! Pre-emission Validation
//!
//! Composition already rejects most mistakes as they are made. These
//! checks run again over the finished graph right before a document is
//! written, catching what later edits may have broken:
//! - unfilled `{{name}}` placeholders in metadata, parameter and step text
//! - capability requirements removed after a step needed them
//! - step sources that are still unclassified or no longer resolve
//! - workflow outputs without a resolvable source

use std::fmt;

use log::{debug, info};

use super::meta::placeholders;
use super::param::{ParamList, Parameter};
use super::process::Process;
use super::requirement::Requirements;
use super::step::{Run, SourceRef, Step, StepSource};
use super::workflow::Workflow;
use crate::error::{CwlError, Result};

/// A problem that prevents a graph from being emitted.
#[derive(Debug, Clone, PartialEq)]
pub enum Issue {
    UnfilledPlaceholder { owner: String, name: String },
    MissingCapability { owner: String, class: &'static str, step: String },
    PendingSource { step: String, input: String },
    DanglingSource { step: String, reference: String },
    MissingOutputSource { owner: String, output: String },
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnfilledPlaceholder { owner, name } => {
                write!(f, "'{}': placeholder {{{{{}}}}} is not filled", owner, name)
            }
            Self::MissingCapability { owner, class, step } => {
                write!(f, "'{}': step '{}' needs {}", owner, step, class)
            }
            Self::PendingSource { step, input } => {
                write!(f, "step '{}': source of '{}' was never resolved", step, input)
            }
            Self::DanglingSource { step, reference } => {
                write!(f, "step '{}': source '{}' does not resolve", step, reference)
            }
            Self::MissingOutputSource { owner, output } => {
                write!(f, "'{}': output '{}' has no resolvable source", owner, output)
            }
        }
    }
}

fn placeholder_issues(owner: &str, meta: &super::meta::Meta) -> Vec<Issue> {
    meta.unresolved()
        .into_iter()
        .map(|name| Issue::UnfilledPlaceholder {
            owner: owner.to_string(),
            name,
        })
        .collect()
}

/// Placeholders left in free text such as parameter or step labels.
fn text_issues(owner: &str, texts: &[Option<&str>]) -> Vec<Issue> {
    let mut issues: Vec<Issue> = Vec::new();
    for text in texts.iter().flatten() {
        for name in placeholders(text) {
            let issue = Issue::UnfilledPlaceholder {
                owner: owner.to_string(),
                name,
            };
            if !issues.contains(&issue) {
                issues.push(issue);
            }
        }
    }
    issues
}

fn param_issues<P: Parameter>(owner: &str, params: &ParamList<P>) -> Vec<Issue> {
    params
        .iter()
        .flat_map(|p| text_issues(&format!("{}#{}", owner, p.id()), &[p.label_text(), p.doc_text()]))
        .collect()
}

/// Collects issues of a single tool.
pub fn process_issues(process: &Process) -> Vec<Issue> {
    let mut issues = placeholder_issues(&process.id, &process.meta);
    issues.extend(param_issues(&process.id, &process.inputs));
    issues.extend(param_issues(&process.id, &process.outputs));
    issues
}

/// Collects issues of a workflow and everything it runs.
pub fn workflow_issues(workflow: &Workflow) -> Vec<Issue> {
    let mut issues = placeholder_issues(&workflow.id, &workflow.meta);
    issues.extend(param_issues(&workflow.id, &workflow.inputs));
    issues.extend(param_issues(&workflow.id, &workflow.outputs));

    for (index, step) in workflow.steps().iter().enumerate() {
        let earlier = &workflow.steps()[..index];
        issues.extend(step_issues(workflow, earlier, step));
        issues.extend(text_issues(
            &format!("{}/{}", workflow.id, step.id),
            &[step.label.as_deref(), step.doc.as_deref()],
        ));

        for capability in step.capabilities() {
            if !workflow.requirements.contains(capability.class()) {
                issues.push(Issue::MissingCapability {
                    owner: workflow.id.clone(),
                    class: capability.class(),
                    step: step.id.clone(),
                });
            }
        }

        match &step.run {
            Run::Tool(process) => issues.extend(process_issues(process)),
            Run::Workflow(nested) => issues.extend(workflow_issues(nested)),
        }
    }

    for output in workflow.outputs.iter() {
        let resolves = output
            .output_source
            .as_deref()
            .map(|source| source_resolves(workflow, workflow.steps(), &SourceRef::parse(source)))
            .unwrap_or(false);
        if !resolves {
            issues.push(Issue::MissingOutputSource {
                owner: workflow.id.clone(),
                output: output.id.clone(),
            });
        }
    }

    issues
}

fn step_issues(workflow: &Workflow, earlier: &[Step], step: &Step) -> Vec<Issue> {
    let mut issues = Vec::new();
    for (key, input) in &step.inputs {
        match &input.source {
            Some(StepSource::Pending(_)) => issues.push(Issue::PendingSource {
                step: step.id.clone(),
                input: key.clone(),
            }),
            Some(StepSource::Refs(refs)) => {
                for r in refs {
                    if !source_resolves(workflow, earlier, r) {
                        issues.push(Issue::DanglingSource {
                            step: step.id.clone(),
                            reference: r.to_string(),
                        });
                    }
                }
            }
            _ => {}
        }
    }
    issues
}

fn source_resolves(workflow: &Workflow, earlier: &[Step], r: &SourceRef) -> bool {
    match r {
        SourceRef::Input(id) => workflow.inputs.contains(id),
        SourceRef::Output { step, output } => earlier
            .iter()
            .find(|s| &s.id == step)
            .is_some_and(|s| s.run.has_output(output)),
    }
}

fn into_result(owner: &str, issues: Vec<Issue>) -> Result<()> {
    if issues.is_empty() {
        debug!("'{}' passed pre-emission checks", owner);
        return Ok(());
    }
    info!("'{}' has {} emission issue(s)", owner, issues.len());
    let message = issues
        .iter()
        .map(Issue::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    Err(CwlError::emission(owner, message))
}

/// Fails with an emission error listing every issue of the tool.
pub fn validate_process(process: &Process) -> Result<()> {
    into_result(&process.id, process_issues(process))
}

/// Fails with an emission error listing every issue of the workflow.
pub fn validate_workflow(workflow: &Workflow) -> Result<()> {
    into_result(&workflow.id, workflow_issues(workflow))
}

/// Capability classes a requirement set is missing for the given steps.
pub fn missing_capabilities(requirements: &Requirements, steps: &[Step]) -> Vec<&'static str> {
    let mut missing = Vec::new();
    for step in steps {
        for capability in step.capabilities() {
            let class = capability.class();
            if !requirements.contains(class) && !missing.contains(&class) {
                missing.push(class);
            }
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::meta::Meta;
    use crate::model::param::{InputParam, OutputParam};

    fn tool() -> Process {
        Process::new("gz", "gzip -c")
            .unwrap()
            .with_inputs(vec![InputParam::new("file", "File").unwrap()])
            .unwrap()
    }

    fn workflow() -> Workflow {
        Workflow::new("wf")
            .unwrap()
            .with_inputs(vec![InputParam::new("files", "File[]").unwrap()])
            .unwrap()
            .with_step(
                Step::new("zip", tool())
                    .unwrap()
                    .input("file", "files")
                    .scatter(&["file"]),
            )
            .unwrap()
    }

    #[test]
    fn test_valid_workflow() {
        assert!(validate_workflow(&workflow()).is_ok());
    }

    #[test]
    fn test_unfilled_placeholder() {
        let process = tool().with_meta(Meta::new().with_label("Compress {{sample}}"));
        let err = validate_process(&process).unwrap_err();
        assert!(matches!(err, CwlError::Emission { .. }));
        assert!(err.to_string().contains("{{sample}}"));
    }

    #[test]
    fn test_removed_capability_detected() {
        let mut wf = workflow();
        wf.requirements.remove("ScatterFeatureRequirement");

        let issues = workflow_issues(&wf);
        assert_eq!(
            issues,
            vec![Issue::MissingCapability {
                owner: "wf".to_string(),
                class: "ScatterFeatureRequirement",
                step: "zip".to_string(),
            }]
        );
        assert_eq!(missing_capabilities(&wf.requirements, wf.steps()), vec!["ScatterFeatureRequirement"]);
    }

    #[test]
    fn test_parameter_and_step_placeholders() {
        let process = Process::new("gz", "gzip -c")
            .unwrap()
            .with_inputs(vec![InputParam::new("file", "File").unwrap().label("Reads of {{sample}}")])
            .unwrap();
        assert_eq!(
            process_issues(&process),
            vec![Issue::UnfilledPlaceholder {
                owner: "gz#file".to_string(),
                name: "sample".to_string(),
            }]
        );
        assert!(validate_process(&process).is_err());

        let mut wf = Workflow::new("wf")
            .unwrap()
            .with_inputs(vec![InputParam::new("files", "File[]").unwrap()])
            .unwrap();
        wf.add_step(
            Step::new("zip", tool())
                .unwrap()
                .input("file", "files")
                .scatter(&["file"])
                .doc("Compress {{run}}"),
        )
        .unwrap();
        wf.add_output(
            OutputParam::new("zipped", "File[]")
                .unwrap()
                .source("zip/output")
                .doc("{{run}} archives"),
        )
        .unwrap();

        let issues = workflow_issues(&wf);
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().any(|i| matches!(i, Issue::UnfilledPlaceholder { owner, .. } if owner == "wf/zip")));
        assert!(issues.iter().any(|i| matches!(i, Issue::UnfilledPlaceholder { owner, .. } if owner == "wf#zipped")));
    }

    #[test]
    fn test_nested_placeholder_reported() {
        let inner = workflow().with_meta(Meta::new().with_doc("by {{author}}"));
        let outer = Workflow::new("outer")
            .unwrap()
            .with_inputs(vec![InputParam::new("files", "File[]").unwrap()])
            .unwrap()
            .with_step(Step::new("inner", inner).unwrap().input("files", "files"))
            .unwrap();

        let issues = workflow_issues(&outer);
        assert_eq!(issues.len(), 1);
        assert!(matches!(&issues[0], Issue::UnfilledPlaceholder { owner, .. } if owner == "wf"));
    }

    #[test]
    fn test_output_source_checked() {
        let mut wf = workflow();
        wf.add_output(OutputParam::new("zipped", "File[]").unwrap().source("zip/output"))
            .unwrap();
        assert!(workflow_issues(&wf).is_empty());
    }

    #[test]
    fn test_issue_display() {
        let issue = Issue::PendingSource {
            step: "s".to_string(),
            input: "x".to_string(),
        };
        assert_eq!(issue.to_string(), "step 's': source of 'x' was never resolved");
    }
}
