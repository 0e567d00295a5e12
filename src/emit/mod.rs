//! Document Emission
//!
//! Turns tools and workflows into CWL v1.0 YAML documents and bound values
//! into a separate values document, and reads both back.
//!
//! Emission is deterministic: the same graph always produces the same
//! bytes. Parameters are ordered by position then id, steps keep their
//! append order, and nested runs are written inline.

pub mod document;
pub mod files;
pub mod values;

use log::debug;

pub use document::{ProcessDocument, ToolDocument, WorkflowDocument, CWL_VERSION};
pub use files::{load_batch, load_document, load_values, save};
pub use values::{apply_values, emit_values, parse_batch, parse_values, BatchValues};

use crate::error::Result;
use crate::model::{Process, Run, Workflow};

/// Anything that can be written as a CWL document.
pub trait Emit {
    fn to_document(&self) -> Result<ProcessDocument>;
}

impl Emit for Process {
    fn to_document(&self) -> Result<ProcessDocument> {
        Ok(ProcessDocument::Tool(Box::new(ToolDocument::from_process(self)?)))
    }
}

impl Emit for Workflow {
    fn to_document(&self) -> Result<ProcessDocument> {
        Ok(ProcessDocument::Workflow(Box::new(WorkflowDocument::from_workflow(self)?)))
    }
}

impl Emit for Run {
    fn to_document(&self) -> Result<ProcessDocument> {
        ProcessDocument::from_run(self)
    }
}

/// Emits the YAML document of a tool or workflow.
///
/// # Example
///
/// ```
/// use cwlsmith::emit::emit_document;
/// use cwlsmith::model::{InputParam, Process};
///
/// let echo = Process::new("echo", "echo")?
///     .with_inputs(vec![InputParam::new("sth", "string")?])?;
/// let text = emit_document(&echo)?;
/// assert!(text.contains("class: CommandLineTool"));
/// assert!(text.contains("type: stdout"));
/// # Ok::<(), cwlsmith::CwlError>(())
/// ```
pub fn emit_document<E: Emit + ?Sized>(item: &E) -> Result<String> {
    let document = item.to_document()?;
    let text = serde_yaml::to_string(&document)?;
    debug!("Emitted document '{}' ({} bytes)", document.id(), text.len());
    Ok(text)
}

/// Parses a document back into a tool or workflow.
pub fn parse_document(text: &str) -> Result<Run> {
    let document: ProcessDocument = serde_yaml::from_str(text)?;
    document.into_run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Argument, Dirent, InputParam, Meta, OutputParam, Requirement, ScatterMethod, Step, Text,
    };
    use serde_json::json;

    fn bwa() -> Process {
        Process::new("bwa_mem", "bwa mem")
            .unwrap()
            .with_inputs(vec![
                InputParam::new("threads", "int?").unwrap().prefix("-t"),
                InputParam::new("reference", "File").unwrap().position(1),
                InputParam::new("reads", "File[]").unwrap().position(2),
                InputParam::new("read_group", "string?").unwrap().prefix("-R"),
            ])
            .unwrap()
            .with_outputs(vec![OutputParam::stdout("sam").unwrap()])
            .unwrap()
            .argument(Argument::at(0, "-M"))
            .stdout(Text::expression("$(inputs.reads[0].nameroot).sam").unwrap())
            .requirement(Requirement::docker("biocontainers/bwa:0.7.17"))
            .hint(Requirement::resources(Some(8), Some(16000)))
            .with_meta(
                Meta::new()
                    .with_label("BWA-MEM alignment")
                    .with_extension("s:author", json!({"class": "s:Person", "s:name": "Lab"})),
            )
    }

    #[test]
    fn test_emission_is_deterministic() {
        let process = bwa();
        assert_eq!(emit_document(&process).unwrap(), emit_document(&process).unwrap());
    }

    #[test]
    fn test_parameter_order() {
        let text = emit_document(&bwa()).unwrap();
        let positions: Vec<usize> = ["  reference:", "  reads:", "  read_group:", "  threads:"]
            .iter()
            .map(|key| text.find(key).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{}", text);
    }

    #[test]
    fn test_document_fields() {
        let text = emit_document(&bwa()).unwrap();
        assert!(text.starts_with("cwlVersion: v1.0\nclass: CommandLineTool\nid: bwa_mem\n"));
        assert!(text.contains("baseCommand:\n- bwa\n- mem\n"));
        assert!(text.contains("$(inputs.reads[0].nameroot).sam"));
        assert!(text.contains("s:author:"));
        assert!(text.contains("hints:"));
    }

    #[test]
    fn test_tool_round_trip() {
        let first = emit_document(&bwa()).unwrap();
        let parsed = parse_document(&first).unwrap();
        let second = emit_document(&parsed).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_literal_dollar_survives_round_trip() {
        let process = Process::new("show", "printf")
            .unwrap()
            .argument(Argument::from("cost: $(not an expression)"))
            .stdout("out.txt");
        let first = emit_document(&process).unwrap();
        assert!(first.contains(r"\$(not an expression)"));

        let Run::Tool(parsed) = parse_document(&first).unwrap() else {
            panic!("expected a tool");
        };
        assert_eq!(parsed.arguments, process.arguments);
        assert_eq!(emit_document(&*parsed).unwrap(), first);
    }

    #[test]
    fn test_workflow_round_trip() {
        let mut wf = Workflow::new("align_all")
            .unwrap()
            .with_inputs(vec![
                InputParam::new("reference", "File").unwrap(),
                InputParam::new("samples", "File[]").unwrap(),
            ])
            .unwrap();
        wf.add_step(
            Step::new("align", bwa())
                .unwrap()
                .input("reference", "reference")
                .input("reads", "samples")
                .literal("threads", 4)
                .scatter(&["reads"])
                .scatter_method(ScatterMethod::Dotproduct),
        )
        .unwrap();
        wf.add_output(OutputParam::new("sams", "File[]").unwrap().source("align/sam"))
            .unwrap();

        let first = emit_document(&wf).unwrap();
        assert!(first.contains("class: ScatterFeatureRequirement"));
        assert!(first.contains("scatterMethod: dotproduct"));
        assert!(first.contains("outputSource: align/sam"));

        let second = emit_document(&parse_document(&first).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_staged_script_escaped() {
        let process = Process::new("run_sh", "bash run.sh")
            .unwrap()
            .requirement(Requirement::staged(vec![Dirent::new("run.sh", "echo ${HOME}")]));
        let text = emit_document(&process).unwrap();
        assert!(text.contains(r"echo \${HOME}"));
    }
}
