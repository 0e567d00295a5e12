//! CwlSmith - CWL Documents from Rust
//!
//! Describe command-line tools and pipelines as typed Rust values and emit
//! them as Common Workflow Language v1.0 documents, ready for an external
//! runner such as `cwltool`.
//!
//! # Architecture
//!
//! - [`model`]: parameters, requirements, tools, steps and workflows
//! - [`emit`]: deterministic YAML documents and values files
//! - [`environment`]: container requirements built from conda packages
//! - [`execution`]: single and batch runner dispatch
//! - [`monitoring`]: batch job timeline
//!
//! Composition and emission validate eagerly, so a runner is only ever
//! handed a structurally valid document.
//!
//! # Example
//!
//! ```rust
//! use cwlsmith::emit::{emit_document, emit_values};
//! use cwlsmith::model::{InputParam, OutputParam, Process, Step, Workflow};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let uncomp = Process::new("uncomp", "gunzip -c")?
//!         .with_inputs(vec![InputParam::new("gz", "File")?])?
//!         .with_outputs(vec![OutputParam::stdout("rfile")?])?
//!         .stdout("reads.txt");
//!     let count = Process::new("count", "wc -l")?
//!         .with_inputs(vec![InputParam::new("rfile", "File")?])?;
//!
//!     let mut wf = Workflow::new("pipeline")?
//!         .with_inputs(vec![InputParam::new("gz", "File")?])?;
//!     wf.add_step(Step::new("Uncomp", uncomp)?.input("gz", "gz"))?;
//!     wf.add_step(Step::new("Count", count)?.input("rfile", "Uncomp/rfile"))?;
//!     wf.add_output(OutputParam::new("lines", "File")?.source("Count/output"))?;
//!
//!     let document = emit_document(&wf)?;
//!     assert!(document.contains("class: Workflow"));
//!     println!("{}{}", document, emit_values(&wf)?);
//!     Ok(())
//! }
//! ```

pub mod emit;
pub mod environment;
pub mod error;
pub mod execution;
pub mod model;
pub mod monitoring;

// Re-export commonly used types
pub use emit::{emit_document, emit_values, parse_document};
pub use error::{CwlError, Result};
pub use execution::{BatchDispatcher, RunConfig, RunDispatcher};
pub use model::{InputParam, OutputParam, Process, Requirement, Step, Workflow};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "CwlSmith";
