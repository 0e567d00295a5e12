//! Tool and Workflow Model
//!
//! Contains the in-memory description of command-line tools and pipelines:
//! - Parameter types, values and declarations
//! - Requirements and hints
//! - Tools, steps and workflows
//! - Checks run before emission

pub mod expression;
pub mod meta;
pub mod param;
pub mod process;
pub mod requirement;
pub mod script;
pub mod step;
pub mod types;
pub mod validator;
pub mod workflow;

pub use expression::{Expression, Text};
pub use meta::Meta;
pub use param::{InputBinding, InputParam, OutputBinding, OutputParam, ParamList, Parameter, ValueStore};
pub use process::{Argument, ArgumentBinding, BaseCommand, Interface, Process};
pub use requirement::{Dirent, EnvironmentDef, Requirement, Requirements, SoftwarePackage};
pub use script::{Definitions, ScriptFunction, ScriptLanguage};
pub use step::{Run, ScatterMethod, SourceRef, Step, StepInput, StepSource};
pub use types::{CwlType, ParamValue, RecordField};
pub use validator::{validate_process, validate_workflow, Issue};
pub use workflow::{Override, Workflow};
