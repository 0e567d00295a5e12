//! Single Runner Invocation
//!
//! Hands an emitted document and its values file to an external CWL runner
//! (`cwltool` by default) and collects what it produced.
//!
//! The external process sits behind the [`Launcher`] trait. The
//! [`SystemLauncher`] spawns it with `std::process::Command`; tests plug in
//! launchers that fake the runner's behaviour.
//!
//! Produced files come from the runner's JSON report on stdout. When stdout
//! is not JSON, the literal output globs of the document are matched in the
//! output directory instead.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use serde_json::Value as JsonValue;

use crate::emit::document::ParamEntry;
use crate::emit::{emit_values, Emit, ProcessDocument, ToolDocument};
use crate::error::{CwlError, Result};
use crate::model::{CwlType, Interface, SourceRef, Text};

/// Runner used when none is configured.
pub const DEFAULT_RUNNER: &str = "cwltool";

/// Directory under the output directory holding staged documents.
const STAGING_DIR: &str = ".cwlsmith";

/// Settings shared by single and batch runs.
#[derive(Debug, Clone)]
pub struct RunConfig {
    runner: String,
    runner_args: Vec<String>,
    outdir: PathBuf,
    no_container: bool,
    max_parallel: usize,
    keep_intermediate: bool,
}

impl RunConfig {
    pub fn new() -> Self {
        Self {
            runner: DEFAULT_RUNNER.to_string(),
            runner_args: Vec::new(),
            outdir: PathBuf::from("."),
            no_container: false,
            max_parallel: num_cpus::get(),
            keep_intermediate: false,
        }
    }

    /// Defaults overridden by `CWLSMITH_RUNNER` and `CWLSMITH_PARALLEL`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::new();
        if let Some(runner) = lookup("CWLSMITH_RUNNER").filter(|r| !r.trim().is_empty()) {
            config.set_runner(runner.trim());
        }
        if let Some(raw) = lookup("CWLSMITH_PARALLEL") {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.set_max_parallel(n),
                _ => warn!("Ignoring invalid CWLSMITH_PARALLEL value: {}", raw),
            }
        }
        config
    }

    pub fn set_runner(&mut self, runner: impl Into<String>) {
        self.runner = runner.into();
    }

    /// Appends a flag passed to the runner before the document.
    pub fn add_runner_arg(&mut self, arg: impl Into<String>) {
        self.runner_args.push(arg.into());
    }

    pub fn set_outdir(&mut self, dir: impl Into<PathBuf>) {
        self.outdir = dir.into();
    }

    pub fn set_no_container(&mut self, no_container: bool) {
        self.no_container = no_container;
    }

    /// Sets the batch worker count. Zero is raised to one.
    pub fn set_max_parallel(&mut self, max: usize) {
        self.max_parallel = max.max(1);
    }

    /// Keeps staged documents and values files after a run.
    pub fn set_keep_intermediate(&mut self, keep: bool) {
        self.keep_intermediate = keep;
    }

    pub fn runner(&self) -> &str {
        &self.runner
    }

    pub fn runner_args(&self) -> &[String] {
        &self.runner_args
    }

    pub fn outdir(&self) -> &Path {
        &self.outdir
    }

    pub fn no_container(&self) -> bool {
        self.no_container
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub fn keep_intermediate(&self) -> bool {
        self.keep_intermediate
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// What a launched process left behind.
#[derive(Debug, Clone, Default)]
pub struct LaunchOutput {
    /// Exit code; `None` when killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl LaunchOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Starts the external runner process and waits for it.
pub trait Launcher: Send + Sync {
    fn launch(&self, invocation: &Invocation) -> Result<LaunchOutput>;
}

/// Launches the runner as a child process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn launch(&self, invocation: &Invocation) -> Result<LaunchOutput> {
        debug!("Spawning: {}", invocation.command_line());
        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .output()?;
        Ok(LaunchOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// A fully resolved runner command line.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub outdir: PathBuf,
    /// Literal output globs, matched when the runner gives no JSON report
    pub globs: Vec<String>,
}

impl Invocation {
    /// `<runner> [runner args] [--no-container] --outdir <dir> <doc> <values>`
    pub fn new(config: &RunConfig, document: &Path, values: &Path, outdir: &Path) -> Self {
        let mut args = config.runner_args.clone();
        if config.no_container {
            args.push("--no-container".to_string());
        }
        args.push("--outdir".to_string());
        args.push(outdir.display().to_string());
        args.push(document.display().to_string());
        args.push(values.display().to_string());

        Self {
            program: config.runner.clone(),
            args,
            outdir: outdir.to_path_buf(),
            globs: Vec::new(),
        }
    }

    pub fn with_globs(mut self, globs: Vec<String>) -> Self {
        self.globs = globs;
        self
    }

    /// The invocation as a shell-readable string.
    pub fn command_line(&self) -> String {
        let mut parts = vec![quote(&self.program)];
        parts.extend(self.args.iter().map(|a| quote(a)));
        parts.join(" ")
    }
}

fn quote(token: &str) -> String {
    if !token.is_empty() && !token.chars().any(|c| c.is_whitespace() || "'\"$`\\".contains(c)) {
        token.to_string()
    } else {
        format!("'{}'", token.replace('\'', r"'\''"))
    }
}

/// Outcome of one successful runner invocation.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// The exact command that was run
    pub command: String,
    pub outputs: Vec<PathBuf>,
    /// Everything the runner printed besides its JSON report
    pub logs: String,
    pub started: DateTime<Local>,
    pub finished: DateTime<Local>,
}

/// Runs emitted documents through the configured runner.
///
/// # Example
///
/// ```rust,no_run
/// use cwlsmith::execution::{RunConfig, RunDispatcher};
/// use cwlsmith::model::{InputParam, Process};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut echo = Process::new("echo", "echo")?
///         .with_inputs(vec![InputParam::new("sth", "string")?])?;
///     echo.set_value("sth", "Hello World!")?;
///
///     let mut config = RunConfig::new();
///     config.set_outdir("results");
///     let result = RunDispatcher::new(config).run(&echo)?;
///     println!("{:?}", result.outputs);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct RunDispatcher {
    config: RunConfig,
    launcher: Arc<dyn Launcher>,
}

impl RunDispatcher {
    pub fn new(config: RunConfig) -> Self {
        Self::with_launcher(config, Arc::new(SystemLauncher))
    }

    pub fn with_launcher(config: RunConfig, launcher: Arc<dyn Launcher>) -> Self {
        Self { config, launcher }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Directory where documents and values files are staged before a run.
    pub fn staging_dir(&self) -> PathBuf {
        self.config.outdir.join(STAGING_DIR)
    }

    /// Emits `item` with its bound values and runs it.
    ///
    /// Staged files are removed afterwards unless the configuration keeps
    /// intermediates.
    pub fn run<T: Emit + Interface>(&self, item: &T) -> Result<RunResult> {
        let document = item.to_document()?;
        let document_text = serde_yaml::to_string(&document)?;
        let values_text = emit_values(item)?;
        let globs = output_globs(&document);

        let staging = self.staging_dir();
        fs::create_dir_all(&staging)?;
        let document_path = staging.join(format!("{}.cwl", item.id()));
        let values_path = staging.join(format!("{}.yml", item.id()));

        let outdir = self.config.outdir.clone();
        let result = fs::write(&document_path, document_text)
            .and_then(|_| fs::write(&values_path, values_text))
            .map_err(CwlError::from)
            .and_then(|_| self.invoke(&document_path, &values_path, &outdir, globs));

        if !self.config.keep_intermediate {
            for path in [&document_path, &values_path] {
                if path.exists() {
                    if let Err(e) = fs::remove_file(path) {
                        warn!("Failed to clean up {}: {}", path.display(), e);
                    }
                }
            }
            // fails while other runs still have files staged
            let _ = fs::remove_dir(&staging);
        }
        result
    }

    /// Runs a document already on disk.
    pub fn run_files(&self, document: &Path, values: &Path) -> Result<RunResult> {
        let text = fs::read_to_string(document)?;
        let parsed: ProcessDocument = serde_yaml::from_str(&text)?;
        let outdir = self.config.outdir.clone();
        self.invoke(document, values, &outdir, output_globs(&parsed))
    }

    /// The command line a run would use, without launching anything.
    pub fn invocation(&self, document: &Path, values: &Path, outdir: &Path) -> Invocation {
        Invocation::new(&self.config, document, values, outdir)
    }

    pub(crate) fn invoke(
        &self,
        document: &Path,
        values: &Path,
        outdir: &Path,
        globs: Vec<String>,
    ) -> Result<RunResult> {
        fs::create_dir_all(outdir)?;
        let invocation = self.invocation(document, values, outdir).with_globs(globs);
        let command = invocation.command_line();

        info!("Running: {}", command);
        let started = Local::now();
        let output = self.launcher.launch(&invocation)?;
        let finished = Local::now();

        let report = parse_report(&output.stdout);
        let mut logs = output.stderr.clone();
        if report.is_none() && !output.stdout.trim().is_empty() {
            if !logs.is_empty() && !logs.ends_with('\n') {
                logs.push('\n');
            }
            logs.push_str(&output.stdout);
        }

        if !output.success() {
            error!("Runner failed with exit code: {:?}", output.status);
            if !logs.trim().is_empty() {
                error!("Runner log:\n{}", logs);
            }
            return Err(CwlError::RunnerFailure {
                command,
                status: output.status,
                log: logs,
            });
        }

        let outputs = match report {
            Some(report) => {
                let mut paths = Vec::new();
                collect_paths(&report, &mut paths);
                paths
            }
            None => match_globs(&invocation.outdir, &invocation.globs),
        };

        if outputs.is_empty() {
            error!("Runner reported no outputs for {}", document.display());
            return Err(CwlError::RunnerFailure {
                command,
                status: output.status,
                log: logs,
            });
        }

        info!("Finished with {} output(s)", outputs.len());
        Ok(RunResult {
            command,
            outputs,
            logs,
            started,
            finished,
        })
    }
}

/// Parses the runner's stdout as a JSON object, if it is one.
fn parse_report(stdout: &str) -> Option<JsonValue> {
    let trimmed = stdout.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

/// Collects the `path` (or `location`) of every File and Directory object.
fn collect_paths(value: &JsonValue, paths: &mut Vec<PathBuf>) {
    match value {
        JsonValue::Object(map) => {
            let class = map.get("class").and_then(JsonValue::as_str);
            if matches!(class, Some("File") | Some("Directory")) {
                let path = map
                    .get("path")
                    .or_else(|| map.get("location"))
                    .and_then(JsonValue::as_str);
                if let Some(path) = path {
                    paths.push(PathBuf::from(path.trim_start_matches("file://")));
                }
                if let Some(secondary) = map.get("secondaryFiles") {
                    collect_paths(secondary, paths);
                }
            } else {
                for item in map.values() {
                    collect_paths(item, paths);
                }
            }
        }
        JsonValue::Array(items) => {
            for item in items {
                collect_paths(item, paths);
            }
        }
        _ => {}
    }
}

/// Matches literal globs inside `outdir`, sorted and without duplicates.
fn match_globs(outdir: &Path, globs: &[String]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for pattern in globs {
        let full = outdir.join(pattern);
        let entries = match glob::glob(&full.to_string_lossy()) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Skipping invalid glob '{}': {}", pattern, e);
                continue;
            }
        };
        found.extend(entries.filter_map(|entry| entry.ok()));
    }
    found.sort();
    found.dedup();
    found
}

/// Literal globs a run of `document` is expected to produce.
///
/// Tools contribute every literal output glob and their literal stdout and
/// stderr names. Workflows contribute the globs behind each output source.
pub fn output_globs(document: &ProcessDocument) -> Vec<String> {
    let mut globs = Vec::new();
    match document {
        ProcessDocument::Tool(tool) => {
            let ids: Vec<&str> = tool.outputs.keys().map(String::as_str).collect();
            tool_globs(tool, &ids, &mut globs);
        }
        ProcessDocument::Workflow(workflow) => {
            for entry in workflow.outputs.values() {
                let ParamEntry::Full(output) = entry else {
                    continue;
                };
                if let Some(source) = &output.output_source {
                    source_globs(document, source, &mut globs);
                }
            }
        }
    }
    globs.dedup();
    globs
}

fn source_globs(document: &ProcessDocument, source: &str, globs: &mut Vec<String>) {
    let ProcessDocument::Workflow(workflow) = document else {
        return;
    };
    let SourceRef::Output { step, output } = SourceRef::parse(source) else {
        return;
    };
    let Some(step) = workflow.steps.iter().find(|s| s.id == step) else {
        return;
    };
    match &step.run {
        ProcessDocument::Tool(tool) => tool_globs(tool, &[output.as_str()], globs),
        ProcessDocument::Workflow(inner) => {
            let nested = inner
                .outputs
                .get(&output)
                .and_then(|entry| match entry {
                    ParamEntry::Full(o) => o.output_source.clone(),
                    ParamEntry::Short(_) => None,
                });
            if let Some(nested) = nested {
                source_globs(&step.run, &nested, globs);
            }
        }
    }
}

fn tool_globs(tool: &ToolDocument, ids: &[&str], globs: &mut Vec<String>) {
    for id in ids {
        let Some(entry) = tool.outputs.get(*id) else {
            continue;
        };
        let pattern = match entry {
            ParamEntry::Full(output) => match output.param_type {
                CwlType::Stdout => tool.stdout.as_ref(),
                CwlType::Stderr => tool.stderr.as_ref(),
                _ => output.glob_pattern(),
            },
            ParamEntry::Short(CwlType::Stdout) => tool.stdout.as_ref(),
            ParamEntry::Short(CwlType::Stderr) => tool.stderr.as_ref(),
            ParamEntry::Short(_) => None,
        };
        if let Some(Text::Literal(pattern)) = pattern {
            if !globs.contains(pattern) {
                globs.push(pattern.clone());
            }
        }
    }
}
