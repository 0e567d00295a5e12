//! Batch Dispatch
//!
//! Runs one tool or workflow against many sets of input values. Each set is
//! an independent runner invocation in its own output directory:
//! - at most `max_parallel` invocations run at once
//! - a failing job never stops its siblings
//! - results are matched to jobs by index, not completion order
//! - cancellation stops jobs that have not started; running ones finish

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use log::{error, info, warn};

use super::runner::{output_globs, RunDispatcher, RunResult};
use crate::emit::{apply_values, emit_values, BatchValues, Emit};
use crate::error::{CwlError, Result};
use crate::model::{Interface, ValueStore};
use crate::monitoring::{BatchTimeline, EventType};

/// Cooperative cancellation flag shared with whoever may stop the batch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of one job.
#[derive(Debug)]
pub struct JobResult {
    pub index: usize,
    /// Name of the job's output directory, `job-001` for index 0
    pub key: String,
    pub values: ValueStore,
    pub outcome: Result<RunResult>,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.outcome, Err(CwlError::Cancelled(_)))
    }
}

/// All job outcomes of a batch, in job order.
#[derive(Debug)]
pub struct BatchReport {
    pub jobs: Vec<JobResult>,
    pub timeline: BatchTimeline,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.jobs.iter().filter(|j| j.is_success()).count()
    }

    pub fn cancelled(&self) -> usize {
        self.jobs.iter().filter(|j| j.is_cancelled()).count()
    }

    pub fn failed(&self) -> usize {
        self.jobs.len() - self.succeeded() - self.cancelled()
    }

    pub fn all_succeeded(&self) -> bool {
        self.succeeded() == self.jobs.len()
    }
}

/// Job directory name for a zero-based index.
pub fn job_key(index: usize) -> String {
    format!("job-{:03}", index + 1)
}

/// Turns per-input value columns into one value set per job.
///
/// Every column must have the same length, except that a column with a
/// single value is shared by all jobs.
pub fn expand_columns(batch: &BatchValues) -> Result<Vec<ValueStore>> {
    let jobs = batch.values().map(Vec::len).max().unwrap_or(0);

    for (id, column) in batch {
        if column.is_empty() {
            return Err(CwlError::validation(id, "batch column has no values"));
        }
        if column.len() != 1 && column.len() != jobs {
            return Err(CwlError::validation(
                id,
                format!("batch column has {} values, expected 1 or {}", column.len(), jobs),
            ));
        }
    }

    Ok((0..jobs)
        .map(|index| {
            batch
                .iter()
                .map(|(id, column)| {
                    let value = if column.len() == 1 { &column[0] } else { &column[index] };
                    (id.clone(), value.clone())
                })
                .collect()
        })
        .collect())
}

/// A job ready to hand to a worker.
struct PreparedJob {
    index: usize,
    values_path: PathBuf,
    outdir: PathBuf,
}

/// Fans value sets out over a pool of worker threads.
///
/// # Example
///
/// ```rust,no_run
/// use cwlsmith::emit::load_batch;
/// use cwlsmith::execution::{BatchDispatcher, RunConfig, RunDispatcher};
/// use cwlsmith::model::{InputParam, Process};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let echo = Process::new("echo", "echo")?
///         .with_inputs(vec![InputParam::new("sth", "string")?])?;
///
///     let mut config = RunConfig::from_env();
///     config.set_max_parallel(4);
///     let batch = BatchDispatcher::new(RunDispatcher::new(config));
///     let report = batch.run(&echo, &load_batch("batch.yml")?)?;
///     println!("{} of {} jobs succeeded", report.succeeded(), report.jobs.len());
///     Ok(())
/// }
/// ```
pub struct BatchDispatcher {
    dispatcher: RunDispatcher,
    cancel: Mutex<CancelToken>,
}

/// Swaps in a fresh token once a cancelled run ends, so the next run
/// starts uncancelled.
struct ResetWhenCancelled<'a>(&'a Mutex<CancelToken>);

impl Drop for ResetWhenCancelled<'_> {
    fn drop(&mut self) {
        let mut token = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if token.is_cancelled() {
            *token = CancelToken::new();
        }
    }
}

impl BatchDispatcher {
    pub fn new(dispatcher: RunDispatcher) -> Self {
        Self {
            dispatcher,
            cancel: Mutex::new(CancelToken::new()),
        }
    }

    /// A handle that stops jobs not yet started in the current run, or in
    /// the next one if no run is in progress.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Runs one job per value set of `batch`.
    ///
    /// Errors in the document itself or in the shape of `batch` fail the
    /// whole call before anything is launched. Everything after that lands
    /// in the slot of the job it belongs to.
    pub fn run<T: Emit + Interface + Clone>(&self, item: &T, batch: &BatchValues) -> Result<BatchReport> {
        let cancel = self.cancel_token();
        let _reset = ResetWhenCancelled(&self.cancel);
        let value_sets = expand_columns(batch)?;
        let config = self.dispatcher.config();

        let document = item.to_document()?;
        let document_text = serde_yaml::to_string(&document)?;
        let globs = output_globs(&document);

        let staging = self.dispatcher.staging_dir().join(item.id());
        fs::create_dir_all(&staging)?;
        let document_path = staging.join(format!("{}.cwl", item.id()));
        if let Err(e) = fs::write(&document_path, document_text) {
            remove_staging(&staging);
            return Err(e.into());
        }

        let mut timeline = BatchTimeline::new();
        let mut slots: Vec<Option<Result<RunResult>>> = value_sets.iter().map(|_| None).collect();
        let mut queue = Vec::new();

        for (index, values) in value_sets.iter().enumerate() {
            match self.prepare(item, index, values, &staging) {
                Ok(job) => queue.push(job),
                Err(e) => {
                    warn!("Job '{}' rejected: {}", job_key(index), e);
                    timeline.add_event(job_key(index), EventType::Failed);
                    slots[index] = Some(Err(e));
                }
            }
        }
        queue.reverse();

        info!(
            "Starting batch '{}' ({} jobs, max parallel: {})",
            item.id(),
            value_sets.len(),
            config.max_parallel()
        );

        let (tx, rx): (Sender<(usize, Result<RunResult>)>, Receiver<(usize, Result<RunResult>)>) =
            channel();
        let mut running = 0;

        loop {
            while running < config.max_parallel() && !cancel.is_cancelled() {
                let Some(job) = queue.pop() else {
                    break;
                };
                let key = job_key(job.index);
                info!("Starting job: {}", key);
                timeline.add_event(key.clone(), EventType::Started);

                let tx = tx.clone();
                let dispatcher = self.dispatcher.clone();
                let document_path = document_path.clone();
                let globs = globs.clone();

                thread::spawn(move || {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| {
                        dispatcher.invoke(&document_path, &job.values_path, &job.outdir, globs)
                    }))
                    .unwrap_or_else(|_| {
                        Err(CwlError::RunnerFailure {
                            command: key,
                            status: None,
                            log: "worker panicked".to_string(),
                        })
                    });

                    if let Err(e) = tx.send((job.index, result)) {
                        error!("Failed to send job result: {}", e);
                    }
                });
                running += 1;
            }

            if running == 0 {
                break;
            }

            let (index, result) = rx
                .recv()
                .map_err(|e| CwlError::validation(item.id(), format!("lost job results: {}", e)))?;
            running -= 1;

            let key = job_key(index);
            match &result {
                Ok(_) => {
                    info!("Job '{}' completed successfully", key);
                    timeline.add_event(key, EventType::Completed);
                }
                Err(e) => {
                    error!("Job '{}' failed: {}", key, e);
                    timeline.add_event(key, EventType::Failed);
                }
            }
            slots[index] = Some(result);
        }

        if cancel.is_cancelled() {
            warn!("Batch '{}' cancelled with {} job(s) not started", item.id(), queue.len());
        }

        let jobs: Vec<JobResult> = slots
            .into_iter()
            .zip(value_sets)
            .enumerate()
            .map(|(index, (slot, values))| {
                let key = job_key(index);
                let outcome = slot.unwrap_or_else(|| {
                    timeline.add_event(key.clone(), EventType::Cancelled);
                    Err(CwlError::Cancelled(key.clone()))
                });
                JobResult {
                    index,
                    key,
                    values,
                    outcome,
                }
            })
            .collect();

        if !config.keep_intermediate() {
            remove_staging(&staging);
        }

        let report = BatchReport { jobs, timeline };
        info!(
            "Batch '{}' finished: {} succeeded, {} failed, {} cancelled",
            item.id(),
            report.succeeded(),
            report.failed(),
            report.cancelled()
        );
        Ok(report)
    }

    /// Binds one value set on a copy of `item` and writes its values file.
    fn prepare<T: Emit + Interface + Clone>(
        &self,
        item: &T,
        index: usize,
        values: &ValueStore,
        staging: &Path,
    ) -> Result<PreparedJob> {
        let mut bound = item.clone();
        apply_values(&mut bound, values.clone())?;

        let key = job_key(index);
        let values_path = staging.join(format!("{}.yml", key));
        fs::write(&values_path, emit_values(&bound)?)?;

        Ok(PreparedJob {
            index,
            values_path,
            outdir: self.dispatcher.config().outdir().join(&key),
        })
    }
}

fn remove_staging(staging: &Path) {
    if let Err(e) = fs::remove_dir_all(staging) {
        warn!("Failed to clean up {}: {}", staging.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{Invocation, LaunchOutput, Launcher, RunConfig};
    use crate::model::{InputParam, ParamValue, Process};
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    /// Fails any job whose values mention "bad".
    struct PickyLauncher {
        launched: AtomicUsize,
    }

    impl Launcher for PickyLauncher {
        fn launch(&self, invocation: &Invocation) -> Result<LaunchOutput> {
            self.launched.fetch_add(1, Ordering::SeqCst);
            let values = fs::read_to_string(invocation.args.last().unwrap())?;
            if values.contains("bad") {
                return Ok(LaunchOutput {
                    status: Some(1),
                    stdout: String::new(),
                    stderr: format!("cannot handle {}", values.trim()),
                });
            }
            let out = invocation.outdir.join("out.txt");
            Ok(LaunchOutput {
                status: Some(0),
                stdout: format!(r#"{{"output": {{"class": "File", "path": "{}"}}}}"#, out.display()),
                stderr: String::new(),
            })
        }
    }

    fn echo() -> Process {
        Process::new("echo", "echo")
            .unwrap()
            .with_inputs(vec![
                InputParam::new("sth", "string").unwrap(),
                InputParam::new("n", "int?").unwrap(),
            ])
            .unwrap()
    }

    fn dispatcher(dir: &Path, parallel: usize, launcher: Arc<dyn Launcher>) -> BatchDispatcher {
        let mut config = RunConfig::new();
        config.set_outdir(dir);
        config.set_max_parallel(parallel);
        BatchDispatcher::new(RunDispatcher::with_launcher(config, launcher))
    }

    fn column(values: &[&str]) -> Vec<ParamValue> {
        values.iter().map(|v| ParamValue::from(*v)).collect()
    }

    #[test]
    fn test_expand_columns() {
        let mut batch = BatchValues::new();
        batch.insert("sth".to_string(), column(&["a", "b", "c"]));
        batch.insert("n".to_string(), vec![ParamValue::Int(2)]);

        let jobs = expand_columns(&batch).unwrap();
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[1]["sth"], ParamValue::from("b"));
        assert_eq!(jobs[2]["n"], ParamValue::Int(2));
    }

    #[test]
    fn test_expand_columns_length_mismatch() {
        let mut batch = BatchValues::new();
        batch.insert("sth".to_string(), column(&["a", "b", "c"]));
        batch.insert("other".to_string(), column(&["x", "y"]));
        assert!(matches!(expand_columns(&batch), Err(CwlError::Validation { .. })));

        let mut batch = BatchValues::new();
        batch.insert("sth".to_string(), Vec::new());
        assert!(expand_columns(&batch).is_err());
        assert!(expand_columns(&BatchValues::new()).unwrap().is_empty());
    }

    #[test]
    fn test_job_key() {
        assert_eq!(job_key(0), "job-001");
        assert_eq!(job_key(41), "job-042");
    }

    #[test]
    fn test_failure_stays_in_its_slot() {
        let temp_dir = tempdir().unwrap();
        let launcher = Arc::new(PickyLauncher { launched: AtomicUsize::new(0) });
        let batch = dispatcher(temp_dir.path(), 2, launcher.clone());

        let mut values = BatchValues::new();
        values.insert("sth".to_string(), column(&["one", "two", "bad", "four", "five"]));
        let report = batch.run(&echo(), &values).unwrap();

        assert_eq!(report.jobs.len(), 5);
        assert_eq!(report.succeeded(), 4);
        assert_eq!(report.failed(), 1);
        assert!(matches!(report.jobs[2].outcome, Err(CwlError::RunnerFailure { .. })));
        assert!(report.jobs[2].outcome.as_ref().unwrap_err().log().unwrap().contains("bad"));
        assert!(report.jobs[4].outcome.as_ref().unwrap().outputs[0].ends_with("job-005/out.txt"));
        assert_eq!(launcher.launched.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_binding_error_rejects_only_that_job() {
        let temp_dir = tempdir().unwrap();
        let launcher = Arc::new(PickyLauncher { launched: AtomicUsize::new(0) });
        let batch = dispatcher(temp_dir.path(), 4, launcher.clone());

        let mut values = BatchValues::new();
        values.insert("sth".to_string(), column(&["one", "two"]));
        values.insert("n".to_string(), vec![ParamValue::Int(1), ParamValue::from("many")]);
        let report = batch.run(&echo(), &values).unwrap();

        assert!(report.jobs[0].is_success());
        assert!(matches!(report.jobs[1].outcome, Err(CwlError::TypeMismatch { .. })));
        assert_eq!(launcher.launched.load(Ordering::SeqCst), 1);
    }

    /// Cancels the batch during its first launch.
    struct CancellingLauncher {
        token: std::sync::Mutex<Option<CancelToken>>,
    }

    impl Launcher for CancellingLauncher {
        fn launch(&self, invocation: &Invocation) -> Result<LaunchOutput> {
            if let Some(token) = self.token.lock().unwrap().as_ref() {
                token.cancel();
            }
            Ok(LaunchOutput {
                status: Some(0),
                stdout: format!(
                    r#"{{"o": {{"class": "File", "path": "{}"}}}}"#,
                    invocation.outdir.join("o").display()
                ),
                stderr: String::new(),
            })
        }
    }

    #[test]
    fn test_cancel_stops_unstarted_jobs() {
        let temp_dir = tempdir().unwrap();
        let launcher = Arc::new(CancellingLauncher {
            token: std::sync::Mutex::new(None),
        });
        let batch = dispatcher(temp_dir.path(), 1, launcher.clone());
        *launcher.token.lock().unwrap() = Some(batch.cancel_token());

        let mut values = BatchValues::new();
        values.insert("sth".to_string(), column(&["a", "b", "c", "d"]));
        let report = batch.run(&echo(), &values).unwrap();

        assert!(report.jobs[0].is_success());
        assert_eq!(report.cancelled(), 3);
        assert!(report.jobs[1..].iter().all(JobResult::is_cancelled));
        assert_eq!(report.timeline.jobs_with(EventType::Cancelled).len(), 3);
    }

    #[test]
    fn test_next_run_after_cancel_starts_fresh() {
        let temp_dir = tempdir().unwrap();
        let launcher = Arc::new(PickyLauncher { launched: AtomicUsize::new(0) });
        let batch = dispatcher(temp_dir.path(), 2, launcher.clone());

        let mut values = BatchValues::new();
        values.insert("sth".to_string(), column(&["a", "b"]));

        batch.cancel_token().cancel();
        assert_eq!(batch.run(&echo(), &values).unwrap().cancelled(), 2);
        assert!(!batch.cancel_token().is_cancelled());

        let report = batch.run(&echo(), &values).unwrap();
        assert!(report.all_succeeded());
        assert_eq!(launcher.launched.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_emission_failure_leaves_no_staging() {
        let temp_dir = tempdir().unwrap();
        let launcher = Arc::new(PickyLauncher { launched: AtomicUsize::new(0) });
        let batch = dispatcher(temp_dir.path(), 1, launcher.clone());
        let unfinished = echo().with_meta(crate::model::Meta::new().with_label("Echo {{sample}}"));

        let mut values = BatchValues::new();
        values.insert("sth".to_string(), column(&["a"]));
        assert!(matches!(batch.run(&unfinished, &values), Err(CwlError::Emission { .. })));
        assert!(!batch.dispatcher.staging_dir().exists());
        assert_eq!(launcher.launched.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_mismatched_columns_fail_whole_batch() {
        let temp_dir = tempdir().unwrap();
        let launcher = Arc::new(PickyLauncher { launched: AtomicUsize::new(0) });
        let batch = dispatcher(temp_dir.path(), 1, launcher);

        let mut values = BatchValues::new();
        values.insert("sth".to_string(), column(&["a", "b"]));
        values.insert("other".to_string(), column(&["a", "b", "c"]));
        assert!(batch.run(&echo(), &values).is_err());
    }
}
