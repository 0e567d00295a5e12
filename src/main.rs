//! CwlSmith CLI Entry Point
//!
//! Normalizes, previews and runs CWL documents.
//!
//! # Usage
//!
//! ```bash
//! # Run a tool with its values file
//! cwlsmith echo.cwl echo.yml
//!
//! # Print the normalized document
//! cwlsmith pipeline.cwl --emit
//!
//! # Show the runner command without running it
//! cwlsmith pipeline.cwl values.yml --dry-run
//!
//! # One job per value set, four at a time
//! cwlsmith echo.cwl --batch samples.yml --parallel 4 --outdir results
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use colored::Colorize;
use log::{error, info};

use cwlsmith::emit::{apply_values, emit_document, emit_values, load_batch, load_document, load_values};
use cwlsmith::execution::{expand_columns, job_key, BatchDispatcher, BatchReport, RunConfig, RunDispatcher};
use cwlsmith::model::{Interface, Run};
use cwlsmith::{APP_NAME, VERSION};

/// Command-line configuration parsed from arguments.
#[derive(Debug, Default)]
struct Config {
    document_path: Option<String>,
    values_path: Option<String>,
    emit: bool,
    dry_run: bool,
    outdir: Option<PathBuf>,
    runner: Option<String>,
    runner_args: Vec<String>,
    no_container: bool,
    batch_path: Option<String>,
    max_parallel: Option<usize>,
    verbose: bool,
}

impl Config {
    /// Environment defaults with command-line overrides applied.
    fn run_config(&self) -> RunConfig {
        let mut config = RunConfig::from_env();
        if let Some(runner) = &self.runner {
            config.set_runner(runner.clone());
        }
        for arg in &self.runner_args {
            config.add_runner_arg(arg.clone());
        }
        if let Some(dir) = &self.outdir {
            config.set_outdir(dir.clone());
        }
        if let Some(max) = self.max_parallel {
            config.set_max_parallel(max);
        }
        config.set_no_container(self.no_container);
        config
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

fn print_usage() {
    println!("Usage: cwlsmith [OPTIONS] <DOCUMENT> [VALUES]");
    println!();
    println!("Arguments:");
    println!("  <DOCUMENT>          CWL tool or workflow document");
    println!("  [VALUES]            Values file for the document's inputs");
    println!();
    println!("Options:");
    println!("  --emit              Print the normalized document and values, then exit");
    println!("  --dry-run           Show runner commands without running them");
    println!("  --outdir DIR        Output directory (default: .)");
    println!("  --runner BIN        CWL runner (default: cwltool, or $CWLSMITH_RUNNER)");
    println!("  --runner-arg ARG    Extra runner flag, repeatable");
    println!("  --no-container      Ask the runner not to use containers");
    println!("  --batch FILE        Run one job per value set in FILE");
    println!("  --parallel N        Maximum parallel batch jobs (default: CPU count)");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  cwlsmith echo.cwl echo.yml");
    println!("  cwlsmith pipeline.cwl --emit");
    println!("  cwlsmith echo.cwl --batch samples.yml --parallel 4 --outdir results");
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut positional_index = 0;
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--emit" => config.emit = true,
            "--dry-run" => config.dry_run = true,
            "--no-container" => config.no_container = true,
            "--verbose" | "-v" => config.verbose = true,
            "--outdir" | "--runner" | "--runner-arg" | "--batch" | "--parallel" => {
                i += 1;
                let Some(value) = args.get(i) else {
                    return Err(format!("{} requires an argument", arg));
                };
                match arg.as_str() {
                    "--outdir" => config.outdir = Some(PathBuf::from(value)),
                    "--runner" => config.runner = Some(value.clone()),
                    "--runner-arg" => config.runner_args.push(value.clone()),
                    "--batch" => config.batch_path = Some(value.clone()),
                    _ => {
                        let max: usize = value
                            .parse()
                            .map_err(|_| format!("Invalid parallel value: {}", value))?;
                        if max == 0 {
                            return Err("--parallel must be at least 1".to_string());
                        }
                        config.max_parallel = Some(max);
                    }
                }
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                match positional_index {
                    0 => config.document_path = Some(arg.clone()),
                    1 => config.values_path = Some(arg.clone()),
                    _ => return Err(format!("Unexpected argument: {}", arg)),
                }
                positional_index += 1;
            }
        }
        i += 1;
    }

    if config.document_path.is_none() {
        return Err("No document given".to_string());
    }
    if config.batch_path.is_some() && config.values_path.is_some() {
        return Err("Use either a values file or --batch, not both".to_string());
    }

    Ok(config)
}

/// Loads the document and binds the values file, if any.
fn load(config: &Config, document_path: &str) -> Result<Run, Box<dyn std::error::Error>> {
    let mut run = load_document(document_path).map_err(|e| {
        error!("Failed to load document: {}", e);
        format!("Could not load document from '{}': {}", document_path, e)
    })?;

    if let Some(values_path) = &config.values_path {
        info!("Loading values: {}", values_path);
        apply_values(&mut run, load_values(values_path)?)?;
    }

    info!(
        "Loaded {} '{}': {} input(s), {} output(s)",
        if run.is_workflow() { "workflow" } else { "tool" },
        run.id(),
        run.inputs().len(),
        run.output_ids().len()
    );
    Ok(run)
}

fn dry_run(config: &Config, run: &Run, dispatcher: &RunDispatcher) -> Result<(), Box<dyn std::error::Error>> {
    let staging = dispatcher.staging_dir();
    let document = staging.join(format!("{}.cwl", run.id()));

    let Some(batch_path) = &config.batch_path else {
        let values = staging.join(format!("{}.yml", run.id()));
        let invocation = dispatcher.invocation(&document, &values, dispatcher.config().outdir());
        println!("[DRY RUN] {}", invocation.command_line());
        return Ok(());
    };

    let jobs = expand_columns(&load_batch(batch_path)?)?;
    let staging = staging.join(run.id());
    let document = staging.join(format!("{}.cwl", run.id()));
    for (index, values) in jobs.iter().enumerate() {
        let key = job_key(index);
        let values_path = staging.join(format!("{}.yml", key));
        let outdir = dispatcher.config().outdir().join(&key);
        let invocation = dispatcher.invocation(&document, &values_path, &outdir);

        println!();
        println!("[DRY RUN] Job: {}", key);
        println!("  Command: {}", invocation.command_line());
        for (id, value) in values {
            println!("  {}: {}", id, serde_yaml::to_string(value)?.trim_end());
        }
    }
    Ok(())
}

fn print_batch_summary(report: &BatchReport) {
    println!();
    for job in &report.jobs {
        match &job.outcome {
            Ok(result) => {
                let elapsed = (result.finished - result.started).num_milliseconds() as f64 / 1000.0;
                println!(
                    "  {} {} {}",
                    "✓".green(),
                    job.key,
                    format!("({:.1}s, {} output(s))", elapsed, result.outputs.len()).dimmed()
                );
            }
            Err(e) if job.is_cancelled() => println!("  {} {} {}", "-".yellow(), job.key, e.to_string().dimmed()),
            Err(e) => println!("  {} {} {}", "✗".red(), job.key, e),
        }
    }
    println!("{}", report.timeline.gantt_chart());

    let counts = format!(
        "{} succeeded, {} failed, {} cancelled",
        report.succeeded(),
        report.failed(),
        report.cancelled()
    );
    if report.all_succeeded() {
        println!("{} {}", "Done:".green(), counts);
    } else {
        println!("{} {}", "Done:".red(), counts);
    }
}

fn print_outputs(outputs: &[PathBuf], outdir: &Path) {
    println!();
    println!("{} {} output(s) in {}", "✓".green(), outputs.len(), outdir.display());
    for output in outputs {
        println!("  {}", output.display());
    }
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);

    let document_path = config.document_path.clone().unwrap_or_default();
    let run = load(&config, &document_path)?;

    if config.emit {
        print!("{}", emit_document(&run)?);
        if !run.bound_values().is_empty() {
            println!("---");
            print!("{}", emit_values(&run)?);
        }
        return Ok(());
    }

    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!();

    let dispatcher = RunDispatcher::new(config.run_config());

    if config.dry_run {
        info!("Mode: DRY RUN (runner will not be started)");
        return dry_run(&config, &run, &dispatcher);
    }

    if let Some(batch_path) = &config.batch_path {
        let batch = load_batch(batch_path)?;
        let report = BatchDispatcher::new(dispatcher).run(&run, &batch)?;
        print_batch_summary(&report);
        if !report.all_succeeded() {
            let unsuccessful = report.jobs.len() - report.succeeded();
            return Err(format!("{} of {} jobs did not succeed", unsuccessful, report.jobs.len()).into());
        }
        return Ok(());
    }

    let result = dispatcher.run(&run).map_err(|e| {
        if let Some(log) = e.log() {
            eprintln!("{}", log);
        }
        e
    })?;
    info!("Command: {}", result.command);
    print_outputs(&result.outputs, dispatcher.config().outdir());
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
