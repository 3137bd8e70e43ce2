//! Progress and failure reporting
//!
//! The orchestrator never prints. It tells an [`Observer`] what happens and
//! hands typed outcomes back to its caller; the console implementation here
//! turns both into spinners and coloured lines.

use std::collections::HashMap;
use std::error::Error as _;
use std::sync::Mutex;
use std::time::Duration;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::error::StagehandError;
use crate::graph::Stage;
use crate::orchestrator::SequenceReport;
use crate::task::TaskResult;

/// Hooks called while pipelines run
pub trait Observer: Send + Sync {
    fn stage_started(&self, _index: usize, _stage: &Stage) {}

    fn task_started(&self, _name: &str) {}

    fn task_finished(&self, _result: &TaskResult) {}

    /// The designated error handler for failures that do not end the process
    fn pipeline_failed(&self, error: &StagehandError) {
        tracing::error!(task = error.task().unwrap_or("-"), "{}", error);
    }
}

/// Observer that only logs
#[derive(Debug, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// Spinners while tasks run, one line per finished task
pub struct ConsoleObserver {
    progress: MultiProgress,
    spinners: Mutex<HashMap<String, ProgressBar>>,
    quiet: bool,
}

impl ConsoleObserver {
    pub fn new(quiet: bool) -> Self {
        Self {
            progress: MultiProgress::new(),
            spinners: Mutex::new(HashMap::new()),
            quiet,
        }
    }
}

impl Observer for ConsoleObserver {
    fn task_started(&self, name: &str) {
        if self.quiet {
            return;
        }

        let pb = self.progress.add(ProgressBar::new_spinner());
        if let Ok(spinner_style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(spinner_style);
        }
        pb.set_message(format!("Running {}", name));
        pb.enable_steady_tick(Duration::from_millis(100));

        if let Ok(mut spinners) = self.spinners.lock() {
            spinners.insert(name.to_string(), pb);
        }
    }

    fn task_finished(&self, result: &TaskResult) {
        if let Ok(mut spinners) = self.spinners.lock() {
            if let Some(pb) = spinners.remove(&result.name) {
                pb.finish_and_clear();
            }
        }

        if !self.quiet || !result.success() {
            self.progress.suspend(|| print_task_result(result));
        }
    }

    fn pipeline_failed(&self, error: &StagehandError) {
        tracing::warn!(task = error.task().unwrap_or("-"), "{}", error);
        self.progress.suspend(|| report_failure(error));
    }
}

/// Print result of a single task
pub fn print_task_result(result: &TaskResult) {
    let status = if result.success() {
        match &result.output {
            Some(output) if output.written.is_empty() && output.skipped > 0 => style("✓ fresh").green(),
            _ => style("✓").green(),
        }
    } else {
        style("✗").red()
    };

    let duration = format!("{:.2}s", result.duration.as_secs_f64());
    let detail = match &result.output {
        Some(output) if output.skipped > 0 => format!(
            "{} written, {} skipped",
            output.written.len(),
            output.skipped
        ),
        Some(output) if !output.written.is_empty() => format!("{} written", output.written.len()),
        _ => String::new(),
    };

    println!(
        "{} {} {} {}",
        status,
        style(&result.name).bold(),
        style(duration).dim(),
        style(detail).dim()
    );

    if let Some(error) = &result.error {
        eprintln!("  {}", style(error).red());
    }
}

/// Print an error with its causes and any captured tool output
pub fn report_failure(error: &StagehandError) {
    eprintln!("{} {}", style("✗").red().bold(), style(error).red());

    let mut source = error.source();
    while let Some(cause) = source {
        eprintln!("  {} {}", style("caused by:").dim(), cause);
        if let Some(StagehandError::CommandFailed {
            stderr: Some(stderr),
            ..
        }) = cause.downcast_ref::<StagehandError>()
        {
            for line in stderr.lines() {
                eprintln!("    {}", style(line).dim());
            }
        }
        source = cause.source();
    }
}

/// Print execution summary
pub fn print_summary(report: &SequenceReport) {
    println!();

    let total: Duration = report.results.iter().map(|r| r.duration).sum();
    let succeeded = report.succeeded();
    let failed = report.failed();

    if failed == 0 {
        println!(
            "{} {} tasks completed in {:.2}s ({} stages)",
            style("✓").green().bold(),
            succeeded,
            total.as_secs_f64(),
            report.stages_run
        );
    } else {
        println!(
            "{} {} succeeded, {} failed in {:.2}s",
            style("✗").red().bold(),
            succeeded,
            failed,
            total.as_secs_f64()
        );
    }
}
