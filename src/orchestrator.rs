//! The orchestrator: task registry, stage sequencing and watch triggers
//!
//! Tasks are registered once under a unique name. A pipeline is a list of
//! [`Stage`]s run strictly in order; the tasks of a parallel stage run
//! concurrently and the stage completes only when all of them have finished.
//!
//! How a failure is handled depends on the [`RunMode`]:
//!
//! - [`RunMode::BuildOnce`]: any failure halts the pipeline. Siblings in the
//!   failing stage still run to completion, nothing later starts.
//! - [`RunMode::Develop`]: failures of tasks with [`FailurePolicy::Report`] are
//!   collected in the [`SequenceReport`] and the pipeline continues; tasks
//!   with [`FailurePolicy::Halt`] still stop it.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, info_span, Instrument};

use crate::actions;
use crate::config::Config;
use crate::error::{Result, StagehandError};
use crate::graph::{Stage, TaskGraph};
use crate::report::{NoopObserver, Observer};
use crate::task::{FailurePolicy, Operation, TaskConstraints, TaskContext, TaskResult};
use crate::watch::{self, Trigger, WatchRule};

/// How failures affect a running pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    BuildOnce,
    Develop,
}

/// A task as registered
pub struct RegisteredTask {
    pub name: String,
    pub operation: Arc<dyn Operation>,
    pub constraints: TaskConstraints,
    pub desc: Option<String>,
}

/// Everything that happened in one stage
#[derive(Debug)]
pub struct StageOutcome {
    pub index: usize,
    pub results: Vec<TaskResult>,
    pub failures: Vec<StagehandError>,
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of a pipeline that ran to the end
#[derive(Debug, Default)]
pub struct SequenceReport {
    pub results: Vec<TaskResult>,
    /// Failures that were reported instead of halting (develop mode only)
    pub reported: Vec<StagehandError>,
    pub stages_run: usize,
}

impl SequenceReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn is_clean(&self) -> bool {
        self.reported.is_empty()
    }
}

/// Registry of tasks and watch rules, and the engine that runs them
pub struct Orchestrator {
    tasks: BTreeMap<String, RegisteredTask>,
    watch_rules: Vec<WatchRule>,
    context: TaskContext,
    observer: Arc<dyn Observer>,
}

impl Orchestrator {
    pub fn new(context: TaskContext) -> Self {
        Self {
            tasks: BTreeMap::new(),
            watch_rules: Vec::new(),
            context,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    /// Build a registry from configuration: one task per `[tasks.*]` entry
    /// and one watch rule per `[[watch]]` entry
    ///
    /// Fails on a cycle in the `after` constraints, or on a pipeline that
    /// places a task in the same stage as a dependency or before it.
    pub fn from_config(config: &Config, context: TaskContext) -> Result<Self> {
        let mut orchestrator = Self::new(context);

        for (name, task) in &config.tasks {
            let constraints = TaskConstraints {
                after: task.after.clone(),
                on_error: task.on_error,
            };
            orchestrator.register_task(name, actions::operation_for(&task.action), constraints)?;
            if let Some(registered) = orchestrator.tasks.get_mut(name) {
                registered.desc = task.desc.clone();
            }
        }

        for rule in &config.watch {
            orchestrator.watch(&rule.paths, &rule.run)?;
        }

        let graph = orchestrator.graph()?;
        for name in config.pipelines.keys() {
            if let Some(stages) = config.pipeline(name) {
                graph.check_order(&stages)?;
            }
        }

        Ok(orchestrator)
    }

    /// Register a task under a unique name
    ///
    /// Registering a name twice fails and leaves the first registration in
    /// place.
    pub fn register_task(
        &mut self,
        name: &str,
        operation: Arc<dyn Operation>,
        constraints: TaskConstraints,
    ) -> Result<()> {
        if self.tasks.contains_key(name) {
            return Err(StagehandError::DuplicateTask {
                name: name.to_string(),
            });
        }

        debug!(task = name, "registered");
        self.tasks.insert(
            name.to_string(),
            RegisteredTask {
                name: name.to_string(),
                operation,
                constraints,
                desc: None,
            },
        );
        Ok(())
    }

    /// Add a watch rule re-running `tasks`, in series, when a path matches
    pub fn watch<P, T>(&mut self, patterns: &[P], tasks: &[T]) -> Result<()>
    where
        P: AsRef<str>,
        T: AsRef<str>,
    {
        for task in tasks {
            self.require(task.as_ref())?;
        }
        self.watch_rules.push(WatchRule::new(patterns, tasks)?);
        Ok(())
    }

    pub fn task(&self, name: &str) -> Option<&RegisteredTask> {
        self.tasks.get(name)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &RegisteredTask> {
        self.tasks.values()
    }

    pub fn task_names(&self) -> Vec<String> {
        self.tasks.keys().cloned().collect()
    }

    pub fn context(&self) -> &TaskContext {
        &self.context
    }

    pub fn observer(&self) -> &Arc<dyn Observer> {
        &self.observer
    }

    pub fn watch_rules(&self) -> &[WatchRule] {
        &self.watch_rules
    }

    /// Dependency graph over the registered `after` constraints
    pub fn graph(&self) -> Result<TaskGraph> {
        TaskGraph::new(
            self.tasks
                .iter()
                .map(|(name, task)| (name.as_str(), task.constraints.after.as_slice())),
        )
    }

    /// Stages for the targets and everything they must run after
    pub fn plan(&self, targets: &[&str]) -> Result<Vec<Stage>> {
        self.graph()?.stages(targets)
    }

    fn require(&self, name: &str) -> Result<&RegisteredTask> {
        self.tasks.get(name).ok_or_else(|| StagehandError::TaskNotFound {
            name: name.to_string(),
            available: self.task_names(),
        })
    }

    fn halts(&self, mode: RunMode, failure: &StagehandError) -> bool {
        match mode {
            RunMode::BuildOnce => true,
            RunMode::Develop => failure
                .task()
                .and_then(|name| self.tasks.get(name))
                .map(|task| task.constraints.on_error == FailurePolicy::Halt)
                .unwrap_or(true),
        }
    }

    /// Run every task of one stage concurrently and wait for all of them
    pub async fn run_stage(&self, index: usize, stage: &Stage) -> StageOutcome {
        self.observer.stage_started(index, stage);
        debug!(stage = index, tasks = %stage, "stage started");

        let finished = join_all(stage.tasks().iter().map(|name| self.run_task(name))).await;

        let mut outcome = StageOutcome {
            index,
            results: Vec::with_capacity(finished.len()),
            failures: Vec::new(),
        };
        for (result, failure) in finished {
            outcome.results.push(result);
            outcome.failures.extend(failure);
        }
        outcome
    }

    async fn run_task(&self, name: &str) -> (TaskResult, Option<StagehandError>) {
        let started_at = Utc::now();
        let start = Instant::now();

        let outcome = match self.require(name) {
            Ok(task) => {
                self.observer.task_started(name);
                task.operation
                    .run(&self.context)
                    .instrument(info_span!("task", name))
                    .await
            }
            Err(e) => Err(e),
        };

        let mut result = TaskResult {
            name: name.to_string(),
            started_at,
            duration: start.elapsed(),
            output: None,
            error: None,
        };

        let failure = match outcome {
            Ok(output) => {
                debug!(task = name, written = output.written.len(), skipped = output.skipped, "finished");
                result.output = Some(output);
                None
            }
            Err(e) => {
                result.error = Some(e.to_string());
                Some(e.in_task(name))
            }
        };

        self.observer.task_finished(&result);
        (result, failure)
    }

    /// Run stages in order, halting on the first failure
    pub async fn run_sequence(&self, stages: &[Stage]) -> Result<SequenceReport> {
        self.run_pipeline(stages, RunMode::BuildOnce).await
    }

    /// Run stages in order under the given failure mode
    ///
    /// Every task name and the stage order are checked before anything runs.
    /// On a halting failure
    /// the error of the first failed task in the stage is returned; no later
    /// stage starts.
    pub async fn run_pipeline(&self, stages: &[Stage], mode: RunMode) -> Result<SequenceReport> {
        for stage in stages {
            for name in stage.tasks() {
                self.require(name)?;
            }
        }
        self.graph()?.check_order(stages)?;

        let started = Instant::now();
        let mut report = SequenceReport::default();

        for (index, stage) in stages.iter().enumerate() {
            let outcome = self.run_stage(index, stage).await;
            report.stages_run += 1;
            report.results.extend(outcome.results);

            let mut halting = None;
            for failure in outcome.failures {
                if halting.is_none() && self.halts(mode, &failure) {
                    halting = Some(failure);
                } else {
                    report.reported.push(failure);
                }
            }

            if let Some(failure) = halting {
                info!(stage = index, "pipeline halted");
                return Err(failure);
            }
        }

        info!(
            stages = report.stages_run,
            failed = report.reported.len(),
            elapsed = ?started.elapsed(),
            "pipeline finished"
        );
        Ok(report)
    }

    /// Watch triggers for a batch of changed paths
    pub fn triggers_for(&self, changed: &[PathBuf]) -> Vec<Trigger> {
        watch::triggers(&self.watch_rules, &self.context.root, changed)
    }
}
