//! Tasks: the operation seam and the values flowing around it
//!
//! A task is a name, an [`Operation`] and a set of [`TaskConstraints`].
//! Operations are opaque async transformations; the orchestrator only awaits
//! them and records what they report.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Which flavour of output the external tools should produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    Development,
    #[default]
    Production,
}

impl BuildMode {
    /// Read the build mode from an environment variable (`NODE_ENV` style)
    pub fn from_env(var: &str) -> Self {
        Self::from_value(std::env::var(var).ok().as_deref())
    }

    pub fn from_value(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("development") => BuildMode::Development,
            _ => BuildMode::Production,
        }
    }

    /// Output style passed to the style compiler
    pub fn style_output(&self) -> &'static str {
        match self {
            BuildMode::Development => "expanded",
            BuildMode::Production => "compressed",
        }
    }
}

/// What happens to a pipeline when this task fails in develop mode
///
/// In a one-shot build every failure halts the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Log the failure and keep going
    #[default]
    Report,
    /// Stop the pipeline, even in develop mode
    Halt,
}

/// Ordering and failure constraints declared at registration
#[derive(Debug, Clone, Default)]
pub struct TaskConstraints {
    /// Tasks that must complete before this one
    pub after: Vec<String>,
    pub on_error: FailurePolicy,
}

impl TaskConstraints {
    pub fn after<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            after: names.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn halting(mut self) -> Self {
        self.on_error = FailurePolicy::Halt;
        self
    }
}

/// Everything an operation may look at while running
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Project root; relative paths in task definitions resolve against it
    pub root: PathBuf,
    pub mode: BuildMode,
    /// Extra environment for spawned tools
    pub env: HashMap<String, String>,
    /// Run commands through `sh -c` instead of spawning them directly
    pub shell: bool,
}

impl TaskContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mode: BuildMode::default(),
            env: HashMap::new(),
            shell: false,
        }
    }

    pub fn with_mode(mut self, mode: BuildMode) -> Self {
        self.mode = mode;
        self
    }

    /// Resolve a configured path against the project root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// What an operation did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOutput {
    /// Files written (or removed, for cleaning)
    pub written: Vec<PathBuf>,
    /// Inputs skipped because their output was fresh
    pub skipped: usize,
}

impl TaskOutput {
    pub fn wrote(path: PathBuf) -> Self {
        Self {
            written: vec![path],
            skipped: 0,
        }
    }
}

/// An async transformation behind a task
pub trait Operation: Send + Sync {
    fn run<'a>(&'a self, ctx: &'a TaskContext) -> BoxFuture<'a, Result<TaskOutput>>;

    /// Short description for listings
    fn describe(&self) -> String {
        "custom operation".to_string()
    }
}

/// Operation backed by a closure
pub struct FnOperation<F>(F);

impl<F, Fut> Operation for FnOperation<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskOutput>> + Send + 'static,
{
    fn run<'a>(&'a self, ctx: &'a TaskContext) -> BoxFuture<'a, Result<TaskOutput>> {
        Box::pin((self.0)(ctx.clone()))
    }
}

/// Wrap a closure returning a future as a shareable operation
pub fn from_fn<F, Fut>(f: F) -> Arc<dyn Operation>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TaskOutput>> + Send + 'static,
{
    Arc::new(FnOperation(f))
}

/// Result of executing a single task
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub output: Option<TaskOutput>,
    pub error: Option<String>,
}

impl TaskResult {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}
