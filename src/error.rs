//! Error types for Stagehand
//!
//! Uses `miette` for pretty error reporting with help text.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Stagehand operations
#[derive(Error, Diagnostic, Debug)]
pub enum StagehandError {
    #[error("Configuration file not found")]
    #[diagnostic(
        code(stagehand::config::not_found),
        help("Create a stagehand.toml in your project root (`stagehand init`), or pass --config")
    )]
    ConfigNotFound { searched: Vec<PathBuf> },

    #[error("Failed to parse configuration {}", path.display())]
    #[diagnostic(code(stagehand::config::parse))]
    ConfigParse {
        #[source]
        source: toml::de::Error,
        path: PathBuf,
    },

    #[error("Invalid task '{task}': {reason}")]
    #[diagnostic(code(stagehand::config::invalid_task))]
    InvalidTask { task: String, reason: String },

    #[error("Task '{name}' is already registered")]
    #[diagnostic(
        code(stagehand::task::duplicate),
        help("Task names must be unique; rename one of the definitions")
    )]
    DuplicateTask { name: String },

    #[error("Task '{name}' not found")]
    #[diagnostic(
        code(stagehand::task::not_found),
        help("Run `stagehand list` to see available tasks")
    )]
    TaskNotFound { name: String, available: Vec<String> },

    #[error("Pipeline '{name}' not found")]
    #[diagnostic(
        code(stagehand::pipeline::not_found),
        help("Define it under [pipelines] in stagehand.toml")
    )]
    PipelineNotFound { name: String, available: Vec<String> },

    #[error("Circular dependency detected: {cycle}")]
    #[diagnostic(
        code(stagehand::task::cycle),
        help("Check the 'after' field in your task definitions")
    )]
    GraphCycle { cycle: String },

    #[error("Task '{task}' runs after '{dependency}', but '{dependency}' is not in an earlier stage")]
    #[diagnostic(
        code(stagehand::pipeline::order),
        help("Move '{dependency}' to a stage before '{task}', or drop it from the 'after' list")
    )]
    StageOrder { task: String, dependency: String },

    #[error("Invalid pattern '{pattern}': {reason}")]
    #[diagnostic(code(stagehand::pattern))]
    InvalidPattern { pattern: String, reason: String },

    #[error("Task '{task}' failed")]
    #[diagnostic(code(stagehand::exec::task))]
    TaskExecution {
        task: String,
        #[source]
        source: Box<StagehandError>,
    },

    #[error("Command `{command}` failed with exit code {code}")]
    #[diagnostic(code(stagehand::exec::failed))]
    CommandFailed {
        command: String,
        code: i32,
        #[help]
        stderr: Option<String>,
    },

    #[error("Command not found: {command}")]
    #[diagnostic(
        code(stagehand::exec::command_not_found),
        help("Ensure the tool is installed and in your PATH (e.g. `npm i -g sass pug-cli`)")
    )]
    CommandNotFound { command: String },

    #[error("Cannot build sprite from {}: {reason}", file.display())]
    #[diagnostic(code(stagehand::sprite))]
    Sprite { file: PathBuf, reason: String },

    #[error("I/O error")]
    #[diagnostic(code(stagehand::io))]
    Io(#[from] std::io::Error),

    #[error("Watch error")]
    #[diagnostic(code(stagehand::watch))]
    Watch {
        #[source]
        source: notify::Error,
    },

    #[error("Dev server error: {message}")]
    #[diagnostic(
        code(stagehand::server),
        help("Another process may already be listening on that port; try --port")
    )]
    Server { message: String },
}

impl StagehandError {
    /// Wrap an operation failure with the identifier of the task that produced it
    pub fn in_task(self, task: impl Into<String>) -> Self {
        StagehandError::TaskExecution {
            task: task.into(),
            source: Box::new(self),
        }
    }

    /// Name of the failing task, if this is an execution error
    pub fn task(&self) -> Option<&str> {
        match self {
            StagehandError::TaskExecution { task, .. } => Some(task),
            _ => None,
        }
    }
}

/// Result type alias for Stagehand operations
pub type Result<T> = std::result::Result<T, StagehandError>;
