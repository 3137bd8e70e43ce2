//! Stagehand - a build orchestrator for static frontend sites
//!
//! This crate provides both a CLI tool and a library for running the
//! pipeline of a static site: clean the output, then copy assets, render
//! templates, compile styles, bundle scripts and build sprites, mostly in
//! parallel.
//!
//! # Features
//!
//! - **Stages** - Pipelines are plain lists of tasks and parallel task sets
//! - **External tools** - Pug, Sass, linters and minifiers run as child processes
//! - **Incremental render** - Skip templates whose output is up to date
//! - **Develop mode** - Watch rules re-run tasks, a dev server reloads the browser
//! - **Failure policies** - Report and continue, or halt the pipeline
//!
//! # Example
//!
//! ```toml
//! # stagehand.toml
//!
//! [tasks."clean:dist"]
//! kind = "clean"
//! dir = "dist"
//!
//! [tasks."sass:app"]
//! kind = "style"
//! src = ["src/sass/app.{sass,scss}"]
//! dest = "dist/css"
//! after = ["clean:dist"]
//!
//! [pipelines]
//! build = ["clean:dist", ["sass:app"]]
//! ```
//!
//! # Library Usage
//!
//! ```rust,ignore
//! use stagehand::{from_fn, Orchestrator, Stage, TaskConstraints, TaskContext, TaskOutput};
//!
//! #[tokio::main]
//! async fn main() -> stagehand::Result<()> {
//!     let mut orchestrator = Orchestrator::new(TaskContext::new("."));
//!     orchestrator.register_task(
//!         "hello",
//!         from_fn(|_| async { Ok(TaskOutput::default()) }),
//!         TaskConstraints::default(),
//!     )?;
//!
//!     orchestrator.run_sequence(&[Stage::Task("hello".into())]).await?;
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod config;
pub mod develop;
pub mod error;
pub mod freshness;
pub mod graph;
pub mod orchestrator;
pub mod paths;
pub mod report;
pub mod server;
pub mod task;
pub mod watch;

// Re-export main types
pub use config::Config;
pub use develop::{DevelopHandle, DevelopOptions, RunStats};
pub use error::{Result, StagehandError};
pub use freshness::FreshnessPolicy;
pub use graph::{Stage, TaskGraph};
pub use orchestrator::{Orchestrator, RunMode, SequenceReport, StageOutcome};
pub use report::{ConsoleObserver, NoopObserver, Observer};
pub use server::ServerOptions;
pub use task::{
    from_fn, BuildMode, FailurePolicy, Operation, TaskConstraints, TaskContext, TaskOutput,
    TaskResult,
};
pub use watch::{Trigger, WatchRule};
