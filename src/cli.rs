//! CLI command definitions and handling
//!
//! Uses `clap` derive API for argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use stagehand::BuildMode;

/// Stagehand - build and serve a static frontend site
#[derive(Parser, Debug)]
#[command(name = "stagehand")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to stagehand.toml config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Working directory
    #[arg(long, global = true)]
    pub cwd: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Build mode (defaults to the `mode_env` variable, e.g. NODE_ENV)
    #[arg(long, global = true, env = "STAGEHAND_MODE")]
    pub mode: Option<ModeArg>,

    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Tasks to run (shorthand for `stagehand run <task>...`)
    #[arg(trailing_var_arg = true)]
    pub task: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a pipeline once
    Build {
        /// Pipeline to run
        #[arg(short, long)]
        pipeline: Option<String>,
    },

    /// Build, then watch sources and serve the output with live reload
    Develop {
        /// Pipeline to run before watching
        #[arg(long)]
        pipeline: Option<String>,

        /// Dev server port
        #[arg(short, long)]
        port: Option<u16>,

        /// Watch only, without the dev server
        #[arg(long)]
        no_server: bool,
    },

    /// Run tasks and everything they must run after
    Run {
        /// Tasks to run
        #[arg(required = true)]
        tasks: Vec<String>,

        /// Show the stages without running
        #[arg(long)]
        dry_run: bool,
    },

    /// List available tasks
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: ListFormat,
    },

    /// Show the stages of a pipeline
    Graph {
        /// Pipeline to show (all tasks if not specified)
        pipeline: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: GraphFormat,
    },

    /// Initialize a new stagehand.toml
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Validate stagehand.toml configuration
    Check,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ModeArg {
    Development,
    Production,
}

impl From<ModeArg> for BuildMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Development => BuildMode::Development,
            ModeArg::Production => BuildMode::Production,
        }
    }
}

#[derive(ValueEnum, Clone, Debug, Default)]
pub enum ListFormat {
    #[default]
    Table,
    Json,
    Plain,
}

#[derive(ValueEnum, Clone, Debug, Default)]
pub enum GraphFormat {
    #[default]
    Text,
    Dot,
    Json,
}

impl Cli {
    /// Get the effective command: bare task names mean `run`, nothing means
    /// `develop`
    pub fn effective_command(&self) -> EffectiveCommand<'_> {
        if let Some(cmd) = &self.command {
            EffectiveCommand::Subcommand(cmd)
        } else if !self.task.is_empty() {
            EffectiveCommand::RunTasks(&self.task)
        } else {
            EffectiveCommand::Develop
        }
    }
}

pub enum EffectiveCommand<'a> {
    Subcommand(&'a Commands),
    RunTasks(&'a [String]),
    Develop,
}
