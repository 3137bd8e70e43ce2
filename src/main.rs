//! Stagehand - build and serve static frontend sites
//!
//! - `stagehand build` runs the build pipeline once
//! - `stagehand develop` (the default) builds, watches and serves
//! - `stagehand run <task>...` runs tasks with their prerequisites

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use console::style;

mod cli;

use cli::{Cli, Commands, EffectiveCommand, GraphFormat, ListFormat};
use stagehand::config::STARTER_CONFIG;
use stagehand::report::{print_summary, ConsoleObserver};
use stagehand::{
    BuildMode, Config, DevelopOptions, Orchestrator, Result, RunMode, ServerOptions, Stage,
    StagehandError, TaskContext,
};

#[tokio::main]
async fn main() -> ExitCode {
    // Set up panic handler for nice error messages
    miette::set_panic_hook();

    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    if cli.no_color {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {:?}", style("error").red().bold(), miette::Report::new(e));
            ExitCode::FAILURE
        }
    }
}

/// A loaded project: configuration plus the orchestrator built from it
struct Session {
    config: Config,
    config_path: PathBuf,
    root: PathBuf,
    orchestrator: Arc<Orchestrator>,
}

impl Session {
    fn load(cli: &Cli) -> Result<Self> {
        let (config, config_path) = Config::load(cli.config.as_deref())?;
        let config_path = config_path.canonicalize()?;
        let root = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or(std::env::current_dir()?);

        let mode = cli
            .mode
            .map(BuildMode::from)
            .unwrap_or_else(|| BuildMode::from_env(&config.settings.mode_env));
        tracing::debug!(?mode, root = %root.display(), "loaded {}", config_path.display());

        let context = TaskContext {
            root: root.clone(),
            mode,
            env: config.env.clone(),
            shell: config.settings.shell,
        };
        let orchestrator = Orchestrator::from_config(&config, context)?
            .with_observer(Arc::new(ConsoleObserver::new(cli.quiet)));

        Ok(Self {
            config,
            config_path,
            root,
            orchestrator: Arc::new(orchestrator),
        })
    }

    /// The requested pipeline, else the first fallback that exists, else
    /// every task layered by its constraints
    fn stages(&self, requested: Option<&str>, fallbacks: &[&str]) -> Result<Vec<Stage>> {
        if let Some(name) = requested {
            return self
                .config
                .pipeline(name)
                .ok_or_else(|| StagehandError::PipelineNotFound {
                    name: name.to_string(),
                    available: self.config.pipelines.keys().cloned().collect(),
                });
        }

        if let Some(stages) = fallbacks.iter().find_map(|name| self.config.pipeline(name)) {
            return Ok(stages);
        }

        self.orchestrator.graph()?.all_stages()
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Change working directory if specified
    if let Some(cwd) = &cli.cwd {
        std::env::set_current_dir(cwd)?;
    }

    match cli.effective_command() {
        EffectiveCommand::Subcommand(cmd) => run_command(cmd, &cli).await,
        EffectiveCommand::RunTasks(tasks) => run_tasks(tasks, false, &cli).await,
        EffectiveCommand::Develop => develop(None, None, false, &cli).await,
    }
}

async fn run_command(cmd: &Commands, cli: &Cli) -> Result<()> {
    match cmd {
        Commands::Build { pipeline } => {
            let session = Session::load(cli)?;
            let stages = session.stages(pipeline.as_deref(), &["build"])?;
            let report = session.orchestrator.run_sequence(&stages).await?;
            if !cli.quiet {
                print_summary(&report);
            }
            Ok(())
        }

        Commands::Develop {
            pipeline,
            port,
            no_server,
        } => develop(pipeline.as_deref(), *port, *no_server, cli).await,

        Commands::Run { tasks, dry_run } => run_tasks(tasks, *dry_run, cli).await,

        Commands::List { format } => {
            let session = Session::load(cli)?;
            print_task_list(&session, format.clone());
            Ok(())
        }

        Commands::Graph { pipeline, format } => {
            let session = Session::load(cli)?;
            let stages = session.stages(pipeline.as_deref(), &[])?;
            print_graph(&session, &stages, format.clone())
        }

        Commands::Init { force } => init_config(*force),

        Commands::Check => {
            let session = Session::load(cli)?;
            let graph = session.orchestrator.graph()?;

            println!(
                "{} {} is valid ({} tasks, {} pipelines, {} watch rules)",
                style("✓").green(),
                session.config_path.display(),
                graph.task_names().count(),
                session.config.pipelines.len(),
                session.orchestrator.watch_rules().len()
            );
            Ok(())
        }
    }
}

async fn run_tasks(tasks: &[String], dry_run: bool, cli: &Cli) -> Result<()> {
    let session = Session::load(cli)?;
    let targets: Vec<&str> = tasks.iter().map(String::as_str).collect();
    let stages = session.orchestrator.plan(&targets)?;

    if dry_run {
        print_stages(&stages);
        return Ok(());
    }

    let report = session.orchestrator.run_sequence(&stages).await?;
    if !cli.quiet {
        print_summary(&report);
    }
    Ok(())
}

async fn develop(pipeline: Option<&str>, port: Option<u16>, no_server: bool, cli: &Cli) -> Result<()> {
    let session = Session::load(cli)?;
    let orchestrator = Arc::clone(&session.orchestrator);
    let settings = &session.config.settings;

    let stages = session.stages(pipeline, &["default", "build"])?;
    // A failing task never ends the session, even one that halts the pipeline
    match orchestrator.run_pipeline(&stages, RunMode::Develop).await {
        Ok(report) => {
            for failure in &report.reported {
                orchestrator.observer().pipeline_failed(failure);
            }
            if !cli.quiet {
                print_summary(&report);
            }
        }
        Err(e) if e.task().is_some() => orchestrator.observer().pipeline_failed(&e),
        Err(e) => return Err(e),
    }

    let debounce = Duration::from_millis(settings.watch_debounce_ms);
    let server_config = &session.config.server;
    let server = (server_config.enabled && !no_server).then(|| ServerOptions {
        host: server_config.host.clone(),
        port: port.unwrap_or(server_config.port),
        root: session.root.join(server_config.root_or(settings)),
        project_root: session.root.clone(),
        files: server_config.files.clone(),
        debounce,
    });

    let watch_root = session.root.join(&settings.source);
    let handle = orchestrator
        .run_develop(DevelopOptions {
            watch_root: Some(watch_root.clone()),
            debounce,
            server,
        })
        .await?;

    if let Some(addr) = handle.server_addr() {
        println!("{} Serving at {}", style("▶").green(), style(format!("http://{}", addr)).bold());
    }
    println!(
        "{} Watching {} ({} rules), Ctrl-C to stop",
        style("👀").cyan(),
        style(watch_root.display()).dim(),
        session.orchestrator.watch_rules().len()
    );

    handle.run_until_shutdown().await
}

fn print_stages(stages: &[Stage]) {
    println!("{}", style("Stages:").bold());
    println!();

    for (i, stage) in stages.iter().enumerate() {
        let parallel = if stage.is_parallel() {
            style(" (parallel)").dim().to_string()
        } else {
            String::new()
        };
        println!(
            "  {} {}{}",
            style(format!("{}.", i + 1)).dim(),
            style(stage.tasks().join(", ")).cyan().bold(),
            parallel
        );
    }
}

fn print_task_list(session: &Session, format: ListFormat) {
    let orchestrator = &session.orchestrator;

    match format {
        ListFormat::Table => {
            println!("{}", style("Available tasks:").bold());
            println!();

            let max_name_len = orchestrator.tasks().map(|t| t.name.len()).max().unwrap_or(0);

            for task in orchestrator.tasks() {
                let desc = task
                    .desc
                    .clone()
                    .unwrap_or_else(|| task.operation.describe());

                print!(
                    "  {}{}  {}",
                    style(&task.name).cyan().bold(),
                    " ".repeat(max_name_len - task.name.len()),
                    style(desc).dim()
                );

                if !task.constraints.after.is_empty() {
                    print!(
                        " {}",
                        style(format!("[after: {}]", task.constraints.after.join(", ")))
                            .yellow()
                            .dim()
                    );
                }

                println!();
            }
        }

        ListFormat::Json => {
            let mut tasks = serde_json::Map::new();
            for task in orchestrator.tasks() {
                let mut obj = serde_json::Map::new();
                if let Some(desc) = &task.desc {
                    obj.insert("description".to_string(), serde_json::json!(desc));
                }
                obj.insert("operation".to_string(), serde_json::json!(task.operation.describe()));
                obj.insert("after".to_string(), serde_json::json!(task.constraints.after));
                obj.insert("on_error".to_string(), serde_json::json!(task.constraints.on_error));
                tasks.insert(task.name.clone(), serde_json::Value::Object(obj));
            }
            println!("{:#}", serde_json::Value::Object(tasks));
        }

        ListFormat::Plain => {
            for name in orchestrator.task_names() {
                println!("{}", name);
            }
        }
    }
}

fn print_graph(session: &Session, stages: &[Stage], format: GraphFormat) -> Result<()> {
    match format {
        GraphFormat::Text => print_stages(stages),

        GraphFormat::Dot => {
            let graph = session.orchestrator.graph()?;

            println!("digraph stagehand {{");
            println!("  rankdir=LR;");
            println!("  node [shape=box];");

            for (i, stage) in stages.iter().enumerate() {
                println!("  subgraph cluster_{} {{", i);
                println!("    label=\"stage {}\";", i + 1);
                for name in stage.tasks() {
                    println!("    \"{}\";", name);
                }
                println!("  }}");
            }

            for stage in stages {
                for name in stage.tasks() {
                    for dep in graph.dependencies(name).unwrap_or_default() {
                        println!("  \"{}\" -> \"{}\";", dep, name);
                    }
                }
            }

            println!("}}");
        }

        GraphFormat::Json => {
            let output = serde_json::json!({ "stages": stages });
            println!("{:#}", output);
        }
    }

    Ok(())
}

fn init_config(force: bool) -> Result<()> {
    let path = Path::new("stagehand.toml");

    if path.exists() && !force {
        return Err(StagehandError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "stagehand.toml already exists (use --force to overwrite)",
        )));
    }

    std::fs::write(path, STARTER_CONFIG)?;

    println!(
        "{} Created {}",
        style("✓").green(),
        style("stagehand.toml").bold()
    );

    Ok(())
}
