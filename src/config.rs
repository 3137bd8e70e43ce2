//! Configuration parsing for stagehand.toml
//!
//! Handles loading and validating the build configuration: task
//! definitions, pipelines, watch rules and the dev server.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::error::{Result, StagehandError};
use crate::freshness::FreshnessPolicy;
use crate::graph::Stage;
use crate::task::FailurePolicy;

/// Default config file names to search for
pub const CONFIG_FILES: &[&str] = &["stagehand.toml", "Stagehand.toml"];

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Environment variables passed to every external tool
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Global settings
    #[serde(default)]
    pub settings: Settings,

    /// Dev server used by `stagehand develop`
    #[serde(default)]
    pub server: ServerConfig,

    /// Task definitions
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskConfig>,

    /// Named stage lists, e.g. `build` and `default`
    #[serde(default)]
    pub pipelines: BTreeMap<String, Vec<StageSpec>>,

    /// Watch rules for develop mode
    #[serde(default)]
    pub watch: Vec<WatchConfig>,
}

/// Global settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Source root watched in develop mode
    #[serde(default = "default_source")]
    pub source: PathBuf,

    /// Output root
    #[serde(default = "default_output")]
    pub output: PathBuf,

    /// Environment variable selecting the build mode
    #[serde(default = "default_mode_env")]
    pub mode_env: String,

    /// Watch debounce delay in milliseconds
    #[serde(default = "default_debounce")]
    pub watch_debounce_ms: u64,

    /// Run tool commands through the shell
    #[serde(default)]
    pub shell: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            source: default_source(),
            output: default_output(),
            mode_env: default_mode_env(),
            watch_debounce_ms: default_debounce(),
            shell: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_source() -> PathBuf {
    PathBuf::from("src")
}

fn default_output() -> PathBuf {
    PathBuf::from("dist")
}

fn default_mode_env() -> String {
    "NODE_ENV".to_string()
}

fn default_debounce() -> u64 {
    200
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

/// Dev server settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory to serve (defaults to `settings.output`)
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Output globs that trigger a browser reload when they change
    #[serde(default)]
    pub files: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
            root: None,
            files: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn root_or<'a>(&'a self, settings: &'a Settings) -> &'a Path {
        self.root.as_deref().unwrap_or(&settings.output)
    }
}

/// Configuration for a single task
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskConfig {
    /// Human-readable description
    #[serde(default)]
    pub desc: Option<String>,

    /// Tasks that must complete before this one
    #[serde(default)]
    pub after: Vec<String>,

    /// Whether a failure stops a develop-mode pipeline
    #[serde(default)]
    pub on_error: FailurePolicy,

    #[serde(flatten)]
    pub action: ActionConfig,
}

/// What a task does, selected by `kind`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionConfig {
    Clean(CleanConfig),
    Copy(CopyConfig),
    Render(RenderConfig),
    Style(StyleConfig),
    Bundle(BundleConfig),
    Sprite(SpriteConfig),
    Exec(ExecConfig),
}

impl ActionConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            ActionConfig::Clean(_) => "clean",
            ActionConfig::Copy(_) => "copy",
            ActionConfig::Render(_) => "render",
            ActionConfig::Style(_) => "style",
            ActionConfig::Bundle(_) => "bundle",
            ActionConfig::Sprite(_) => "sprite",
            ActionConfig::Exec(_) => "exec",
        }
    }

    fn sources(&self) -> Option<&[String]> {
        match self {
            ActionConfig::Copy(c) => Some(&c.src),
            ActionConfig::Render(c) => Some(&c.src),
            ActionConfig::Style(c) => Some(&c.src),
            ActionConfig::Bundle(c) => Some(&c.src),
            ActionConfig::Sprite(c) => Some(&c.src),
            ActionConfig::Clean(_) | ActionConfig::Exec(_) => None,
        }
    }
}

/// Remove everything inside a directory
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CleanConfig {
    pub dir: PathBuf,
}

/// Copy matched files into a directory
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CopyConfig {
    pub src: Vec<String>,
    pub dest: PathBuf,
    #[serde(default)]
    pub only_changed: bool,
    #[serde(default)]
    pub freshness: FreshnessPolicy,
}

/// Render templates one file at a time with an external tool
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RenderConfig {
    pub src: Vec<String>,
    pub dest: PathBuf,
    #[serde(default = "default_render_extension")]
    pub extension: String,
    #[serde(default = "default_render_command")]
    pub command: String,
    /// Skip inputs whose output is fresh
    #[serde(default)]
    pub only_changed: bool,
    #[serde(default)]
    pub freshness: FreshnessPolicy,
    /// Render `_partial` files too
    #[serde(default)]
    pub include_partials: bool,
}

fn default_render_extension() -> String {
    "html".to_string()
}

fn default_render_command() -> String {
    "pug --pretty --out {output_dir} {input}".to_string()
}

/// Compile stylesheets with an external compiler
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StyleConfig {
    pub src: Vec<String>,
    pub dest: PathBuf,
    #[serde(default = "default_style_command")]
    pub command: String,
    #[serde(default = "default_style_extension")]
    pub extension: String,
    /// Join every compiled file into this one output file
    #[serde(default)]
    pub concat: Option<String>,
    /// Commands run on each produced file (`{output}`), e.g. postcss
    #[serde(default)]
    pub post: Vec<String>,
}

fn default_style_command() -> String {
    "sass --no-source-map --style={style} {input}".to_string()
}

fn default_style_extension() -> String {
    "css".to_string()
}

/// Concatenate scripts into one bundle
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BundleConfig {
    pub src: Vec<String>,
    /// Output file
    pub dest: PathBuf,
    /// Lint command run over `{inputs}` before bundling
    #[serde(default)]
    pub lint: Option<String>,
    /// Commands run on the bundle (`{output}`), e.g. babel or uglify
    #[serde(default)]
    pub transform: Vec<String>,
}

/// Build an SVG symbol sprite
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SpriteConfig {
    pub src: Vec<String>,
    /// Output file
    pub dest: PathBuf,
    /// Regex of attribute names removed from the icon shapes
    #[serde(default)]
    pub strip_attrs: Option<String>,
}

/// Run arbitrary commands
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ExecConfig {
    pub run: Vec<String>,
}

/// A stage as written in a pipeline: a name or a list run in parallel
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum StageSpec {
    Task(String),
    Parallel(Vec<String>),
}

impl From<&StageSpec> for Stage {
    fn from(spec: &StageSpec) -> Self {
        match spec {
            StageSpec::Task(name) => Stage::Task(name.clone()),
            StageSpec::Parallel(names) => Stage::Parallel(names.clone()),
        }
    }
}

impl StageSpec {
    fn names(&self) -> &[String] {
        match self {
            StageSpec::Task(name) => std::slice::from_ref(name),
            StageSpec::Parallel(names) => names,
        }
    }
}

/// Re-run `run` (in series) when a file matching `paths` changes
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    pub paths: Vec<String>,
    pub run: Vec<String>,
}

impl Config {
    /// Load configuration from the specified path or search for it
    pub fn load(path: Option<&Path>) -> Result<(Self, PathBuf)> {
        let config_path = match path {
            Some(p) => {
                if p.exists() {
                    p.to_path_buf()
                } else {
                    return Err(StagehandError::ConfigNotFound {
                        searched: vec![p.to_path_buf()],
                    });
                }
            }
            None => Self::find_config()?,
        };

        let content = std::fs::read_to_string(&config_path)?;
        let config = Self::parse(&content, &config_path)?;

        Ok((config, config_path))
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| StagehandError::ConfigParse {
            source: e,
            path: path.to_path_buf(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Search for config file starting from current directory
    fn find_config() -> Result<PathBuf> {
        let mut current = std::env::current_dir()?;
        let mut searched = Vec::new();

        loop {
            for name in CONFIG_FILES {
                let candidate = current.join(name);
                searched.push(candidate.clone());
                if candidate.exists() {
                    return Ok(candidate);
                }
            }

            if !current.pop() {
                break;
            }
        }

        Err(StagehandError::ConfigNotFound { searched })
    }

    fn unknown(&self, referrer: &str, name: &str) -> StagehandError {
        StagehandError::InvalidTask {
            task: referrer.to_string(),
            reason: format!(
                "refers to unknown task '{}' (known: {})",
                name,
                self.task_names().join(", ")
            ),
        }
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        for (name, task) in &self.tasks {
            if task.after.contains(name) {
                return Err(StagehandError::InvalidTask {
                    task: name.clone(),
                    reason: "Task cannot run after itself".to_string(),
                });
            }

            if let Some(dep) = task.after.iter().find(|d| !self.tasks.contains_key(*d)) {
                return Err(self.unknown(name, dep));
            }

            if let Some(src) = task.action.sources() {
                if src.is_empty() {
                    return Err(StagehandError::InvalidTask {
                        task: name.clone(),
                        reason: format!("'{}' task needs at least one 'src' pattern", task.action.kind()),
                    });
                }
            }

            match &task.action {
                ActionConfig::Style(style) if style.concat.is_some() && style.command.contains("{output}") => {
                    return Err(StagehandError::InvalidTask {
                        task: name.clone(),
                        reason: "with 'concat' the style command must print to stdout, not use {output}"
                            .to_string(),
                    });
                }
                ActionConfig::Exec(exec) if exec.run.is_empty() => {
                    return Err(StagehandError::InvalidTask {
                        task: name.clone(),
                        reason: "'exec' task needs at least one 'run' command".to_string(),
                    });
                }
                _ => {}
            }
        }

        for (pipeline, stages) in &self.pipelines {
            for stage in stages {
                if let Some(name) = stage.names().iter().find(|n| !self.tasks.contains_key(*n)) {
                    return Err(self.unknown(&format!("pipeline {}", pipeline), name));
                }
            }
        }

        for (i, rule) in self.watch.iter().enumerate() {
            let label = format!("watch rule #{}", i + 1);
            if rule.paths.is_empty() || rule.run.is_empty() {
                return Err(StagehandError::InvalidTask {
                    task: label,
                    reason: "watch rules need 'paths' and 'run'".to_string(),
                });
            }
            if let Some(name) = rule.run.iter().find(|n| !self.tasks.contains_key(*n)) {
                return Err(self.unknown(&label, name));
            }
        }

        Ok(())
    }

    /// List all task names
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.keys().map(|s| s.as_str()).collect()
    }

    /// A named pipeline as a stage list
    pub fn pipeline(&self, name: &str) -> Option<Vec<Stage>> {
        self.pipelines
            .get(name)
            .map(|stages| stages.iter().map(Stage::from).collect())
    }
}

/// Starter configuration written by `stagehand init`
pub const STARTER_CONFIG: &str = r#"# stagehand.toml - static site build configuration

[settings]
source = "src"
output = "dist"
# NODE_ENV=development selects expanded CSS, anything else compressed
mode_env = "NODE_ENV"
watch_debounce_ms = 200

[server]
port = 3000
files = ["dist/*.html", "dist/css/*.css", "dist/js/*.js", "dist/img/**/*"]

[tasks."clean:dist"]
desc = "Empty the output directory"
kind = "clean"
dir = "dist"

[tasks."copy:files"]
kind = "copy"
src = ["src/files/**/*.*"]
dest = "dist/files"
after = ["clean:dist"]

[tasks."copy:fonts"]
kind = "copy"
src = ["src/fonts/*.{ttf,eot,woff,woff2}"]
dest = "dist/fonts"
after = ["clean:dist"]

[tasks."image:copy"]
kind = "copy"
src = ["src/img/**/*"]
dest = "dist/img"
after = ["clean:dist"]

[tasks.pug]
desc = "Render every page"
kind = "render"
src = ["src/pug/*.pug"]
dest = "dist"
after = ["clean:dist"]

[tasks."pug:changed"]
desc = "Render pages whose template changed"
kind = "render"
src = ["src/pug/*.pug"]
dest = "dist"
only_changed = true

[tasks."sass:app"]
kind = "style"
src = ["src/sass/app.{sass,scss}"]
dest = "dist/css"
after = ["clean:dist"]
post = ["postcss {output} --replace --use autoprefixer"]

[tasks."sass:libs"]
kind = "style"
src = ["src/sass/libs.{sass,scss}", "src/sass/libs/**/*.{sass,scss,css}"]
dest = "dist/css"
concat = "libs.css"
after = ["clean:dist"]

[tasks."js:vendor"]
kind = "bundle"
src = ["src/js/libs/**/*.js"]
dest = "dist/js/libs.js"
transform = ["uglifyjs {output} -o {output}"]
after = ["clean:dist"]

[tasks."js:app"]
kind = "bundle"
src = ["src/js/app.js", "src/js/modules/*.js"]
dest = "dist/js/app.js"
lint = "eslint {inputs}"
transform = ["babel {output} -o {output}"]
on_error = "halt"
after = ["clean:dist"]

[tasks.svg]
kind = "sprite"
src = ["src/svg/sprite/*.svg"]
dest = "dist/img/sprite.svg"
strip_attrs = "fill|stroke|opacity|style|width|height|data.*"
after = ["clean:dist"]

[pipelines]
build = [
  "clean:dist",
  ["copy:files", "copy:fonts", "pug", "sass:app", "sass:libs", "js:vendor", "js:app", "svg", "image:copy"],
]

[[watch]]
paths = ["src/files/**/*.*"]
run = ["copy:files"]

[[watch]]
paths = ["src/fonts/**/*.*"]
run = ["copy:fonts"]

[[watch]]
paths = ["src/pug/**/_*.pug"]
run = ["pug"]

[[watch]]
paths = ["src/pug/**/[!_]*.pug"]
run = ["pug:changed"]

[[watch]]
paths = ["src/sass/**/*.{sass,scss}"]
run = ["sass:app"]

[[watch]]
paths = ["src/sass/libs/*.{sass,scss}"]
run = ["sass:libs"]

[[watch]]
paths = ["src/js/app.js", "src/js/modules/*.js"]
run = ["js:app"]

[[watch]]
paths = ["src/svg/sprite/*.svg"]
run = ["svg"]

[[watch]]
paths = ["src/img/**/*.*"]
run = ["image:copy"]
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Result<Config> {
        Config::parse(toml, Path::new("stagehand.toml"))
    }

    #[test]
    fn test_parse_task_kinds() {
        let config = parse(
            r#"
            [env]
            BROWSERSLIST = "last 5 versions"

            [tasks."clean:dist"]
            kind = "clean"
            dir = "dist"

            [tasks."sass:app"]
            kind = "style"
            src = ["src/sass/app.scss"]
            dest = "dist/css"
            after = ["clean:dist"]

            [tasks."js:app"]
            kind = "bundle"
            src = ["src/js/app.js"]
            dest = "dist/js/app.js"
            on_error = "halt"
            "#,
        )
        .unwrap();

        assert_eq!(config.env.get("BROWSERSLIST").map(String::as_str), Some("last 5 versions"));
        assert_eq!(config.tasks.len(), 3);
        assert!(matches!(config.tasks["clean:dist"].action, ActionConfig::Clean(_)));

        let sass = &config.tasks["sass:app"];
        assert_eq!(sass.after, vec!["clean:dist"]);
        assert_eq!(sass.on_error, FailurePolicy::Report);
        match &sass.action {
            ActionConfig::Style(style) => {
                assert_eq!(style.command, default_style_command());
                assert!(style.concat.is_none());
            }
            other => panic!("unexpected action {:?}", other),
        }

        assert_eq!(config.tasks["js:app"].on_error, FailurePolicy::Halt);
        assert_eq!(config.settings.output, PathBuf::from("dist"));
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_parse_pipeline_stages() {
        let config = parse(
            r#"
            [tasks.a]
            kind = "exec"
            run = ["true"]

            [tasks.b]
            kind = "exec"
            run = ["true"]

            [tasks.c]
            kind = "exec"
            run = ["true"]

            [pipelines]
            build = ["a", ["b", "c"]]
            "#,
        )
        .unwrap();

        assert_eq!(
            config.pipeline("build").unwrap(),
            vec![
                Stage::Task("a".to_string()),
                Stage::Parallel(vec!["b".to_string(), "c".to_string()]),
            ]
        );
        assert!(config.pipeline("default").is_none());
    }

    #[test]
    fn test_unknown_references_rejected() {
        let err = parse(
            r#"
            [tasks.a]
            kind = "exec"
            run = ["true"]

            [[watch]]
            paths = ["src/**/*.scss"]
            run = ["missing"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, StagehandError::InvalidTask { .. }));

        let err = parse(
            r#"
            [tasks.a]
            kind = "exec"
            run = ["true"]
            after = ["a"]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("after itself"));
    }

    #[test]
    fn test_unknown_kind_is_parse_error() {
        let err = parse(
            r#"
            [tasks.a]
            kind = "teleport"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, StagehandError::ConfigParse { .. }));
    }

    #[test]
    fn test_starter_config_is_valid() {
        let config = parse(STARTER_CONFIG).unwrap();
        let build = config.pipeline("build").unwrap();
        assert_eq!(build.len(), 2);
        assert_eq!(build[1].tasks().len(), 9);
        assert_eq!(config.watch.len(), 9);
        assert!(matches!(
            &config.tasks["pug:changed"].action,
            ActionConfig::Render(r) if r.only_changed
        ));
    }
}
