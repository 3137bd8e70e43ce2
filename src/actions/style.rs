//! Stylesheet compilation
//!
//! The compiler is an external tool; `{style}` in its command picks the
//! human-readable or minified output depending on the build mode.

use std::path::PathBuf;

use futures::future::BoxFuture;
use tracing::debug;

use super::command::{self, Placeholders};
use crate::config::StyleConfig;
use crate::error::Result;
use crate::paths;
use crate::task::{Operation, TaskContext, TaskOutput};

#[derive(Debug, Clone)]
pub struct Style {
    pub src: Vec<String>,
    pub dest: PathBuf,
    pub command: String,
    pub extension: String,
    pub concat: Option<String>,
    pub post: Vec<String>,
}

impl From<&StyleConfig> for Style {
    fn from(config: &StyleConfig) -> Self {
        Self {
            src: config.src.clone(),
            dest: config.dest.clone(),
            command: config.command.clone(),
            extension: config.extension.clone(),
            concat: config.concat.clone(),
            post: config.post.clone(),
        }
    }
}

impl Style {
    async fn compile(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let dest_dir = ctx.resolve(&self.dest);
        tokio::fs::create_dir_all(&dest_dir).await?;

        let sources: Vec<_> = paths::expand(&ctx.root, &self.src)?
            .into_iter()
            .filter(|s| !paths::is_partial(&s.path))
            .collect();

        let mut produced = Vec::new();

        match &self.concat {
            Some(name) => {
                let target = dest_dir.join(name);
                let mut joined = Vec::new();
                for source in &sources {
                    let vars = Placeholders {
                        input: Some(&source.path),
                        ..Default::default()
                    };
                    let css = command::run(ctx, &self.command, &vars).await?;
                    if !joined.is_empty() && !joined.ends_with(b"\n") {
                        joined.push(b'\n');
                    }
                    joined.extend_from_slice(&css);
                }
                tokio::fs::write(&target, joined).await?;
                debug!(inputs = sources.len(), output = %target.display(), "compiled and joined");
                produced.push(target);
            }
            None => {
                let tool_writes = command::writes_output(&self.command);
                for source in &sources {
                    let target = dest_dir.join(source.relative()).with_extension(&self.extension);
                    if let Some(parent) = target.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    let vars = Placeholders {
                        input: Some(&source.path),
                        output: Some(&target),
                        ..Default::default()
                    };
                    let css = command::run(ctx, &self.command, &vars).await?;
                    if !tool_writes {
                        tokio::fs::write(&target, css).await?;
                    }
                    debug!(input = %source.path.display(), output = %target.display(), "compiled");
                    produced.push(target);
                }
            }
        }

        for target in &produced {
            for post in &self.post {
                let vars = Placeholders {
                    input: Some(target),
                    output: Some(target),
                    ..Default::default()
                };
                let out = command::run(ctx, post, &vars).await?;
                if !command::writes_output(post) {
                    tokio::fs::write(target, out).await?;
                }
            }
        }

        Ok(TaskOutput {
            written: produced,
            skipped: 0,
        })
    }
}

impl Operation for Style {
    fn run<'a>(&'a self, ctx: &'a TaskContext) -> BoxFuture<'a, Result<TaskOutput>> {
        Box::pin(self.compile(ctx))
    }

    fn describe(&self) -> String {
        format!("style {} -> {}", self.src.join(", "), self.dest.display())
    }
}
