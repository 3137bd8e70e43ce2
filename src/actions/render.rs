//! Template rendering, optionally incremental
//!
//! Each template is rendered by the configured tool. When `only_changed` is
//! set, a template whose output is already fresh is skipped entirely; this is
//! the only cache-like behaviour in a build.

use std::path::PathBuf;

use futures::future::BoxFuture;
use tracing::debug;

use super::command::{self, Placeholders};
use crate::config::RenderConfig;
use crate::error::Result;
use crate::freshness::{is_fresh, FreshnessPolicy};
use crate::paths;
use crate::task::{Operation, TaskContext, TaskOutput};

#[derive(Debug, Clone)]
pub struct Render {
    pub src: Vec<String>,
    pub dest: PathBuf,
    pub extension: String,
    pub command: String,
    pub only_changed: bool,
    pub freshness: FreshnessPolicy,
    pub include_partials: bool,
}

impl From<&RenderConfig> for Render {
    fn from(config: &RenderConfig) -> Self {
        Self {
            src: config.src.clone(),
            dest: config.dest.clone(),
            extension: config.extension.clone(),
            command: config.command.clone(),
            only_changed: config.only_changed,
            freshness: config.freshness,
            include_partials: config.include_partials,
        }
    }
}

impl Render {
    async fn render(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let dest_dir = ctx.resolve(&self.dest);
        let tool_writes = command::writes_output(&self.command);
        let mut output = TaskOutput::default();

        let sources = paths::expand(&ctx.root, &self.src)?
            .into_iter()
            .filter(|s| self.include_partials || !paths::is_partial(&s.path));

        for source in sources {
            let target = paths::destination(&source, &dest_dir, Some(&self.extension));

            if self.only_changed && is_fresh(self.freshness, &source.path, &target).await? {
                debug!(template = %source.path.display(), "unchanged, skipping");
                output.skipped += 1;
                continue;
            }

            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let vars = Placeholders {
                input: Some(&source.path),
                output: Some(&target),
                ..Default::default()
            };
            let rendered = command::run(ctx, &self.command, &vars).await?;
            if !tool_writes {
                tokio::fs::write(&target, rendered).await?;
            }

            debug!(template = %source.path.display(), page = %target.display(), "rendered");
            output.written.push(target);
        }

        Ok(output)
    }
}

impl Operation for Render {
    fn run<'a>(&'a self, ctx: &'a TaskContext) -> BoxFuture<'a, Result<TaskOutput>> {
        Box::pin(self.render(ctx))
    }

    fn describe(&self) -> String {
        let mode = if self.only_changed { " (changed only)" } else { "" };
        format!("render {} -> {}{}", self.src.join(", "), self.dest.display(), mode)
    }
}
