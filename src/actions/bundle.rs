//! Script bundling by concatenation
//!
//! Inputs are joined in pattern order. An optional lint step runs first and
//! fails the task on any finding, so broken scripts never reach the bundle.

use std::path::PathBuf;

use futures::future::BoxFuture;
use tracing::debug;

use super::command::{self, Placeholders};
use crate::config::BundleConfig;
use crate::error::Result;
use crate::paths;
use crate::task::{Operation, TaskContext, TaskOutput};

#[derive(Debug, Clone)]
pub struct Bundle {
    pub src: Vec<String>,
    pub dest: PathBuf,
    pub lint: Option<String>,
    pub transform: Vec<String>,
}

impl From<&BundleConfig> for Bundle {
    fn from(config: &BundleConfig) -> Self {
        Self {
            src: config.src.clone(),
            dest: config.dest.clone(),
            lint: config.lint.clone(),
            transform: config.transform.clone(),
        }
    }
}

impl Bundle {
    async fn bundle(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let inputs: Vec<PathBuf> = paths::expand(&ctx.root, &self.src)?
            .into_iter()
            .map(|s| s.path)
            .collect();

        if let Some(lint) = &self.lint {
            let vars = Placeholders {
                inputs: &inputs,
                ..Default::default()
            };
            command::run(ctx, lint, &vars).await?;
        }

        let mut joined = Vec::new();
        for input in &inputs {
            let content = tokio::fs::read(input).await?;
            if !joined.is_empty() && !joined.ends_with(b"\n") {
                joined.push(b'\n');
            }
            joined.extend_from_slice(&content);
        }

        let target = ctx.resolve(&self.dest);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, joined).await?;

        for step in &self.transform {
            let vars = Placeholders {
                input: Some(&target),
                output: Some(&target),
                inputs: &inputs,
            };
            let out = command::run(ctx, step, &vars).await?;
            if !command::writes_output(step) {
                tokio::fs::write(&target, out).await?;
            }
        }

        debug!(inputs = inputs.len(), bundle = %target.display(), "bundled");
        Ok(TaskOutput::wrote(target))
    }
}

impl Operation for Bundle {
    fn run<'a>(&'a self, ctx: &'a TaskContext) -> BoxFuture<'a, Result<TaskOutput>> {
        Box::pin(self.bundle(ctx))
    }

    fn describe(&self) -> String {
        format!("bundle {} -> {}", self.src.join(", "), self.dest.display())
    }
}
