//! Copying static assets (files, fonts, images)

use std::path::PathBuf;

use futures::future::BoxFuture;
use tracing::debug;

use crate::config::CopyConfig;
use crate::error::Result;
use crate::freshness::{is_fresh, FreshnessPolicy};
use crate::paths;
use crate::task::{Operation, TaskContext, TaskOutput};

#[derive(Debug, Clone)]
pub struct CopyFiles {
    pub src: Vec<String>,
    pub dest: PathBuf,
    pub only_changed: bool,
    pub freshness: FreshnessPolicy,
}

impl From<&CopyConfig> for CopyFiles {
    fn from(config: &CopyConfig) -> Self {
        Self {
            src: config.src.clone(),
            dest: config.dest.clone(),
            only_changed: config.only_changed,
            freshness: config.freshness,
        }
    }
}

impl CopyFiles {
    async fn copy(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let dest_dir = ctx.resolve(&self.dest);
        let mut output = TaskOutput::default();

        for source in paths::expand(&ctx.root, &self.src)? {
            let target = paths::destination(&source, &dest_dir, None);

            if self.only_changed && is_fresh(self.freshness, &source.path, &target).await? {
                output.skipped += 1;
                continue;
            }

            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&source.path, &target).await?;
            debug!(from = %source.path.display(), to = %target.display(), "copied");
            output.written.push(target);
        }

        Ok(output)
    }
}

impl Operation for CopyFiles {
    fn run<'a>(&'a self, ctx: &'a TaskContext) -> BoxFuture<'a, Result<TaskOutput>> {
        Box::pin(self.copy(ctx))
    }

    fn describe(&self) -> String {
        format!("copy {} -> {}", self.src.join(", "), self.dest.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn test_copy_preserves_tree() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir_all(temp.path().join("src/img/icons")).unwrap();
        fs::write(temp.path().join("src/img/logo.png"), "png").unwrap();
        fs::write(temp.path().join("src/img/icons/star.png"), "png").unwrap();

        let ctx = TaskContext::new(temp.path());
        let copy = CopyFiles {
            src: vec!["src/img/**/*".to_string()],
            dest: PathBuf::from("dist/img"),
            only_changed: false,
            freshness: FreshnessPolicy::Mtime,
        };

        let output = copy.run(&ctx).await.unwrap();
        assert_eq!(output.written.len(), 2);
        assert!(temp.path().join("dist/img/logo.png").is_file());
        assert!(temp.path().join("dist/img/icons/star.png").is_file());
    }

    #[tokio::test]
    async fn test_copy_only_changed_skips_existing() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir_all(temp.path().join("src/fonts")).unwrap();
        fs::write(temp.path().join("src/fonts/a.woff2"), "font").unwrap();

        let ctx = TaskContext::new(temp.path());
        let copy = CopyFiles {
            src: vec!["src/fonts/*.{woff,woff2}".to_string()],
            dest: PathBuf::from("dist/fonts"),
            only_changed: true,
            freshness: FreshnessPolicy::Exists,
        };

        assert_eq!(copy.run(&ctx).await.unwrap().written.len(), 1);
        let second = copy.run(&ctx).await.unwrap();
        assert!(second.written.is_empty());
        assert_eq!(second.skipped, 1);
    }
}
