//! Emptying the output root

use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use tracing::debug;
use walkdir::WalkDir;

use crate::config::CleanConfig;
use crate::error::Result;
use crate::task::{Operation, TaskContext, TaskOutput};

/// Removes everything inside `dir` but keeps the directory itself
#[derive(Debug, Clone)]
pub struct Clean {
    pub dir: PathBuf,
}

impl From<&CleanConfig> for Clean {
    fn from(config: &CleanConfig) -> Self {
        Self {
            dir: config.dir.clone(),
        }
    }
}

impl Clean {
    async fn clean(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let dir = ctx.resolve(&self.dir);
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "nothing to clean");
            return Ok(TaskOutput::default());
        }

        let walk_root = dir.clone();
        let removed = tokio::task::spawn_blocking(move || files_under(&walk_root))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await?;
            } else {
                tokio::fs::remove_file(&path).await?;
            }
        }

        debug!(dir = %dir.display(), files = removed.len(), "cleaned");
        Ok(TaskOutput {
            written: removed,
            skipped: 0,
        })
    }
}

fn files_under(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

impl Operation for Clean {
    fn run<'a>(&'a self, ctx: &'a TaskContext) -> BoxFuture<'a, Result<TaskOutput>> {
        Box::pin(self.clean(ctx))
    }

    fn describe(&self) -> String {
        format!("clean {}", self.dir.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn test_clean_keeps_root() {
        let temp = tempfile::tempdir().unwrap();
        let dist = temp.path().join("dist");
        fs::create_dir_all(dist.join("css")).unwrap();
        fs::write(dist.join("index.html"), "x").unwrap();
        fs::write(dist.join("css/app.css"), "x").unwrap();

        let ctx = TaskContext::new(temp.path());
        let clean = Clean {
            dir: PathBuf::from("dist"),
        };
        let output = clean.run(&ctx).await.unwrap();

        assert_eq!(output.written.len(), 2);
        assert!(dist.is_dir());
        assert_eq!(fs::read_dir(&dist).unwrap().count(), 0);
    }

    #[test]
    fn test_files_under_skips_directories() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir_all(temp.path().join("img/icons/empty")).unwrap();
        fs::write(temp.path().join("img/icons/close.svg"), "x").unwrap();

        assert_eq!(
            files_under(temp.path()),
            vec![temp.path().join("img/icons/close.svg")]
        );
    }

    #[tokio::test]
    async fn test_clean_missing_dir_is_ok() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = TaskContext::new(temp.path());
        let clean = Clean {
            dir: PathBuf::from("dist"),
        };
        assert_eq!(clean.run(&ctx).await.unwrap(), TaskOutput::default());
    }
}
