//! Generic command tasks

use futures::future::BoxFuture;

use super::command::{self, Placeholders};
use crate::config::ExecConfig;
use crate::error::Result;
use crate::task::{Operation, TaskContext, TaskOutput};

/// Runs each command in order, stopping at the first failure
#[derive(Debug, Clone)]
pub struct Exec {
    pub run: Vec<String>,
}

impl From<&ExecConfig> for Exec {
    fn from(config: &ExecConfig) -> Self {
        Self {
            run: config.run.clone(),
        }
    }
}

impl Exec {
    async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        for cmd in &self.run {
            command::run(ctx, cmd, &Placeholders::default()).await?;
        }
        Ok(TaskOutput::default())
    }
}

impl Operation for Exec {
    fn run<'a>(&'a self, ctx: &'a TaskContext) -> BoxFuture<'a, Result<TaskOutput>> {
        Box::pin(self.execute(ctx))
    }

    fn describe(&self) -> String {
        self.run.join(" && ")
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exec_stops_at_first_failure() {
        let temp = tempfile::tempdir().unwrap();
        let marker = temp.path().join("ran");
        let exec = Exec {
            run: vec![
                "false".to_string(),
                format!("touch {}", marker.display()),
            ],
        };

        let ctx = TaskContext::new(temp.path());
        assert!(exec.run(&ctx).await.is_err());
        assert!(!marker.exists());
    }
}
