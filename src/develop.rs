//! Develop mode: watch, rebuild, serve
//!
//! Each batch of file changes is matched against the watch rules and every
//! resulting trigger runs its tasks as a develop-mode pipeline in the
//! background. Failed runs are handed to the observer and the session keeps
//! going; nothing short of shutdown ends it.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::{Result, StagehandError};
use crate::orchestrator::{Orchestrator, RunMode};
use crate::server::{self, ServerHandle, ServerOptions};
use crate::watch::{spawn_watcher, FileWatcher};

/// Counters for triggered runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub triggered: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl RunStats {
    pub fn finished(&self) -> usize {
        self.succeeded + self.failed
    }
}

#[derive(Debug, Clone, Default)]
pub struct DevelopOptions {
    /// Directory to watch; `None` means changes only arrive through
    /// [`DevelopHandle::inject`]
    pub watch_root: Option<PathBuf>,
    pub debounce: Duration,
    pub server: Option<ServerOptions>,
}

/// A running develop session
pub struct DevelopHandle {
    events: mpsc::Sender<Vec<PathBuf>>,
    stats: watch::Receiver<RunStats>,
    trigger_loop: JoinHandle<()>,
    server: Option<ServerHandle>,
    _watcher: Option<FileWatcher>,
}

impl Orchestrator {
    /// Start watching (and serving) in the background
    pub async fn run_develop(self: Arc<Self>, options: DevelopOptions) -> Result<DevelopHandle> {
        let (events, rx) = mpsc::channel(64);
        let (stats_tx, stats) = watch::channel(RunStats::default());

        let server = options.server.map(server::start).transpose()?;
        let watcher = options
            .watch_root
            .as_deref()
            .map(|root| spawn_watcher(root, options.debounce, events.clone()))
            .transpose()?;

        info!(rules = self.watch_rules().len(), "develop session started");
        let trigger_loop = tokio::spawn(trigger_loop(self, rx, Arc::new(stats_tx)));

        Ok(DevelopHandle {
            events,
            stats,
            trigger_loop,
            server,
            _watcher: watcher,
        })
    }
}

async fn trigger_loop(
    orchestrator: Arc<Orchestrator>,
    mut changes: mpsc::Receiver<Vec<PathBuf>>,
    stats: Arc<watch::Sender<RunStats>>,
) {
    while let Some(changed) = changes.recv().await {
        for trigger in orchestrator.triggers_for(&changed) {
            info!(tasks = ?trigger.tasks, paths = ?trigger.paths, "change detected");
            stats.send_modify(|s| s.triggered += 1);

            let orchestrator = Arc::clone(&orchestrator);
            let stats = Arc::clone(&stats);
            tokio::spawn(async move {
                let observer = Arc::clone(orchestrator.observer());
                let run = tokio::spawn(async move {
                    orchestrator
                        .run_pipeline(&trigger.stages(), RunMode::Develop)
                        .await
                });

                let clean = match run.await {
                    Ok(Ok(report)) => {
                        for failure in &report.reported {
                            observer.pipeline_failed(failure);
                        }
                        report.is_clean()
                    }
                    Ok(Err(e)) => {
                        observer.pipeline_failed(&e);
                        false
                    }
                    Err(e) => {
                        error!("triggered run panicked: {}", e);
                        false
                    }
                };

                stats.send_modify(|s| {
                    if clean {
                        s.succeeded += 1;
                    } else {
                        s.failed += 1;
                    }
                });
            });
        }
    }
}

impl DevelopHandle {
    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(|s| s.addr())
    }

    /// Feed a batch of changed paths as if the watcher had seen them
    pub async fn inject<I, P>(&self, paths: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.events
            .send(paths.into_iter().map(Into::into).collect())
            .await
            .map_err(|_| StagehandError::Watch {
                source: notify::Error::generic("develop session has stopped"),
            })
    }

    pub fn stats(&self) -> RunStats {
        *self.stats.borrow()
    }

    /// Wait until at least `n` triggered runs have finished
    pub async fn wait_for_runs(&mut self, n: usize) -> RunStats {
        let reached = self
            .stats
            .wait_for(|s| s.finished() >= n)
            .await
            .map(|s| *s)
            .ok();
        reached.unwrap_or_else(|| *self.stats.borrow())
    }

    /// True while the session can still react to changes
    pub fn is_alive(&self) -> bool {
        !self.trigger_loop.is_finished()
            && self.server.as_ref().map(|s| s.is_running()).unwrap_or(true)
    }

    pub async fn shutdown(self) {
        self.trigger_loop.abort();
        if let Some(server) = self.server {
            server.shutdown().await;
        }
        info!("develop session stopped");
    }

    /// Block until Ctrl-C (or SIGTERM on unix), then shut down
    pub async fn run_until_shutdown(self) -> Result<()> {
        shutdown_signal().await?;
        self.shutdown().await;
        Ok(())
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => tracing::debug!("received SIGTERM"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
