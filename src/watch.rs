//! File watching and watch rules
//!
//! A [`WatchRule`] maps path patterns to a series of tasks. Every batch of
//! debounced file changes is matched against all rules; each rule that
//! matches at least one path produces exactly one [`Trigger`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use globset::GlobSet;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, Debouncer};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Result, StagehandError};
use crate::graph::Stage;
use crate::paths;

/// Patterns and the tasks they re-run, in series
#[derive(Debug, Clone)]
pub struct WatchRule {
    patterns: Vec<String>,
    matcher: GlobSet,
    tasks: Vec<String>,
}

impl WatchRule {
    pub fn new<P, T>(patterns: &[P], tasks: &[T]) -> Result<Self>
    where
        P: AsRef<str>,
        T: AsRef<str>,
    {
        let patterns: Vec<String> = patterns.iter().map(|p| p.as_ref().to_string()).collect();
        Ok(Self {
            matcher: paths::build_globset(&patterns)?,
            patterns,
            tasks: tasks.iter().map(|t| t.as_ref().to_string()).collect(),
        })
    }

    /// Does a root-relative, `/`-separated path match this rule?
    pub fn matches(&self, rel: &str) -> bool {
        self.matcher.is_match(rel)
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn tasks(&self) -> &[String] {
        &self.tasks
    }
}

/// A rule fired by a batch of changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    /// Index of the rule, in registration order
    pub rule: usize,
    pub tasks: Vec<String>,
    /// Changed paths that matched, relative to the root
    pub paths: Vec<String>,
}

impl Trigger {
    /// The rule's tasks as a series of single-task stages
    pub fn stages(&self) -> Vec<Stage> {
        self.tasks.iter().cloned().map(Stage::Task).collect()
    }
}

/// Match a batch of changed paths against the rules
pub fn triggers(rules: &[WatchRule], root: &Path, changed: &[PathBuf]) -> Vec<Trigger> {
    let canonical = root.canonicalize().ok();
    let relative: Vec<String> = changed
        .iter()
        .filter_map(|path| {
            paths::relative_str(root, path)
                .or_else(|| canonical.as_deref().and_then(|c| paths::relative_str(c, path)))
        })
        .collect();

    rules
        .iter()
        .enumerate()
        .filter_map(|(index, rule)| {
            let matched: Vec<String> = relative.iter().filter(|p| rule.matches(p)).cloned().collect();
            if matched.is_empty() {
                None
            } else {
                Some(Trigger {
                    rule: index,
                    tasks: rule.tasks.clone(),
                    paths: matched,
                })
            }
        })
        .collect()
}

/// A running debounced watcher; dropping it stops watching
pub struct FileWatcher {
    _debouncer: Debouncer<notify::RecommendedWatcher>,
}

/// Watch `root` recursively, calling `on_change` with each debounced batch
pub fn debounced<F>(root: &Path, debounce: Duration, mut on_change: F) -> Result<FileWatcher>
where
    F: FnMut(Vec<PathBuf>) + Send + 'static,
{
    let mut debouncer = new_debouncer(
        debounce,
        move |events: std::result::Result<Vec<DebouncedEvent>, notify::Error>| match events {
            Ok(events) => {
                let paths: Vec<PathBuf> = events.into_iter().map(|e| e.path).collect();
                if !paths.is_empty() {
                    on_change(paths);
                }
            }
            Err(e) => warn!("watch error: {}", e),
        },
    )
    .map_err(|e| StagehandError::Watch { source: e })?;

    debouncer
        .watcher()
        .watch(root, RecursiveMode::Recursive)
        .map_err(|e| StagehandError::Watch { source: e })?;

    debug!(root = %root.display(), "watching");
    Ok(FileWatcher {
        _debouncer: debouncer,
    })
}

/// Watch `root` and forward each batch of changed paths to a channel
pub fn spawn_watcher(
    root: &Path,
    debounce: Duration,
    tx: mpsc::Sender<Vec<PathBuf>>,
) -> Result<FileWatcher> {
    debounced(root, debounce, move |paths| {
        // Called on the notify thread, outside the runtime
        if tx.blocking_send(paths).is_err() {
            debug!("change receiver dropped");
        }
    })
}
