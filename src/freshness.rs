//! Freshness checks for incremental rebuilds
//!
//! A destination is *fresh* when regenerating it from its source would be
//! redundant. The default policy compares modification times: the output
//! must exist and be at least as new as the input. Content is never hashed.

use std::path::Path;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// How to decide whether an output is up to date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FreshnessPolicy {
    /// Output exists and is not older than the source
    #[default]
    Mtime,
    /// Output exists
    Exists,
}

async fn modified(path: &Path) -> Result<Option<SystemTime>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta.modified()?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Returns true when `target` does not need regenerating from `source`
pub async fn is_fresh(policy: FreshnessPolicy, source: &Path, target: &Path) -> Result<bool> {
    let Some(target_time) = modified(target).await? else {
        return Ok(false);
    };

    let fresh = match policy {
        FreshnessPolicy::Exists => true,
        FreshnessPolicy::Mtime => match modified(source).await? {
            Some(source_time) => source_time <= target_time,
            None => false,
        },
    };

    debug!(
        source = %source.display(),
        target = %target.display(),
        fresh,
        "freshness check"
    );
    Ok(fresh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::time::Duration;

    fn set_mtime(path: &Path, time: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_target_is_stale() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("index.pug");
        fs::write(&source, "p hi").unwrap();

        let target = temp.path().join("index.html");
        assert!(!is_fresh(FreshnessPolicy::Mtime, &source, &target).await.unwrap());
        assert!(!is_fresh(FreshnessPolicy::Exists, &source, &target).await.unwrap());
    }

    #[tokio::test]
    async fn test_mtime_policy() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("index.pug");
        let target = temp.path().join("index.html");
        fs::write(&source, "p hi").unwrap();
        fs::write(&target, "<p>hi</p>").unwrap();

        let now = SystemTime::now();
        set_mtime(&source, now - Duration::from_secs(60));
        set_mtime(&target, now);
        assert!(is_fresh(FreshnessPolicy::Mtime, &source, &target).await.unwrap());

        set_mtime(&source, now + Duration::from_secs(60));
        assert!(!is_fresh(FreshnessPolicy::Mtime, &source, &target).await.unwrap());
        assert!(is_fresh(FreshnessPolicy::Exists, &source, &target).await.unwrap());
    }
}
