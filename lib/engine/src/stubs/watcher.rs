// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Polling stub-file watcher.
//!
//! Each pass compares modification times under the watched roots with the previous pass.
//! Changed and new files are reloaded, vanished files are unloaded. Every file is handled in
//! its own task, so a panic while processing one file is logged and the others proceed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::loader::{collect_files, StubLoader};

/// What one pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub reloaded: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

impl ScanReport {
    pub fn is_empty(&self) -> bool {
        self.reloaded.is_empty() && self.removed.is_empty() && self.failed.is_empty()
    }
}

enum Change {
    Reload(PathBuf),
    Remove(PathBuf),
}

pub struct StubWatcher {
    loader: Arc<StubLoader>,
    roots: Vec<PathBuf>,
    seen: HashMap<PathBuf, SystemTime>,
}

impl std::fmt::Debug for StubWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubWatcher")
            .field("roots", &self.roots)
            .field("files", &self.seen.len())
            .finish()
    }
}

impl StubWatcher {
    /// Snapshots the current state of `roots`; only later changes trigger reloads.
    pub fn new(loader: Arc<StubLoader>, roots: Vec<PathBuf>) -> Self {
        let seen = snapshot(&roots);
        Self {
            loader,
            roots,
            seen,
        }
    }

    /// One polling pass.
    pub async fn scan(&mut self) -> ScanReport {
        let current = snapshot(&self.roots);
        let mut changes = Vec::new();
        for (path, modified) in &current {
            if self.seen.get(path) != Some(modified) {
                changes.push(Change::Reload(path.clone()));
            }
        }
        for path in self.seen.keys() {
            if !current.contains_key(path) {
                changes.push(Change::Remove(path.clone()));
            }
        }
        self.seen = current;

        let tasks: Vec<_> = changes
            .into_iter()
            .map(|change| {
                let loader = self.loader.clone();
                let path = match &change {
                    Change::Reload(path) | Change::Remove(path) => path.clone(),
                };
                let task = tokio::task::spawn_blocking(move || match change {
                    Change::Reload(path) => match loader.load_file(&path) {
                        Ok(_) => Ok(true),
                        Err(err) => {
                            tracing::error!(error = %err, "failed to reload stub file");
                            Err(())
                        }
                    },
                    Change::Remove(path) => {
                        loader.unload_file(&path);
                        Ok(false)
                    }
                });
                (path, task)
            })
            .collect();

        let mut report = ScanReport::default();
        for (path, task) in tasks {
            match task.await {
                Ok(Ok(true)) => report.reloaded.push(path),
                Ok(Ok(false)) => report.removed.push(path),
                Ok(Err(())) => report.failed.push(path),
                Err(err) => {
                    tracing::error!(path = %path.display(), error = %err, "stub file task panicked");
                    // retry on the next pass
                    self.seen.remove(&path);
                    report.failed.push(path);
                }
            }
        }
        report
    }

    /// Polls every `every` until `cancel` fires.
    pub async fn run(mut self, every: Duration, cancel: CancellationToken) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("stub watcher stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let report = self.scan().await;
                    if !report.is_empty() {
                        tracing::info!(
                            reloaded = report.reloaded.len(),
                            removed = report.removed.len(),
                            failed = report.failed.len(),
                            "stub files changed"
                        );
                    }
                }
            }
        }
    }
}

fn snapshot(roots: &[PathBuf]) -> HashMap<PathBuf, SystemTime> {
    collect_files(roots)
        .into_iter()
        .filter_map(|path| {
            let modified = std::fs::metadata(&path).and_then(|meta| meta.modified()).ok()?;
            Some((path, modified))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stubs::StubStore;
    use std::fs;

    fn stub_json(name: &str) -> String {
        format!(
            r#"{{"service": "helloworld.Greeter", "method": "SayHello",
                "input": {{"equals": {{"name": "{name}"}}}},
                "output": {{"data": {{"message": "Hi {name}"}}}}}}"#
        )
    }

    fn bump_mtime(path: &std::path::Path) {
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(5)).unwrap();
    }

    #[tokio::test]
    async fn test_scan_tracks_changes() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.json");
        fs::write(&first, stub_json("Alex")).unwrap();

        let store = Arc::new(StubStore::new());
        let loader = Arc::new(StubLoader::new(store.clone()));
        loader.load_paths(&[dir.path().to_path_buf()]);
        let mut watcher = StubWatcher::new(loader.clone(), vec![dir.path().to_path_buf()]);
        assert!(watcher.scan().await.is_empty());

        // new file
        let second = dir.path().join("b.json");
        fs::write(&second, stub_json("Bob")).unwrap();
        let report = watcher.scan().await;
        assert_eq!(report.reloaded, vec![second.clone()]);
        assert_eq!(store.len(), 2);

        // modified file replaces its stubs
        fs::write(&first, stub_json("Carol")).unwrap();
        bump_mtime(&first);
        let report = watcher.scan().await;
        assert_eq!(report.reloaded, vec![first.clone()]);
        assert_eq!(store.len(), 2);
        let names: Vec<String> = store
            .list(None)
            .iter()
            .map(|stub| stub.input.equals.as_ref().unwrap()["name"].as_str().unwrap().to_string())
            .collect();
        assert!(names.contains(&"Carol".to_string()));
        assert!(!names.contains(&"Alex".to_string()));

        // removed file drops its stubs
        fs::remove_file(&second).unwrap();
        let report = watcher.scan().await;
        assert_eq!(report.removed, vec![second]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_broken_file_keeps_previous_stubs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.json");
        fs::write(&path, stub_json("Alex")).unwrap();

        let store = Arc::new(StubStore::new());
        let loader = Arc::new(StubLoader::new(store.clone()));
        loader.load_paths(&[dir.path().to_path_buf()]);
        let mut watcher = StubWatcher::new(loader, vec![dir.path().to_path_buf()]);

        fs::write(&path, "{ broken").unwrap();
        bump_mtime(&path);
        let report = watcher.scan().await;
        assert_eq!(report.failed, vec![path]);
        assert_eq!(store.len(), 1);
    }
}
