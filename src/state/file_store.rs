//! JSON file-backed state store

use super::SchedulerState;
use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Stores the scheduler snapshot as a JSON document, written atomically via
/// write-to-temp-then-rename so a crash never leaves a half-written file.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize and persist a snapshot.
    ///
    /// Callers treat persistence as best-effort: a returned error is logged
    /// by the scheduler, never propagated into the dispatch path.
    pub async fn save(&self, state: &SchedulerState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let payload = serde_json::to_vec_pretty(state)?;
        let tmp = self.tmp_path();

        tokio::fs::write(&tmp, &payload).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), "scheduler state saved");
        Ok(())
    }

    /// Load the last saved snapshot.
    ///
    /// A missing, unreadable or corrupt file yields a zero-valued state:
    /// stale persistence must never prevent startup.
    pub async fn load(&self) -> SchedulerState {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no prior state file, starting fresh");
                return SchedulerState::default();
            }
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "failed to read state file, starting fresh"
                );
                return SchedulerState::default();
            }
        };

        match serde_json::from_slice::<SchedulerState>(&bytes) {
            Ok(state) => {
                info!(
                    path = %self.path.display(),
                    total_executions = state.total_executions,
                    total_failures = state.total_failures,
                    "scheduler state loaded"
                );
                state
            }
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "state file is corrupt, treating as no prior state"
                );
                SchedulerState::default()
            }
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
