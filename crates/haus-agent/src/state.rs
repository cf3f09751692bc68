//! Durable sync state
//!
//! Records the last successful template application. Committed atomically
//! (write-temp-then-rename) at the end of a successful sync; a hard failure
//! leaves the previous state in place so a re-run reattempts from the same
//! baseline.

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// When the last successful sync finished
    pub last_run_at: Option<DateTime<Utc>>,
    /// Commit applied by git-sync mode, if enabled
    pub commit_hash_applied: Option<String>,
    /// sha256 of each managed file as applied, keyed by target path
    #[serde(default)]
    pub files_hashes: HashMap<String, String>,
    /// Exit codes of completed scripts, keyed by script file name
    #[serde(default)]
    pub scripts_completed: HashMap<String, i64>,
}

impl SyncState {
    fn state_file(state_dir: &Path) -> PathBuf {
        state_dir.join("sync.json")
    }

    /// Backup directory for `backup`-policy files
    pub fn backups_dir(state_dir: &Path) -> PathBuf {
        state_dir.join("backups")
    }

    /// Load state, or start fresh when no state exists yet
    pub fn load(state_dir: &Path) -> Result<Self> {
        let path = Self::state_file(state_dir);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Commit state atomically: write a temp file in the same directory,
    /// then rename over the previous state
    pub fn commit(&self, state_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(state_dir)?;
        let path = Self::state_file(state_dir);
        let tmp = state_dir.join(".sync.json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_is_default() {
        let tmp = tempfile::tempdir().unwrap();
        let state = SyncState::load(tmp.path()).unwrap();
        assert!(state.last_run_at.is_none());
        assert!(state.files_hashes.is_empty());
    }

    #[test]
    fn test_commit_and_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let mut state = SyncState::default();
        state.last_run_at = Some(Utc::now());
        state
            .scripts_completed
            .insert("10-base.sh".to_string(), 0);
        state.commit(tmp.path()).unwrap();

        let loaded = SyncState::load(tmp.path()).unwrap();
        assert!(loaded.last_run_at.is_some());
        assert_eq!(loaded.scripts_completed.get("10-base.sh"), Some(&0));
    }

    #[test]
    fn test_commit_replaces_previous_state() {
        let tmp = tempfile::tempdir().unwrap();
        let mut state = SyncState::default();
        state.commit_hash_applied = Some("abc".to_string());
        state.commit(tmp.path()).unwrap();

        state.commit_hash_applied = Some("def".to_string());
        state.commit(tmp.path()).unwrap();

        let loaded = SyncState::load(tmp.path()).unwrap();
        assert_eq!(loaded.commit_hash_applied.as_deref(), Some("def"));
        // No temp file left behind
        assert!(!tmp.path().join(".sync.json.tmp").exists());
    }

    #[test]
    fn test_load_corrupted_state_fails() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("sync.json"), "not json {{{").unwrap();
        assert!(SyncState::load(tmp.path()).is_err());
    }
}
