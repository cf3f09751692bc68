//! The sync engine — ordered phases over the config tree
//!
//! Phase order: git sync (optional) → detect → packages → files → scripts →
//! state commit. Failure semantics differ per phase: detection failures and
//! script failures are fatal; package and file failures mark the sync
//! partial and continue. State is only committed after a fully non-fatal
//! run, so a re-run reattempts from the same baseline.

use crate::handlers::{
    install_missing, run_custom_entries, HandlerRegistry, InstallSummary, PackageHandler,
};
use crate::{
    apply_files_tree, detect_system, discover_scripts, parse_custom_lines, parse_package_lines,
    run_scripts, sync_repo, CommandRunner, Result, SyncState,
};
use haus_config::{ConfigRepo, PackageManagerKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Where the engine reads and writes
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Root of the template config tree (`packages/`, `scripts/`, `files/`)
    pub config_root: PathBuf,
    /// Durable state directory
    pub state_dir: PathBuf,
    /// Container user substituted into managed-file paths
    pub user: String,
    /// Release-info file consulted for OS detection
    pub os_release: PathBuf,
    /// Default timeout for custom package entries
    pub custom_timeout: Duration,
    /// Git-sync source, when enabled
    pub repo: Option<ConfigRepo>,
}

impl SyncOptions {
    pub fn new(config_root: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_root: config_root.into(),
            state_dir: state_dir.into(),
            user: "root".to_string(),
            os_release: PathBuf::from("/etc/os-release"),
            custom_timeout: Duration::from_secs(300),
            repo: None,
        }
    }
}

/// What a sync run did
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub packages: InstallSummary,
    pub files_applied: usize,
    pub files_failed: usize,
    pub scripts_completed: Vec<String>,
    /// True when a non-fatal phase recorded failures
    pub partial: bool,
}

/// The in-container configuration manager
pub struct SyncEngine {
    runner: Arc<dyn CommandRunner>,
    opts: SyncOptions,
}

impl SyncEngine {
    pub fn new(runner: Arc<dyn CommandRunner>, opts: SyncOptions) -> Self {
        Self { runner, opts }
    }

    /// Run one full sync. Fatal errors propagate; the report carries the
    /// partial-failure counters otherwise.
    pub async fn run(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut state = SyncState::load(&self.opts.state_dir)?;

        // Optional git sync. When the tree already exists locally a fetch
        // failure degrades to applying the tree as-is.
        if let Some(ref repo) = self.opts.repo {
            match sync_repo(self.runner.as_ref(), repo, &self.opts.config_root).await {
                Ok(commit) => {
                    tracing::info!(target: "sync", "config tree at commit {}", commit);
                    state.commit_hash_applied = Some(commit);
                }
                Err(e) if self.opts.config_root.is_dir() => {
                    tracing::warn!("git sync failed, applying existing tree: {}", e);
                    report.partial = true;
                }
                Err(e) => return Err(e),
            }
        }

        let info = detect_system(self.runner.as_ref(), &self.opts.os_release)?;
        tracing::info!(
            target: "sync",
            "detected {} with {} package manager",
            info.os_id,
            info.native_manager
        );

        report.packages = self.package_phase(info.native_manager).await;
        if report.packages.failed > 0 {
            report.partial = true;
        }
        tracing::info!(target: "sync", "package summary: {}", report.packages);

        let files_report = apply_files_tree(
            &self.opts.config_root.join("files"),
            &self.opts.user,
            &self.opts.state_dir,
            &mut state,
        );
        report.files_applied = files_report.applied;
        report.files_failed = files_report.failed;
        if files_report.failed > 0 {
            report.partial = true;
        }

        let scripts = discover_scripts(&self.opts.config_root.join("scripts"));
        run_scripts(
            self.runner.as_ref(),
            &scripts,
            &self.opts.state_dir.join("work"),
            &mut state,
        )
        .await?;
        report.scripts_completed = scripts.iter().map(|s| s.name.clone()).collect();

        state.last_run_at = Some(chrono::Utc::now());
        state.commit(&self.opts.state_dir)?;

        Ok(report)
    }

    /// Install packages across ecosystems. Never fatal: failures are counted
    /// and the sync continues.
    async fn package_phase(&self, native: PackageManagerKind) -> InstallSummary {
        let registry = HandlerRegistry::new(self.runner.clone());
        let packages_dir = self.opts.config_root.join("packages");
        let mut summary = InstallSummary::default();

        // Native ecosystem: index refresh once, before any install
        let native_files = package_files(&packages_dir, native.file_extension());
        if !native_files.is_empty() {
            if let Some(handler) = registry.for_kind(native) {
                summary.merge(self.native_batch(handler, &native_files).await);
            }
        }

        // Cross-ecosystem handlers: skipped entirely when unavailable
        for kind in [PackageManagerKind::Npm, PackageManagerKind::Pip] {
            let files = package_files(&packages_dir, kind.file_extension());
            if files.is_empty() {
                continue;
            }
            let handler = match registry.for_kind(kind) {
                Some(handler) => handler,
                None => continue,
            };
            if !handler.available().await {
                tracing::warn!("{} unavailable, skipping its package files", kind);
                continue;
            }
            for file in &files {
                summary.merge(self.install_from_file(handler, file).await);
            }
        }

        // Custom descriptors
        for file in package_files(&packages_dir, "custom") {
            let content = match std::fs::read_to_string(&file) {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!("Cannot read {}: {}", file.display(), e);
                    continue;
                }
            };
            let entries = parse_custom_lines(&content, self.opts.custom_timeout);
            summary.merge(run_custom_entries(self.runner.as_ref(), &entries).await);
        }

        summary
    }

    /// Native package flow: one index update, then per-file filter + install.
    /// A failed index update fails every native package in this sync.
    async fn native_batch(
        &self,
        handler: &dyn PackageHandler,
        files: &[PathBuf],
    ) -> InstallSummary {
        let mut summary = InstallSummary::default();

        if !handler.available().await {
            tracing::warn!("{} unavailable, skipping native packages", handler.kind());
            return summary;
        }

        let parsed: Vec<Vec<String>> = files
            .iter()
            .filter_map(|file| match std::fs::read_to_string(file) {
                Ok(content) => Some(parse_package_lines(&content)),
                Err(e) => {
                    tracing::warn!("Cannot read {}: {}", file.display(), e);
                    None
                }
            })
            .collect();

        if let Err(e) = handler.update_index().await {
            let total: usize = parsed.iter().map(Vec::len).sum();
            tracing::warn!(
                "{} index update failed, {} package(s) marked failed: {}",
                handler.kind(),
                total,
                e
            );
            summary.failed += total;
            return summary;
        }

        for names in &parsed {
            summary.merge(install_missing(handler, names).await);
        }
        summary
    }

    async fn install_from_file(
        &self,
        handler: &dyn PackageHandler,
        file: &Path,
    ) -> InstallSummary {
        match std::fs::read_to_string(file) {
            Ok(content) => {
                let names = parse_package_lines(&content);
                install_missing(handler, &names).await
            }
            Err(e) => {
                tracing::warn!("Cannot read {}: {}", file.display(), e);
                InstallSummary::default()
            }
        }
    }
}

/// Package files with the given extension, sorted for determinism
fn package_files(dir: &Path, extension: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.is_file() && p.extension().and_then(|e| e.to_str()) == Some(extension)
            })
            .collect(),
        Err(_) => Vec::new(),
    };
    files.sort();
    files
}
