//! Package handlers — one per ecosystem, uniform capability set
//!
//! Each handler answers `available`, refreshes its index, checks installed
//! state, and batch-installs. Handlers never see unvalidated names; the sync
//! engine filters through the parser first.

mod apk;
mod apt;
mod custom;
mod dnf;
mod npm;
mod pip;

pub use apk::ApkHandler;
pub use apt::AptHandler;
pub use custom::run_custom_entries;
pub use dnf::DnfHandler;
pub use npm::NpmHandler;
pub use pip::PipHandler;

use crate::{CommandRunner, Result};
use async_trait::async_trait;
use haus_config::PackageManagerKind;
use std::sync::Arc;

/// Capability set polymorphic over package manager
#[async_trait]
pub trait PackageHandler: Send + Sync {
    /// The ecosystem this handler serves
    fn kind(&self) -> PackageManagerKind;

    /// True iff the tool exists and can be invoked
    async fn available(&self) -> bool;

    /// Refresh the local metadata cache. Called exactly once per sync,
    /// before any install.
    async fn update_index(&self) -> Result<()>;

    /// Local check whether a package is installed. Version suffixes are
    /// stripped before querying. False negatives are tolerated; false
    /// positives are not.
    async fn is_installed(&self, name: &str) -> Result<bool>;

    /// Batch-install packages non-interactively, streaming output to the
    /// sync log. A failing batch counts entirely as failed.
    async fn install(&self, names: &[String]) -> Result<()>;
}

/// Per-sync install counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallSummary {
    pub installed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl InstallSummary {
    pub fn merge(&mut self, other: InstallSummary) {
        self.installed += other.installed;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

impl std::fmt::Display for InstallSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "installed={}, skipped={}, failed={}",
            self.installed, self.skipped, self.failed
        )
    }
}

/// Registry of handlers keyed by ecosystem tag
pub struct HandlerRegistry {
    handlers: Vec<Box<dyn PackageHandler>>,
}

impl HandlerRegistry {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            handlers: vec![
                Box::new(AptHandler::new(runner.clone())),
                Box::new(ApkHandler::new(runner.clone())),
                Box::new(DnfHandler::new(runner.clone())),
                Box::new(NpmHandler::new(runner.clone())),
                Box::new(PipHandler::new(runner)),
            ],
        }
    }

    pub fn for_kind(&self, kind: PackageManagerKind) -> Option<&dyn PackageHandler> {
        self.handlers
            .iter()
            .find(|h| h.kind() == kind)
            .map(|h| h.as_ref())
    }
}

/// Filter out already-installed packages, then batch-install the rest.
///
/// Returns the counters for this batch. An `is_installed` error counts the
/// package as missing (re-install is idempotent); an install error fails the
/// whole remaining batch.
pub async fn install_missing(handler: &dyn PackageHandler, names: &[String]) -> InstallSummary {
    let mut summary = InstallSummary::default();
    let mut missing = Vec::new();

    for name in names {
        match handler.is_installed(name).await {
            Ok(true) => summary.skipped += 1,
            Ok(false) => missing.push(name.clone()),
            Err(e) => {
                tracing::debug!("is_installed({}) failed, assuming missing: {}", name, e);
                missing.push(name.clone());
            }
        }
    }

    if missing.is_empty() {
        return summary;
    }

    match handler.install(&missing).await {
        Ok(()) => summary.installed += missing.len(),
        Err(e) => {
            tracing::warn!(
                "{} install of {} package(s) failed: {}",
                handler.kind(),
                missing.len(),
                e
            );
            summary.failed += missing.len();
        }
    }

    summary
}
