use crate::{
    error::{UpdError, UpdResult},
    utils::{get_default_from_env, normalize_relative},
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApplySettings {
    /// Dynamic-files manifest, relative to the target installation
    #[serde(default = "_default_apply_manifest")]
    pub manifest: String,
    #[serde(default = "_default_apply_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    /// Abort on the first file error instead of continuing
    #[serde(default)]
    pub strict: bool,
}

fn _default_apply_manifest() -> String {
    get_default_from_env("UPDATR_DYNAMIC_FILES", "dynamicFiles.json".into())
}
fn _default_apply_wait_timeout_ms() -> u64 {
    get_default_from_env("UPDATR_WAIT_TIMEOUT_MS", 5_000)
}

impl Default for ApplySettings {
    fn default() -> Self {
        Self {
            manifest: _default_apply_manifest(),
            wait_timeout_ms: _default_apply_wait_timeout_ms(),
            strict: false,
        }
    }
}

/// Files inside the installation that an update must never delete or overwrite.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct DynamicFileManifest {
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

impl DynamicFileManifest {
    /// Reads the manifest; a missing file means nothing is preserved.
    pub fn load(path: &Path) -> UpdResult<Self> {
        if !path.exists() {
            log::info!("No dynamic files manifest at {}", path.display());
            return Ok(Self::default());
        }
        if !path.is_file() {
            return Err(UpdError::FileSystemError(format!(
                "Dynamic files manifest {} is not a file",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path).map_err(|err| {
            UpdError::FileSystemError(format!(
                "Failed to open dynamic files manifest {}: {}",
                path.display(),
                err
            ))
        })?;
        serde_json::from_str(&content).map_err(|err| {
            UpdError::FileSystemError(format!(
                "Failed to parse dynamic files manifest {}: {}",
                path.display(),
                err
            ))
        })
    }

    fn normalized(&self) -> HashSet<PathBuf> {
        self.files.iter().map(|p| normalize_relative(p)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default, Clone)]
pub struct SyncReport {
    pub removed: usize,
    pub preserved: usize,
    pub copied: usize,
    pub failures: Vec<SyncFailure>,
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} removed, {} preserved, {} copied, {} failed",
            self.removed,
            self.preserved,
            self.copied,
            self.failures.len()
        )
    }
}

/// Rewrites a live installation so it matches an extracted update tree.
///
/// Runs in two passes. The sweep deletes every file of the target that is
/// neither under the staging segment nor listed as dynamic; the copy pass then
/// mirrors the source tree into the target. Individual file errors are logged
/// and collected unless strict mode is on.
pub struct FileSync {
    target_root: PathBuf,
    source_root: PathBuf,
    staging_segment: OsString,
    dynamic_files: HashSet<PathBuf>,
    strict: bool,
}

impl FileSync {
    pub fn new(
        target_root: &Path,
        source_root: &Path,
        manifest_path: Option<&Path>,
        staging_segment: &OsStr,
    ) -> UpdResult<Self> {
        if !target_root.is_absolute() {
            return Err(UpdError::FileSystemError(format!(
                "Target path {} must be absolute",
                target_root.display()
            )));
        }
        if !target_root.is_dir() {
            return Err(UpdError::FileSystemError(format!(
                "Target path {} is not an existing directory",
                target_root.display()
            )));
        }
        if !source_root.is_dir() {
            return Err(UpdError::FileSystemError(format!(
                "Update source {} is not an existing directory",
                source_root.display()
            )));
        }
        if staging_segment.is_empty() {
            return Err(UpdError::FileSystemError(
                "Staging segment must not be empty".to_string(),
            ));
        }
        let manifest = match manifest_path {
            Some(path) => DynamicFileManifest::load(path)?,
            None => DynamicFileManifest::default(),
        };
        Ok(Self {
            target_root: target_root.to_path_buf(),
            source_root: source_root.to_path_buf(),
            staging_segment: staging_segment.to_os_string(),
            dynamic_files: manifest.normalized(),
            strict: false,
        })
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn apply(&self) -> UpdResult<SyncReport> {
        let mut report = SyncReport::default();
        self.sweep(&mut report)?;
        self.copy(&mut report)?;
        log::info!("Synchronized {}: {}", self.target_root.display(), report);
        Ok(report)
    }

    fn is_staging(&self, relative: &Path) -> bool {
        matches!(
            relative.components().next(),
            Some(Component::Normal(first)) if first == self.staging_segment.as_os_str()
        )
    }

    fn is_dynamic(&self, relative: &Path) -> bool {
        self.dynamic_files.contains(relative)
    }

    fn sweep(&self, report: &mut SyncReport) -> UpdResult<()> {
        let mut stale = Vec::new();
        let walker = WalkDir::new(&self.target_root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| match entry.path().strip_prefix(&self.target_root) {
                Ok(relative) => !self.is_staging(relative),
                Err(_) => true,
            });
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                    self.record_failure(report, path, err.to_string())?;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.target_root) else {
                continue;
            };
            if self.is_dynamic(relative) {
                log::debug!("Keeping dynamic file {}", relative.display());
                report.preserved += 1;
                continue;
            }
            stale.push(entry.into_path());
        }

        for path in stale {
            log::info!("Removing file: {}", path.display());
            match std::fs::remove_file(&path) {
                Ok(()) => report.removed += 1,
                Err(err) => self.record_failure(report, path, err.to_string())?,
            }
        }
        Ok(())
    }

    fn copy(&self, report: &mut SyncReport) -> UpdResult<()> {
        for entry in WalkDir::new(&self.source_root).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                    self.record_failure(report, path, err.to_string())?;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.source_root) else {
                continue;
            };
            let destination = self.target_root.join(relative);
            if self.is_dynamic(relative) && destination.exists() {
                log::debug!("Not overwriting dynamic file {}", relative.display());
                continue;
            }
            if let Some(dir) = destination.parent()
                && let Err(err) = std::fs::create_dir_all(dir)
            {
                self.record_failure(report, dir.to_path_buf(), err.to_string())?;
                continue;
            }
            log::info!(
                "Copy file: {} to {}",
                entry.path().display(),
                destination.display()
            );
            match std::fs::copy(entry.path(), &destination) {
                Ok(_) => report.copied += 1,
                Err(err) => self.record_failure(report, destination, err.to_string())?,
            }
        }
        Ok(())
    }

    fn record_failure(&self, report: &mut SyncReport, path: PathBuf, reason: String) -> UpdResult<()> {
        log::warn!("Failed to update {}: {}", path.display(), reason);
        if self.strict {
            return Err(UpdError::FileSystemError(format!(
                "Failed to update {}: {}",
                path.display(),
                reason
            )));
        }
        report.failures.push(SyncFailure { path, reason });
        Ok(())
    }
}

/// First segment of `working_dir` below `target_root`, i.e. the subtree the
/// apply agent runs from and which the sweep must leave alone.
pub fn staging_segment_for(target_root: &Path, working_dir: &Path) -> UpdResult<OsString> {
    let target = target_root.canonicalize()?;
    let working = working_dir.canonicalize()?;
    let relative = working.strip_prefix(&target).map_err(|_| {
        UpdError::FileSystemError(format!(
            "Working directory {} is not inside target {}",
            working.display(),
            target.display()
        ))
    })?;
    match relative.components().next() {
        Some(Component::Normal(segment)) => Ok(segment.to_os_string()),
        _ => Err(UpdError::FileSystemError(format!(
            "Working directory {} must be below target {}, not the target itself",
            working.display(),
            target.display()
        ))),
    }
}
