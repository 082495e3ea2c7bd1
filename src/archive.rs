use crate::{
    error::{UpdError, UpdResult},
    utils,
};
use std::ffi::OsString;
use std::fs::File;
use std::path::{Component, Path, PathBuf};

/// Tracks the first path segment of every archive entry to decide whether the
/// whole archive is wrapped in a single top-level directory.
#[derive(Debug, Default)]
pub struct RootInference {
    first: Option<OsString>,
    common: bool,
}

impl RootInference {
    pub fn observe(&mut self, path: &Path, is_dir: bool) {
        let mut components = path.components().filter(|c| !matches!(c, Component::CurDir));
        let Some(first) = components.next() else {
            return;
        };
        let first = first.as_os_str().to_os_string();
        // a file at the top level cannot live inside a common root
        let bare_file = !is_dir && components.next().is_none();
        match &self.first {
            None => {
                self.first = Some(first);
                self.common = !bare_file;
            }
            Some(seen) => {
                if *seen != first || bare_file {
                    self.common = false;
                }
            }
        }
    }

    pub fn common_root(&self) -> Option<&OsString> {
        if self.common { self.first.as_ref() } else { None }
    }
}

/// Extracts a `.zip` asset next to itself and returns the root of the
/// extracted install tree.
///
/// Entries land under the archive's parent directory. When every entry shares
/// one top-level directory the returned root is that directory, otherwise the
/// parent directory itself. A failure part way leaves already-written files
/// in place.
pub fn extract_asset(asset_path: &Path) -> UpdResult<PathBuf> {
    if !asset_path.is_file() {
        return Err(UpdError::ArchiveError(format!(
            "Asset {} does not exist or is not a regular file",
            asset_path.display()
        )));
    }
    if asset_path.extension().is_none_or(|ext| ext != "zip") {
        return Err(UpdError::ArchiveError(format!(
            "Asset {} is not a .zip archive",
            asset_path.display()
        )));
    }
    let parent = asset_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let file = File::open(asset_path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|err| {
        UpdError::ArchiveError(format!(
            "Failed to open zip archive {}: {}",
            asset_path.display(),
            err
        ))
    })?;
    log::info!(
        "Extracting {} entries from {}",
        archive.len(),
        asset_path.display()
    );

    let mut inference = RootInference::default();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|err| {
            UpdError::ArchiveError(format!("Failed to read entry {}: {}", i, err))
        })?;
        let name = entry.name().to_string();
        let relative = entry.enclosed_name().ok_or_else(|| {
            UpdError::ArchiveError(format!("Entry '{}' escapes the extraction directory", name))
        })?;
        log::debug!(
            "Name: [{}], Size: [{}], mtime: [{:?}]",
            name,
            entry.size(),
            entry.last_modified()
        );

        let is_dir = name.ends_with('/') || name.ends_with('\\');
        inference.observe(&relative, is_dir);

        let destination = parent.join(&relative);
        if is_dir {
            std::fs::create_dir_all(&destination)?;
            continue;
        }
        if let Some(dir) = destination.parent() {
            std::fs::create_dir_all(dir).map_err(|err| {
                UpdError::FileSystemError(format!(
                    "Failed to create directory {}: {}",
                    dir.display(),
                    err
                ))
            })?;
        }

        let mut out = File::create(&destination).map_err(|err| {
            UpdError::FileSystemError(format!(
                "Failed to create file {}: {}",
                destination.display(),
                err
            ))
        })?;
        let written = std::io::copy(&mut entry, &mut out).map_err(|err| {
            UpdError::ArchiveError(format!("Failed to read '{}' from archive: {}", name, err))
        })?;
        if written != entry.size() {
            return Err(UpdError::ArchiveError(format!(
                "Short read for '{}': wrote {} of {} bytes",
                name,
                written,
                entry.size()
            )));
        }
        if let Some(mode) = entry.unix_mode() {
            utils::set_mode(&destination, mode)?;
        }
    }

    match inference.common_root() {
        Some(root) => Ok(parent.join(root)),
        None => Ok(parent),
    }
}
