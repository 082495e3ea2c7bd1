use crate::error::{UpdError, UpdResult};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

/// A trait for types that can be created from an environment variable.
pub trait FromEnv: Sized {
    fn from_env(key: &str, default: Self) -> Self;
}

#[derive(Clone)]
pub struct Secret(String);

/// Implementation for simple String types.
impl FromEnv for String {
    fn from_env(key: &str, default: Self) -> Self {
        std::env::var(key).unwrap_or(default)
    }
}

/// Implementation for Option<String> types.
impl FromEnv for Option<String> {
    fn from_env(key: &str, default: Self) -> Self {
        match std::env::var(key) {
            Ok(val) => Some(val),
            Err(_) => default,
        }
    }
}

impl FromEnv for u64 {
    fn from_env(key: &str, default: Self) -> Self {
        match std::env::var(key) {
            Ok(val) => val.trim().parse().unwrap_or_else(|_| {
                log::warn!("Ignoring non-numeric value '{}' for {}", val, key);
                default
            }),
            Err(_) => default,
        }
    }
}

impl Secret {
    pub fn new(value: String) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.len() <= 3 {
            write!(f, "***")
        } else {
            let prefix = &self.0[..3];
            write!(f, "{}***", prefix)
        }
    }
}

impl serde::Serialize for Secret {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret(\"{}\")", self)
    }
}

/// Gets a value from an environment variable, returning a default if not present.
pub fn get_default_from_env<T: FromEnv>(key: &str, default: T) -> T {
    T::from_env(key, default)
}

/// Applies the rwx permission bits recorded for an extracted file; setuid,
/// setgid and sticky bits are dropped. No-op outside unix.
#[allow(unused_variables)]
pub fn set_mode(path: &Path, mode: u32) -> UpdResult<()> {
    #[cfg(unix)]
    {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o777))?;
    }
    Ok(())
}

pub fn rimraf(path: &Path) -> UpdResult<()> {
    if path.exists() {
        std::fs::remove_dir_all(path).map_err(|err| {
            UpdError::FileSystemError(format!(
                "Failed to remove directory '{}': {}",
                path.display(),
                err
            ))
        })?;
    }
    Ok(())
}

/// Drops `.` components so `./config.ini` and `config.ini` compare equal.
pub fn normalize_relative(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// True when the relative path stays below its base: no root, prefix or `..`.
pub fn is_contained(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
