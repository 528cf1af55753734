//! Path security policy — decides whether a request may touch a path.
//!
//! A [`PathPolicy`] is built once from configuration and is read-only
//! afterwards. [`PathPolicy::check`] applies the rules in a fixed order:
//!
//! 1. the path must be absolute and free of `..` components,
//! 2. it must not lie under a denied directory,
//! 3. its extension (if any) must not be denied,
//! 4. it must lie under at least one allowed root.
//!
//! Every rule is a lexical comparison. The filesystem is never consulted, so
//! the decision does not depend on what currently exists on disk.

use std::path::{Component, Path, PathBuf};

/// Why a path was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeniedReason {
    #[error("path must be absolute")]
    NotAbsolute,

    #[error("path must not contain '..' components")]
    ParentTraversal,

    #[error("path is inside denied directory {0}")]
    DeniedDirectory(String),

    #[error("extension .{0} is denied")]
    DeniedExtension(String),

    #[error("path is not inside any allowed root directory")]
    OutsideRoots,
}

/// Allowed roots and denylists for request paths.
#[derive(Debug, Clone, Default)]
pub struct PathPolicy {
    allowed_roots: Vec<PathBuf>,
    denied_dirs: Vec<PathBuf>,
    denied_extensions: Vec<String>,
}

impl PathPolicy {
    /// Create a policy from root directories, denied directories, and denied
    /// extensions. Extensions may be given with or without a leading dot.
    pub fn new<'a>(
        allowed_roots: impl IntoIterator<Item = &'a str>,
        denied_dirs: impl IntoIterator<Item = &'a str>,
        denied_extensions: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            allowed_roots: allowed_roots.into_iter().map(PathBuf::from).collect(),
            denied_dirs: denied_dirs.into_iter().map(PathBuf::from).collect(),
            denied_extensions: denied_extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_string())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    /// Check a path against the policy.
    pub fn check(&self, path: &Path) -> Result<(), DeniedReason> {
        if !path.is_absolute() {
            return Err(DeniedReason::NotAbsolute);
        }
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(DeniedReason::ParentTraversal);
        }

        if let Some(dir) = self.denied_dirs.iter().find(|d| path.starts_with(d)) {
            return Err(DeniedReason::DeniedDirectory(dir.display().to_string()));
        }

        if let Some(ext) = extension(path) {
            if let Some(denied) = self
                .denied_extensions
                .iter()
                .find(|d| d.as_bytes().eq_ignore_ascii_case(ext))
            {
                return Err(DeniedReason::DeniedExtension(denied.clone()));
            }
        }

        if !self.allowed_roots.iter().any(|root| path.starts_with(root)) {
            return Err(DeniedReason::OutsideRoots);
        }

        Ok(())
    }

    /// The configured allowed roots.
    pub fn allowed_roots(&self) -> &[PathBuf] {
        &self.allowed_roots
    }
}

/// Check `path` against `policy`.
pub fn check_path(path: &Path, policy: &PathPolicy) -> Result<(), DeniedReason> {
    policy.check(path)
}

/// The bytes after the last `.` of the final path component.
///
/// Unlike [`Path::extension`], a leading dot counts: `/srv/.php` has the
/// extension `php`.
pub fn extension(path: &Path) -> Option<&[u8]> {
    let name = path.file_name()?.as_encoded_bytes();
    let dot = name.iter().rposition(|&b| b == b'.')?;
    let ext = &name[dot + 1..];
    (!ext.is_empty()).then_some(ext)
}
