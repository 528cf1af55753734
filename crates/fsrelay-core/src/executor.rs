//! Filesystem operations behind the [`OperationExecutor`] trait.
//!
//! The server validates paths before anything reaches this module; the
//! executor only carries out the operation. [`FsExecutor`] works on the
//! real filesystem through `tokio::fs`.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::BoxFuture;
use fsrelay_config::policy::extension;

/// A validated filesystem operation.
#[derive(Clone, PartialEq, Eq)]
pub enum Operation {
    CreateFile { path: PathBuf, body: Vec<u8> },
    ModifyFile { path: PathBuf, body: Vec<u8> },
    AppendFile { path: PathBuf, body: Vec<u8> },
    RemoveFile { path: PathBuf },
    CreateDir { path: PathBuf },
    RemoveDir { path: PathBuf },
    ClearDir { path: PathBuf },
    Copy { from: PathBuf, to: PathBuf },
    Rename { from: PathBuf, to: PathBuf },
}

impl Operation {
    /// The path the operation acts on (the source for copy and rename).
    pub fn path(&self) -> &Path {
        match self {
            Operation::CreateFile { path, .. }
            | Operation::ModifyFile { path, .. }
            | Operation::AppendFile { path, .. }
            | Operation::RemoveFile { path }
            | Operation::CreateDir { path }
            | Operation::RemoveDir { path }
            | Operation::ClearDir { path } => path,
            Operation::Copy { from, .. } | Operation::Rename { from, .. } => from,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateFile { .. } => "create-file",
            Operation::ModifyFile { .. } => "modify-file",
            Operation::AppendFile { .. } => "append-file",
            Operation::RemoveFile { .. } => "remove-file",
            Operation::CreateDir { .. } => "create-dir",
            Operation::RemoveDir { .. } => "remove-dir",
            Operation::ClearDir { .. } => "clear-dir",
            Operation::Copy { .. } => "copy",
            Operation::Rename { .. } => "rename",
        }
    }

    /// The file this operation writes, if it writes one.
    fn written_file(&self) -> Option<&Path> {
        match self {
            Operation::CreateFile { path, .. }
            | Operation::ModifyFile { path, .. }
            | Operation::AppendFile { path, .. } => Some(path),
            Operation::Copy { to, .. } | Operation::Rename { to, .. } => Some(to),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Operation");
        s.field("op", &self.name()).field("path", &self.path());
        match self {
            Operation::CreateFile { body, .. }
            | Operation::ModifyFile { body, .. }
            | Operation::AppendFile { body, .. } => {
                s.field("body_len", &body.len());
            }
            Operation::Copy { to, .. } | Operation::Rename { to, .. } => {
                s.field("to", to);
            }
            _ => {}
        }
        s.finish()
    }
}

/// Errors from carrying out an operation. The display text is sent to the
/// client verbatim.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("permission deny, cannot mkdir: {0}")]
    CannotCreateParent(String),

    #[error("permission deny, dir not allow write: {0}")]
    ParentNotWritable(String),

    #[error("extension not allowed: {0}")]
    ExtensionNotAllowed(String),

    #[error("{0} already exists")]
    DestinationExists(String),

    #[error("cannot copy {from} into itself at {to}")]
    CopyIntoSelf { from: String, to: String },

    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },
}

impl ExecError {
    fn io<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> Self + 'a {
        move |source| ExecError::Io {
            op,
            path: path.display().to_string(),
            source,
        }
    }
}

/// Performs operations.
pub trait OperationExecutor: Send + Sync {
    fn execute<'a>(&'a self, op: &'a Operation) -> BoxFuture<'a, Result<(), ExecError>>;
}

/// Executor backed by the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct FsExecutor {
    allowed_extensions: Vec<String>,
}

impl FsExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict written files to these extensions. An empty list allows any.
    pub fn with_allowed_extensions<'a>(exts: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            allowed_extensions: exts
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_string())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    fn check_extension(&self, path: &Path) -> Result<(), ExecError> {
        if self.allowed_extensions.is_empty() {
            return Ok(());
        }
        match extension(path) {
            Some(ext)
                if !self
                    .allowed_extensions
                    .iter()
                    .any(|a| a.as_bytes().eq_ignore_ascii_case(ext)) =>
            {
                Err(ExecError::ExtensionNotAllowed(
                    String::from_utf8_lossy(ext).into_owned(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn run(&self, op: &Operation) -> Result<(), ExecError> {
        if let Some(target) = op.written_file() {
            self.check_extension(target)?;
        }

        match op {
            Operation::CreateFile { path, body } | Operation::ModifyFile { path, body } => {
                write_file(path, body, false).await
            }
            Operation::AppendFile { path, body } => write_file(path, body, true).await,
            Operation::RemoveFile { path } => {
                if !exists(path).await {
                    return Ok(());
                }
                fs::remove_file(path)
                    .await
                    .map_err(ExecError::io("remove", path))
            }
            Operation::CreateDir { path } => create_dir_all(path)
                .await
                .map_err(ExecError::io("mkdir", path)),
            Operation::RemoveDir { path } => {
                if !exists(path).await {
                    return Ok(());
                }
                fs::remove_dir_all(path)
                    .await
                    .map_err(ExecError::io("remove", path))
            }
            Operation::ClearDir { path } => {
                if !exists(path).await {
                    return Ok(());
                }
                clear_dir(path).await
            }
            Operation::Copy { from, to } => {
                if to.starts_with(from) {
                    return Err(ExecError::CopyIntoSelf {
                        from: from.display().to_string(),
                        to: to.display().to_string(),
                    });
                }
                ensure_writable(to).await?;
                let meta = fs::metadata(from)
                    .await
                    .map_err(ExecError::io("stat", from))?;
                if meta.is_dir() {
                    copy_dir(from, to).await
                } else {
                    fs::copy(from, to)
                        .await
                        .map(|_| ())
                        .map_err(ExecError::io("copy", from))
                }
            }
            Operation::Rename { from, to } => {
                ensure_writable(to).await?;
                fs::rename(from, to)
                    .await
                    .map_err(ExecError::io("rename", from))
            }
        }
    }
}

impl OperationExecutor for FsExecutor {
    fn execute<'a>(&'a self, op: &'a Operation) -> BoxFuture<'a, Result<(), ExecError>> {
        Box::pin(async move {
            debug!(?op, "executing");
            self.run(op).await
        })
    }
}

async fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).await.is_ok()
}

async fn create_dir_all(path: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o755);
    builder.create(path).await
}

/// Make sure the parent directory of `path` exists and accepts writes.
///
/// A missing parent is created recursively. An existing parent whose
/// permission bits forbid writing, or that is not a directory, is rejected.
///
/// Only the mode bits are consulted, not ownership. A `0755` directory owned
/// by another user passes here and the write fails later with an I/O error.
pub async fn ensure_writable(path: &Path) -> Result<(), ExecError> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    let dir = parent.display().to_string();
    match fs::metadata(parent).await {
        Ok(meta) if meta.is_dir() && !meta.permissions().readonly() => Ok(()),
        Ok(_) => Err(ExecError::ParentNotWritable(dir)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => create_dir_all(parent)
            .await
            .map_err(|_| ExecError::CannotCreateParent(dir)),
        Err(_) => Err(ExecError::ParentNotWritable(dir)),
    }
}

async fn write_file(path: &Path, body: &[u8], append: bool) -> Result<(), ExecError> {
    ensure_writable(path).await?;
    let mut options = fs::OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    #[cfg(unix)]
    options.mode(0o664);

    let mut file = options
        .open(path)
        .await
        .map_err(ExecError::io("open", path))?;
    file.write_all(body)
        .await
        .map_err(ExecError::io("write", path))?;
    file.flush().await.map_err(ExecError::io("write", path))
}

async fn clear_dir(path: &Path) -> Result<(), ExecError> {
    let mut entries = fs::read_dir(path)
        .await
        .map_err(ExecError::io("read dir", path))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(ExecError::io("read dir", path))?
    {
        let child = entry.path();
        let is_dir = entry
            .file_type()
            .await
            .map_err(ExecError::io("stat", &child))?
            .is_dir();
        let removed = if is_dir {
            fs::remove_dir_all(&child).await
        } else {
            fs::remove_file(&child).await
        };
        removed.map_err(ExecError::io("remove", &child))?;
    }
    Ok(())
}

/// Copy a directory tree. Fails if `to` already exists.
async fn copy_dir(from: &Path, to: &Path) -> Result<(), ExecError> {
    if exists(to).await {
        return Err(ExecError::DestinationExists(to.display().to_string()));
    }

    // Directory permissions are applied after their contents are copied so a
    // read-only source directory can still be filled in.
    let mut created = Vec::new();
    let mut pending = vec![(from.to_path_buf(), to.to_path_buf())];
    while let Some((src, dst)) = pending.pop() {
        let perms = fs::metadata(&src)
            .await
            .map_err(ExecError::io("stat", &src))?
            .permissions();
        create_dir_all(&dst)
            .await
            .map_err(ExecError::io("mkdir", &dst))?;
        created.push((dst.clone(), perms));

        let mut entries = fs::read_dir(&src)
            .await
            .map_err(ExecError::io("read dir", &src))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(ExecError::io("read dir", &src))?
        {
            let child_src = entry.path();
            let child_dst = dst.join(entry.file_name());
            let file_type = entry
                .file_type()
                .await
                .map_err(ExecError::io("stat", &child_src))?;
            if file_type.is_dir() {
                pending.push((child_src, child_dst));
            } else {
                fs::copy(&child_src, &child_dst)
                    .await
                    .map_err(ExecError::io("copy", &child_src))?;
            }
        }
    }

    for (dir, perms) in created.into_iter().rev() {
        fs::set_permissions(&dir, perms)
            .await
            .map_err(ExecError::io("chmod", &dir))?;
    }
    Ok(())
}
