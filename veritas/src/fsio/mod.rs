//! Atomic filesystem primitives shared by every persistent subsystem.
//!
//! All durable state in the engine goes through two operations:
//!
//! - [`atomic_write_json`] – temp file in the same directory, write,
//!   fsync, rename over the target, fsync the directory.
//! - [`atomic_append_line`] – `O_APPEND` write followed by an fsync of
//!   the file and its parent directory.
//!
//! Both create files with mode `0o600`. After a crash between any two
//! syscalls the target contains either the old contents or the new
//! contents in full, never a mix.
//!
//! Paths handed to these functions must first pass [`guard_path`], which
//! refuses symlinks and anything that escapes the configured base
//! directory.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

/// Errors raised by the atomic-I/O substrate.
#[derive(Debug, Error, Diagnostic)]
pub enum FsIoError {
    /// An underlying I/O operation failed.
    #[error("io error on {path}: {source}")]
    #[diagnostic(code(veritas::fsio::io))]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The target path is a symlink.
    #[error("refusing symlinked path: {path}")]
    #[diagnostic(
        code(veritas::fsio::symlink),
        help("Persistent state paths must be regular files inside the data directory.")
    )]
    SymlinkRefused {
        /// Offending path.
        path: PathBuf,
    },

    /// The target path escapes the configured base directory.
    #[error("path {path} escapes base directory {base}")]
    #[diagnostic(code(veritas::fsio::escape))]
    PathEscapes {
        /// Offending path.
        path: PathBuf,
        /// Configured base.
        base: PathBuf,
    },

    /// JSON serialization failed.
    #[error("serialization failed for {path}: {source}")]
    #[diagnostic(code(veritas::fsio::serde))]
    Serde {
        /// Target path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> FsIoError + '_ {
    move |source| FsIoError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Validate that `path` stays inside `base` and is not a symlink.
///
/// Two independent checks: an explicit symlink probe on the final
/// component, and a canonicalized prefix check against `base`. The parent
/// directory must already exist.
///
/// # Errors
///
/// Returns [`FsIoError::SymlinkRefused`] or [`FsIoError::PathEscapes`].
pub fn guard_path(base: &Path, path: &Path) -> Result<PathBuf, FsIoError> {
    if let Ok(meta) = std::fs::symlink_metadata(path) {
        if meta.file_type().is_symlink() {
            return Err(FsIoError::SymlinkRefused {
                path: path.to_path_buf(),
            });
        }
    }

    let canonical_base = base.canonicalize().map_err(io_err(base))?;
    let parent = path.parent().unwrap_or(base);
    let canonical_parent = parent.canonicalize().map_err(io_err(parent))?;
    let resolved = match path.file_name() {
        Some(name) => canonical_parent.join(name),
        None => canonical_parent.clone(),
    };

    if !resolved.starts_with(&canonical_base) {
        return Err(FsIoError::PathEscapes {
            path: path.to_path_buf(),
            base: base.to_path_buf(),
        });
    }
    Ok(resolved)
}

/// Open the parent directory of `path` and fsync it, making a preceding
/// rename or append durable.
///
/// # Errors
///
/// Returns [`FsIoError::Io`] on open/sync failure.
pub fn fsync_parent_dir(path: &Path) -> Result<(), FsIoError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let dir = File::open(parent).map_err(io_err(parent))?;
    dir.sync_all().map_err(io_err(parent))
}

#[cfg(unix)]
fn restrict_mode(options: &mut OpenOptions) {
    use std::os::unix::fs::OpenOptionsExt;
    options.mode(0o600);
}

#[cfg(not(unix))]
fn restrict_mode(_options: &mut OpenOptions) {}

/// Serialize `value` as JSON and atomically replace `path` with it.
///
/// # Errors
///
/// Returns [`FsIoError`] on serialization or I/O failure; on failure the
/// previous contents of `path` are untouched.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), FsIoError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| FsIoError::Serde {
        path: path.to_path_buf(),
        source,
    })?;
    atomic_write_bytes(path, &bytes)
}

/// Atomically replace `path` with `bytes`.
///
/// # Errors
///
/// Returns [`FsIoError::Io`] on failure; the previous contents survive.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<(), FsIoError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    let tmp_path = parent.join(format!(".{file_name}.tmp.{}", std::process::id()));

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    restrict_mode(&mut options);

    let mut tmp = options.open(&tmp_path).map_err(io_err(&tmp_path))?;
    tmp.write_all(bytes).map_err(io_err(&tmp_path))?;
    tmp.sync_all().map_err(io_err(&tmp_path))?;
    drop(tmp);

    std::fs::rename(&tmp_path, path).map_err(io_err(path))?;
    fsync_parent_dir(path)
}

/// Append `line` (a newline is added) to `path` with `O_APPEND`, then
/// fsync the file and its parent directory.
///
/// # Errors
///
/// Returns [`FsIoError::Io`] on failure.
pub fn atomic_append_line(path: &Path, line: &str) -> Result<(), FsIoError> {
    let mut options = OpenOptions::new();
    options.append(true).create(true);
    restrict_mode(&mut options);

    let mut file = options.open(path).map_err(io_err(path))?;
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');
    file.write_all(&buf).map_err(io_err(path))?;
    file.sync_all().map_err(io_err(path))?;
    drop(file);

    fsync_parent_dir(path)
}
