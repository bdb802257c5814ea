//! Gzip compressed tar snapshots of a directory.
//!
//! Entry names are relative to the archived directory. Mode bits and symlink targets are kept,
//! entries other than directories, regular files and symlinks are skipped.
//!

use std::{io, path::PathBuf};

use thiserror::Error;

mod create;
mod restore;

pub use create::create;
pub use restore::{resolve_entry_path, restore};

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Failed to {1}: {0}")]
    Io(#[source] io::Error, &'static str),

    #[error("Path '{0}' is not a directory")]
    NotDirectory(PathBuf),

    #[error("Failed to walk the directory:\n{0}")]
    Walk(#[from] walkdir::Error),

    #[error("Archive entry '{0}' resolves outside the target directory")]
    PathTraversal(PathBuf),
}
