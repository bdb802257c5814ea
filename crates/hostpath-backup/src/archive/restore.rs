use std::{
    fs::{self, DirBuilder, File, OpenOptions, Permissions},
    io::{self, BufReader, Read},
    os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt, symlink},
    path::{Component, Path, PathBuf},
};

use flate2::read::GzDecoder;
use tar::{Archive, Entry, EntryType};
use tracing::debug;

use super::ArchiveError;

/// Replace the contents of the directory at `target` with the archive at `source`.
///
/// Everything directly under `target` is removed before extraction. An entry that would resolve
/// outside of `target` fails the restore before anything is written for it. Extraction is not
/// transactional, a failure part way through leaves `target` partially restored.
pub fn restore(source: &Path, target: &Path) -> Result<(), ArchiveError> {
    let target_metadata =
        fs::metadata(target).map_err(|e| ArchiveError::Io(e, "get target metadata"))?;
    if !target_metadata.is_dir() {
        return Err(ArchiveError::NotDirectory(target.to_path_buf()));
    }
    let base = fs::canonicalize(target).map_err(|e| ArchiveError::Io(e, "resolve target"))?;

    clear_directory(&base)?;

    let file = File::open(source).map_err(|e| ArchiveError::Io(e, "open archive"))?;
    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));

    // Directory modes are applied once extraction is done so read only directories still take
    // their children.
    let mut directories = Vec::new();

    let entries = archive
        .entries()
        .map_err(|e| ArchiveError::Io(e, "read archive"))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| ArchiveError::Io(e, "read archive entry"))?;
        let entry_path = entry
            .path()
            .map_err(|e| ArchiveError::Io(e, "read entry path"))?
            .into_owned();

        let path = resolve_entry_path(&base, &entry_path)?;
        reject_symlink_ancestors(&base, &path, &entry_path)?;

        match entry.header().entry_type() {
            EntryType::Directory => {
                let mode = entry_mode(&entry)?;
                DirBuilder::new()
                    .recursive(true)
                    .mode(0o755)
                    .create(&path)
                    .map_err(|e| ArchiveError::Io(e, "create directory"))?;
                directories.push((path, mode));
            }

            EntryType::Regular | EntryType::Continuous => {
                let mode = entry_mode(&entry)?;
                create_parent(&path)?;
                remove_existing_symlink(&path)?;

                let mut file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .mode(0o600)
                    .open(&path)
                    .map_err(|e| ArchiveError::Io(e, "create file"))?;
                io::copy(&mut entry, &mut file)
                    .map_err(|e| ArchiveError::Io(e, "write file"))?;
                file.set_permissions(Permissions::from_mode(mode))
                    .map_err(|e| ArchiveError::Io(e, "set file mode"))?;
            }

            // The link target is recreated verbatim and may point anywhere.
            EntryType::Symlink => {
                let link_target = entry
                    .link_name()
                    .map_err(|e| ArchiveError::Io(e, "read symlink target"))?
                    .ok_or_else(|| {
                        ArchiveError::Io(
                            io::Error::new(io::ErrorKind::InvalidData, "missing link name"),
                            "read symlink target",
                        )
                    })?
                    .into_owned();

                create_parent(&path)?;
                remove_existing_symlink(&path)?;
                symlink(&link_target, &path).map_err(|e| ArchiveError::Io(e, "create symlink"))?;
            }

            other => debug!("Skipping {other:?} entry {}", entry_path.display()),
        }
    }

    // Children before parents.
    for (path, mode) in directories.iter().rev() {
        fs::set_permissions(path, Permissions::from_mode(*mode))
            .map_err(|e| ArchiveError::Io(e, "set directory mode"))?;
    }

    Ok(())
}

/// Resolve an entry path against `base`, failing if it is not `base` or beneath it.
///
/// Resolution is lexical: `.` is dropped, `..` removes the previous segment and an absolute entry
/// path replaces `base`.
pub fn resolve_entry_path(base: &Path, entry_path: &Path) -> Result<PathBuf, ArchiveError> {
    let base = normalize(base);
    let resolved = normalize(&base.join(entry_path));

    if resolved.starts_with(&base) {
        Ok(resolved)
    } else {
        Err(ArchiveError::PathTraversal(entry_path.to_path_buf()))
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                normalized.push(component.as_os_str());
            }
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
        }
    }

    normalized
}

/// Entries must not be written through a symlink restored earlier in the same archive.
fn reject_symlink_ancestors(
    base: &Path,
    path: &Path,
    entry_path: &Path,
) -> Result<(), ArchiveError> {
    let Ok(relative) = path.strip_prefix(base) else {
        return Err(ArchiveError::PathTraversal(entry_path.to_path_buf()));
    };

    let mut ancestor = base.to_path_buf();
    let mut components = relative.components().peekable();
    while let Some(component) = components.next() {
        if components.peek().is_none() {
            break;
        }

        ancestor.push(component);
        let is_symlink = fs::symlink_metadata(&ancestor)
            .is_ok_and(|metadata| metadata.file_type().is_symlink());
        if is_symlink {
            return Err(ArchiveError::PathTraversal(entry_path.to_path_buf()));
        }
    }

    Ok(())
}

/// The permission bits recorded for a directory or file entry.
fn entry_mode<R: Read>(entry: &Entry<'_, R>) -> Result<u32, ArchiveError> {
    let mode = entry
        .header()
        .mode()
        .map_err(|e| ArchiveError::Io(e, "read entry mode"))?;

    Ok(mode & 0o7777)
}

fn create_parent(path: &Path) -> Result<(), ArchiveError> {
    if let Some(parent) = path.parent() {
        DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(parent)
            .map_err(|e| ArchiveError::Io(e, "create parent directory"))?;
    }

    Ok(())
}

fn remove_existing_symlink(path: &Path) -> Result<(), ArchiveError> {
    let is_symlink =
        fs::symlink_metadata(path).is_ok_and(|metadata| metadata.file_type().is_symlink());
    if is_symlink {
        fs::remove_file(path).map_err(|e| ArchiveError::Io(e, "replace symlink"))?;
    }

    Ok(())
}

fn clear_directory(target: &Path) -> Result<(), ArchiveError> {
    let directory = fs::read_dir(target).map_err(|e| ArchiveError::Io(e, "read target"))?;

    for entry in directory {
        let entry = entry.map_err(|e| ArchiveError::Io(e, "read target entry"))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| ArchiveError::Io(e, "get target entry type"))?;

        debug!("Removing {}", path.display());
        if file_type.is_dir() {
            fs::remove_dir_all(&path).map_err(|e| ArchiveError::Io(e, "clear target"))?;
        } else {
            fs::remove_file(&path).map_err(|e| ArchiveError::Io(e, "clear target"))?;
        }
    }

    Ok(())
}
