use std::{
    fs::{self, File},
    io::{self, BufWriter},
    path::Path,
};

use flate2::{Compression, write::GzEncoder};
use tar::{Builder, EntryType, Header, HeaderMode};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::ArchiveError;

type ArchiveBuilder = Builder<GzEncoder<BufWriter<File>>>;

/// Archive the directory at `source` into a new gzip compressed tar at `destination`.
///
/// Returns the size of the archive in bytes. On failure the partial archive is removed.
pub fn create(source: &Path, destination: &Path) -> Result<u64, ArchiveError> {
    let source_metadata =
        fs::metadata(source).map_err(|e| ArchiveError::Io(e, "get source metadata"))?;
    if !source_metadata.is_dir() {
        return Err(ArchiveError::NotDirectory(source.to_path_buf()));
    }

    let file = File::create(destination).map_err(|e| ArchiveError::Io(e, "create archive"))?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = Builder::new(encoder);

    let result = append_tree(&mut builder, source).and_then(|()| finish(builder));

    match result {
        Ok(size) => Ok(size),
        Err(error) => {
            if let Err(e) = fs::remove_file(destination) {
                warn!("Could not remove partial archive {}: {e}", destination.display());
            }
            Err(error)
        }
    }
}

fn append_tree(builder: &mut ArchiveBuilder, source: &Path) -> Result<(), ArchiveError> {
    for entry in WalkDir::new(source).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();

        let relative_path = match path.strip_prefix(source) {
            Ok(relative_path) => relative_path,
            Err(_) => continue,
        };

        // The archived directory itself has no entry.
        if relative_path.as_os_str().is_empty() {
            continue;
        }

        let metadata = entry.metadata()?;
        let file_type = metadata.file_type();

        let mut header = Header::new_gnu();
        header.set_metadata_in_mode(&metadata, HeaderMode::Complete);

        if file_type.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            builder
                .append_data(&mut header, relative_path, io::empty())
                .map_err(|e| ArchiveError::Io(e, "append directory"))?;
        } else if file_type.is_file() {
            let file = File::open(path).map_err(|e| ArchiveError::Io(e, "open file"))?;
            builder
                .append_data(&mut header, relative_path, file)
                .map_err(|e| ArchiveError::Io(e, "append file"))?;
        } else if file_type.is_symlink() {
            let target =
                fs::read_link(path).map_err(|e| ArchiveError::Io(e, "read symlink"))?;
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            builder
                .append_link(&mut header, relative_path, &target)
                .map_err(|e| ArchiveError::Io(e, "append symlink"))?;
        } else {
            debug!("Skipping special file {}", path.display());
        }
    }

    Ok(())
}

fn finish(builder: ArchiveBuilder) -> Result<u64, ArchiveError> {
    let encoder = builder
        .into_inner()
        .map_err(|e| ArchiveError::Io(e, "finish archive"))?;
    let writer = encoder
        .finish()
        .map_err(|e| ArchiveError::Io(e, "finish compression"))?;
    let file = writer
        .into_inner()
        .map_err(|e| ArchiveError::Io(e.into_error(), "flush archive"))?;

    file.sync_all()
        .map_err(|e| ArchiveError::Io(e, "sync archive"))?;
    let metadata = file
        .metadata()
        .map_err(|e| ArchiveError::Io(e, "get archive metadata"))?;

    Ok(metadata.len())
}
