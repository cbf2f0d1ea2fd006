use std::fs::{self, File};
use std::io;
use std::path::{Component, Path};
use log::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};
use crate::error::{BackupError, BackupResult};

/// Zip the recursive contents of `source_dir` into `archive_file`.
///
/// Entry names are relative to `source_dir`, so unpacking yields its children
/// directly. Symbolic links are followed and archived as the content they point
/// to; a link cycle fails the snapshot. Returns the number of entries written.
pub fn snapshot(source_dir: &Path, archive_file: &Path) -> BackupResult<usize> {
    if !source_dir.is_dir() {
        return Err(BackupError::Filesystem(format!(
            "upload directory {} does not exist",
            source_dir.display()
        )));
    }
    info!("Archiving {}", source_dir.display());

    let file = File::create(archive_file).map_err(|e| {
        BackupError::Filesystem(format!("cannot create {}: {}", archive_file.display(), e))
    })?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut entries = 0;

    for entry in WalkDir::new(source_dir).follow_links(true).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let name = entry_name(source_dir, entry.path())?;

        if entry.file_type().is_dir() {
            zip.add_directory(name, options)?;
        } else if entry.file_type().is_file() {
            let large = entry.metadata()?.len() >= u32::MAX as u64;
            zip.start_file(name, options.large_file(large))?;
            let mut input = File::open(entry.path())?;
            io::copy(&mut input, &mut zip)?;
        } else {
            warn!("Skipping {}: not a regular file or directory", entry.path().display());
            continue;
        }
        entries += 1;
    }

    zip.finish()?;
    debug!("Wrote {} entries to {}", entries, archive_file.display());
    Ok(entries)
}

/// Unpack `archive_file` into a scratch directory under `scratch_dir`, then merge
/// its top-level entries into `target_dir`. Existing files with the same name are
/// overwritten.
pub fn restore(archive_file: &Path, target_dir: &Path, scratch_dir: &Path) -> BackupResult<()> {
    let file = File::open(archive_file).map_err(|e| {
        BackupError::Filesystem(format!("cannot open {}: {}", archive_file.display(), e))
    })?;
    let mut archive = ZipArchive::new(file)?;

    let staging = tempfile::Builder::new()
        .prefix("files-restore-")
        .tempdir_in(scratch_dir)
        .map_err(|e| BackupError::Filesystem(format!("cannot stage in {}: {}", scratch_dir.display(), e)))?;
    archive.extract(staging.path())?;
    debug!("Extracted {} entries to {}", archive.len(), staging.path().display());

    fs::create_dir_all(target_dir).map_err(|e| {
        BackupError::Filesystem(format!("cannot create {}: {}", target_dir.display(), e))
    })?;

    for entry in fs::read_dir(staging.path())? {
        let entry = entry?;
        copy_merge(&entry.path(), &target_dir.join(entry.file_name()))?;
    }
    info!("Restored files into {}", target_dir.display());
    Ok(())
}

fn copy_merge(from: &Path, to: &Path) -> BackupResult<()> {
    if from.is_file() {
        fs::copy(from, to)?;
        return Ok(());
    }

    for entry in WalkDir::new(from) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| BackupError::Filesystem(e.to_string()))?;
        let dest = to.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

/// Forward-slash entry name of `path` relative to `root`.
fn entry_name(root: &Path, path: &Path) -> BackupResult<String> {
    let rel = path
        .strip_prefix(root)
        .map_err(|e| BackupError::Archive(format!("{}: {}", path.display(), e)))?;
    let parts = rel
        .components()
        .map(|component| match component {
            Component::Normal(part) => part.to_str().map(str::to_string).ok_or_else(|| {
                BackupError::Archive(format!("{} is not valid UTF-8", path.display()))
            }),
            _ => Err(BackupError::Archive(format!("unexpected path {}", path.display()))),
        })
        .collect::<BackupResult<Vec<_>>>()?;
    Ok(parts.join("/"))
}
