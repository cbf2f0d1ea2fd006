use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use chrono::NaiveDateTime;
use log::debug;
use tempfile::NamedTempFile;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};
use crate::error::{BackupError, BackupResult};

pub const DUMP_ENTRY: &str = "dump.sql";
pub const FILES_ENTRY: &str = "files.zip";

const BUNDLE_PREFIX: &str = "backup_";
const BUNDLE_EXTENSION: &str = ".zip";
const TIMESTAMP_FORMAT: &str = "%Y_%m_%d-%H_%M_%S";

/// `backup_<year>_<month>_<day>-<hour>_<minute>_<second>.zip`, sortable by name.
pub fn bundle_file_name(timestamp: NaiveDateTime) -> String {
    format!("{}{}{}", BUNDLE_PREFIX, timestamp.format(TIMESTAMP_FORMAT), BUNDLE_EXTENSION)
}

pub fn parse_bundle_timestamp(file_name: &str) -> Option<NaiveDateTime> {
    let stamp = file_name.strip_prefix(BUNDLE_PREFIX)?.strip_suffix(BUNDLE_EXTENSION)?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()
}

/// Package the dump and the files archive and publish the result as `backup_dir/file_name`.
///
/// The bundle is assembled in a temporary file next to its destination and only
/// renamed into place once complete.
pub fn write_bundle(dump: &Path, files: &Path, backup_dir: &Path, file_name: &str) -> BackupResult<PathBuf> {
    fs::create_dir_all(backup_dir).map_err(|e| {
        BackupError::Filesystem(format!("cannot create backup directory {}: {}", backup_dir.display(), e))
    })?;

    let partial = tempfile::Builder::new()
        .prefix(".partial-")
        .suffix(BUNDLE_EXTENSION)
        .tempfile_in(backup_dir)?;
    write_entries(&partial, dump, files)?;

    let destination = backup_dir.join(file_name);
    partial.persist_noclobber(&destination).map_err(|e| {
        BackupError::Filesystem(format!("cannot write {}: {}", destination.display(), e.error))
    })?;
    debug!("Published bundle {}", destination.display());
    Ok(destination)
}

fn write_entries(partial: &NamedTempFile, dump: &Path, files: &Path) -> BackupResult<()> {
    let mut zip = ZipWriter::new(partial.reopen()?);

    let sql = FileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(DUMP_ENTRY, sql.large_file(fs::metadata(dump)?.len() >= u32::MAX as u64))?;
    io::copy(&mut File::open(dump)?, &mut zip)?;

    // Already compressed.
    let nested = FileOptions::default().compression_method(CompressionMethod::Stored);
    zip.start_file(FILES_ENTRY, nested.large_file(fs::metadata(files)?.len() >= u32::MAX as u64))?;
    io::copy(&mut File::open(files)?, &mut zip)?;

    zip.finish()?;
    Ok(())
}

/// Resolve `file_name` inside `backup_dir`. Only plain file names are accepted.
pub fn locate_bundle(backup_dir: &Path, file_name: &str) -> BackupResult<PathBuf> {
    let path = backup_dir.join(file_name);
    let is_plain_name = Path::new(file_name).file_name().map_or(false, |name| name == file_name);
    if !is_plain_name || !path.is_file() {
        return Err(BackupError::BundleNotFound(path));
    }
    Ok(path)
}

/// The two entries of a bundle, extracted into a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackedBundle {
    pub dump: PathBuf,
    pub files: PathBuf,
}

/// Extract the dump and files archive of `bundle` into `workspace`.
///
/// Both entries are checked before anything is written.
pub fn unpack_bundle(bundle: &Path, workspace: &Path) -> BackupResult<UnpackedBundle> {
    let corrupt = |reason: String| BackupError::BundleCorrupt {
        path: bundle.to_path_buf(),
        reason,
    };

    let file = File::open(bundle).map_err(|e| corrupt(e.to_string()))?;
    let mut archive = ZipArchive::new(file).map_err(|e| corrupt(e.to_string()))?;

    let missing = [DUMP_ENTRY, FILES_ENTRY]
        .into_iter()
        .filter(|entry| !archive.file_names().any(|name| name == *entry))
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(corrupt(format!("missing {}", missing.join(" and "))));
    }

    for entry in [DUMP_ENTRY, FILES_ENTRY] {
        let mut zipped = archive.by_name(entry).map_err(|e| corrupt(e.to_string()))?;
        let mut output = File::create(workspace.join(entry))?;
        io::copy(&mut zipped, &mut output).map_err(|e| corrupt(format!("reading {}: {}", entry, e)))?;
    }

    Ok(UnpackedBundle {
        dump: workspace.join(DUMP_ENTRY),
        files: workspace.join(FILES_ENTRY),
    })
}

#[derive(Debug, Clone)]
pub struct BundleInfo {
    pub file_name: String,
    pub created_at: NaiveDateTime,
    pub size_bytes: u64,
}

/// Bundles found in `backup_dir`, newest first.
pub fn list_bundles(backup_dir: &Path) -> BackupResult<Vec<BundleInfo>> {
    if !backup_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut bundles = Vec::new();
    for entry in fs::read_dir(backup_dir)? {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().to_string();
        let created_at = match parse_bundle_timestamp(&file_name) {
            Some(created_at) => created_at,
            None => continue,
        };
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        bundles.push(BundleInfo {
            file_name,
            created_at,
            size_bytes: metadata.len(),
        });
    }

    bundles.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(bundles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Write;
    use tempfile::TempDir;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, s).unwrap()
    }

    fn inputs(dir: &Path) -> (PathBuf, PathBuf) {
        let dump = dir.join(DUMP_ENTRY);
        let files = dir.join(FILES_ENTRY);
        fs::write(&dump, "DROP TABLE public.users;\n").unwrap();
        ZipWriter::new(File::create(&files).unwrap()).finish().unwrap();
        (dump, files)
    }

    /// A zip holding only the given entries.
    fn zip_with(path: &Path, entries: &[&str]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        for entry in entries {
            zip.start_file(*entry, FileOptions::default()).unwrap();
            zip.write_all(b"content").unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_bundle_file_name() {
        assert_eq!(bundle_file_name(at(2024, 1, 1, 0, 0, 0)), "backup_2024_01_01-00_00_00.zip");
        assert_eq!(bundle_file_name(at(2025, 11, 27, 14, 30, 22)), "backup_2025_11_27-14_30_22.zip");
    }

    #[test]
    fn test_parse_bundle_timestamp() {
        assert_eq!(
            parse_bundle_timestamp("backup_2025_11_27-14_30_22.zip"),
            Some(at(2025, 11, 27, 14, 30, 22))
        );
        assert_eq!(parse_bundle_timestamp("backup_latest.zip"), None);
        assert_eq!(parse_bundle_timestamp("notes.txt"), None);
    }

    #[test]
    fn test_write_and_unpack() {
        let temp = TempDir::new().unwrap();
        let (dump, files) = inputs(temp.path());
        let backup_dir = temp.path().join("backups/nested");

        let name = bundle_file_name(at(2024, 1, 1, 0, 0, 0));
        let bundle = write_bundle(&dump, &files, &backup_dir, &name).unwrap();
        assert_eq!(bundle, backup_dir.join("backup_2024_01_01-00_00_00.zip"));

        let zip = ZipArchive::new(File::open(&bundle).unwrap()).unwrap();
        let mut names: Vec<&str> = zip.file_names().collect();
        names.sort();
        assert_eq!(names, vec![DUMP_ENTRY, FILES_ENTRY]);

        // No leftover partial file.
        assert_eq!(fs::read_dir(&backup_dir).unwrap().count(), 1);

        let workspace = TempDir::new().unwrap();
        let unpacked = unpack_bundle(&bundle, workspace.path()).unwrap();
        assert_eq!(fs::read(&unpacked.dump).unwrap(), fs::read(&dump).unwrap());
        assert_eq!(fs::read(&unpacked.files).unwrap(), fs::read(&files).unwrap());
    }

    #[test]
    fn test_write_refuses_to_overwrite() {
        let temp = TempDir::new().unwrap();
        let (dump, files) = inputs(temp.path());
        let backup_dir = temp.path().join("backups");
        let name = bundle_file_name(at(2024, 1, 1, 0, 0, 0));

        write_bundle(&dump, &files, &backup_dir, &name).unwrap();
        let second = write_bundle(&dump, &files, &backup_dir, &name);
        assert!(matches!(second, Err(BackupError::Filesystem(_))));
        assert_eq!(fs::read_dir(&backup_dir).unwrap().count(), 1);
    }

    #[test]
    fn test_unpack_missing_files_entry() {
        let temp = TempDir::new().unwrap();
        let bundle = temp.path().join("backup_2024_01_01-00_00_00.zip");
        zip_with(&bundle, &[DUMP_ENTRY]);

        let workspace = TempDir::new().unwrap();
        let err = unpack_bundle(&bundle, workspace.path()).unwrap_err();
        match err {
            BackupError::BundleCorrupt { reason, .. } => assert_eq!(reason, "missing files.zip"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(fs::read_dir(workspace.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_unpack_not_a_zip() {
        let temp = TempDir::new().unwrap();
        let bundle = temp.path().join("backup_2024_01_01-00_00_00.zip");
        fs::write(&bundle, "garbage").unwrap();

        let workspace = TempDir::new().unwrap();
        let result = unpack_bundle(&bundle, workspace.path());
        assert!(matches!(result, Err(BackupError::BundleCorrupt { .. })));
    }

    #[test]
    fn test_locate_bundle() {
        let temp = TempDir::new().unwrap();
        let bundle = temp.path().join("backup_2024_01_01-00_00_00.zip");
        zip_with(&bundle, &[DUMP_ENTRY, FILES_ENTRY]);

        assert_eq!(locate_bundle(temp.path(), "backup_2024_01_01-00_00_00.zip").unwrap(), bundle);
        assert!(matches!(
            locate_bundle(temp.path(), "backup_1999_01_01-00_00_00.zip"),
            Err(BackupError::BundleNotFound(_))
        ));
        assert!(matches!(
            locate_bundle(&temp.path().join("sub"), "../backup_2024_01_01-00_00_00.zip"),
            Err(BackupError::BundleNotFound(_))
        ));
    }

    #[test]
    fn test_list_bundles_newest_first() {
        let temp = TempDir::new().unwrap();
        for name in [
            "backup_2024_01_01-00_00_00.zip",
            "backup_2025_06_30-12_00_00.zip",
            "backup_2024_12_31-23_59_59.zip",
        ] {
            zip_with(&temp.path().join(name), &[DUMP_ENTRY, FILES_ENTRY]);
        }
        fs::write(temp.path().join("unrelated.zip"), "x").unwrap();

        let bundles = list_bundles(temp.path()).unwrap();
        let names: Vec<&str> = bundles.iter().map(|b| b.file_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "backup_2025_06_30-12_00_00.zip",
                "backup_2024_12_31-23_59_59.zip",
                "backup_2024_01_01-00_00_00.zip",
            ]
        );
        assert!(bundles[0].size_bytes > 0);
    }

    #[test]
    fn test_list_bundles_missing_dir() {
        let temp = TempDir::new().unwrap();
        assert!(list_bundles(&temp.path().join("missing")).unwrap().is_empty());
    }
}
