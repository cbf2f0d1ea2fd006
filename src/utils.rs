use std::path::Path;
use walkdir::WalkDir;

/// Total size in bytes of a file, or of every file below a directory.
pub fn get_size<P: AsRef<Path>>(path: P) -> Result<u64, walkdir::Error> {
    let mut total_size = 0;
    for entry in WalkDir::new(path) {
        let entry = entry?;
        if entry.file_type().is_file() {
            total_size += entry.metadata()?.len();
        }
    }
    Ok(total_size)
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_get_size() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("a/b")).unwrap();
        fs::write(temp.path().join("one.txt"), [0u8; 10]).unwrap();
        fs::write(temp.path().join("a/b/two.txt"), [0u8; 32]).unwrap();

        assert_eq!(get_size(temp.path()).unwrap(), 42);
        assert_eq!(get_size(temp.path().join("one.txt")).unwrap(), 10);
        assert!(get_size(temp.path().join("missing")).is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MiB");
    }
}
