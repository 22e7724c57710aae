//! Zip packaging of a directory tree.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::ArchiveError;

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

/// Pack `base/dir_name` into the zip file `dest`. Entry names are relative to
/// `base` (`dir_name/...`). The archive is written next to `dest` and renamed
/// into place once complete. Returns the number of files stored.
pub fn zip_directory(base: &Path, dir_name: &str, dest: &Path) -> Result<usize, ArchiveError> {
    let partial = dest.with_extension("zip.partial");
    match write_zip(base, dir_name, &partial) {
        Ok(count) => {
            fs::rename(&partial, dest)?;
            Ok(count)
        }
        Err(e) => {
            if let Err(cleanup) = fs::remove_file(&partial) {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    warn!(path = %partial.display(), error = %cleanup, "failed to remove partial archive");
                }
            }
            Err(e)
        }
    }
}

fn write_zip(base: &Path, dir_name: &str, out: &Path) -> Result<usize, ArchiveError> {
    let mut zip = ZipWriter::new(File::create(out)?);
    let mut stored = 0;

    let mut pending: Vec<PathBuf> = vec![base.join(dir_name)];
    while let Some(dir) = pending.pop() {
        zip.add_directory(entry_name(base, &dir), entry_options())?;

        let mut entries: Vec<PathBuf> = fs::read_dir(&dir)?
            .map(|e| e.map(|e| e.path()))
            .collect::<io::Result<_>>()?;
        entries.sort();

        for path in entries {
            if path.is_dir() {
                pending.push(path);
            } else {
                zip.start_file(entry_name(base, &path), entry_options())?;
                io::copy(&mut File::open(&path)?, &mut zip)?;
                stored += 1;
            }
        }
    }

    zip.finish()?;
    Ok(stored)
}

/// `/`-separated path of `path` relative to `base`.
fn entry_name(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zip_directory_stores_relative_entries() {
        let root = tempfile::tempdir().unwrap();
        let sources = root.path().join("sources");
        fs::create_dir_all(sources.join("1")).unwrap();
        fs::create_dir_all(sources.join("2")).unwrap();
        fs::write(sources.join("1/page.html"), "<html></html>").unwrap();
        fs::write(sources.join("2/style.css"), "body{}").unwrap();

        let dest = root.path().join("sources.zip");
        let stored = zip_directory(root.path(), "sources", &dest).unwrap();
        assert_eq!(stored, 2);
        assert!(!root.path().join("sources.zip.partial").exists());

        let archive = zip::ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        let names: Vec<&str> = archive.file_names().collect();
        assert!(names.contains(&"sources/1/page.html"));
        assert!(names.contains(&"sources/2/style.css"));
    }

    #[test]
    fn test_missing_directory_leaves_no_archive() {
        let root = tempfile::tempdir().unwrap();
        let dest = root.path().join("sources.zip");
        assert!(zip_directory(root.path(), "sources", &dest).is_err());
        assert!(!dest.exists());
        assert!(!root.path().join("sources.zip.partial").exists());
    }
}
