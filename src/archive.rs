//! In-memory zip bundles for downloads that match several files.

use std::fs::File;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::storage::{StorageError, base_name};

pub const ARCHIVE_NAME: &str = "files.zip";
pub const ARCHIVE_CONTENT_TYPE: &str = "application/x-zip-compressed";

/// Deflates every file in `paths` into one zip, entries named by base name.
///
/// Files sharing a base name collapse into one entry holding the content
/// of the last of them.
pub async fn build_archive(paths: Vec<PathBuf>) -> Result<Vec<u8>, StorageError> {
    tokio::task::spawn_blocking(move || write_archive(&paths))
        .await
        .map_err(|err| StorageError::Io(io::Error::other(err.to_string())))?
}

fn write_archive(paths: &[PathBuf]) -> Result<Vec<u8>, StorageError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, path) in archive_entries(paths) {
        let mut file = File::open(path)?;
        let large = file.metadata()?.len() >= u64::from(u32::MAX);
        writer
            .start_file(name, options.large_file(large))
            .map_err(zip_error)?;
        io::copy(&mut file, &mut writer)?;
    }

    let cursor = writer.finish().map_err(zip_error)?;
    Ok(cursor.into_inner())
}

/// Entry names in first-seen order; a repeated name takes the later path.
fn archive_entries(paths: &[PathBuf]) -> Vec<(String, &Path)> {
    let mut entries: Vec<(String, &Path)> = Vec::with_capacity(paths.len());
    for path in paths {
        let name = base_name(path);
        match entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = path.as_path(),
            None => entries.push((name, path.as_path())),
        }
    }
    entries
}

fn zip_error(err: ZipError) -> StorageError {
    StorageError::Io(io::Error::other(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;
    use zip::ZipArchive;

    fn read_entries(bytes: Vec<u8>) -> Vec<(String, Vec<u8>)> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).expect("open archive");
        (0..archive.len())
            .map(|index| {
                let mut entry = archive.by_index(index).expect("entry");
                let mut content = Vec::new();
                entry.read_to_end(&mut content).expect("read entry");
                (entry.name().to_string(), content)
            })
            .collect()
    }

    #[tokio::test]
    async fn archive_contains_every_file_by_base_name() {
        let temp = tempdir().expect("tempdir");
        std::fs::create_dir_all(temp.path().join("nested")).expect("mkdir");
        let first = temp.path().join("one.txt");
        let second = temp.path().join("nested/two.bin");
        std::fs::write(&first, b"first file").expect("write");
        std::fs::write(&second, vec![7u8; 4096]).expect("write");

        let bytes = build_archive(vec![first, second]).await.expect("archive");
        let entries = read_entries(bytes);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], ("one.txt".to_string(), b"first file".to_vec()));
        assert_eq!(entries[1], ("two.bin".to_string(), vec![7u8; 4096]));
    }

    #[tokio::test]
    async fn same_base_name_keeps_last_file() {
        let temp = tempdir().expect("tempdir");
        std::fs::create_dir_all(temp.path().join("a")).expect("mkdir");
        std::fs::create_dir_all(temp.path().join("b")).expect("mkdir");
        let older = temp.path().join("a/report.csv");
        let newer = temp.path().join("b/report.csv");
        let other = temp.path().join("b/summary.csv");
        std::fs::write(&older, b"from a").expect("write");
        std::fs::write(&newer, b"from b").expect("write");
        std::fs::write(&other, b"summary").expect("write");

        let bytes = build_archive(vec![older, other, newer])
            .await
            .expect("archive");
        let entries = read_entries(bytes);
        assert_eq!(
            entries,
            vec![
                ("report.csv".to_string(), b"from b".to_vec()),
                ("summary.csv".to_string(), b"summary".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let temp = tempdir().expect("tempdir");
        let result = build_archive(vec![temp.path().join("gone.txt")]).await;
        assert!(matches!(result, Err(StorageError::Io(_))));
    }
}
