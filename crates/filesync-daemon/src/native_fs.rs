//! Native filesystem implementation using tokio::fs.

use async_trait::async_trait;
use filesync_core::fs::{FileSnapshot, FileSystem, FsError, Result};
use filesync_core::paths;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Native filesystem rooted at the synchronized directory
pub struct NativeFs {
    base_path: PathBuf,
}

impl NativeFs {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn full_path(&self, name: &str) -> Result<PathBuf> {
        if !paths::is_syncable(name) {
            return Err(FsError::InvalidName(name.to_string()));
        }
        Ok(self.base_path.join(name))
    }
}

fn map_io(name: &str, e: std::io::Error) -> FsError {
    match e.kind() {
        ErrorKind::NotFound => FsError::NotFound(name.to_string()),
        ErrorKind::PermissionDenied => FsError::PermissionDenied(name.to_string()),
        ErrorKind::AlreadyExists => FsError::AlreadyExists(name.to_string()),
        _ => FsError::Io(format!("{}: {}", name, e)),
    }
}

/// Full-resolution mtime. Nanoseconds since epoch fit a u64 until 2554.
fn mtime_nanos(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[async_trait]
impl FileSystem for NativeFs {
    async fn read_if_exists(&self, name: &str) -> Result<FileSnapshot> {
        let full_path = self.full_path(name)?;

        // Metadata and content come from the same handle, taken in that
        // order. A save landing mid-read can only leave the mtime too old,
        // which the next pass picks up.
        let mut file = match fs::File::open(&full_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(FileSnapshot::absent()),
            Err(e) => return Err(map_io(name, e)),
        };
        let metadata = file.metadata().await.map_err(|e| map_io(name, e))?;
        if metadata.is_dir() {
            return Err(FsError::NotText(name.to_string()));
        }

        let mut bytes = Vec::with_capacity(metadata.len() as usize);
        file.read_to_end(&mut bytes)
            .await
            .map_err(|e| map_io(name, e))?;

        let content = String::from_utf8(bytes).map_err(|_| FsError::NotText(name.to_string()))?;
        Ok(FileSnapshot::present(content, mtime_nanos(&metadata)))
    }

    async fn write_if_different(&self, name: &str, content: &str) -> Result<bool> {
        let full_path = self.full_path(name)?;

        match fs::read(&full_path).await {
            Ok(current) if current == content.as_bytes() => return Ok(false),
            Ok(_) => {}
            Err(e) => return Err(map_io(name, e)),
        }

        // No `create`: a file deleted mid-pass surfaces as NotFound
        let mut file = fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&full_path)
            .await
            .map_err(|e| map_io(name, e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| map_io(name, e))?;
        file.flush().await.map_err(|e| map_io(name, e))?;
        Ok(true)
    }

    async fn create(&self, name: &str, content: &str) -> Result<()> {
        let full_path = self.full_path(name)?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full_path)
            .await
            .map_err(|e| map_io(name, e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| map_io(name, e))?;
        file.flush().await.map_err(|e| map_io(name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_read_missing_file_is_absent() {
        let temp_dir = TempDir::new().unwrap();
        let fs = NativeFs::new(temp_dir.path().to_path_buf());

        let snapshot = fs.read_if_exists("missing.md").await.unwrap();

        assert_eq!(snapshot, FileSnapshot::absent());
    }

    #[tokio::test]
    async fn test_create_then_read() {
        let temp_dir = TempDir::new().unwrap();
        let fs = NativeFs::new(temp_dir.path().to_path_buf());

        fs.create("notes.md", "hello").await.unwrap();
        let snapshot = fs.read_if_exists("notes.md").await.unwrap();

        assert!(snapshot.exists);
        assert_eq!(snapshot.content, "hello");
        assert!(snapshot.last_modified > 0);
        assert!(matches!(
            fs.create("notes.md", "again").await,
            Err(FsError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_write_if_different_skips_identical_content() {
        let temp_dir = TempDir::new().unwrap();
        let fs = NativeFs::new(temp_dir.path().to_path_buf());
        fs.create("notes.md", "same").await.unwrap();

        assert!(!fs.write_if_different("notes.md", "same").await.unwrap());
        assert!(fs.write_if_different("notes.md", "other").await.unwrap());
        assert_eq!(
            std::fs::read_to_string(temp_dir.path().join("notes.md")).unwrap(),
            "other"
        );
    }

    #[tokio::test]
    async fn test_write_to_deleted_file_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let fs = NativeFs::new(temp_dir.path().to_path_buf());
        fs.create("notes.md", "before").await.unwrap();
        std::fs::remove_file(temp_dir.path().join("notes.md")).unwrap();

        assert!(matches!(
            fs.write_if_different("notes.md", "after").await,
            Err(FsError::NotFound(_))
        ));
        assert!(!temp_dir.path().join("notes.md").exists());
    }

    #[tokio::test]
    async fn test_mtime_keeps_sub_millisecond_resolution() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("notes.md");
        std::fs::write(&path, "x").unwrap();
        let stamp = UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_789);
        File::options().write(true).open(&path).unwrap().set_modified(stamp).unwrap();
        let fs = NativeFs::new(temp_dir.path().to_path_buf());

        let snapshot = fs.read_if_exists("notes.md").await.unwrap();

        // Some filesystems round to microseconds; either way the sub-ms part survives
        assert!(snapshot.last_modified >= 1_700_000_000_123_456_000);
        assert!(snapshot.last_modified <= 1_700_000_000_123_456_789);
    }

    #[tokio::test]
    async fn test_replace_by_rename_never_pairs_old_content_with_new_mtime() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().to_path_buf();
        let base = 1_700_000_000u64;

        // Content "n" always carries mtime base + n seconds
        let save = move |dir: &Path, n: u64| {
            let tmp = dir.join(format!("notes.md.{}.tmp", n));
            std::fs::write(&tmp, n.to_string()).unwrap();
            File::options()
                .write(true)
                .open(&tmp)
                .unwrap()
                .set_modified(UNIX_EPOCH + Duration::from_secs(base + n))
                .unwrap();
            std::fs::rename(&tmp, dir.join("notes.md")).unwrap();
        };
        save(&dir, 0);

        let stop = Arc::new(AtomicBool::new(false));
        let writer = {
            let dir = dir.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut n = 1;
                while !stop.load(Ordering::SeqCst) {
                    save(&dir, n);
                    n += 1;
                }
            })
        };

        let fs = NativeFs::new(dir);
        let mut mismatched = 0;
        for _ in 0..2_000 {
            let snapshot = fs.read_if_exists("notes.md").await.unwrap();
            let n: u64 = snapshot.content.parse().unwrap();
            let mtime_secs = snapshot.last_modified / 1_000_000_000;
            if mtime_secs > base + n {
                mismatched += 1;
            }
        }
        stop.store(true, Ordering::SeqCst);
        writer.join().unwrap();

        assert_eq!(mismatched, 0);
    }

    #[tokio::test]
    async fn test_binary_file_is_not_text() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("image.md"), [0xff, 0xfe, 0x00]).unwrap();
        let fs = NativeFs::new(temp_dir.path().to_path_buf());

        assert!(matches!(
            fs.read_if_exists("image.md").await,
            Err(FsError::NotText(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_names_outside_directory() {
        let temp_dir = TempDir::new().unwrap();
        let fs = NativeFs::new(temp_dir.path().to_path_buf());

        assert!(matches!(
            fs.read_if_exists("../escape.md").await,
            Err(FsError::InvalidName(_))
        ));
        assert!(matches!(
            fs.create(".hidden", "").await,
            Err(FsError::InvalidName(_))
        ));
    }
}
