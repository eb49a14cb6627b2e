//! Local file content source
//!
//! Besides plain range reads, a file may carry a sidecar refresh marker
//! (`.<name>.refresh`, an integer number of seconds). Once the file is older
//! than that, it is deleted on the next read so the route falls through to
//! the next backend, typically the HTTP origin it was mirrored from.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use crate::error::{BackendError, Result};
use crate::source::{Content, ContentSource, Mode};

/// Sidecar path holding the refresh interval of `path`
pub fn refresh_marker_path(path: &Path) -> PathBuf {
    sibling(path, ".", ".refresh")
}

/// Staging path used while `path` is being mirrored
pub fn staging_path(path: &Path) -> PathBuf {
    sibling(path, "_", "")
}

fn sibling(path: &Path, prefix: &str, suffix: &str) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    path.with_file_name(format!("{prefix}{name}{suffix}"))
}

/// Content source backed by a local file
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    target: String,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let target = path.to_string_lossy().into_owned();
        Self { path, target }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the file if it currently exists as a regular file
    pub async fn regular_size(path: &Path) -> Option<u64> {
        let meta = fs::metadata(path).await.ok()?;
        meta.is_file().then(|| meta.len())
    }

    /// Delete the file if its refresh marker says it is stale
    async fn expire(&self, modified: SystemTime) -> Result<()> {
        let Ok(marker) = fs::read_to_string(refresh_marker_path(&self.path)).await else {
            return Ok(());
        };
        let refresh = marker
            .lines()
            .next()
            .and_then(|line| line.trim().parse::<u64>().ok())
            .unwrap_or(0);
        if refresh == 0 {
            return Ok(());
        }

        let age = modified.elapsed().map(|age| age.as_secs()).unwrap_or(0);
        if age >= refresh {
            debug!(path = %self.path.display(), age, refresh, "Removing expired file");
            fs::remove_file(&self.path).await?;
            return Err(BackendError::Expired(self.path.clone()));
        }
        Ok(())
    }

    async fn read_range(&self, offset: u64, length: u64) -> Result<Content> {
        let meta = fs::metadata(&self.path).await?;
        if !meta.is_file() {
            return Err(BackendError::NotRegular(self.path.clone()));
        }
        self.expire(meta.modified()?).await?;

        let total = meta.len();
        if offset >= total || length == 0 {
            return Ok(Content::new(total, Vec::new()));
        }
        let length = length.min(total - offset);

        let mut file = fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut data = Vec::with_capacity(length as usize);
        file.take(length).read_to_end(&mut data).await?;

        Ok(Content::new(total, data))
    }
}

#[async_trait]
impl ContentSource for FileSource {
    fn mode(&self) -> Mode {
        Mode::File
    }

    fn target(&self) -> &str {
        &self.target
    }

    async fn read(&self, offset: u64, length: u64) -> Result<Content> {
        let start = Instant::now();
        let result = self.read_range(offset, length).await;
        debug!(
            target = %self.target,
            offset,
            length,
            read = result.as_ref().map(|c| c.data.len()).unwrap_or(0),
            total = result.as_ref().map(|c| c.total as i64).unwrap_or(-1),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "FILE read"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_sidecar_paths() {
        let path = Path::new("/srv/boot/image.bin");
        assert_eq!(staging_path(path), PathBuf::from("/srv/boot/_image.bin"));
        assert_eq!(refresh_marker_path(path), PathBuf::from("/srv/boot/.image.bin.refresh"));
    }

    #[tokio::test]
    async fn test_read_ranges() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kernel");
        std::fs::write(&path, b"0123456789").unwrap();

        let source = FileSource::new(&path);
        assert_eq!(source.mode(), Mode::File);

        let content = source.read(0, 4).await.unwrap();
        assert_eq!(content.total, 10);
        assert_eq!(&content.data[..], b"0123");

        // Clipped at end of file
        let content = source.read(8, 64 << 10).await.unwrap();
        assert_eq!(&content.data[..], b"89");

        // Past the end yields nothing but still reports the size
        let content = source.read(10, 4).await.unwrap();
        assert_eq!(content.total, 10);
        assert!(content.data.is_empty());
    }

    #[tokio::test]
    async fn test_empty_file_is_resolved() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();

        let content = FileSource::new(&path).read(0, 512).await.unwrap();
        assert_eq!(content.total, 0);
        assert!(content.data.is_empty());
    }

    #[tokio::test]
    async fn test_missing_and_directory() {
        let dir = tempdir().unwrap();

        let missing = FileSource::new(dir.path().join("nope"));
        assert!(matches!(missing.read(0, 1).await, Err(BackendError::Io(_))));

        let directory = FileSource::new(dir.path());
        assert!(matches!(directory.read(0, 1).await, Err(BackendError::NotRegular(_))));
    }

    #[tokio::test]
    async fn test_refresh_marker_expires_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("initrd");
        std::fs::write(&path, b"payload").unwrap();
        std::fs::write(refresh_marker_path(&path), b"1\n").unwrap();

        // Fresh file is served
        let source = FileSource::new(&path);
        assert!(source.read(0, 16).await.is_ok());

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert!(matches!(source.read(0, 16).await, Err(BackendError::Expired(_))));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_zero_refresh_never_expires() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("initrd");
        std::fs::write(&path, b"payload").unwrap();
        std::fs::write(refresh_marker_path(&path), b"0\n").unwrap();

        assert!(FileSource::new(&path).read(0, 16).await.is_ok());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_regular_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file");
        std::fs::write(&path, vec![0u8; 300]).unwrap();

        assert_eq!(FileSource::regular_size(&path).await, Some(300));
        assert_eq!(FileSource::regular_size(dir.path()).await, None);
        assert_eq!(FileSource::regular_size(&dir.path().join("missing")).await, None);
    }
}
