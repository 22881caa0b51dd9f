//! Import sources
//!
//! A source turns a logical path into a byte stream. The default source reads
//! from the local filesystem; tests substitute in-memory readers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;

/// Byte stream yielded by a source. The caller owns the stream and drops it
/// to close.
pub type SourceReader = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait ImportSource: Send + Sync {
    async fn open(&self, source_path: &str) -> Result<SourceReader>;
}

/// Opens import files from the local filesystem.
///
/// Relative paths resolve against the configured base directory; absolute
/// paths are honored as-is.
pub struct LocalSource {
    base_dir: PathBuf,
}

impl LocalSource {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir: PathBuf = base_dir.into();
        let base_dir = if base_dir.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            base_dir
        };
        Self { base_dir }
    }

    fn resolve(&self, source_path: &str) -> PathBuf {
        let path = Path::new(source_path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

#[async_trait]
impl ImportSource for LocalSource {
    async fn open(&self, source_path: &str) -> Result<SourceReader> {
        let path = self.resolve(source_path);
        let file = tokio::fs::File::open(&path)
            .await
            .with_context(|| format!("open file {}", path.display()))?;
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_resolve_relative_against_base_dir() {
        let source = LocalSource::new("/data/imports");
        assert_eq!(
            source.resolve("users.json"),
            PathBuf::from("/data/imports/users.json")
        );
    }

    #[test]
    fn test_resolve_absolute_path_honored() {
        let source = LocalSource::new("/data/imports");
        assert_eq!(
            source.resolve("/tmp/users.json"),
            PathBuf::from("/tmp/users.json")
        );
    }

    #[test]
    fn test_empty_base_dir_defaults_to_cwd() {
        let source = LocalSource::new("");
        assert_eq!(source.resolve("users.json"), PathBuf::from("./users.json"));
    }

    #[tokio::test]
    async fn test_open_reads_file_contents() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("users.json"), b"[]").expect("write fixture");

        let source = LocalSource::new(dir.path());
        let mut reader = source.open("users.json").await.expect("open");

        let mut contents = String::new();
        reader.read_to_string(&mut contents).await.expect("read");
        assert_eq!(contents, "[]");
    }

    #[tokio::test]
    async fn test_open_missing_file_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = LocalSource::new(dir.path());

        let result = source.open("absent.json").await;
        assert!(result.is_err());
    }
}
