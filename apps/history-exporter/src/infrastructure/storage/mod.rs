//! Payload Storage
//!
//! Filesystem-backed [`PayloadSink`]. Logical paths are relative,
//! `/`-separated, and resolved under a root directory; parent directories
//! are created on demand and existing files are overwritten.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use crate::application::ports::{PayloadSink, SinkError};

/// Writes payloads to files under a root directory.
#[derive(Debug, Clone)]
pub struct FileSink {
    root: PathBuf,
}

impl FileSink {
    /// Create a sink rooted at `root`. The directory is created on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve `logical_path` under the root.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::InvalidPath`] for empty or absolute paths and for
    /// paths with `..` or other non-normal components.
    pub fn resolve(&self, logical_path: &str) -> Result<PathBuf, SinkError> {
        let relative = Path::new(logical_path);
        let mut components = relative.components().peekable();

        if components.peek().is_none() {
            return Err(SinkError::InvalidPath(logical_path.to_string()));
        }

        let mut resolved = self.root.clone();
        for component in components {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return Err(SinkError::InvalidPath(logical_path.to_string())),
            }
        }

        if resolved == self.root {
            return Err(SinkError::InvalidPath(logical_path.to_string()));
        }

        Ok(resolved)
    }
}

#[async_trait]
impl PayloadSink for FileSink {
    async fn write_bytes(&self, logical_path: &str, payload: Bytes) -> Result<(), SinkError> {
        let path = self.resolve(logical_path)?;
        let io_err = |source| SinkError::Io {
            path: logical_path.to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(&path, &payload).await.map_err(io_err)?;

        tracing::debug!(path = logical_path, bytes = payload.len(), "Payload written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("" ; "empty")]
    #[test_case("/etc/passwd" ; "absolute")]
    #[test_case("../escape.json" ; "parent")]
    #[test_case("details/../../escape.json" ; "nested parent")]
    #[test_case("." ; "current dir only")]
    fn rejects_unsafe_paths(path: &str) {
        let sink = FileSink::new("/data");
        assert!(matches!(sink.resolve(path), Err(SinkError::InvalidPath(_))));
    }

    #[test]
    fn resolves_relative_paths_under_root() {
        let sink = FileSink::new("/data");
        assert_eq!(
            sink.resolve("details/tx-1.json").unwrap(),
            PathBuf::from("/data/details/tx-1.json")
        );
    }

    #[tokio::test]
    async fn writes_and_overwrites_files() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path());

        sink.write_bytes("instruments/US0378331005.json", Bytes::from_static(b"{\"a\":1}"))
            .await
            .unwrap();
        sink.write_bytes("instruments/US0378331005.json", Bytes::from_static(b"{\"a\":2}"))
            .await
            .unwrap();

        let written = std::fs::read(dir.path().join("instruments/US0378331005.json")).unwrap();
        assert_eq!(written, b"{\"a\":2}");
    }

    #[tokio::test]
    async fn invalid_path_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path().join("root"));

        let err = sink
            .write_bytes("../outside.json", Bytes::from_static(b"x"))
            .await
            .unwrap_err();

        assert!(matches!(err, SinkError::InvalidPath(_)));
        assert!(!dir.path().join("outside.json").exists());
    }
}
