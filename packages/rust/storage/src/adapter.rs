//! Artifact storage behind a backend-agnostic trait.
//!
//! Paths are `/`-separated and relative to the adapter's root. The pipeline
//! core only ever talks to [`StorageAdapter`]; [`LocalStorage`] is the
//! filesystem backend used by the CLI and tests.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use medialens_shared::{MediaLensError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// One name inside a listed directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Entry {
    pub name: String,
    pub is_dir: bool,
}

/// Byte-level storage operations.
///
/// Implementations must give read-after-write consistency: a successful
/// `write_bytes` is visible to the next `read_bytes` or `exists`.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Read a whole object. Missing objects are [`MediaLensError::NotFound`].
    async fn read_bytes(&self, path: &str) -> Result<Vec<u8>>;

    /// Create or replace an object atomically.
    async fn write_bytes(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Direct children of `path`, sorted by name. A missing directory lists as empty.
    async fn list_entries(&self, path: &str) -> Result<Vec<Entry>>;

    async fn exists(&self, path: &str) -> Result<bool>;
}

/// Text and JSON helpers over any [`StorageAdapter`].
#[async_trait]
pub trait StorageAdapterExt: StorageAdapter {
    async fn read_text(&self, path: &str) -> Result<String> {
        let bytes = self.read_bytes(path).await?;
        String::from_utf8(bytes)
            .map_err(|e| MediaLensError::validation(format!("{path} is not UTF-8: {e}")))
    }

    async fn write_text(&self, path: &str, text: &str) -> Result<()> {
        self.write_bytes(path, text.as_bytes()).await
    }

    async fn read_json<T: DeserializeOwned + Send>(&self, path: &str) -> Result<T> {
        let bytes = self.read_bytes(path).await?;
        serde_json::from_slice(&bytes).map_err(|e| MediaLensError::Corrupted {
            what: format!("{path}: {e}"),
        })
    }

    /// Write `value` as pretty JSON with a trailing newline.
    async fn write_json<T: Serialize + Sync>(&self, path: &str, value: &T) -> Result<()> {
        let mut text = serde_json::to_string_pretty(value)
            .map_err(|e| MediaLensError::validation(format!("serialize {path}: {e}")))?;
        text.push('\n');
        self.write_bytes(path, text.as_bytes()).await
    }
}

impl<S: StorageAdapter + ?Sized> StorageAdapterExt for S {}

/// Join `/`-separated path segments, skipping empty ones.
pub fn join_path(parts: &[&str]) -> String {
    parts
        .iter()
        .flat_map(|p| p.split('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

// ---------------------------------------------------------------------------
// Local filesystem backend
// ---------------------------------------------------------------------------

/// [`StorageAdapter`] rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path under the root, refusing anything that escapes it.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let rel = Path::new(path);
        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(MediaLensError::validation(format!(
                "storage path '{path}' must be relative and stay under the root"
            )));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl StorageAdapter for LocalStorage {
    async fn read_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(MediaLensError::not_found(path.to_string()))
            }
            Err(e) => Err(MediaLensError::io(full, e)),
        }
    }

    async fn write_bytes(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MediaLensError::io(parent, e))?;
        }

        // Write beside the target, then rename over it.
        let tmp = full.with_file_name(format!(
            ".{}.{}.tmp",
            full.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Uuid::now_v7()
        ));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| MediaLensError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &full)
            .await
            .map_err(|e| MediaLensError::io(&full, e))?;
        Ok(())
    }

    async fn list_entries(&self, path: &str) -> Result<Vec<Entry>> {
        let full = self.resolve(path)?;
        let mut dir = match tokio::fs::read_dir(&full).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MediaLensError::io(full, e)),
        };

        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| MediaLensError::io(&full, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".tmp") && name.starts_with('.') {
                continue;
            }
            let is_dir = entry
                .file_type()
                .await
                .map_err(|e| MediaLensError::io(entry.path(), e))?
                .is_dir();
            entries.push(Entry { name, is_dir });
        }
        entries.sort();
        Ok(entries)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        tokio::fs::try_exists(&full)
            .await
            .map_err(|e| MediaLensError::io(full, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn temp_storage() -> LocalStorage {
        LocalStorage::new(std::env::temp_dir().join(format!("ml_fs_{}", Uuid::now_v7())))
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn write_then_read_text_and_json() {
        let fs = temp_storage();
        fs.write_text("jobs/a/notes.txt", "hello").await.unwrap();
        assert_eq!(fs.read_text("jobs/a/notes.txt").await.unwrap(), "hello");

        let sample = Sample {
            name: "x".into(),
            count: 3,
        };
        fs.write_json("out/sample.json", &sample).await.unwrap();
        let back: Sample = fs.read_json("out/sample.json").await.unwrap();
        assert_eq!(back, sample);
        assert!(fs.exists("out/sample.json").await.unwrap());
        assert!(!fs.exists("out/other.json").await.unwrap());
    }

    #[tokio::test]
    async fn missing_reads_are_not_found() {
        let fs = temp_storage();
        let err = fs.read_bytes("nope.txt").await.unwrap_err();
        assert!(matches!(err, MediaLensError::NotFound { .. }));
        assert!(fs.list_entries("nowhere").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn listing_is_sorted_and_hides_temp_files() {
        let fs = temp_storage();
        fs.write_text("d/b.txt", "").await.unwrap();
        fs.write_text("d/a.txt", "").await.unwrap();
        fs.write_text("d/sub/c.txt", "").await.unwrap();
        tokio::fs::write(fs.root().join("d/.a.txt.123.tmp"), b"partial")
            .await
            .unwrap();

        let entries = fs.list_entries("d").await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "sub"]);
        assert!(entries[2].is_dir);
    }

    #[tokio::test]
    async fn rejects_escaping_paths() {
        let fs = temp_storage();
        assert!(fs.read_bytes("../etc/passwd").await.is_err());
        assert!(fs.write_text("/abs.txt", "x").await.is_err());
    }

    #[test]
    fn join_path_skips_empty_segments() {
        assert_eq!(join_path(&["", "jobs/2025", "/a.json"]), "jobs/2025/a.json");
        assert_eq!(join_path(&["staging", "index.html"]), "staging/index.html");
    }
}
