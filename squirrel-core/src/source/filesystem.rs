//! Disk-backed resource source.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use super::{content_hash, ResourceSource, VersionStrategy};
use crate::config::{keys, Properties};
use crate::core::{Result, SquirrelError};
use crate::nut::Nut;

/// A [`ResourceSource`] resolving logical paths under a base directory.
#[derive(Debug, Clone)]
pub struct FilesystemSource {
    base: PathBuf,
    strategy: VersionStrategy,
}

impl FilesystemSource {
    /// Supported configuration keys.
    pub const SUPPORTED_KEYS: &'static [&'static str] =
        &[keys::BASE_PATH, keys::CONTENT_BASED_VERSION];

    /// Creates a source rooted at the given directory.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            strategy: VersionStrategy::Timestamp,
        }
    }

    /// Switches version tokens to content hashes.
    pub fn with_content_versions(mut self) -> Self {
        self.strategy = VersionStrategy::ContentHash;
        self
    }

    /// Builds a source from a property bag.
    ///
    /// Requires [`keys::BASE_PATH`]; honors [`keys::CONTENT_BASED_VERSION`].
    pub fn from_properties(props: &Properties) -> Result<Self> {
        props.validate("filesystem source", Self::SUPPORTED_KEYS)?;
        let base = props.require(keys::BASE_PATH)?;
        let mut source = Self::new(base);
        if props.bool_or(keys::CONTENT_BASED_VERSION, false)? {
            source.strategy = VersionStrategy::ContentHash;
        }
        Ok(source)
    }

    fn absolute(&self, path: &str) -> PathBuf {
        self.base.join(path.trim_start_matches('/'))
    }

    async fn modified_millis(&self, path: &Path) -> Result<i64> {
        let metadata = tokio::fs::metadata(path).await?;
        let modified = metadata.modified()?;
        Ok(chrono::DateTime::<chrono::Utc>::from(modified).timestamp_millis())
    }

    fn collect_files<'a>(
        dir: PathBuf,
        prefix: String,
        out: &'a mut Vec<String>,
    ) -> futures::future::BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let relative = if prefix.is_empty() {
                    name
                } else {
                    format!("{prefix}/{name}")
                };
                if entry.file_type().await?.is_dir() {
                    Self::collect_files(entry.path(), relative, out).await?;
                } else {
                    out.push(relative);
                }
            }
            Ok(())
        })
    }
}

#[async_trait]
impl ResourceSource for FilesystemSource {
    fn id(&self) -> String {
        format!("file:{}", self.base.display())
    }

    async fn list(&self, pattern: &str) -> Result<Vec<String>> {
        let regex = Regex::new(pattern)?;
        let mut all = Vec::new();
        Self::collect_files(self.base.clone(), String::new(), &mut all).await?;
        all.retain(|p| regex.is_match(p));
        all.sort();
        Ok(all)
    }

    async fn open(&self, path: &str) -> Result<Vec<u8>> {
        tokio::fs::read(self.absolute(path))
            .await
            .map_err(|e| SquirrelError::Stream {
                path: path.to_string(),
                message: e.to_string(),
            })
    }

    async fn last_changed(&self, path: &str) -> Result<i64> {
        self.modified_millis(&self.absolute(path)).await
    }

    async fn version_number(&self, path: &str) -> Result<String> {
        match self.strategy {
            VersionStrategy::Timestamp => {
                Ok(self.last_changed(path).await?.to_string())
            },
            VersionStrategy::ContentHash => {
                let bytes = self.open(path).await?;
                Ok(content_hash(&bytes))
            },
        }
    }

    fn supports_save(&self) -> bool {
        true
    }

    async fn save(&self, nut: &Nut) -> Result<()> {
        let target = self.absolute(nut.name());
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = nut.open().await?;
        tokio::fs::write(&target, &bytes[..]).await?;
        tracing::debug!(nut = nut.name(), target = %target.display(), "saved nut");
        Ok(())
    }

    fn with_root_path(&self, root: &str) -> Arc<dyn ResourceSource> {
        Arc::new(Self {
            base: self.base.join(root.trim_start_matches('/')),
            strategy: self.strategy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nut::NutType;

    fn fixture() -> (tempfile::TempDir, FilesystemSource) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.js"), "var a;").unwrap();
        std::fs::create_dir(dir.path().join("css")).unwrap();
        std::fs::write(dir.path().join("css/style.css"), "body{}").unwrap();
        let source = FilesystemSource::new(dir.path());
        (dir, source)
    }

    #[tokio::test]
    async fn test_list_recursive() {
        let (_dir, source) = fixture();
        let all = source.list(".*").await.unwrap();
        assert_eq!(all, vec!["a.js", "css/style.css"]);

        let css = source.list(r".*\.css$").await.unwrap();
        assert_eq!(css, vec!["css/style.css"]);
    }

    #[tokio::test]
    async fn test_open_and_versions() {
        let (_dir, source) = fixture();
        assert_eq!(source.open("a.js").await.unwrap(), b"var a;");

        let hashed = source.clone().with_content_versions();
        let v = hashed.version_number("a.js").await.unwrap();
        assert_eq!(v, content_hash(b"var a;"));
    }

    #[tokio::test]
    async fn test_save_creates_parents() {
        let (dir, source) = fixture();
        let nut = Nut::from_bytes(
            "out/bundle.js",
            NutType::Javascript,
            "v1",
            b"var b;".to_vec(),
        );
        source.save(&nut).await.unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("out/bundle.js")).unwrap(),
            b"var b;"
        );
    }

    #[tokio::test]
    async fn test_root_path_scoping() {
        let (_dir, source) = fixture();
        let scoped = source.with_root_path("css");
        assert_eq!(scoped.open("style.css").await.unwrap(), b"body{}");
    }

    #[test]
    fn test_from_properties() {
        let props = Properties::new()
            .with(keys::BASE_PATH, "/statics")
            .with(keys::CONTENT_BASED_VERSION, "true");
        let source = FilesystemSource::from_properties(&props).unwrap();
        assert_eq!(source.strategy, VersionStrategy::ContentHash);

        let bad = Properties::new()
            .with(keys::BASE_PATH, "/statics")
            .with(keys::CACHE, "true");
        assert!(FilesystemSource::from_properties(&bad).is_err());
    }
}
