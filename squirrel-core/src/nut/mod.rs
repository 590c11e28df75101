//! The nut data model: single asset units flowing through the pipeline.

pub mod heap;

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::core::{Result, SquirrelError};
use crate::source::ResourceSource;

pub use heap::{Heap, HeapListener};

/// Asset type of a nut, derived from its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NutType {
    /// Cascading style sheets (`.css`).
    Css,
    /// Javascript sources (`.js`).
    Javascript,
    /// PNG images (`.png`).
    Png,
    /// HTML documents (`.html`, `.htm`).
    Html,
}

impl NutType {
    /// Derives the asset type from a path's extension.
    pub fn from_path(path: &str) -> Option<Self> {
        let extension = path.rsplit('.').next()?;
        match extension.to_ascii_lowercase().as_str() {
            "css" => Some(NutType::Css),
            "js" => Some(NutType::Javascript),
            "png" => Some(NutType::Png),
            "html" | "htm" => Some(NutType::Html),
            _ => None,
        }
    }

    /// Canonical extension for the type.
    pub fn extension(&self) -> &'static str {
        match self {
            NutType::Css => "css",
            NutType::Javascript => "js",
            NutType::Png => "png",
            NutType::Html => "html",
        }
    }

    /// Whether assets of this type are text.
    pub fn is_text(&self) -> bool {
        !matches!(self, NutType::Png)
    }
}

impl fmt::Display for NutType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Content of a nut: either still sitting in its source or fully buffered.
#[derive(Clone)]
enum NutContent {
    Lazy {
        source: Arc<dyn ResourceSource>,
        path: String,
    },
    Bytes(Arc<[u8]>),
}

/// A single asset unit.
///
/// A nut is immutable once a stage has finalized it; stages produce new nuts
/// rather than mutating their inputs. The `referenced` list holds nuts
/// extracted out of this one (a CSS `@import` target, a source map), the
/// `originals` list the pre-transform inputs of a combined nut (aggregate
/// members, sprite tiles). Both are back-references: a referenced nut is
/// independently reachable and cacheable.
#[derive(Clone)]
pub struct Nut {
    name: String,
    nut_type: NutType,
    version: String,
    content: NutContent,
    cacheable: bool,
    aggregatable: bool,
    text_compressible: bool,
    binary_compressible: bool,
    referenced: Vec<Nut>,
    originals: Vec<Nut>,
}

impl Nut {
    /// Creates a nut whose bytes are read from a source on demand.
    pub fn lazy(
        name: &str,
        nut_type: NutType,
        version: &str,
        source: Arc<dyn ResourceSource>,
        path: &str,
    ) -> Self {
        Self::with_content(
            name,
            nut_type,
            version,
            NutContent::Lazy {
                source,
                path: path.to_string(),
            },
        )
    }

    /// Creates a nut from fully buffered bytes.
    pub fn from_bytes(
        name: &str,
        nut_type: NutType,
        version: &str,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self::with_content(
            name,
            nut_type,
            version,
            NutContent::Bytes(Arc::from(bytes.into())),
        )
    }

    fn with_content(name: &str, nut_type: NutType, version: &str, content: NutContent) -> Self {
        Self {
            name: name.to_string(),
            nut_type,
            version: version.to_string(),
            content,
            cacheable: true,
            aggregatable: nut_type.is_text(),
            text_compressible: nut_type.is_text(),
            binary_compressible: !nut_type.is_text(),
            referenced: Vec::new(),
            originals: Vec::new(),
        }
    }

    /// Logical name of the nut.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Asset type.
    pub fn nut_type(&self) -> NutType {
        self.nut_type
    }

    /// Opaque version token.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Whether the nut may be stored in a cache entry.
    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    /// Whether the nut may be merged into an aggregate.
    pub fn is_aggregatable(&self) -> bool {
        self.aggregatable
    }

    /// Whether text compression applies.
    pub fn is_text_compressible(&self) -> bool {
        self.text_compressible
    }

    /// Whether binary compression applies.
    pub fn is_binary_compressible(&self) -> bool {
        self.binary_compressible
    }

    /// Nuts extracted from this one while it was processed.
    pub fn referenced(&self) -> &[Nut] {
        &self.referenced
    }

    /// Pre-transform inputs of a combined nut.
    pub fn originals(&self) -> &[Nut] {
        &self.originals
    }

    /// Sets the cacheable flag.
    pub fn with_cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    /// Sets the aggregatable flag.
    pub fn with_aggregatable(mut self, aggregatable: bool) -> Self {
        self.aggregatable = aggregatable;
        self
    }

    /// Attaches a referenced nut.
    pub fn with_referenced(mut self, nut: Nut) -> Self {
        self.referenced.push(nut);
        self
    }

    /// Attaches the pre-transform originals.
    pub fn with_originals(mut self, originals: Vec<Nut>) -> Self {
        self.originals = originals;
        self
    }

    /// Returns a copy whose name carries the given path prefix, marking a
    /// variant (e.g. a best-effort rendition) of the same logical asset.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.name = format!("{prefix}/{}", self.name);
        self
    }

    /// Returns a copy with replaced, buffered content. Name, version, flags
    /// and attached nuts are preserved; stages use this to emit the
    /// transformed rendition of an input nut.
    pub fn with_bytes(&self, bytes: impl Into<Vec<u8>>) -> Self {
        let mut copy = self.clone();
        copy.content = NutContent::Bytes(Arc::from(bytes.into()));
        copy
    }

    /// Opens the nut and returns its bytes.
    ///
    /// Lazy nuts hit their source on every call; see
    /// [`Nut::into_buffered`] for the cache-friendly form.
    pub async fn open(&self) -> Result<Arc<[u8]>> {
        match &self.content {
            NutContent::Bytes(bytes) => Ok(bytes.clone()),
            NutContent::Lazy { source, path } => {
                Ok(Arc::from(source.open(path).await?))
            },
        }
    }

    /// Opens the nut as UTF-8 text.
    pub async fn open_text(&self) -> Result<String> {
        let bytes = self.open().await?;
        String::from_utf8(bytes.to_vec()).map_err(|_| SquirrelError::Stream {
            path: self.name.clone(),
            message: "content is not valid UTF-8".to_string(),
        })
    }

    /// Converts the nut (and, recursively, its referenced nuts) into fully
    /// buffered form so that cache entries never hold open source handles.
    pub fn into_buffered(self) -> BoxFuture<'static, Result<Nut>> {
        async move {
            let Nut {
                name,
                nut_type,
                version,
                content,
                cacheable,
                aggregatable,
                text_compressible,
                binary_compressible,
                referenced,
                originals,
            } = self;

            let bytes = match content {
                NutContent::Bytes(bytes) => bytes,
                NutContent::Lazy { source, path } => Arc::from(source.open(&path).await?),
            };

            let mut buffered_refs = Vec::with_capacity(referenced.len());
            for reference in referenced {
                buffered_refs.push(reference.into_buffered().await?);
            }

            Ok(Nut {
                name,
                nut_type,
                version,
                content: NutContent::Bytes(bytes),
                cacheable,
                aggregatable,
                text_compressible,
                binary_compressible,
                referenced: buffered_refs,
                originals,
            })
        }
        .boxed()
    }
}

impl fmt::Debug for Nut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nut")
            .field("name", &self.name)
            .field("type", &self.nut_type)
            .field("version", &self.version)
            .field("referenced", &self.referenced.len())
            .finish()
    }
}

/// Finds a nut by name in the given list, searching referenced nuts
/// recursively.
pub fn find_by_name(nuts: &[Nut], name: &str) -> Option<Nut> {
    for nut in nuts {
        if nut.name() == name {
            return Some(nut.clone());
        }
        if let Some(found) = find_by_name(nut.referenced(), name) {
            return Some(found);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    #[test]
    fn test_nut_type_from_path() {
        assert_eq!(NutType::from_path("a/b/style.css"), Some(NutType::Css));
        assert_eq!(NutType::from_path("app.JS"), Some(NutType::Javascript));
        assert_eq!(NutType::from_path("logo.png"), Some(NutType::Png));
        assert_eq!(NutType::from_path("index.htm"), Some(NutType::Html));
        assert_eq!(NutType::from_path("data.json"), None);
    }

    #[test]
    fn test_default_flags_follow_type() {
        let js = Nut::from_bytes("a.js", NutType::Javascript, "1", b"".to_vec());
        assert!(js.is_aggregatable());
        assert!(js.is_text_compressible());
        assert!(!js.is_binary_compressible());

        let png = Nut::from_bytes("a.png", NutType::Png, "1", b"".to_vec());
        assert!(!png.is_text_compressible());
        assert!(png.is_binary_compressible());
    }

    #[test]
    fn test_prefix() {
        let nut = Nut::from_bytes("a.js", NutType::Javascript, "1", b"".to_vec());
        assert_eq!(nut.with_prefix("best-effort").name(), "best-effort/a.js");
    }

    #[tokio::test]
    async fn test_lazy_open_reads_source_each_time() {
        let source = MemorySource::new("mem");
        source.put("a.js", "var a;", 1);
        let nut = Nut::lazy(
            "a.js",
            NutType::Javascript,
            "1",
            Arc::new(source.clone()),
            "a.js",
        );

        assert_eq!(&*nut.open().await.unwrap(), b"var a;");
        assert_eq!(&*nut.open().await.unwrap(), b"var a;");
        assert_eq!(source.read_count("a.js"), 2);
    }

    #[tokio::test]
    async fn test_into_buffered_detaches_from_source() {
        let source = MemorySource::new("mem");
        source.put("a.js", "var a;", 1);
        source.put("b.js", "var b;", 1);

        let reference = Nut::lazy(
            "b.js",
            NutType::Javascript,
            "1",
            Arc::new(source.clone()),
            "b.js",
        );
        let nut = Nut::lazy(
            "a.js",
            NutType::Javascript,
            "1",
            Arc::new(source.clone()),
            "a.js",
        )
        .with_referenced(reference);

        let buffered = nut.into_buffered().await.unwrap();
        assert_eq!(source.read_count("a.js"), 1);
        assert_eq!(source.read_count("b.js"), 1);

        buffered.open().await.unwrap();
        buffered.referenced()[0].open().await.unwrap();
        assert_eq!(source.read_count("a.js"), 1);
        assert_eq!(source.read_count("b.js"), 1);
    }

    #[test]
    fn test_find_by_name_searches_references() {
        let inner = Nut::from_bytes("deep.css", NutType::Css, "1", b"".to_vec());
        let mid = Nut::from_bytes("mid.css", NutType::Css, "1", b"".to_vec())
            .with_referenced(inner);
        let top = Nut::from_bytes("top.css", NutType::Css, "1", b"".to_vec())
            .with_referenced(mid);

        let nuts = vec![top];
        assert!(find_by_name(&nuts, "deep.css").is_some());
        assert!(find_by_name(&nuts, "top.css").is_some());
        assert!(find_by_name(&nuts, "missing.css").is_none());
    }
}
