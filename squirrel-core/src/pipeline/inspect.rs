//! Line inspection stage: reference extraction for text nuts.
//!
//! Inspectors scan each line of a text nut for statements referencing other
//! assets (CSS `@import`, Javascript `sourceMappingURL`). Every referenced
//! asset is pulled through the pipeline of its own type (with aggregation,
//! inspection and caching skipped for that sub-request) and attached to the
//! inspected nut as a referenced nut.

use async_trait::async_trait;
use futures::future::BoxFuture;
use regex::{Captures, Regex};

use crate::config::{keys, Properties};
use crate::core::{Result, SquirrelError};
use crate::nut::{Nut, NutType};
use crate::pipeline::request::PipelineRequest;
use crate::pipeline::stage::{EngineType, NodeStage};

/// Engine types excluded when a referenced nut re-enters the pipeline.
const REENTRY_SKIP: &[EngineType] = &[
    EngineType::Aggregator,
    EngineType::Cache,
    EngineType::Inspector,
];

/// Inspects single lines of a text nut.
pub trait LineInspector: Send + Sync {
    /// The pattern whose matches this inspector handles.
    fn pattern(&self) -> &Regex;

    /// Rewrites one match. Returns the replacement text and, when the match
    /// references another asset, its path relative to the inspected nut.
    fn rewrite(&self, caps: &Captures<'_>) -> (String, Option<String>);
}

/// Extracts the targets of CSS `@import` statements.
pub struct CssImportInspector {
    pattern: Regex,
}

impl CssImportInspector {
    /// Creates the inspector.
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(
                r#"@import\s+(?:url\(\s*)?["']?([^"')\s;]+)["']?\s*\)?\s*;?"#,
            )
            .expect("hardcoded pattern"),
        }
    }
}

impl Default for CssImportInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl LineInspector for CssImportInspector {
    fn pattern(&self) -> &Regex {
        &self.pattern
    }

    fn rewrite(&self, caps: &Captures<'_>) -> (String, Option<String>) {
        (caps[0].to_string(), Some(caps[1].to_string()))
    }
}

/// Extracts the targets of Javascript `sourceMappingURL` comments.
pub struct SourceMapInspector {
    pattern: Regex,
}

impl SourceMapInspector {
    /// Creates the inspector.
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(r"//[#@]\s*sourceMappingURL=(\S+)")
                .expect("hardcoded pattern"),
        }
    }
}

impl Default for SourceMapInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl LineInspector for SourceMapInspector {
    fn pattern(&self) -> &Regex {
        &self.pattern
    }

    fn rewrite(&self, caps: &Captures<'_>) -> (String, Option<String>) {
        (caps[0].to_string(), Some(caps[1].to_string()))
    }
}

/// Runs a set of [`LineInspector`]s over every text nut of a request.
pub struct TextInspectorStage {
    enabled: bool,
    types: Vec<NutType>,
    inspectors: Vec<Box<dyn LineInspector>>,
}

impl TextInspectorStage {
    /// Supported configuration keys.
    pub const SUPPORTED_KEYS: &'static [&'static str] = &[keys::INSPECT, keys::CHARSET];

    /// Creates a stage over the given asset types and inspectors.
    pub fn new(types: Vec<NutType>, inspectors: Vec<Box<dyn LineInspector>>) -> Self {
        Self {
            enabled: true,
            types,
            inspectors,
        }
    }

    /// The default CSS inspector (`@import` extraction).
    pub fn css_defaults() -> Self {
        Self::new(vec![NutType::Css], vec![Box::new(CssImportInspector::new())])
    }

    /// The default Javascript inspector (source map extraction).
    pub fn javascript_defaults() -> Self {
        Self::new(
            vec![NutType::Javascript],
            vec![Box::new(SourceMapInspector::new())],
        )
    }

    /// Applies a property bag, honoring [`keys::INSPECT`] and
    /// [`keys::CHARSET`]. Only UTF-8 content is supported.
    pub fn configure(mut self, props: &Properties) -> Result<Self> {
        props.validate("text inspector", Self::SUPPORTED_KEYS)?;
        self.enabled = props.bool_or(keys::INSPECT, true)?;
        let charset = props.str_or(keys::CHARSET, "UTF-8");
        if !charset.eq_ignore_ascii_case("utf-8") {
            return Err(SquirrelError::Config {
                message: format!("unsupported charset '{charset}', only UTF-8 is handled"),
            });
        }
        Ok(self)
    }

    /// Inspects one nut, attaching every extracted reference.
    fn inspect<'a>(
        &'a self,
        request: &'a PipelineRequest,
        nut: Nut,
    ) -> BoxFuture<'a, Result<Nut>> {
        Box::pin(async move {
            let text = nut.open_text().await?;
            let location = match nut.name().rfind('/') {
                Some(index) => nut.name()[..index].to_string(),
                None => String::new(),
            };

            let mut referenced = Vec::new();
            let mut out = String::with_capacity(text.len());
            for line in text.lines() {
                let mut current = line.to_string();
                for inspector in &self.inspectors {
                    let mut found = Vec::new();
                    current = inspector
                        .pattern()
                        .replace_all(&current, |caps: &Captures| {
                            let (replacement, path) = inspector.rewrite(caps);
                            if let Some(path) = path {
                                found.push(path);
                            }
                            replacement
                        })
                        .into_owned();

                    for path in found {
                        referenced.extend(self.extract(request, &location, &path).await?);
                    }
                }
                out.push_str(&current);
                out.push('\n');
            }

            let mut inspected = nut.with_bytes(out);
            for reference in referenced {
                inspected = inspected.with_referenced(reference);
            }
            Ok(inspected)
        })
    }

    /// Creates the nut referenced at `path` (relative to `location`) and
    /// pulls it through the chain of its type.
    async fn extract(
        &self,
        request: &PipelineRequest,
        location: &str,
        path: &str,
    ) -> Result<Vec<Nut>> {
        let Some(child_type) = NutType::from_path(path) else {
            return Ok(Vec::new());
        };
        let Some(source) = request.heap().source() else {
            return Ok(Vec::new());
        };

        let scoped = source.with_root_path(location);
        let version = scoped.version_number(path).await?;
        let name = if location.is_empty() {
            path.to_string()
        } else {
            format!("{location}/{path}")
        };
        tracing::debug!(nut = %name, "extracted referenced nut");
        let extracted = Nut::lazy(&name, child_type, &version, scoped, path);

        let sub = request.with_skip(REENTRY_SKIP);
        let results = match sub.chain_for(child_type) {
            Some(chain) => chain.run(&sub, vec![extracted], false).await?,
            None => vec![extracted],
        };

        // Extracted stylesheets can import further ones.
        let mut out = Vec::with_capacity(results.len());
        for result in results {
            if result.nut_type() == NutType::Css {
                out.push(self.inspect(request, result).await?);
            } else {
                out.push(result);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl NodeStage for TextInspectorStage {
    fn engine_type(&self) -> EngineType {
        EngineType::Inspector
    }

    fn nut_types(&self) -> &[NutType] {
        &self.types
    }

    fn works(&self) -> bool {
        self.enabled
    }

    fn mandatory_in_best_effort(&self) -> bool {
        // References must resolve even on the fast path.
        true
    }

    async fn transform(&self, request: &PipelineRequest, nuts: Vec<Nut>) -> Result<Vec<Nut>> {
        let mut out = Vec::with_capacity(nuts.len());
        for nut in nuts {
            out.push(self.inspect(request, nut).await?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::nut::Heap;
    use crate::pipeline::chain::ChainMap;
    use crate::source::MemorySource;

    async fn css_request(paths: &[(&str, &str)], root: &str) -> PipelineRequest {
        let source = MemorySource::new("mem");
        for (path, content) in paths {
            source.put(path, *content, 1);
        }
        let heap = Heap::new("h", Some(Arc::new(source)), vec![root.to_string()]).unwrap();
        let nuts = heap.create_nuts().await.unwrap();
        PipelineRequest::new("wf", heap, nuts, Arc::new(ChainMap::new()))
    }

    #[tokio::test]
    async fn test_import_extraction_attaches_reference() {
        let request = css_request(
            &[
                ("main.css", "@import url(\"extra.css\");\nbody{}"),
                ("extra.css", "h1{}"),
            ],
            "main.css",
        )
        .await;

        let stage = TextInspectorStage::css_defaults();
        let out = stage
            .transform(&request, request.nuts().to_vec())
            .await
            .unwrap();

        assert_eq!(out.len(), 1);
        let referenced = out[0].referenced();
        assert_eq!(referenced.len(), 1);
        assert_eq!(referenced[0].name(), "extra.css");
        assert_eq!(referenced[0].open_text().await.unwrap(), "h1{}\n");
    }

    #[tokio::test]
    async fn test_imports_resolve_relative_to_nut_location() {
        let request = css_request(
            &[
                ("css/main.css", "@import \"deep/x.css\";"),
                ("css/deep/x.css", "p{}"),
            ],
            "css/main.css",
        )
        .await;

        let stage = TextInspectorStage::css_defaults();
        let out = stage
            .transform(&request, request.nuts().to_vec())
            .await
            .unwrap();

        assert_eq!(out[0].referenced()[0].name(), "css/deep/x.css");
    }

    #[tokio::test]
    async fn test_recursive_import_chain() {
        let request = css_request(
            &[
                ("a.css", "@import \"b.css\";"),
                ("b.css", "@import \"c.css\";"),
                ("c.css", "i{}"),
            ],
            "a.css",
        )
        .await;

        let stage = TextInspectorStage::css_defaults();
        let out = stage
            .transform(&request, request.nuts().to_vec())
            .await
            .unwrap();

        let b = &out[0].referenced()[0];
        assert_eq!(b.name(), "b.css");
        assert_eq!(b.referenced()[0].name(), "c.css");
    }

    #[tokio::test]
    async fn test_source_map_extraction() {
        let source = MemorySource::new("mem");
        source.put("app.js", "var a;\n//# sourceMappingURL=app.js.map", 1);
        source.put("app.js.map", "{}", 1);
        let heap =
            Heap::new("h", Some(Arc::new(source)), vec!["app.js".to_string()]).unwrap();
        let nuts = heap.create_nuts().await.unwrap();
        let request = PipelineRequest::new("wf", heap, nuts, Arc::new(ChainMap::new()));

        let stage = TextInspectorStage::javascript_defaults();
        let out = stage
            .transform(&request, request.nuts().to_vec())
            .await
            .unwrap();

        // `.map` is not a known asset type, so the statement is kept but no
        // nut is extracted.
        assert!(out[0].referenced().is_empty());
        assert!(out[0]
            .open_text()
            .await
            .unwrap()
            .contains("sourceMappingURL"));
    }

    #[tokio::test]
    async fn test_missing_import_target_is_stream_error() {
        let request = css_request(&[("main.css", "@import \"gone.css\";")], "main.css").await;
        let stage = TextInspectorStage::css_defaults();
        let err = stage
            .transform(&request, request.nuts().to_vec())
            .await
            .unwrap_err();
        assert_eq!(err.category(), "stream");
    }

    #[test]
    fn test_configure_rejects_unknown_charset() {
        let props = Properties::new().with(keys::CHARSET, "ISO-8859-1");
        assert!(TextInspectorStage::css_defaults().configure(&props).is_err());
    }
}
