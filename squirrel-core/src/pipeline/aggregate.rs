//! Text aggregation stage.

use async_trait::async_trait;

use crate::config::{keys, Properties};
use crate::core::Result;
use crate::nut::{Nut, NutType};
use crate::pipeline::request::PipelineRequest;
use crate::pipeline::stage::{EngineType, NodeStage};
use crate::source::content_hash;

/// Merges the aggregatable text nuts of a request into a single nut, so one
/// HTTP round trip serves the whole collection.
///
/// Non-aggregatable nuts pass through untouched. The merged nut keeps the
/// inputs in its originals list.
pub struct TextAggregatorStage {
    enabled: bool,
    types: Vec<NutType>,
}

impl TextAggregatorStage {
    /// Supported configuration keys.
    pub const SUPPORTED_KEYS: &'static [&'static str] = &[keys::AGGREGATE];

    /// Creates an enabled aggregator for CSS and Javascript.
    pub fn new() -> Self {
        Self {
            enabled: true,
            types: vec![NutType::Css, NutType::Javascript],
        }
    }

    /// Builds an aggregator from a property bag, honoring
    /// [`keys::AGGREGATE`].
    pub fn from_properties(props: &Properties) -> Result<Self> {
        props.validate("text aggregator", Self::SUPPORTED_KEYS)?;
        let mut stage = Self::new();
        stage.enabled = props.bool_or(keys::AGGREGATE, true)?;
        Ok(stage)
    }
}

impl Default for TextAggregatorStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeStage for TextAggregatorStage {
    fn engine_type(&self) -> EngineType {
        EngineType::Aggregator
    }

    fn nut_types(&self) -> &[NutType] {
        &self.types
    }

    fn works(&self) -> bool {
        self.enabled
    }

    async fn transform(&self, request: &PipelineRequest, nuts: Vec<Nut>) -> Result<Vec<Nut>> {
        let (mergeable, passthrough): (Vec<Nut>, Vec<Nut>) = nuts
            .into_iter()
            .partition(|nut| nut.is_aggregatable() && nut.nut_type().is_text());

        if mergeable.is_empty() {
            return Ok(passthrough);
        }

        let nut_type = mergeable[0].nut_type();
        let mut buffer = Vec::new();
        for nut in &mergeable {
            buffer.extend_from_slice(&nut.open().await?);
            buffer.push(b'\n');
        }

        let name = format!("aggregate.{}", nut_type.extension());
        let version = content_hash(&buffer);
        tracing::debug!(
            workflow = request.workflow_id(),
            merged = mergeable.len(),
            nut = %name,
            "aggregated text nuts"
        );

        let aggregate =
            Nut::from_bytes(&name, nut_type, &version, buffer).with_originals(mergeable);

        let mut out = vec![aggregate];
        out.extend(passthrough);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::nut::Heap;
    use crate::pipeline::chain::ChainMap;

    fn request() -> PipelineRequest {
        let heap = Heap::new("h", None, Vec::new()).unwrap();
        PipelineRequest::new("wf", heap, Vec::new(), Arc::new(ChainMap::new()))
    }

    #[tokio::test]
    async fn test_merges_aggregatable_nuts() {
        let stage = TextAggregatorStage::new();
        let nuts = vec![
            Nut::from_bytes("a.js", NutType::Javascript, "1", b"var a;".to_vec()),
            Nut::from_bytes("b.js", NutType::Javascript, "1", b"var b;".to_vec()),
        ];

        let out = stage.transform(&request(), nuts).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name(), "aggregate.js");
        assert_eq!(out[0].originals().len(), 2);
        assert_eq!(&*out[0].open().await.unwrap(), b"var a;\nvar b;\n");
    }

    #[tokio::test]
    async fn test_non_aggregatable_passes_through() {
        let stage = TextAggregatorStage::new();
        let pinned =
            Nut::from_bytes("pin.js", NutType::Javascript, "1", b"var p;".to_vec())
                .with_aggregatable(false);
        let nuts = vec![
            pinned,
            Nut::from_bytes("a.js", NutType::Javascript, "1", b"var a;".to_vec()),
        ];

        let out = stage.transform(&request(), nuts).await.unwrap();
        let names: Vec<_> = out.iter().map(|n| n.name()).collect();
        assert_eq!(names, vec!["aggregate.js", "pin.js"]);
    }

    #[test]
    fn test_from_properties() {
        let props = Properties::new().with(keys::AGGREGATE, "false");
        let stage = TextAggregatorStage::from_properties(&props).unwrap();
        assert!(!stage.works());

        let bad = Properties::new().with(keys::CACHE, "true");
        assert!(TextAggregatorStage::from_properties(&bad).is_err());
    }
}
