//! Pipeline requests and their cache identity.

use std::sync::Arc;

use crate::nut::{Heap, Nut, NutType};
use crate::pipeline::chain::{Chain, ChainMap};
use crate::pipeline::stage::EngineType;

/// Name prefix marking the partially processed variant of an asset.
pub const BEST_EFFORT_PREFIX: &str = "best-effort";

/// Cache and in-flight identity of a request.
///
/// Two requests with the same key are the same unit of work: they share the
/// cache entry and any in-flight computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    workflow_id: String,
    variant: Option<String>,
    skip: Vec<EngineType>,
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.workflow_id)?;
        if let Some(variant) = &self.variant {
            write!(f, "#{variant}")?;
        }
        for skipped in &self.skip {
            write!(f, "!{skipped:?}")?;
        }
        Ok(())
    }
}

/// A request to process the nuts of one workflow.
#[derive(Clone)]
pub struct PipelineRequest {
    workflow_id: String,
    heap: Arc<Heap>,
    nuts: Vec<Nut>,
    variant: Option<String>,
    skip: Vec<EngineType>,
    chains: Arc<ChainMap>,
}

impl PipelineRequest {
    /// Creates a request over the given heap nuts and chains.
    pub fn new(
        workflow_id: &str,
        heap: Arc<Heap>,
        nuts: Vec<Nut>,
        chains: Arc<ChainMap>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            heap,
            nuts,
            variant: None,
            skip: Vec::new(),
            chains,
        }
    }

    /// Workflow this request targets.
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// The heap backing the request.
    pub fn heap(&self) -> &Arc<Heap> {
        &self.heap
    }

    /// The nuts to process.
    pub fn nuts(&self) -> &[Nut] {
        &self.nuts
    }

    /// Cache identity of this request.
    pub fn key(&self) -> RequestKey {
        RequestKey {
            workflow_id: self.workflow_id.clone(),
            variant: self.variant.clone(),
            skip: self.skip.clone(),
        }
    }

    /// Returns a copy carrying different nuts.
    pub fn with_nuts(&self, nuts: Vec<Nut>) -> Self {
        Self {
            nuts,
            ..self.clone()
        }
    }

    /// Returns a copy tagged with the given variant (e.g. best-effort).
    pub fn with_variant(&self, variant: Option<&str>) -> Self {
        Self {
            variant: variant.map(str::to_string),
            ..self.clone()
        }
    }

    /// Returns a copy whose skip set additionally excludes the given
    /// engine types. The set stays sorted and deduplicated so equal skip
    /// sets produce equal keys.
    pub fn with_skip(&self, types: &[EngineType]) -> Self {
        let mut skip = self.skip.clone();
        skip.extend_from_slice(types);
        skip.sort();
        skip.dedup();
        Self {
            skip,
            ..self.clone()
        }
    }

    /// Whether stages of the given type are excluded from this request.
    pub fn should_skip(&self, engine_type: EngineType) -> bool {
        self.skip.binary_search(&engine_type).is_ok()
    }

    /// The chain configured for the given asset type, if any.
    pub fn chain_for(&self, nut_type: NutType) -> Option<&Chain> {
        self.chains.chain_for(nut_type)
    }

    /// The full chain table of the request.
    pub fn chains(&self) -> &Arc<ChainMap> {
        &self.chains
    }

    /// Groups the request nuts by asset type, preserving the order in which
    /// each type first appears.
    pub fn nuts_by_type(&self) -> Vec<(NutType, Vec<Nut>)> {
        let mut groups: Vec<(NutType, Vec<Nut>)> = Vec::new();
        for nut in &self.nuts {
            match groups.iter_mut().find(|(t, _)| *t == nut.nut_type()) {
                Some((_, bucket)) => bucket.push(nut.clone()),
                None => groups.push((nut.nut_type(), vec![nut.clone()])),
            }
        }
        groups
    }
}

impl std::fmt::Debug for PipelineRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRequest")
            .field("workflow_id", &self.workflow_id)
            .field("nuts", &self.nuts.len())
            .field("variant", &self.variant)
            .field("skip", &self.skip)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nut::NutType;

    fn request() -> PipelineRequest {
        let heap = Heap::new("h", None, Vec::new()).unwrap();
        PipelineRequest::new("wf", heap, Vec::new(), Arc::new(ChainMap::new()))
    }

    #[test]
    fn test_keys_equal_for_same_parameters() {
        let base = request();
        let a = base
            .with_variant(Some(BEST_EFFORT_PREFIX))
            .with_skip(&[EngineType::Cache, EngineType::Aggregator]);
        let b = base
            .with_variant(Some(BEST_EFFORT_PREFIX))
            .with_skip(&[EngineType::Aggregator, EngineType::Cache]);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_keys_differ_by_variant_and_skip() {
        let base = request();
        assert_ne!(
            base.key(),
            base.with_variant(Some(BEST_EFFORT_PREFIX)).key()
        );
        assert_ne!(base.key(), base.with_skip(&[EngineType::Cache]).key());
    }

    #[test]
    fn test_should_skip() {
        let req = request().with_skip(&[EngineType::Cache, EngineType::Inspector]);
        assert!(req.should_skip(EngineType::Cache));
        assert!(req.should_skip(EngineType::Inspector));
        assert!(!req.should_skip(EngineType::Minification));
    }

    #[test]
    fn test_nuts_by_type_groups_in_first_seen_order() {
        let heap = Heap::new("h", None, Vec::new()).unwrap();
        let nuts = vec![
            Nut::from_bytes("a.js", NutType::Javascript, "1", b"".to_vec()),
            Nut::from_bytes("s.css", NutType::Css, "1", b"".to_vec()),
            Nut::from_bytes("b.js", NutType::Javascript, "1", b"".to_vec()),
        ];
        let req = PipelineRequest::new("wf", heap, nuts, Arc::new(ChainMap::new()));

        let groups = req.nuts_by_type();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, NutType::Javascript);
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, NutType::Css);
    }
}
