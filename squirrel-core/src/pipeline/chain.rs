//! Per-type stage chains.
//!
//! A chain is an explicit ordered list of stages walked with an index
//! cursor; stages never link to each other. Folding configured stages in
//! declaration order is all it takes to build one.

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::Result;
use crate::nut::{Nut, NutType};
use crate::pipeline::request::PipelineRequest;
use crate::pipeline::stage::NodeStage;

/// An ordered sequence of node stages for one asset type.
#[derive(Clone, Default)]
pub struct Chain {
    stages: Vec<Arc<dyn NodeStage>>,
}

impl Chain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a chain holding a single stage.
    pub fn of(stage: Arc<dyn NodeStage>) -> Self {
        Self {
            stages: vec![stage],
        }
    }

    /// Appends `next` after the current tail, returning the longer chain.
    pub fn chain(mut self, next: Arc<dyn NodeStage>) -> Self {
        self.stages.push(next);
        self
    }

    /// The stages in execution order.
    pub fn stages(&self) -> &[Arc<dyn NodeStage>] {
        &self.stages
    }

    /// Runs the chain over the given nuts.
    ///
    /// Stages whose engine type is in the request's skip set and disabled
    /// stages are transparent. On the best-effort path, stages not marked
    /// mandatory are skipped as well.
    pub async fn run(
        &self,
        request: &PipelineRequest,
        nuts: Vec<Nut>,
        best_effort: bool,
    ) -> Result<Vec<Nut>> {
        let mut current = nuts;
        for stage in &self.stages {
            if request.should_skip(stage.engine_type()) {
                tracing::debug!(
                    stage = ?stage.engine_type(),
                    workflow = request.workflow_id(),
                    "stage skipped for this request"
                );
                continue;
            }
            if !stage.works() {
                continue;
            }
            if best_effort && !stage.mandatory_in_best_effort() {
                continue;
            }
            current = stage.transform(request, current).await?;
        }
        Ok(current)
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let types: Vec<_> = self.stages.iter().map(|s| s.engine_type()).collect();
        f.debug_tuple("Chain").field(&types).finish()
    }
}

/// The chain table of a workflow: one chain per asset type.
#[derive(Clone, Default, Debug)]
pub struct ChainMap {
    chains: HashMap<NutType, Chain>,
}

impl ChainMap {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a stage into the chain of every asset type it declares,
    /// appending in declaration order.
    pub fn merge_stage(&mut self, stage: Arc<dyn NodeStage>) {
        for nut_type in stage.nut_types() {
            self.chains
                .entry(*nut_type)
                .or_default()
                .stages
                .push(stage.clone());
        }
    }

    /// Replaces the chain for one asset type.
    pub fn insert(&mut self, nut_type: NutType, chain: Chain) {
        self.chains.insert(nut_type, chain);
    }

    /// The chain configured for the given asset type, if any.
    pub fn chain_for(&self, nut_type: NutType) -> Option<&Chain> {
        self.chains.get(&nut_type)
    }

    /// Whether no chain is configured at all.
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

/// Runs the request nuts through the chains of their types.
///
/// Nuts of a type with no configured chain pass through unchanged; output
/// keeps the per-type grouping order of the input.
pub async fn run_chains(request: &PipelineRequest, best_effort: bool) -> Result<Vec<Nut>> {
    let mut out = Vec::new();
    for (nut_type, nuts) in request.nuts_by_type() {
        match request.chain_for(nut_type) {
            Some(chain) => out.extend(chain.run(request, nuts, best_effort).await?),
            None => out.extend(nuts),
        }
    }
    Ok(out)
}
