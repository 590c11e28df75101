//! Stage contract for pipeline transformation steps.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::Result;
use crate::nut::{Nut, NutType};
use crate::pipeline::request::PipelineRequest;

/// Execution category of a stage.
///
/// The category is what re-entrant sub-requests use to skip whole classes of
/// work (an inspector pulling an extracted nut through the pipeline skips
/// aggregation, inspection and caching for that sub-request).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum EngineType {
    /// Content inspection and reference extraction.
    Inspector,
    /// Merging many nuts into one.
    Aggregator,
    /// Text minification.
    Minification,
    /// Binary (e.g. gzip) compression.
    BinaryCompression,
    /// The cache head.
    Cache,
}

/// One transformation step in a per-type chain.
///
/// A node stage declares the asset types it applies to and its execution
/// category; the chain decides when it runs. Implementations transform the
/// input list and return the transformed list; they never call their
/// successor themselves.
#[async_trait]
pub trait NodeStage: Send + Sync {
    /// Execution category of this stage.
    fn engine_type(&self) -> EngineType;

    /// Asset types this stage applies to.
    fn nut_types(&self) -> &[NutType];

    /// Whether the stage is enabled. A disabled stage is transparent: the
    /// chain forwards its input unchanged.
    fn works(&self) -> bool {
        true
    }

    /// Whether this stage still runs on the reduced best-effort path.
    fn mandatory_in_best_effort(&self) -> bool {
        false
    }

    /// Transforms the given nuts.
    async fn transform(&self, request: &PipelineRequest, nuts: Vec<Nut>) -> Result<Vec<Nut>>;
}
