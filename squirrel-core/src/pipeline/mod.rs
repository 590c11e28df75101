//! Pipeline model: typed stage chains with a caching head.
//!
//! Each asset type gets an ordered chain of [`NodeStage`]s; the
//! [`CacheEngine`] sits at the head of every workflow and decides whether
//! the chains run at all. Requests carry a skip set so a stage re-invoking
//! the pipeline on an extracted nut never re-enters the cache or the
//! inspectors.

pub mod aggregate;
pub mod cache;
pub mod chain;
pub mod inspect;
pub mod minify;
pub mod request;
pub mod stage;

pub use aggregate::TextAggregatorStage;
pub use cache::{
    CacheBackend, CacheEngine, CacheResult, MemoryCacheStore, MokaCacheStore, ResultMap,
};
pub use chain::{run_chains, Chain, ChainMap};
pub use inspect::{
    CssImportInspector, LineInspector, SourceMapInspector, TextInspectorStage,
};
pub use minify::TextMinifierStage;
pub use request::{PipelineRequest, RequestKey, BEST_EFFORT_PREFIX};
pub use stage::{EngineType, NodeStage};
