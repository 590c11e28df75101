//! # Squirrel Core
//!
//! Web-asset processing pipeline: fetches raw assets ("nuts": JS, CSS and
//! image resources) from pluggable sources, runs them through ordered chains of
//! transformation stages, caches the results and invalidates them when an
//! underlying source changes.
//!
//! ## Architecture
//!
//! - **Sources** turn logical paths into versioned bytes; **heaps** group
//!   paths into named, possibly composed collections.
//! - **Stages** transform lists of nuts and are folded, per asset type,
//!   into ordered **chains**; the **cache engine** heads every chain and
//!   deduplicates concurrent computations, optionally answering cold
//!   requests from a fast best-effort path that is upgraded in the
//!   background.
//! - The **context builder** assembles sources, filters, stages, heaps,
//!   templates and workflows under mutual-exclusion tags into an
//!   executable [`Context`].
//! - The **polling scheduler** watches source timestamps and drives cache
//!   invalidation through heap update signals.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use squirrel_core::{config::Properties, ContextBuilder, MemorySource};
//!
//! # async fn example() -> squirrel_core::Result<()> {
//! let source = MemorySource::new("statics");
//! source.put("a.js", "var a;", 1);
//!
//! let mut builder = ContextBuilder::new();
//! builder
//!     .tag("boot")
//!     .register_source("statics", Arc::new(source), &Properties::new())?
//!     .heap("scripts", Some("statics"), &[], &["a.js"])
//!     .await?
//!     .release_tag();
//!
//! let context = builder.build();
//! let nuts = context.process("scripts").await?;
//! assert!(!nuts.is_empty());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Flat string-keyed configuration surface.
pub mod config;
/// Tag-scoped configuration assembly.
pub mod context;
/// Core error types.
pub mod core;
/// Path filters applied to declared heap paths.
pub mod filter;
/// The nut data model and heaps.
pub mod nut;
/// Pipeline stages, chains and the cache engine.
pub mod pipeline;
/// Background change detection.
pub mod polling;
/// Bounded worker pool for background jobs.
pub mod pool;
/// Resource source contract and in-tree backends.
pub mod source;
/// Workflows and workflow templates.
pub mod workflow;

pub use crate::config::Properties;
pub use crate::context::{Context, ContextBuilder, RegisteredStage};
pub use crate::core::{Result, SquirrelError};
pub use crate::filter::{PathFilter, RegexRemoveFilter};
pub use crate::nut::{Heap, HeapListener, Nut, NutType};
pub use crate::pipeline::{
    CacheBackend, CacheEngine, Chain, ChainMap, EngineType, MemoryCacheStore,
    MokaCacheStore, NodeStage, PipelineRequest, RequestKey, TextAggregatorStage,
    TextInspectorStage, TextMinifierStage, BEST_EFFORT_PREFIX,
};
pub use crate::polling::{ChangeListener, PollingScheduler};
pub use crate::pool::WorkerPool;
pub use crate::source::{FilesystemSource, MemorySource, ResourceSource};
pub use crate::workflow::{Workflow, WorkflowTemplate};
