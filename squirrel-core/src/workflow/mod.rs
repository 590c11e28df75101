//! Workflows: the addressable unit of a client request.

use std::sync::Arc;

use crate::core::Result;
use crate::nut::{Heap, Nut};
use crate::pipeline::cache::CacheEngine;
use crate::pipeline::chain::{run_chains, ChainMap};
use crate::pipeline::request::PipelineRequest;
use crate::source::ResourceSource;

/// A reusable bundle of head stage, chains and output sinks, instantiated
/// into one or more workflows.
#[derive(Clone)]
pub struct WorkflowTemplate {
    head: Option<Arc<CacheEngine>>,
    chains: Arc<ChainMap>,
    sinks: Vec<Arc<dyn ResourceSource>>,
}

impl WorkflowTemplate {
    /// Creates a template.
    pub fn new(
        head: Option<Arc<CacheEngine>>,
        chains: Arc<ChainMap>,
        sinks: Vec<Arc<dyn ResourceSource>>,
    ) -> Self {
        Self {
            head,
            chains,
            sinks,
        }
    }

    /// The head cache engine, if any.
    pub fn head(&self) -> Option<&Arc<CacheEngine>> {
        self.head.as_ref()
    }

    /// The per-type chain table.
    pub fn chains(&self) -> &Arc<ChainMap> {
        &self.chains
    }

    /// The output sinks.
    pub fn sinks(&self) -> &[Arc<dyn ResourceSource>] {
        &self.sinks
    }

    /// Instantiates the template over a heap.
    pub fn instantiate(&self, id: &str, heap: Arc<Heap>) -> Workflow {
        Workflow {
            id: id.to_string(),
            head: self.head.clone(),
            chains: self.chains.clone(),
            heap,
            sinks: self.sinks.clone(),
        }
    }
}

/// A heap bound to a chain table and a head cache engine.
#[derive(Clone)]
pub struct Workflow {
    id: String,
    head: Option<Arc<CacheEngine>>,
    chains: Arc<ChainMap>,
    heap: Arc<Heap>,
    sinks: Vec<Arc<dyn ResourceSource>>,
}

impl Workflow {
    /// Creates a workflow.
    pub fn new(
        id: &str,
        head: Option<Arc<CacheEngine>>,
        chains: Arc<ChainMap>,
        heap: Arc<Heap>,
        sinks: Vec<Arc<dyn ResourceSource>>,
    ) -> Self {
        Self {
            id: id.to_string(),
            head,
            chains,
            heap,
            sinks,
        }
    }

    /// Workflow ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The heap this workflow processes.
    pub fn heap(&self) -> &Arc<Heap> {
        &self.heap
    }

    /// The head cache engine, if any.
    pub fn head(&self) -> Option<&Arc<CacheEngine>> {
        self.head.as_ref()
    }

    /// Builds the pipeline request for this workflow's heap.
    async fn request(&self) -> Result<PipelineRequest> {
        let nuts = self.heap.create_nuts().await?;
        Ok(PipelineRequest::new(
            &self.id,
            self.heap.clone(),
            nuts,
            self.chains.clone(),
        ))
    }

    /// Processes every nut of the heap and returns the results, saving
    /// cacheable outputs to the configured sinks.
    pub async fn process(&self) -> Result<Vec<Nut>> {
        let request = self.request().await?;
        let out = match &self.head {
            Some(cache) => cache.process(&request).await?,
            None => run_chains(&request, false).await?,
        };

        for sink in &self.sinks {
            for nut in &out {
                sink.save(nut).await?;
            }
        }
        Ok(out)
    }

    /// Resolves one logical path through this workflow.
    pub async fn nut(&self, path: &str) -> Result<Option<Nut>> {
        let request = self.request().await?;
        match &self.head {
            Some(cache) => cache.lookup(&request, path).await,
            None => {
                let nuts = run_chains(&request, false).await?;
                Ok(crate::nut::find_by_name(&nuts, path))
            },
        }
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("id", &self.id)
            .field("heap", &self.heap.id())
            .field("cached", &self.head.is_some())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
