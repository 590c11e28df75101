//! Tag-scoped configuration assembly.
//!
//! A [`ContextBuilder`] collects sources, filters, stages, heaps, templates
//! and workflows under the currently active tag, then merges every tag's
//! setting into an executable [`Context`]. Tags exist so a whole batch of
//! settings (say, everything loaded from one configuration file) can be
//! cleared and reloaded in one call.
//!
//! Configuration IDs are global: registering an ID removes any previous
//! entry with that ID from every tag, whoever created it. Clearing a tag
//! only removes what is still associated with that tag.

use std::sync::Arc;

use indexmap::IndexMap;
use regex::Regex;

use crate::config::{keys, Properties};
use crate::core::{Result, SquirrelError};
use crate::filter::PathFilter;
use crate::nut::{Heap, Nut, NutType};
use crate::pipeline::cache::{CacheEngine, MemoryCacheStore};
use crate::pipeline::chain::{Chain, ChainMap};
use crate::pipeline::stage::NodeStage;
use crate::pipeline::{TextAggregatorStage, TextInspectorStage};
use crate::polling::{HeapUpdateNotifier, PollingScheduler};
use crate::pool::WorkerPool;
use crate::source::ResourceSource;
use crate::workflow::{Workflow, WorkflowTemplate};

/// ID of the default text aggregator injected into template chains.
pub const DEFAULT_AGGREGATOR_ID: &str = "default.text-aggregator";
/// ID of the default CSS inspector injected into template chains.
pub const DEFAULT_CSS_INSPECTOR_ID: &str = "default.css-inspector";
/// ID of the default Javascript inspector injected into template chains.
pub const DEFAULT_JS_INSPECTOR_ID: &str = "default.js-inspector";
/// ID of the default cache head.
pub const DEFAULT_CACHE_ID: &str = "default.cache";

/// A stage registered on the builder: either a chain member or a head.
#[derive(Clone)]
pub enum RegisteredStage {
    /// A chain member.
    Node(Arc<dyn NodeStage>),
    /// A head cache engine.
    Head(Arc<CacheEngine>),
}

struct SourceEntry {
    source: Arc<dyn ResourceSource>,
    scheduler: Arc<PollingScheduler>,
}

#[derive(Default)]
struct ContextSetting {
    sources: IndexMap<String, SourceEntry>,
    filters: IndexMap<String, Arc<dyn PathFilter>>,
    stages: IndexMap<String, RegisteredStage>,
    heaps: IndexMap<String, Arc<Heap>>,
    templates: IndexMap<String, WorkflowTemplate>,
    workflows: IndexMap<String, Workflow>,
}

/// Assembles declarative settings into executable workflows.
pub struct ContextBuilder {
    active_tag: Option<String>,
    settings: IndexMap<String, ContextSetting>,
    pool: WorkerPool,
}

impl std::fmt::Debug for ContextBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextBuilder")
            .field("active_tag", &self.active_tag)
            .field("settings", &self.settings.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ContextBuilder {
    /// Creates a builder with a default worker pool.
    pub fn new() -> Self {
        Self::with_pool(WorkerPool::default())
    }

    /// Creates a builder whose components share the given worker pool.
    pub fn with_pool(pool: WorkerPool) -> Self {
        Self {
            active_tag: None,
            settings: IndexMap::new(),
            pool,
        }
    }

    /// Activates a tag: every following mutation is associated with it. An
    /// already active tag is implicitly released.
    pub fn tag(&mut self, name: &str) -> &mut Self {
        tracing::debug!(tag = name, "tag activated");
        self.active_tag = Some(name.to_string());
        self
    }

    /// Releases the active tag.
    ///
    /// # Panics
    ///
    /// Panics when no tag is active: releasing what was never acquired is
    /// a usage bug, not a runtime condition.
    pub fn release_tag(&mut self) -> &mut Self {
        assert!(
            self.active_tag.is_some(),
            "no active tag: call tag() before release_tag()"
        );
        self.active_tag = None;
        self
    }

    /// Removes every setting associated with the tag and stops the polling
    /// schedules of the sources it still owns.
    pub fn clear_tag(&mut self, name: &str) -> &mut Self {
        if let Some(setting) = self.settings.shift_remove(name) {
            for entry in setting.sources.values() {
                entry.scheduler.set_interval(0);
            }
            tracing::info!(tag = name, "tag cleared");
        }
        self
    }

    fn tag_or_panic(&self) -> String {
        self.active_tag
            .clone()
            .expect("no active tag: call tag() before mutating the configuration")
    }

    fn setting_mut(&mut self, tag: &str) -> &mut ContextSetting {
        self.settings.entry(tag.to_string()).or_default()
    }

    /// Registers a resource source under an ID.
    ///
    /// Supported properties: [`keys::POLLING_INTERVAL`] (seconds, 0 keeps
    /// polling off).
    pub fn register_source(
        &mut self,
        id: &str,
        source: Arc<dyn ResourceSource>,
        props: &Properties,
    ) -> Result<&mut Self> {
        let tag = self.tag_or_panic();
        props.validate("resource source", &[keys::POLLING_INTERVAL])?;
        let interval = props.u64_or(keys::POLLING_INTERVAL, 0)?;

        let scheduler = PollingScheduler::new(source.clone(), self.pool.clone());
        if interval > 0 {
            scheduler.set_interval(interval);
        }

        for setting in self.settings.values_mut() {
            setting.sources.shift_remove(id);
        }
        self.setting_mut(&tag)
            .sources
            .insert(id.to_string(), SourceEntry { source, scheduler });
        Ok(self)
    }

    /// Registers a path filter under an ID. Filters apply, in registration
    /// order, to the declared paths of every heap built afterwards.
    pub fn register_filter(&mut self, id: &str, filter: Arc<dyn PathFilter>) -> &mut Self {
        let tag = self.tag_or_panic();
        for setting in self.settings.values_mut() {
            setting.filters.shift_remove(id);
        }
        self.setting_mut(&tag)
            .filters
            .insert(id.to_string(), filter);
        self
    }

    /// Registers a stage under an ID.
    pub fn register_stage(&mut self, id: &str, stage: RegisteredStage) -> &mut Self {
        let tag = self.tag_or_panic();
        for setting in self.settings.values_mut() {
            setting.stages.shift_remove(id);
        }
        self.setting_mut(&tag).stages.insert(id.to_string(), stage);
        self
    }

    /// Registers a chain member stage under an ID.
    pub fn register_node_stage(&mut self, id: &str, stage: Arc<dyn NodeStage>) -> &mut Self {
        self.register_stage(id, RegisteredStage::Node(stage))
    }

    /// Registers a head cache engine under an ID.
    pub fn register_head_stage(&mut self, id: &str, head: Arc<CacheEngine>) -> &mut Self {
        self.register_stage(id, RegisteredStage::Head(head))
    }

    /// Declares a heap.
    ///
    /// Declared paths are filtered through every registered path filter and
    /// resolved against the source registered under `source_id`. Each
    /// `composed_patterns` entry is a regular expression matched against
    /// existing heap IDs; every match joins the composition. Paths without
    /// a resolvable source are a configuration error. Every surviving path
    /// is observed on the source's polling scheduler with the heap as
    /// listener.
    pub async fn heap(
        &mut self,
        id: &str,
        source_id: Option<&str>,
        composed_patterns: &[&str],
        paths: &[&str],
    ) -> Result<&mut Self> {
        let tag = self.tag_or_panic();

        let entry = source_id.and_then(|sid| self.find_source(sid));
        let source = entry.map(|e| e.source.clone());
        let scheduler = entry.map(|e| e.scheduler.clone());

        if !paths.is_empty() && source.is_none() {
            return Err(SquirrelError::Config {
                message: format!(
                    "heap '{id}' declares paths but '{}' resolves to no source; \
                     call register_source() first",
                    source_id.unwrap_or("<none>")
                ),
            });
        }

        let mut path_list: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        for setting in self.settings.values() {
            for filter in setting.filters.values() {
                path_list = filter.filter_paths(path_list);
            }
        }

        let mut composition = Vec::new();
        for pattern in composed_patterns {
            composition.extend(self.matching_heaps(pattern)?);
        }

        for setting in self.settings.values_mut() {
            setting.heaps.shift_remove(id);
        }

        let heap = Heap::composed(id, source, path_list, composition)?;

        if let Some(scheduler) = scheduler {
            let notifier = Arc::new(HeapUpdateNotifier::new(&heap));
            for path in heap.paths() {
                scheduler.observe(path, vec![notifier.clone()]).await?;
            }
        }

        self.setting_mut(&tag).heaps.insert(id.to_string(), heap);
        Ok(self)
    }

    /// Declares a workflow template.
    ///
    /// The chain table starts from the default stages (text aggregator and
    /// per-type inspectors) unless `include_defaults` is false; individual
    /// defaults are dropped by listing their ID in `excluded_defaults`.
    /// Every stage named in `stage_ids` is merged into the chain of each
    /// asset type it declares; a named head stage becomes the template's
    /// head instead. Sinks must support save.
    pub fn template(
        &mut self,
        id: &str,
        stage_ids: &[&str],
        excluded_defaults: Option<&[&str]>,
        include_defaults: bool,
        sink_ids: &[&str],
    ) -> Result<&mut Self> {
        let tag = self.tag_or_panic();

        let mut sinks = Vec::with_capacity(sink_ids.len());
        for sink_id in sink_ids {
            let entry =
                self.find_source(sink_id)
                    .ok_or_else(|| SquirrelError::UnresolvedReference {
                        kind: "source",
                        id: sink_id.to_string(),
                    })?;
            if !entry.source.supports_save() {
                return Err(SquirrelError::SaveNotSupported {
                    id: sink_id.to_string(),
                });
            }
            sinks.push(entry.source.clone());
        }

        let excluded = |stage_id: &str| {
            excluded_defaults.is_some_and(|ids| ids.contains(&stage_id))
        };

        let mut chains = if include_defaults {
            Self::default_chains(excluded_defaults)
        } else {
            ChainMap::new()
        };
        let mut head = if include_defaults && !excluded(DEFAULT_CACHE_ID) {
            Some(self.default_cache())
        } else {
            None
        };

        for stage_id in stage_ids {
            let stage =
                self.find_stage(stage_id)
                    .ok_or_else(|| SquirrelError::UnresolvedReference {
                        kind: "stage",
                        id: stage_id.to_string(),
                    })?;
            match stage {
                RegisteredStage::Node(node) => chains.merge_stage(node.clone()),
                RegisteredStage::Head(engine) => head = Some(engine.clone()),
            }
        }

        for setting in self.settings.values_mut() {
            setting.templates.shift_remove(id);
        }
        self.setting_mut(&tag).templates.insert(
            id.to_string(),
            WorkflowTemplate::new(head, Arc::new(chains), sinks),
        );
        Ok(self)
    }

    /// Declares workflows from a template.
    ///
    /// Heaps are selected by matching `heap_pattern` against existing heap
    /// IDs; zero matches is a configuration error. With `for_each_heap`,
    /// one workflow per matching heap is created under `prefix` + heap ID;
    /// otherwise a single workflow named `prefix` runs over a synthetic
    /// composition of every match.
    pub fn workflow(
        &mut self,
        prefix: &str,
        for_each_heap: bool,
        heap_pattern: &str,
        template_id: &str,
    ) -> Result<&mut Self> {
        let tag = self.tag_or_panic();

        let template = self
            .find_template(template_id)
            .ok_or_else(|| SquirrelError::UnresolvedReference {
                kind: "template",
                id: template_id.to_string(),
            })?
            .clone();

        let heaps = self.matching_heaps(heap_pattern)?;
        if heaps.is_empty() {
            return Err(SquirrelError::Config {
                message: format!("'{heap_pattern}' is a regex matching no heap"),
            });
        }

        if for_each_heap {
            for heap in heaps {
                let workflow_id = format!("{prefix}{}", heap.id());
                for setting in self.settings.values_mut() {
                    setting.workflows.shift_remove(&workflow_id);
                }
                let workflow = template.instantiate(&workflow_id, heap);
                self.setting_mut(&tag)
                    .workflows
                    .insert(workflow_id, workflow);
            }
        } else {
            let composed = Heap::composed(heap_pattern, None, Vec::new(), heaps)?;
            for setting in self.settings.values_mut() {
                setting.workflows.shift_remove(prefix);
            }
            let workflow = template.instantiate(prefix, composed);
            self.setting_mut(&tag)
                .workflows
                .insert(prefix.to_string(), workflow);
        }
        Ok(self)
    }

    /// Builds the context from every tag's setting.
    ///
    /// Heaps not referenced, directly or via composition, by any explicit
    /// workflow get a synthesized default workflow named after the heap, so
    /// every declared heap stays reachable.
    pub fn build(&self) -> Context {
        let mut workflows: IndexMap<String, Arc<Workflow>> = IndexMap::new();
        let mut heaps: IndexMap<String, Arc<Heap>> = IndexMap::new();

        for setting in self.settings.values() {
            for (id, workflow) in &setting.workflows {
                workflows.insert(id.clone(), Arc::new(workflow.clone()));
            }
            for (id, heap) in &setting.heaps {
                heaps.insert(id.clone(), heap.clone());
            }
        }

        for heap in heaps.values() {
            let referenced = workflows
                .values()
                .any(|workflow| workflow.heap().contains_heap(heap.id()));
            if referenced {
                continue;
            }
            tracing::debug!(heap = heap.id(), "synthesizing default workflow");
            let workflow = Workflow::new(
                heap.id(),
                Some(self.default_cache()),
                Arc::new(Self::default_chains(None)),
                heap.clone(),
                Vec::new(),
            );
            workflows.insert(heap.id().to_string(), Arc::new(workflow));
        }

        tracing::info!(workflows = workflows.len(), "context built");
        Context { workflows }
    }

    /// The polling scheduler attached to a registered source.
    pub fn polling_scheduler(&self, source_id: &str) -> Option<Arc<PollingScheduler>> {
        self.find_source(source_id).map(|e| e.scheduler.clone())
    }

    fn default_cache(&self) -> Arc<CacheEngine> {
        Arc::new(CacheEngine::new(
            true,
            false,
            Arc::new(MemoryCacheStore::new()),
            self.pool.clone(),
        ))
    }

    fn default_chains(excluded_defaults: Option<&[&str]>) -> ChainMap {
        let excluded = |stage_id: &str| {
            excluded_defaults.is_some_and(|ids| ids.contains(&stage_id))
        };
        let mut chains = ChainMap::new();

        let mut css = Chain::new();
        if !excluded(DEFAULT_AGGREGATOR_ID) {
            css = css.chain(Arc::new(TextAggregatorStage::new()));
        }
        if !excluded(DEFAULT_CSS_INSPECTOR_ID) {
            css = css.chain(Arc::new(TextInspectorStage::css_defaults()));
        }
        if !css.stages().is_empty() {
            chains.insert(NutType::Css, css);
        }

        let mut js = Chain::new();
        if !excluded(DEFAULT_AGGREGATOR_ID) {
            js = js.chain(Arc::new(TextAggregatorStage::new()));
        }
        if !excluded(DEFAULT_JS_INSPECTOR_ID) {
            js = js.chain(Arc::new(TextInspectorStage::javascript_defaults()));
        }
        if !js.stages().is_empty() {
            chains.insert(NutType::Javascript, js);
        }

        chains
    }

    fn find_source(&self, id: &str) -> Option<&SourceEntry> {
        self.settings.values().find_map(|s| s.sources.get(id))
    }

    fn find_stage(&self, id: &str) -> Option<&RegisteredStage> {
        self.settings.values().find_map(|s| s.stages.get(id))
    }

    fn find_template(&self, id: &str) -> Option<&WorkflowTemplate> {
        self.settings.values().find_map(|s| s.templates.get(id))
    }

    fn matching_heaps(&self, pattern: &str) -> Result<Vec<Arc<Heap>>> {
        let regex = Regex::new(&format!("^(?:{pattern})$"))?;
        let mut matches = Vec::new();
        for setting in self.settings.values() {
            for heap in setting.heaps.values() {
                if regex.is_match(heap.id()) {
                    matches.push(heap.clone());
                }
            }
        }
        Ok(matches)
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The built workflow table, ready to serve requests.
pub struct Context {
    workflows: IndexMap<String, Arc<Workflow>>,
}

impl Context {
    /// IDs of every workflow in the context.
    pub fn workflow_ids(&self) -> Vec<&str> {
        self.workflows.keys().map(|id| id.as_str()).collect()
    }

    /// The workflow registered under an ID.
    pub fn workflow(&self, id: &str) -> Option<&Arc<Workflow>> {
        self.workflows.get(id)
    }

    /// Processes every nut of a workflow.
    pub async fn process(&self, workflow_id: &str) -> Result<Vec<Nut>> {
        self.workflows
            .get(workflow_id)
            .ok_or_else(|| SquirrelError::WorkflowNotFound {
                id: workflow_id.to_string(),
            })?
            .process()
            .await
    }

    /// Resolves one logical path through a workflow.
    pub async fn nut(&self, workflow_id: &str, path: &str) -> Result<Option<Nut>> {
        self.workflows
            .get(workflow_id)
            .ok_or_else(|| SquirrelError::WorkflowNotFound {
                id: workflow_id.to_string(),
            })?
            .nut(path)
            .await
    }
}
