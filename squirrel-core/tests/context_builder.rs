//! Integration tests for tag-scoped configuration assembly.

use std::sync::Arc;

use squirrel_core::config::{keys, Properties};
use squirrel_core::{
    ContextBuilder, MemorySource, RegexRemoveFilter, SquirrelError, TextMinifierStage,
};

fn source_with(paths: &[(&str, &str)]) -> Arc<MemorySource> {
    let source = MemorySource::new("statics");
    for (path, content) in paths {
        source.put(path, *content, 1);
    }
    Arc::new(source)
}

#[tokio::test]
async fn test_quick_wiring_with_default_chains() {
    let mut builder = ContextBuilder::new();
    builder
        .tag("boot")
        .register_source(
            "statics",
            source_with(&[("a.css", "body{}"), ("b.css", "h1{}")]),
            &Properties::new(),
        )
        .unwrap()
        .heap("styles", Some("statics"), &[], &["a.css", "b.css"])
        .await
        .unwrap()
        .release_tag();

    let context = builder.build();
    assert_eq!(context.workflow_ids(), vec!["styles"]);

    // The synthesized default workflow aggregates through the default CSS
    // chain and caches at the head.
    let nuts = context.process("styles").await.unwrap();
    assert_eq!(nuts.len(), 1);
    assert_eq!(nuts[0].name(), "aggregate.css");
    assert_eq!(nuts[0].originals().len(), 2);
}

#[tokio::test]
async fn test_registered_id_is_globally_unique_across_tags() {
    let source = source_with(&[("a.js", "var a;")]);
    let mut builder = ContextBuilder::new();

    builder
        .tag("a")
        .register_source("statics", source.clone(), &Properties::new())
        .unwrap()
        .heap("h", Some("statics"), &[], &["a.js"])
        .await
        .unwrap();

    // Same heap ID under another tag shadows the first registration.
    builder
        .tag("b")
        .register_source("statics2", source, &Properties::new())
        .unwrap()
        .heap("h", Some("statics2"), &[], &["a.js"])
        .await
        .unwrap()
        .release_tag();

    let context = builder.build();
    assert_eq!(context.workflow_ids(), vec!["h"]);

    // Clearing tag "a" must not take the heap down with it: the surviving
    // registration belongs to tag "b".
    builder.clear_tag("a");
    let context = builder.build();
    assert_eq!(context.workflow_ids(), vec!["h"]);
    assert!(context.process("h").await.is_ok());

    builder.clear_tag("b");
    assert!(builder.build().workflow_ids().is_empty());
}

#[tokio::test]
async fn test_clear_tag_stops_owned_polling() {
    let mut builder = ContextBuilder::new();
    builder
        .tag("boot")
        .register_source(
            "statics",
            source_with(&[("a.js", "var a;")]),
            &Properties::new().with(keys::POLLING_INTERVAL, "60"),
        )
        .unwrap()
        .release_tag();

    let scheduler = builder.polling_scheduler("statics").unwrap();
    assert_eq!(scheduler.interval(), 60);

    builder.clear_tag("boot");
    assert_eq!(scheduler.interval(), 0);
    assert!(builder.polling_scheduler("statics").is_none());
}

#[tokio::test]
async fn test_workflow_synthesis_covers_unreferenced_heaps() {
    let source = source_with(&[("a.js", "var a;"), ("b.js", "var b;")]);
    let mut builder = ContextBuilder::new();
    builder
        .tag("boot")
        .register_source("statics", source, &Properties::new())
        .unwrap()
        .heap("h1", Some("statics"), &[], &["a.js"])
        .await
        .unwrap()
        .heap("h2", Some("statics"), &[], &["b.js"])
        .await
        .unwrap()
        .template("tpl", &[], None, false, &[])
        .unwrap()
        .workflow("w", true, "h1", "tpl")
        .unwrap()
        .release_tag();

    let context = builder.build();
    let mut ids = context.workflow_ids();
    ids.sort();

    // h1 is referenced by the explicit workflow; only h2 gets a synthesized
    // default workflow, named exactly after the heap.
    assert_eq!(ids, vec!["h2", "wh1"]);
}

#[tokio::test]
async fn test_workflow_over_composition_references_all_matches() {
    let source = source_with(&[("a.js", "var a;"), ("b.js", "var b;")]);
    let mut builder = ContextBuilder::new();
    builder
        .tag("boot")
        .register_source("statics", source, &Properties::new())
        .unwrap()
        .heap("h1", Some("statics"), &[], &["a.js"])
        .await
        .unwrap()
        .heap("h2", Some("statics"), &[], &["b.js"])
        .await
        .unwrap()
        .template("tpl", &[], None, false, &[])
        .unwrap()
        .workflow("all", false, "h.*", "tpl")
        .unwrap()
        .release_tag();

    let context = builder.build();
    // Both heaps are reachable through the composition: nothing is
    // synthesized.
    assert_eq!(context.workflow_ids(), vec!["all"]);

    let names: Vec<String> = context
        .process("all")
        .await
        .unwrap()
        .iter()
        .map(|nut| nut.name().to_string())
        .collect();
    assert_eq!(names, vec!["a.js", "b.js"]);
}

#[tokio::test]
async fn test_path_filters_apply_in_registration_order() {
    let source = source_with(&[("a.js", "var a;"), ("livereload.js", "var r;")]);
    let mut builder = ContextBuilder::new();
    builder
        .tag("boot")
        .register_source("statics", source, &Properties::new())
        .unwrap()
        .register_filter(
            "no-reload",
            Arc::new(RegexRemoveFilter::new(&["(.*)?reload.*"]).unwrap()),
        )
        .heap("h", Some("statics"), &[], &["a.js", "livereload.js"])
        .await
        .unwrap()
        .release_tag();

    let context = builder.build();
    let heap = context.workflow("h").unwrap().heap().clone();
    assert_eq!(heap.paths(), ["a.js"]);
}

#[tokio::test]
async fn test_heap_with_paths_requires_source() {
    let mut builder = ContextBuilder::new();
    builder.tag("boot");
    let err = builder
        .heap("h", Some("unknown"), &[], &["a.js"])
        .await
        .unwrap_err();
    assert_eq!(err.category(), "config");
}

#[tokio::test]
async fn test_sink_must_support_save() {
    let mut builder = ContextBuilder::new();
    builder
        .tag("boot")
        .register_source(
            "plain",
            source_with(&[("a.js", "var a;")]),
            &Properties::new(),
        )
        .unwrap();

    let err = builder
        .template("tpl", &[], None, false, &["plain"])
        .unwrap_err();
    assert!(matches!(err, SquirrelError::SaveNotSupported { .. }));
}

#[tokio::test]
async fn test_saving_sink_receives_processed_nuts() {
    let sink = Arc::new(
        MemorySource::new("cdn").with_save_support(),
    );
    let mut builder = ContextBuilder::new();
    builder
        .tag("boot")
        .register_source(
            "statics",
            source_with(&[("a.css", "body{}")]),
            &Properties::new(),
        )
        .unwrap()
        .register_source("cdn", sink.clone(), &Properties::new())
        .unwrap()
        .heap("styles", Some("statics"), &[], &["a.css"])
        .await
        .unwrap()
        .template("tpl", &[], None, true, &["cdn"])
        .unwrap()
        .workflow("w", true, "styles", "tpl")
        .unwrap()
        .release_tag();

    let context = builder.build();
    context.process("wstyles").await.unwrap();
    assert_eq!(sink.saved(), vec!["aggregate.css"]);
}

#[tokio::test]
async fn test_unknown_stage_is_fatal() {
    let mut builder = ContextBuilder::new();
    builder.tag("boot");
    let err = builder
        .template("tpl", &["ghost"], None, false, &[])
        .unwrap_err();
    assert!(matches!(
        err,
        SquirrelError::UnresolvedReference { kind: "stage", .. }
    ));
}

#[tokio::test]
async fn test_workflow_pattern_without_match_is_fatal() {
    let mut builder = ContextBuilder::new();
    builder
        .tag("boot")
        .template("tpl", &[], None, false, &[])
        .unwrap();
    let err = builder.workflow("w", true, "nothing", "tpl").unwrap_err();
    assert_eq!(err.category(), "config");
}

#[tokio::test]
async fn test_later_stage_registration_shadows_earlier_tag() {
    let source = source_with(&[("a.js", "var a;  \n\n")]);
    let mut builder = ContextBuilder::new();

    builder
        .tag("a")
        .register_node_stage("custom", Arc::new(TextMinifierStage::new()));

    // Re-registering the same ID under tag "b" shadows tag "a"'s entry;
    // clearing "a" afterwards must not remove it.
    builder
        .tag("b")
        .register_node_stage("custom", Arc::new(TextMinifierStage::new()));
    builder.clear_tag("a");

    builder
        .tag("boot")
        .register_source("statics", source, &Properties::new())
        .unwrap()
        .heap("h", Some("statics"), &[], &["a.js"])
        .await
        .unwrap()
        .template("tpl", &["custom"], None, false, &[])
        .unwrap()
        .workflow("w", true, "h", "tpl")
        .unwrap()
        .release_tag();

    let context = builder.build();
    let nuts = context.process("wh").await.unwrap();
    assert_eq!(nuts[0].open_text().await.unwrap(), "var a;");
}

#[tokio::test]
async fn test_unsupported_source_property_is_fatal() {
    let mut builder = ContextBuilder::new();
    builder.tag("boot");
    let err = builder
        .register_source(
            "statics",
            source_with(&[]),
            &Properties::new().with(keys::CACHE, "true"),
        )
        .unwrap_err();
    assert_eq!(err.category(), "config");
}
