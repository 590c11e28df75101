//! Heaps: named, possibly composed collections of asset paths.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::core::{Result, SquirrelError};
use crate::nut::{Nut, NutType};
use crate::source::ResourceSource;

/// Receives the "updated" signal of a heap.
///
/// The signal carries no payload beyond the heap itself and may fire more
/// than once for a single underlying change (at-least-once delivery).
pub trait HeapListener: Send + Sync {
    /// Called when a nut of the heap has been detected as updated.
    fn nut_updated(&self, heap: &Heap);
}

/// A named, ordered collection of logical paths bound to one source,
/// optionally composed of other heaps.
///
/// Compositions form a tree; the constructor rejects a composition that
/// would contain the new heap's own ID, so cycles cannot be built.
pub struct Heap {
    id: String,
    paths: Vec<String>,
    source: Option<Arc<dyn ResourceSource>>,
    composition: Vec<Arc<Heap>>,
    listeners: Mutex<Vec<Arc<dyn HeapListener>>>,
}

/// Forwards a child heap's update signal to the composing parent.
struct ForwardUpdate {
    parent: Weak<Heap>,
}

impl HeapListener for ForwardUpdate {
    fn nut_updated(&self, _heap: &Heap) {
        if let Some(parent) = self.parent.upgrade() {
            parent.notify_updated();
        }
    }
}

impl Heap {
    /// Creates a simple heap over the given source and paths.
    pub fn new(
        id: &str,
        source: Option<Arc<dyn ResourceSource>>,
        paths: Vec<String>,
    ) -> Result<Arc<Self>> {
        Self::composed(id, source, paths, Vec::new())
    }

    /// Creates a heap composed, in part or totally, of other heaps.
    pub fn composed(
        id: &str,
        source: Option<Arc<dyn ResourceSource>>,
        paths: Vec<String>,
        composition: Vec<Arc<Heap>>,
    ) -> Result<Arc<Self>> {
        if !paths.is_empty() && source.is_none() {
            return Err(SquirrelError::Config {
                message: format!(
                    "heap '{id}' declares paths but no source to resolve them against"
                ),
            });
        }
        for child in &composition {
            if child.contains_heap(id) {
                return Err(SquirrelError::Config {
                    message: format!("heap '{id}' cannot compose itself"),
                });
            }
        }

        let heap = Arc::new(Self {
            id: id.to_string(),
            paths,
            source,
            composition,
            listeners: Mutex::new(Vec::new()),
        });

        for child in &heap.composition {
            child.add_listener(Arc::new(ForwardUpdate {
                parent: Arc::downgrade(&heap),
            }));
        }

        Ok(heap)
    }

    /// Heap ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Declared paths of this heap, excluding composed heaps.
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// The source this heap resolves paths against, if any.
    pub fn source(&self) -> Option<&Arc<dyn ResourceSource>> {
        self.source.as_ref()
    }

    /// Directly composed heaps.
    pub fn composition(&self) -> &[Arc<Heap>] {
        &self.composition
    }

    /// Whether this heap is, or composes (at any depth), the given heap ID.
    pub fn contains_heap(&self, id: &str) -> bool {
        self.id == id || self.composition.iter().any(|h| h.contains_heap(id))
    }

    /// Registers a listener for the "updated" signal.
    pub fn add_listener(&self, listener: Arc<dyn HeapListener>) {
        self.listeners.lock().push(listener);
    }

    /// Fires the "updated" signal to every registered listener.
    pub fn notify_updated(&self) {
        let listeners = self.listeners.lock().clone();
        tracing::debug!(heap = %self.id, listeners = listeners.len(), "heap updated");
        for listener in listeners {
            listener.nut_updated(self);
        }
    }

    /// Creates one nut from a declared path of this heap.
    pub async fn create_nut(&self, path: &str) -> Result<Nut> {
        let source = self.source.as_ref().ok_or_else(|| SquirrelError::Config {
            message: format!("heap '{}' has no source to create '{path}' from", self.id),
        })?;
        let nut_type = NutType::from_path(path).ok_or_else(|| SquirrelError::Stream {
            path: path.to_string(),
            message: "unsupported asset type".to_string(),
        })?;
        let version = source.version_number(path).await?;
        Ok(Nut::lazy(path, nut_type, &version, source.clone(), path))
    }

    /// Creates the nuts of this heap and of every composed heap, preserving
    /// declaration order (own paths first, then composition order).
    pub fn create_nuts(&self) -> futures::future::BoxFuture<'_, Result<Vec<Nut>>> {
        Box::pin(async move {
            let mut nuts = Vec::with_capacity(self.paths.len());
            for path in &self.paths {
                nuts.push(self.create_nut(path).await?);
            }
            for child in &self.composition {
                nuts.extend(child.create_nuts().await?);
            }
            Ok(nuts)
        })
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("id", &self.id)
            .field("paths", &self.paths)
            .field("composition", &self.composition.len())
            .finish()
    }
}
