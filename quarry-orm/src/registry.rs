//! Model registry and event dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use quarry_query::{QueryError, QueryResult};
use tracing::{debug, trace};

use crate::definition::ModelDef;
use crate::events::{Listener, ModelEvent, Observer};
use crate::model::Model;

/// Registered model definitions plus their event listeners and observers.
///
/// Relations name their related model, so every model taking part in a
/// relation must be registered before the relation is queried.
#[derive(Default)]
pub struct Registry {
    models: RwLock<IndexMap<String, Arc<ModelDef>>>,
    listeners: RwLock<HashMap<String, Vec<(ModelEvent, Listener)>>>,
    observers: RwLock<HashMap<String, Vec<Arc<dyn Observer>>>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("models", &self.models.read().keys().cloned().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a model definition.
    pub fn register(&self, def: ModelDef) -> Arc<ModelDef> {
        let def = Arc::new(def);
        debug!(model = %def.name(), table = %def.table_name(), "model registered");
        self.models
            .write()
            .insert(def.name().to_string(), Arc::clone(&def));
        def
    }

    /// Definition of `model`.
    pub fn get(&self, model: &str) -> QueryResult<Arc<ModelDef>> {
        self.models
            .read()
            .get(model)
            .cloned()
            .ok_or_else(|| QueryError::unknown_model(model))
    }

    /// Whether `model` is registered.
    pub fn contains(&self, model: &str) -> bool {
        self.models.read().contains_key(model)
    }

    /// Registered model names in registration order.
    pub fn model_names(&self) -> Vec<String> {
        self.models.read().keys().cloned().collect()
    }

    /// Listen for `event` on `model`.
    pub fn listen<F>(&self, model: impl Into<String>, event: ModelEvent, listener: F)
    where
        F: Fn(&mut Model) -> bool + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .entry(model.into())
            .or_default()
            .push((event, Arc::new(listener)));
    }

    /// Attach an observer to `model`.
    pub fn observe(&self, model: impl Into<String>, observer: impl Observer + 'static) {
        self.observers
            .write()
            .entry(model.into())
            .or_default()
            .push(Arc::new(observer));
    }

    /// Drop every listener and observer of `model`.
    pub fn forget_listeners(&self, model: &str) {
        self.listeners.write().remove(model);
        self.observers.write().remove(model);
    }

    /// Dispatch `event` for `model` to listeners, then observers.
    ///
    /// For halting events the first `false` stops dispatch and is returned.
    /// Handlers run without any registry lock held, so they may register
    /// further listeners.
    pub fn fire(&self, event: ModelEvent, model: &mut Model) -> bool {
        let name = model.def().name().to_string();
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .get(&name)
            .map(|all| {
                all.iter()
                    .filter(|(e, _)| *e == event)
                    .map(|(_, l)| Arc::clone(l))
                    .collect()
            })
            .unwrap_or_default();
        let observers: Vec<Arc<dyn Observer>> = self
            .observers
            .read()
            .get(&name)
            .cloned()
            .unwrap_or_default();

        if listeners.is_empty() && observers.is_empty() {
            return true;
        }
        trace!(model = %name, %event, "firing model event");

        for listener in listeners {
            if !listener(model) && event.halts() {
                debug!(model = %name, %event, "halted by listener");
                return false;
            }
        }
        for observer in observers {
            if !observer.handle(event, model) && event.halts() {
                debug!(model = %name, %event, "halted by observer");
                return false;
            }
        }
        true
    }
}
