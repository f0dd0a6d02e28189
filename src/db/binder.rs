use super::collection::{Collection, Model};
use super::registry::{ConnectionRegistry, Resolution};
use crate::error::Result;
use crate::model::{LogicalDb, Supermarket};
use crate::schema::{Entity, Schema};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BindingKey {
    connection: String,
    model: &'static str,
}

/// Binds entity schemas to the database they live on.
///
/// Registrations are memoized per `(connection, model)`: the first bind creates
/// the handle, later binds get a clone of it.
#[derive(Debug)]
pub struct ModelBinder {
    registry: Arc<ConnectionRegistry>,
    bindings: Mutex<HashMap<BindingKey, Collection>>,
    fallbacks: Mutex<BTreeSet<(&'static str, &'static str)>>,
}

impl ModelBinder {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            bindings: Mutex::new(HashMap::new()),
            fallbacks: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn bind<E: Entity>(&self, database: &str) -> Result<Model<E>> {
        Ok(Model::new(self.bind_schema(database, E::schema(), None)?))
    }

    /// Per-supermarket resolver for entities shared by every raw catalog.
    pub fn for_supermarket<E: Entity>(&self, supermarket: &str) -> Result<Model<E>> {
        let supermarket: Supermarket = supermarket.parse()?;
        self.bind::<E>(supermarket.as_str())
    }

    pub fn bind_schema(
        &self,
        database: &str,
        schema: &'static Schema,
        collection: Option<&str>,
    ) -> Result<Collection> {
        let resolution = self.registry.resolve(database)?;
        let target = resolution.database();
        let key = BindingKey {
            connection: target.name().to_string(),
            model: schema.model,
        };

        if let Resolution::Fallback(_) = resolution {
            self.note_fallback(database, schema.model);
        }

        let mut bindings = self.bindings.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = bindings.get(&key) {
            return Ok(existing.clone());
        }
        let name = collection
            .map(str::to_owned)
            .unwrap_or_else(|| schema.collection_name());
        debug!(connection = target.name(), model = schema.model, collection = %name, "model bound");
        let handle = Collection::new(target.clone(), schema, name);
        bindings.insert(key, handle.clone());
        Ok(handle)
    }

    /// Warns once per requested `(database, model)` that lands on the default connection.
    fn note_fallback(&self, database: &str, model: &'static str) {
        let Ok(logical) = database.parse::<LogicalDb>() else {
            return;
        };
        let first = self
            .fallbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((logical.as_str(), model));
        if first {
            warn!(
                database = logical.as_str(),
                model,
                "database not configured; using default connection"
            );
        }
    }

    /// `(database, model)` pairs bound through the default connection so far.
    pub fn fallbacks(&self) -> Vec<(&'static str, &'static str)> {
        self.fallbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    pub fn binding_count(&self) -> usize {
        self.bindings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
