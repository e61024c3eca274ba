//! # Catalog Interface
//!
//! The seams through which planning reaches the rest of the system:
//!
//! - [`StatisticsOracle`] answers row counts by entity id. It is the second tier
//!   of an entity handle's row-count fallback; the production implementation is
//!   the statistics manager in `stats`.
//! - [`PlacementResolver`] maps an entity onto the physical placement that holds
//!   its data. The pre-process allocation rules consult it.
//!
//! [`InMemoryCatalog`] implements both on top of plain maps and additionally
//! resolves qualified names to entity handles. It is meant for tests and
//! embedding; a real catalog is backed by the engine's snapshot.

use crate::entity::{Entity, EntityHandle, EntityId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Row counts by entity identity.
pub trait StatisticsOracle: Send + Sync {
    fn row_count_for(&self, id: EntityId) -> Option<f64>;
}

/// Oracle over a fixed table of row counts.
#[derive(Debug, Clone, Default)]
pub struct FixedOracle {
    counts: HashMap<EntityId, f64>,
}

impl FixedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: EntityId, row_count: f64) -> Self {
        self.counts.insert(id, row_count);
        self
    }
}

impl StatisticsOracle for FixedOracle {
    fn row_count_for(&self, id: EntityId) -> Option<f64> {
        self.counts.get(&id).copied()
    }
}

/// Physical placement of an entity's data on a storage adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlacementRef {
    pub adapter: String,
    pub id: u64,
}

impl PlacementRef {
    pub fn new(adapter: impl Into<String>, id: u64) -> Self {
        Self {
            adapter: adapter.into(),
            id,
        }
    }
}

impl fmt::Display for PlacementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.adapter, self.id)
    }
}

/// Resolves the physical placement of an entity.
pub trait PlacementResolver: Send + Sync {
    fn placement_for(&self, entity: &EntityHandle) -> Option<PlacementRef>;
}

/// Map-backed catalog for tests and embedding.
///
/// Entities are keyed by their dotted qualified name. Row counts and placements
/// are keyed by entity id.
#[derive(Default)]
pub struct InMemoryCatalog {
    entities: HashMap<String, (Vec<String>, Arc<dyn Entity>)>,
    row_counts: HashMap<EntityId, f64>,
    placements: HashMap<EntityId, PlacementRef>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entity(&mut self, qualified_name: &[&str], entity: Arc<dyn Entity>) {
        let name: Vec<String> = qualified_name.iter().map(|s| s.to_string()).collect();
        self.entities.insert(name.join("."), (name, entity));
    }

    pub fn set_row_count(&mut self, id: EntityId, row_count: f64) {
        self.row_counts.insert(id, row_count);
    }

    pub fn set_placement(&mut self, id: EntityId, placement: PlacementRef) {
        self.placements.insert(id, placement);
    }

    /// Handle for a registered entity. The handle does not consult this catalog
    /// for row counts unless an oracle is attached with
    /// [`EntityHandle::with_oracle`].
    pub fn entity(&self, qualified_name: &[&str]) -> Option<EntityHandle> {
        self.entities
            .get(&qualified_name.join("."))
            .map(|(name, entity)| EntityHandle::new(name.clone(), Arc::clone(entity)))
    }
}

impl StatisticsOracle for InMemoryCatalog {
    fn row_count_for(&self, id: EntityId) -> Option<f64> {
        self.row_counts.get(&id).copied()
    }
}

impl PlacementResolver for InMemoryCatalog {
    fn placement_for(&self, entity: &EntityHandle) -> Option<PlacementRef> {
        entity
            .entity_id()
            .and_then(|id| self.placements.get(&id).cloned())
    }
}

impl fmt::Debug for InMemoryCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.entities.keys().collect();
        names.sort();
        f.debug_struct("InMemoryCatalog")
            .field("entities", &names)
            .field("row_counts", &self.row_counts.len())
            .field("placements", &self.placements.len())
            .finish()
    }
}
