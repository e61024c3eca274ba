//! # Entity Handles
//!
//! An [`EntityHandle`] is the planner's view of a table, collection or graph: its
//! qualified name, its row type, what it can do (its [`CapabilitySet`]) and enough
//! cost metadata to plan with. Handles are values: `copy`, `extend` and friends
//! return new handles and never mutate the receiver. The underlying [`Entity`] and
//! the row type are shared between copies.
//!
//! ## Row counts
//!
//! [`EntityHandle::row_count`] resolves in three tiers, in this order:
//!
//! 1. the handle's explicit override,
//! 2. the statistics oracle, keyed by entity id,
//! 3. [`DEFAULT_ROW_COUNT`].
//!
//! Cost comparisons downstream are sensitive to the constant, so it is fixed.
//!
//! ## Virtual columns
//!
//! Columns whose [`ColumnStrategy`] is `Virtual` are part of the logical schema
//! but are not stored. [`EntityHandle::real_row_type`] drops them and
//! [`EntityHandle::real_ordinal`] maps a logical ordinal onto the stored layout.
//!
//! ## Lowering
//!
//! [`EntityHandle::to_scan_node`] turns a handle into an algebra leaf. The paths
//! are tried in a fixed order and the first match wins:
//!
//! 1. dynamic row type: snapshot it, copy the handle, recurse;
//! 2. virtual columns: drop them, mask the initializer strategy, recurse;
//! 3. `Translatable`: the entity builds its own algebra;
//! 4. forced bindable: generic logical scan;
//! 5. enumerable enabled and `Queryable`: enumerable scan;
//! 6. scan-capable (`Scannable`, `Filterable` or `ProjectFilterable`): generic
//!    logical scan, also for a `Queryable` entity when enumerable is off;
//! 7. enumerable enabled: enumerable scan as a last resort;
//! 8. otherwise [`PrepareError::LoweringExhausted`].

use crate::alg::AlgNode;
use crate::catalog::{PlacementRef, StatisticsOracle};
use crate::config::FeatureFlags;
use crate::error::{PrepareError, Result};
use crate::traits::{AlgTraitSet, Collation, Convention, DataModel, Distribution, Monotonicity};
use crate::types::{Field, RowType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, trace};

/// Row count used when neither an override nor the statistics oracle knows better.
pub const DEFAULT_ROW_COUNT: f64 = 100.0;

/// Catalog identity of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Something an entity can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Capability {
    Scannable = 1 << 0,
    Filterable = 1 << 1,
    ProjectFilterable = 1 << 2,
    Modifiable = 1 << 3,
    Translatable = 1 << 4,
    Streamable = 1 << 5,
    Queryable = 1 << 6,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::Scannable,
        Capability::Filterable,
        Capability::ProjectFilterable,
        Capability::Modifiable,
        Capability::Translatable,
        Capability::Streamable,
        Capability::Queryable,
    ];

    fn name(self) -> &'static str {
        match self {
            Capability::Scannable => "Scannable",
            Capability::Filterable => "Filterable",
            Capability::ProjectFilterable => "ProjectFilterable",
            Capability::Modifiable => "Modifiable",
            Capability::Translatable => "Translatable",
            Capability::Streamable => "Streamable",
            Capability::Queryable => "Queryable",
        }
    }
}

/// Small set of [`Capability`] tags.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    pub const EMPTY: CapabilitySet = CapabilitySet(0);

    pub fn of(capabilities: &[Capability]) -> Self {
        capabilities
            .iter()
            .fold(Self::EMPTY, |set, &c| set.with(c))
    }

    pub fn contains(self, capability: Capability) -> bool {
        self.0 & capability as u8 != 0
    }

    pub fn with(self, capability: Capability) -> Self {
        CapabilitySet(self.0 | capability as u8)
    }

    pub fn without(self, capability: Capability) -> Self {
        CapabilitySet(self.0 & !(capability as u8))
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Any of the three plain scan capabilities.
    pub fn can_scan(self) -> bool {
        self.contains(Capability::Scannable)
            || self.contains(Capability::Filterable)
            || self.contains(Capability::ProjectFilterable)
    }

    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL
            .into_iter()
            .filter(move |&c| self.contains(c))
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, c) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            f.write_str(c.name())?;
        }
        write!(f, "}}")
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapabilitySet{}", self)
    }
}

/// How a column's value is produced on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnStrategy {
    Nullable,
    NotNullable,
    Default,
    Stored,
    /// Computed on read, never stored.
    Virtual,
}

/// Source of per-column [`ColumnStrategy`]s.
pub trait InitializerStrategy: Send + Sync + fmt::Debug {
    fn strategy(&self, row_type: &RowType, index: usize) -> ColumnStrategy;
}

/// Strategy with no virtual columns: nullability alone decides.
#[derive(Debug, Default)]
pub struct NullInitializerStrategy;

impl InitializerStrategy for NullInitializerStrategy {
    fn strategy(&self, row_type: &RowType, index: usize) -> ColumnStrategy {
        match row_type.field(index) {
            Some(f) if !f.ty.is_nullable() => ColumnStrategy::NotNullable,
            _ => ColumnStrategy::Nullable,
        }
    }
}

/// Foreign-key style constraint between two entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferentialConstraint {
    pub source: Vec<String>,
    pub target: Vec<String>,
    /// `(source column, target column)` pairs.
    pub column_pairs: Vec<(usize, usize)>,
}

/// Statistics an entity publishes about itself.
#[derive(Debug, Clone, Default)]
pub struct EntityStatistic {
    pub collations: Vec<Collation>,
    pub distribution: Distribution,
    /// Unique column sets.
    pub keys: Vec<BTreeSet<usize>>,
    pub referential_constraints: Vec<ReferentialConstraint>,
}

/// Whether a query reads a relation as a table or as a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modality {
    Relational,
    Stream,
}

/// Settings that steer lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToAlgContext {
    pub enumerable: bool,
    pub force_bindable: bool,
}

impl ToAlgContext {
    pub fn from_flags(flags: &FeatureFlags) -> Self {
        Self {
            enumerable: flags.enumerable,
            force_bindable: flags.force_bindable,
        }
    }
}

impl Default for ToAlgContext {
    fn default() -> Self {
        Self::from_flags(&FeatureFlags::default())
    }
}

/// A catalog entity. Implemented by the storage-facing layer.
pub trait Entity: Send + Sync + fmt::Debug {
    fn id(&self) -> EntityId;

    fn row_type(&self) -> RowType;

    fn capabilities(&self) -> CapabilitySet;

    fn data_model(&self) -> DataModel {
        DataModel::Relational
    }

    fn statistic(&self) -> Option<&EntityStatistic> {
        None
    }

    fn initializer_strategy(&self) -> Option<Arc<dyn InitializerStrategy>> {
        None
    }

    /// Build this entity's algebra. Only called for `Translatable` entities.
    fn translate(
        &self,
        handle: &EntityHandle,
        _ctx: &ToAlgContext,
        _traits: &AlgTraitSet,
    ) -> Result<AlgNode> {
        Err(PrepareError::Translation {
            entity: handle.name(),
            reason: "entity does not implement translation".into(),
        })
    }
}

/// Planning-time handle to an entity; see the module docs.
#[derive(Clone)]
pub struct EntityHandle {
    qualified_name: Vec<String>,
    row_type: RowType,
    entity: Option<Arc<dyn Entity>>,
    capabilities: CapabilitySet,
    row_count_override: Option<f64>,
    placement: Option<PlacementRef>,
    oracle: Option<Arc<dyn StatisticsOracle>>,
    strategy_override: Option<Arc<dyn InitializerStrategy>>,
}

impl EntityHandle {
    /// Handle over a catalog entity, exposing the entity's own row type.
    pub fn new(qualified_name: Vec<String>, entity: Arc<dyn Entity>) -> Self {
        Self {
            qualified_name,
            row_type: entity.row_type(),
            capabilities: entity.capabilities(),
            entity: Some(entity),
            row_count_override: None,
            placement: None,
            oracle: None,
            strategy_override: None,
        }
    }

    /// Handle with no entity behind it, e.g. for a derived relation.
    pub fn detached(
        qualified_name: Vec<String>,
        row_type: RowType,
        capabilities: CapabilitySet,
    ) -> Self {
        Self {
            qualified_name,
            row_type,
            entity: None,
            capabilities,
            row_count_override: None,
            placement: None,
            oracle: None,
            strategy_override: None,
        }
    }

    pub fn with_row_count(mut self, row_count: f64) -> Self {
        self.row_count_override = Some(row_count);
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn StatisticsOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_placement(&self, placement: PlacementRef) -> Self {
        let mut copy = self.clone();
        copy.placement = Some(placement);
        copy
    }

    pub fn qualified_name(&self) -> &[String] {
        &self.qualified_name
    }

    /// Dotted qualified name.
    pub fn name(&self) -> String {
        self.qualified_name.join(".")
    }

    pub fn row_type(&self) -> &RowType {
        &self.row_type
    }

    pub fn entity(&self) -> Option<&Arc<dyn Entity>> {
        self.entity.as_ref()
    }

    pub fn entity_id(&self) -> Option<EntityId> {
        self.entity.as_ref().map(|e| e.id())
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn placement(&self) -> Option<&PlacementRef> {
        self.placement.as_ref()
    }

    pub fn data_model(&self) -> DataModel {
        self.entity
            .as_ref()
            .map(|e| e.data_model())
            .unwrap_or_default()
    }

    pub fn row_count_override(&self) -> Option<f64> {
        self.row_count_override
    }

    pub fn row_count(&self) -> f64 {
        if let Some(n) = self.row_count_override {
            return n;
        }
        let from_oracle = match (&self.oracle, self.entity_id()) {
            (Some(oracle), Some(id)) => oracle.row_count_for(id),
            _ => None,
        };
        from_oracle.unwrap_or(DEFAULT_ROW_COUNT)
    }

    fn statistic(&self) -> Option<&EntityStatistic> {
        self.entity.as_ref().and_then(|e| e.statistic())
    }

    pub fn collations(&self) -> Vec<Collation> {
        self.statistic()
            .map(|s| s.collations.clone())
            .unwrap_or_default()
    }

    pub fn distribution(&self) -> Distribution {
        self.statistic()
            .map(|s| s.distribution.clone())
            .unwrap_or_default()
    }

    /// Whether `columns` contains one of the entity's unique keys.
    pub fn is_key(&self, columns: &BTreeSet<usize>) -> bool {
        self.statistic()
            .map(|s| s.keys.iter().any(|key| key.is_subset(columns)))
            .unwrap_or(false)
    }

    pub fn referential_constraints(&self) -> Vec<ReferentialConstraint> {
        self.statistic()
            .map(|s| s.referential_constraints.clone())
            .unwrap_or_default()
    }

    /// Only the leading field of each collation is consulted.
    pub fn monotonicity(&self, column_name: &str) -> Monotonicity {
        let fields = self.row_type.fields();
        for collation in self.collations() {
            let Some(first) = collation.first() else {
                continue;
            };
            if let Some(field) = fields.get(first.field_index) {
                if field.name == column_name {
                    return first.direction.monotonicity();
                }
            }
        }
        Monotonicity::NotMonotonic
    }

    pub fn supports_modality(&self, modality: Modality) -> bool {
        let streamable = self.has(Capability::Streamable);
        match modality {
            Modality::Stream => streamable,
            Modality::Relational => !streamable,
        }
    }

    fn initializer(&self) -> Option<Arc<dyn InitializerStrategy>> {
        self.strategy_override
            .clone()
            .or_else(|| self.entity.as_ref().and_then(|e| e.initializer_strategy()))
    }

    pub fn column_strategies(&self) -> Vec<ColumnStrategy> {
        let strategy = self
            .initializer()
            .unwrap_or_else(|| Arc::new(NullInitializerStrategy));
        (0..self.row_type.field_count())
            .map(|i| strategy.strategy(&self.row_type, i))
            .collect()
    }

    pub fn has_virtual_columns(&self) -> bool {
        self.column_strategies()
            .iter()
            .any(|s| *s == ColumnStrategy::Virtual)
    }

    /// Row type without virtual columns.
    pub fn real_row_type(&self) -> RowType {
        let strategies = self.column_strategies();
        let fields: Vec<Field> = self
            .row_type
            .fields()
            .iter()
            .zip(strategies)
            .filter(|(_, s)| *s != ColumnStrategy::Virtual)
            .map(|(f, _)| f.clone())
            .collect();
        RowType::new(fields)
    }

    /// Ordinal of logical field `ordinal` among the stored fields.
    pub fn real_ordinal(&self, ordinal: usize) -> usize {
        let virtual_before = self
            .column_strategies()
            .iter()
            .take(ordinal)
            .filter(|s| **s == ColumnStrategy::Virtual)
            .count();
        ordinal - virtual_before
    }

    /// Same entity and cost overrides, different row type.
    pub fn copy(&self, row_type: RowType) -> Self {
        let mut copy = self.clone();
        copy.row_type = row_type;
        copy
    }

    /// Handle with `extra` columns appended. The row count override is dropped
    /// so the widened entity is costed afresh.
    pub fn extend(&self, extra: Vec<Field>) -> Self {
        let mut copy = self.copy(self.row_type.extend(extra));
        copy.row_count_override = None;
        copy
    }

    /// Lower this handle to an algebra leaf; see the module docs for the order.
    pub fn to_scan_node(&self, ctx: &ToAlgContext, traits: &AlgTraitSet) -> Result<AlgNode> {
        if self.row_type.is_dynamic() {
            trace!(entity = %self.name(), "snapshotting dynamic row type before lowering");
            return self.copy(self.row_type.to_static()).to_scan_node(ctx, traits);
        }

        if self.has_virtual_columns() {
            trace!(entity = %self.name(), "removing virtual columns before lowering");
            let mut wrapped = self.copy(self.real_row_type());
            wrapped.strategy_override = Some(Arc::new(NullInitializerStrategy));
            return wrapped.to_scan_node(ctx, traits);
        }

        if self.has(Capability::Translatable) {
            let Some(entity) = &self.entity else {
                return Err(PrepareError::Translation {
                    entity: self.name(),
                    reason: "translatable handle has no entity".into(),
                });
            };
            debug!(entity = %self.name(), "lowering via entity translation");
            return entity.translate(self, ctx, traits);
        }

        let caps = self.capabilities;
        if ctx.force_bindable {
            debug!(entity = %self.name(), "lowering to logical scan (forced)");
            return Ok(AlgNode::scan(self.clone()));
        }

        // Queryable entities prefer the enumerable scan, even when scan-capable.
        if ctx.enumerable && caps.contains(Capability::Queryable) {
            debug!(entity = %self.name(), "lowering to enumerable scan");
            return Ok(AlgNode::scan(self.clone()).with_convention(Convention::Enumerable));
        }

        if caps.can_scan() {
            debug!(entity = %self.name(), "lowering to logical scan");
            return Ok(AlgNode::scan(self.clone()));
        }

        if ctx.enumerable {
            debug!(entity = %self.name(), "lowering to enumerable scan as last resort");
            return Ok(AlgNode::scan(self.clone()).with_convention(Convention::Enumerable));
        }

        Err(PrepareError::LoweringExhausted {
            entity: self.name(),
            capabilities: caps,
        })
    }
}

impl PartialEq for EntityHandle {
    fn eq(&self, other: &Self) -> bool {
        let same_entity = match (&self.entity, &other.entity) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        same_entity && self.row_type == other.row_type
    }
}

impl Eq for EntityHandle {}

impl Hash for EntityHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.entity {
            Some(e) => (Arc::as_ptr(e) as *const () as usize).hash(state),
            None => self.row_type.hash(state),
        }
    }
}

impl fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityHandle")
            .field("name", &self.name())
            .field("row_type", &self.row_type)
            .field("capabilities", &self.capabilities)
            .field("row_count_override", &self.row_count_override)
            .field("placement", &self.placement)
            .finish()
    }
}
