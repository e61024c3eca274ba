//! # Framework Configuration
//!
//! Everything a [`Planner`](crate::planner::Planner) needs to know before its
//! first statement: the feature flags, an optional replacement list of trait
//! definitions, the programs run by `transform` (one per stage index), the cost
//! factory and the catalog seams used while planning.
//!
//! A configuration is fixed once the planner is built.

use algx_core::catalog::{PlacementResolver, StatisticsOracle};
use algx_core::config::FeatureFlags;
use algx_core::cost::{CostFactory, DefaultCostFactory};
use algx_core::engine::EngineConfig;
use algx_core::program::{ProgramRef, Programs};
use algx_core::traits::TraitDef;
use std::fmt;
use std::sync::Arc;

/// Trait definitions a session carries when the configuration names none.
pub fn default_trait_defs(flags: &FeatureFlags) -> Vec<TraitDef> {
    let mut defs = vec![TraitDef::Convention];
    if flags.collation_trait {
        defs.push(TraitDef::Collation);
    }
    if flags.data_model_trait {
        defs.push(TraitDef::DataModel);
    }
    defs
}

/// Settings shared by every statement a planner prepares.
#[derive(Clone)]
pub struct FrameworkConfig {
    /// Feature flags, copied into the rule environment on `ready`.
    pub flags: FeatureFlags,
    /// When set, replaces the engine's trait definitions on `ready`.
    pub trait_defs: Option<Vec<TraitDef>>,
    /// Program per `transform` stage index.
    pub programs: Vec<ProgramRef>,
    pub cost_factory: Arc<dyn CostFactory>,
    /// Row-count source bound to entity handles that go through the cluster.
    pub oracle: Option<Arc<dyn StatisticsOracle>>,
    /// Placement lookup for the allocation rules.
    pub placements: Option<Arc<dyn PlacementResolver>>,
    /// Limits for the built-in rule engine.
    pub engine: EngineConfig,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            flags: FeatureFlags::default(),
            trait_defs: None,
            programs: Programs::standard(),
            cost_factory: Arc::new(DefaultCostFactory::default()),
            oracle: None,
            placements: None,
            engine: EngineConfig::default(),
        }
    }
}

impl FrameworkConfig {
    pub fn with_flags(mut self, flags: FeatureFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_trait_defs(mut self, trait_defs: Vec<TraitDef>) -> Self {
        self.trait_defs = Some(trait_defs);
        self
    }

    pub fn with_programs(mut self, programs: Vec<ProgramRef>) -> Self {
        self.programs = programs;
        self
    }

    pub fn with_cost_factory(mut self, cost_factory: Arc<dyn CostFactory>) -> Self {
        self.cost_factory = cost_factory;
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn StatisticsOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_placements(mut self, placements: Arc<dyn PlacementResolver>) -> Self {
        self.placements = Some(placements);
        self
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }
}

impl fmt::Debug for FrameworkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameworkConfig")
            .field("flags", &self.flags)
            .field("trait_defs", &self.trait_defs)
            .field("programs", &self.programs)
            .field("oracle", &self.oracle.is_some())
            .field("placements", &self.placements.is_some())
            .field("engine", &self.engine)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use algx_core::program::Program;

    #[test]
    fn test_default_trait_defs_follow_flags() {
        let flags = FeatureFlags::default();
        assert_eq!(
            default_trait_defs(&flags),
            vec![TraitDef::Convention, TraitDef::Collation, TraitDef::DataModel]
        );

        let bare = flags.with_collation_trait(false).with_data_model_trait(false);
        assert_eq!(default_trait_defs(&bare), vec![TraitDef::Convention]);
    }

    #[test]
    fn test_default_config_has_one_stage() {
        let config = FrameworkConfig::default();
        assert_eq!(config.programs.len(), 1);
        assert!(config.trait_defs.is_none());
        assert_eq!(config.programs[0].name(), "rule-engine");
    }
}
