//! # Planner Lifecycle
//!
//! A [`Planner`] prepares one statement at a time and gates every operation on
//! its [`PlannerState`]:
//!
//! ```text
//! Closed --reset--> Reset --ready--> Ready --convert--> Converted --transform--> ...
//!    ^                                                      |
//!    +---------------------------- close -------------------+
//! ```
//!
//! ## Transitions
//!
//! States are ordered. Moving forward is legal; asking for a state behind the
//! current one fails with [`PrepareError::StateViolation`], with two
//! exceptions: `close` works from anywhere, and `reset` also accepts `Ready` so
//! a prepared session can be rebuilt without closing it.
//!
//! - `reset` marks the planner open and drops the cluster.
//! - `ready` (resetting first when closed) builds the [`Cluster`] and a fresh
//!   [`TypeBridge`], installs the rule groups enabled by the feature flags and,
//!   when the configuration names trait definitions, replaces the engine's
//!   defaults with exactly those.
//! - `convert` accepts an already validated algebra tree. Text parsing,
//!   validation and conversion belong to the caller, so `parse`, `validate` and
//!   `alg` always fail with [`PrepareError::Unsupported`].
//! - `transform` runs the program configured for a stage over a caching
//!   metadata provider that is invalidated whenever the engine rewrites a plan.
//!   Failures carry the stage index.

use algx_core::alg::AlgNode;
use algx_core::bridge::TypeBridge;
use algx_core::catalog::StatisticsOracle;
use algx_core::cost::CostFactory;
use algx_core::engine::{HeuristicEngine, RuleEngine};
use algx_core::entity::{EntityHandle, ToAlgContext};
use algx_core::error::{PrepareError, Result};
use algx_core::metadata::{CachingMetadataProvider, DefaultMetadataProvider, MetadataProvider};
use algx_core::program::Program;
use algx_core::rule::RuleEnv;
use algx_core::traits::AlgTraitSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::config::{default_trait_defs, FrameworkConfig};

/// Where a planner is in the preparation of its current statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PlannerState {
    Closed,
    Reset,
    Ready,
    Parsed,
    Validated,
    Converted,
}

impl fmt::Display for PlannerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlannerState::Closed => "CLOSED",
            PlannerState::Reset => "RESET",
            PlannerState::Ready => "READY",
            PlannerState::Parsed => "PARSED",
            PlannerState::Validated => "VALIDATED",
            PlannerState::Converted => "CONVERTED",
        };
        f.write_str(name)
    }
}

/// Per-session planning context shared by every node of one statement.
pub struct Cluster {
    trait_set: AlgTraitSet,
    cost_factory: Arc<dyn CostFactory>,
    metadata: Arc<dyn MetadataProvider>,
    oracle: Option<Arc<dyn StatisticsOracle>>,
    to_alg: ToAlgContext,
}

impl Cluster {
    fn new(config: &FrameworkConfig) -> Self {
        Self {
            trait_set: AlgTraitSet::logical(),
            cost_factory: Arc::clone(&config.cost_factory),
            metadata: Arc::new(DefaultMetadataProvider::new(Arc::clone(&config.cost_factory))),
            oracle: config.oracle.clone(),
            to_alg: ToAlgContext::from_flags(&config.flags),
        }
    }

    /// Traits of a freshly built logical node.
    pub fn empty_trait_set(&self) -> &AlgTraitSet {
        &self.trait_set
    }

    pub fn cost_factory(&self) -> &Arc<dyn CostFactory> {
        &self.cost_factory
    }

    pub fn metadata(&self) -> Arc<dyn MetadataProvider> {
        Arc::clone(&self.metadata)
    }

    /// Attach the session's statistics oracle, if any, to `handle`.
    pub fn bind(&self, handle: EntityHandle) -> EntityHandle {
        match &self.oracle {
            Some(oracle) => handle.with_oracle(Arc::clone(oracle)),
            None => handle,
        }
    }

    /// Lower `handle` to a leaf for this session.
    pub fn to_scan(&self, handle: &EntityHandle) -> Result<AlgNode> {
        self.bind(handle.clone())
            .to_scan_node(&self.to_alg, &self.trait_set)
    }
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("trait_set", &self.trait_set)
            .field("to_alg", &self.to_alg)
            .field("oracle", &self.oracle.is_some())
            .finish()
    }
}

/// Drives one statement at a time through preparation.
pub struct Planner {
    config: FrameworkConfig,
    engine: Box<dyn RuleEngine>,
    state: PlannerState,
    open: bool,
    cluster: Option<Cluster>,
    type_bridge: Option<TypeBridge>,
    root: Option<AlgNode>,
}

impl Planner {
    /// Planner over the built-in [`HeuristicEngine`].
    pub fn new(config: FrameworkConfig) -> Self {
        let engine = HeuristicEngine::with_trait_defs(
            config.engine.clone(),
            default_trait_defs(&config.flags),
        );
        Self::with_engine(config, Box::new(engine))
    }

    /// Planner over a caller-supplied engine, keeping that engine's trait
    /// definitions unless the configuration replaces them.
    pub fn with_engine(config: FrameworkConfig, engine: Box<dyn RuleEngine>) -> Self {
        Self {
            config,
            engine,
            state: PlannerState::Closed,
            open: false,
            cluster: None,
            type_bridge: None,
            root: None,
        }
    }

    pub fn state(&self) -> PlannerState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn config(&self) -> &FrameworkConfig {
        &self.config
    }

    pub fn engine(&self) -> &dyn RuleEngine {
        self.engine.as_ref()
    }

    /// The cluster, once the planner is ready.
    pub fn cluster(&self) -> Option<&Cluster> {
        self.cluster.as_ref()
    }

    /// The session's type bridge, once the planner is ready.
    pub fn type_bridge(&mut self) -> Option<&mut TypeBridge> {
        self.type_bridge.as_mut()
    }

    /// The tree handed to `convert`.
    pub fn root(&self) -> Option<&AlgNode> {
        self.root.as_ref()
    }

    fn violation(&self, to: PlannerState) -> PrepareError {
        PrepareError::state_violation(self.state, to)
    }

    pub fn reset(&mut self) -> Result<()> {
        match self.state {
            PlannerState::Closed | PlannerState::Reset | PlannerState::Ready => {}
            _ => return Err(self.violation(PlannerState::Reset)),
        }
        self.open = true;
        self.cluster = None;
        self.type_bridge = None;
        self.root = None;
        debug!("Planner {} -> {}", self.state, PlannerState::Reset);
        self.state = PlannerState::Reset;
        Ok(())
    }

    pub fn ready(&mut self) -> Result<()> {
        match self.state {
            PlannerState::Closed => self.reset()?,
            PlannerState::Reset => {}
            _ => return Err(self.violation(PlannerState::Ready)),
        }

        let flags = self.config.flags;
        if let Some(defs) = &self.config.trait_defs {
            self.engine.clear_trait_defs();
            for def in defs {
                self.engine.add_trait_def(*def);
            }
        }
        let added = algx_rules::register_rules(self.engine.as_mut(), &flags);
        let mut env = RuleEnv::new(flags);
        if let Some(placements) = &self.config.placements {
            env = env.with_placements(Arc::clone(placements));
        }
        self.engine.set_env(env);

        self.cluster = Some(Cluster::new(&self.config));
        self.type_bridge = Some(TypeBridge::new());
        debug!(
            "Planner {} -> {}: {} rules added, trait defs {:?}",
            self.state,
            PlannerState::Ready,
            added,
            self.engine.trait_defs()
        );
        self.state = PlannerState::Ready;
        Ok(())
    }

    /// Back to `Closed` from any state, dropping the session.
    pub fn close(&mut self) {
        self.open = false;
        self.cluster = None;
        self.type_bridge = None;
        self.root = None;
        debug!("Planner {} -> {}", self.state, PlannerState::Closed);
        self.state = PlannerState::Closed;
    }

    pub fn parse(&mut self, _sql: &str) -> Result<AlgNode> {
        Err(PrepareError::Unsupported("parse"))
    }

    pub fn validate(&mut self, _node: AlgNode) -> Result<AlgNode> {
        Err(PrepareError::Unsupported("validate"))
    }

    pub fn alg(&mut self, _node: AlgNode) -> Result<AlgNode> {
        Err(PrepareError::Unsupported("alg"))
    }

    /// Accept a validated algebra tree as the statement's root, readying the
    /// planner first when needed.
    pub fn convert(&mut self, root: AlgNode) -> Result<()> {
        if self.state < PlannerState::Ready {
            self.ready()?;
        }
        trace!("Converted root: {}", root.digest());
        self.root = Some(root);
        self.state = PlannerState::Converted;
        Ok(())
    }

    /// Run the program configured for `stage` on `root`.
    pub fn transform(&self, stage: usize, desired: &AlgTraitSet, root: AlgNode) -> Result<AlgNode> {
        if self.state != PlannerState::Converted {
            return Err(self.violation(PlannerState::Converted));
        }
        let cluster = self
            .cluster
            .as_ref()
            .ok_or_else(|| self.violation(PlannerState::Converted))?;
        let program = self
            .config
            .programs
            .get(stage)
            .ok_or(PrepareError::UnknownProgram(stage))?;

        let mq = CachingMetadataProvider::new(cluster.metadata(), self.engine.metadata_clock());
        debug!("Running stage {} ('{}') to {}", stage, program.name(), desired);
        let result = program
            .run(self.engine.as_ref(), root, desired, &mq)
            .map_err(|e| e.in_stage(stage))?;
        let (hits, misses) = mq.stats();
        trace!("Stage {} metadata cache: {} hits, {} misses", stage, hits, misses);
        Ok(result)
    }
}

impl fmt::Debug for Planner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Planner")
            .field("state", &self.state)
            .field("open", &self.open)
            .field("rules", &self.engine.rules().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use algx_core::entity::{Capability, CapabilitySet};
    use algx_core::program::Programs;
    use algx_core::traits::{Convention, TraitDef};
    use algx_core::types::{AlgDataType, PolyType, RowType};

    fn scan() -> AlgNode {
        let row = RowType::builder()
            .add("a", AlgDataType::scalar(PolyType::Integer))
            .build();
        AlgNode::scan(EntityHandle::detached(
            vec!["t".into()],
            row,
            CapabilitySet::of(&[Capability::Queryable]),
        ))
    }

    #[test]
    fn test_ready_from_closed_passes_through_reset() {
        let mut planner = Planner::new(FrameworkConfig::default());
        assert_eq!(planner.state(), PlannerState::Closed);
        planner.ready().unwrap();
        assert_eq!(planner.state(), PlannerState::Ready);
        assert!(planner.is_open());
        assert!(planner.cluster().is_some());
        assert!(planner.type_bridge().is_some());
    }

    #[test]
    fn test_reset_from_ready_then_ready_again() {
        let mut planner = Planner::new(FrameworkConfig::default());
        planner.ready().unwrap();
        let rules = planner.engine().rules().len();
        planner.reset().unwrap();
        assert_eq!(planner.state(), PlannerState::Reset);
        assert!(planner.cluster().is_none());
        planner.ready().unwrap();
        assert_eq!(planner.engine().rules().len(), rules);
    }

    #[test]
    fn test_transform_before_converted_is_state_violation() {
        let mut planner = Planner::new(FrameworkConfig::default());
        let err = planner.transform(0, &AlgTraitSet::any(), scan()).unwrap_err();
        assert!(err.is_state_violation());

        planner.reset().unwrap();
        let err = planner.transform(0, &AlgTraitSet::any(), scan()).unwrap_err();
        assert!(err.is_state_violation());
        assert_eq!(err.to_string(), "cannot move from RESET to CONVERTED");
    }

    #[test]
    fn test_backward_requests_rejected() {
        let mut planner = Planner::new(FrameworkConfig::default());
        planner.convert(scan()).unwrap();
        assert_eq!(planner.state(), PlannerState::Converted);
        assert!(planner.reset().unwrap_err().is_state_violation());
        assert!(planner.ready().unwrap_err().is_state_violation());

        planner.close();
        assert_eq!(planner.state(), PlannerState::Closed);
        assert!(planner.root().is_none());
        planner.reset().unwrap();
    }

    #[test]
    fn test_text_entry_points_unsupported() {
        let mut planner = Planner::new(FrameworkConfig::default());
        assert!(matches!(planner.parse("select 1"), Err(PrepareError::Unsupported("parse"))));
        assert!(matches!(planner.validate(scan()), Err(PrepareError::Unsupported("validate"))));
        assert!(matches!(planner.alg(scan()), Err(PrepareError::Unsupported("alg"))));
        assert_eq!(planner.state(), PlannerState::Closed);
    }

    #[test]
    fn test_custom_trait_defs_replace_defaults() {
        let mut planner = Planner::new(FrameworkConfig::default());
        planner.ready().unwrap();
        assert_eq!(
            planner.engine().trait_defs(),
            &[TraitDef::Convention, TraitDef::Collation, TraitDef::DataModel]
        );

        let config = FrameworkConfig::default()
            .with_trait_defs(vec![TraitDef::Convention, TraitDef::Distribution]);
        let mut planner = Planner::new(config);
        planner.ready().unwrap();
        assert_eq!(
            planner.engine().trait_defs(),
            &[TraitDef::Convention, TraitDef::Distribution]
        );
    }

    #[test]
    fn test_unknown_stage() {
        let mut planner = Planner::new(FrameworkConfig::default().with_programs(Programs::standard()));
        planner.convert(scan()).unwrap();
        let err = planner
            .transform(3, &AlgTraitSet::of(Convention::Enumerable), scan())
            .unwrap_err();
        assert!(matches!(err, PrepareError::UnknownProgram(3)));
    }
}
