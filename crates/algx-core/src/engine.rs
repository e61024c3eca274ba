//! # Rule Engine
//!
//! The seam between the planner and the optimizer, plus a deterministic
//! reference engine that implements it.
//!
//! ## The seam
//!
//! [`RuleEngine`] is everything the planner needs from an optimizer: a rule set
//! partitioned by [`RulePhase`], a list of trait definitions, a metadata clock
//! that advances whenever a plan changes, and [`RuleEngine::find_best`], which
//! turns a root into an equivalent root in the desired traits.
//!
//! ## Heuristic engine
//!
//! [`HeuristicEngine`] rewrites in place instead of exploring a memo:
//!
//! 1. If the desired collation is not provided by the root, a sort enforcer is
//!    put on top so that implementation rules can convert it with the rest.
//! 2. Pre-process rules run to a fixpoint.
//! 3. The transformation rules of the default phase run to a fixpoint, so that
//!    logical rewrites see the plan before any leaf is implemented.
//! 4. All default-phase rules run to a fixpoint. Each pass walks the tree
//!    bottom-up and applies the first rule that matches and accepts; the pass
//!    restarts after every rewrite.
//! 5. A root implemented in another convention gets a logical converter on top
//!    and the rules run once more, so that a converter rule can bridge the two.
//! 6. The result must be entirely in the desired convention, otherwise planning
//!    fails with [`PrepareError::CannotPlan`].
//!
//! ## Termination
//!
//! Rewrites such as join commutation are their own inverse. The engine remembers
//! every `(rule, plan)` pair that fired and never fires it again, so such rules
//! run once per shape. `max_iterations` bounds the total number of rewrites as a
//! safety valve.

use crate::alg::{AlgNode, AlgOp};
use crate::error::{PrepareError, Result};
use crate::metadata::{MetadataClock, MetadataProvider};
use crate::rule::{RuleCall, RuleEnv, RulePhase, RuleRef, RuleRegistry, RuleType};
use crate::traits::{AlgTraitSet, Convention, TraitDef};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

/// The optimizer as the planner sees it.
pub trait RuleEngine: Send {
    /// Register `rule` into `phase`; `false` if a rule of that name exists.
    fn add_rule(&mut self, rule: RuleRef, phase: RulePhase) -> bool;

    fn remove_rule(&mut self, name: &str) -> bool;

    fn rules(&self) -> &RuleRegistry;

    /// Drop every registered rule.
    fn clear(&mut self);

    fn trait_defs(&self) -> &[TraitDef];

    fn add_trait_def(&mut self, def: TraitDef);

    fn clear_trait_defs(&mut self);

    /// Clock that ticks on every rewrite; metadata caches key off it.
    fn metadata_clock(&self) -> Arc<MetadataClock>;

    fn env(&self) -> &RuleEnv;

    fn set_env(&mut self, env: RuleEnv);

    /// Rewrite `root` into `desired`. With `rules` of `None` the registered
    /// phases run; otherwise only the given rules do.
    fn find_best(
        &self,
        root: AlgNode,
        desired: &AlgTraitSet,
        rules: Option<&[RuleRef]>,
        mq: &dyn MetadataProvider,
    ) -> Result<AlgNode>;
}

/// Limits for [`HeuristicEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on the number of rewrites per `find_best` call.
    pub max_iterations: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
        }
    }
}

/// Deterministic rewrite engine; see the module docs.
pub struct HeuristicEngine {
    config: EngineConfig,
    registry: RuleRegistry,
    trait_defs: Vec<TraitDef>,
    clock: Arc<MetadataClock>,
    env: RuleEnv,
}

impl HeuristicEngine {
    /// Engine with only the convention trait defined.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_trait_defs(config, vec![TraitDef::Convention])
    }

    pub fn with_trait_defs(config: EngineConfig, trait_defs: Vec<TraitDef>) -> Self {
        Self {
            config,
            registry: RuleRegistry::new(),
            trait_defs,
            clock: MetadataClock::new(),
            env: RuleEnv::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Apply `rules` until none fires or the budget runs out.
    fn run_to_fixpoint(
        &self,
        mut node: AlgNode,
        rules: &[RuleRef],
        mq: &dyn MetadataProvider,
        budget: &mut usize,
        fired: &mut HashSet<(u64, String)>,
    ) -> AlgNode {
        if rules.is_empty() {
            return node;
        }
        while *budget > 0 {
            match self.apply_once(&node, rules, mq, fired) {
                Some(rewritten) => {
                    node = rewritten;
                    *budget -= 1;
                    self.clock.advance();
                }
                None => return node,
            }
        }
        debug!("Hit iteration limit");
        node
    }

    /// One bottom-up pass; returns the tree after the first successful rewrite.
    fn apply_once(
        &self,
        node: &AlgNode,
        rules: &[RuleRef],
        mq: &dyn MetadataProvider,
        fired: &mut HashSet<(u64, String)>,
    ) -> Option<AlgNode> {
        for (i, input) in node.inputs().iter().enumerate() {
            if let Some(rewritten) = self.apply_once(input, rules, mq, fired) {
                let mut inputs = node.inputs().to_vec();
                inputs[i] = rewritten;
                return Some(node.with_inputs(inputs));
            }
        }

        let mut digest: Option<String> = None;
        for rule in rules {
            if !rule.pattern().matches(node) {
                continue;
            }
            let current = digest.get_or_insert_with(|| node.digest()).clone();
            let key = (rule.rule_hash(), current);
            if fired.contains(&key) {
                continue;
            }
            let call = RuleCall::new(node, mq, &self.env);
            if let Some(rewritten) = rule.on_match(&call) {
                let unchanged = rewritten.digest() == key.1;
                fired.insert(key);
                if unchanged {
                    continue;
                }
                trace!("Applying rule '{}' to {:?}", rule.name(), node.kind());
                return Some(rewritten);
            }
        }
        None
    }

    fn enforce_collation(&self, root: AlgNode, desired: &AlgTraitSet) -> AlgNode {
        if !self.trait_defs.contains(&TraitDef::Collation)
            || desired.collation.is_empty()
            || root.traits().collation.satisfies(&desired.collation)
        {
            return root;
        }
        debug!("Adding sort enforcer for collation {}", desired.collation);
        AlgNode::sort(root, desired.collation.clone(), None, None)
    }
}

/// Logical converter on top of a root that ended up implemented in a convention
/// other than the desired one. Converter rules turn it into a real converter.
fn needs_converter(root: &AlgNode, desired: &AlgTraitSet) -> Option<AlgNode> {
    let wanted = desired.convention?;
    let actual = root.convention();
    if wanted == Convention::None || actual == Convention::None || actual == wanted {
        return None;
    }
    Some(AlgNode::converter(root.clone(), Convention::None))
}

/// First node, pre-order, that is not in `convention`. Inputs of a converter are
/// in some other convention by construction and are not inspected.
fn first_outside(node: &AlgNode, convention: Convention) -> Option<&AlgNode> {
    if node.convention() != convention {
        return Some(node);
    }
    if matches!(node.op(), AlgOp::Converter { .. }) {
        return None;
    }
    node.inputs().iter().find_map(|i| first_outside(i, convention))
}

impl Default for HeuristicEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl RuleEngine for HeuristicEngine {
    fn add_rule(&mut self, rule: RuleRef, phase: RulePhase) -> bool {
        self.registry.add_rule(rule, phase)
    }

    fn remove_rule(&mut self, name: &str) -> bool {
        self.registry.remove_rule(name)
    }

    fn rules(&self) -> &RuleRegistry {
        &self.registry
    }

    fn clear(&mut self) {
        self.registry.clear();
    }

    fn trait_defs(&self) -> &[TraitDef] {
        &self.trait_defs
    }

    fn add_trait_def(&mut self, def: TraitDef) {
        if !self.trait_defs.contains(&def) {
            self.trait_defs.push(def);
        }
    }

    fn clear_trait_defs(&mut self) {
        self.trait_defs.clear();
    }

    fn metadata_clock(&self) -> Arc<MetadataClock> {
        Arc::clone(&self.clock)
    }

    fn env(&self) -> &RuleEnv {
        &self.env
    }

    fn set_env(&mut self, env: RuleEnv) {
        self.env = env;
    }

    fn find_best(
        &self,
        root: AlgNode,
        desired: &AlgTraitSet,
        rules: Option<&[RuleRef]>,
        mq: &dyn MetadataProvider,
    ) -> Result<AlgNode> {
        let mut budget = self.config.max_iterations;
        let mut fired = HashSet::new();
        let mut root = self.enforce_collation(root, desired);

        let main = match rules {
            Some(rules) => rules.to_vec(),
            None => {
                let pre = self.registry.rules(RulePhase::PreProcess);
                root = self.run_to_fixpoint(root, &pre, mq, &mut budget, &mut fired);
                self.registry.rules(RulePhase::Default)
            }
        };
        let logical: Vec<RuleRef> = main
            .iter()
            .filter(|r| r.rule_type() == RuleType::Transformation)
            .cloned()
            .collect();
        root = self.run_to_fixpoint(root, &logical, mq, &mut budget, &mut fired);
        let mut result = self.run_to_fixpoint(root, &main, mq, &mut budget, &mut fired);
        if let Some(abstract_converter) = needs_converter(&result, desired) {
            trace!("Converting root from {}", result.convention());
            result = self.run_to_fixpoint(abstract_converter, &main, mq, &mut budget, &mut fired);
        }

        let iterations = self.config.max_iterations - budget;
        if let Some(convention) = desired.convention {
            if convention != Convention::None {
                if let Some(stuck) = first_outside(&result, convention) {
                    debug!("Optimization failed: {} not in {}", stuck.digest(), convention);
                    return Err(PrepareError::CannotPlan {
                        convention: convention.to_string(),
                        node: stuck.digest(),
                    });
                }
            }
        }
        debug!(
            "Optimization complete: iterations={}, nodes={}",
            iterations,
            result.node_count()
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alg::AlgKind;
    use crate::cost::DefaultCostFactory;
    use crate::entity::{Capability, CapabilitySet, EntityHandle};
    use crate::metadata::DefaultMetadataProvider;
    use crate::pattern::{OpMatcher, Pattern};
    use crate::rex::RexNode;
    use crate::rule::{Rule, RuleType};
    use crate::traits::{Collation, FieldCollation};
    use crate::types::{AlgDataType, PolyType, RowType};

    fn scan() -> AlgNode {
        let row = RowType::builder()
            .add("a", AlgDataType::scalar(PolyType::Integer))
            .add("b", AlgDataType::scalar(PolyType::Integer))
            .build();
        AlgNode::scan(EntityHandle::detached(
            vec!["t".into()],
            row,
            CapabilitySet::of(&[Capability::Scannable]),
        ))
    }

    fn mq() -> DefaultMetadataProvider {
        DefaultMetadataProvider::new(Arc::new(DefaultCostFactory::default()))
    }

    /// Moves any logical node into the enumerable convention once its inputs are.
    struct Implement;

    impl Rule for Implement {
        fn name(&self) -> &str {
            "Implement"
        }

        fn rule_type(&self) -> RuleType {
            RuleType::Implementation
        }

        fn pattern(&self) -> Pattern {
            Pattern::Variadic(OpMatcher::InConvention(Convention::None))
        }

        fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
            if call.node.inputs().iter().any(AlgNode::is_logical) {
                return None;
            }
            Some(call.node.clone().with_convention(Convention::Enumerable))
        }
    }

    /// Swaps nothing but always claims to produce a new plan: a filter on TRUE
    /// is wrapped in another filter on TRUE.
    struct Grow;

    impl Rule for Grow {
        fn name(&self) -> &str {
            "Grow"
        }

        fn rule_type(&self) -> RuleType {
            RuleType::Transformation
        }

        fn pattern(&self) -> Pattern {
            Pattern::filter()
        }

        fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
            Some(AlgNode::filter(call.node.clone(), RexNode::bool_literal(true)))
        }
    }

    #[test]
    fn test_implements_whole_tree() {
        let mut engine = HeuristicEngine::default();
        engine.add_rule(Arc::new(Implement), RulePhase::Default);
        let root = AlgNode::filter(scan(), RexNode::bool_literal(true));
        let best = engine
            .find_best(root, &AlgTraitSet::of(Convention::Enumerable), None, &mq())
            .unwrap();
        assert!(best.find(&|n| n.is_logical()).is_none());
        assert_eq!(best.node_count(), 2);
    }

    #[test]
    fn test_converter_input_may_stay_in_other_convention() {
        let engine = HeuristicEngine::default();
        let bindable = scan().with_convention(Convention::Bindable);
        let root = AlgNode::converter(bindable, Convention::Enumerable);
        let best = engine
            .find_best(root, &AlgTraitSet::of(Convention::Enumerable), None, &mq())
            .unwrap();
        assert_eq!(best.kind(), AlgKind::Converter);
    }

    /// Replaces a logical converter over a bindable node with a real one.
    struct Bridge;

    impl Rule for Bridge {
        fn name(&self) -> &str {
            "Bridge"
        }

        fn rule_type(&self) -> RuleType {
            RuleType::Implementation
        }

        fn pattern(&self) -> Pattern {
            Pattern::Operator(
                OpMatcher::Logical(AlgKind::Converter),
                vec![Pattern::Variadic(OpMatcher::InConvention(Convention::Bindable))],
            )
        }

        fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
            let input = call.input(0)?.clone();
            Some(AlgNode::converter(input, Convention::Enumerable))
        }
    }

    #[test]
    fn test_root_in_other_convention_gets_converter() {
        let mut engine = HeuristicEngine::default();
        let bindable = scan().with_convention(Convention::Bindable);
        let desired = AlgTraitSet::of(Convention::Enumerable);
        assert!(engine.find_best(bindable.clone(), &desired, None, &mq()).is_err());

        engine.add_rule(Arc::new(Bridge), RulePhase::Default);
        let best = engine.find_best(bindable, &desired, None, &mq()).unwrap();
        assert_eq!(best.kind(), AlgKind::Converter);
        assert_eq!(best.convention(), Convention::Enumerable);
    }

    #[test]
    fn test_unimplementable_root_fails() {
        let engine = HeuristicEngine::default();
        let err = engine
            .find_best(scan(), &AlgTraitSet::of(Convention::Enumerable), None, &mq())
            .unwrap_err();
        assert!(matches!(err, PrepareError::CannotPlan { .. }));
    }

    #[test]
    fn test_iteration_budget_stops_runaway_rules() {
        let mut engine = HeuristicEngine::new(EngineConfig { max_iterations: 5 });
        engine.add_rule(Arc::new(Grow), RulePhase::Default);
        let root = AlgNode::filter(scan(), RexNode::bool_literal(true));
        let clock = engine.metadata_clock();
        let best = engine
            .find_best(root, &AlgTraitSet::any(), None, &mq())
            .unwrap();
        assert_eq!(clock.now(), 5);
        assert!(best.node_count() > 2);
    }

    #[test]
    fn test_explicit_rules_skip_registered_phases() {
        let mut engine = HeuristicEngine::default();
        engine.add_rule(Arc::new(Implement), RulePhase::PreProcess);
        let rules: Vec<RuleRef> = Vec::new();
        let best = engine
            .find_best(scan(), &AlgTraitSet::any(), Some(&rules), &mq())
            .unwrap();
        assert!(best.is_logical());
    }

    #[test]
    fn test_sort_enforcer_added_only_with_collation_trait() {
        let desired = AlgTraitSet::any().replace_collation(Collation::of(vec![FieldCollation::asc(0)]));

        let plain = HeuristicEngine::default();
        let best = plain.find_best(scan(), &desired, None, &mq()).unwrap();
        assert_eq!(best.kind(), AlgKind::Scan);

        let sorted = HeuristicEngine::with_trait_defs(
            EngineConfig::default(),
            vec![TraitDef::Convention, TraitDef::Collation],
        );
        let best = sorted.find_best(scan(), &desired, None, &mq()).unwrap();
        assert!(matches!(best.op(), AlgOp::Sort { .. }));
    }

    #[test]
    fn test_trait_defs_are_replaceable() {
        let mut engine = HeuristicEngine::default();
        engine.clear_trait_defs();
        engine.add_trait_def(TraitDef::DataModel);
        engine.add_trait_def(TraitDef::DataModel);
        assert_eq!(engine.trait_defs(), &[TraitDef::DataModel]);
    }
}
