//! # Programs
//!
//! A program is one optimization stage: given the rule engine, a root and the
//! desired traits, it produces a new root. The planner keeps one program per
//! stage index and runs the requested one from `transform`.

use crate::alg::AlgNode;
use crate::engine::RuleEngine;
use crate::error::Result;
use crate::metadata::MetadataProvider;
use crate::rule::RuleRef;
use crate::traits::AlgTraitSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub trait Program: Send + Sync {
    fn name(&self) -> &str;

    fn run(
        &self,
        engine: &dyn RuleEngine,
        root: AlgNode,
        desired: &AlgTraitSet,
        mq: &dyn MetadataProvider,
    ) -> Result<AlgNode>;
}

pub type ProgramRef = Arc<dyn Program>;

impl fmt::Debug for dyn Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Runs the engine with every registered rule.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleEngineProgram;

impl Program for RuleEngineProgram {
    fn name(&self) -> &str {
        "rule-engine"
    }

    fn run(
        &self,
        engine: &dyn RuleEngine,
        root: AlgNode,
        desired: &AlgTraitSet,
        mq: &dyn MetadataProvider,
    ) -> Result<AlgNode> {
        engine.find_best(root, desired, None, mq)
    }
}

/// Runs the engine with a fixed rule subset, ignoring registered rules.
pub struct RuleSetProgram {
    name: String,
    rules: Vec<RuleRef>,
}

impl RuleSetProgram {
    pub fn new(name: impl Into<String>, rules: Vec<RuleRef>) -> Self {
        Self {
            name: name.into(),
            rules,
        }
    }

    pub fn rules(&self) -> &[RuleRef] {
        &self.rules
    }
}

impl Program for RuleSetProgram {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(
        &self,
        engine: &dyn RuleEngine,
        root: AlgNode,
        desired: &AlgTraitSet,
        mq: &dyn MetadataProvider,
    ) -> Result<AlgNode> {
        engine.find_best(root, desired, Some(&self.rules), mq)
    }
}

/// Runs programs one after another, each on the previous one's output.
pub struct SequenceProgram {
    programs: Vec<ProgramRef>,
}

impl SequenceProgram {
    pub fn new(programs: Vec<ProgramRef>) -> Self {
        Self { programs }
    }
}

impl Program for SequenceProgram {
    fn name(&self) -> &str {
        "sequence"
    }

    fn run(
        &self,
        engine: &dyn RuleEngine,
        root: AlgNode,
        desired: &AlgTraitSet,
        mq: &dyn MetadataProvider,
    ) -> Result<AlgNode> {
        let mut node = root;
        for program in &self.programs {
            debug!("Running program '{}'", program.name());
            node = program.run(engine, node, desired, mq)?;
        }
        Ok(node)
    }
}

/// Constructors for common programs.
pub struct Programs;

impl Programs {
    /// The default per-stage list: a single stage running every registered rule.
    pub fn standard() -> Vec<ProgramRef> {
        vec![Arc::new(RuleEngineProgram)]
    }

    pub fn of(name: impl Into<String>, rules: Vec<RuleRef>) -> ProgramRef {
        Arc::new(RuleSetProgram::new(name, rules))
    }

    pub fn sequence(programs: Vec<ProgramRef>) -> ProgramRef {
        Arc::new(SequenceProgram::new(programs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::DefaultCostFactory;
    use crate::engine::HeuristicEngine;
    use crate::entity::{Capability, CapabilitySet, EntityHandle};
    use crate::metadata::DefaultMetadataProvider;
    use crate::pattern::Pattern;
    use crate::rex::RexNode;
    use crate::rule::{Rule, RuleCall, RulePhase, RuleType};
    use crate::types::{AlgDataType, PolyType, RowType};

    /// Removes filters on TRUE.
    struct DropTrivialFilter;

    impl Rule for DropTrivialFilter {
        fn name(&self) -> &str {
            "DropTrivialFilter"
        }

        fn rule_type(&self) -> RuleType {
            RuleType::Transformation
        }

        fn pattern(&self) -> Pattern {
            Pattern::filter()
        }

        fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
            match call.node.op() {
                crate::alg::AlgOp::Filter { condition } if condition.is_always_true() => {
                    call.input(0).cloned()
                }
                _ => None,
            }
        }
    }

    fn filtered_scan() -> AlgNode {
        let row = RowType::builder()
            .add("a", AlgDataType::scalar(PolyType::Integer))
            .build();
        let scan = AlgNode::scan(EntityHandle::detached(
            vec!["t".into()],
            row,
            CapabilitySet::of(&[Capability::Scannable]),
        ));
        AlgNode::filter(scan, RexNode::bool_literal(true))
    }

    fn mq() -> DefaultMetadataProvider {
        DefaultMetadataProvider::new(Arc::new(DefaultCostFactory::default()))
    }

    #[test]
    fn test_rule_set_program_uses_only_its_rules() {
        let engine = HeuristicEngine::default();
        let program = Programs::of("trivial", vec![Arc::new(DropTrivialFilter)]);
        let out = program
            .run(&engine, filtered_scan(), &AlgTraitSet::any(), &mq())
            .unwrap();
        assert_eq!(out.node_count(), 1);

        let standard = &Programs::standard()[0];
        let out = standard
            .run(&engine, filtered_scan(), &AlgTraitSet::any(), &mq())
            .unwrap();
        assert_eq!(out.node_count(), 2);
    }

    #[test]
    fn test_sequence_threads_output() {
        let mut engine = HeuristicEngine::default();
        engine.add_rule(Arc::new(DropTrivialFilter), RulePhase::Default);
        let program = Programs::sequence(vec![
            Arc::new(RuleEngineProgram),
            Programs::of("empty", Vec::new()),
        ]);
        let out = program
            .run(&engine, filtered_scan(), &AlgTraitSet::any(), &mq())
            .unwrap();
        assert_eq!(out.node_count(), 1);
    }
}
