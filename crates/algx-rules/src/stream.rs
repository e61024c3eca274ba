//! # Stream Rules
//!
//! A `Delta` turns a relation into the stream of its changes. These rules push
//! the delta down to the scans, where a streamable entity provides its stream
//! and any other entity contributes nothing.
//!
//! ```text
//! Delta                       Project
//!   Project         =>          Delta
//!     Scan(orders)                Scan(orders)
//!
//! Delta(Join(L, R))  =>  UNION ALL(Join(Delta(L), R), Join(L, Delta(R)))
//! ```
//!
//! An aggregate is only crossed when one of its grouping keys is monotonic, so
//! that each group is final once the stream has moved past it.

use algx_core::alg::{AlgKind, AlgNode, AlgOp, JoinType, SetOpKind};
use algx_core::entity::Modality;
use algx_core::pattern::Pattern;
use algx_core::rule::{Rule, RuleCall, RuleType};
use algx_core::traits::Monotonicity;

/// Delta over a single-input operator that commutes with it.
pub struct DeltaTransposeRule {
    name: &'static str,
    kind: AlgKind,
}

impl DeltaTransposeRule {
    pub const PROJECT: Self = Self {
        name: "DeltaProjectTransposeRule",
        kind: AlgKind::Project,
    };
    pub const FILTER: Self = Self {
        name: "DeltaFilterTransposeRule",
        kind: AlgKind::Filter,
    };
    pub const SORT: Self = Self {
        name: "DeltaSortTransposeRule",
        kind: AlgKind::Sort,
    };
    pub const AGGREGATE: Self = Self {
        name: "DeltaAggregateTransposeRule",
        kind: AlgKind::Aggregate,
    };
    pub const UNION: Self = Self {
        name: "DeltaUnionTransposeRule",
        kind: AlgKind::SetOp,
    };
}

/// Whether field `index` of `node` only ever grows or only ever shrinks.
fn is_monotonic(node: &AlgNode, index: usize) -> bool {
    let leading = node.traits().collation.first().map(|f| f.field_index);
    if leading == Some(index) {
        return true;
    }
    match node.op() {
        AlgOp::Scan {
            entity,
            projects: None,
            ..
        } => node
            .row_type()
            .field(index)
            .is_some_and(|f| entity.monotonicity(&f.name) != Monotonicity::NotMonotonic),
        _ => false,
    }
}

impl Rule for DeltaTransposeRule {
    fn name(&self) -> &str {
        self.name
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::over(AlgKind::Delta, self.kind)
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let child = call.input(0)?;
        match child.op() {
            AlgOp::Aggregate { group_set, .. } => {
                let input = child.input(0)?;
                if !group_set.iter().any(|&g| is_monotonic(input, g)) {
                    return None;
                }
            }
            AlgOp::SetOp { kind, all } => {
                if *kind != SetOpKind::Union || !*all {
                    return None;
                }
            }
            _ => {}
        }
        let inputs = child.inputs().iter().cloned().map(AlgNode::delta).collect();
        Some(child.with_inputs(inputs))
    }
}

/// `Delta(Join(L, R))` to the union of the two one-sided deltas.
pub struct DeltaJoinTransposeRule;

impl Rule for DeltaJoinTransposeRule {
    fn name(&self) -> &str {
        "DeltaJoinTransposeRule"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::over(AlgKind::Delta, AlgKind::Join)
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let join = call.input(0)?;
        let AlgOp::Join {
            join_type: JoinType::Inner,
            ..
        } = join.op()
        else {
            return None;
        };
        let left = join.input(0)?;
        let right = join.input(1)?;
        let left_delta = join.with_inputs(vec![AlgNode::delta(left.clone()), right.clone()]);
        let right_delta = join.with_inputs(vec![left.clone(), AlgNode::delta(right.clone())]);
        Some(AlgNode::set_op(
            SetOpKind::Union,
            true,
            vec![left_delta, right_delta],
        ))
    }
}

/// `Delta(Scan)` of a streamable entity is the entity's stream.
pub struct DeltaScanRule;

impl Rule for DeltaScanRule {
    fn name(&self) -> &str {
        "DeltaScanRule"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::over(AlgKind::Delta, AlgKind::Scan)
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let scan = call.input(0)?;
        let AlgOp::Scan { entity, .. } = scan.op() else {
            return None;
        };
        entity
            .supports_modality(Modality::Stream)
            .then(|| scan.clone())
    }
}

/// `Delta(Scan)` of an entity that does not stream is empty.
pub struct DeltaScanToEmptyRule;

impl Rule for DeltaScanToEmptyRule {
    fn name(&self) -> &str {
        "DeltaScanToEmptyRule"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::over(AlgKind::Delta, AlgKind::Scan)
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let scan = call.input(0)?;
        let AlgOp::Scan { entity, .. } = scan.op() else {
            return None;
        };
        if entity.supports_modality(Modality::Stream) {
            return None;
        }
        Some(AlgNode::values(scan.row_type().clone(), Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use algx_core::alg::AggregateCall;
    use algx_core::config::FeatureFlags;
    use algx_core::cost::DefaultCostFactory;
    use algx_core::entity::{Capability, CapabilitySet, EntityHandle};
    use algx_core::metadata::DefaultMetadataProvider;
    use algx_core::rex::RexNode;
    use algx_core::rule::RuleEnv;
    use algx_core::traits::{Collation, FieldCollation};
    use algx_core::types::{AlgDataType, PolyType, RowType};
    use std::sync::Arc;

    fn scan(caps: &[Capability]) -> AlgNode {
        let row = RowType::builder()
            .add("ts", AlgDataType::scalar(PolyType::Timestamp))
            .add("qty", AlgDataType::scalar(PolyType::Integer))
            .build();
        AlgNode::scan(EntityHandle::detached(vec!["orders".into()], row, CapabilitySet::of(caps)))
    }

    fn run(rule: &dyn Rule, node: &AlgNode) -> Option<AlgNode> {
        let env = RuleEnv::new(FeatureFlags::default());
        let mq = DefaultMetadataProvider::new(Arc::new(DefaultCostFactory::default()));
        assert!(rule.pattern().matches(node));
        rule.on_match(&RuleCall::new(node, &mq, &env))
    }

    #[test]
    fn test_delta_pushed_through_filter() {
        let filter = AlgNode::filter(scan(&[Capability::Streamable]), RexNode::bool_literal(true));
        let out = run(&DeltaTransposeRule::FILTER, &AlgNode::delta(filter)).unwrap();
        assert_eq!(out.kind(), AlgKind::Filter);
        assert_eq!(out.input(0).unwrap().kind(), AlgKind::Delta);
    }

    #[test]
    fn test_delta_crosses_aggregate_only_on_monotonic_key() {
        let plain = AlgNode::aggregate(
            scan(&[Capability::Streamable]),
            vec![0],
            vec![AggregateCall::count_star("n")],
        );
        assert!(run(&DeltaTransposeRule::AGGREGATE, &AlgNode::delta(plain)).is_none());

        let ordered = AlgNode::sort(
            scan(&[Capability::Streamable]),
            Collation::of(vec![FieldCollation::asc(0)]),
            None,
            None,
        );
        let grouped = AlgNode::aggregate(ordered, vec![0], vec![AggregateCall::count_star("n")]);
        let out = run(&DeltaTransposeRule::AGGREGATE, &AlgNode::delta(grouped)).unwrap();
        assert_eq!(out.kind(), AlgKind::Aggregate);
    }

    #[test]
    fn test_delta_join_becomes_union_of_deltas() {
        let join = AlgNode::join(
            scan(&[Capability::Streamable]),
            scan(&[Capability::Scannable]),
            JoinType::Inner,
            RexNode::bool_literal(true),
        );
        let out = run(&DeltaJoinTransposeRule, &AlgNode::delta(join.clone())).unwrap();
        assert!(matches!(out.op(), AlgOp::SetOp { kind: SetOpKind::Union, all: true }));
        assert_eq!(out.row_type(), join.row_type());
    }

    #[test]
    fn test_delta_scan_stream_or_empty() {
        let stream = AlgNode::delta(scan(&[Capability::Streamable]));
        assert_eq!(run(&DeltaScanRule, &stream).unwrap().kind(), AlgKind::Scan);
        assert!(run(&DeltaScanToEmptyRule, &stream).is_none());

        let table = AlgNode::delta(scan(&[Capability::Scannable]));
        assert!(run(&DeltaScanRule, &table).is_none());
        let empty = run(&DeltaScanToEmptyRule, &table).unwrap();
        assert!(matches!(empty.op(), AlgOp::Values { tuples, .. } if tuples.is_empty()));
    }
}
