//! # Enumerable Rules
//!
//! Implementations of the logical operators in the enumerable (row iterator)
//! convention, the convention every prepared plan must end up in.
//!
//! Most rules are [`ConvertRule`]s that only decide which nodes they accept:
//!
//! | Rule | Accepts |
//! |------|---------|
//! | `EnumerableJoinRule` | inner and outer joins that are not merge-joinable |
//! | `EnumerableMergeJoinRule` | inner equi-joins with inputs sorted on the keys |
//! | `EnumerableSemiJoinRule` | semi and anti joins |
//! | `EnumerableSortRule` | sorts with a collation |
//! | `EnumerableLimitRule` | sorts with only an offset or fetch |
//! | `EnumerableIntersectRule`, `EnumerableMinusRule` | distinct variants only |
//! | `EnumerableModifyRule` | targets that are modifiable |
//! | `EnumerableScanRule` | entities that do not translate themselves |
//!
//! [`EnumerableInterpreterRule`] bridges bindable subtrees into the enumerable
//! convention; [`FilterToCalcRule`] and [`ProjectToCalcRule`] fuse operators that
//! no other rule picked up into a calc.

use algx_core::alg::{AlgKind, AlgNode, AlgOp, JoinType, SetOpKind};
use algx_core::entity::Capability;
use algx_core::pattern::{OpMatcher, Pattern};
use algx_core::rule::{Rule, RuleCall, RuleType};
use algx_core::traits::{Collation, Convention, FieldCollation};

use crate::convert::{any, ConvertRule};
use crate::util::{equi_keys, field_refs, inner_join};

const ENUMERABLE: Convention = Convention::Enumerable;

/// Inner equi-join whose inputs are already sorted on the join keys.
fn merge_joinable(node: &AlgNode) -> bool {
    let (Some(condition), Some(left), Some(right)) = (inner_join(node), node.input(0), node.input(1))
    else {
        return false;
    };
    let keys = equi_keys(condition, left.row_type().field_count());
    if keys.is_empty() || keys.len() != condition.conjunctions().len() {
        return false;
    }
    let left_keys = Collation::of(keys.iter().map(|&(l, _)| FieldCollation::asc(l)).collect());
    let right_keys = Collation::of(keys.iter().map(|&(_, r)| FieldCollation::asc(r)).collect());
    left.traits().collation.satisfies(&left_keys) && right.traits().collation.satisfies(&right_keys)
}

fn hash_joinable(node: &AlgNode) -> bool {
    matches!(
        node.op(),
        AlgOp::Join {
            join_type: JoinType::Inner | JoinType::Left | JoinType::Right | JoinType::Full,
            ..
        }
    ) && !merge_joinable(node)
}

fn semi_join(node: &AlgNode) -> bool {
    matches!(
        node.op(),
        AlgOp::Join {
            join_type: JoinType::Semi | JoinType::Anti,
            ..
        }
    )
}

fn sorts(node: &AlgNode) -> bool {
    matches!(node.op(), AlgOp::Sort { collation, .. } if !collation.is_empty())
}

fn limits(node: &AlgNode) -> bool {
    matches!(node.op(), AlgOp::Sort { collation, .. } if collation.is_empty())
}

fn union(node: &AlgNode) -> bool {
    matches!(node.op(), AlgOp::SetOp { kind: SetOpKind::Union, .. })
}

fn distinct_intersect(node: &AlgNode) -> bool {
    matches!(
        node.op(),
        AlgOp::SetOp {
            kind: SetOpKind::Intersect,
            all: false
        }
    )
}

fn distinct_minus(node: &AlgNode) -> bool {
    matches!(
        node.op(),
        AlgOp::SetOp {
            kind: SetOpKind::Minus,
            all: false
        }
    )
}

fn modifiable(node: &AlgNode) -> bool {
    matches!(node.op(), AlgOp::Modify { entity, .. } if entity.has(Capability::Modifiable))
}

fn enumerable_scan(node: &AlgNode) -> bool {
    matches!(node.op(), AlgOp::Scan { entity, .. } if !entity.has(Capability::Translatable))
}

pub const ENUMERABLE_JOIN_RULE: ConvertRule =
    ConvertRule::new("EnumerableJoinRule", AlgKind::Join, ENUMERABLE, hash_joinable);
pub const ENUMERABLE_MERGE_JOIN_RULE: ConvertRule =
    ConvertRule::new("EnumerableMergeJoinRule", AlgKind::Join, ENUMERABLE, merge_joinable);
pub const ENUMERABLE_SEMI_JOIN_RULE: ConvertRule =
    ConvertRule::new("EnumerableSemiJoinRule", AlgKind::Join, ENUMERABLE, semi_join);
pub const ENUMERABLE_STREAMER_RULE: ConvertRule =
    ConvertRule::new("EnumerableStreamerRule", AlgKind::Streamer, ENUMERABLE, any);
pub const ENUMERABLE_PROJECT_RULE: ConvertRule =
    ConvertRule::new("EnumerableProjectRule", AlgKind::Project, ENUMERABLE, any);
pub const ENUMERABLE_FILTER_RULE: ConvertRule =
    ConvertRule::new("EnumerableFilterRule", AlgKind::Filter, ENUMERABLE, any);
pub const ENUMERABLE_AGGREGATE_RULE: ConvertRule =
    ConvertRule::new("EnumerableAggregateRule", AlgKind::Aggregate, ENUMERABLE, any);
pub const ENUMERABLE_SORT_RULE: ConvertRule =
    ConvertRule::new("EnumerableSortRule", AlgKind::Sort, ENUMERABLE, sorts);
pub const ENUMERABLE_LIMIT_RULE: ConvertRule =
    ConvertRule::new("EnumerableLimitRule", AlgKind::Sort, ENUMERABLE, limits);
pub const ENUMERABLE_UNWIND_RULE: ConvertRule =
    ConvertRule::new("EnumerableUnwindRule", AlgKind::Unwind, ENUMERABLE, any);
pub const ENUMERABLE_UNION_RULE: ConvertRule =
    ConvertRule::new("EnumerableUnionRule", AlgKind::SetOp, ENUMERABLE, union);
pub const ENUMERABLE_INTERSECT_RULE: ConvertRule =
    ConvertRule::new("EnumerableIntersectRule", AlgKind::SetOp, ENUMERABLE, distinct_intersect);
pub const ENUMERABLE_MINUS_RULE: ConvertRule =
    ConvertRule::new("EnumerableMinusRule", AlgKind::SetOp, ENUMERABLE, distinct_minus);
pub const ENUMERABLE_MODIFY_RULE: ConvertRule =
    ConvertRule::new("EnumerableModifyRule", AlgKind::Modify, ENUMERABLE, modifiable);
pub const ENUMERABLE_VALUES_RULE: ConvertRule =
    ConvertRule::new("EnumerableValuesRule", AlgKind::Values, ENUMERABLE, any);
pub const ENUMERABLE_WINDOW_RULE: ConvertRule =
    ConvertRule::new("EnumerableWindowRule", AlgKind::Window, ENUMERABLE, any);
pub const ENUMERABLE_SCAN_RULE: ConvertRule =
    ConvertRule::new("EnumerableScanRule", AlgKind::Scan, ENUMERABLE, enumerable_scan);
pub const ENUMERABLE_TABLE_FUNCTION_SCAN_RULE: ConvertRule = ConvertRule::new(
    "EnumerableTableFunctionScanRule",
    AlgKind::TableFunctionScan,
    ENUMERABLE,
    any,
);
pub const ENUMERABLE_CALC_RULE: ConvertRule =
    ConvertRule::new("EnumerableCalcRule", AlgKind::Calc, ENUMERABLE, any);
pub const ENUMERABLE_DOCUMENT_VALUES_RULE: ConvertRule =
    ConvertRule::new("EnumerableDocumentValuesRule", AlgKind::DocumentValues, ENUMERABLE, any);

/// `Filter(X)` to `Calc(X)` with the filter as condition.
pub struct FilterToCalcRule;

impl Rule for FilterToCalcRule {
    fn name(&self) -> &str {
        "FilterToCalcRule"
    }

    // Runs with the implementation rules, for nodes no converter took.
    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::filter()
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let AlgOp::Filter { condition } = call.node.op() else {
            return None;
        };
        let input = call.input(0)?.clone();
        let row = input.row_type().clone();
        Some(AlgNode::calc(
            input,
            field_refs(&row),
            row.field_names(),
            Some(condition.clone()),
        ))
    }
}

/// `Project(X)` to `Calc(X)` without condition.
pub struct ProjectToCalcRule;

impl Rule for ProjectToCalcRule {
    fn name(&self) -> &str {
        "ProjectToCalcRule"
    }

    // Runs with the implementation rules, for nodes no converter took.
    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::project()
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let AlgOp::Project { exprs, names } = call.node.op() else {
            return None;
        };
        let input = call.input(0)?.clone();
        Some(AlgNode::calc(input, exprs.clone(), names.clone(), None))
    }
}

/// Runs bindable subtrees through the interpreter.
///
/// A logical converter over a bindable root becomes an enumerable converter. A
/// logical node no bindable rule accepted, whose inputs are all bindable, gets
/// each input wrapped in an enumerable converter so enumerable rules can take it.
pub struct EnumerableInterpreterRule;

impl Rule for EnumerableInterpreterRule {
    fn name(&self) -> &str {
        "EnumerableInterpreterRule"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::Variadic(OpMatcher::InConvention(Convention::None))
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let inputs = call.node.inputs();
        if let AlgOp::Converter { .. } = call.node.op() {
            let input = call.input(0)?;
            return (input.convention() == Convention::Bindable)
                .then(|| AlgNode::converter(input.clone(), ENUMERABLE));
        }
        if inputs.is_empty()
            || !inputs.iter().all(|i| i.convention() == Convention::Bindable)
        {
            return None;
        }
        let wrapped = inputs
            .iter()
            .map(|i| AlgNode::converter(i.clone(), ENUMERABLE))
            .collect();
        Some(call.node.with_inputs(wrapped))
    }
}
