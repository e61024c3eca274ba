//! # Bindable Rules
//!
//! Implementations in the bindable convention, evaluated by the interpreter
//! against entities that can only be scanned (optionally with pushed filters and
//! projections). The bindable convention covers a small operator set; anything
//! else is implemented in the enumerable convention and reached through a
//! converter.

use algx_core::alg::{AlgKind, AlgNode, AlgOp, SetOpKind};
use algx_core::entity::Capability;
use algx_core::pattern::{OpMatcher, Pattern};
use algx_core::rule::{Rule, RuleCall, RuleType};
use algx_core::traits::Convention;

use crate::convert::{any, ConvertRule};

const BINDABLE: Convention = Convention::Bindable;

/// Entities the interpreter can read directly.
fn bindable_scan(node: &AlgNode) -> bool {
    let AlgOp::Scan { entity, .. } = node.op() else {
        return false;
    };
    entity.capabilities().can_scan()
        && !entity.has(Capability::Queryable)
        && !entity.has(Capability::Translatable)
}

fn union(node: &AlgNode) -> bool {
    matches!(node.op(), AlgOp::SetOp { kind: SetOpKind::Union, .. })
}

fn plain_aggregate(node: &AlgNode) -> bool {
    matches!(node.op(), AlgOp::Aggregate { calls, .. } if calls.iter().all(|c| !c.distinct))
}

pub const BINDABLE_SCAN_RULE: ConvertRule =
    ConvertRule::new("BindableScanRule", AlgKind::Scan, BINDABLE, bindable_scan);
pub const BINDABLE_FILTER_RULE: ConvertRule =
    ConvertRule::new("BindableFilterRule", AlgKind::Filter, BINDABLE, any);
pub const BINDABLE_PROJECT_RULE: ConvertRule =
    ConvertRule::new("BindableProjectRule", AlgKind::Project, BINDABLE, any);
pub const BINDABLE_SORT_RULE: ConvertRule =
    ConvertRule::new("BindableSortRule", AlgKind::Sort, BINDABLE, any);
pub const BINDABLE_JOIN_RULE: ConvertRule =
    ConvertRule::new("BindableJoinRule", AlgKind::Join, BINDABLE, any);
pub const BINDABLE_UNION_RULE: ConvertRule =
    ConvertRule::new("BindableUnionRule", AlgKind::SetOp, BINDABLE, union);
pub const BINDABLE_VALUES_RULE: ConvertRule =
    ConvertRule::new("BindableValuesRule", AlgKind::Values, BINDABLE, any);
pub const BINDABLE_AGGREGATE_RULE: ConvertRule =
    ConvertRule::new("BindableAggregateRule", AlgKind::Aggregate, BINDABLE, plain_aggregate);
pub const BINDABLE_WINDOW_RULE: ConvertRule =
    ConvertRule::new("BindableWindowRule", AlgKind::Window, BINDABLE, any);

/// Moves enumerable inputs of a node into the bindable convention when its other
/// inputs are already bindable, so a bindable rule can implement the node.
pub struct EnumerableToBindableConverterRule;

impl Rule for EnumerableToBindableConverterRule {
    fn name(&self) -> &str {
        "EnumerableToBindableConverterRule"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::Variadic(OpMatcher::InConvention(Convention::None))
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let inputs = call.node.inputs();
        let has = |c: Convention| inputs.iter().any(|i| i.convention() == c);
        if matches!(call.node.op(), AlgOp::Converter { .. })
            || has(Convention::None)
            || !has(Convention::Enumerable)
            || !has(BINDABLE)
        {
            return None;
        }
        let inputs = inputs
            .iter()
            .map(|i| {
                if i.convention() == Convention::Enumerable {
                    AlgNode::converter(i.clone(), BINDABLE)
                } else {
                    i.clone()
                }
            })
            .collect();
        Some(call.node.with_inputs(inputs))
    }
}
