//! # Constant Reduction Rules
//!
//! Evaluate what can be evaluated while planning.
//!
//! - **`ReduceExpressionsRule`** folds constant sub-expressions of a project,
//!   filter, calc or join. A filter folded to `TRUE` disappears and one folded
//!   to `FALSE` becomes an empty `Values`.
//! - **`ValuesReduceRule`** evaluates a project and/or filter directly over
//!   literal rows.
//! - **`AggregateValuesRule`** computes an ungrouped aggregate over no rows.

use algx_core::alg::{AggFunction, AlgKind, AlgNode, AlgOp};
use algx_core::pattern::{OpMatcher, Pattern};
use algx_core::rex::{RexNode, ScalarValue};
use algx_core::rule::{Rule, RuleCall, RuleType};
use algx_core::types::RowType;

#[derive(Clone, Copy)]
enum Target {
    Project,
    Filter,
    Calc,
    Join,
}

/// Fold constant expressions of one operator kind.
pub struct ReduceExpressionsRule {
    name: &'static str,
    target: Target,
}

impl ReduceExpressionsRule {
    pub const PROJECT: Self = Self {
        name: "ReduceExpressionsRule:project",
        target: Target::Project,
    };
    pub const FILTER: Self = Self {
        name: "ReduceExpressionsRule:filter",
        target: Target::Filter,
    };
    pub const CALC: Self = Self {
        name: "ReduceExpressionsRule:calc",
        target: Target::Calc,
    };
    pub const JOIN: Self = Self {
        name: "ReduceExpressionsRule:join",
        target: Target::Join,
    };
}

fn empty_like(node: &AlgNode) -> AlgNode {
    AlgNode::values(node.row_type().clone(), Vec::new())
}

impl Rule for ReduceExpressionsRule {
    fn name(&self) -> &str {
        self.name
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        match self.target {
            Target::Project => Pattern::project(),
            Target::Filter => Pattern::filter(),
            Target::Calc => Pattern::unary(AlgKind::Calc),
            Target::Join => Pattern::join(),
        }
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let node = call.node;
        match node.op() {
            AlgOp::Project { exprs, names } => {
                let folded: Vec<RexNode> = exprs.iter().map(RexNode::fold).collect();
                (folded != *exprs).then(|| {
                    node.with_op(AlgOp::Project {
                        exprs: folded,
                        names: names.clone(),
                    })
                })
            }
            AlgOp::Filter { condition } => {
                let folded = condition.fold();
                if folded.is_always_true() {
                    call.input(0).cloned()
                } else if folded.is_always_false() {
                    Some(empty_like(node))
                } else {
                    (folded != *condition).then(|| node.with_op(AlgOp::Filter { condition: folded }))
                }
            }
            AlgOp::Calc {
                exprs,
                names,
                condition,
            } => {
                let folded_condition = condition.as_ref().map(RexNode::fold);
                if folded_condition.as_ref().is_some_and(RexNode::is_always_false) {
                    return Some(empty_like(node));
                }
                let folded_condition = folded_condition.filter(|c| !c.is_always_true());
                let folded: Vec<RexNode> = exprs.iter().map(RexNode::fold).collect();
                if folded == *exprs && folded_condition == *condition {
                    return None;
                }
                Some(node.with_op(AlgOp::Calc {
                    exprs: folded,
                    names: names.clone(),
                    condition: folded_condition,
                }))
            }
            AlgOp::Join {
                join_type,
                condition,
            } => {
                let folded = condition.fold();
                (folded != *condition).then(|| {
                    node.with_op(AlgOp::Join {
                        join_type: *join_type,
                        condition: folded,
                    })
                })
            }
            _ => None,
        }
    }
}

/// Input references of one literal row, typed after `row`.
fn row_literals(row: &RowType, tuple: &[ScalarValue]) -> Vec<RexNode> {
    row.fields()
        .iter()
        .zip(tuple)
        .map(|(f, v)| RexNode::Literal {
            value: v.clone(),
            ty: f.ty.clone(),
        })
        .collect()
}

/// Value of `expr` evaluated against one literal row, if it folds completely.
fn evaluate(expr: &RexNode, literals: &[RexNode]) -> Option<ScalarValue> {
    expr.substitute(literals).fold().as_literal().cloned()
}

#[derive(Clone, Copy)]
enum ValuesShape {
    Filter,
    Project,
    ProjectFilter,
}

/// Evaluate a filter and/or project over literal rows.
pub struct ValuesReduceRule {
    name: &'static str,
    shape: ValuesShape,
}

impl ValuesReduceRule {
    pub const FILTER: Self = Self {
        name: "ValuesReduceRule:filter",
        shape: ValuesShape::Filter,
    };
    pub const PROJECT: Self = Self {
        name: "ValuesReduceRule:project",
        shape: ValuesShape::Project,
    };
    pub const PROJECT_FILTER: Self = Self {
        name: "ValuesReduceRule:project-filter",
        shape: ValuesShape::ProjectFilter,
    };

    /// Rows of `values` that satisfy `condition`.
    fn filter_rows(values: &AlgNode, condition: &RexNode) -> Option<Vec<Vec<ScalarValue>>> {
        let AlgOp::Values { tuples, row_type } = values.op() else {
            return None;
        };
        let mut kept = Vec::new();
        for tuple in tuples {
            match evaluate(condition, &row_literals(row_type, tuple))? {
                ScalarValue::Bool(true) => kept.push(tuple.clone()),
                ScalarValue::Bool(false) | ScalarValue::Null => {}
                _ => return None,
            }
        }
        Some(kept)
    }

    fn project_rows(
        row_type: &RowType,
        tuples: &[Vec<ScalarValue>],
        exprs: &[RexNode],
    ) -> Option<Vec<Vec<ScalarValue>>> {
        tuples
            .iter()
            .map(|tuple| {
                let literals = row_literals(row_type, tuple);
                exprs.iter().map(|e| evaluate(e, &literals)).collect()
            })
            .collect()
    }
}

impl Rule for ValuesReduceRule {
    fn name(&self) -> &str {
        self.name
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        let values = Pattern::leaf(AlgKind::Values);
        match self.shape {
            ValuesShape::Filter => Pattern::Operator(OpMatcher::Logical(AlgKind::Filter), vec![values]),
            ValuesShape::Project => Pattern::Operator(OpMatcher::Logical(AlgKind::Project), vec![values]),
            ValuesShape::ProjectFilter => Pattern::Operator(
                OpMatcher::Logical(AlgKind::Project),
                vec![Pattern::Operator(OpMatcher::Logical(AlgKind::Filter), vec![values])],
            ),
        }
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        match self.shape {
            ValuesShape::Filter => {
                let AlgOp::Filter { condition } = call.node.op() else {
                    return None;
                };
                let values = call.input(0)?;
                let rows = Self::filter_rows(values, condition)?;
                Some(AlgNode::values(values.row_type().clone(), rows))
            }
            ValuesShape::Project => {
                let AlgOp::Project { exprs, .. } = call.node.op() else {
                    return None;
                };
                let AlgOp::Values { tuples, row_type } = call.input(0)?.op() else {
                    return None;
                };
                let rows = Self::project_rows(row_type, tuples, exprs)?;
                Some(AlgNode::values(call.node.row_type().clone(), rows))
            }
            ValuesShape::ProjectFilter => {
                let AlgOp::Project { exprs, .. } = call.node.op() else {
                    return None;
                };
                let filter = call.input(0)?;
                let AlgOp::Filter { condition } = filter.op() else {
                    return None;
                };
                let values = filter.input(0)?;
                let rows = Self::filter_rows(values, condition)?;
                let rows = Self::project_rows(values.row_type(), &rows, exprs)?;
                Some(AlgNode::values(call.node.row_type().clone(), rows))
            }
        }
    }
}

/// An ungrouped aggregate over no rows returns one row: zero for counts, `NULL`
/// for everything else.
pub struct AggregateValuesRule;

impl Rule for AggregateValuesRule {
    fn name(&self) -> &str {
        "AggregateValuesRule"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::Operator(
            OpMatcher::Logical(AlgKind::Aggregate),
            vec![Pattern::leaf(AlgKind::Values)],
        )
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let AlgOp::Aggregate { group_set, calls } = call.node.op() else {
            return None;
        };
        let AlgOp::Values { tuples, .. } = call.input(0)?.op() else {
            return None;
        };
        if !group_set.is_empty() || !tuples.is_empty() {
            return None;
        }
        let row = calls
            .iter()
            .map(|c| match c.func {
                AggFunction::Count | AggFunction::Sum0 => ScalarValue::Int64(0),
                _ => ScalarValue::Null,
            })
            .collect();
        Some(AlgNode::values(call.node.row_type().clone(), vec![row]))
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
    use algx_core::rex::RexOp;
    use algx_core::rule::RuleEnv;
    use algx_core::types::{AlgDataType, PolyType};
    use std::sync::Arc;

    fn int() -> AlgDataType {
        AlgDataType::scalar(PolyType::BigInt)
    }

    fn lit(v: i64) -> RexNode {
        RexNode::literal(ScalarValue::Int64(v))
    }

    fn run(rule: &dyn Rule, node: &AlgNode) -> Option<AlgNode> {
        let env = RuleEnv::new(FeatureFlags::default());
        let mq = DefaultMetadataProvider::new(Arc::new(DefaultCostFactory::default()));
        assert!(rule.pattern().matches(node));
        rule.on_match(&RuleCall::new(node, &mq, &env))
    }

    fn scan() -> AlgNode {
        let row = RowType::builder().add("a", int()).build();
        AlgNode::scan(EntityHandle::detached(
            vec!["t".into()],
            row,
            CapabilitySet::of(&[Capability::Scannable]),
        ))
    }

    fn values() -> AlgNode {
        let row = RowType::builder().add("x", int()).build();
        let tuples = (1..=4).map(|i| vec![ScalarValue::Int64(i)]).collect();
        AlgNode::values(row, tuples)
    }

    #[test]
    fn test_filter_folded_to_true_or_false() {
        let always = AlgNode::filter(scan(), RexNode::call(RexOp::Lt, vec![lit(1), lit(2)]));
        assert_eq!(run(&ReduceExpressionsRule::FILTER, &always).unwrap(), scan());

        let never = AlgNode::filter(scan(), RexNode::call(RexOp::Gt, vec![lit(1), lit(2)]));
        let out = run(&ReduceExpressionsRule::FILTER, &never).unwrap();
        assert!(matches!(out.op(), AlgOp::Values { tuples, .. } if tuples.is_empty()));
        assert_eq!(out.row_type(), scan().row_type());
    }

    #[test]
    fn test_project_constants_folded_once() {
        let sum = RexNode::call(RexOp::Plus, vec![lit(1), lit(2)]);
        let project = AlgNode::project(scan(), vec![sum], vec!["s".into()]);
        let out = run(&ReduceExpressionsRule::PROJECT, &project).unwrap();
        let AlgOp::Project { exprs, .. } = out.op() else {
            panic!("expected project");
        };
        assert_eq!(exprs[0].as_literal(), Some(&ScalarValue::Int64(3)));
        assert!(run(&ReduceExpressionsRule::PROJECT, &out).is_none());
    }

    #[test]
    fn test_filter_and_project_evaluated_over_values() {
        let x = RexNode::input_ref(0, int());
        let filter = AlgNode::filter(values(), RexNode::call(RexOp::Gt, vec![x.clone(), lit(2)]));
        let filtered = run(&ValuesReduceRule::FILTER, &filter).unwrap();
        let AlgOp::Values { tuples, .. } = filtered.op() else {
            panic!("expected values");
        };
        assert_eq!(tuples.len(), 2);

        let doubled = RexNode::call(RexOp::Times, vec![x, lit(2)]);
        let project = AlgNode::project(filter, vec![doubled], vec!["y".into()]);
        let out = run(&ValuesReduceRule::PROJECT_FILTER, &project).unwrap();
        let AlgOp::Values { tuples, .. } = out.op() else {
            panic!("expected values");
        };
        assert_eq!(tuples, &vec![vec![ScalarValue::Int64(6)], vec![ScalarValue::Int64(8)]]);
        assert_eq!(out.row_type().field_names(), vec!["y"]);
    }

    #[test]
    fn test_aggregate_over_empty_values() {
        let empty = AlgNode::values(RowType::builder().add("x", int()).build(), Vec::new());
        let calls = vec![
            AggregateCall::count_star("n"),
            AggregateCall::new(AggFunction::Max, vec![0], "m", int().with_nullable(true)),
        ];
        let aggregate = AlgNode::aggregate(empty.clone(), vec![], calls.clone());
        let out = run(&AggregateValuesRule, &aggregate).unwrap();
        let AlgOp::Values { tuples, .. } = out.op() else {
            panic!("expected values");
        };
        assert_eq!(tuples, &vec![vec![ScalarValue::Int64(0), ScalarValue::Null]]);

        let grouped = AlgNode::aggregate(empty, vec![0], calls);
        assert!(run(&AggregateValuesRule, &grouped).is_none());
    }
}
