//! # Aggregate Rules
//!
//! - **`AggregateExpandDistinctAggregatesRule`** rewrites an aggregate whose
//!   calls are all `DISTINCT` over the same arguments into two aggregates: the
//!   inner one groups by the grouping keys plus the distinct arguments, the outer
//!   one applies the calls without `DISTINCT`.
//! - **`AggregateReduceFunctionsRule`** replaces `AVG(x)` by
//!   `CAST(SUM(x) / COUNT(x))` computed in a projection above the aggregate.

use algx_core::alg::{AggFunction, AggregateCall, AlgKind, AlgNode, AlgOp};
use algx_core::pattern::Pattern;
use algx_core::rex::{RexNode, RexOp};
use algx_core::rule::{Rule, RuleCall, RuleType};
use algx_core::types::{AlgDataType, PolyType};

use crate::util::field_ref;

pub struct AggregateExpandDistinctAggregatesRule;

impl Rule for AggregateExpandDistinctAggregatesRule {
    fn name(&self) -> &str {
        "AggregateExpandDistinctAggregatesRule"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::aggregate()
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let AlgOp::Aggregate { group_set, calls } = call.node.op() else {
            return None;
        };
        let first = calls.first()?;
        if first.args.is_empty()
            || !calls.iter().all(|c| c.distinct && c.args == first.args)
        {
            return None;
        }

        let mut inner_keys = group_set.clone();
        for arg in &first.args {
            if !inner_keys.contains(arg) {
                inner_keys.push(*arg);
            }
        }
        let positions = first
            .args
            .iter()
            .map(|a| inner_keys.iter().position(|k| k == a))
            .collect::<Option<Vec<usize>>>()?;

        let input = call.input(0)?.clone();
        let inner = AlgNode::aggregate(input, inner_keys, Vec::new());
        let outer_calls = calls
            .iter()
            .map(|c| AggregateCall {
                args: positions.clone(),
                distinct: false,
                ..c.clone()
            })
            .collect();
        let outer_keys = (0..group_set.len()).collect();
        Some(AlgNode::aggregate(inner, outer_keys, outer_calls))
    }
}

pub struct AggregateReduceFunctionsRule;

impl Rule for AggregateReduceFunctionsRule {
    fn name(&self) -> &str {
        "AggregateReduceFunctionsRule"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::unary(AlgKind::Aggregate)
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let AlgOp::Aggregate { group_set, calls } = call.node.op() else {
            return None;
        };
        if !calls.iter().any(|c| c.func == AggFunction::Avg) {
            return None;
        }

        enum Output {
            Kept(usize),
            Average { sum: usize, count: usize, ty: AlgDataType },
        }

        let mut new_calls: Vec<AggregateCall> = Vec::new();
        let mut outputs = Vec::with_capacity(calls.len());
        for c in calls {
            if c.func != AggFunction::Avg {
                new_calls.push(c.clone());
                outputs.push(Output::Kept(new_calls.len() - 1));
                continue;
            }
            let mut sum = AggregateCall::new(
                AggFunction::Sum,
                c.args.clone(),
                format!("{}$sum", c.name),
                c.ty.with_nullable(true),
            );
            let mut count = AggregateCall::new(
                AggFunction::Count,
                c.args.clone(),
                format!("{}$count", c.name),
                AlgDataType::scalar(PolyType::BigInt),
            );
            sum.distinct = c.distinct;
            count.distinct = c.distinct;
            new_calls.push(sum);
            new_calls.push(count);
            outputs.push(Output::Average {
                sum: new_calls.len() - 2,
                count: new_calls.len() - 1,
                ty: c.ty.clone(),
            });
        }

        let keys = group_set.len();
        let input = call.input(0)?.clone();
        let aggregate = AlgNode::aggregate(input, group_set.clone(), new_calls);
        let row = aggregate.row_type().clone();

        let mut exprs = (0..keys)
            .map(|k| field_ref(&row, k))
            .collect::<Option<Vec<_>>>()?;
        for output in outputs {
            let expr = match output {
                Output::Kept(i) => field_ref(&row, keys + i)?,
                Output::Average { sum, count, ty } => {
                    let divide = RexNode::call(
                        RexOp::Divide,
                        vec![field_ref(&row, keys + sum)?, field_ref(&row, keys + count)?],
                    );
                    RexNode::cast(divide, ty)
                }
            };
            exprs.push(expr);
        }
        Some(AlgNode::project(aggregate, exprs, call.node.row_type().field_names()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use algx_core::config::FeatureFlags;
    use algx_core::cost::DefaultCostFactory;
    use algx_core::entity::{Capability, CapabilitySet, EntityHandle};
    use algx_core::metadata::DefaultMetadataProvider;
    use algx_core::rule::RuleEnv;
    use algx_core::types::RowType;
    use std::sync::Arc;

    fn int() -> AlgDataType {
        AlgDataType::scalar(PolyType::Integer)
    }

    fn scan() -> AlgNode {
        let row = RowType::builder()
            .add("k", int())
            .add("v", int())
            .add("w", int())
            .build();
        AlgNode::scan(EntityHandle::detached(
            vec!["t".into()],
            row,
            CapabilitySet::of(&[Capability::Scannable]),
        ))
    }

    fn run(rule: &dyn Rule, node: &AlgNode) -> Option<AlgNode> {
        let env = RuleEnv::new(FeatureFlags::default());
        let mq = DefaultMetadataProvider::new(Arc::new(DefaultCostFactory::default()));
        assert!(rule.pattern().matches(node));
        rule.on_match(&RuleCall::new(node, &mq, &env))
    }

    #[test]
    fn test_expand_distinct_to_two_aggregates() {
        let count = AggregateCall::new(AggFunction::Count, vec![1], "c", AlgDataType::scalar(PolyType::BigInt)).distinct();
        let sum = AggregateCall::new(AggFunction::Sum, vec![1], "s", int()).distinct();
        let aggregate = AlgNode::aggregate(scan(), vec![0], vec![count, sum]);
        let out = run(&AggregateExpandDistinctAggregatesRule, &aggregate).unwrap();

        assert_eq!(out.row_type().field_names(), vec!["k", "c", "s"]);
        let AlgOp::Aggregate { group_set, calls } = out.op() else {
            panic!("expected aggregate");
        };
        assert_eq!(group_set, &vec![0]);
        assert!(calls.iter().all(|c| !c.distinct && c.args == vec![1]));
        let AlgOp::Aggregate { group_set, calls } = out.input(0).unwrap().op() else {
            panic!("expected inner aggregate");
        };
        assert_eq!(group_set, &vec![0, 1]);
        assert!(calls.is_empty());
    }

    #[test]
    fn test_mixed_distinct_declines() {
        let count = AggregateCall::new(AggFunction::Count, vec![1], "c", int()).distinct();
        let sum = AggregateCall::new(AggFunction::Sum, vec![2], "s", int());
        let aggregate = AlgNode::aggregate(scan(), vec![0], vec![count, sum]);
        assert!(run(&AggregateExpandDistinctAggregatesRule, &aggregate).is_none());
    }

    #[test]
    fn test_avg_reduced_to_sum_over_count() {
        let avg = AggregateCall::new(AggFunction::Avg, vec![1], "a", int());
        let max = AggregateCall::new(AggFunction::Max, vec![2], "m", int());
        let aggregate = AlgNode::aggregate(scan(), vec![0], vec![avg, max]);
        let out = run(&AggregateReduceFunctionsRule, &aggregate).unwrap();

        assert_eq!(out.kind(), AlgKind::Project);
        assert_eq!(out.row_type().field_names(), vec!["k", "a", "m"]);
        let AlgOp::Aggregate { calls, .. } = out.input(0).unwrap().op() else {
            panic!("expected aggregate");
        };
        let funcs: Vec<AggFunction> = calls.iter().map(|c| c.func).collect();
        assert_eq!(funcs, vec![AggFunction::Max, AggFunction::Sum, AggFunction::Count]);
        let AlgOp::Project { exprs, .. } = out.op() else {
            panic!("expected project");
        };
        assert_eq!(exprs[2].as_input_ref(), Some(1));
        assert_eq!(exprs[1].input_refs().into_iter().collect::<Vec<_>>(), vec![2, 3]);
    }
}
