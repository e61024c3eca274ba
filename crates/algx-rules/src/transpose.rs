//! # Transpose Rules
//!
//! Rewrites that move filters and projections past other operators:
//!
//! ```text
//! ProjectFilterTranspose:   Project(Filter(x))    -> Project(Filter(Project(x)))
//! FilterProjectTranspose:   Filter(Project(x))    -> Project(Filter(x))
//! ProjectMerge:             Project(Project(x))   -> Project(x)
//! FilterAggregateTranspose: Filter(Aggregate(x))  -> Aggregate(Filter(x))
//! ProjectWindowTranspose:   Project(Window(x))    -> Project(Window(Project(x)))
//! ```
//!
//! The projections pushed down by `ProjectFilterTranspose` and
//! `ProjectWindowTranspose` keep only the fields that something above still
//! reads; they decline when every field is read.

use algx_core::alg::{AggregateCall, AlgKind, AlgNode, AlgOp};
use algx_core::pattern::Pattern;
use algx_core::rex::RexNode;
use algx_core::rule::{Rule, RuleCall, RuleType};
use std::collections::BTreeSet;

use crate::util::is_identity;

/// `old -> new` mapping that keeps `used` fields of a row of `width` fields.
fn trim_mapping(used: &BTreeSet<usize>, width: usize) -> Vec<Option<usize>> {
    let mut mapping = vec![None; width];
    for (new, &old) in used.iter().enumerate() {
        if old < width {
            mapping[old] = Some(new);
        }
    }
    mapping
}

pub struct ProjectFilterTransposeRule;

impl Rule for ProjectFilterTransposeRule {
    fn name(&self) -> &str {
        "ProjectFilterTransposeRule"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::over(AlgKind::Project, AlgKind::Filter)
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let AlgOp::Project { exprs, names } = call.node.op() else {
            return None;
        };
        let filter = call.input(0)?;
        let AlgOp::Filter { condition } = filter.op() else {
            return None;
        };
        let input = filter.input(0)?;
        let width = input.row_type().field_count();

        let mut used: BTreeSet<usize> = condition.input_refs();
        for e in exprs {
            used.extend(e.input_refs());
        }
        if used.len() >= width {
            return None;
        }

        let mapping = trim_mapping(&used, width);
        let fields: Vec<usize> = used.iter().copied().collect();
        let below = AlgNode::project_fields(input.clone(), &fields);
        let new_filter = AlgNode::filter(below, condition.remap(&mapping)?);
        let new_exprs = exprs
            .iter()
            .map(|e| e.remap(&mapping))
            .collect::<Option<Vec<_>>>()?;
        if is_identity(&new_exprs, &new_filter) && new_filter.row_type().field_names() == *names {
            return Some(new_filter);
        }
        Some(AlgNode::project(new_filter, new_exprs, names.clone()))
    }
}

pub struct FilterProjectTransposeRule;

impl Rule for FilterProjectTransposeRule {
    fn name(&self) -> &str {
        "FilterProjectTransposeRule"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::over(AlgKind::Filter, AlgKind::Project)
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let AlgOp::Filter { condition } = call.node.op() else {
            return None;
        };
        let project = call.input(0)?;
        let AlgOp::Project { exprs, names } = project.op() else {
            return None;
        };
        if !condition.is_deterministic() || !exprs.iter().all(RexNode::is_deterministic) {
            return None;
        }
        let input = project.input(0)?.clone();
        let pushed = AlgNode::filter(input, condition.substitute(exprs));
        Some(AlgNode::project(pushed, exprs.clone(), names.clone()))
    }
}

pub struct ProjectMergeRule;

impl Rule for ProjectMergeRule {
    fn name(&self) -> &str {
        "ProjectMergeRule"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::over(AlgKind::Project, AlgKind::Project)
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let AlgOp::Project { exprs, names } = call.node.op() else {
            return None;
        };
        let bottom = call.input(0)?;
        let AlgOp::Project {
            exprs: bottom_exprs,
            ..
        } = bottom.op()
        else {
            return None;
        };
        let input = bottom.input(0)?.clone();
        let merged: Vec<RexNode> = exprs.iter().map(|e| e.substitute(bottom_exprs)).collect();
        if is_identity(&merged, &input) && input.row_type().field_names() == *names {
            return Some(input);
        }
        Some(AlgNode::project(input, merged, names.clone()))
    }
}

pub struct FilterAggregateTransposeRule;

impl Rule for FilterAggregateTransposeRule {
    fn name(&self) -> &str {
        "FilterAggregateTransposeRule"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::over(AlgKind::Filter, AlgKind::Aggregate)
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let AlgOp::Filter { condition } = call.node.op() else {
            return None;
        };
        let aggregate = call.input(0)?;
        let AlgOp::Aggregate { group_set, .. } = aggregate.op() else {
            return None;
        };
        let mapping: Vec<Option<usize>> = group_set.iter().map(|&g| Some(g)).collect();

        let mut pushed = Vec::new();
        let mut kept = Vec::new();
        for conjunct in condition.conjunctions() {
            let on_keys = conjunct.is_deterministic()
                && !conjunct.input_refs().is_empty()
                && conjunct.input_refs().iter().all(|&i| i < group_set.len());
            match on_keys.then(|| conjunct.remap(&mapping)).flatten() {
                Some(below) => pushed.push(below),
                None => kept.push(conjunct),
            }
        }
        if pushed.is_empty() {
            return None;
        }

        let input = aggregate.input(0)?.clone();
        let new_aggregate = aggregate.with_inputs(vec![AlgNode::filter(input, RexNode::and(pushed))]);
        if kept.is_empty() {
            Some(new_aggregate)
        } else {
            Some(AlgNode::filter(new_aggregate, RexNode::and(kept)))
        }
    }
}

pub struct ProjectWindowTransposeRule;

impl Rule for ProjectWindowTransposeRule {
    fn name(&self) -> &str {
        "ProjectWindowTransposeRule"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::over(AlgKind::Project, AlgKind::Window)
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let AlgOp::Project { exprs, names } = call.node.op() else {
            return None;
        };
        let window = call.input(0)?;
        let AlgOp::Window {
            partition,
            order,
            calls,
        } = window.op()
        else {
            return None;
        };
        let input = window.input(0)?;
        let width = input.row_type().field_count();

        let mut used: BTreeSet<usize> = partition.iter().copied().collect();
        used.extend(order.fields().iter().map(|f| f.field_index));
        for c in calls {
            used.extend(c.args.iter().copied());
        }
        for e in exprs {
            used.extend(e.input_refs().into_iter().filter(|&i| i < width));
        }
        if used.len() >= width {
            return None;
        }

        let input_mapping = trim_mapping(&used, width);
        let fields: Vec<usize> = used.iter().copied().collect();
        let below = AlgNode::project_fields(input.clone(), &fields);

        let new_partition = partition
            .iter()
            .map(|&p| input_mapping[p])
            .collect::<Option<Vec<_>>>()?;
        let new_order = order.remap(&input_mapping)?;
        let new_calls = calls
            .iter()
            .map(|c| {
                let args = c
                    .args
                    .iter()
                    .map(|&a| input_mapping.get(a).copied().flatten())
                    .collect::<Option<Vec<_>>>()?;
                Some(AggregateCall { args, ..c.clone() })
            })
            .collect::<Option<Vec<_>>>()?;
        let new_window = AlgNode::window(below, new_partition, new_order, new_calls);

        let mut output_mapping = input_mapping;
        for k in 0..calls.len() {
            output_mapping.push(Some(fields.len() + k));
        }
        let new_exprs = exprs
            .iter()
            .map(|e| e.remap(&output_mapping))
            .collect::<Option<Vec<_>>>()?;
        Some(AlgNode::project(new_window, new_exprs, names.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use algx_core::alg::AggFunction;
    use algx_core::config::FeatureFlags;
    use algx_core::cost::DefaultCostFactory;
    use algx_core::entity::{Capability, CapabilitySet, EntityHandle};
    use algx_core::metadata::DefaultMetadataProvider;
    use algx_core::rex::{RexOp, ScalarValue};
    use algx_core::rule::RuleEnv;
    use algx_core::traits::{Collation, FieldCollation};
    use algx_core::types::{AlgDataType, PolyType, RowType};
    use std::sync::Arc;

    fn int() -> AlgDataType {
        AlgDataType::scalar(PolyType::Integer)
    }

    fn scan() -> AlgNode {
        let row = RowType::builder()
            .add("a", int())
            .add("b", int())
            .add("c", int())
            .add("d", int())
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

    fn gt(field: usize, value: i64) -> RexNode {
        RexNode::call(
            RexOp::Gt,
            vec![RexNode::input_ref(field, int()), RexNode::literal(ScalarValue::Int64(value))],
        )
    }

    #[test]
    fn test_project_filter_transpose_trims_input() {
        let filter = AlgNode::filter(scan(), gt(2, 1));
        let project = AlgNode::project_fields(filter, &[0]);
        let out = run(&ProjectFilterTransposeRule, &project).unwrap();
        // Project(a) over Filter($1 > 1) over Project(a, c)
        let below = out.find(&|n| n.kind() == AlgKind::Project && n.input(0).map(|i| i.kind()) == Some(AlgKind::Scan));
        assert_eq!(below.unwrap().row_type().field_names(), vec!["a", "c"]);
        assert_eq!(out.row_type().field_names(), vec!["a"]);

        let wide = AlgNode::project_fields(AlgNode::filter(scan(), gt(2, 1)), &[0, 1, 3]);
        assert!(run(&ProjectFilterTransposeRule, &wide).is_none());
    }

    #[test]
    fn test_filter_project_transpose_substitutes() {
        let project = AlgNode::project_fields(scan(), &[3, 1]);
        let filter = AlgNode::filter(project, gt(0, 5));
        let out = run(&FilterProjectTransposeRule, &filter).unwrap();
        assert_eq!(out.kind(), AlgKind::Project);
        let AlgOp::Filter { condition } = out.input(0).unwrap().op() else {
            panic!("expected filter");
        };
        assert_eq!(condition.input_refs().into_iter().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_project_merge_removes_identity() {
        let inner = AlgNode::project_fields(scan(), &[1, 0, 2, 3]);
        let outer = AlgNode::project_fields(inner, &[1, 0, 2, 3]);
        let out = run(&ProjectMergeRule, &outer).unwrap();
        assert_eq!(out.kind(), AlgKind::Scan);
    }

    #[test]
    fn test_filter_aggregate_transpose_pushes_key_predicates() {
        let aggregate = AlgNode::aggregate(scan(), vec![2], vec![AggregateCall::count_star("n")]);
        let condition = RexNode::and(vec![gt(0, 1), gt(1, 10)]);
        let filter = AlgNode::filter(aggregate, condition);
        let out = run(&FilterAggregateTransposeRule, &filter).unwrap();
        assert_eq!(out.kind(), AlgKind::Filter);
        let aggregate = out.input(0).unwrap();
        let AlgOp::Filter { condition } = aggregate.input(0).unwrap().op() else {
            panic!("expected pushed filter");
        };
        assert_eq!(condition.input_refs().into_iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_project_window_transpose_remaps_calls() {
        let call = AggregateCall::new(AggFunction::Sum, vec![3], "s", int());
        let window = AlgNode::window(
            scan(),
            vec![1],
            Collation::of(vec![FieldCollation::asc(3)]),
            vec![call],
        );
        // keep b and the window result
        let project = AlgNode::project(
            window,
            vec![RexNode::input_ref(1, int()), RexNode::input_ref(4, int())],
            vec!["b".into(), "s".into()],
        );
        let out = run(&ProjectWindowTransposeRule, &project).unwrap();
        let AlgOp::Window { partition, calls, .. } = out.input(0).unwrap().op() else {
            panic!("expected window");
        };
        assert_eq!(partition, &vec![0]);
        assert_eq!(calls[0].args, vec![1]);
        let AlgOp::Project { exprs, .. } = out.op() else {
            panic!("expected project");
        };
        assert_eq!(exprs[1].as_input_ref(), Some(2));
    }
}
