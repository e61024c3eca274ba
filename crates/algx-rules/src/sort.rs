//! # Sort Rules
//!
//! Rules that move a sort, or a copy of its limit, closer to the leaves.
//!
//! ## SortProjectTransposeRule
//!
//! ```text
//! Before:                    After:
//!   Sort($0)                   Project(b=$1, a=$0)
//!     Project(b=$1, a=$0)        Sort($1)
//!       X                          X
//! ```
//!
//! ## SortJoinTransposeRule
//!
//! A sort over a left (right) outer join whose keys all come from the left
//! (right) input is copied onto that input. The copy fetches `offset + fetch`
//! rows and skips none; the original sort stays on top.
//!
//! ## SortRemoveConstantKeysRule
//!
//! Drops sort keys that are known constant in the input: literal projections
//! and fields pinned by an equality filter.
//!
//! ## SortUnionTransposeRule
//!
//! A limited sort over `UNION ALL` is copied onto every branch.

use algx_core::alg::{AlgKind, AlgNode, AlgOp, JoinType, SetOpKind};
use algx_core::pattern::Pattern;
use algx_core::rex::{RexNode, RexOp};
use algx_core::rule::{Rule, RuleCall, RuleType};
use algx_core::traits::{Collation, FieldCollation};

/// Fetch for a sort copied below its original: enough rows to serve the skipped
/// and the returned ones.
fn pushed_fetch(offset: Option<usize>, fetch: Option<usize>) -> Option<usize> {
    fetch.map(|f| f + offset.unwrap_or(0))
}

/// Whether `input` is already sorted on `collation` and returns no more than
/// `fetch` rows.
fn already_limited(input: &AlgNode, collation: &Collation, fetch: Option<usize>) -> bool {
    if !input.traits().collation.satisfies(collation) {
        return false;
    }
    match (fetch, input.op()) {
        (None, _) => true,
        (Some(limit), AlgOp::Sort { fetch: Some(f), .. }) => *f <= limit,
        _ => false,
    }
}

pub struct SortProjectTransposeRule;

impl Rule for SortProjectTransposeRule {
    fn name(&self) -> &str {
        "SortProjectTransposeRule"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::over(AlgKind::Sort, AlgKind::Project)
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let AlgOp::Sort {
            collation,
            offset,
            fetch,
        } = call.node.op()
        else {
            return None;
        };
        let project = call.input(0)?;
        let AlgOp::Project { exprs, .. } = project.op() else {
            return None;
        };
        let mapping: Vec<Option<usize>> = exprs.iter().map(RexNode::as_input_ref).collect();
        let pushed = collation.remap(&mapping)?;
        let input = project.input(0)?.clone();
        let sort = AlgNode::sort(input, pushed, *offset, *fetch);
        Some(project.with_inputs(vec![sort]))
    }
}

pub struct SortJoinTransposeRule;

impl Rule for SortJoinTransposeRule {
    fn name(&self) -> &str {
        "SortJoinTransposeRule"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::over(AlgKind::Sort, AlgKind::Join)
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let AlgOp::Sort {
            collation,
            offset,
            fetch,
        } = call.node.op()
        else {
            return None;
        };
        let join = call.input(0)?;
        let AlgOp::Join { join_type, .. } = join.op() else {
            return None;
        };
        let left = join.input(0)?;
        let right = join.input(1)?;
        let left_count = left.row_type().field_count();
        let fields = collation.fields();

        let (side, pushed) = match join_type {
            JoinType::Left if fields.iter().all(|f| f.field_index < left_count) => {
                (0, collation.clone())
            }
            JoinType::Right if fields.iter().all(|f| f.field_index >= left_count) => {
                let shifted = fields
                    .iter()
                    .map(|f| FieldCollation {
                        field_index: f.field_index - left_count,
                        ..*f
                    })
                    .collect();
                (1, Collation::of(shifted))
            }
            _ => return None,
        };

        let target = if side == 0 { left } else { right };
        let fetch = pushed_fetch(*offset, *fetch);
        if already_limited(target, &pushed, fetch) {
            return None;
        }
        let sorted = AlgNode::sort(target.clone(), pushed, None, fetch);
        let inputs = if side == 0 {
            vec![sorted, right.clone()]
        } else {
            vec![left.clone(), sorted]
        };
        Some(call.node.with_inputs(vec![join.with_inputs(inputs)]))
    }
}

pub struct SortRemoveConstantKeysRule;

impl SortRemoveConstantKeysRule {
    /// Fields of `input` that hold the same value in every row.
    fn constant_fields(input: &AlgNode) -> Vec<usize> {
        match input.op() {
            AlgOp::Project { exprs, .. } => exprs
                .iter()
                .enumerate()
                .filter(|(_, e)| e.is_constant())
                .map(|(i, _)| i)
                .collect(),
            AlgOp::Filter { condition } => condition
                .conjunctions()
                .iter()
                .filter_map(|c| match c {
                    RexNode::Call {
                        op: RexOp::Eq,
                        operands,
                        ..
                    } if operands.len() == 2 => match (&operands[0], &operands[1]) {
                        (r, l) | (l, r) if l.as_literal().is_some_and(|v| !v.is_null()) => {
                            r.as_input_ref()
                        }
                        _ => None,
                    },
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl Rule for SortRemoveConstantKeysRule {
    fn name(&self) -> &str {
        "SortRemoveConstantKeysRule"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::sort()
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let AlgOp::Sort {
            collation,
            offset,
            fetch,
        } = call.node.op()
        else {
            return None;
        };
        let input = call.input(0)?;
        let constants = Self::constant_fields(input);
        let kept: Vec<FieldCollation> = collation
            .fields()
            .iter()
            .filter(|f| !constants.contains(&f.field_index))
            .copied()
            .collect();
        if kept.len() == collation.fields().len() {
            return None;
        }
        if kept.is_empty() && offset.is_none() && fetch.is_none() {
            return Some(input.clone());
        }
        Some(AlgNode::sort(input.clone(), Collation::of(kept), *offset, *fetch))
    }
}

pub struct SortUnionTransposeRule;

impl Rule for SortUnionTransposeRule {
    fn name(&self) -> &str {
        "SortUnionTransposeRule"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::over(AlgKind::Sort, AlgKind::SetOp)
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let AlgOp::Sort {
            collation,
            offset,
            fetch,
        } = call.node.op()
        else {
            return None;
        };
        let union = call.input(0)?;
        let AlgOp::SetOp {
            kind: SetOpKind::Union,
            all: true,
        } = union.op()
        else {
            return None;
        };
        let fetch = pushed_fetch(*offset, *fetch)?;
        if union
            .inputs()
            .iter()
            .all(|i| already_limited(i, collation, Some(fetch)))
        {
            return None;
        }
        let branches = union
            .inputs()
            .iter()
            .map(|i| {
                if already_limited(i, collation, Some(fetch)) {
                    i.clone()
                } else {
                    AlgNode::sort(i.clone(), collation.clone(), None, Some(fetch))
                }
            })
            .collect();
        Some(call.node.with_inputs(vec![union.with_inputs(branches)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use algx_core::config::FeatureFlags;
    use algx_core::cost::DefaultCostFactory;
    use algx_core::entity::{Capability, CapabilitySet, EntityHandle};
    use algx_core::metadata::DefaultMetadataProvider;
    use algx_core::rex::ScalarValue;
    use algx_core::rule::RuleEnv;
    use algx_core::types::{AlgDataType, PolyType, RowType};
    use std::sync::Arc;

    fn int() -> AlgDataType {
        AlgDataType::scalar(PolyType::Integer)
    }

    fn scan(name: &str, columns: &[&str]) -> AlgNode {
        let mut row = RowType::builder();
        for c in columns {
            row = row.add(*c, int());
        }
        AlgNode::scan(EntityHandle::detached(
            vec![name.into()],
            row.build(),
            CapabilitySet::of(&[Capability::Scannable]),
        ))
    }

    fn run(rule: &dyn Rule, node: &AlgNode) -> Option<AlgNode> {
        let env = RuleEnv::new(FeatureFlags::default());
        let mq = DefaultMetadataProvider::new(Arc::new(DefaultCostFactory::default()));
        assert!(rule.pattern().matches(node));
        rule.on_match(&RuleCall::new(node, &mq, &env))
    }

    fn by(field: usize) -> Collation {
        Collation::of(vec![FieldCollation::asc(field)])
    }

    #[test]
    fn test_sort_moves_below_field_project() {
        let project = AlgNode::project_fields(scan("t", &["a", "b"]), &[1, 0]);
        let sort = AlgNode::sort(project, by(0), None, Some(5));
        let out = run(&SortProjectTransposeRule, &sort).unwrap();
        assert_eq!(out.kind(), AlgKind::Project);
        let AlgOp::Sort { collation, fetch, .. } = out.input(0).unwrap().op() else {
            panic!("expected sort");
        };
        assert_eq!(collation, &by(1));
        assert_eq!(fetch, &Some(5));
    }

    #[test]
    fn test_sort_on_computed_field_stays() {
        let input = scan("t", &["a"]);
        let plus = RexNode::call(
            RexOp::Plus,
            vec![RexNode::input_ref(0, int()), RexNode::literal(ScalarValue::Int64(1))],
        );
        let project = AlgNode::project(input, vec![plus], vec!["p".into()]);
        let sort = AlgNode::sort(project, by(0), None, None);
        assert!(run(&SortProjectTransposeRule, &sort).is_none());
    }

    #[test]
    fn test_sort_copied_onto_left_join_input_once() {
        let join = AlgNode::join(
            scan("l", &["a"]),
            scan("r", &["b"]),
            JoinType::Left,
            RexNode::bool_literal(true),
        );
        let sort = AlgNode::sort(join, by(0), Some(2), Some(3));
        let out = run(&SortJoinTransposeRule, &sort).unwrap();
        let pushed = out.input(0).unwrap().input(0).unwrap();
        let AlgOp::Sort { offset, fetch, .. } = pushed.op() else {
            panic!("expected sort on the left input");
        };
        assert_eq!((*offset, *fetch), (None, Some(5)));
        assert!(run(&SortJoinTransposeRule, &out).is_none());
    }

    #[test]
    fn test_inner_join_sort_not_pushed() {
        let join = AlgNode::join(
            scan("l", &["a"]),
            scan("r", &["b"]),
            JoinType::Inner,
            RexNode::bool_literal(true),
        );
        let sort = AlgNode::sort(join, by(0), None, Some(3));
        assert!(run(&SortJoinTransposeRule, &sort).is_none());
    }

    #[test]
    fn test_constant_keys_removed() {
        let input = scan("t", &["a", "b"]);
        let filter = AlgNode::filter(
            input,
            RexNode::equals(RexNode::input_ref(0, int()), RexNode::literal(ScalarValue::Int64(4))),
        );
        let two_keys = Collation::of(vec![FieldCollation::asc(0), FieldCollation::desc(1)]);
        let sort = AlgNode::sort(filter.clone(), two_keys, None, None);
        let out = run(&SortRemoveConstantKeysRule, &sort).unwrap();
        let AlgOp::Sort { collation, .. } = out.op() else {
            panic!("expected sort");
        };
        assert_eq!(collation.fields().len(), 1);
        assert_eq!(collation.fields()[0].field_index, 1);

        let only_constant = AlgNode::sort(filter.clone(), by(0), None, None);
        assert_eq!(run(&SortRemoveConstantKeysRule, &only_constant).unwrap(), filter);
    }

    #[test]
    fn test_limit_copied_into_union_all_branches() {
        let union = AlgNode::set_op(SetOpKind::Union, true, vec![scan("x", &["a"]), scan("y", &["a"])]);
        let sort = AlgNode::sort(union, by(0), None, Some(10));
        let out = run(&SortUnionTransposeRule, &sort).unwrap();
        let branches = out.input(0).unwrap().inputs();
        assert!(branches.iter().all(|b| b.kind() == AlgKind::Sort));
        assert!(run(&SortUnionTransposeRule, &out).is_none());

        let distinct = AlgNode::set_op(SetOpKind::Union, false, vec![scan("x", &["a"]), scan("y", &["a"])]);
        let sort = AlgNode::sort(distinct, by(0), None, Some(10));
        assert!(run(&SortUnionTransposeRule, &sort).is_none());
    }
}
