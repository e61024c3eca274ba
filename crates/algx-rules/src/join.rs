//! # Join Rules
//!
//! Rewrites of join trees.
//!
//! ## Predicate placement
//!
//! - **`FilterJoinRule`** moves the conjuncts of a filter above a join to where
//!   they can be evaluated earliest: into either input when they reference only
//!   that input, into the join condition when they reference both. Outer joins
//!   only accept predicates on their preserved side.
//! - **`JoinPushExpressionsRule`** computes the non-trivial operands of equality
//!   conditions in projections below the join, so that the join compares plain
//!   fields.
//!
//! ## Reordering
//!
//! - **`JoinCommuteRule`**: `A JOIN B -> B JOIN A`, with a projection restoring
//!   the original field order.
//! - **`JoinAssociateRule`**: `(A JOIN B) JOIN C -> A JOIN (B JOIN C)`.
//! - **`JoinPushThroughJoinRule`**: the right variant turns
//!   `(A JOIN B) JOIN C` into `(A JOIN C) JOIN B`, the left variant into
//!   `(C JOIN B) JOIN A`.
//!
//! Reordering is restricted to inner joins; outer joins have fixed sides.
//! Rewrites that would leave the new bottom join without any condition decline
//! rather than introduce a cross product.

use algx_core::alg::{AlgNode, AlgOp, JoinType};
use algx_core::pattern::Pattern;
use algx_core::rex::{RexNode, RexOp};
use algx_core::rule::{Rule, RuleCall, RuleType};

use crate::util::{
    field_refs, inner_join, project_restoring, remap_total, reorder_mapping, split_condition,
};

pub struct FilterJoinRule;

impl Rule for FilterJoinRule {
    fn name(&self) -> &str {
        "FilterJoinRule:filter"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::filter_join()
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let AlgOp::Filter { condition } = call.node.op() else {
            return None;
        };
        let join = call.input(0)?;
        let AlgOp::Join {
            join_type,
            condition: join_condition,
        } = join.op()
        else {
            return None;
        };
        let left = join.input(0)?;
        let right = join.input(1)?;
        let left_count = left.row_type().field_count();

        let split = split_condition(condition, left_count);
        let mut left_push = Vec::new();
        let mut right_push = Vec::new();
        let mut join_conds = vec![join_condition.clone()];
        let mut above = Vec::new();

        if join_type.generates_nulls_on_left() {
            above.extend(split.left);
        } else {
            left_push.extend(split.left);
        }
        if join_type.generates_nulls_on_right() || !join_type.projects_right() {
            above.extend(split.right.iter().map(|c| c.shift(left_count as isize)));
        } else {
            right_push.extend(split.right);
        }
        if *join_type == JoinType::Inner {
            join_conds.extend(split.both);
        } else {
            above.extend(split.both);
        }

        if left_push.is_empty() && right_push.is_empty() && *join_type != JoinType::Inner {
            return None;
        }
        if left_push.is_empty() && right_push.is_empty() && join_conds.len() == 1 {
            return None;
        }

        let new_left = if left_push.is_empty() {
            left.clone()
        } else {
            AlgNode::filter(left.clone(), RexNode::and(left_push))
        };
        let new_right = if right_push.is_empty() {
            right.clone()
        } else {
            AlgNode::filter(right.clone(), RexNode::and(right_push))
        };
        let new_join = AlgNode::join(new_left, new_right, *join_type, RexNode::and(join_conds));
        if above.is_empty() {
            Some(new_join)
        } else {
            Some(AlgNode::filter(new_join, RexNode::and(above)))
        }
    }
}

/// Operand of an equality after expression pushing.
enum Operand {
    Keep(RexNode),
    Left(usize, RexNode),
    Right(usize, RexNode),
}

pub struct JoinPushExpressionsRule;

impl JoinPushExpressionsRule {
    fn pushable(operand: &RexNode) -> bool {
        matches!(operand, RexNode::Call { .. })
            && operand.is_deterministic()
            && !operand.input_refs().is_empty()
    }
}

impl Rule for JoinPushExpressionsRule {
    fn name(&self) -> &str {
        "JoinPushExpressionsRule"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::join()
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let AlgOp::Join {
            join_type,
            condition,
        } = call.node.op()
        else {
            return None;
        };
        if !join_type.projects_right() {
            return None;
        }
        let left = call.input(0)?;
        let right = call.input(1)?;
        let nl = left.row_type().field_count();
        let nr = right.row_type().field_count();

        let mut left_exprs = Vec::new();
        let mut right_exprs = Vec::new();
        let mut conjuncts: Vec<Result<Vec<Operand>, RexNode>> = Vec::new();
        for conjunct in condition.conjunctions() {
            let operands = match &conjunct {
                RexNode::Call {
                    op: RexOp::Eq,
                    operands,
                    ..
                } => operands.clone(),
                _ => {
                    conjuncts.push(Err(conjunct.clone()));
                    continue;
                }
            };
            let mut rewritten = Vec::with_capacity(operands.len());
            for operand in &operands {
                let refs = operand.input_refs();
                if Self::pushable(operand) && refs.iter().all(|&i| i < nl) {
                    left_exprs.push(operand.clone());
                    rewritten.push(Operand::Left(left_exprs.len() - 1, operand.clone()));
                } else if Self::pushable(operand) && refs.iter().all(|&i| i >= nl) {
                    right_exprs.push(operand.shift(-(nl as isize)));
                    rewritten.push(Operand::Right(right_exprs.len() - 1, operand.clone()));
                } else {
                    rewritten.push(Operand::Keep(operand.clone()));
                }
            }
            conjuncts.push(Ok(rewritten));
        }
        if left_exprs.is_empty() && right_exprs.is_empty() {
            return None;
        }

        let pushed_left = left_exprs.len();
        let new_nl = nl + pushed_left;
        let rebuilt: Vec<RexNode> = conjuncts
            .into_iter()
            .map(|c| match c {
                Err(other) => other.shift_from(nl, pushed_left as isize),
                Ok(operands) => RexNode::call(
                    RexOp::Eq,
                    operands
                        .into_iter()
                        .map(|o| match o {
                            Operand::Keep(e) => e.shift_from(nl, pushed_left as isize),
                            Operand::Left(k, e) => RexNode::input_ref(nl + k, e.ty().clone()),
                            Operand::Right(k, e) => {
                                RexNode::input_ref(new_nl + nr + k, e.ty().clone())
                            }
                        })
                        .collect(),
                ),
            })
            .collect();

        let widen = |input: &AlgNode, extra: Vec<RexNode>| -> AlgNode {
            if extra.is_empty() {
                return input.clone();
            }
            let mut exprs = field_refs(input.row_type());
            let mut names = input.row_type().field_names();
            for e in extra {
                names.push(format!("$f{}", names.len()));
                exprs.push(e);
            }
            AlgNode::project(input.clone(), exprs, names)
        };
        let new_left = widen(left, left_exprs);
        let new_right = widen(right, right_exprs);
        let new_join = AlgNode::join(new_left, new_right, *join_type, RexNode::and(rebuilt));

        let sources: Vec<usize> = (0..nl).chain((0..nr).map(|j| new_nl + j)).collect();
        Some(project_restoring(
            new_join,
            &sources,
            call.node.row_type().field_names(),
        ))
    }
}

pub struct JoinCommuteRule;

impl Rule for JoinCommuteRule {
    fn name(&self) -> &str {
        "JoinCommuteRule"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::join()
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let condition = inner_join(call.node)?;
        let left = call.input(0)?;
        let right = call.input(1)?;
        let sizes = [left.row_type().field_count(), right.row_type().field_count()];
        let mapping = reorder_mapping(&sizes, &[1, 0]);
        let swapped = AlgNode::join(
            right.clone(),
            left.clone(),
            JoinType::Inner,
            remap_total(condition, &mapping)?,
        );
        Some(project_restoring(
            swapped,
            &mapping,
            call.node.row_type().field_names(),
        ))
    }
}

pub struct JoinAssociateRule;

impl Rule for JoinAssociateRule {
    fn name(&self) -> &str {
        "JoinAssociateRule"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::join_join_left()
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let top_condition = inner_join(call.node)?;
        let bottom = call.input(0)?;
        let bottom_condition = inner_join(bottom)?;
        let a = bottom.input(0)?;
        let b = bottom.input(1)?;
        let c = call.input(1)?;
        let na = a.row_type().field_count();

        let mut new_bottom = Vec::new();
        let mut new_top = Vec::new();
        for conjunct in top_condition
            .conjunctions()
            .into_iter()
            .chain(bottom_condition.conjunctions())
        {
            let refs = conjunct.input_refs();
            if !refs.is_empty() && refs.iter().all(|&i| i >= na) {
                new_bottom.push(conjunct.shift(-(na as isize)));
            } else {
                new_top.push(conjunct);
            }
        }
        if new_bottom.iter().all(RexNode::is_always_true) {
            return None;
        }

        let bc = AlgNode::join(b.clone(), c.clone(), JoinType::Inner, RexNode::and(new_bottom));
        Some(AlgNode::join(a.clone(), bc, JoinType::Inner, RexNode::and(new_top)))
    }
}

pub struct JoinPushThroughJoinRule {
    name: &'static str,
    order: [usize; 3],
}

impl JoinPushThroughJoinRule {
    /// `(A JOIN B) JOIN C -> (A JOIN C) JOIN B`
    pub const RIGHT: Self = Self {
        name: "JoinPushThroughJoinRule:right",
        order: [0, 2, 1],
    };
    /// `(A JOIN B) JOIN C -> (C JOIN B) JOIN A`
    pub const LEFT: Self = Self {
        name: "JoinPushThroughJoinRule:left",
        order: [2, 1, 0],
    };
}

impl Rule for JoinPushThroughJoinRule {
    fn name(&self) -> &str {
        self.name
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::join_join_left()
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let top_condition = inner_join(call.node)?;
        let bottom = call.input(0)?;
        let bottom_condition = inner_join(bottom)?;
        let inputs = [bottom.input(0)?, bottom.input(1)?, call.input(1)?];
        let sizes: Vec<usize> = inputs.iter().map(|i| i.row_type().field_count()).collect();
        let mapping = reorder_mapping(&sizes, &self.order);
        let bottom_width = sizes[self.order[0]] + sizes[self.order[1]];

        let mut new_bottom = Vec::new();
        let mut new_top = Vec::new();
        for conjunct in top_condition
            .conjunctions()
            .into_iter()
            .chain(bottom_condition.conjunctions())
        {
            let remapped = remap_total(&conjunct, &mapping)?;
            let refs = remapped.input_refs();
            if !refs.is_empty() && refs.iter().all(|&i| i < bottom_width) {
                new_bottom.push(remapped);
            } else {
                new_top.push(remapped);
            }
        }
        if new_bottom.iter().all(RexNode::is_always_true) {
            return None;
        }

        let [x, y, z] = self.order;
        let new_bottom_join = AlgNode::join(
            inputs[x].clone(),
            inputs[y].clone(),
            JoinType::Inner,
            RexNode::and(new_bottom),
        );
        let new_top_join = AlgNode::join(
            new_bottom_join,
            inputs[z].clone(),
            JoinType::Inner,
            RexNode::and(new_top),
        );
        Some(project_restoring(
            new_top_join,
            &mapping,
            call.node.row_type().field_names(),
        ))
    }
}
