//! # Document Rules
//!
//! Document operators that have a relational equivalent are rewritten into it so
//! that the relational rules and implementations apply to them.
//!
//! ```text
//! DocumentAggregate(group=$1, calls)   =>   Project(_id=CAST($0), calls...)
//!                                             Aggregate(group=[1], calls)
//!
//! DocumentSort(collation, offset, fetch)  =>  Sort(collation, offset, fetch)
//! ```

use algx_core::alg::{AlgKind, AlgNode, AlgOp};
use algx_core::pattern::Pattern;
use algx_core::rex::{RexNode, ScalarValue};
use algx_core::rule::{Rule, RuleCall, RuleType};
use algx_core::types::{AlgDataType, PolyType};

use crate::util::field_ref;

pub struct DocumentAggregateToAggregateRule;

impl Rule for DocumentAggregateToAggregateRule {
    fn name(&self) -> &str {
        "DocumentAggregateToAggregateRule"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::unary(AlgKind::DocumentAggregate)
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let AlgOp::DocumentAggregate { group, calls } = call.node.op() else {
            return None;
        };
        let input = call.input(0)?.clone();
        let group_set: Vec<usize> = group.iter().copied().collect();
        let keys = group_set.len();
        let aggregate = AlgNode::aggregate(input, group_set, calls.clone());
        let row = aggregate.row_type().clone();

        let id_type = AlgDataType::nullable_scalar(PolyType::Document);
        let id = match group {
            Some(_) => RexNode::cast(field_ref(&row, 0)?, id_type),
            None => RexNode::cast(RexNode::literal(ScalarValue::Null), id_type),
        };
        let mut exprs = vec![id];
        for i in 0..calls.len() {
            exprs.push(field_ref(&row, keys + i)?);
        }
        Some(AlgNode::project(aggregate, exprs, call.node.row_type().field_names()))
    }
}

pub struct DocumentSortToSortRule;

impl Rule for DocumentSortToSortRule {
    fn name(&self) -> &str {
        "DocumentSortToSortRule"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::unary(AlgKind::DocumentSort)
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let AlgOp::DocumentSort {
            collation,
            offset,
            fetch,
        } = call.node.op()
        else {
            return None;
        };
        let input = call.input(0)?.clone();
        Some(AlgNode::sort(input, collation.clone(), *offset, *fetch))
    }
}
