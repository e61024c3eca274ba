//! Helpers shared by several rules: field references, join-condition splitting
//! and input reordering.

use algx_core::alg::{AlgNode, AlgOp, JoinType};
use algx_core::rex::{RexNode, RexOp};
use algx_core::types::RowType;

/// One input reference per field of `row`.
pub(crate) fn field_refs(row: &RowType) -> Vec<RexNode> {
    row.fields()
        .iter()
        .map(|f| RexNode::input_ref(f.index, f.ty.clone()))
        .collect()
}

/// Reference to field `index` of `row`, typed after that field.
pub(crate) fn field_ref(row: &RowType, index: usize) -> Option<RexNode> {
    row.field(index).map(|f| RexNode::input_ref(index, f.ty))
}

/// Project over `input` whose expressions are only input references, in order.
pub(crate) fn is_identity(exprs: &[RexNode], input: &AlgNode) -> bool {
    exprs.len() == input.row_type().field_count()
        && exprs
            .iter()
            .enumerate()
            .all(|(i, e)| e.as_input_ref() == Some(i))
}

/// Indexes of `exprs` if every expression is a plain input reference.
pub(crate) fn as_permutation(exprs: &[RexNode]) -> Option<Vec<usize>> {
    exprs.iter().map(RexNode::as_input_ref).collect()
}

/// Project over `input` that keeps its field names, reading `sources[i]` for
/// output field `i`.
pub(crate) fn project_restoring(input: AlgNode, sources: &[usize], names: Vec<String>) -> AlgNode {
    let row = input.row_type().clone();
    let exprs = sources.iter().filter_map(|&s| field_ref(&row, s)).collect();
    AlgNode::project(input, exprs, names)
}

/// Join type and condition of an inner join node.
pub(crate) fn inner_join(node: &AlgNode) -> Option<&RexNode> {
    match node.op() {
        AlgOp::Join {
            join_type: JoinType::Inner,
            condition,
        } => Some(condition),
        _ => None,
    }
}

/// Conjuncts of a join condition sorted by the inputs they reference.
#[derive(Debug, Default)]
pub(crate) struct SplitCondition {
    pub left: Vec<RexNode>,
    pub right: Vec<RexNode>,
    pub both: Vec<RexNode>,
}

/// Split `condition` over a row whose first `left_count` fields come from the
/// left input. Right-only conjuncts are shifted to the right input's numbering.
/// Constant conjuncts count as `both`.
pub(crate) fn split_condition(condition: &RexNode, left_count: usize) -> SplitCondition {
    let mut split = SplitCondition::default();
    for conjunct in condition.conjunctions() {
        if conjunct.is_always_true() {
            continue;
        }
        let refs = conjunct.input_refs();
        if refs.is_empty() || !conjunct.is_deterministic() {
            split.both.push(conjunct);
        } else if refs.iter().all(|&i| i < left_count) {
            split.left.push(conjunct);
        } else if refs.iter().all(|&i| i >= left_count) {
            split.right.push(conjunct.shift(-(left_count as isize)));
        } else {
            split.both.push(conjunct);
        }
    }
    split
}

/// Equality conjuncts of `condition` with one side on each input, as
/// `(left_field, right_field)` in the right input's numbering.
pub(crate) fn equi_keys(condition: &RexNode, left_count: usize) -> Vec<(usize, usize)> {
    condition
        .conjunctions()
        .iter()
        .filter_map(|c| match c {
            RexNode::Call {
                op: RexOp::Eq,
                operands,
                ..
            } if operands.len() == 2 => {
                let a = operands[0].as_input_ref()?;
                let b = operands[1].as_input_ref()?;
                match (a < left_count, b < left_count) {
                    (true, false) => Some((a, b - left_count)),
                    (false, true) => Some((b, a - left_count)),
                    _ => None,
                }
            }
            _ => None,
        })
        .collect()
}

/// Field renumbering for a join tree whose inputs of sizes `sizes` are
/// reordered so that position `p` holds original input `order[p]`. Returns
/// `old field -> new field` for every field.
pub(crate) fn reorder_mapping(sizes: &[usize], order: &[usize]) -> Vec<usize> {
    let mut new_offsets = vec![0; sizes.len()];
    let mut acc = 0;
    for &input in order {
        new_offsets[input] = acc;
        acc += sizes[input];
    }
    let mut mapping = Vec::with_capacity(acc);
    for (input, &size) in sizes.iter().enumerate() {
        for f in 0..size {
            mapping.push(new_offsets[input] + f);
        }
    }
    mapping
}

/// Apply a total `old -> new` mapping to `expr`.
pub(crate) fn remap_total(expr: &RexNode, mapping: &[usize]) -> Option<RexNode> {
    let partial: Vec<Option<usize>> = mapping.iter().copied().map(Some).collect();
    expr.remap(&partial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use algx_core::types::{AlgDataType, PolyType};

    fn int_ref(i: usize) -> RexNode {
        RexNode::input_ref(i, AlgDataType::scalar(PolyType::Integer))
    }

    #[test]
    fn test_split_condition_by_side() {
        let condition = RexNode::and(vec![
            RexNode::equals(int_ref(0), int_ref(3)),
            RexNode::equals(int_ref(1), RexNode::literal(algx_core::rex::ScalarValue::Int64(5))),
            RexNode::equals(int_ref(4), int_ref(3)),
        ]);
        let split = split_condition(&condition, 2);
        assert_eq!(split.left.len(), 1);
        assert_eq!(split.right.len(), 1);
        assert_eq!(split.right[0].input_refs().into_iter().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(split.both.len(), 1);
        assert_eq!(equi_keys(&condition, 2), vec![(0, 1)]);
    }

    #[test]
    fn test_reorder_mapping() {
        // (A:2, B:1, C:3) reordered to (A, C, B)
        assert_eq!(reorder_mapping(&[2, 1, 3], &[0, 2, 1]), vec![0, 1, 5, 2, 3, 4]);
        // reordered to (C, B, A)
        assert_eq!(reorder_mapping(&[2, 1, 3], &[2, 1, 0]), vec![4, 5, 3, 0, 1, 2]);
    }
}
