//! # Row Expressions
//!
//! Scalar expressions evaluated per row: input references, literals and operator
//! calls. They appear in filter conditions, projections, calc programs and join
//! conditions.
//!
//! Every expression carries its algebra type, so a node's output row type can be
//! derived from its expressions without consulting the inputs again.
//!
//! ## Rewriting helpers
//!
//! Rules rarely build expressions from scratch. They move them across operators,
//! which means renumbering input references:
//!
//! - [`RexNode::shift`] moves every reference by a fixed offset (pushing a
//!   condition into the right input of a join).
//! - [`RexNode::substitute`] replaces each reference with the expression a
//!   projection computes for it (merging two projections, pushing a filter below a
//!   project).
//! - [`RexNode::fold`] evaluates constant sub-expressions.

use crate::types::{AlgDataType, PolyType};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Constant value of a literal.
///
/// `Float64` is wrapped in `OrderedFloat` so literals can take part in `Eq`/`Hash`
/// (node digests and rule-firing bookkeeping rely on both).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(OrderedFloat<f64>),
    Utf8(String),
    /// Days since 1970-01-01.
    Date(i32),
}

impl ScalarValue {
    /// The algebra type a literal of this value gets by default.
    pub fn default_type(&self) -> AlgDataType {
        match self {
            ScalarValue::Null => AlgDataType::nullable_scalar(PolyType::Null),
            ScalarValue::Bool(_) => AlgDataType::scalar(PolyType::Boolean),
            ScalarValue::Int64(_) => AlgDataType::scalar(PolyType::BigInt),
            ScalarValue::Float64(_) => AlgDataType::scalar(PolyType::Double),
            ScalarValue::Utf8(_) => AlgDataType::scalar(PolyType::Varchar),
            ScalarValue::Date(_) => AlgDataType::scalar(PolyType::Date),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Int64(v) => Some(*v as f64),
            ScalarValue::Float64(v) => Some(v.0),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Bool(v) => write!(f, "{}", v),
            ScalarValue::Int64(v) => write!(f, "{}", v),
            ScalarValue::Float64(v) => write!(f, "{}", v),
            ScalarValue::Utf8(v) => write!(f, "'{}'", v),
            ScalarValue::Date(v) => write!(f, "DATE({})", v),
        }
    }
}

/// Operators a call can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RexOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Not,
    IsNull,
    IsNotNull,
    Plus,
    Minus,
    Times,
    Divide,
    Cast,
    /// Non-deterministic function (e.g. `RAND`); never folded.
    Random,
}

impl RexOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            RexOp::Eq | RexOp::NotEq | RexOp::Lt | RexOp::LtEq | RexOp::Gt | RexOp::GtEq
        )
    }

    pub fn is_deterministic(self) -> bool {
        !matches!(self, RexOp::Random)
    }

    fn symbol(self) -> &'static str {
        match self {
            RexOp::Eq => "=",
            RexOp::NotEq => "<>",
            RexOp::Lt => "<",
            RexOp::LtEq => "<=",
            RexOp::Gt => ">",
            RexOp::GtEq => ">=",
            RexOp::And => "AND",
            RexOp::Or => "OR",
            RexOp::Not => "NOT",
            RexOp::IsNull => "IS NULL",
            RexOp::IsNotNull => "IS NOT NULL",
            RexOp::Plus => "+",
            RexOp::Minus => "-",
            RexOp::Times => "*",
            RexOp::Divide => "/",
            RexOp::Cast => "CAST",
            RexOp::Random => "RAND",
        }
    }
}

/// A scalar expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RexNode {
    /// Reference to field `index` of the input row.
    InputRef { index: usize, ty: AlgDataType },
    Literal { value: ScalarValue, ty: AlgDataType },
    Call {
        op: RexOp,
        operands: Vec<RexNode>,
        ty: AlgDataType,
    },
}

impl RexNode {
    pub fn input_ref(index: usize, ty: AlgDataType) -> Self {
        RexNode::InputRef { index, ty }
    }

    pub fn literal(value: ScalarValue) -> Self {
        let ty = value.default_type();
        RexNode::Literal { value, ty }
    }

    pub fn bool_literal(value: bool) -> Self {
        RexNode::literal(ScalarValue::Bool(value))
    }

    /// Call whose result type is inferred from the operator and operands.
    pub fn call(op: RexOp, operands: Vec<RexNode>) -> Self {
        let nullable = operands.iter().any(|o| o.ty().is_nullable());
        let ty = match op {
            RexOp::IsNull | RexOp::IsNotNull => AlgDataType::scalar(PolyType::Boolean),
            RexOp::Plus | RexOp::Minus | RexOp::Times | RexOp::Divide => operands
                .first()
                .map(|o| o.ty().with_nullable(nullable))
                .unwrap_or_else(AlgDataType::any),
            RexOp::Random => AlgDataType::scalar(PolyType::Double),
            RexOp::Cast => operands
                .first()
                .map(|o| o.ty().clone())
                .unwrap_or_else(AlgDataType::any),
            _ => AlgDataType::scalar(PolyType::Boolean).with_nullable(nullable),
        };
        RexNode::Call { op, operands, ty }
    }

    /// Cast `operand` to `ty`.
    pub fn cast(operand: RexNode, ty: AlgDataType) -> Self {
        RexNode::Call {
            op: RexOp::Cast,
            operands: vec![operand],
            ty,
        }
    }

    pub fn equals(left: RexNode, right: RexNode) -> Self {
        RexNode::call(RexOp::Eq, vec![left, right])
    }

    /// Conjunction of `conjuncts`; `TRUE` when empty, the sole element when singular.
    pub fn and(conjuncts: Vec<RexNode>) -> Self {
        let mut flat = Vec::new();
        for c in conjuncts {
            flat.extend(c.conjunctions());
        }
        flat.retain(|c| !c.is_always_true());
        match flat.len() {
            0 => RexNode::bool_literal(true),
            1 => flat.remove(0),
            _ => RexNode::call(RexOp::And, flat),
        }
    }

    pub fn ty(&self) -> &AlgDataType {
        match self {
            RexNode::InputRef { ty, .. } | RexNode::Literal { ty, .. } | RexNode::Call { ty, .. } => {
                ty
            }
        }
    }

    /// Top-level conjuncts of an `AND` tree (the expression itself otherwise).
    pub fn conjunctions(&self) -> Vec<RexNode> {
        match self {
            RexNode::Call {
                op: RexOp::And,
                operands,
                ..
            } => operands.iter().flat_map(|o| o.conjunctions()).collect(),
            other => vec![other.clone()],
        }
    }

    /// Indexes of every input field referenced.
    pub fn input_refs(&self) -> BTreeSet<usize> {
        let mut refs = BTreeSet::new();
        self.collect_refs(&mut refs);
        refs
    }

    fn collect_refs(&self, refs: &mut BTreeSet<usize>) {
        match self {
            RexNode::InputRef { index, .. } => {
                refs.insert(*index);
            }
            RexNode::Literal { .. } => {}
            RexNode::Call { operands, .. } => {
                for o in operands {
                    o.collect_refs(refs);
                }
            }
        }
    }

    /// No input references and only deterministic operators.
    pub fn is_constant(&self) -> bool {
        match self {
            RexNode::InputRef { .. } => false,
            RexNode::Literal { .. } => true,
            RexNode::Call { op, operands, .. } => {
                op.is_deterministic() && operands.iter().all(RexNode::is_constant)
            }
        }
    }

    pub fn is_deterministic(&self) -> bool {
        match self {
            RexNode::Call { op, operands, .. } => {
                op.is_deterministic() && operands.iter().all(RexNode::is_deterministic)
            }
            _ => true,
        }
    }

    pub fn is_always_true(&self) -> bool {
        matches!(
            self,
            RexNode::Literal {
                value: ScalarValue::Bool(true),
                ..
            }
        )
    }

    pub fn is_always_false(&self) -> bool {
        matches!(
            self,
            RexNode::Literal {
                value: ScalarValue::Bool(false) | ScalarValue::Null,
                ..
            }
        )
    }

    pub fn as_literal(&self) -> Option<&ScalarValue> {
        match self {
            RexNode::Literal { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn as_input_ref(&self) -> Option<usize> {
        match self {
            RexNode::InputRef { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Copy with every input reference moved by `offset`.
    pub fn shift(&self, offset: isize) -> RexNode {
        self.shift_from(0, offset)
    }

    /// Copy with references at or above `threshold` moved by `offset`.
    pub fn shift_from(&self, threshold: usize, offset: isize) -> RexNode {
        self.map_refs(&|index, ty| {
            if index >= threshold {
                let moved = (index as isize + offset).max(0) as usize;
                RexNode::input_ref(moved, ty.clone())
            } else {
                RexNode::input_ref(index, ty.clone())
            }
        })
    }

    /// Copy with reference `i` replaced by `exprs[i]`. References past the end of
    /// `exprs` are kept as they are.
    pub fn substitute(&self, exprs: &[RexNode]) -> RexNode {
        self.map_refs(&|index, ty| {
            exprs
                .get(index)
                .cloned()
                .unwrap_or_else(|| RexNode::input_ref(index, ty.clone()))
        })
    }

    /// Copy with references renumbered through `mapping` (`old -> new`).
    pub fn remap(&self, mapping: &[Option<usize>]) -> Option<RexNode> {
        let refs = self.input_refs();
        if refs
            .iter()
            .any(|&i| mapping.get(i).copied().flatten().is_none())
        {
            return None;
        }
        Some(self.map_refs(&|index, ty| {
            let target = mapping.get(index).copied().flatten().unwrap_or(index);
            RexNode::input_ref(target, ty.clone())
        }))
    }

    fn map_refs(&self, f: &dyn Fn(usize, &AlgDataType) -> RexNode) -> RexNode {
        match self {
            RexNode::InputRef { index, ty } => f(*index, ty),
            RexNode::Literal { .. } => self.clone(),
            RexNode::Call { op, operands, ty } => RexNode::Call {
                op: *op,
                operands: operands.iter().map(|o| o.map_refs(f)).collect(),
                ty: ty.clone(),
            },
        }
    }

    /// Evaluate constant sub-expressions. Expressions that cannot be evaluated are
    /// returned unchanged.
    pub fn fold(&self) -> RexNode {
        let RexNode::Call { op, operands, ty } = self else {
            return self.clone();
        };
        let operands: Vec<RexNode> = operands.iter().map(RexNode::fold).collect();
        match op {
            RexOp::And => {
                if operands.iter().any(RexNode::is_always_false) {
                    return RexNode::bool_literal(false);
                }
                return RexNode::and(operands);
            }
            RexOp::Or => {
                if operands.iter().any(RexNode::is_always_true) {
                    return RexNode::bool_literal(true);
                }
                let mut remaining: Vec<RexNode> = operands
                    .into_iter()
                    .filter(|o| !o.is_always_false())
                    .collect();
                return match remaining.len() {
                    0 => RexNode::bool_literal(false),
                    1 => remaining.remove(0),
                    _ => RexNode::call(RexOp::Or, remaining),
                };
            }
            _ => {}
        }
        let literals: Option<Vec<&ScalarValue>> = operands.iter().map(RexNode::as_literal).collect();
        let folded = literals.and_then(|values| evaluate(*op, &values));
        match folded {
            Some(value) => RexNode::Literal {
                value,
                ty: ty.clone(),
            },
            None => RexNode::Call {
                op: *op,
                operands,
                ty: ty.clone(),
            },
        }
    }
}

fn evaluate(op: RexOp, values: &[&ScalarValue]) -> Option<ScalarValue> {
    use ScalarValue as V;
    match (op, values) {
        (RexOp::Not, [V::Bool(b)]) => Some(V::Bool(!b)),
        (RexOp::IsNull, [v]) => Some(V::Bool(v.is_null())),
        (RexOp::IsNotNull, [v]) => Some(V::Bool(!v.is_null())),
        (op, [a, b]) if op.is_comparison() => {
            if a.is_null() || b.is_null() {
                return Some(V::Null);
            }
            let ordering = match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y)?,
                _ => {
                    if std::mem::discriminant(*a) != std::mem::discriminant(*b) {
                        return None;
                    }
                    a.cmp(b)
                }
            };
            let result = match op {
                RexOp::Eq => ordering.is_eq(),
                RexOp::NotEq => ordering.is_ne(),
                RexOp::Lt => ordering.is_lt(),
                RexOp::LtEq => ordering.is_le(),
                RexOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Some(V::Bool(result))
        }
        (RexOp::Plus | RexOp::Minus | RexOp::Times, [V::Int64(a), V::Int64(b)]) => {
            let v = match op {
                RexOp::Plus => a.checked_add(*b)?,
                RexOp::Minus => a.checked_sub(*b)?,
                _ => a.checked_mul(*b)?,
            };
            Some(V::Int64(v))
        }
        (RexOp::Plus | RexOp::Minus | RexOp::Times | RexOp::Divide, [a, b]) => {
            let (x, y) = (a.as_f64()?, b.as_f64()?);
            let v = match op {
                RexOp::Plus => x + y,
                RexOp::Minus => x - y,
                RexOp::Times => x * y,
                _ if y == 0.0 => return None,
                _ => x / y,
            };
            Some(V::Float64(OrderedFloat(v)))
        }
        _ => None,
    }
}

impl fmt::Display for RexNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RexNode::InputRef { index, .. } => write!(f, "${}", index),
            RexNode::Literal { value, .. } => write!(f, "{}", value),
            RexNode::Call { op, operands, .. } => {
                write!(f, "{}(", op.symbol())?;
                for (i, o) in operands.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", o)?;
                }
                write!(f, ")")
            }
        }
    }
}
