//! # Operand Patterns
//!
//! A small pattern language for the shape of tree a rule applies to. The engine
//! checks a rule's pattern before calling it, so rules only ever see nodes of the
//! shape they asked for.
//!
//! ## Pattern language
//!
//! - `Pattern::Operator(matcher, children)`: the node satisfies `matcher` and has
//!   exactly `children.len()` inputs, each matching the corresponding pattern.
//! - `Pattern::Variadic(matcher)`: the node satisfies `matcher`; its inputs,
//!   however many, are not inspected (set operations).
//! - `Pattern::Any`: any subtree.
//! - `Pattern::Leaf`: a node without inputs.
//!
//! Matchers distinguish logical nodes (convention `NONE`) from nodes already
//! implemented in a convention.

use crate::alg::{AlgKind, AlgNode};
use crate::traits::Convention;

#[derive(Debug, Clone)]
pub enum Pattern {
    Operator(OpMatcher, Vec<Pattern>),
    Variadic(OpMatcher),
    Any,
    Leaf,
}

/// Matcher for a single node, ignoring its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMatcher {
    /// Logical node of the given kind.
    Logical(AlgKind),
    /// Node of the given kind in the given convention.
    Physical(AlgKind, Convention),
    /// Node of the given kind in any convention.
    Kind(AlgKind),
    /// Any node in the given convention.
    InConvention(Convention),
}

impl OpMatcher {
    pub fn matches(&self, node: &AlgNode) -> bool {
        match *self {
            OpMatcher::Logical(kind) => node.kind() == kind && node.is_logical(),
            OpMatcher::Physical(kind, convention) => {
                node.kind() == kind && node.convention() == convention
            }
            OpMatcher::Kind(kind) => node.kind() == kind,
            OpMatcher::InConvention(convention) => node.convention() == convention,
        }
    }
}

impl Pattern {
    /// Logical node of `kind` over one input of any shape.
    pub fn unary(kind: AlgKind) -> Self {
        Pattern::Operator(OpMatcher::Logical(kind), vec![Pattern::Any])
    }

    /// Logical node of `kind` over one input of kind `input`.
    pub fn over(kind: AlgKind, input: AlgKind) -> Self {
        Pattern::Operator(OpMatcher::Logical(kind), vec![Pattern::kind_only(input)])
    }

    /// Logical leaf of `kind`.
    pub fn leaf(kind: AlgKind) -> Self {
        Pattern::Operator(OpMatcher::Logical(kind), vec![])
    }

    /// Logical node of `kind`, inputs not inspected.
    fn kind_only(kind: AlgKind) -> Self {
        Pattern::Variadic(OpMatcher::Logical(kind))
    }

    pub fn scan() -> Self {
        Pattern::leaf(AlgKind::Scan)
    }

    pub fn filter() -> Self {
        Pattern::unary(AlgKind::Filter)
    }

    pub fn project() -> Self {
        Pattern::unary(AlgKind::Project)
    }

    pub fn aggregate() -> Self {
        Pattern::unary(AlgKind::Aggregate)
    }

    pub fn sort() -> Self {
        Pattern::unary(AlgKind::Sort)
    }

    pub fn join() -> Self {
        Pattern::Operator(
            OpMatcher::Logical(AlgKind::Join),
            vec![Pattern::Any, Pattern::Any],
        )
    }

    /// Join whose left input is also a join.
    pub fn join_join_left() -> Self {
        Pattern::Operator(
            OpMatcher::Logical(AlgKind::Join),
            vec![Pattern::join(), Pattern::Any],
        )
    }

    /// Filter directly on top of a join.
    pub fn filter_join() -> Self {
        Pattern::Operator(OpMatcher::Logical(AlgKind::Filter), vec![Pattern::join()])
    }

    /// Whether `node` matches this pattern.
    pub fn matches(&self, node: &AlgNode) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Leaf => node.inputs().is_empty(),
            Pattern::Variadic(matcher) => matcher.matches(node),
            Pattern::Operator(matcher, children) => {
                matcher.matches(node)
                    && node.inputs().len() == children.len()
                    && node
                        .inputs()
                        .iter()
                        .zip(children)
                        .all(|(input, pattern)| pattern.matches(input))
            }
        }
    }
}
