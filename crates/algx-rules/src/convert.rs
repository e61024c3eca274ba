//! # Converter Rules
//!
//! A [`ConvertRule`] implements one logical operator kind in a physical
//! convention. It fires once every input already lives in that convention, so
//! implementation proceeds bottom-up; inputs left in another convention are
//! bridged by the dedicated converter rules in `enumerable` and `bindable`.

use algx_core::alg::{AlgKind, AlgNode};
use algx_core::pattern::{OpMatcher, Pattern};
use algx_core::rule::{Rule, RuleCall, RuleType};
use algx_core::traits::Convention;

/// Predicate deciding whether a node can be implemented.
pub type Accepts = fn(&AlgNode) -> bool;

/// Implement logical nodes of one kind in one convention.
pub struct ConvertRule {
    name: &'static str,
    kind: AlgKind,
    to: Convention,
    accepts: Accepts,
}

impl ConvertRule {
    pub const fn new(name: &'static str, kind: AlgKind, to: Convention, accepts: Accepts) -> Self {
        Self {
            name,
            kind,
            to,
            accepts,
        }
    }

    pub fn kind(&self) -> AlgKind {
        self.kind
    }

    pub fn convention(&self) -> Convention {
        self.to
    }
}

/// Any node of the matched kind.
pub fn any(_: &AlgNode) -> bool {
    true
}

impl Rule for ConvertRule {
    fn name(&self) -> &str {
        self.name
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::Variadic(OpMatcher::Logical(self.kind))
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        if call.node.inputs().iter().any(|i| i.convention() != self.to) {
            return None;
        }
        if !(self.accepts)(call.node) {
            return None;
        }
        Some(call.node.clone().with_convention(self.to))
    }
}
