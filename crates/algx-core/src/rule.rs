//! # Rule System
//!
//! The rule trait and the registry rule engines keep their rules in.
//!
//! ## Rule types
//!
//! - **Transformation rules** rewrite a logical subtree into an equivalent
//!   logical subtree (filter pushdown, join commutation, ...).
//! - **Implementation rules** move a logical node into an execution convention
//!   (logical filter to enumerable filter, ...).
//!
//! ## Phases
//!
//! Rules are registered into a [`RulePhase`]. Pre-process rules run before any
//! other rule; they resolve abstract allocations into physical placements, which
//! the remaining rules rely on.
//!
//! ## Matching
//!
//! Each rule declares a [`Pattern`]. The engine only calls
//! [`Rule::on_match`] on nodes that match it; the rule may still decline by
//! returning `None` (a join condition that cannot be split, a filter that
//! references columns of both inputs, ...).
//!
//! ## Deduplication
//!
//! [`Rule::rule_hash`] fingerprints a rule by name. The registry refuses a second
//! rule with the same name and engines use the fingerprint to remember which
//! rule already fired on which plan.

use crate::alg::AlgNode;
use crate::catalog::PlacementResolver;
use crate::config::FeatureFlags;
use crate::entity::ToAlgContext;
use crate::metadata::MetadataProvider;
use crate::pattern::Pattern;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleType {
    /// Logical to logical.
    Transformation,
    /// Logical to a physical convention.
    Implementation,
}

/// Group a rule is registered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RulePhase {
    PreProcess,
    Default,
}

/// Session-wide inputs rules may need besides the matched node.
#[derive(Clone, Default)]
pub struct RuleEnv {
    pub flags: FeatureFlags,
    pub to_alg: ToAlgContext,
    pub placements: Option<Arc<dyn PlacementResolver>>,
}

impl RuleEnv {
    pub fn new(flags: FeatureFlags) -> Self {
        Self {
            flags,
            to_alg: ToAlgContext::from_flags(&flags),
            placements: None,
        }
    }

    pub fn with_placements(mut self, placements: Arc<dyn PlacementResolver>) -> Self {
        self.placements = Some(placements);
        self
    }
}

impl fmt::Debug for RuleEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleEnv")
            .field("flags", &self.flags)
            .field("to_alg", &self.to_alg)
            .field("placements", &self.placements.is_some())
            .finish()
    }
}

/// What a rule sees when it fires.
pub struct RuleCall<'a> {
    pub node: &'a AlgNode,
    pub mq: &'a dyn MetadataProvider,
    pub env: &'a RuleEnv,
}

impl<'a> RuleCall<'a> {
    pub fn new(node: &'a AlgNode, mq: &'a dyn MetadataProvider, env: &'a RuleEnv) -> Self {
        Self { node, mq, env }
    }

    pub fn input(&self, i: usize) -> Option<&'a AlgNode> {
        self.node.input(i)
    }
}

/// A rewrite the rule engine may apply.
pub trait Rule: Send + Sync {
    /// Unique name of this rule.
    fn name(&self) -> &str;

    fn rule_type(&self) -> RuleType;

    /// Shape of the subtrees this rule applies to.
    fn pattern(&self) -> Pattern;

    /// Rewrite the matched node, or decline with `None`.
    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode>;

    fn rule_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.name().hash(&mut hasher);
        hasher.finish()
    }
}

pub type RuleRef = Arc<dyn Rule>;

impl fmt::Debug for dyn Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered rules per phase, unique by name.
#[derive(Default, Clone)]
pub struct RuleRegistry {
    entries: Vec<(RulePhase, RuleRef)>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `rule`; `false` if a rule with the same name is present.
    pub fn add_rule(&mut self, rule: RuleRef, phase: RulePhase) -> bool {
        if self.contains(rule.name()) {
            return false;
        }
        self.entries.push((phase, rule));
        true
    }

    pub fn remove_rule(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(_, r)| r.name() != name);
        self.entries.len() != before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(_, r)| r.name() == name)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rules of `phase`, in registration order.
    pub fn rules(&self, phase: RulePhase) -> Vec<RuleRef> {
        self.entries
            .iter()
            .filter(|(p, _)| *p == phase)
            .map(|(_, r)| Arc::clone(r))
            .collect()
    }

    /// Every rule name, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(_, r)| r.name().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RulePhase, &RuleRef)> {
        self.entries.iter().map(|(p, r)| (*p, r))
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl Rule for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn rule_type(&self) -> RuleType {
            RuleType::Transformation
        }

        fn pattern(&self) -> Pattern {
            Pattern::Any
        }

        fn on_match(&self, _call: &RuleCall<'_>) -> Option<AlgNode> {
            None
        }
    }

    #[test]
    fn test_registry_rejects_duplicate_names() {
        let mut registry = RuleRegistry::new();
        assert!(registry.add_rule(Arc::new(Named("a")), RulePhase::Default));
        assert!(!registry.add_rule(Arc::new(Named("a")), RulePhase::PreProcess));
        assert!(registry.add_rule(Arc::new(Named("b")), RulePhase::PreProcess));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.rules(RulePhase::PreProcess).len(), 1);
    }

    #[test]
    fn test_remove_rule() {
        let mut registry = RuleRegistry::new();
        registry.add_rule(Arc::new(Named("a")), RulePhase::Default);
        assert!(registry.remove_rule("a"));
        assert!(!registry.remove_rule("a"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_rule_hash_is_name_based() {
        assert_eq!(Named("x").rule_hash(), Named("x").rule_hash());
        assert_ne!(Named("x").rule_hash(), Named("y").rule_hash());
    }
}
