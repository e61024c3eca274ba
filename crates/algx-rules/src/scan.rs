//! # Scan Rules
//!
//! Rules that act on the leaves of a plan:
//!
//! - **`ScanRule`** lowers a logical scan of a translatable entity through the
//!   entity handle, letting the entity produce its own algebra.
//! - **`FilterScanRule`** pushes a filter into the scan of an entity that can
//!   evaluate filters itself.
//! - **`ProjectScanRule`** pushes a field-only projection into the scan of an
//!   entity that can project. The interpreter variant does the same through the
//!   converter that sits on top of a bindable scan.
//!
//! Pushed filters are stored in the entity's own field numbering, so a scan that
//! already carries projections has its filter references translated back.

use algx_core::alg::{AlgKind, AlgNode, AlgOp};
use algx_core::entity::Capability;
use algx_core::pattern::{OpMatcher, Pattern};
use algx_core::rex::RexNode;
use algx_core::rule::{Rule, RuleCall, RuleType};
use tracing::debug;

use crate::util::as_permutation;

/// Lower a logical scan of a translatable entity.
pub struct ScanRule;

impl Rule for ScanRule {
    fn name(&self) -> &str {
        "ScanRule"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::scan()
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let AlgOp::Scan {
            entity,
            filters,
            projects,
        } = call.node.op()
        else {
            return None;
        };
        if !entity.has(Capability::Translatable) || !filters.is_empty() || projects.is_some() {
            return None;
        }
        match entity.to_scan_node(&call.env.to_alg, call.node.traits()) {
            Ok(node) => Some(node),
            Err(e) => {
                debug!("Translation of {} declined: {}", entity.name(), e);
                None
            }
        }
    }
}

/// Push `Filter(Scan)` into the scan.
pub struct FilterScanRule;

impl Rule for FilterScanRule {
    fn name(&self) -> &str {
        "FilterScanRule"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::over(AlgKind::Filter, AlgKind::Scan)
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let AlgOp::Filter { condition } = call.node.op() else {
            return None;
        };
        let scan = call.input(0)?;
        let AlgOp::Scan {
            entity,
            filters,
            projects,
        } = scan.op()
        else {
            return None;
        };
        if !entity.has(Capability::Filterable) && !entity.has(Capability::ProjectFilterable) {
            return None;
        }

        let (pushable, kept): (Vec<RexNode>, Vec<RexNode>) = condition
            .conjunctions()
            .into_iter()
            .partition(RexNode::is_deterministic);
        if pushable.is_empty() {
            return None;
        }

        let mut pushed = filters.clone();
        for conjunct in pushable {
            let in_entity = match projects {
                Some(p) => {
                    let mapping: Vec<Option<usize>> = p.iter().map(|&i| Some(i)).collect();
                    conjunct.remap(&mapping)?
                }
                None => conjunct,
            };
            pushed.push(in_entity);
        }

        let new_scan = scan.with_op(AlgOp::Scan {
            entity: entity.clone(),
            filters: pushed,
            projects: projects.clone(),
        });
        if kept.is_empty() {
            Some(new_scan)
        } else {
            Some(AlgNode::filter(new_scan, RexNode::and(kept)))
        }
    }
}

/// Push a field-only `Project(Scan)` into the scan.
pub struct ProjectScanRule {
    name: &'static str,
    through_converter: bool,
}

impl ProjectScanRule {
    pub const INSTANCE: Self = Self {
        name: "ProjectScanRule",
        through_converter: false,
    };
    /// Project over the converter on top of a bindable scan.
    pub const INTERPRETER: Self = Self {
        name: "ProjectScanRule:interpreter",
        through_converter: true,
    };

    fn push(scan: &AlgNode, fields: &[usize]) -> Option<AlgNode> {
        let AlgOp::Scan {
            entity,
            filters,
            projects,
        } = scan.op()
        else {
            return None;
        };
        if !entity.has(Capability::ProjectFilterable) {
            return None;
        }
        let composed = match projects {
            Some(existing) => fields
                .iter()
                .map(|&f| existing.get(f).copied())
                .collect::<Option<Vec<usize>>>()?,
            None => fields.to_vec(),
        };
        Some(scan.with_op(AlgOp::Scan {
            entity: entity.clone(),
            filters: filters.clone(),
            projects: Some(composed),
        }))
    }
}

impl Rule for ProjectScanRule {
    fn name(&self) -> &str {
        self.name
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        let scan = Pattern::Operator(OpMatcher::Kind(AlgKind::Scan), vec![]);
        let input = if self.through_converter {
            Pattern::Operator(OpMatcher::Kind(AlgKind::Converter), vec![scan])
        } else {
            Pattern::scan()
        };
        Pattern::Operator(OpMatcher::Logical(AlgKind::Project), vec![input])
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let AlgOp::Project { exprs, names } = call.node.op() else {
            return None;
        };
        let fields = as_permutation(exprs)?;
        let input = call.input(0)?;
        let scan = if self.through_converter {
            input.input(0)?
        } else {
            input
        };
        let pushed = Self::push(scan, &fields)?;
        // a scan cannot rename
        if pushed.row_type().field_names() != *names {
            return None;
        }
        if self.through_converter {
            Some(input.with_inputs(vec![pushed]))
        } else {
            Some(pushed)
        }
    }
}
