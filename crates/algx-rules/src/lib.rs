//! # Built-in Rule Sets
//!
//! This crate provides the rules the planner registers into the rule engine,
//! arranged in fixed, ordered groups that are built once per process and shared
//! read-only by every planner:
//!
//! ## Pre-process
//!
//! - **`AllocationToPhysicalScanRule`** / **`AllocationToPhysicalModifyRule`**:
//!   bind logical scans and modifications to a physical placement, one instance
//!   per data model. Registered into [`RulePhase::PreProcess`].
//!
//! ## Default (logical -> logical)
//!
//! Scan lowering and pushdown, filter/project transposes, join rewrites, aggregate
//! rewrites, sort simplifications and document-to-relational rewrites. The second
//! slot holds `JoinAssociateRule` when join commutation is preferred and
//! `ProjectMergeRule` otherwise.
//!
//! ## Enumerable (logical -> physical)
//!
//! One conversion rule per operator kind, the interpreter that bridges bindable
//! subtrees, and the calc rules as a last resort.
//!
//! ## Bindable, stream, constant reduction
//!
//! Optional groups, each behind its own feature flag.
//!
//! [`register_rules`] installs the groups into an engine in a fixed order so that
//! planning output is reproducible.

pub mod aggregate;
pub mod allocation;
pub mod bindable;
pub mod convert;
pub mod document;
pub mod enumerable;
pub mod join;
pub mod reduce;
pub mod scan;
pub mod sort;
pub mod stream;
pub mod transpose;
mod util;

use algx_core::config::FeatureFlags;
use algx_core::engine::RuleEngine;
use algx_core::rule::{RulePhase, RuleRef};
use std::sync::{Arc, OnceLock};
use tracing::debug;

use aggregate::{AggregateExpandDistinctAggregatesRule, AggregateReduceFunctionsRule};
use allocation::{AllocationToPhysicalModifyRule, AllocationToPhysicalScanRule};
use bindable::*;
use document::{DocumentAggregateToAggregateRule, DocumentSortToSortRule};
use enumerable::*;
use join::{
    FilterJoinRule, JoinAssociateRule, JoinCommuteRule, JoinPushExpressionsRule,
    JoinPushThroughJoinRule,
};
use reduce::{AggregateValuesRule, ReduceExpressionsRule, ValuesReduceRule};
use scan::{FilterScanRule, ProjectScanRule, ScanRule};
use sort::{
    SortJoinTransposeRule, SortProjectTransposeRule, SortRemoveConstantKeysRule,
    SortUnionTransposeRule,
};
use stream::{DeltaJoinTransposeRule, DeltaScanRule, DeltaScanToEmptyRule, DeltaTransposeRule};
use transpose::{
    FilterAggregateTransposeRule, FilterProjectTransposeRule, ProjectFilterTransposeRule,
    ProjectMergeRule, ProjectWindowTransposeRule,
};

/// Placement resolution for every data model.
pub fn pre_process() -> &'static [RuleRef] {
    static RULES: OnceLock<Vec<RuleRef>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            Arc::new(AllocationToPhysicalScanRule::RELATIONAL),
            Arc::new(AllocationToPhysicalScanRule::DOCUMENT),
            Arc::new(AllocationToPhysicalScanRule::GRAPH),
            Arc::new(AllocationToPhysicalModifyRule::RELATIONAL),
            Arc::new(AllocationToPhysicalModifyRule::DOCUMENT),
            Arc::new(AllocationToPhysicalModifyRule::GRAPH),
        ]
    })
}

fn build_default(second: RuleRef) -> Vec<RuleRef> {
    vec![
        Arc::new(ScanRule),
        second,
        Arc::new(FilterScanRule),
        Arc::new(ProjectFilterTransposeRule),
        Arc::new(FilterProjectTransposeRule),
        Arc::new(FilterJoinRule),
        Arc::new(JoinPushExpressionsRule),
        Arc::new(AggregateExpandDistinctAggregatesRule),
        Arc::new(AggregateReduceFunctionsRule),
        Arc::new(FilterAggregateTransposeRule),
        Arc::new(ProjectWindowTransposeRule),
        Arc::new(JoinCommuteRule),
        Arc::new(JoinPushThroughJoinRule::RIGHT),
        Arc::new(JoinPushThroughJoinRule::LEFT),
        Arc::new(SortProjectTransposeRule),
        Arc::new(SortJoinTransposeRule),
        Arc::new(SortRemoveConstantKeysRule),
        Arc::new(SortUnionTransposeRule),
        Arc::new(DocumentAggregateToAggregateRule),
        Arc::new(DocumentSortToSortRule),
    ]
}

/// Logical rewrites. `join_commute` selects `JoinAssociateRule` over
/// `ProjectMergeRule` for the second slot.
pub fn default_rules(join_commute: bool) -> &'static [RuleRef] {
    static COMMUTE: OnceLock<Vec<RuleRef>> = OnceLock::new();
    static MERGE: OnceLock<Vec<RuleRef>> = OnceLock::new();
    if join_commute {
        COMMUTE.get_or_init(|| build_default(Arc::new(JoinAssociateRule)))
    } else {
        MERGE.get_or_init(|| build_default(Arc::new(ProjectMergeRule)))
    }
}

/// Implementations in the enumerable convention.
pub fn enumerable() -> &'static [RuleRef] {
    static RULES: OnceLock<Vec<RuleRef>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            Arc::new(ENUMERABLE_JOIN_RULE),
            Arc::new(ENUMERABLE_MERGE_JOIN_RULE),
            Arc::new(ENUMERABLE_SEMI_JOIN_RULE),
            Arc::new(ENUMERABLE_STREAMER_RULE),
            Arc::new(ENUMERABLE_PROJECT_RULE),
            Arc::new(ENUMERABLE_FILTER_RULE),
            Arc::new(ENUMERABLE_AGGREGATE_RULE),
            Arc::new(ENUMERABLE_SORT_RULE),
            Arc::new(ENUMERABLE_LIMIT_RULE),
            Arc::new(ENUMERABLE_UNWIND_RULE),
            Arc::new(ENUMERABLE_UNION_RULE),
            Arc::new(ENUMERABLE_INTERSECT_RULE),
            Arc::new(ENUMERABLE_MINUS_RULE),
            Arc::new(ENUMERABLE_MODIFY_RULE),
            Arc::new(ENUMERABLE_VALUES_RULE),
            Arc::new(ENUMERABLE_WINDOW_RULE),
            Arc::new(ENUMERABLE_SCAN_RULE),
            Arc::new(ENUMERABLE_TABLE_FUNCTION_SCAN_RULE),
            Arc::new(ENUMERABLE_CALC_RULE),
            Arc::new(ENUMERABLE_DOCUMENT_VALUES_RULE),
            Arc::new(EnumerableInterpreterRule),
            Arc::new(FilterToCalcRule),
            Arc::new(ProjectToCalcRule),
        ]
    })
}

/// Implementations in the bindable convention.
pub fn bindable() -> &'static [RuleRef] {
    static RULES: OnceLock<Vec<RuleRef>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            Arc::new(BINDABLE_SCAN_RULE),
            Arc::new(BINDABLE_FILTER_RULE),
            Arc::new(BINDABLE_PROJECT_RULE),
            Arc::new(BINDABLE_SORT_RULE),
            Arc::new(BINDABLE_JOIN_RULE),
            Arc::new(BINDABLE_UNION_RULE),
            Arc::new(BINDABLE_VALUES_RULE),
            Arc::new(BINDABLE_AGGREGATE_RULE),
            Arc::new(BINDABLE_WINDOW_RULE),
        ]
    })
}

/// Delta pushdown for streaming queries.
pub fn stream() -> &'static [RuleRef] {
    static RULES: OnceLock<Vec<RuleRef>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            Arc::new(DeltaTransposeRule::PROJECT),
            Arc::new(DeltaTransposeRule::FILTER),
            Arc::new(DeltaTransposeRule::AGGREGATE),
            Arc::new(DeltaTransposeRule::SORT),
            Arc::new(DeltaTransposeRule::UNION),
            Arc::new(DeltaJoinTransposeRule),
            Arc::new(DeltaScanRule),
            Arc::new(DeltaScanToEmptyRule),
        ]
    })
}

/// Expression folding and evaluation over literal rows.
pub fn constant_reduction() -> &'static [RuleRef] {
    static RULES: OnceLock<Vec<RuleRef>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            Arc::new(ReduceExpressionsRule::PROJECT),
            Arc::new(ReduceExpressionsRule::FILTER),
            Arc::new(ReduceExpressionsRule::CALC),
            Arc::new(ReduceExpressionsRule::JOIN),
            Arc::new(ValuesReduceRule::FILTER),
            Arc::new(ValuesReduceRule::PROJECT_FILTER),
            Arc::new(ValuesReduceRule::PROJECT),
            Arc::new(AggregateValuesRule),
        ]
    })
}

/// Install the rule groups enabled by `flags` into `engine`. Rules already
/// registered under the same name are skipped. Returns the number of rules added.
pub fn register_rules(engine: &mut dyn RuleEngine, flags: &FeatureFlags) -> usize {
    let mut added = 0;
    let mut add = |rule: &RuleRef, phase: RulePhase| {
        if engine.add_rule(Arc::clone(rule), phase) {
            added += 1;
        }
    };

    for rule in pre_process() {
        add(rule, RulePhase::PreProcess);
    }
    for rule in default_rules(flags.join_commute) {
        add(rule, RulePhase::Default);
    }
    if flags.bindable {
        for rule in bindable() {
            add(rule, RulePhase::Default);
        }
    }

    let scan_rules: [RuleRef; 3] = [
        Arc::new(BINDABLE_SCAN_RULE),
        Arc::new(ProjectScanRule::INSTANCE),
        Arc::new(ProjectScanRule::INTERPRETER),
    ];
    for rule in &scan_rules {
        add(rule, RulePhase::Default);
    }

    if flags.enumerable {
        for rule in enumerable() {
            add(rule, RulePhase::Default);
        }
    }
    if flags.bindable && flags.enumerable {
        add(&(Arc::new(EnumerableToBindableConverterRule) as RuleRef), RulePhase::Default);
    }
    if flags.stream {
        for rule in stream() {
            add(rule, RulePhase::Default);
        }
    }
    if flags.constant_reduction {
        for rule in constant_reduction() {
            add(rule, RulePhase::Default);
        }
    }

    debug!(
        "Registered {} rules (bindable={}, enumerable={}, stream={}, constant_reduction={})",
        added, flags.bindable, flags.enumerable, flags.stream, flags.constant_reduction
    );
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use algx_core::engine::HeuristicEngine;
    use std::collections::HashSet;

    #[test]
    fn test_group_names_are_unique() {
        let mut seen = HashSet::new();
        let groups = [
            pre_process(),
            default_rules(true),
            enumerable(),
            bindable(),
            stream(),
            constant_reduction(),
        ];
        for rule in groups.iter().flat_map(|g| g.iter()) {
            assert!(seen.insert(rule.name().to_string()), "duplicate {}", rule.name());
        }
    }

    #[test]
    fn test_join_commute_selects_second_slot() {
        assert_eq!(default_rules(true)[1].name(), "JoinAssociateRule");
        assert_eq!(default_rules(false)[1].name(), "ProjectMergeRule");
        assert_eq!(default_rules(true).len(), default_rules(false).len());
    }

    #[test]
    fn test_groups_are_built_once() {
        assert!(std::ptr::eq(enumerable(), enumerable()));
        assert!(Arc::ptr_eq(&stream()[0], &stream()[0]));
    }

    #[test]
    fn test_registration_skips_duplicates() {
        let flags = FeatureFlags::default().with_bindable(true);
        let mut engine = HeuristicEngine::default();
        let first = register_rules(&mut engine, &flags);
        assert!(engine.rules().contains("BindableScanRule"));
        assert_eq!(engine.rules().len(), first);
        assert_eq!(register_rules(&mut engine, &flags), 0);
    }
}
