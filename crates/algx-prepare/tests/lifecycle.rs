//! Statement preparation through the planner, end to end.
//!
//! A small catalog provides entities with different capabilities. Each test
//! readies a planner, lowers entities through its cluster, hands the resulting
//! tree to `convert` and runs one or more `transform` stages.
//!
//! ## What These Tests Verify
//! - Lifecycle ordering: `ready` from closed, `reset` and `ready` again, and
//!   `transform` rejected before a root was converted
//! - Stage programs run in order on each other's output
//! - Failures come back tagged with the stage that produced them
//! - Session seams (statistics oracle, placements, trait definitions) reach the plan

use algx_core::alg::{AlgKind, AlgNode, AlgOp};
use algx_core::catalog::{InMemoryCatalog, PlacementRef};
use algx_core::config::FeatureFlags;
use algx_core::entity::{Capability, CapabilitySet, Entity, EntityHandle, EntityId};
use algx_core::program::Programs;
use algx_core::rex::{RexNode, RexOp, ScalarValue};
use algx_core::traits::{AlgTraitSet, Collation, Convention, FieldCollation};
use algx_core::types::{AlgDataType, PolyType, RowType};
use algx_core::PrepareError;
use algx_prepare::{FrameworkConfig, Planner, PlannerState};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const ORDERS: u64 = 1;
const EVENTS: u64 = 2;

#[derive(Debug)]
struct Table {
    id: u64,
    capabilities: CapabilitySet,
}

impl Entity for Table {
    fn id(&self) -> EntityId {
        EntityId(self.id)
    }

    fn row_type(&self) -> RowType {
        RowType::builder()
            .add("id", AlgDataType::scalar(PolyType::BigInt))
            .add("amount", AlgDataType::scalar(PolyType::Integer))
            .build()
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `orders` answers queries itself; `events` can only be scanned.
fn catalog() -> Arc<InMemoryCatalog> {
    let mut catalog = InMemoryCatalog::new();
    catalog.add_entity(
        &["shop", "orders"],
        Arc::new(Table {
            id: ORDERS,
            capabilities: CapabilitySet::of(&[Capability::Queryable]),
        }),
    );
    catalog.add_entity(
        &["shop", "events"],
        Arc::new(Table {
            id: EVENTS,
            capabilities: CapabilitySet::of(&[Capability::Scannable]),
        }),
    );
    catalog.set_row_count(EntityId(ORDERS), 500.0);
    catalog.set_placement(EntityId(EVENTS), PlacementRef::new("hsqldb", 4));
    Arc::new(catalog)
}

fn ready_planner(catalog: &Arc<InMemoryCatalog>, config: FrameworkConfig) -> Planner {
    init_tracing();
    let config = config
        .with_oracle(catalog.clone())
        .with_placements(catalog.clone());
    let mut planner = Planner::new(config);
    planner.ready().unwrap();
    planner
}

fn lower(planner: &Planner, catalog: &InMemoryCatalog, name: &str) -> AlgNode {
    let handle = catalog.entity(&["shop", name]).unwrap();
    planner.cluster().unwrap().to_scan(&handle).unwrap()
}

fn amount_above(value: i64) -> RexNode {
    RexNode::call(
        RexOp::Gt,
        vec![
            RexNode::input_ref(1, AlgDataType::scalar(PolyType::Integer)),
            RexNode::literal(ScalarValue::Int64(value)),
        ],
    )
}

fn scan_entity(node: &AlgNode) -> &EntityHandle {
    let scan = node
        .find(&|n| n.kind() == AlgKind::Scan)
        .expect("plan has a scan");
    match scan.op() {
        AlgOp::Scan { entity, .. } => entity,
        _ => unreachable!(),
    }
}

fn enumerable() -> AlgTraitSet {
    AlgTraitSet::of(Convention::Enumerable)
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[test]
fn test_lifecycle_monotonicity() {
    let catalog = catalog();
    let mut planner = Planner::new(FrameworkConfig::default());
    planner.ready().unwrap();
    assert_eq!(planner.state(), PlannerState::Ready);

    planner.reset().unwrap();
    let root = AlgNode::scan(catalog.entity(&["shop", "orders"]).unwrap());
    let err = planner.transform(0, &enumerable(), root.clone()).unwrap_err();
    assert!(err.is_state_violation(), "{err}");

    planner.ready().unwrap();
    planner.convert(root.clone()).unwrap();
    assert!(planner.transform(0, &enumerable(), root).is_ok());
}

#[test]
fn test_prepare_queryable_entity() {
    let catalog = catalog();
    let mut planner = ready_planner(&catalog, FrameworkConfig::default());
    let scan = lower(&planner, &catalog, "orders");
    assert_eq!(scan.convention(), Convention::Enumerable);

    let root = AlgNode::filter(scan, amount_above(100));
    planner.convert(root.clone()).unwrap();
    let best = planner.transform(0, &enumerable(), root).unwrap();

    assert!(best.find(&|n| n.convention() != Convention::Enumerable).is_none());
    assert_eq!(best.input(0).unwrap().kind(), AlgKind::Scan);
    // The cluster bound the session oracle to the handle.
    assert_eq!(scan_entity(&best).row_count(), 500.0);
}

#[test]
fn test_prepare_scannable_entity_resolves_placement() {
    let catalog = catalog();
    let mut planner = ready_planner(&catalog, FrameworkConfig::default());
    let scan = lower(&planner, &catalog, "events");
    assert!(scan.is_logical());

    let root = AlgNode::filter(scan, amount_above(100));
    planner.convert(root.clone()).unwrap();
    let best = planner.transform(0, &enumerable(), root).unwrap();

    assert_eq!(best.convention(), Convention::Enumerable);
    let interpreted = best
        .find(&|n| matches!(n.op(), AlgOp::Converter { from: Convention::Bindable }))
        .expect("bindable part behind a converter");
    assert_eq!(interpreted.input(0).unwrap().kind(), AlgKind::Scan);
    assert_eq!(
        scan_entity(&best).placement(),
        Some(&PlacementRef::new("hsqldb", 4))
    );
    assert_eq!(scan_entity(&best).row_count(), 100.0);
}

#[test]
fn test_stages_run_in_sequence() {
    let catalog = catalog();
    let programs = vec![
        Programs::of("reduce", algx_rules::constant_reduction().to_vec()),
        Programs::standard().remove(0),
    ];
    let mut planner = ready_planner(&catalog, FrameworkConfig::default().with_programs(programs));

    let tautology = RexNode::call(
        RexOp::LtEq,
        vec![
            RexNode::literal(ScalarValue::Int64(3)),
            RexNode::literal(ScalarValue::Int64(3)),
        ],
    );
    let root = AlgNode::filter(lower(&planner, &catalog, "events"), tautology);
    planner.convert(root.clone()).unwrap();

    let reduced = planner.transform(0, &AlgTraitSet::logical(), root).unwrap();
    assert_eq!(reduced.kind(), AlgKind::Scan);
    assert!(reduced.is_logical());

    let best = planner.transform(1, &enumerable(), reduced).unwrap();
    assert!(matches!(best.op(), AlgOp::Converter { from: Convention::Bindable }));
    assert_eq!(best.node_count(), 2);
}

#[test]
fn test_collation_request_adds_sort() {
    let catalog = catalog();
    let mut planner = ready_planner(&catalog, FrameworkConfig::default());
    let root = lower(&planner, &catalog, "orders");
    planner.convert(root.clone()).unwrap();

    let sorted = enumerable().replace_collation(Collation::of(vec![FieldCollation::desc(1)]));
    let best = planner.transform(0, &sorted, root.clone()).unwrap();
    assert_eq!(best.kind(), AlgKind::Sort);
    assert_eq!(best.convention(), Convention::Enumerable);

    // Without the collation trait the requirement is not tracked.
    let flags = FeatureFlags::default().with_collation_trait(false);
    let mut planner = ready_planner(&catalog, FrameworkConfig::default().with_flags(flags));
    planner.convert(root.clone()).unwrap();
    let best = planner.transform(0, &sorted, root).unwrap();
    assert_eq!(best.kind(), AlgKind::Scan);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn test_stage_failure_carries_stage_index() {
    let catalog = catalog();
    let flags = FeatureFlags::default().with_enumerable(false);
    let mut planner = ready_planner(&catalog, FrameworkConfig::default().with_flags(flags));

    let orders = catalog.entity(&["shop", "orders"]).unwrap();
    let err = planner.cluster().unwrap().to_scan(&orders).unwrap_err();
    assert!(matches!(err, PrepareError::LoweringExhausted { .. }), "{err}");

    let root = AlgNode::filter(AlgNode::scan(orders), amount_above(1));
    planner.convert(root.clone()).unwrap();
    let err = planner.transform(0, &enumerable(), root).unwrap_err();
    match err {
        PrepareError::Stage { stage, source } => {
            assert_eq!(stage, 0);
            assert!(matches!(*source, PrepareError::CannotPlan { .. }), "{source}");
        }
        other => panic!("expected a stage error, got {other}"),
    }
}

#[test]
fn test_closed_planner_rejects_transform() {
    let catalog = catalog();
    let mut planner = ready_planner(&catalog, FrameworkConfig::default());
    let root = lower(&planner, &catalog, "orders");
    planner.convert(root.clone()).unwrap();
    planner.close();

    assert!(planner.cluster().is_none());
    let err = planner.transform(0, &enumerable(), root).unwrap_err();
    assert_eq!(err.to_string(), "cannot move from CLOSED to CONVERTED");
}
