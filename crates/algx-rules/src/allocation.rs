//! # Allocation Resolution Rules
//!
//! Logical scans and modifications refer to an entity as the catalog knows it,
//! not to where its data lives. Before any other rewrite, these rules bind each
//! such node to a concrete physical placement through the session's placement
//! resolver.
//!
//! One rule instance exists per data model so that the pre-process phase can
//! resolve relational, document and graph entities independently.
//!
//! A node whose entity already carries a placement is left alone, as is any node
//! when the session has no placement resolver.

use algx_core::alg::{AlgKind, AlgNode, AlgOp};
use algx_core::pattern::Pattern;
use algx_core::rule::{Rule, RuleCall, RuleType};
use algx_core::traits::DataModel;
use tracing::trace;

/// Resolve the placement of a logical scan of one data model.
pub struct AllocationToPhysicalScanRule {
    name: &'static str,
    model: DataModel,
}

impl AllocationToPhysicalScanRule {
    pub const RELATIONAL: Self = Self {
        name: "AllocationToPhysicalScanRule:relational",
        model: DataModel::Relational,
    };
    pub const DOCUMENT: Self = Self {
        name: "AllocationToPhysicalScanRule:document",
        model: DataModel::Document,
    };
    pub const GRAPH: Self = Self {
        name: "AllocationToPhysicalScanRule:graph",
        model: DataModel::Graph,
    };
}

impl Rule for AllocationToPhysicalScanRule {
    fn name(&self) -> &str {
        self.name
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
        if entity.data_model() != self.model || entity.placement().is_some() {
            return None;
        }
        let placement = call.env.placements.as_ref()?.placement_for(entity)?;
        trace!("Resolved {} to placement {}", entity.name(), placement);
        Some(call.node.with_op(AlgOp::Scan {
            entity: entity.with_placement(placement),
            filters: filters.clone(),
            projects: projects.clone(),
        }))
    }
}

/// Resolve the placement of the target of a logical modification.
pub struct AllocationToPhysicalModifyRule {
    name: &'static str,
    model: DataModel,
}

impl AllocationToPhysicalModifyRule {
    pub const RELATIONAL: Self = Self {
        name: "AllocationToPhysicalModifyRule:relational",
        model: DataModel::Relational,
    };
    pub const DOCUMENT: Self = Self {
        name: "AllocationToPhysicalModifyRule:document",
        model: DataModel::Document,
    };
    pub const GRAPH: Self = Self {
        name: "AllocationToPhysicalModifyRule:graph",
        model: DataModel::Graph,
    };
}

impl Rule for AllocationToPhysicalModifyRule {
    fn name(&self) -> &str {
        self.name
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::unary(AlgKind::Modify)
    }

    fn on_match(&self, call: &RuleCall<'_>) -> Option<AlgNode> {
        let AlgOp::Modify { entity, operation } = call.node.op() else {
            return None;
        };
        if entity.data_model() != self.model || entity.placement().is_some() {
            return None;
        }
        let placement = call.env.placements.as_ref()?.placement_for(entity)?;
        Some(call.node.with_op(AlgOp::Modify {
            entity: entity.with_placement(placement),
            operation: *operation,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use algx_core::catalog::{InMemoryCatalog, PlacementRef};
    use algx_core::config::FeatureFlags;
    use algx_core::cost::DefaultCostFactory;
    use algx_core::entity::{Capability, CapabilitySet, Entity, EntityId};
    use algx_core::metadata::DefaultMetadataProvider;
    use algx_core::rule::RuleEnv;
    use algx_core::types::{AlgDataType, PolyType, RowType};
    use std::sync::Arc;

    #[derive(Debug)]
    struct Collection;

    impl Entity for Collection {
        fn id(&self) -> EntityId {
            EntityId(7)
        }

        fn row_type(&self) -> RowType {
            RowType::builder()
                .add("d", AlgDataType::scalar(PolyType::Document))
                .build()
        }

        fn capabilities(&self) -> CapabilitySet {
            CapabilitySet::of(&[Capability::Scannable])
        }

        fn data_model(&self) -> DataModel {
            DataModel::Document
        }
    }

    fn setup() -> (AlgNode, RuleEnv) {
        let mut catalog = InMemoryCatalog::new();
        catalog.add_entity(&["db", "docs"], Arc::new(Collection));
        catalog.set_placement(EntityId(7), PlacementRef::new("mongo", 3));
        let handle = catalog.entity(&["db", "docs"]).unwrap();
        let env = RuleEnv::new(FeatureFlags::default()).with_placements(Arc::new(catalog));
        (AlgNode::scan(handle), env)
    }

    #[test]
    fn test_scan_resolves_for_matching_model_only() {
        let (scan, env) = setup();
        let mq = DefaultMetadataProvider::new(Arc::new(DefaultCostFactory::default()));
        let call = RuleCall::new(&scan, &mq, &env);

        assert!(AllocationToPhysicalScanRule::RELATIONAL.on_match(&call).is_none());
        let resolved = AllocationToPhysicalScanRule::DOCUMENT.on_match(&call).unwrap();
        let AlgOp::Scan { entity, .. } = resolved.op() else {
            panic!("expected scan");
        };
        assert_eq!(entity.placement().unwrap().to_string(), "mongo:3");

        let again = RuleCall::new(&resolved, &mq, &env);
        assert!(AllocationToPhysicalScanRule::DOCUMENT.on_match(&again).is_none());
    }

    #[test]
    fn test_no_resolver_no_rewrite() {
        let (scan, _) = setup();
        let env = RuleEnv::default();
        let mq = DefaultMetadataProvider::new(Arc::new(DefaultCostFactory::default()));
        let call = RuleCall::new(&scan, &mq, &env);
        assert!(AllocationToPhysicalScanRule::DOCUMENT.on_match(&call).is_none());
    }
}
