//! # algx-prepare: Planner Lifecycle
//!
//! Wires the preparation core and the rule groups into a [`Planner`]: a state
//! machine that owns one planning session at a time, builds its cluster and type
//! bridge, installs the rule groups selected by the feature flags and runs the
//! configured optimization stages.
//!
//! ## Usage
//!
//! ```text
//! let mut planner = Planner::new(FrameworkConfig::default());
//! planner.ready()?;
//! let scan = planner.cluster().unwrap().to_scan(&orders)?;
//! planner.convert(AlgNode::filter(scan.clone(), predicate))?;
//! let best = planner.transform(0, &AlgTraitSet::of(Convention::Enumerable), root)?;
//! ```
//!
//! ## Module Overview
//!
//! - **`config`**: Framework configuration (flags, trait definitions, programs).
//! - **`planner`**: The lifecycle states, the cluster and the planner itself.

pub mod config;
pub mod planner;

pub use config::{default_trait_defs, FrameworkConfig};
pub use planner::{Cluster, Planner, PlannerState};
