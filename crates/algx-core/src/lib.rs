//! # algx-core: Query Preparation Core
//!
//! Data structures and seams shared by the preparation pipeline of a multi-model
//! database: the algebra type system, the bridge to host types, algebra trees,
//! entity handles and the rule-engine interface.
//!
//! ## Module Overview
//!
//! - **`types`**: Algebra data types and row types (static and dynamic).
//! - **`bridge`**: The type bridge between host classes and algebra types.
//! - **`rex`**: Scalar expressions over the fields of a row.
//! - **`traits`**: Conventions, collations, distributions, data models and trait sets.
//! - **`alg`**: Algebra operators and the immutable algebra tree.
//! - **`entity`**: Entities, capability sets and the entity handle with its lowering.
//! - **`catalog`**: Statistics-oracle and placement seams plus an in-memory catalog.
//! - **`stats`**: Bounded occurrence maps, column statistics and the statistics manager.
//! - **`cost`**: Cost vectors and the cost factory.
//! - **`metadata`**: Row-count, selectivity and cost derivation with a caching decorator.
//! - **`pattern`**: Declarative operand patterns for rule applicability.
//! - **`rule`**: The Rule trait, rule phases and the rule registry.
//! - **`engine`**: The rule-engine seam and a deterministic heuristic engine.
//! - **`program`**: Optimization stages run by the planner.
//! - **`config`**: Feature flags.
//! - **`error`**: The preparation error type.

pub mod alg;
pub mod bridge;
pub mod catalog;
pub mod config;
pub mod cost;
pub mod engine;
pub mod entity;
pub mod error;
pub mod metadata;
pub mod pattern;
pub mod program;
pub mod rex;
pub mod rule;
pub mod stats;
pub mod traits;
pub mod types;

pub use error::{PrepareError, Result};
