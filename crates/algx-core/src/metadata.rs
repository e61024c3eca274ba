//! # Metadata
//!
//! Rules and the engine ask questions about algebra nodes: how many rows does
//! this produce, how selective is this predicate, what does this subtree cost.
//! [`MetadataProvider`] answers them.
//!
//! ## Derivation
//!
//! [`DefaultMetadataProvider`] derives answers bottom-up:
//!
//! - **Scan**: the entity handle's row count (override, oracle, default), scaled
//!   by any filters pushed into the scan.
//! - **Filter / Calc**: input rows × selectivity of the condition.
//! - **Join**: `|L| × |R| × selectivity`, with outer joins never dropping below
//!   the preserved side, and semi/anti joins bounded by the left side.
//! - **Aggregate**: one row without grouping keys; otherwise the input scaled
//!   down by the number of keys.
//! - **Sort**: input minus offset, capped by fetch.
//!
//! Predicate selectivity uses fixed guesses: equality
//! [`DEFAULT_FILTER_SELECTIVITY`], range comparisons one third, `IS NOT NULL`
//! 0.9, anything else 0.25. Conjuncts multiply; disjuncts combine as
//! independent events.
//!
//! ## Caching
//!
//! [`CachingMetadataProvider`] memoizes answers by node digest. The rule engine
//! publishes a [`MetadataClock`] that it advances whenever it changes the plan;
//! the cache drops everything when it sees the clock move.

use crate::alg::{AlgNode, AlgOp, JoinType, SetOpKind};
use crate::cost::{Cost, CostFactory, DefaultCostFactory};
use crate::entity::DEFAULT_ROW_COUNT;
use crate::rex::{RexNode, RexOp};
use crate::stats::DEFAULT_FILTER_SELECTIVITY;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Answers statistical questions about algebra nodes.
pub trait MetadataProvider: Send + Sync {
    fn row_count(&self, node: &AlgNode) -> f64;

    /// Fraction of `node`'s rows that satisfy `predicate`; 1.0 for `None`.
    fn selectivity(&self, node: &AlgNode, predicate: Option<&RexNode>) -> f64;

    /// Cost of `node` alone, excluding its inputs.
    fn non_cumulative_cost(&self, node: &AlgNode) -> Cost;

    fn cumulative_cost(&self, node: &AlgNode) -> Cost {
        node.inputs()
            .iter()
            .fold(self.non_cumulative_cost(node), |acc, input| {
                acc + self.cumulative_cost(input)
            })
    }
}

/// Monotonic counter the rule engine advances whenever it changes a plan.
#[derive(Debug, Default)]
pub struct MetadataClock(AtomicU64);

impl MetadataClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn now(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Heuristic selectivity of a predicate, independent of any node.
pub fn guess_selectivity(predicate: Option<&RexNode>) -> f64 {
    let Some(predicate) = predicate else {
        return 1.0;
    };
    if predicate.is_always_true() {
        return 1.0;
    }
    if predicate.is_always_false() {
        return 0.0;
    }
    match predicate {
        RexNode::Call { op, operands, .. } => match op {
            RexOp::And => operands
                .iter()
                .map(|o| guess_selectivity(Some(o)))
                .product(),
            RexOp::Or => operands.iter().fold(0.0, |acc, o| {
                let s = guess_selectivity(Some(o));
                acc + s - acc * s
            }),
            RexOp::Not => 1.0 - guess_selectivity(operands.first()),
            RexOp::Eq => DEFAULT_FILTER_SELECTIVITY,
            RexOp::NotEq => 1.0 - DEFAULT_FILTER_SELECTIVITY,
            RexOp::Lt | RexOp::LtEq | RexOp::Gt | RexOp::GtEq => 1.0 / 3.0,
            RexOp::IsNotNull => 0.9,
            RexOp::IsNull => 0.1,
            _ => 0.25,
        },
        _ => 0.25,
    }
}

/// Bottom-up derivation; see the module docs.
pub struct DefaultMetadataProvider {
    cost_factory: Arc<dyn CostFactory>,
}

impl DefaultMetadataProvider {
    pub fn new(cost_factory: Arc<dyn CostFactory>) -> Self {
        Self { cost_factory }
    }
}

impl Default for DefaultMetadataProvider {
    fn default() -> Self {
        Self::new(Arc::new(DefaultCostFactory::default()))
    }
}

impl DefaultMetadataProvider {
    fn input_rows(&self, node: &AlgNode, i: usize) -> f64 {
        node.input(i).map(|n| self.row_count(n)).unwrap_or(1.0)
    }
}

impl MetadataProvider for DefaultMetadataProvider {
    fn row_count(&self, node: &AlgNode) -> f64 {
        let rows = match node.op() {
            AlgOp::Scan {
                entity, filters, ..
            } => {
                let selectivity: f64 = filters.iter().map(|f| guess_selectivity(Some(f))).product();
                entity.row_count() * selectivity
            }
            AlgOp::Filter { condition } => {
                self.input_rows(node, 0) * guess_selectivity(Some(condition))
            }
            AlgOp::Calc { condition, .. } => {
                self.input_rows(node, 0) * guess_selectivity(condition.as_ref())
            }
            AlgOp::Join {
                join_type,
                condition,
            } => {
                let left = self.input_rows(node, 0);
                let right = self.input_rows(node, 1);
                let selectivity = guess_selectivity(Some(condition));
                let inner = left * right * selectivity;
                match join_type {
                    JoinType::Inner => inner,
                    JoinType::Left => inner.max(left),
                    JoinType::Right => inner.max(right),
                    JoinType::Full => inner.max(left).max(right),
                    JoinType::Semi => left * selectivity,
                    JoinType::Anti => left * (1.0 - selectivity),
                }
            }
            AlgOp::Aggregate { group_set, .. } => {
                if group_set.is_empty() {
                    1.0
                } else {
                    let input = self.input_rows(node, 0);
                    input * (1.0 - 0.5_f64.powi(group_set.len() as i32))
                }
            }
            AlgOp::DocumentAggregate { group, .. } => match group {
                None => 1.0,
                Some(_) => self.input_rows(node, 0) * 0.5,
            },
            AlgOp::Sort { offset, fetch, .. } | AlgOp::DocumentSort { offset, fetch, .. } => {
                let input = self.input_rows(node, 0);
                let after_offset = (input - offset.unwrap_or(0) as f64).max(0.0);
                match fetch {
                    Some(n) => after_offset.min(*n as f64),
                    None => after_offset,
                }
            }
            AlgOp::Values { tuples, .. } => tuples.len() as f64,
            AlgOp::DocumentValues { documents } => documents.len() as f64,
            AlgOp::SetOp { kind, all } => {
                let rows: Vec<f64> = node.inputs().iter().map(|i| self.row_count(i)).collect();
                match kind {
                    SetOpKind::Union => {
                        let sum: f64 = rows.iter().sum();
                        if *all {
                            sum
                        } else {
                            sum * 0.5
                        }
                    }
                    SetOpKind::Intersect => {
                        rows.iter().copied().fold(f64::INFINITY, f64::min) * 0.25
                    }
                    SetOpKind::Minus => rows.first().copied().unwrap_or(0.0) * 0.5,
                }
            }
            AlgOp::TableFunctionScan { .. } => DEFAULT_ROW_COUNT,
            AlgOp::Modify { .. } => 1.0,
            AlgOp::Unwind { .. } => self.input_rows(node, 0) * 4.0,
            AlgOp::Project { .. }
            | AlgOp::Window { .. }
            | AlgOp::Delta
            | AlgOp::Streamer
            | AlgOp::Converter { .. } => self.input_rows(node, 0),
        };
        rows.max(0.0)
    }

    fn selectivity(&self, _node: &AlgNode, predicate: Option<&RexNode>) -> f64 {
        guess_selectivity(predicate)
    }

    fn non_cumulative_cost(&self, node: &AlgNode) -> Cost {
        let rows = self.row_count(node);
        let input_rows: f64 = node.inputs().iter().map(|i| self.row_count(i)).sum();
        match node.op() {
            AlgOp::Scan { .. } => self.cost_factory.make_cost(rows, rows, rows),
            AlgOp::Sort { collation, .. } if !collation.is_empty() => {
                let n = input_rows.max(1.0);
                self.cost_factory.make_cost(rows, n * n.log2().max(1.0), 0.0)
            }
            AlgOp::Join { .. } => self.cost_factory.make_cost(rows, input_rows, 0.0),
            AlgOp::Converter { .. } => self.cost_factory.make_tiny(),
            _ => self.cost_factory.make_cost(rows, input_rows, 0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Question {
    RowCount,
    Selectivity,
    Cost,
}

#[derive(Default)]
struct CacheState {
    stamp: u64,
    answers: HashMap<(String, Question, Option<String>), f64>,
    costs: HashMap<String, Cost>,
    hits: u64,
    misses: u64,
}

/// Memoizing decorator over another provider, invalidated by a [`MetadataClock`].
pub struct CachingMetadataProvider {
    inner: Arc<dyn MetadataProvider>,
    clock: Arc<MetadataClock>,
    state: Mutex<CacheState>,
}

impl CachingMetadataProvider {
    pub fn new(inner: Arc<dyn MetadataProvider>, clock: Arc<MetadataClock>) -> Self {
        let stamp = clock.now();
        Self {
            inner,
            clock,
            state: Mutex::new(CacheState {
                stamp,
                ..CacheState::default()
            }),
        }
    }

    /// `(hits, misses)` since construction.
    pub fn stats(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.hits, state.misses)
    }

    fn lookup(
        &self,
        key: (String, Question, Option<String>),
        compute: impl FnOnce() -> f64,
    ) -> f64 {
        {
            let mut state = self.state.lock();
            self.sync(&mut state);
            if let Some(v) = state.answers.get(&key).copied() {
                state.hits += 1;
                return v;
            }
            state.misses += 1;
        }
        // Computed outside the lock: the inner provider may recurse into us.
        let value = compute();
        self.state.lock().answers.insert(key, value);
        value
    }

    fn sync(&self, state: &mut CacheState) {
        let now = self.clock.now();
        if now != state.stamp {
            trace!(from = state.stamp, to = now, "metadata clock moved; dropping cache");
            state.answers.clear();
            state.costs.clear();
            state.stamp = now;
        }
    }
}

impl MetadataProvider for CachingMetadataProvider {
    fn row_count(&self, node: &AlgNode) -> f64 {
        self.lookup((node.digest(), Question::RowCount, None), || {
            self.inner.row_count(node)
        })
    }

    fn selectivity(&self, node: &AlgNode, predicate: Option<&RexNode>) -> f64 {
        let key = (
            node.digest(),
            Question::Selectivity,
            predicate.map(|p| p.to_string()),
        );
        self.lookup(key, || self.inner.selectivity(node, predicate))
    }

    fn non_cumulative_cost(&self, node: &AlgNode) -> Cost {
        let digest = node.digest();
        {
            let mut state = self.state.lock();
            self.sync(&mut state);
            if let Some(cost) = state.costs.get(&digest).copied() {
                state.hits += 1;
                return cost;
            }
            state.misses += 1;
        }
        let cost = self.inner.non_cumulative_cost(node);
        self.state.lock().costs.insert(digest, cost);
        cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Capability, CapabilitySet, EntityHandle};
    use crate::rex::ScalarValue;
    use crate::traits::Collation;
    use crate::types::{AlgDataType, Field, PolyType, RowType};

    fn scan(rows: f64) -> AlgNode {
        let row = RowType::builder()
            .add("a", AlgDataType::scalar(PolyType::Integer))
            .build();
        AlgNode::scan(
            EntityHandle::detached(
                vec!["t".into()],
                row,
                CapabilitySet::of(&[Capability::Scannable]),
            )
            .with_row_count(rows),
        )
    }

    fn a_equals(v: i64) -> RexNode {
        RexNode::equals(
            RexNode::input_ref(0, AlgDataType::scalar(PolyType::Integer)),
            RexNode::literal(ScalarValue::Int64(v)),
        )
    }

    #[test]
    fn test_filter_and_sort_row_counts() {
        let mq = DefaultMetadataProvider::default();
        let filtered = AlgNode::filter(scan(1000.0), a_equals(1));
        assert!((mq.row_count(&filtered) - 100.0).abs() < 1e-9);

        let limited = AlgNode::sort(scan(1000.0), Collation::empty(), Some(10), Some(5));
        assert_eq!(mq.row_count(&limited), 5.0);
    }

    #[test]
    fn test_selectivity_combinators() {
        let both = RexNode::and(vec![a_equals(1), a_equals(2)]);
        assert!((guess_selectivity(Some(&both)) - 0.01).abs() < 1e-9);
        assert_eq!(guess_selectivity(None), 1.0);
        assert_eq!(guess_selectivity(Some(&RexNode::bool_literal(false))), 0.0);
    }

    #[test]
    fn test_cumulative_cost_includes_inputs() {
        let mq = DefaultMetadataProvider::default();
        let filtered = AlgNode::filter(scan(10.0), a_equals(1));
        let own = mq.non_cumulative_cost(&filtered);
        let total = mq.cumulative_cost(&filtered);
        assert!(total > own);
    }

    #[test]
    fn test_cache_hits_until_clock_moves() {
        let clock = MetadataClock::new();
        let cache = CachingMetadataProvider::new(
            Arc::new(DefaultMetadataProvider::default()),
            Arc::clone(&clock),
        );
        let node = scan(50.0);
        assert_eq!(cache.row_count(&node), 50.0);
        assert_eq!(cache.row_count(&node), 50.0);
        assert_eq!(cache.stats(), (1, 1));

        clock.advance();
        assert_eq!(cache.row_count(&node), 50.0);
        assert_eq!(cache.stats(), (1, 2));
    }

    #[test]
    fn test_extended_handle_is_not_served_from_cache() {
        let cache = CachingMetadataProvider::new(
            Arc::new(DefaultMetadataProvider::default()),
            MetadataClock::new(),
        );
        let pinned = scan(5.0);
        let AlgOp::Scan { entity, .. } = pinned.op() else {
            unreachable!()
        };
        let extended = AlgNode::scan(entity.extend(vec![Field::new(
            "x",
            1,
            AlgDataType::scalar(PolyType::Integer),
        )]));

        assert_eq!(cache.row_count(&pinned), 5.0);
        assert_eq!(cache.row_count(&extended), DEFAULT_ROW_COUNT);
        assert_eq!(cache.stats(), (0, 2));
    }
}
