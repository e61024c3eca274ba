//! # Cost Model
//!
//! Plan cost as a small vector of rows, CPU and I/O, collapsed into one total for
//! comparison. The cluster owns a [`CostFactory`] so that every cost in a session
//! is built the same way and custom models can be plugged in.
//!
//! Costs are additive: a plan's cumulative cost is its own cost plus the
//! cumulative cost of its inputs (see `metadata`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

/// Estimated expense of a (sub)plan. Lower is better.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Cost {
    pub rows: f64,
    pub cpu: f64,
    pub io: f64,
}

impl Cost {
    pub fn new(rows: f64, cpu: f64, io: f64) -> Self {
        Self { rows, cpu, io }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn infinite() -> Self {
        Self::new(f64::INFINITY, f64::INFINITY, f64::INFINITY)
    }

    pub fn is_infinite(&self) -> bool {
        self.rows.is_infinite() || self.cpu.is_infinite() || self.io.is_infinite()
    }

    /// Single comparable value.
    pub fn total(&self) -> f64 {
        self.rows + self.cpu + self.io
    }
}

/// Epsilon-based equality to absorb floating-point noise.
impl PartialEq for Cost {
    fn eq(&self, other: &Self) -> bool {
        if self.is_infinite() || other.is_infinite() {
            return self.is_infinite() && other.is_infinite();
        }
        (self.total() - other.total()).abs() < 1e-9
    }
}

impl PartialOrd for Cost {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        if self == other {
            return Some(std::cmp::Ordering::Equal);
        }
        self.total().partial_cmp(&other.total())
    }
}

impl Add for Cost {
    type Output = Cost;

    fn add(self, rhs: Cost) -> Cost {
        Cost::new(self.rows + rhs.rows, self.cpu + rhs.cpu, self.io + rhs.io)
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            return write!(f, "{{inf}}");
        }
        write!(
            f,
            "{{{} rows, {} cpu, {} io}}",
            self.rows, self.cpu, self.io
        )
    }
}

/// Builds costs for one planning session.
pub trait CostFactory: Send + Sync {
    fn make_cost(&self, rows: f64, cpu: f64, io: f64) -> Cost;

    fn make_zero(&self) -> Cost {
        Cost::zero()
    }

    fn make_infinite(&self) -> Cost {
        Cost::infinite()
    }

    /// Smallest non-zero cost, used to break ties in favor of fewer operators.
    fn make_tiny(&self) -> Cost {
        self.make_cost(1.0, 1.0, 0.0)
    }
}

/// Cost factory with per-dimension weights.
#[derive(Debug, Clone)]
pub struct DefaultCostFactory {
    pub cpu_weight: f64,
    pub io_weight: f64,
}

impl Default for DefaultCostFactory {
    fn default() -> Self {
        Self {
            cpu_weight: 1.0,
            io_weight: 4.0,
        }
    }
}

impl CostFactory for DefaultCostFactory {
    fn make_cost(&self, rows: f64, cpu: f64, io: f64) -> Cost {
        Cost::new(rows, cpu * self.cpu_weight, io * self.io_weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_equality_uses_epsilon() {
        let a = Cost::new(1.0, 0.1 + 0.2, 0.0);
        let b = Cost::new(1.0, 0.3, 0.0);
        assert_eq!(a, b);
        assert!(Cost::new(1.0, 0.0, 0.0) < Cost::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn test_infinite_cost_compares_greater() {
        assert!(Cost::zero() < Cost::infinite());
        assert_eq!(Cost::infinite(), Cost::infinite());
        assert_eq!(Cost::infinite().to_string(), "{inf}");
    }

    #[test]
    fn test_default_factory_weights_io() {
        let factory = DefaultCostFactory::default();
        let cost = factory.make_cost(10.0, 2.0, 1.0);
        assert_eq!(cost.total(), 10.0 + 2.0 + 4.0);
        assert_eq!(factory.make_zero() + cost, cost);
    }
}
