//! # Trait Sets
//!
//! Traits describe physical and logical properties of an algebra node's output.
//! The rule engine compares the traits a parent *requires* against the traits a
//! child *provides* and converts or enforces where they differ.
//!
//! ## Trait kinds
//!
//! - **Convention**: which execution strategy family a node is compiled for.
//!   Logical nodes carry [`Convention::None`]; conversion rules move them into
//!   `Enumerable` or `Bindable`.
//! - **Collation**: the sort order of the output, as an ordered list of field
//!   collations.
//! - **Distribution**: how rows are partitioned across workers.
//! - **Data model**: relational, document or graph.
//!
//! ## Trait definitions
//!
//! Which of these kinds a session tracks is decided by its [`TraitDef`] list.
//! The convention is always tracked; the others can be switched off, in which
//! case requirements on them are ignored during matching.
//!
//! ## Satisfaction
//!
//! A required collation is satisfied when it is a prefix of (or equal to) the
//! provided one: a stream sorted by `a, b, c` is also sorted by `a, b`. An empty
//! requirement is always satisfied.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution strategy family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Convention {
    /// Logical, not yet implemented.
    None,
    Enumerable,
    Bindable,
    Interpretable,
}

impl fmt::Display for Convention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Convention::None => "NONE",
            Convention::Enumerable => "ENUMERABLE",
            Convention::Bindable => "BINDABLE",
            Convention::Interpretable => "INTERPRETABLE",
        };
        f.write_str(name)
    }
}

/// Sort direction of a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    StrictlyAscending,
    Descending,
    StrictlyDescending,
    /// Equal values are adjacent, but in no particular order.
    Clustered,
}

/// How a column's values evolve along the stored order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Monotonicity {
    Increasing,
    StrictlyIncreasing,
    Decreasing,
    StrictlyDecreasing,
    /// Grouped but not ordered.
    Monotonic,
    Constant,
    NotMonotonic,
}

impl Direction {
    pub fn monotonicity(self) -> Monotonicity {
        match self {
            Direction::Ascending => Monotonicity::Increasing,
            Direction::StrictlyAscending => Monotonicity::StrictlyIncreasing,
            Direction::Descending => Monotonicity::Decreasing,
            Direction::StrictlyDescending => Monotonicity::StrictlyDecreasing,
            Direction::Clustered => Monotonicity::Monotonic,
        }
    }

    pub fn is_descending(self) -> bool {
        matches!(self, Direction::Descending | Direction::StrictlyDescending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldCollation {
    pub field_index: usize,
    pub direction: Direction,
}

impl FieldCollation {
    pub fn asc(field_index: usize) -> Self {
        Self {
            field_index,
            direction: Direction::Ascending,
        }
    }

    pub fn desc(field_index: usize) -> Self {
        Self {
            field_index,
            direction: Direction::Descending,
        }
    }
}

/// Ordered list of field collations. Empty means "no particular order".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Collation(pub Vec<FieldCollation>);

impl Collation {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn of(fields: Vec<FieldCollation>) -> Self {
        Self(fields)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> &[FieldCollation] {
        &self.0
    }

    /// Leading field collation, the only one consulted for monotonicity.
    pub fn first(&self) -> Option<&FieldCollation> {
        self.0.first()
    }

    /// Whether output in `self` order also satisfies `required`.
    pub fn satisfies(&self, required: &Collation) -> bool {
        required.0.len() <= self.0.len()
            && required.0.iter().zip(self.0.iter()).all(|(r, p)| r == p)
    }

    /// Renumber field indexes through `mapping`; `None` if a key is dropped.
    pub fn remap(&self, mapping: &[Option<usize>]) -> Option<Collation> {
        self.0
            .iter()
            .map(|fc| {
                mapping
                    .get(fc.field_index)
                    .copied()
                    .flatten()
                    .map(|field_index| FieldCollation {
                        field_index,
                        direction: fc.direction,
                    })
            })
            .collect::<Option<Vec<_>>>()
            .map(Collation)
    }
}

impl fmt::Display for Collation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, fc) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", fc.field_index)?;
            if fc.direction.is_descending() {
                write!(f, " DESC")?;
            }
        }
        write!(f, "]")
    }
}

/// Row distribution across workers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Distribution {
    /// No guarantee.
    #[default]
    Any,
    Singleton,
    Broadcast,
    Hash(Vec<usize>),
    RoundRobin,
    Random,
}

/// Data model an algebra node operates in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataModel {
    #[default]
    Relational,
    Document,
    Graph,
}

impl fmt::Display for DataModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataModel::Relational => "RELATIONAL",
            DataModel::Document => "DOCUMENT",
            DataModel::Graph => "GRAPH",
        };
        f.write_str(name)
    }
}

/// A trait kind tracked by a planning session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraitDef {
    Convention,
    Collation,
    Distribution,
    DataModel,
}

/// The traits of one node (or a requirement on one).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AlgTraitSet {
    pub convention: Option<Convention>,
    pub collation: Collation,
    pub distribution: Distribution,
    pub model: DataModel,
}

impl AlgTraitSet {
    /// Logical relational traits with no order.
    pub fn logical() -> Self {
        Self {
            convention: Some(Convention::None),
            ..Self::default()
        }
    }

    /// Requirement that only constrains the convention.
    pub fn of(convention: Convention) -> Self {
        Self {
            convention: Some(convention),
            ..Self::default()
        }
    }

    /// No requirement at all.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn convention(&self) -> Convention {
        self.convention.unwrap_or(Convention::None)
    }

    pub fn replace_convention(&self, convention: Convention) -> Self {
        Self {
            convention: Some(convention),
            ..self.clone()
        }
    }

    pub fn replace_collation(&self, collation: Collation) -> Self {
        Self {
            collation,
            ..self.clone()
        }
    }

    pub fn replace_model(&self, model: DataModel) -> Self {
        Self {
            model,
            ..self.clone()
        }
    }

    /// Whether `self`, as provided traits, satisfies `required`, considering only
    /// the trait kinds in `defs`.
    pub fn satisfies(&self, required: &AlgTraitSet, defs: &[TraitDef]) -> bool {
        let convention_ok = match required.convention {
            None => true,
            Some(c) => self.convention() == c,
        };
        let collation_ok = !defs.contains(&TraitDef::Collation)
            || self.collation.satisfies(&required.collation);
        let distribution_ok = !defs.contains(&TraitDef::Distribution)
            || required.distribution == Distribution::Any
            || required.distribution == self.distribution;
        let model_ok = !defs.contains(&TraitDef::DataModel) || required.model == self.model;
        convention_ok && collation_ok && distribution_ok && model_ok
    }
}

impl fmt::Display for AlgTraitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.convention(), self.model)?;
        if !self.collation.is_empty() {
            write!(f, ".{}", self.collation)?;
        }
        Ok(())
    }
}
