//! # Preparation Errors
//!
//! Every failure this layer can surface is a variant of [`PrepareError`]. None of
//! them are retried here; re-planning after invalidating a snapshot belongs to the
//! caller.
//!
//! Type-mapping misses are deliberately absent: the type bridge recovers from them
//! locally (see `bridge`), so they never reach this enum.

use crate::entity::CapabilitySet;

/// Result alias used throughout the preparation core.
pub type Result<T> = std::result::Result<T, PrepareError>;

#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    /// An operation was requested in a lifecycle state where it is not legal.
    #[error("cannot move from {from} to {to}")]
    StateViolation { from: String, to: String },

    /// No lowering path existed for the entity's capability set.
    #[error("no legal lowering path for entity {entity} with capabilities {capabilities}")]
    LoweringExhausted {
        entity: String,
        capabilities: CapabilitySet,
    },

    /// A permanently disabled entry point was called.
    #[error("{0} is no longer supported")]
    Unsupported(&'static str),

    /// `transform` was given a stage index with no configured program.
    #[error("no program configured for stage {0}")]
    UnknownProgram(usize),

    /// The rule engine could not deliver the root in the requested convention.
    #[error("could not implement {node} in convention {convention}")]
    CannotPlan { convention: String, node: String },

    /// A translatable entity failed to produce its own algebra.
    #[error("translation of entity {entity} failed: {reason}")]
    Translation { entity: String, reason: String },

    /// A feature-flag document could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A failure inside a `transform` stage, tagged with the stage index.
    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: usize,
        #[source]
        source: Box<PrepareError>,
    },
}

impl PrepareError {
    pub fn state_violation(from: impl ToString, to: impl ToString) -> Self {
        PrepareError::StateViolation {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Wrap this error with the index of the stage that produced it.
    pub fn in_stage(self, stage: usize) -> Self {
        match self {
            already @ PrepareError::Stage { .. } => already,
            other => PrepareError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    pub fn is_state_violation(&self) -> bool {
        match self {
            PrepareError::StateViolation { .. } => true,
            PrepareError::Stage { source, .. } => source.is_state_violation(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for PrepareError {
    fn from(e: serde_json::Error) -> Self {
        PrepareError::Config(e.to_string())
    }
}
