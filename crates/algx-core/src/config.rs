//! # Feature Flags
//!
//! The booleans that shape a planning session: which trait definitions the cluster
//! carries, which rule groups get registered, and how entities lower to scans.
//! They are resolved once when a planner is constructed and never change for the
//! rest of that session.
//!
//! Flags can be built in code (`FeatureFlags::default()` plus the `with_*`
//! builders) or loaded from a JSON document. Keys missing from the document keep
//! their default value, so `{"constant_reduction": true}` is a complete config.

use crate::error::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// Register the collation trait definition with the cluster.
    pub collation_trait: bool,
    /// Register the data-model trait definition with the cluster.
    pub data_model_trait: bool,
    /// Make bindable the root convention and register the bindable rule group.
    pub bindable: bool,
    /// Register the enumerable conversion rules and allow enumerable scans.
    pub enumerable: bool,
    /// Register the streaming rule group.
    pub stream: bool,
    /// Prefer join association over project merging in the default group.
    pub join_commute: bool,
    /// Register the constant-reduction rule group.
    pub constant_reduction: bool,
    /// Force every non-translatable entity to lower to a generic logical scan.
    pub force_bindable: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            collation_trait: true,
            data_model_trait: true,
            bindable: false,
            enumerable: true,
            stream: true,
            join_commute: false,
            constant_reduction: false,
            force_bindable: false,
        }
    }
}

impl FeatureFlags {
    /// Parse flags from a (possibly partial) JSON object.
    pub fn from_json(doc: &str) -> Result<Self> {
        Ok(serde_json::from_str(doc)?)
    }

    pub fn with_enumerable(mut self, enabled: bool) -> Self {
        self.enumerable = enabled;
        self
    }

    pub fn with_bindable(mut self, enabled: bool) -> Self {
        self.bindable = enabled;
        self
    }

    pub fn with_stream(mut self, enabled: bool) -> Self {
        self.stream = enabled;
        self
    }

    pub fn with_join_commute(mut self, enabled: bool) -> Self {
        self.join_commute = enabled;
        self
    }

    pub fn with_constant_reduction(mut self, enabled: bool) -> Self {
        self.constant_reduction = enabled;
        self
    }

    pub fn with_force_bindable(mut self, enabled: bool) -> Self {
        self.force_bindable = enabled;
        self
    }

    pub fn with_collation_trait(mut self, enabled: bool) -> Self {
        self.collation_trait = enabled;
        self
    }

    pub fn with_data_model_trait(mut self, enabled: bool) -> Self {
        self.data_model_trait = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_behavior() {
        let flags = FeatureFlags::default();
        assert!(flags.collation_trait);
        assert!(flags.enumerable);
        assert!(flags.stream);
        assert!(!flags.bindable);
        assert!(!flags.constant_reduction);
        assert!(!flags.force_bindable);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let flags = FeatureFlags::from_json(r#"{"constant_reduction": true}"#).unwrap();
        assert!(flags.constant_reduction);
        assert!(flags.enumerable);
        assert!(!flags.join_commute);
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let err = FeatureFlags::from_json("{not json").unwrap_err();
        assert!(matches!(err, crate::error::PrepareError::Config(_)));
    }
}
