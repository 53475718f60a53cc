//! Cached parameter and selection types

use crate::ember::{EmberValue, ParameterContents, ParameterType, TreeElement};

/// "No selection" marker for matrix/source/target indices
pub const NO_SELECTION: i32 = -1;

/// One monitored parameter, as last reported by the provider
#[derive(Debug, Clone, PartialEq)]
pub struct CachedParameter {
    /// Merged parameter fields
    pub contents: ParameterContents,
    /// Raw element as last received (used to resubmit writes)
    pub element: TreeElement,
}

impl CachedParameter {
    pub fn value(&self) -> Option<&EmberValue> {
        self.contents.value.as_ref()
    }

    pub fn numeric_value(&self) -> Option<f64> {
        self.contents.value.as_ref().and_then(EmberValue::as_f64)
    }

    pub fn parameter_type(&self) -> Option<ParameterType> {
        self.contents.parameter_type
    }

    /// Display name: identifier, then description, then the path
    pub fn label(&self) -> String {
        self.contents
            .identifier
            .clone()
            .or_else(|| self.contents.description.clone())
            .unwrap_or_else(|| self.element.path.clone())
    }
}

/// Crosspoint selection built up by the select-source/target actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub source: i32,
    pub target: i32,
    pub matrix: i32,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            source: NO_SELECTION,
            target: NO_SELECTION,
            matrix: NO_SELECTION,
        }
    }
}

impl Selection {
    /// A take may only be attempted once all three are chosen
    pub fn is_complete(&self) -> bool {
        self.source != NO_SELECTION && self.target != NO_SELECTION && self.matrix != NO_SELECTION
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
