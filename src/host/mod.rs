//! Host plugin framework contract
//!
//! The control-surface host owns buttons, variables and the macro recorder.
//! The bridge talks to it exclusively through [`Host`]: definition
//! announcements (always full replacements), feedback re-check requests,
//! variable pushes, status updates and logging.

pub mod console;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub use console::ConsoleHost;

/// Instance status shown by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceStatus {
    Ok,
    Connecting,
    ConnectionFailure,
    BadConfig,
    UnknownWarning,
    Disconnected,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceStatus::Ok => "ok",
            InstanceStatus::Connecting => "connecting",
            InstanceStatus::ConnectionFailure => "connection_failure",
            InstanceStatus::BadConfig => "bad_config",
            InstanceStatus::UnknownWarning => "unknown_warning",
            InstanceStatus::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Host log levels, most severe first
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    #[serde(alias = "warn")]
    Warning,
    #[default]
    #[serde(alias = "info")]
    Information,
    Debug,
    Console,
}

impl LogLevel {
    /// Whether a message at `self` passes a configured minimum level
    pub fn passes(&self, minimum: LogLevel) -> bool {
        *self <= minimum
    }
}

/// Kind of an action or feedback option field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OptionKind {
    TextInput { default: String, use_variables: bool },
    Number { default: f64, min: f64, max: f64 },
    Checkbox { default: bool },
    Dropdown { choices: Vec<Choice>, default: Value, allow_custom: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Choice {
    pub id: Value,
    pub label: String,
}

impl Choice {
    pub fn new(id: impl Into<Value>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionField {
    pub id: String,
    pub label: String,
    #[serde(flatten)]
    pub kind: OptionKind,
}

impl OptionField {
    pub fn new(id: &str, label: &str, kind: OptionKind) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionDefinition {
    pub name: String,
    pub description: Option<String>,
    pub options: Vec<OptionField>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackDefinition {
    pub name: String,
    pub description: Option<String>,
    pub options: Vec<OptionField>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableDefinition {
    pub variable_id: String,
    pub name: String,
}

/// An action invocation handed to the macro recorder
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedAction {
    pub action_id: String,
    pub options: Map<String, Value>,
}

/// Everything the bridge consumes from the host framework
pub trait Host: Send + Sync {
    fn set_action_definitions(&self, definitions: BTreeMap<String, ActionDefinition>);

    fn set_feedback_definitions(&self, definitions: BTreeMap<String, FeedbackDefinition>);

    fn set_variable_definitions(&self, definitions: Vec<VariableDefinition>);

    /// Re-evaluate every feedback of the given kinds
    fn check_feedbacks(&self, kinds: &[String]);

    /// Re-evaluate specific feedback instances
    fn check_feedbacks_by_id(&self, ids: &[String]);

    fn set_variable_values(&self, values: BTreeMap<String, Value>);

    fn record_action(&self, action: RecordedAction, grouping_key: Option<String>);

    fn update_status(&self, status: InstanceStatus, message: Option<String>);

    fn log(&self, level: LogLevel, message: &str);

    /// Expand `$(module:variable)` references in user text
    fn parse_variables(&self, text: &str) -> String {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_filtering() {
        assert!(LogLevel::Error.passes(LogLevel::Information));
        assert!(LogLevel::Information.passes(LogLevel::Information));
        assert!(!LogLevel::Debug.passes(LogLevel::Information));
        assert!(LogLevel::Console.passes(LogLevel::Console));
    }

    #[test]
    fn test_log_level_aliases() {
        let level: LogLevel = serde_yaml::from_str("warn").unwrap();
        assert_eq!(level, LogLevel::Warning);
        let level: LogLevel = serde_yaml::from_str("debug").unwrap();
        assert_eq!(level, LogLevel::Debug);
    }
}
