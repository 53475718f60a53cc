//! Test helpers shared by the unit and scenario tests

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::host::{
    ActionDefinition, FeedbackDefinition, Host, InstanceStatus, LogLevel, RecordedAction,
    VariableDefinition,
};

/// One call received by [`RecordingHost`]
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    ActionDefinitions(Vec<String>),
    FeedbackDefinitions(Vec<String>),
    VariableDefinitions(Vec<String>),
    CheckFeedbacks(Vec<String>),
    CheckFeedbacksById(Vec<String>),
    Variables(BTreeMap<String, Value>),
    Record(RecordedAction, Option<String>),
    Status(InstanceStatus, Option<String>),
    Log(LogLevel, String),
}

/// Host that journals every call
#[derive(Default)]
pub struct RecordingHost {
    calls: Mutex<Vec<HostCall>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    pub fn last_status(&self) -> Option<InstanceStatus> {
        self.calls.lock().iter().rev().find_map(|c| match c {
            HostCall::Status(status, _) => Some(*status),
            _ => None,
        })
    }

    pub fn saw_status(&self, status: InstanceStatus) -> bool {
        self.calls
            .lock()
            .iter()
            .any(|c| matches!(c, HostCall::Status(s, _) if *s == status))
    }

    /// Latest pushed value of a variable
    pub fn variable(&self, id: &str) -> Option<Value> {
        self.calls.lock().iter().rev().find_map(|c| match c {
            HostCall::Variables(values) => values.get(id).cloned(),
            _ => None,
        })
    }

    /// Latest announced variable ids
    pub fn variable_ids(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find_map(|c| match c {
                HostCall::VariableDefinitions(ids) => Some(ids.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    pub fn checked_ids(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                HostCall::CheckFeedbacksById(ids) => Some(ids.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn checked_kinds(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                HostCall::CheckFeedbacks(kinds) => Some(kinds.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn recorded(&self) -> Vec<(RecordedAction, Option<String>)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                HostCall::Record(action, key) => Some((action.clone(), key.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                HostCall::Log(LogLevel::Warning, message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: HostCall) {
        self.calls.lock().push(call);
    }
}

impl Host for RecordingHost {
    fn set_action_definitions(&self, definitions: BTreeMap<String, ActionDefinition>) {
        self.push(HostCall::ActionDefinitions(definitions.into_keys().collect()));
    }

    fn set_feedback_definitions(&self, definitions: BTreeMap<String, FeedbackDefinition>) {
        self.push(HostCall::FeedbackDefinitions(definitions.into_keys().collect()));
    }

    fn set_variable_definitions(&self, definitions: Vec<VariableDefinition>) {
        self.push(HostCall::VariableDefinitions(
            definitions.into_iter().map(|d| d.variable_id).collect(),
        ));
    }

    fn check_feedbacks(&self, kinds: &[String]) {
        self.push(HostCall::CheckFeedbacks(kinds.to_vec()));
    }

    fn check_feedbacks_by_id(&self, ids: &[String]) {
        self.push(HostCall::CheckFeedbacksById(ids.to_vec()));
    }

    fn set_variable_values(&self, values: BTreeMap<String, Value>) {
        self.push(HostCall::Variables(values));
    }

    fn record_action(&self, action: RecordedAction, grouping_key: Option<String>) {
        self.push(HostCall::Record(action, grouping_key));
    }

    fn update_status(&self, status: InstanceStatus, message: Option<String>) {
        self.push(HostCall::Status(status, message));
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.push(HostCall::Log(level, message.to_string()));
    }
}

/// Poll `condition` every 5ms for up to two seconds
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
