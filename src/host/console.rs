//! Console host - logs every host call for running without a control surface

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{
    ActionDefinition, FeedbackDefinition, Host, InstanceStatus, LogLevel, RecordedAction,
    VariableDefinition,
};

/// ConsoleHost stands in for the control-surface host
///
/// This is useful for:
/// - Driving a device from the REPL without a host application
/// - Watching variable and status traffic while debugging
/// - Development without hardware dependencies
pub struct ConsoleHost {
    name: String,
    /// Latest value of every variable pushed by the bridge
    variables: Arc<RwLock<BTreeMap<String, Value>>>,
    /// Names announced by the last definition update
    action_ids: Arc<RwLock<Vec<String>>>,
    feedback_ids: Arc<RwLock<Vec<String>>>,
    status: Arc<RwLock<Option<(InstanceStatus, Option<String>)>>>,
}

impl ConsoleHost {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variables: Arc::new(RwLock::new(BTreeMap::new())),
            action_ids: Arc::new(RwLock::new(Vec::new())),
            feedback_ids: Arc::new(RwLock::new(Vec::new())),
            status: Arc::new(RwLock::new(None)),
        }
    }

    pub fn variables(&self) -> BTreeMap<String, Value> {
        self.variables.read().clone()
    }

    pub fn action_ids(&self) -> Vec<String> {
        self.action_ids.read().clone()
    }

    pub fn feedback_ids(&self) -> Vec<String> {
        self.feedback_ids.read().clone()
    }

    pub fn status(&self) -> Option<(InstanceStatus, Option<String>)> {
        self.status.read().clone()
    }
}

impl Host for ConsoleHost {
    fn set_action_definitions(&self, definitions: BTreeMap<String, ActionDefinition>) {
        debug!(host = self.name, count = definitions.len(), "Action definitions updated");
        *self.action_ids.write() = definitions.into_keys().collect();
    }

    fn set_feedback_definitions(&self, definitions: BTreeMap<String, FeedbackDefinition>) {
        debug!(host = self.name, count = definitions.len(), "Feedback definitions updated");
        *self.feedback_ids.write() = definitions.into_keys().collect();
    }

    fn set_variable_definitions(&self, definitions: Vec<VariableDefinition>) {
        debug!(host = self.name, count = definitions.len(), "Variable definitions updated");
        let mut variables = self.variables.write();
        let known: Vec<String> = definitions.into_iter().map(|d| d.variable_id).collect();
        variables.retain(|id, _| known.contains(id));
    }

    fn check_feedbacks(&self, kinds: &[String]) {
        debug!(host = self.name, ?kinds, "Feedback re-check (by kind)");
    }

    fn check_feedbacks_by_id(&self, ids: &[String]) {
        debug!(host = self.name, ?ids, "Feedback re-check (by id)");
    }

    fn set_variable_values(&self, values: BTreeMap<String, Value>) {
        for (id, value) in &values {
            info!(
                "📊 [{}] {} = {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                id,
                value
            );
        }
        self.variables.write().extend(values);
    }

    fn record_action(&self, action: RecordedAction, grouping_key: Option<String>) {
        let options = Value::Object(action.options);
        info!(
            "⏺  Recorded {} {} (group: {})",
            action.action_id,
            options,
            grouping_key.unwrap_or_default()
        );
    }

    fn update_status(&self, status: InstanceStatus, message: Option<String>) {
        match status {
            InstanceStatus::Ok => info!("✅ Status: {}", status),
            InstanceStatus::Connecting => info!("🔄 Status: {}", status),
            _ => warn!(
                "⚠️  Status: {} {}",
                status,
                message.as_deref().unwrap_or_default()
            ),
        }
        *self.status.write() = Some((status, message));
    }

    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Error => error!(host = self.name, "{}", message),
            LogLevel::Warning => warn!(host = self.name, "{}", message),
            LogLevel::Information => info!(host = self.name, "{}", message),
            LogLevel::Debug => debug!(host = self.name, "{}", message),
            LogLevel::Console => println!("{}", message),
        }
    }
}
