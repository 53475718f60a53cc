//! Bridge instance - one context per device connection
//!
//! [`InstanceContext`] owns everything a running instance needs: the
//! parameter cache, the connection supervisor, the coalesced variable and
//! feedback pipelines and the host handle. Actions, feedbacks, registration
//! and change handling are implemented on it in the submodules.
//! [`EmberInstance`] is the public face handed to the binary and the host.

pub mod actions;
mod definitions;
pub mod feedbacks;
mod registration;
mod variables;


pub use actions::ActionId;
pub use feedbacks::FeedbackId;

use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

use crate::batch::Coalescer;
use crate::config::InstanceConfig;
use crate::connection::{ConnectionSupervisor, LinkState, SessionObserver, StatusReporter};
use crate::ember::EmberClientFactory;
use crate::host::{Host, InstanceStatus, LogLevel};
use crate::state::{CachedParameter, EmberState, Selection};

/// Feedback re-checks collected during one coalescing window
#[derive(Debug, Default)]
pub(crate) struct FeedbackChecks {
    pub ids: BTreeSet<String>,
    pub kinds: BTreeSet<String>,
}

pub struct InstanceContext {
    config: RwLock<InstanceConfig>,
    host: Arc<dyn Host>,
    state: Mutex<EmberState>,
    connection: ConnectionSupervisor,
    variables: Coalescer<BTreeMap<String, Value>>,
    feedback_checks: Coalescer<FeedbackChecks>,
    recording: AtomicBool,
    weak_self: Weak<InstanceContext>,
}

impl InstanceContext {
    fn new(
        config: InstanceConfig,
        host: Arc<dyn Host>,
        factory: Arc<dyn EmberClientFactory>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<InstanceContext>| {
            let timings = config.timings.clone();
            let status = Arc::new(StatusReporter::new(
                Arc::clone(&host),
                timings.status_throttle(),
            ));
            let connection =
                ConnectionSupervisor::new(factory, config.connection_settings(), status);
            let observer: Weak<dyn SessionObserver> = weak.clone();
            connection.set_observer(observer);

            let variable_host = Arc::clone(&host);
            let variables = Coalescer::new(
                "variables",
                timings.update_window(),
                Arc::new(move |batch: BTreeMap<String, Value>| {
                    variable_host.set_variable_values(batch);
                }),
            );

            let feedback_host = Arc::clone(&host);
            let feedback_checks = Coalescer::new(
                "feedbacks",
                timings.update_window(),
                Arc::new(move |checks: FeedbackChecks| {
                    if !checks.kinds.is_empty() {
                        let kinds: Vec<String> = checks.kinds.into_iter().collect();
                        feedback_host.check_feedbacks(&kinds);
                    }
                    if !checks.ids.is_empty() {
                        let ids: Vec<String> = checks.ids.into_iter().collect();
                        feedback_host.check_feedbacks_by_id(&ids);
                    }
                }),
            );

            Self {
                config: RwLock::new(config),
                host,
                state: Mutex::new(EmberState::new()),
                connection,
                variables,
                feedback_checks,
                recording: AtomicBool::new(false),
                weak_self: weak.clone(),
            }
        })
    }

    /// Log to tracing and, when the level passes the configured minimum, to the host
    pub(crate) fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Error => error!("{}", message),
            LogLevel::Warning => warn!("{}", message),
            LogLevel::Information => info!("{}", message),
            LogLevel::Debug | LogLevel::Console => debug!("{}", message),
        }
        if level.passes(self.config.read().log_level) {
            self.host.log(level, message);
        }
    }

    /// Seed the monitored set from config, announce, and (re)connect
    fn apply_config(&self, config: InstanceConfig) {
        let monitored = config.monitored_paths();
        self.connection.configure(config.connection_settings());
        *self.config.write() = config;
        {
            let mut state = self.state.lock();
            for path in &monitored {
                state.add_monitored(path);
            }
        }
        self.announce_definitions();
        self.selection_changed();
        self.connection.start();
    }
}

#[async_trait::async_trait]
impl SessionObserver for InstanceContext {
    async fn on_session_ready(&self) -> Result<()> {
        self.resubscribe_monitored().await
    }
}

/// A running bridge instance
pub struct EmberInstance {
    ctx: Arc<InstanceContext>,
}

impl EmberInstance {
    pub fn new(
        config: InstanceConfig,
        host: Arc<dyn Host>,
        factory: Arc<dyn EmberClientFactory>,
    ) -> Self {
        Self {
            ctx: InstanceContext::new(config, host, factory),
        }
    }

    /// Announce definitions and start connecting with the current config
    pub fn init(&self) {
        let config = self.ctx.config.read().clone();
        info!("Initialising Ember+ instance");
        self.ctx.apply_config(config);
    }

    /// Configuration reload: drop all cached state and reconnect
    pub fn update_config(&self, config: InstanceConfig) {
        info!("Applying new instance configuration");
        self.ctx.variables.cancel();
        self.ctx.feedback_checks.cancel();
        self.ctx.state.lock().reset();
        self.ctx.apply_config(config);
    }

    /// Flush pending updates and stop the connection for good
    pub fn destroy(&self) {
        self.ctx.variables.flush();
        self.ctx.feedback_checks.flush();
        self.ctx.connection.destroy();
    }

    pub async fn execute_action(&self, action_id: &str, options: Value) -> Result<()> {
        self.ctx.execute_action(action_id, options).await
    }

    /// Evaluate one feedback instance
    pub fn check_feedback(&self, instance_id: &str, feedback_id: &str, options: Value) -> bool {
        self.ctx.check_feedback(instance_id, feedback_id, options)
    }

    /// The host removed a feedback instance
    pub fn remove_feedback(&self, instance_id: &str) {
        self.ctx.state.lock().unwatch(instance_id);
    }

    pub fn set_recording(&self, recording: bool) {
        self.ctx.recording.store(recording, Ordering::SeqCst);
        info!("Action recording {}", if recording { "enabled" } else { "disabled" });
    }

    pub fn is_recording(&self) -> bool {
        self.ctx.recording.load(Ordering::SeqCst)
    }

    /// Wait for queued requests, then deliver pending host updates
    pub async fn flush_updates(&self) {
        self.ctx.connection.queue().drain().await;
        self.ctx.variables.flush();
        self.ctx.feedback_checks.flush();
        self.ctx.connection.status().flush();
    }

    pub fn link_state(&self) -> LinkState {
        self.ctx.connection.link_state()
    }

    pub fn status(&self) -> Option<InstanceStatus> {
        self.ctx.connection.status().current()
    }

    pub fn selection(&self) -> Selection {
        self.ctx.state.lock().selection
    }

    pub fn cached(&self, path: &str) -> Option<CachedParameter> {
        self.ctx.state.lock().get(path).cloned()
    }

    pub fn is_monitored(&self, path: &str) -> bool {
        self.ctx.state.lock().is_monitored(path)
    }

    /// Monitored paths with their cached parameter, if any
    pub fn monitored_parameters(&self) -> Vec<(String, Option<CachedParameter>)> {
        let state = self.ctx.state.lock();
        state
            .monitored()
            .map(|path| (path.clone(), state.get(path).cloned()))
            .collect()
    }
}
