//! Parameter registration - keeps subscriptions warm for paths in use
//!
//! `register_parameter` is the only way a path gets subscribed outside of a
//! reconnect. Lookups travel on the write queue and re-check the cache when
//! they run, so a path already resolved by an earlier job never causes a
//! second remote lookup.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, warn};

use super::InstanceContext;
use crate::connection::JobHandle;
use crate::ember::{ChangeCallback, EmberError, TreeElement};
use crate::host::LogLevel;

impl InstanceContext {
    /// Resolve `path` to a subscribed parameter element
    ///
    /// With `create_entry` the path joins the monitored set and stays
    /// subscribed across reconnects. Returns `None` (after logging) when the
    /// path cannot be resolved to a parameter.
    pub(crate) async fn register_parameter(
        &self,
        path: &str,
        create_entry: bool,
    ) -> Option<TreeElement> {
        if let Some(element) = self.reuse_registration(path, create_entry) {
            return Some(element);
        }
        let ctx = self.weak_self.upgrade()?;

        let job_path = path.to_string();
        let handle = self
            .connection
            .request(format!("register {}", path), move |client| async move {
                if let Some(element) = ctx.reuse_registration(&job_path, create_entry) {
                    return Ok(element);
                }
                let element = client
                    .get_element_by_path(&job_path, Some(ctx.change_callback(&job_path)))
                    .await
                    .with_context(|| format!("Lookup of {} failed", job_path))?;
                if element.as_parameter().is_none() {
                    anyhow::bail!("{} is not a parameter", job_path);
                }
                ctx.accept_registration(&job_path, &element, create_entry);
                Ok(element)
            });

        match handle.outcome().await {
            Ok(element) => Some(element),
            Err(e) => {
                self.log(
                    LogLevel::Warning,
                    &format!("Parameter {} not found: {:#}", path, e),
                );
                None
            },
        }
    }

    /// Unconditional lookup used to re-establish a monitored path
    pub(crate) fn subscribe_path(self: &Arc<Self>, path: &str) -> JobHandle<TreeElement> {
        let ctx = Arc::clone(self);
        let job_path = path.to_string();
        self.connection
            .request(format!("resubscribe {}", path), move |client| async move {
                let element = client
                    .get_element_by_path(&job_path, Some(ctx.change_callback(&job_path)))
                    .await
                    .with_context(|| format!("Resubscribe of {} failed", job_path))?;
                ctx.accept_registration(&job_path, &element, false);
                Ok::<_, anyhow::Error>(element)
            })
    }

    /// Resubscribe every monitored path on a fresh session
    ///
    /// Read-once entries are dropped so the next feedback check or action
    /// looks them up on the new session. Lookup failures are logged per path; only a broken session aborts.
    pub(crate) async fn resubscribe_monitored(&self) -> Result<()> {
        let Some(ctx) = self.weak_self.upgrade() else {
            return Ok(());
        };
        let (paths, dropped) = {
            let mut state = self.state.lock();
            let dropped = state.drop_read_once();
            (state.monitored().cloned().collect::<Vec<_>>(), dropped)
        };
        debug!(
            "Resubscribing {} monitored parameter(s), {} read-once dropped",
            paths.len(),
            dropped
        );

        let handles: Vec<(String, JobHandle<TreeElement>)> = paths
            .into_iter()
            .map(|path| {
                let handle = ctx.subscribe_path(&path);
                (path, handle)
            })
            .collect();

        for (path, handle) in handles {
            if let Err(e) = handle.outcome().await {
                let session_broken = e.chain().any(|cause| {
                    matches!(
                        cause.downcast_ref::<EmberError>(),
                        Some(EmberError::NotConnected | EmberError::Transport(_) | EmberError::Timeout)
                    )
                });
                if session_broken {
                    return Err(e.context("Resubscription aborted"));
                }
                warn!("Monitored parameter {} unavailable: {:#}", path, e);
            }
        }

        // Types and labels are known now
        self.announce_definitions();
        self.feedback_checks.schedule(|checks| {
            checks.kinds.insert(super::FeedbackId::Parameter.as_str().to_string());
        });
        Ok(())
    }

    /// Cached element when the path was registered before
    fn reuse_registration(&self, path: &str, create_entry: bool) -> Option<TreeElement> {
        let (element, grew) = {
            let mut state = self.state.lock();
            let element = state.get(path)?.element.clone();
            let grew = create_entry && state.add_monitored(path);
            (element, grew)
        };
        if grew {
            self.announce_definitions();
        }
        Some(element)
    }

    fn accept_registration(&self, path: &str, element: &TreeElement, create_entry: bool) {
        let grew = create_entry && self.state.lock().add_monitored(path);
        self.handle_changed_value(path, element);
        if grew {
            debug!(path, "Parameter added to monitored set");
            self.announce_definitions();
        }
    }

    fn change_callback(&self, path: &str) -> ChangeCallback {
        let weak = self.weak_self.clone();
        let path = path.to_string();
        Arc::new(move |element: TreeElement| {
            if let Some(ctx) = weak.upgrade() {
                ctx.handle_changed_value(&path, &element);
            }
        })
    }
}
