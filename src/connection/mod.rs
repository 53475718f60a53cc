//! Connection supervisor - owns the one session to the Ember+ provider
//!
//! Lifecycle: `Idle → Connecting → Connected → (Disconnected | Error) →
//! Connecting (after delay) → …`, with `Destroyed` reachable from anywhere.
//!
//! Each connection attempt gets a new session epoch. Events, timers and
//! connect results carrying an older epoch are ignored, so a teardown never
//! races with the attempt that replaced it.

pub mod queue;
pub mod status;

pub use queue::{JobHandle, WriteQueue};
pub use status::StatusReporter;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ember::{ClientEvent, EmberClient, EmberClientFactory, EmberError};
use crate::host::InstanceStatus;

/// Where and how to connect
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub host: Option<String>,
    pub port: u16,
    /// Fixed delay before every reconnect attempt
    pub reconnect_delay: Duration,
    /// Forced teardown/reconnect period; zero disables it
    pub refresh_interval: Duration,
    /// Upper bound for one queued request; zero waits forever
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Error,
    Destroyed,
}

/// Notified once a fresh session has completed discovery
#[async_trait]
pub trait SessionObserver: Send + Sync {
    /// Re-establish subscriptions; an error restarts the connection
    async fn on_session_ready(&self) -> Result<()>;
}

pub struct ConnectionSupervisor {
    factory: Arc<dyn EmberClientFactory>,
    settings: Arc<RwLock<ConnectionSettings>>,
    client: Arc<RwLock<Option<Arc<dyn EmberClient>>>>,
    queue: Arc<WriteQueue>,
    status: Arc<StatusReporter>,
    link: Arc<RwLock<LinkState>>,
    epoch: Arc<AtomicU64>,
    reconnect_timer: Arc<Mutex<Option<JoinHandle<()>>>>,
    refresh_timer: Arc<Mutex<Option<JoinHandle<()>>>>,
    listener: Arc<Mutex<Option<JoinHandle<()>>>>,
    observer: Arc<RwLock<Option<Weak<dyn SessionObserver>>>>,
}

impl ConnectionSupervisor {
    pub fn new(
        factory: Arc<dyn EmberClientFactory>,
        settings: ConnectionSettings,
        status: Arc<StatusReporter>,
    ) -> Self {
        Self {
            factory,
            settings: Arc::new(RwLock::new(settings)),
            client: Arc::new(RwLock::new(None)),
            queue: Arc::new(WriteQueue::new()),
            status,
            link: Arc::new(RwLock::new(LinkState::Idle)),
            epoch: Arc::new(AtomicU64::new(0)),
            reconnect_timer: Arc::new(Mutex::new(None)),
            refresh_timer: Arc::new(Mutex::new(None)),
            listener: Arc::new(Mutex::new(None)),
            observer: Arc::new(RwLock::new(None)),
        }
    }

    /// Clone for use in spawned tasks (all fields are shared)
    fn clone_for_task(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            settings: Arc::clone(&self.settings),
            client: Arc::clone(&self.client),
            queue: Arc::clone(&self.queue),
            status: Arc::clone(&self.status),
            link: Arc::clone(&self.link),
            epoch: Arc::clone(&self.epoch),
            reconnect_timer: Arc::clone(&self.reconnect_timer),
            refresh_timer: Arc::clone(&self.refresh_timer),
            listener: Arc::clone(&self.listener),
            observer: Arc::clone(&self.observer),
        }
    }

    pub fn set_observer(&self, observer: Weak<dyn SessionObserver>) {
        *self.observer.write() = Some(observer);
    }

    /// Replace the settings used by the next connection attempt
    pub fn configure(&self, settings: ConnectionSettings) {
        *self.settings.write() = settings;
    }

    pub fn link_state(&self) -> LinkState {
        *self.link.read()
    }

    pub fn is_connected(&self) -> bool {
        self.link_state() == LinkState::Connected
    }

    pub fn status(&self) -> &StatusReporter {
        &self.status
    }

    pub fn queue(&self) -> &WriteQueue {
        &self.queue
    }

    /// Current session client, if any
    pub fn client(&self) -> Option<Arc<dyn EmberClient>> {
        self.client.read().clone()
    }

    /// Queue a request against whichever session is live when it runs
    ///
    /// A request that outlives `request_timeout` fails with
    /// [`EmberError::Timeout`] and frees the worker for the next job.
    pub fn request<T, F, Fut>(&self, label: impl Into<String>, f: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn EmberClient>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let label = label.into();
        let slot = Arc::clone(&self.client);
        let limit = self.settings.read().request_timeout;
        let job_label = label.clone();
        self.queue.enqueue(label, async move {
            let client = slot.read().clone().ok_or(EmberError::NotConnected)?;
            if limit.is_zero() {
                return f(client).await;
            }
            match tokio::time::timeout(limit, f(client)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("⏱️  {} timed out after {:?}", job_label, limit);
                    Err(anyhow::Error::new(EmberError::Timeout)
                        .context(format!("{} timed out", job_label)))
                },
            }
        })
    }

    /// Tear down whatever is running and start a new connection attempt
    pub fn start(&self) {
        if self.link_state() == LinkState::Destroyed {
            return;
        }
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        self.cancel_timers();
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        self.queue.clear();
        if let Some(old) = self.client.write().take() {
            debug!("Discarding previous session");
            old.discard();
        }

        let settings = self.settings.read().clone();
        let host = match settings.host.as_deref().map(str::trim) {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => {
                warn!("No Ember+ host configured, not connecting");
                *self.link.write() = LinkState::Idle;
                self.status
                    .report(InstanceStatus::BadConfig, Some("Missing host".to_string()));
                return;
            },
        };

        info!("🔌 Connecting to Ember+ provider at {}:{}", host, settings.port);
        *self.link.write() = LinkState::Connecting;
        self.status.report(InstanceStatus::Connecting, None);

        let client = self.factory.create(&host, settings.port);
        // Subscribe before connecting so the connected event cannot be missed
        let mut events = client.subscribe_events();
        *self.client.write() = Some(Arc::clone(&client));

        let this = self.clone_for_task();
        let listener = tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Ember+ event listener lagged");
                        continue;
                    },
                    Err(RecvError::Closed) => break,
                };
                if !this.is_current(epoch) {
                    break;
                }
                match event {
                    ClientEvent::Connected => this.on_connected(epoch).await,
                    ClientEvent::Disconnected => {
                        this.on_lost(epoch, LinkState::Disconnected, InstanceStatus::Disconnected, None)
                    },
                    ClientEvent::Error(message) => this.on_lost(
                        epoch,
                        LinkState::Error,
                        InstanceStatus::ConnectionFailure,
                        Some(message),
                    ),
                }
            }
            debug!(epoch, "Ember+ event listener stopped");
        });
        *self.listener.lock() = Some(listener);

        let this = self.clone_for_task();
        tokio::spawn(async move {
            if let Err(e) = client.connect().await {
                this.on_failure(epoch, anyhow::Error::new(e).context("Connect failed"))
                    .await;
            }
        });
    }

    /// Stop timers, drop queued work and the session; final status is flushed
    pub fn destroy(&self) {
        *self.link.write() = LinkState::Destroyed;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.cancel_timers();
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        self.queue.clear();
        if let Some(client) = self.client.write().take() {
            client.discard();
        }
        self.status.shutdown();
        info!("Ember+ connection destroyed");
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch && self.link_state() != LinkState::Destroyed
    }

    async fn on_connected(&self, epoch: u64) {
        if let Some(timer) = self.reconnect_timer.lock().take() {
            timer.abort();
        }

        match self.establish_session().await {
            Ok(count) => {
                if !self.is_current(epoch) {
                    return;
                }
                info!("✅ Ember+ connected ({} elements discovered)", count);
                *self.link.write() = LinkState::Connected;
                self.status.report(InstanceStatus::Ok, None);
                self.arm_refresh();
            },
            Err(e) => self.on_failure(epoch, e).await,
        }
    }

    /// Directory discovery then resubscription of monitored paths
    async fn establish_session(&self) -> Result<usize> {
        let elements = self
            .request("discover", |client| async move {
                client
                    .get_directory(None, None)
                    .await
                    .context("Directory discovery failed")
            })
            .outcome()
            .await?;

        let observer = self.observer.read().as_ref().and_then(Weak::upgrade);
        if let Some(observer) = observer {
            observer.on_session_ready().await?;
        }
        Ok(elements.len())
    }

    async fn on_failure(&self, epoch: u64, error: anyhow::Error) {
        if !self.is_current(epoch) {
            return;
        }
        warn!("❌ Ember+ connection failed: {:#}", error);
        *self.link.write() = LinkState::Error;
        self.status
            .report(InstanceStatus::ConnectionFailure, Some(format!("{:#}", error)));

        if let Some(client) = self.client() {
            if let Err(e) = client.disconnect().await {
                debug!("Disconnect after failure: {}", e);
            }
        }
        self.schedule_reconnect();
    }

    fn on_lost(&self, epoch: u64, link: LinkState, status: InstanceStatus, message: Option<String>) {
        if !self.is_current(epoch) {
            return;
        }
        warn!("🔌 Ember+ session lost ({}) {}", status, message.as_deref().unwrap_or(""));
        *self.link.write() = link;
        self.status.report(status, message);
        self.schedule_reconnect();
    }

    /// Arm the reconnect timer unless one is already pending
    fn schedule_reconnect(&self) {
        if self.link_state() == LinkState::Destroyed {
            return;
        }
        let mut timer = self.reconnect_timer.lock();
        if timer.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let delay = self.settings.read().reconnect_delay;
        debug!("⏳ Ember+ reconnect in {}ms", delay.as_millis());

        let this = self.clone_for_task();
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.reconnect_timer.lock().take();
            this.start();
        }));
    }

    fn arm_refresh(&self) {
        let interval = self.settings.read().refresh_interval;
        let mut timer = self.refresh_timer.lock();
        if let Some(old) = timer.take() {
            old.abort();
        }
        if interval.is_zero() {
            return;
        }
        let this = self.clone_for_task();
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            info!("♻️  Forcing periodic Ember+ session refresh");
            this.refresh_timer.lock().take();
            this.start();
        }));
    }

    fn cancel_timers(&self) {
        if let Some(timer) = self.reconnect_timer.lock().take() {
            timer.abort();
        }
        if let Some(timer) = self.refresh_timer.lock().take() {
            timer.abort();
        }
    }
}
