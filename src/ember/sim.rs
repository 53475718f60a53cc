//! In-memory Ember+ provider
//!
//! Implements [`EmberClient`] against a local tree so the bridge can run
//! without hardware. Every request is journaled for inspection, value writes
//! echo back through the registered change callbacks the way a real provider
//! does, and the connection can be dropped or made unreachable on demand.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use super::{
    ChangeCallback, ClientEvent, ElementContents, EmberClient, EmberClientFactory, EmberError,
    EmberValue, ParameterContents, Result, TreeElement,
};

/// One request received by the simulated provider
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderCall {
    Connect,
    Disconnect,
    GetDirectory(Option<String>),
    GetElement(String),
    SetValue(String, EmberValue),
    MatrixConnect { path: String, target: u32, sources: Vec<u32> },
    MatrixDisconnect { path: String, target: u32, sources: Vec<u32> },
    MatrixSetConnection { path: String, target: u32, sources: Vec<u32> },
}

/// Simulated provider shared by every session created from it
pub struct SimulatedProvider {
    tree: RwLock<BTreeMap<String, TreeElement>>,
    callbacks: Mutex<HashMap<String, Vec<ChangeCallback>>>,
    connections: Mutex<BTreeMap<String, BTreeMap<u32, Vec<u32>>>>,
    events: broadcast::Sender<ClientEvent>,
    connected: AtomicBool,
    reachable: AtomicBool,
    /// Element lookups never answer while set
    stalled: AtomicBool,
    calls: Mutex<Vec<ProviderCall>>,
}

impl SimulatedProvider {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            tree: RwLock::new(BTreeMap::new()),
            callbacks: Mutex::new(HashMap::new()),
            connections: Mutex::new(BTreeMap::new()),
            events,
            connected: AtomicBool::new(false),
            reachable: AtomicBool::new(true),
            stalled: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Build a provider pre-populated with `elements`
    pub fn with_elements(elements: impl IntoIterator<Item = TreeElement>) -> Arc<Self> {
        let provider = Self::new();
        for element in elements {
            provider.insert(element);
        }
        provider
    }

    pub fn insert(&self, element: TreeElement) {
        self.tree.write().insert(element.path.clone(), element);
    }

    /// Apply a device-originated parameter change and notify subscribers
    pub fn push_update(&self, path: &str, update: ParameterContents) {
        let changed = {
            let mut tree = self.tree.write();
            let Some(element) = tree.get_mut(path) else {
                return;
            };
            match &mut element.contents {
                ElementContents::Parameter(p) => p.merge(&update),
                _ => return,
            }
            element.clone()
        };
        self.notify(changed);
    }

    pub fn element(&self, path: &str) -> Option<TreeElement> {
        self.tree.read().get(path).cloned()
    }

    /// Crosspoints currently connected on a matrix (target → sources)
    pub fn matrix_connections(&self, path: &str) -> BTreeMap<u32, Vec<u32>> {
        self.connections.lock().get(path).cloned().unwrap_or_default()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Make element lookups hang like an unresponsive device
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Drop the live session as if the network went away
    pub fn drop_connection(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.callbacks.lock().clear();
            let _ = self.events.send(ClientEvent::Disconnected);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Number of journaled calls matching `pred`
    pub fn count_calls(&self, pred: impl Fn(&ProviderCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: ProviderCall) {
        trace!(?call, "simulated provider request");
        self.calls.lock().push(call);
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EmberError::NotConnected)
        }
    }

    fn notify(&self, element: TreeElement) {
        let callbacks = self
            .callbacks
            .lock()
            .get(&element.path)
            .cloned()
            .unwrap_or_default();
        for callback in callbacks {
            callback(element.clone());
        }
    }

    fn lookup_matrix(&self, matrix: &TreeElement) -> Result<()> {
        match self.tree.read().get(&matrix.path) {
            Some(e) if e.is_matrix() => Ok(()),
            Some(_) => Err(EmberError::Protocol(format!("{} is not a matrix", matrix.path))),
            None => Err(EmberError::NotFound(matrix.path.clone())),
        }
    }
}

#[async_trait]
impl EmberClient for SimulatedProvider {
    async fn connect(&self) -> Result<()> {
        self.record(ProviderCall::Connect);
        if !self.reachable.load(Ordering::SeqCst) {
            let _ = self
                .events
                .send(ClientEvent::Error("provider unreachable".to_string()));
            return Err(EmberError::Transport("provider unreachable".to_string()));
        }
        self.callbacks.lock().clear();
        self.connected.store(true, Ordering::SeqCst);
        debug!("Simulated provider session opened");
        let _ = self.events.send(ClientEvent::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.record(ProviderCall::Disconnect);
        self.connected.store(false, Ordering::SeqCst);
        self.callbacks.lock().clear();
        Ok(())
    }

    fn discard(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.callbacks.lock().clear();
    }

    async fn get_directory(
        &self,
        path: Option<&str>,
        on_change: Option<ChangeCallback>,
    ) -> Result<Vec<TreeElement>> {
        self.record(ProviderCall::GetDirectory(path.map(str::to_string)));
        self.ensure_connected()?;
        let elements: Vec<TreeElement> = {
            let tree = self.tree.read();
            tree.values()
                .filter(|e| match path {
                    Some(prefix) => e.path == prefix || e.path.starts_with(&format!("{}.", prefix)),
                    None => true,
                })
                .cloned()
                .collect()
        };
        if let Some(callback) = on_change {
            let mut callbacks = self.callbacks.lock();
            for element in &elements {
                callbacks
                    .entry(element.path.clone())
                    .or_default()
                    .push(callback.clone());
            }
        }
        Ok(elements)
    }

    async fn get_element_by_path(
        &self,
        path: &str,
        on_change: Option<ChangeCallback>,
    ) -> Result<TreeElement> {
        self.record(ProviderCall::GetElement(path.to_string()));
        self.ensure_connected()?;
        if self.stalled.load(Ordering::SeqCst) {
            debug!(path, "Simulated provider stalled");
            std::future::pending::<()>().await;
        }
        let element = self
            .tree
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| EmberError::NotFound(path.to_string()))?;
        if let Some(callback) = on_change {
            self.callbacks
                .lock()
                .entry(path.to_string())
                .or_default()
                .push(callback);
        }
        Ok(element)
    }

    async fn set_value(
        &self,
        element: &TreeElement,
        value: EmberValue,
        _publish: bool,
    ) -> Result<TreeElement> {
        self.record(ProviderCall::SetValue(element.path.clone(), value.clone()));
        self.ensure_connected()?;
        let updated = {
            let mut tree = self.tree.write();
            match tree.get_mut(&element.path) {
                Some(TreeElement {
                    contents: ElementContents::Parameter(p),
                    ..
                }) => {
                    p.value = Some(value);
                },
                Some(_) => {
                    return Err(EmberError::Protocol(format!(
                        "{} is not a parameter",
                        element.path
                    )))
                },
                None => return Err(EmberError::NotFound(element.path.clone())),
            }
            tree.get(&element.path).cloned()
        };
        let updated = updated.ok_or_else(|| EmberError::NotFound(element.path.clone()))?;
        self.notify(updated.clone());
        Ok(updated)
    }

    async fn matrix_connect(&self, matrix: &TreeElement, target: u32, sources: &[u32]) -> Result<()> {
        self.record(ProviderCall::MatrixConnect {
            path: matrix.path.clone(),
            target,
            sources: sources.to_vec(),
        });
        self.ensure_connected()?;
        self.lookup_matrix(matrix)?;
        let mut connections = self.connections.lock();
        let current = connections
            .entry(matrix.path.clone())
            .or_default()
            .entry(target)
            .or_default();
        for source in sources {
            if !current.contains(source) {
                current.push(*source);
            }
        }
        Ok(())
    }

    async fn matrix_disconnect(
        &self,
        matrix: &TreeElement,
        target: u32,
        sources: &[u32],
    ) -> Result<()> {
        self.record(ProviderCall::MatrixDisconnect {
            path: matrix.path.clone(),
            target,
            sources: sources.to_vec(),
        });
        self.ensure_connected()?;
        self.lookup_matrix(matrix)?;
        if let Some(current) = self
            .connections
            .lock()
            .get_mut(&matrix.path)
            .and_then(|m| m.get_mut(&target))
        {
            current.retain(|s| !sources.contains(s));
        }
        Ok(())
    }

    async fn matrix_set_connection(
        &self,
        matrix: &TreeElement,
        target: u32,
        sources: &[u32],
    ) -> Result<()> {
        self.record(ProviderCall::MatrixSetConnection {
            path: matrix.path.clone(),
            target,
            sources: sources.to_vec(),
        });
        self.ensure_connected()?;
        self.lookup_matrix(matrix)?;
        self.connections
            .lock()
            .entry(matrix.path.clone())
            .or_default()
            .insert(target, sources.to_vec());
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }
}

/// Every session shares the same simulated device
impl EmberClientFactory for Arc<SimulatedProvider> {
    fn create(&self, host: &str, port: u16) -> Arc<dyn EmberClient> {
        debug!("Simulated provider session for {}:{}", host, port);
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ember::{MatrixContents, ParameterType};
    use std::sync::atomic::AtomicUsize;

    fn gain() -> TreeElement {
        TreeElement::parameter(
            "1.2",
            ParameterContents {
                value: Some(EmberValue::Integer(500)),
                parameter_type: Some(ParameterType::Integer),
                factor: Some(10),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_requires_connection() {
        let provider = SimulatedProvider::with_elements([gain()]);
        assert_eq!(
            provider.get_element_by_path("1.2", None).await,
            Err(EmberError::NotConnected)
        );
        provider.connect().await.unwrap();
        assert!(provider.get_element_by_path("1.2", None).await.is_ok());
        assert_eq!(
            provider.get_element_by_path("9.9", None).await,
            Err(EmberError::NotFound("9.9".into()))
        );
    }

    #[tokio::test]
    async fn test_set_value_echoes_to_callbacks() {
        let provider = SimulatedProvider::with_elements([gain()]);
        provider.connect().await.unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let hits_cb = hits.clone();
        let element = provider
            .get_element_by_path(
                "1.2",
                Some(Arc::new(move |_| {
                    hits_cb.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .await
            .unwrap();

        provider
            .set_value(&element, EmberValue::Integer(7), true)
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(
            provider.element("1.2").unwrap().as_parameter().unwrap().value,
            Some(EmberValue::Integer(7))
        );
    }

    #[tokio::test]
    async fn test_matrix_operations() {
        let matrix = TreeElement {
            path: "2".into(),
            contents: ElementContents::Matrix(MatrixContents {
                target_count: 4,
                source_count: 4,
                ..Default::default()
            }),
        };
        let provider = SimulatedProvider::with_elements([matrix.clone(), gain()]);
        provider.connect().await.unwrap();

        provider.matrix_connect(&matrix, 1, &[2, 3]).await.unwrap();
        provider.matrix_disconnect(&matrix, 1, &[2]).await.unwrap();
        assert_eq!(provider.matrix_connections("2").get(&1), Some(&vec![3]));

        provider.matrix_set_connection(&matrix, 1, &[0]).await.unwrap();
        assert_eq!(provider.matrix_connections("2").get(&1), Some(&vec![0]));

        assert!(provider.matrix_connect(&gain(), 0, &[0]).await.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_emits_error() {
        let provider = SimulatedProvider::new();
        let mut events = provider.subscribe_events();
        provider.set_reachable(false);
        assert!(provider.connect().await.is_err());
        assert!(matches!(events.recv().await, Ok(ClientEvent::Error(_))));
    }
}
