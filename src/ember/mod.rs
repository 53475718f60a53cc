//! Ember+ device client contract
//!
//! The wire protocol lives outside this crate. Everything the bridge needs from
//! a provider connection is expressed by [`EmberClient`]: session lifecycle,
//! directory/element lookups with change callbacks, value writes and matrix
//! operations, plus a stream of connection events.

pub mod sim;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

pub use sim::{ProviderCall, SimulatedProvider};

pub type Result<T> = std::result::Result<T, EmberError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmberError {
    #[error("not connected")]
    NotConnected,

    #[error("element not found: {0}")]
    NotFound(String),

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Value carried by a parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum EmberValue {
    Boolean(bool),
    Integer(i64),
    Real(f64),
    String(String),
    Octets(
        #[serde(with = "serde_bytes")]
        #[schemars(with = "Vec<u8>")]
        Vec<u8>,
    ),
}

impl EmberValue {
    /// Numeric view (booleans count as 0/1, text is parsed)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            EmberValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            EmberValue::Integer(i) => Some(*i as f64),
            EmberValue::Real(r) => Some(*r),
            EmberValue::String(s) => s.trim().parse().ok(),
            EmberValue::Octets(_) => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            EmberValue::Boolean(b) => *b,
            EmberValue::Integer(i) => *i != 0,
            EmberValue::Real(r) => *r != 0.0 && !r.is_nan(),
            EmberValue::String(s) => !s.is_empty(),
            EmberValue::Octets(o) => !o.is_empty(),
        }
    }

    /// Display form used for string comparisons and variables
    pub fn to_display_string(&self) -> String {
        match self {
            EmberValue::Boolean(b) => b.to_string(),
            EmberValue::Integer(i) => i.to_string(),
            EmberValue::Real(r) => r.to_string(),
            EmberValue::String(s) => s.clone(),
            EmberValue::Octets(o) => hex::encode(o),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ParameterType {
    Boolean,
    Integer,
    Real,
    Enum,
    String,
}

impl ParameterType {
    pub fn all() -> &'static [ParameterType] {
        &[
            ParameterType::Boolean,
            ParameterType::Integer,
            ParameterType::Real,
            ParameterType::Enum,
            ParameterType::String,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterType::Boolean => "Boolean",
            ParameterType::Integer => "Integer",
            ParameterType::Real => "Real",
            ParameterType::Enum => "Enum",
            ParameterType::String => "String",
        }
    }
}

impl std::fmt::Display for ParameterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ParameterAccess {
    None,
    Read,
    Write,
    ReadWrite,
}

impl ParameterAccess {
    pub fn is_writable(&self) -> bool {
        matches!(self, ParameterAccess::Write | ParameterAccess::ReadWrite)
    }
}

/// Parameter fields as reported by the provider
///
/// Every field is optional: providers send partial updates and the cache
/// merges them field by field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParameterContents {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<EmberValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_type: Option<ParameterType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factor: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enumeration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<ParameterAccess>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParameterContents {
    /// Shallow field union: fields present in `update` overwrite ours
    pub fn merge(&mut self, update: &ParameterContents) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if update.$field.is_some() { self.$field = update.$field.clone(); })*
            };
        }
        take!(
            value,
            parameter_type,
            minimum,
            maximum,
            factor,
            enumeration,
            access,
            identifier,
            description
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MatrixContents {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub target_count: u32,
    #[serde(default)]
    pub source_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeContents {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ElementContents {
    Node(NodeContents),
    Parameter(ParameterContents),
    Matrix(MatrixContents),
}

/// A tree element resolved by path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TreeElement {
    pub path: String,
    #[serde(flatten)]
    pub contents: ElementContents,
}

impl TreeElement {
    pub fn parameter(path: impl Into<String>, contents: ParameterContents) -> Self {
        Self {
            path: path.into(),
            contents: ElementContents::Parameter(contents),
        }
    }

    pub fn as_parameter(&self) -> Option<&ParameterContents> {
        match &self.contents {
            ElementContents::Parameter(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self.contents, ElementContents::Matrix(_))
    }
}

/// Connection-level events emitted by a client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    Error(String),
}

/// Invoked for every subsequent change of a subscribed element
pub type ChangeCallback = Arc<dyn Fn(TreeElement) + Send + Sync>;

/// Device-protocol client (one logical session)
#[async_trait]
pub trait EmberClient: Send + Sync {
    /// Open the session; success is also announced as [`ClientEvent::Connected`]
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Drop every resource without a goodbye
    fn discard(&self);

    /// Walk the directory under `path` (the whole tree when `None`)
    async fn get_directory(
        &self,
        path: Option<&str>,
        on_change: Option<ChangeCallback>,
    ) -> Result<Vec<TreeElement>>;

    async fn get_element_by_path(
        &self,
        path: &str,
        on_change: Option<ChangeCallback>,
    ) -> Result<TreeElement>;

    /// Write a parameter value; resolves with the provider's acknowledgement
    async fn set_value(
        &self,
        element: &TreeElement,
        value: EmberValue,
        publish: bool,
    ) -> Result<TreeElement>;

    async fn matrix_connect(&self, matrix: &TreeElement, target: u32, sources: &[u32])
        -> Result<()>;

    async fn matrix_disconnect(
        &self,
        matrix: &TreeElement,
        target: u32,
        sources: &[u32],
    ) -> Result<()>;

    async fn matrix_set_connection(
        &self,
        matrix: &TreeElement,
        target: u32,
        sources: &[u32],
    ) -> Result<()>;

    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent>;
}

/// Creates a fresh client for each connection attempt
pub trait EmberClientFactory: Send + Sync {
    fn create(&self, host: &str, port: u16) -> Arc<dyn EmberClient>;
}
