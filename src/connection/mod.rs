//! Connections to the remote management interface
//!
//! The runner only talks to the [`ManagementConnection`] and [`Connector`]
//! traits. Connection-level failures are reported as errors, while data
//! that is simply absent on the remote side comes back as `None`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::entity::{ObjectName, ObjectNamePattern};
use crate::error::Result;

#[cfg(feature = "jolokia")]
pub mod jolokia;
pub mod memory;
pub mod tls;

/// Current value of one attribute, `None` when the remote side has no value
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeValue {
    pub name: String,
    pub value: Option<f64>,
}

impl AttributeValue {
    pub fn new(name: impl Into<String>, value: Option<f64>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Metadata descriptor fields of an object
pub type Descriptor = HashMap<String, String>;

/// Descriptor field holding the per-instance id of a system entity
pub const INSTANCE_ID_FIELD: &str = "id";

/// A live handle on the management interface
///
/// Implementations must tolerate concurrent reads: collection fans out over
/// all sources on the same handle.
#[async_trait]
pub trait ManagementConnection: Send + Sync + 'static {
    /// Names of all objects selected by a pattern
    async fn query_names(&self, pattern: &ObjectNamePattern) -> Result<Vec<ObjectName>>;

    /// Read several attributes of one object in a single request
    ///
    /// Returns one value per requested attribute, in request order, with
    /// `None` for attributes the object has no value for. A missing object
    /// is reported as [`AgentError::EntityNotFound`](crate::error::AgentError).
    async fn get_attributes(
        &self,
        name: &ObjectName,
        attributes: &[String],
    ) -> Result<Vec<AttributeValue>>;

    /// Read the metadata descriptor of one object
    ///
    /// A missing object is reported as `EntityNotFound`, distinct from
    /// connection-level failures.
    async fn get_descriptor(&self, name: &ObjectName) -> Result<Descriptor>;

    /// Release the underlying resources
    async fn close(&self) -> Result<()>;

    /// Human readable connection target, for diagnostics
    fn target(&self) -> &str;
}

/// Establishes connections
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new connection
    async fn connect(&self) -> Result<Arc<dyn ManagementConnection>>;

    /// Human readable connection target, for diagnostics
    fn target(&self) -> &str;
}
