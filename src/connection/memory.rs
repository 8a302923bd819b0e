use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use super::{AttributeValue, Connector, Descriptor, ManagementConnection};
use crate::entity::{ObjectName, ObjectNamePattern};
use crate::error::{AgentError, Result};

#[derive(Debug, Default, Clone)]
struct MemoryEntity {
    values: BTreeMap<String, Option<f64>>,
    descriptor: Descriptor,
}

/// A scripted in-memory management interface for testing
pub struct MemoryConnection {
    entities: RwLock<BTreeMap<ObjectName, MemoryEntity>>,
    failing_reads: RwLock<HashSet<ObjectName>>,
    vanishing: RwLock<HashSet<ObjectName>>,
    fail_queries: AtomicBool,
    closed: AtomicBool,
    close_count: AtomicUsize,
    read_count: AtomicUsize,
    name: String,
}

impl MemoryConnection {
    /// Create an empty connection
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            entities: RwLock::new(BTreeMap::new()),
            failing_reads: RwLock::new(HashSet::new()),
            vanishing: RwLock::new(HashSet::new()),
            fail_queries: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_count: AtomicUsize::new(0),
            read_count: AtomicUsize::new(0),
            name: name.into(),
        }
    }

    /// Add an object with no attributes, or keep an existing one
    pub fn add_entity(&self, name: ObjectName) -> Result<()> {
        let mut entities = self.write_entities()?;
        entities.entry(name).or_default();
        Ok(())
    }

    /// Remove an object
    pub fn remove_entity(&self, name: &ObjectName) -> Result<()> {
        self.write_entities()?.remove(name);
        Ok(())
    }

    /// Set (or clear, with `None`) an attribute value, adding the object if needed
    pub fn set_value(
        &self,
        name: &ObjectName,
        attribute: impl Into<String>,
        value: Option<f64>,
    ) -> Result<()> {
        let mut entities = self.write_entities()?;
        entities
            .entry(name.clone())
            .or_default()
            .values
            .insert(attribute.into(), value);
        Ok(())
    }

    /// Set a descriptor field, adding the object if needed
    pub fn set_descriptor_field(
        &self,
        name: &ObjectName,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<()> {
        let mut entities = self.write_entities()?;
        entities
            .entry(name.clone())
            .or_default()
            .descriptor
            .insert(field.into(), value.into());
        Ok(())
    }

    /// Make attribute and descriptor reads of an object fail
    pub fn fail_reads_for(&self, name: &ObjectName) -> Result<()> {
        self.failing_reads
            .write()
            .map_err(|_| AgentError::Other("Lock poisoned".to_string()))?
            .insert(name.clone());
        Ok(())
    }

    /// Report an object in the next query that selects it, then remove it
    ///
    /// Mimics an instance deregistered between a query and the reads that
    /// follow it.
    pub fn vanish_after_query(&self, name: &ObjectName) -> Result<()> {
        self.vanishing
            .write()
            .map_err(|_| AgentError::Other("Lock poisoned".to_string()))?
            .insert(name.clone());
        Ok(())
    }

    /// Make every name query fail
    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Mark the connection as open again (used by [`MemoryConnector`])
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of times `close` was called
    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    /// Number of attribute reads served
    pub fn read_count(&self) -> usize {
        self.read_count.load(Ordering::SeqCst)
    }

    fn write_entities(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<ObjectName, MemoryEntity>>> {
        self.entities
            .write()
            .map_err(|_| AgentError::Other("Lock poisoned".to_string()))
    }

    fn entity(&self, name: &ObjectName) -> Result<MemoryEntity> {
        self.ensure_open()?;

        let failing = self
            .failing_reads
            .read()
            .map_err(|_| AgentError::Other("Lock poisoned".to_string()))?;
        if failing.contains(name) {
            return Err(AgentError::Connection(format!("Read of {} failed", name)));
        }

        let entities = self
            .entities
            .read()
            .map_err(|_| AgentError::Other("Lock poisoned".to_string()))?;
        entities
            .get(name)
            .cloned()
            .ok_or_else(|| AgentError::EntityNotFound(name.to_string()))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(AgentError::Connection(format!(
                "Connection {} is closed",
                self.name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ManagementConnection for MemoryConnection {
    async fn query_names(&self, pattern: &ObjectNamePattern) -> Result<Vec<ObjectName>> {
        self.ensure_open()?;

        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(AgentError::Connection(format!("Query {} failed", pattern)));
        }

        let names: Vec<ObjectName> = self
            .entities
            .read()
            .map_err(|_| AgentError::Other("Lock poisoned".to_string()))?
            .keys()
            .filter(|name| pattern.matches(name))
            .cloned()
            .collect();

        let mut vanishing = self
            .vanishing
            .write()
            .map_err(|_| AgentError::Other("Lock poisoned".to_string()))?;
        for name in names.iter().filter(|name| vanishing.contains(*name)) {
            self.write_entities()?.remove(name);
        }
        vanishing.retain(|name| !names.contains(name));

        Ok(names)
    }

    async fn get_attributes(
        &self,
        name: &ObjectName,
        attributes: &[String],
    ) -> Result<Vec<AttributeValue>> {
        let entity = self.entity(name)?;
        self.read_count.fetch_add(1, Ordering::SeqCst);

        Ok(attributes
            .iter()
            .map(|attribute| {
                let value = entity.values.get(attribute).copied().flatten();
                AttributeValue::new(attribute.clone(), value)
            })
            .collect())
    }

    async fn get_descriptor(&self, name: &ObjectName) -> Result<Descriptor> {
        Ok(self.entity(name)?.descriptor)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn target(&self) -> &str {
        &self.name
    }
}

/// Connector handing out one shared [`MemoryConnection`]
pub struct MemoryConnector {
    connection: Arc<MemoryConnection>,
    failures_left: AtomicUsize,
    connect_count: AtomicUsize,
}

impl MemoryConnector {
    pub fn new(connection: Arc<MemoryConnection>) -> Self {
        Self {
            connection,
            failures_left: AtomicUsize::new(0),
            connect_count: AtomicUsize::new(0),
        }
    }

    /// Fail the next `count` connection attempts
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Number of successful connections
    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }

    pub fn connection(&self) -> &Arc<MemoryConnection> {
        &self.connection
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn ManagementConnection>> {
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(AgentError::Connection(format!(
                "Unable to connect to {}",
                self.connection.target()
            )));
        }

        self.connection.reopen();
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.connection.clone())
    }

    fn target(&self) -> &str {
        self.connection.target()
    }
}
