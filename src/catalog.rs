//! Static mapping from job kinds to the attributes they expose
//!
//! The catalog is built once at startup and shared read-only (behind an
//! `Arc`) by discovery and every collection task.

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Semantic type of a sampled attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// Point-in-time value
    Gauge,
    /// Monotonic accumulator, the backend derives the rate
    CumulativeCounter,
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricType::Gauge => write!(f, "gauge"),
            MetricType::CumulativeCounter => write!(f, "cumulative_counter"),
        }
    }
}

/// Attribute name to metric type, ordered by attribute name
pub type AttributeMap = Arc<BTreeMap<String, MetricType>>;

/// Job kinds reported by the base platform deployment
pub mod kinds {
    pub const DIEGO_CELL: &str = "diego_cell";
    pub const ROUTER: &str = "router";
    pub const CLOUD_CONTROLLER: &str = "cloud_controller";
    pub const UAA: &str = "uaa";
    pub const DOPPLER: &str = "doppler";
}

/// Immutable kind -> attribute catalog
#[derive(Debug, Clone)]
pub struct Catalog {
    kinds: HashMap<String, AttributeMap>,
    system: AttributeMap,
}

impl Catalog {
    /// Create a catalog with only the shared system attributes
    pub fn new<I, S>(system: I) -> Self
    where
        I: IntoIterator<Item = (S, MetricType)>,
        S: Into<String>,
    {
        Self {
            kinds: HashMap::new(),
            system: to_attribute_map(system),
        }
    }

    /// Add (or replace) the attribute set for a kind
    ///
    /// Empty attribute sets are ignored: a source without attributes is
    /// never built.
    pub fn with_kind<I, S>(mut self, kind: impl Into<String>, attributes: I) -> Self
    where
        I: IntoIterator<Item = (S, MetricType)>,
        S: Into<String>,
    {
        let kind = kind.into();
        let attributes = to_attribute_map(attributes);

        if kind.is_empty() || attributes.is_empty() {
            warn!("Ignoring catalog entry for kind '{}' without attributes", kind);
            return self;
        }

        self.kinds.insert(kind, attributes);
        self
    }

    /// Merge additional kinds over the existing ones
    pub fn extend(mut self, extra: HashMap<String, HashMap<String, MetricType>>) -> Self {
        for (kind, attributes) in extra {
            self = self.with_kind(kind, attributes);
        }
        self
    }

    /// The built-in Cloud Foundry catalog
    pub fn cloudfoundry() -> Self {
        use MetricType::{CumulativeCounter, Gauge};

        Self::new([
            ("system.mem.percent", Gauge),
            ("system.swap.percent", Gauge),
            ("system.disk.ephemeral.percent", Gauge),
            ("system.disk.system.percent", Gauge),
            ("system.cpu.sys", Gauge),
            ("system.cpu.user", Gauge),
            ("system.cpu.wait", Gauge),
            ("system.healthy", Gauge),
        ])
        .with_kind(
            kinds::DIEGO_CELL,
            [
                ("opentsdb.nozzle.rep.CapacityTotalMemory", Gauge),
                ("opentsdb.nozzle.rep.CapacityRemainingMemory", Gauge),
                ("opentsdb.nozzle.rep.CapacityTotalDisk", Gauge),
                ("opentsdb.nozzle.rep.CapacityRemainingDisk", Gauge),
                ("opentsdb.nozzle.rep.ContainerCount", Gauge),
                ("opentsdb.nozzle.rep.UnhealthyCell", Gauge),
            ],
        )
        .with_kind(
            kinds::ROUTER,
            [
                ("opentsdb.nozzle.gorouter.total_routes", Gauge),
                ("opentsdb.nozzle.gorouter.total_requests", CumulativeCounter),
                ("opentsdb.nozzle.gorouter.responses", CumulativeCounter),
                ("opentsdb.nozzle.gorouter.bad_gateways", CumulativeCounter),
            ],
        )
        .with_kind(
            kinds::CLOUD_CONTROLLER,
            [
                ("opentsdb.nozzle.cc.requests.completed", CumulativeCounter),
                ("opentsdb.nozzle.cc.requests.outstanding", CumulativeCounter),
                ("opentsdb.nozzle.cc.tasks_running.count", Gauge),
                ("opentsdb.nozzle.cc.log_count.error", CumulativeCounter),
                ("opentsdb.nozzle.cc.log_count.fatal", CumulativeCounter),
                ("opentsdb.nozzle.cc.log_count.warn", CumulativeCounter),
            ],
        )
        .with_kind(
            kinds::UAA,
            [
                "client_authentication_count",
                "client_authentication_failure_count",
                "principal_authentication_failure_count",
                "principal_not_found_count",
                "user_authentication_count",
                "user_authentication_failure_count",
                "user_not_found_count",
                "user_password_changes",
                "user_password_failures",
            ]
            .map(|name| {
                (
                    format!("opentsdb.nozzle.uaa.audit_service.{}", name),
                    CumulativeCounter,
                )
            }),
        )
        .with_kind(
            kinds::DOPPLER,
            [
                ("opentsdb.nozzle.DopplerServer.memoryStats.numBytesAllocatedStack", Gauge),
                ("opentsdb.nozzle.DopplerServer.memoryStats.numBytesAllocatedHeap", Gauge),
                ("opentsdb.nozzle.DopplerServer.sentMessagesFirehose", CumulativeCounter),
            ],
        )
    }

    /// Attributes for a platform kind, if the kind is known
    pub fn for_kind(&self, kind: &str) -> Option<&AttributeMap> {
        self.kinds.get(kind)
    }

    /// Attributes shared by every system entity
    pub fn system(&self) -> &AttributeMap {
        &self.system
    }

    /// Known platform kinds, sorted
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.kinds.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::cloudfoundry()
    }
}

fn to_attribute_map<I, S>(attributes: I) -> AttributeMap
where
    I: IntoIterator<Item = (S, MetricType)>,
    S: Into<String>,
{
    Arc::new(
        attributes
            .into_iter()
            .map(|(name, metric_type)| (name.into(), metric_type))
            .collect(),
    )
}
