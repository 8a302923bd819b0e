//! Discovery of metric sources on the management interface
//!
//! Two naming conventions exist on the remote side. Platform entities belong
//! to the base `cf` deployment and carry `job`, `index` and `ip` key
//! properties. System entities belong to every other deployment and often
//! carry only a per-instance id in their descriptor, so their host is found
//! by joining that id against the platform `index -> ip` cache built earlier
//! in the same pass.

use log::{debug, info, warn};
use std::collections::BTreeMap;

use crate::catalog::Catalog;
use crate::connection::{INSTANCE_ID_FIELD, ManagementConnection};
use crate::entity::{MetricSource, ObjectName, ObjectNamePattern};
use crate::error::{AgentError, Result};
use crate::util::format::{multiline_list, multiline_map};

/// Query selecting the base platform deployment
pub const PLATFORM_PATTERN: &str = "org.cloudfoundry:deployment=cf,job=*,index=*,ip=*";

/// Query selecting every Cloud Foundry object
pub const SYSTEM_PATTERN: &str = "org.cloudfoundry:*";

/// Deployment name of the base platform
pub const PLATFORM_DEPLOYMENT: &str = "cf";

/// Instance index -> host, valid for a single pass
pub type IpCache = BTreeMap<String, String>;

/// Run one discovery pass
///
/// Platform sources come first, followed by system sources.
pub async fn discover(
    connection: &dyn ManagementConnection,
    catalog: &Catalog,
) -> Result<Vec<MetricSource>> {
    info!("Discovering metrics...");

    let (mut sources, ip_cache) = discover_platform(connection, catalog).await?;
    info!("Loaded IP cache:\n{}", multiline_map(&ip_cache));

    sources.extend(discover_system(connection, catalog, &ip_cache).await?);

    info!(
        "Discovered {} metric sources:\n{}",
        sources.len(),
        multiline_list(&sources)
    );

    Ok(sources)
}

async fn query(
    connection: &dyn ManagementConnection,
    pattern: &str,
) -> Result<Vec<ObjectName>> {
    let pattern = ObjectNamePattern::parse(pattern)
        .map_err(|e| AgentError::Discovery(format!("Invalid query {}: {}", pattern, e)))?;

    connection
        .query_names(&pattern)
        .await
        .map_err(|e| AgentError::Discovery(format!("Query {} failed: {}", pattern, e)))
}

fn owned_property(name: &ObjectName, key: &str) -> Option<String> {
    name.key_property(key).map(str::to_string)
}

async fn discover_platform(
    connection: &dyn ManagementConnection,
    catalog: &Catalog,
) -> Result<(Vec<MetricSource>, IpCache)> {
    let names = query(connection, PLATFORM_PATTERN).await?;
    debug!("Platform query returned {} objects", names.len());

    let mut ip_cache = IpCache::new();
    let mut sources = Vec::new();

    for name in names {
        let ip = owned_property(&name, "ip");
        let index = owned_property(&name, "index");
        let job = owned_property(&name, "job");

        if let (Some(index), Some(ip)) = (index, &ip) {
            ip_cache.insert(index, ip.clone());
        }

        let (Some(ip), Some(job)) = (ip, job) else {
            warn!("ip and job property missing for {}.", name);
            continue;
        };

        // Unknown jobs are expected as the platform grows new job types.
        let Some(attributes) = catalog.for_kind(&job) else {
            info!("No attribute mapping present for job type {}.", job);
            continue;
        };

        match MetricSource::new(name, Some(ip), job, attributes.clone()) {
            Ok(source) => sources.push(source),
            Err(e) => warn!("Skipping platform object: {}", e),
        }
    }

    Ok((sources, ip_cache))
}

async fn discover_system(
    connection: &dyn ManagementConnection,
    catalog: &Catalog,
    ip_cache: &IpCache,
) -> Result<Vec<MetricSource>> {
    let names = query(connection, SYSTEM_PATTERN).await?;
    let mut sources = Vec::new();

    for name in names {
        match name.key_property("deployment") {
            Some(deployment) if deployment != PLATFORM_DEPLOYMENT => {}
            _ => continue,
        }

        let job = owned_property(&name, "job");
        let mut ip = owned_property(&name, "ip");

        if ip.is_none() {
            let descriptor = match connection.get_descriptor(&name).await {
                Ok(descriptor) => descriptor,
                // Deregistered since the query; rediscovery drops it for good.
                Err(AgentError::EntityNotFound(reason)) => {
                    warn!("{} disappeared during discovery, skipping: {}", name, reason);
                    continue;
                }
                Err(e) => {
                    return Err(AgentError::Discovery(format!(
                        "Descriptor read for {} failed: {}",
                        name, e
                    )));
                }
            };

            ip = descriptor
                .get(INSTANCE_ID_FIELD)
                .and_then(|id| ip_cache.get(id))
                .cloned();
        }

        let (Some(ip), Some(job)) = (ip, job) else {
            warn!("ip and job property missing for {}.", name);
            continue;
        };

        match MetricSource::new(name, Some(ip), job, catalog.system().clone()) {
            Ok(source) => sources.push(source),
            Err(e) => warn!("Skipping system object: {}", e),
        }
    }

    Ok(sources)
}
