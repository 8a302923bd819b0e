//! Sampling of discovered metric sources
use log::{debug, error, warn};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::core::Sample;
use crate::connection::ManagementConnection;
use crate::entity::MetricSource;
use crate::error::{AgentError, Result};

/// Read the current values of one source and turn them into samples
///
/// A source whose attributes are all absent yields no samples and a single
/// warning. A failed read is returned as a collection error.
pub async fn collect(
    source: &MetricSource,
    connection: &dyn ManagementConnection,
) -> Result<Vec<Sample>> {
    debug!("Collecting metrics from {}.", source);

    let values = connection
        .get_attributes(source.name(), &source.attribute_names())
        .await
        .map_err(|e| AgentError::Collection(format!("Reading {} failed: {}", source.name(), e)))?;

    if values.iter().all(|v| v.value.is_none()) {
        warn!(
            "No expected attributes are present for {}, skipping.",
            source.name()
        );
        return Ok(Vec::new());
    }

    let mut samples = Vec::with_capacity(values.len());
    for attribute in values {
        let Some(value) = attribute.value else {
            warn!(
                "{} has no attribute value for {}",
                source.name(),
                attribute.name
            );
            continue;
        };

        let Some(metric_type) = source.metric_type(&attribute.name) else {
            error!(
                "No metric type for {} on {}: catalog and discovery disagree",
                attribute.name,
                source.name()
            );
            return Err(AgentError::CatalogInconsistency {
                source_name: source.name().to_string(),
                attribute: attribute.name,
            });
        };

        samples.push(Sample::for_source(source, &attribute.name, metric_type, value));
    }

    Ok(samples)
}

/// Collect every source with at most `max_parallelism` reads in flight
///
/// The first failing source fails the whole cycle: partial results are
/// discarded and the remaining tasks are aborted.
pub async fn collect_all(
    sources: &[MetricSource],
    connection: Arc<dyn ManagementConnection>,
    max_parallelism: usize,
) -> Result<Vec<Sample>> {
    let semaphore = Arc::new(Semaphore::new(max_parallelism.max(1)));
    let mut tasks = JoinSet::new();

    for source in sources.iter().cloned() {
        let connection = Arc::clone(&connection);
        let semaphore = Arc::clone(&semaphore);

        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| AgentError::Other(format!("Collection semaphore closed: {}", e)))?;
            collect(&source, connection.as_ref()).await
        });
    }

    let mut samples = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let result = joined
            .map_err(|e| AgentError::Collection(format!("Collection task failed: {}", e)))?;
        samples.extend(result?);
    }

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, MetricType};
    use crate::connection::memory::MemoryConnection;
    use crate::entity::ObjectName;
    use log::{Level, LevelFilter, Log, Metadata, Record};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct CaptureLogger {
        records: Mutex<Vec<(Level, String)>>,
    }

    impl Log for CaptureLogger {
        fn enabled(&self, _: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            if let Ok(mut records) = self.records.lock() {
                records.push((record.level(), record.args().to_string()));
            }
        }

        fn flush(&self) {}
    }

    static LOGGER: CaptureLogger = CaptureLogger {
        records: Mutex::new(Vec::new()),
    };

    fn captured_warnings_mentioning(needle: &str) -> usize {
        LOGGER
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|(level, message)| *level == Level::Warn && message.contains(needle))
            .count()
    }

    fn router_source(conn: &MemoryConnection, index: &str) -> MetricSource {
        let name: ObjectName = format!(
            "org.cloudfoundry:deployment=cf,index={},ip=10.0.0.{},job=router",
            index, index
        )
        .parse()
        .unwrap();
        conn.add_entity(name.clone()).unwrap();

        MetricSource::new(
            name,
            Some(format!("10.0.0.{}", index)),
            "router",
            Catalog::cloudfoundry().for_kind("router").unwrap().clone(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_collect_builds_samples() {
        let conn = MemoryConnection::new("memory");
        let source = router_source(&conn, "1");
        conn.set_value(source.name(), "opentsdb.nozzle.gorouter.total_routes", Some(42.0))
            .unwrap();
        conn.set_value(source.name(), "opentsdb.nozzle.gorouter.responses", Some(1000.0))
            .unwrap();
        conn.set_value(source.name(), "opentsdb.nozzle.gorouter.bad_gateways", None)
            .unwrap();

        let mut samples = collect(&source, &conn).await.unwrap();
        samples.sort_by(|a, b| a.metric.cmp(&b.metric));

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].metric, "gorouter.responses");
        assert_eq!(samples[0].metric_type, MetricType::CumulativeCounter);
        assert_eq!(samples[0].value, 1000.0);
        assert_eq!(samples[1].metric, "gorouter.total_routes");
        assert_eq!(samples[1].metric_type, MetricType::Gauge);
        assert_eq!(samples[1].dimension("host"), Some("10.0.0.1"));
        assert_eq!(samples[1].dimension("job"), Some("router"));
    }

    #[tokio::test]
    async fn test_all_absent_logs_once() {
        log::set_logger(&LOGGER).ok();
        log::set_max_level(LevelFilter::Trace);

        let conn = MemoryConnection::new("memory");
        let source = router_source(&conn, "77");
        for attribute in source.attribute_names() {
            conn.set_value(source.name(), attribute, None).unwrap();
        }

        let samples = collect(&source, &conn).await.unwrap();
        assert!(samples.is_empty());
        assert_eq!(captured_warnings_mentioning("ip=10.0.0.77,"), 1);
    }

    #[tokio::test]
    async fn test_no_values_returned_yields_nothing() {
        let conn = MemoryConnection::new("memory");
        let source = router_source(&conn, "2");

        assert!(collect(&source, &conn).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_failure_is_collection_error() {
        let conn = MemoryConnection::new("memory");
        let source = router_source(&conn, "3");
        conn.fail_reads_for(source.name()).unwrap();

        let err = collect(&source, &conn).await.unwrap_err();
        assert!(matches!(err, AgentError::Collection(_)));
    }

    #[tokio::test]
    async fn test_catalog_inconsistency() {
        // A connection that answers with an attribute nobody asked for.
        struct Chatty(MemoryConnection);

        #[async_trait::async_trait]
        impl ManagementConnection for Chatty {
            async fn query_names(
                &self,
                pattern: &crate::entity::ObjectNamePattern,
            ) -> Result<Vec<ObjectName>> {
                self.0.query_names(pattern).await
            }

            async fn get_attributes(
                &self,
                _name: &ObjectName,
                _attributes: &[String],
            ) -> Result<Vec<crate::connection::AttributeValue>> {
                Ok(vec![crate::connection::AttributeValue::new("unexpected", Some(1.0))])
            }

            async fn get_descriptor(
                &self,
                name: &ObjectName,
            ) -> Result<crate::connection::Descriptor> {
                self.0.get_descriptor(name).await
            }

            async fn close(&self) -> Result<()> {
                self.0.close().await
            }

            fn target(&self) -> &str {
                self.0.target()
            }
        }

        let conn = Chatty(MemoryConnection::new("memory"));
        let source = router_source(&conn.0, "4");

        let err = collect(&source, &conn).await.unwrap_err();
        assert!(matches!(err, AgentError::CatalogInconsistency { .. }));
    }

    #[tokio::test]
    async fn test_collect_all_merges() {
        let conn = Arc::new(MemoryConnection::new("memory"));
        let sources: Vec<MetricSource> = (1..=5)
            .map(|i| {
                let source = router_source(&conn, &i.to_string());
                conn.set_value(source.name(), "opentsdb.nozzle.gorouter.total_routes", Some(i as f64))
                    .unwrap();
                source
            })
            .collect();

        let samples = collect_all(&sources, conn.clone(), 2).await.unwrap();
        assert_eq!(samples.len(), 5);

        let by_host: BTreeMap<&str, f64> = samples
            .iter()
            .map(|s| (s.dimension("host").unwrap(), s.value))
            .collect();
        assert_eq!(by_host.get("10.0.0.3"), Some(&3.0));
        assert_eq!(conn.read_count(), 5);
    }

    #[tokio::test]
    async fn test_collect_all_is_all_or_nothing() {
        let conn = Arc::new(MemoryConnection::new("memory"));
        let good = router_source(&conn, "1");
        conn.set_value(good.name(), "opentsdb.nozzle.gorouter.total_routes", Some(1.0))
            .unwrap();
        let bad = router_source(&conn, "2");
        conn.fail_reads_for(bad.name()).unwrap();

        let result = collect_all(&[good, bad], conn, 4).await;
        assert!(matches!(result, Err(AgentError::Collection(_))));
    }

    #[tokio::test]
    async fn test_collect_all_empty() {
        let conn = Arc::new(MemoryConnection::new("memory"));
        assert!(collect_all(&[], conn, 4).await.unwrap().is_empty());
    }
}
