//! Core sample types
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::MetricType;
use crate::entity::MetricSource;

/// Prefix removed from attribute names before they become metric names
pub const DISPLAY_PREFIX: &str = "opentsdb.nozzle.";

/// Value of the `metric_source` dimension on every sample
pub const METRIC_SOURCE: &str = "cloudfoundry";

/// Strip one leading display prefix from an attribute name
pub fn metric_name(attribute: &str) -> &str {
    attribute.strip_prefix(DISPLAY_PREFIX).unwrap_or(attribute)
}

/// One typed, dimensioned metric value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub metric: String,
    pub metric_type: MetricType,
    pub value: f64,
    pub dimensions: Vec<(String, String)>,
}

impl Sample {
    /// Build a sample for an attribute of a source, with the standard dimensions
    pub fn for_source(
        source: &MetricSource,
        attribute: &str,
        metric_type: MetricType,
        value: f64,
    ) -> Self {
        let mut dimensions = vec![
            ("job".to_string(), source.kind().to_string()),
            ("metric_source".to_string(), METRIC_SOURCE.to_string()),
        ];
        if let Some(host) = source.host() {
            dimensions.push(("host".to_string(), host.to_string()));
        }

        Self {
            metric: metric_name(attribute).to_string(),
            metric_type,
            value,
            dimensions,
        }
    }

    /// Look up a dimension value
    pub fn dimension(&self, key: &str) -> Option<&str> {
        self.dimensions
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// All samples of one collection cycle
#[derive(Debug, Clone, Serialize)]
pub struct SampleBatch {
    /// The samples in this batch
    pub samples: Vec<Sample>,
    /// When this batch was handed to the sink
    pub timestamp: DateTime<Utc>,
}

impl SampleBatch {
    /// Create a batch stamped with the current time
    pub fn new(samples: Vec<Sample>) -> Self {
        Self {
            samples,
            timestamp: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    #[test]
    fn test_metric_name_strips_prefix_once() {
        assert_eq!(metric_name("opentsdb.nozzle.gorouter.responses"), "gorouter.responses");
        assert_eq!(
            metric_name("opentsdb.nozzle.opentsdb.nozzle.x"),
            "opentsdb.nozzle.x"
        );
        assert_eq!(metric_name("system.cpu.user"), "system.cpu.user");
        assert_eq!(metric_name("x.opentsdb.nozzle.y"), "x.opentsdb.nozzle.y");
    }

    #[test]
    fn test_sample_dimensions() {
        let catalog = Catalog::cloudfoundry();
        let name = "d:job=router".parse().unwrap();
        let with_host = MetricSource::new(
            name,
            Some("10.0.0.3".to_string()),
            "router",
            catalog.for_kind("router").unwrap().clone(),
        )
        .unwrap();

        let sample = Sample::for_source(
            &with_host,
            "opentsdb.nozzle.gorouter.total_routes",
            MetricType::Gauge,
            12.0,
        );
        assert_eq!(sample.metric, "gorouter.total_routes");
        assert_eq!(sample.dimension("job"), Some("router"));
        assert_eq!(sample.dimension("metric_source"), Some("cloudfoundry"));
        assert_eq!(sample.dimension("host"), Some("10.0.0.3"));

        let name = "d:job=mysql".parse().unwrap();
        let without_host =
            MetricSource::new(name, None, "mysql", catalog.system().clone()).unwrap();
        let sample = Sample::for_source(&without_host, "system.healthy", MetricType::Gauge, 1.0);
        assert_eq!(sample.dimension("host"), None);
        assert_eq!(sample.dimensions.len(), 2);
    }
}
