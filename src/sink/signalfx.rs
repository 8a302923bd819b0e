//! SignalFx ingest sink
//!
//! Batches are encoded as a v2 datapoint body and POSTed to
//! `<ingest_url>/v2/datapoint`. Gauges and cumulative counters go into
//! separate arrays of the body; every datapoint carries the batch timestamp
//! in milliseconds.

use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::task::TaskTracker;

use super::SampleSink;
use crate::catalog::MetricType;
use crate::collector::{Sample, SampleBatch};
use crate::error::{AgentError, Result};
use crate::retry::{RetryPolicy, execute_with_retry_if};

/// Default public ingest endpoint
pub const DEFAULT_INGEST_URL: &str = "https://ingest.signalfx.com";

/// Header carrying the access token
pub const TOKEN_HEADER: &str = "X-SF-Token";

/// Ingest endpoint, token and delivery policy
#[derive(Debug, Clone)]
pub struct SignalFxConfig {
    pub access_key: String,
    pub ingest_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// How long shutdown waits for posts still in flight
    pub drain_timeout: Duration,
}

impl SignalFxConfig {
    pub fn new(access_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            ingest_url: DEFAULT_INGEST_URL.to_string(),
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            drain_timeout: Duration::from_secs(5),
        }
    }

    pub fn ingest_url(mut self, url: impl Into<String>) -> Self {
        self.ingest_url = url.into();
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    fn datapoint_url(&self) -> String {
        format!("{}/v2/datapoint", self.ingest_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize, PartialEq)]
struct Datapoint<'a> {
    metric: &'a str,
    value: f64,
    dimensions: BTreeMap<&'a str, &'a str>,
    timestamp: i64,
}

#[derive(Debug, Default, Serialize)]
struct DatapointBody<'a> {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    gauge: Vec<Datapoint<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cumulative_counter: Vec<Datapoint<'a>>,
}

fn encode(batch: &SampleBatch) -> DatapointBody<'_> {
    let timestamp = batch.timestamp.timestamp_millis();
    let mut body = DatapointBody::default();

    for sample in &batch.samples {
        let point = datapoint(sample, timestamp);
        match sample.metric_type {
            MetricType::Gauge => body.gauge.push(point),
            MetricType::CumulativeCounter => body.cumulative_counter.push(point),
        }
    }

    body
}

fn datapoint(sample: &Sample, timestamp: i64) -> Datapoint<'_> {
    Datapoint {
        metric: &sample.metric,
        value: sample.value,
        dimensions: sample
            .dimensions
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect(),
        timestamp,
    }
}

#[derive(Debug, Error)]
enum PostError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("ingest answered {0}")]
    Status(StatusCode),
}

impl PostError {
    fn is_transient(&self) -> bool {
        match self {
            PostError::Transport(_) => true,
            PostError::Status(status) => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
        }
    }
}

/// Sends batches to SignalFx on a background task
#[derive(Clone)]
pub struct SignalFxSink {
    client: Client,
    config: Arc<SignalFxConfig>,
    in_flight: TaskTracker,
}

impl SignalFxSink {
    pub fn new(config: SignalFxConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AgentError::Sink(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: Arc::new(config),
            in_flight: TaskTracker::new(),
        })
    }

    /// POST one batch, retrying transient failures
    pub async fn deliver(&self, batch: &SampleBatch) -> Result<()> {
        let body = serde_json::to_vec(&encode(batch))
            .map_err(|e| AgentError::Sink(format!("Failed to encode datapoints: {}", e)))?;
        let body = body.as_slice();

        execute_with_retry_if(
            move || self.post(body),
            &self.config.retry,
            "Posting datapoints",
            PostError::is_transient,
        )
        .await?;

        debug!(
            "Posted {} datapoints to {}",
            batch.len(),
            self.config.ingest_url
        );
        Ok(())
    }

    async fn post(&self, body: &[u8]) -> std::result::Result<(), PostError> {
        let response = self
            .client
            .post(self.config.datapoint_url())
            .header(TOKEN_HEADER, &self.config.access_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            status => Err(PostError::Status(status)),
        }
    }
}

#[async_trait]
impl SampleSink for SignalFxSink {
    async fn send(&self, batch: SampleBatch) {
        if batch.is_empty() {
            debug!("Empty batch, nothing to post");
            return;
        }

        let sink = self.clone();
        self.in_flight.spawn(async move {
            if let Err(e) = sink.deliver(&batch).await {
                error!("Unable to POST metrics: {}", e);
            }
        });
    }

    async fn shutdown(&self) {
        self.in_flight.close();
        if self.in_flight.is_empty() {
            return;
        }

        info!("Waiting for {} pending datapoint posts", self.in_flight.len());
        let drained = tokio::time::timeout(self.config.drain_timeout, self.in_flight.wait()).await;
        if drained.is_err() {
            warn!(
                "Dropping {} datapoint posts still pending after {} seconds",
                self.in_flight.len(),
                self.config.drain_timeout.as_secs()
            );
        }
    }

    fn name(&self) -> &str {
        "signalfx"
    }
}
