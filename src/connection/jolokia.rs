//! Management interface reached through a Jolokia-style HTTP/JSON bridge
//!
//! Every operation is a single POST of a JSON request to the bridge URL.
//! The response envelope carries its own `status`; anything other than 200
//! is treated as a connection-level failure.

use async_trait::async_trait;
use log::{debug, info, warn};
use native_tls::TlsConnector;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{AttributeValue, Connector, Descriptor, ManagementConnection};
use crate::entity::{ObjectName, ObjectNamePattern};
use crate::error::{AgentError, Result};

/// Bridge endpoint and credentials
#[derive(Debug, Clone)]
pub struct JolokiaConfig {
    /// Full URL of the bridge endpoint, e.g. `https://10.0.0.5:8443/jolokia`
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Transport timeout for each request
    pub timeout: Duration,
}

impl JolokiaConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// Opens [`JolokiaConnection`]s
pub struct JolokiaConnector {
    config: JolokiaConfig,
    tls: Option<TlsConnector>,
}

impl JolokiaConnector {
    pub fn new(config: JolokiaConfig) -> Self {
        Self { config, tls: None }
    }

    /// Use a pre-configured TLS context for HTTPS bridges
    pub fn with_tls(mut self, tls: TlsConnector) -> Self {
        self.tls = Some(tls);
        self
    }

    fn build_client(&self) -> Result<Client> {
        let mut builder = Client::builder().timeout(self.config.timeout);
        if let Some(tls) = &self.tls {
            builder = builder.use_preconfigured_tls(tls.clone());
        }
        builder
            .build()
            .map_err(|e| AgentError::Connection(format!("Failed to create HTTP client: {}", e)))
    }
}

#[async_trait]
impl Connector for JolokiaConnector {
    async fn connect(&self) -> Result<Arc<dyn ManagementConnection>> {
        info!("Connecting to {}.", self.config.url);

        let connection = JolokiaConnection {
            client: self.build_client()?,
            config: self.config.clone(),
            closed: AtomicBool::new(false),
        };

        // The bridge is stateless, so a version request is what proves the
        // endpoint and credentials are usable.
        let version = connection.request(json!({ "type": "version" })).await?;
        debug!(
            "Connected to bridge agent version {}",
            version.get("agent").and_then(Value::as_str).unwrap_or("unknown")
        );

        Ok(Arc::new(connection))
    }

    fn target(&self) -> &str {
        &self.config.url
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    status: u16,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_type: Option<String>,
}

impl Envelope {
    /// The object was deregistered, the bridge itself is fine
    fn is_instance_not_found(&self) -> bool {
        self.status == 404
            || self
                .error_type
                .as_deref()
                .is_some_and(|t| t.ends_with("InstanceNotFoundException"))
    }
}

/// One authenticated session against the bridge
pub struct JolokiaConnection {
    client: Client,
    config: JolokiaConfig,
    closed: AtomicBool,
}

impl JolokiaConnection {
    async fn request(&self, body: Value) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AgentError::Connection(format!(
                "Connection to {} is closed",
                self.config.url
            )));
        }

        let mut request = self.client.post(&self.config.url).json(&body);
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_ref());
        }

        let response = request.send().await.map_err(|e| {
            AgentError::Connection(format!("Request to {} failed: {}", self.config.url, e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::Connection(format!(
                "Bridge returned HTTP {}: {}",
                status, text
            )));
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| AgentError::Connection(format!("Malformed bridge response: {}", e)))?;

        if envelope.is_instance_not_found() {
            return Err(AgentError::EntityNotFound(
                envelope.error.unwrap_or_else(|| "instance not found".to_string()),
            ));
        }

        if envelope.status != 200 {
            return Err(AgentError::Connection(format!(
                "Bridge request failed with status {} ({}): {}",
                envelope.status,
                envelope.error_type.as_deref().unwrap_or("unknown"),
                envelope.error.as_deref().unwrap_or("no message")
            )));
        }

        Ok(envelope.value)
    }
}

#[async_trait]
impl ManagementConnection for JolokiaConnection {
    async fn query_names(&self, pattern: &ObjectNamePattern) -> Result<Vec<ObjectName>> {
        let value = self
            .request(json!({ "type": "search", "mbean": pattern.as_str() }))
            .await?;

        let raw_names = value.as_array().ok_or_else(|| {
            AgentError::Connection(format!("Search for {} did not return a list", pattern))
        })?;

        let mut names = Vec::with_capacity(raw_names.len());
        for raw in raw_names {
            match raw.as_str().map(str::parse::<ObjectName>) {
                Some(Ok(name)) if pattern.matches(&name) => names.push(name),
                Some(Ok(name)) => debug!("Ignoring {} not selected by {}", name, pattern),
                Some(Err(e)) => warn!("Skipping malformed object name: {}", e),
                None => warn!("Skipping non-string object name {}", raw),
            }
        }

        Ok(names)
    }

    async fn get_attributes(
        &self,
        name: &ObjectName,
        attributes: &[String],
    ) -> Result<Vec<AttributeValue>> {
        let value = self
            .request(json!({
                "type": "read",
                "mbean": name.to_string(),
                "attribute": attributes,
                "config": { "ignoreErrors": true },
            }))
            .await?;

        let values = match &value {
            Value::Object(map) => attributes
                .iter()
                .map(|attribute| {
                    let value = map.get(attribute).and_then(numeric_value);
                    AttributeValue::new(attribute.clone(), value)
                })
                .collect(),
            // A single-attribute read may come back unwrapped
            other if attributes.len() == 1 => {
                vec![AttributeValue::new(attributes[0].clone(), numeric_value(other))]
            }
            other => {
                return Err(AgentError::Connection(format!(
                    "Unexpected read response for {}: {}",
                    name, other
                )));
            }
        };

        Ok(values)
    }

    async fn get_descriptor(&self, name: &ObjectName) -> Result<Descriptor> {
        let value = self
            .request(json!({ "type": "list", "path": list_path(name) }))
            .await?;

        let descriptor = value
            .get("descriptor")
            .and_then(Value::as_object)
            .map(|fields| {
                fields
                    .iter()
                    .map(|(key, value)| {
                        let text = match value {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (key.clone(), text)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(descriptor)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        debug!("Closed bridge session to {}", self.config.url);
        Ok(())
    }

    fn target(&self) -> &str {
        &self.config.url
    }
}

/// Numeric view of an attribute value; anything else counts as absent
fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Escape an object name for a `list` path (`!` and `/` are escaped with `!`)
fn list_path(name: &ObjectName) -> String {
    let escape = |s: &str| s.replace('!', "!!").replace('/', "!/");
    let properties = name
        .properties()
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",");
    format!("{}/{}", escape(name.domain()), escape(&properties))
}
