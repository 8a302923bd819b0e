use log::debug;
use native_tls::{Certificate, TlsConnector};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{AgentError, Result};

/// Where the bridge certificate is loaded from
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CertificateSource {
    /// The configured value is the PEM text itself
    Inline,
    /// The configured value is a path to a PEM file
    File,
}

/// Load the PEM text of the configured certificate
pub fn load_certificate_pem(source: CertificateSource, value: &str) -> Result<String> {
    match source {
        CertificateSource::Inline => Ok(value.to_string()),
        CertificateSource::File => read_pem_file(value),
    }
}

fn read_pem_file<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    debug!("Loading certificate from {}", path.display());
    fs::read_to_string(path).map_err(|e| {
        AgentError::Tls(format!(
            "Failed to read certificate file {}: {}",
            path.display(),
            e
        ))
    })
}

/// Build a TLS connector trusting the system roots plus one extra certificate
pub fn build_tls_connector(pem: &str) -> Result<TlsConnector> {
    let certificate = Certificate::from_pem(pem.as_bytes())
        .map_err(|e| AgentError::Tls(format!("Invalid certificate format: {}", e)))?;

    TlsConnector::builder()
        .add_root_certificate(certificate)
        .build()
        .map_err(|e| AgentError::Tls(format!("Failed to build TLS connector: {}", e)))
}
