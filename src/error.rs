// src/error.rs
use std::io;
use thiserror::Error;

/// Result type used throughout the agent library
pub type Result<T, E = AgentError> = std::result::Result<T, E>;

/// Error type for the agent library
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Collection error: {0}")]
    Collection(String),

    #[error("No metric type for attribute {attribute} on {source_name}")]
    CatalogInconsistency {
        source_name: String,
        attribute: String,
    },

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Entity error: {0}")]
    Entity(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Retry error: {context} failed after {attempts} attempts: {reason}")]
    Retry {
        context: String,
        attempts: usize,
        reason: String,
    },

    #[error("Other error: {0}")]
    Other(String),
}

impl AgentError {
    /// Build a retry error from the last failure of an operation
    pub fn retry(context: &str, attempts: usize, err: impl std::fmt::Display) -> Self {
        AgentError::Retry {
            context: context.to_string(),
            attempts,
            reason: err.to_string(),
        }
    }
}
