//! An agent that discovers Cloud Foundry management objects and forwards
//! their metrics to SignalFx

pub mod catalog;
pub mod collector;
pub mod config;
pub mod connection;
pub mod entity;
pub mod error;
pub mod retry;
pub mod runner;
pub mod sink;
pub mod util;

pub use util::logging::init as init_logging;

/// Re-export of commonly used types for convenience
pub mod prelude {
    pub use crate::catalog::{Catalog, MetricType};
    pub use crate::collector::{Sample, SampleBatch};
    pub use crate::connection::{Connector, ManagementConnection};
    pub use crate::entity::{MetricSource, ObjectName, ObjectNamePattern};
    pub use crate::error::{AgentError, Result};
    pub use crate::retry::{RetryPolicy, execute_with_retry};
    pub use crate::runner::{Runner, RunnerConfig, RunnerHandle, State};
    pub use crate::sink::SampleSink;
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
