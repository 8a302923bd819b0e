use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;

use crate::config::LogLevel;
use crate::error::{AgentError, Result};

/// Crates whose debug output drowns the agent's own
const NOISY_DEPENDENCIES: &[&str] = &["hyper", "hyper_util", "reqwest", "native_tls"];

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Initialize the logging system
///
/// `RUST_LOG` directives, when set, are applied on top of `level`.
pub fn init(level: LogLevel) -> Result<()> {
    let filter = LevelFilter::from(level);

    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .filter(None, filter);

    for module in NOISY_DEPENDENCIES {
        builder.filter(Some(module), filter.min(LevelFilter::Warn));
    }

    if let Ok(directives) = std::env::var("RUST_LOG") {
        builder.parse_filters(&directives);
    }

    builder
        .try_init()
        .map_err(|e| AgentError::Other(format!("Logger already initialized: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        assert_eq!(LevelFilter::from(LogLevel::Warn), LevelFilter::Warn);
        assert_eq!(LevelFilter::from(LogLevel::Trace), LevelFilter::Trace);
        assert_eq!(LevelFilter::from(LogLevel::default()), LevelFilter::Info);
    }
}
