mod collection;
mod core;
mod discovery;

// Re-export public items
pub use collection::{collect, collect_all};
pub use self::core::{DISPLAY_PREFIX, METRIC_SOURCE, Sample, SampleBatch, metric_name};
pub use discovery::{
    IpCache, PLATFORM_DEPLOYMENT, PLATFORM_PATTERN, SYSTEM_PATTERN, discover,
};
