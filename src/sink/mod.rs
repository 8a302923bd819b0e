//! Destinations for collected sample batches

use async_trait::async_trait;

use crate::collector::SampleBatch;

pub mod channel;
#[cfg(feature = "signalfx")]
pub mod signalfx;

pub use channel::ChannelSink;
#[cfg(feature = "signalfx")]
pub use signalfx::{SignalFxConfig, SignalFxSink};

/// Receives one batch per successful collection cycle
///
/// Delivery is fire-and-forget from the runner's point of view: a sink
/// reports its own failures and never stalls or fails the cycle.
#[async_trait]
pub trait SampleSink: Send + Sync + 'static {
    /// Hand over a batch
    async fn send(&self, batch: SampleBatch);

    /// Wait, within the sink's own bound, for deliveries still in flight
    ///
    /// Called once after the runner has stopped.
    async fn shutdown(&self) {}

    /// Get a name for this sink
    fn name(&self) -> &str;
}
