use async_trait::async_trait;
use log::warn;
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};

use super::SampleSink;
use crate::collector::SampleBatch;

/// Forwards batches into a bounded tokio channel
pub struct ChannelSink {
    tx: Sender<SampleBatch>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel
    pub fn new(buffer: usize) -> (Self, Receiver<SampleBatch>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }

    pub fn from_sender(tx: Sender<SampleBatch>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl SampleSink for ChannelSink {
    async fn send(&self, batch: SampleBatch) {
        match self.tx.try_send(batch) {
            Ok(()) => {}
            Err(TrySendError::Full(batch)) => {
                warn!("Sample channel full, dropping {} samples", batch.len());
            }
            Err(TrySendError::Closed(batch)) => {
                warn!("Sample channel closed, dropping {} samples", batch.len());
            }
        }
    }

    fn name(&self) -> &str {
        "channel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MetricType;
    use crate::collector::Sample;

    fn batch(values: &[f64]) -> SampleBatch {
        SampleBatch::new(
            values
                .iter()
                .map(|v| Sample {
                    metric: "gorouter.total_routes".to_string(),
                    metric_type: MetricType::Gauge,
                    value: *v,
                    dimensions: Vec::new(),
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_forwards_batches() {
        let (sink, mut rx) = ChannelSink::new(4);
        sink.send(batch(&[1.0, 2.0])).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received.samples[1].value, 2.0);
    }

    #[tokio::test]
    async fn test_full_channel_drops() {
        let (sink, mut rx) = ChannelSink::new(1);
        sink.send(batch(&[1.0])).await;
        sink.send(batch(&[2.0])).await;

        assert_eq!(rx.recv().await.unwrap().samples[0].value, 1.0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shares_an_existing_channel() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(2);
        let first = ChannelSink::from_sender(tx.clone());
        let second = ChannelSink::from_sender(tx);

        first.send(batch(&[1.0])).await;
        second.send(batch(&[2.0, 3.0])).await;

        assert_eq!(rx.recv().await.unwrap().len(), 1);
        assert_eq!(rx.recv().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_closed_channel_does_not_fail() {
        let (sink, rx) = ChannelSink::new(1);
        drop(rx);
        sink.send(batch(&[1.0])).await;
    }
}
