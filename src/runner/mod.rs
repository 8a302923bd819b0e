//! The scheduler loop
//!
//! A [`Runner`] owns the connection lifecycle and drives discovery and
//! collection through the states in [`state`]. Every failure inside the loop
//! becomes a state transition plus a log line, nothing escapes [`Runner::run`].
//! Stopping is done through a cloneable [`RunnerHandle`].

mod state;

use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

use crate::catalog::Catalog;
use crate::collector::{SampleBatch, collect_all, discover};
use crate::connection::{Connector, ManagementConnection};
use crate::entity::MetricSource;
use crate::error::{AgentError, Result};
use crate::sink::SampleSink;

pub use state::{Event, State, transition};

/// Timing and fan-out settings of the scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    /// Delay between two successful collection cycles
    pub collection_interval: Duration,
    /// Delay after a failed connect or a reset
    pub reconnect_delay: Duration,
    /// Age of the source list after which discovery runs again
    pub rediscovery_interval: Duration,
    /// Upper bound on concurrent source reads
    pub max_parallelism: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            collection_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(30),
            rediscovery_interval: Duration::from_secs(300),
            max_parallelism: 8,
        }
    }
}

impl RunnerConfig {
    pub fn builder() -> RunnerConfigBuilder {
        RunnerConfigBuilder::default()
    }
}

/// Builder for [`RunnerConfig`]
#[derive(Debug, Default)]
pub struct RunnerConfigBuilder {
    config: RunnerConfig,
}

impl RunnerConfigBuilder {
    pub fn collection_interval(mut self, interval: Duration) -> Self {
        self.config.collection_interval = interval;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay = delay;
        self
    }

    pub fn rediscovery_interval(mut self, interval: Duration) -> Self {
        self.config.rediscovery_interval = interval;
        self
    }

    pub fn max_parallelism(mut self, parallelism: usize) -> Self {
        self.config.max_parallelism = parallelism.max(1);
        self
    }

    pub fn build(self) -> RunnerConfig {
        self.config
    }
}

/// The connection handle shared between the loop and its stop handles
#[derive(Default)]
struct ConnectionSlot {
    inner: Mutex<Option<Arc<dyn ManagementConnection>>>,
}

impl ConnectionSlot {
    async fn current(&self) -> Option<Arc<dyn ManagementConnection>> {
        self.inner.lock().await.clone()
    }

    async fn store(&self, connection: Arc<dyn ManagementConnection>) {
        *self.inner.lock().await = Some(connection);
    }

    /// Close and drop the handle if one is held
    ///
    /// The lock is held across the close so a concurrent release observes
    /// an empty slot.
    async fn release(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(connection) = guard.take() {
            debug!("Releasing connection to {}", connection.target());
            if let Err(e) = connection.close().await {
                warn!("Error closing connection to {}: {}", connection.target(), e);
            }
        }
    }
}

/// Stops a running [`Runner`] from another task
#[derive(Clone)]
pub struct RunnerHandle {
    shutdown: CancellationToken,
    connection: Arc<ConnectionSlot>,
}

impl RunnerHandle {
    /// Interrupt any pending wait and release the connection
    pub async fn stop(&self) {
        info!("Stopping runner.");
        self.shutdown.cancel();
        self.connection.release().await;
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Drives connect, discover, collect and reset
pub struct Runner {
    connector: Arc<dyn Connector>,
    sink: Arc<dyn SampleSink>,
    catalog: Arc<Catalog>,
    config: RunnerConfig,
    shutdown: CancellationToken,
    connection: Arc<ConnectionSlot>,
    sources: Vec<MetricSource>,
    last_discovery: Option<Instant>,
    state: State,
}

impl Runner {
    pub fn new(
        connector: Arc<dyn Connector>,
        sink: Arc<dyn SampleSink>,
        catalog: Arc<Catalog>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            connector,
            sink,
            catalog,
            config,
            shutdown: CancellationToken::new(),
            connection: Arc::new(ConnectionSlot::default()),
            sources: Vec::new(),
            last_discovery: None,
            state: State::Disconnected,
        }
    }

    pub fn handle(&self) -> RunnerHandle {
        RunnerHandle {
            shutdown: self.shutdown.clone(),
            connection: Arc::clone(&self.connection),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn sources(&self) -> &[MetricSource] {
        &self.sources
    }

    /// Run until stopped, then release the connection
    pub async fn run(&mut self) {
        info!(
            "Starting runner for {} sending to {}",
            self.connector.target(),
            self.sink.name()
        );

        while !self.shutdown.is_cancelled() {
            self.step().await;
        }

        self.connection.release().await;
        self.sink.shutdown().await;
        info!("Runner stopped.");
    }

    /// Do the work of the current state, move to the next one and wait
    /// whatever delay that transition calls for
    pub async fn step(&mut self) -> State {
        let event = self.advance().await;
        let next = transition(self.state, event);

        if next != self.state {
            debug!("{} -> {} on {:?}", self.state, next, event);
        }
        self.state = next;

        if let Some(delay) = self.delay_after(event) {
            self.pause(delay).await;
        }

        self.state
    }

    async fn advance(&mut self) -> Event {
        match self.state {
            State::Disconnected => match self.connect().await {
                Ok(()) => Event::Connected,
                Err(e) => {
                    error!("Unable to connect to {}: {}", self.connector.target(), e);
                    Event::ConnectFailed
                }
            },
            State::Discovering => match self.rediscover().await {
                Ok(()) => Event::Discovered,
                Err(e) => {
                    error!("Discovery failed, resetting connection: {}", e);
                    Event::DiscoveryFailed
                }
            },
            State::Collecting => {
                if self.needs_rediscovery() {
                    return Event::RediscoveryDue;
                }
                match self.collect_cycle().await {
                    Ok(()) => Event::Collected,
                    Err(e) => {
                        error!("Collection failed, resetting connection: {}", e);
                        Event::CollectionFailed
                    }
                }
            }
            State::Resetting => {
                self.connection.release().await;
                self.sources.clear();
                self.last_discovery = None;
                Event::Released
            }
        }
    }

    fn delay_after(&self, event: Event) -> Option<Duration> {
        match event {
            Event::ConnectFailed | Event::Released => {
                info!(
                    "Waiting {} seconds before reconnecting.",
                    self.config.reconnect_delay.as_secs()
                );
                Some(self.config.reconnect_delay)
            }
            Event::Collected => Some(self.config.collection_interval),
            _ => None,
        }
    }

    /// Sleep unless stopped first
    async fn pause(&self, delay: Duration) {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => debug!("Wait interrupted by stop"),
            _ = sleep(delay) => {}
        }
    }

    async fn connect(&self) -> Result<()> {
        if self.connection.current().await.is_some() {
            return Ok(());
        }

        info!("Connecting to {}", self.connector.target());
        let connection = self.connector.connect().await?;
        self.connection.store(connection).await;
        info!("Connected to {}", self.connector.target());
        Ok(())
    }

    async fn active_connection(&self) -> Result<Arc<dyn ManagementConnection>> {
        self.connection
            .current()
            .await
            .ok_or_else(|| AgentError::Connection("No active connection".to_string()))
    }

    async fn rediscover(&mut self) -> Result<()> {
        let connection = self.active_connection().await?;
        self.sources = discover(connection.as_ref(), &self.catalog).await?;
        self.last_discovery = Some(Instant::now());
        Ok(())
    }

    fn needs_rediscovery(&self) -> bool {
        let Some(last) = self.last_discovery else {
            return true;
        };

        match Instant::now().checked_duration_since(last) {
            Some(elapsed) if elapsed >= self.config.rediscovery_interval => {
                info!(
                    "Initiating rediscover after {:.3} seconds.",
                    elapsed.as_secs_f64()
                );
                true
            }
            Some(_) => false,
            None => {
                warn!("Last discovery lies in the future, rediscovering.");
                true
            }
        }
    }

    async fn collect_cycle(&self) -> Result<()> {
        let started = Instant::now();
        let connection = self.active_connection().await?;

        let samples = collect_all(&self.sources, connection, self.config.max_parallelism).await?;
        let batch = SampleBatch::new(samples);
        debug!(
            "Collected {} samples from {} sources",
            batch.len(),
            self.sources.len()
        );
        self.sink.send(batch).await;

        info!("Sync took {:.3} seconds.", started.elapsed().as_secs_f64());
        Ok(())
    }
}
