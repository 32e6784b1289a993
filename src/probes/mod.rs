//! Probe executors
//!
//! A probe performs one measurement against one target and either yields a
//! [`ReadingPayload`] or classifies why it could not. Probes are stateless
//! strategies selected by monitor kind through a [`ProbeFactory`].

pub mod bandwidth;
pub mod ping;
pub mod snmp;
#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::ReadingPayload;
use crate::config::{ConfigError, MonitorConfig, Target};

pub use bandwidth::{BandwidthProbe, CounterSample, CounterSource, SnmpCounterSource};
pub use ping::PingProbe;

/// Upper bound for a single echo request
pub const MAX_PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Distance between the two counter samples of a bandwidth measurement
pub const BANDWIDTH_SAMPLE_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    /// The target could not be measured this time (unreachable, timed out)
    #[error("probe unavailable: {0}")]
    Transient(String),

    /// The executor itself cannot operate
    #[error("probe crashed: {0}")]
    Fatal(String),
}

#[async_trait]
pub trait Probe: Send {
    /// Performs one measurement. Must be cancel-safe: dropping the future
    /// abandons the measurement without side effects.
    async fn measure(&mut self) -> Result<ReadingPayload, ProbeError>;
}

/// Selects a probe strategy for a monitor definition
pub trait ProbeFactory: Send + Sync {
    fn build(&self, config: &MonitorConfig) -> Result<Box<dyn Probe>, ConfigError>;
}

/// Builds the system ping and SNMP bandwidth probes
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultProbeFactory;

impl ProbeFactory for DefaultProbeFactory {
    fn build(&self, config: &MonitorConfig) -> Result<Box<dyn Probe>, ConfigError> {
        match &config.target {
            Some(Target::Host { address }) => Ok(Box::new(PingProbe::new(
                *address,
                config.latency_threshold_ms(),
                config.interval.min(MAX_PING_TIMEOUT),
            ))),
            Some(Target::Interface { device, if_index }) => {
                let source = SnmpCounterSource::new(device, *if_index);
                Ok(Box::new(BandwidthProbe::new(source, BANDWIDTH_SAMPLE_WINDOW)))
            }
            None => Err(ConfigError::Invalid {
                id: config.id,
                reason: format!("{} monitors are not probed", config.kind),
            }),
        }
    }
}
