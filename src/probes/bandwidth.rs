use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{instrument, trace};

use super::snmp::{IF_HC_IN_OCTETS, IF_HC_OUT_OCTETS, Oid, SnmpClient, SnmpError};
use super::{Probe, ProbeError};
use crate::ReadingPayload;
use crate::config::DeviceRef;

/// Cumulative octet counters of one interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSample {
    pub in_octets: u64,
    pub out_octets: u64,
}

/// Anything able to read the cumulative octet counters of an interface
#[async_trait]
pub trait CounterSource: Send + Sync {
    async fn read_counters(&self) -> Result<CounterSample, ProbeError>;
}

/// Octets transferred between two counter readings, tolerating one wrap
pub fn octets_delta(before: u64, after: u64) -> u64 {
    after.wrapping_sub(before)
}

/// Bits per second between two counter readings taken `elapsed` apart
pub fn rate_bps(before: u64, after: u64, elapsed: Duration) -> u64 {
    let micros = elapsed.as_micros();
    if micros == 0 {
        return 0;
    }
    let bits = u128::from(octets_delta(before, after)) * 8;
    u64::try_from(bits * 1_000_000 / micros).unwrap_or(u64::MAX)
}

/// Measures interface throughput from two counter samples a short window apart
#[derive(Debug)]
pub struct BandwidthProbe<S> {
    source: S,
    window: Duration,
}

impl<S: CounterSource> BandwidthProbe<S> {
    pub fn new(source: S, window: Duration) -> Self {
        Self { source, window }
    }
}

#[async_trait]
impl<S: CounterSource> Probe for BandwidthProbe<S> {
    #[instrument(skip(self))]
    async fn measure(&mut self) -> Result<ReadingPayload, ProbeError> {
        let first = self.source.read_counters().await?;
        let started = Instant::now();
        tokio::time::sleep(self.window).await;
        let second = self.source.read_counters().await?;
        let elapsed = started.elapsed();

        let in_bps = rate_bps(first.in_octets, second.in_octets, elapsed);
        let out_bps = rate_bps(first.out_octets, second.out_octets, elapsed);
        trace!("in {in_bps} bps, out {out_bps} bps over {elapsed:?}");

        Ok(ReadingPayload::bandwidth(in_bps, out_bps))
    }
}

/// IF-MIB high capacity octet counters read over SNMPv2c
#[derive(Debug)]
pub struct SnmpCounterSource {
    client: SnmpClient,
    in_octets: Oid,
    out_octets: Oid,
}

impl SnmpCounterSource {
    pub fn new(device: &DeviceRef, if_index: u32) -> Self {
        let table_oid = |table: &str| {
            table
                .parse::<Oid>()
                .map(|oid| oid.child(if_index))
                .unwrap_or_else(|_| Oid::new(Vec::new()))
        };
        Self {
            client: SnmpClient::new(device.socket_addr(), &device.community),
            in_octets: table_oid(IF_HC_IN_OCTETS),
            out_octets: table_oid(IF_HC_OUT_OCTETS),
        }
    }
}

impl From<SnmpError> for ProbeError {
    fn from(err: SnmpError) -> Self {
        match err {
            SnmpError::Socket(_) => ProbeError::Fatal(err.to_string()),
            _ => ProbeError::Transient(err.to_string()),
        }
    }
}

#[async_trait]
impl CounterSource for SnmpCounterSource {
    async fn read_counters(&self) -> Result<CounterSample, ProbeError> {
        let varbinds = self
            .client
            .get(&[self.in_octets.clone(), self.out_octets.clone()])
            .await?;

        let counter = |oid: &Oid| {
            varbinds
                .iter()
                .find(|(candidate, _)| candidate == oid)
                .and_then(|(_, value)| value.as_u64())
                .ok_or_else(|| {
                    ProbeError::Transient(format!(
                        "{} returned no counter for {oid}",
                        self.client.target()
                    ))
                })
        };

        Ok(CounterSample {
            in_octets: counter(&self.in_octets)?,
            out_octets: counter(&self.out_octets)?,
        })
    }
}
