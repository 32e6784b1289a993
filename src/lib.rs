pub mod actors;
pub mod api;
pub mod broadcaster;
pub mod config;
pub mod monitors;
pub mod probes;
pub mod storage;
pub mod util;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a configured monitor
pub type MonitorId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorKind {
    Ping,
    Bandwidth,
    /// The shared event log widget. Never probed.
    Events,
}

impl fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorKind::Ping => write!(f, "ping"),
            MonitorKind::Bandwidth => write!(f, "bandwidth"),
            MonitorKind::Events => write!(f, "events"),
        }
    }
}

/// Kind-specific result of a single probe execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadingPayload {
    Ping {
        latency_ms: Option<f64>,
        packet_loss: bool,
        threshold_exceeded: bool,
    },
    Bandwidth {
        in_bps: u64,
        out_bps: u64,
    },
}

impl ReadingPayload {
    /// A successful echo reply. Latency is rounded to two decimals.
    pub fn ping_reply(latency_ms: f64, threshold_ms: f64) -> Self {
        let latency_ms = (latency_ms * 100.0).round() / 100.0;
        ReadingPayload::Ping {
            latency_ms: Some(latency_ms),
            packet_loss: false,
            threshold_exceeded: latency_ms > threshold_ms,
        }
    }

    pub fn ping_loss() -> Self {
        ReadingPayload::Ping {
            latency_ms: None,
            packet_loss: true,
            threshold_exceeded: false,
        }
    }

    pub fn bandwidth(in_bps: u64, out_bps: u64) -> Self {
        ReadingPayload::Bandwidth { in_bps, out_bps }
    }

    pub fn kind(&self) -> MonitorKind {
        match self {
            ReadingPayload::Ping { .. } => MonitorKind::Ping,
            ReadingPayload::Bandwidth { .. } => MonitorKind::Bandwidth,
        }
    }
}

/// One measurement of one monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub monitor_id: MonitorId,
    pub monitor_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: ReadingPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Threshold,
    PacketLoss,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Threshold => "threshold",
            EventType::PacketLoss => "packet_loss",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "threshold" => Ok(EventType::Threshold),
            "packet_loss" => Ok(EventType::PacketLoss),
            other => Err(format!("unknown event type '{other}'")),
        }
    }
}

/// A detected anomaly
///
/// `id` is assigned by the event store. Events pushed to live subscribers are
/// published before persistence completes and therefore carry no id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Option<i64>,
    pub monitor_id: MonitorId,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    /// Raw measured value (latency in ms, or throughput in Mbps)
    pub value: Option<f64>,
    pub threshold: Option<f64>,
}

/// A monitor stopped by its runner after repeated executor crashes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorFault {
    pub monitor_id: MonitorId,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
}

/// Everything a live viewer can receive
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedItem {
    Status {
        status: ConnectionStatus,
    },
    Reading(Reading),
    Event(Event),
    /// A probe attempt that produced no reading (e.g. SNMP counters unreachable)
    ProbeFailure {
        monitor_id: MonitorId,
        timestamp: DateTime<Utc>,
        message: String,
    },
    Fault(MonitorFault),
}

impl FeedItem {
    pub fn monitor_id(&self) -> Option<MonitorId> {
        match self {
            FeedItem::Status { .. } => None,
            FeedItem::Reading(reading) => Some(reading.monitor_id),
            FeedItem::Event(event) => Some(event.monitor_id),
            FeedItem::ProbeFailure { monitor_id, .. } => Some(*monitor_id),
            FeedItem::Fault(fault) => Some(fault.monitor_id),
        }
    }
}
