use serde::{Deserialize, Serialize};

use crate::{MonitorKind, ReadingPayload};

/// Aggregates over all readings of one ping monitor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PingStats {
    total: u64,
    lost: u64,
    latency_sum: f64,
    replies: u64,
    max_ms: Option<f64>,
    last_ms: Option<f64>,
    /// Consecutive replies above the latency threshold
    streak: u64,
}

impl PingStats {
    fn update(&mut self, latency_ms: Option<f64>, packet_loss: bool, threshold_exceeded: bool) {
        self.total += 1;

        self.streak = if !packet_loss && threshold_exceeded {
            self.streak + 1
        } else {
            0
        };

        match latency_ms {
            Some(latency) if !packet_loss => {
                self.replies += 1;
                self.latency_sum += latency;
                self.last_ms = Some(latency);
                self.max_ms = Some(self.max_ms.map_or(latency, |max| max.max(latency)));
            }
            _ => {
                self.lost += 1;
                self.last_ms = None;
            }
        }
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot::Ping {
            total: self.total,
            lost: self.lost,
            loss_pct: if self.total == 0 {
                0.0
            } else {
                100.0 * self.lost as f64 / self.total as f64
            },
            avg_ms: (self.replies > 0).then(|| self.latency_sum / self.replies as f64),
            max_ms: self.max_ms,
            last_ms: self.last_ms,
            streak: self.streak,
        }
    }
}

/// Aggregates over all readings of one bandwidth monitor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BandwidthStats {
    samples: u64,
    max_in_mbps: f64,
    max_out_mbps: f64,
    last_in_bps: Option<u64>,
    last_out_bps: Option<u64>,
}

impl BandwidthStats {
    fn update(&mut self, in_bps: u64, out_bps: u64) {
        self.samples += 1;
        self.max_in_mbps = self.max_in_mbps.max(in_bps as f64 / 1_000_000.0);
        self.max_out_mbps = self.max_out_mbps.max(out_bps as f64 / 1_000_000.0);
        self.last_in_bps = Some(in_bps);
        self.last_out_bps = Some(out_bps);
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot::Bandwidth {
            samples: self.samples,
            max_in_mbps: self.max_in_mbps,
            max_out_mbps: self.max_out_mbps,
            last_in_bps: self.last_in_bps,
            last_out_bps: self.last_out_bps,
        }
    }
}

/// Point-in-time view of a monitor's rolling statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatsSnapshot {
    Ping {
        total: u64,
        lost: u64,
        loss_pct: f64,
        avg_ms: Option<f64>,
        max_ms: Option<f64>,
        last_ms: Option<f64>,
        streak: u64,
    },
    Bandwidth {
        samples: u64,
        max_in_mbps: f64,
        max_out_mbps: f64,
        last_in_bps: Option<u64>,
        last_out_bps: Option<u64>,
    },
    /// Monitors that do not produce readings
    Empty,
}

/// Rolling statistics owned by exactly one runner
#[derive(Debug, Clone, PartialEq)]
pub enum RollingStats {
    Ping(PingStats),
    Bandwidth(BandwidthStats),
    Empty,
}

impl RollingStats {
    pub fn for_kind(kind: MonitorKind) -> Self {
        match kind {
            MonitorKind::Ping => RollingStats::Ping(PingStats::default()),
            MonitorKind::Bandwidth => RollingStats::Bandwidth(BandwidthStats::default()),
            MonitorKind::Events => RollingStats::Empty,
        }
    }

    /// Folds one reading into the aggregates and returns the new snapshot.
    /// Readings of a different kind are ignored.
    pub fn update(&mut self, payload: &ReadingPayload) -> StatsSnapshot {
        match (&mut *self, payload) {
            (
                RollingStats::Ping(stats),
                ReadingPayload::Ping {
                    latency_ms,
                    packet_loss,
                    threshold_exceeded,
                },
            ) => stats.update(*latency_ms, *packet_loss, *threshold_exceeded),
            (RollingStats::Bandwidth(stats), ReadingPayload::Bandwidth { in_bps, out_bps }) => {
                stats.update(*in_bps, *out_bps)
            }
            _ => {}
        }
        self.snapshot()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        match self {
            RollingStats::Ping(stats) => stats.snapshot(),
            RollingStats::Bandwidth(stats) => stats.snapshot(),
            RollingStats::Empty => StatsSnapshot::Empty,
        }
    }
}
