use tracing::{debug, trace};

use crate::config::MonitorConfig;
use crate::{Event, EventType, MonitorId, MonitorKind, Reading, ReadingPayload};

/// Transition of a single anomaly condition between two readings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    Ok,
    Exceeding,
    StartsToExceed,
    BackToOk,
}

impl Evaluation {
    pub fn evaluate(condition: bool, was_active: bool) -> Evaluation {
        match (condition, was_active) {
            (false, false) => Evaluation::Ok,
            (false, true) => Evaluation::BackToOk,
            (true, false) => Evaluation::StartsToExceed,
            (true, true) => Evaluation::Exceeding,
        }
    }
}

/// One edge-triggered condition. Fires once per excursion and re-arms as
/// soon as the condition clears.
#[derive(Debug, Clone, Copy, Default)]
struct Edge {
    active: bool,
}

impl Edge {
    fn step(&mut self, condition: bool) -> Evaluation {
        let evaluation = Evaluation::evaluate(condition, self.active);
        self.active = condition;
        evaluation
    }
}

/// Turns a stream of readings of one monitor into anomaly events
#[derive(Debug)]
pub struct EventDetector {
    monitor_id: MonitorId,
    name: String,
    target: String,
    kind: MonitorKind,
    threshold: Option<f64>,
    threshold_edge: Edge,
    loss_edge: Edge,
}

impl EventDetector {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            monitor_id: config.id,
            name: config.name.clone(),
            target: config
                .target
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            kind: config.kind,
            threshold: config.threshold,
            threshold_edge: Edge::default(),
            loss_edge: Edge::default(),
        }
    }

    /// Feeds one reading, returning an event if an anomaly just started.
    pub fn evaluate(&mut self, reading: &Reading) -> Option<Event> {
        if reading.payload.kind() != self.kind {
            trace!("ignoring {} reading", reading.payload.kind());
            return None;
        }

        match reading.payload {
            ReadingPayload::Ping {
                latency_ms,
                packet_loss,
                threshold_exceeded,
            } => {
                let loss = self.loss_edge.step(packet_loss);
                let threshold = self.threshold_edge.step(threshold_exceeded && !packet_loss);

                if loss == Evaluation::StartsToExceed {
                    debug!("{}: packet loss detected", self.name);
                    return Some(self.event(
                        reading,
                        EventType::PacketLoss,
                        format!("[{}] Packet loss detected to {}", self.name, self.target),
                        None,
                    ));
                }

                if threshold == Evaluation::StartsToExceed {
                    let latency = latency_ms.unwrap_or_default();
                    let limit = self.threshold.unwrap_or_default();
                    debug!("{}: latency starts to exceed {limit}ms", self.name);
                    return Some(self.event(
                        reading,
                        EventType::Threshold,
                        format!(
                            "[{}] Latency {latency}ms exceeds threshold {limit}ms",
                            self.name
                        ),
                        Some(latency),
                    ));
                }

                None
            }
            ReadingPayload::Bandwidth { in_bps, out_bps } => {
                let limit = self.threshold?;
                let in_mbps = in_bps as f64 / 1_000_000.0;
                let out_mbps = out_bps as f64 / 1_000_000.0;

                let evaluation = self.threshold_edge.step(in_mbps > limit || out_mbps > limit);
                trace!(
                    "{}: in {in_mbps:.2} / out {out_mbps:.2} Mbps (max: {limit}) -> {evaluation:?}",
                    self.name
                );
                if evaluation != Evaluation::StartsToExceed {
                    return None;
                }

                debug!("{}: bandwidth starts to exceed {limit}Mbps", self.name);
                Some(self.event(
                    reading,
                    EventType::Threshold,
                    format!(
                        "[{}] Bandwidth exceeds {limit}Mbps (In: {in_mbps:.2}, Out: {out_mbps:.2})",
                        self.name
                    ),
                    Some(in_mbps.max(out_mbps)),
                ))
            }
        }
    }

    fn event(
        &self,
        reading: &Reading,
        event_type: EventType,
        message: String,
        value: Option<f64>,
    ) -> Event {
        Event {
            id: None,
            monitor_id: self.monitor_id,
            event_type,
            timestamp: reading.timestamp,
            message,
            value,
            threshold: match event_type {
                EventType::Threshold => self.threshold,
                EventType::PacketLoss => None,
            },
        }
    }
}
