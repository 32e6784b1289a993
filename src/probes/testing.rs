use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{Probe, ProbeError, ProbeFactory};
use crate::ReadingPayload;
use crate::config::{ConfigError, MonitorConfig};

#[derive(Debug, Clone)]
pub enum Step {
    Reply(ReadingPayload),
    Fail(ProbeError),
    Panic,
    Hang,
}

/// Plays back a fixed list of outcomes, then repeats `fallback` forever
#[derive(Debug)]
pub struct ScriptedProbe {
    steps: VecDeque<Step>,
    fallback: Step,
}

impl ScriptedProbe {
    pub fn new(steps: Vec<Step>, fallback: Step) -> Self {
        Self {
            steps: steps.into(),
            fallback,
        }
    }

    pub fn latencies(latencies: &[f64], threshold: f64) -> Self {
        let steps = latencies
            .iter()
            .map(|latency| Step::Reply(ReadingPayload::ping_reply(*latency, threshold)))
            .collect();
        Self::new(steps, Step::Reply(ReadingPayload::ping_reply(1.0, threshold)))
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn measure(&mut self) -> Result<ReadingPayload, ProbeError> {
        let step = self.steps.pop_front().unwrap_or_else(|| self.fallback.clone());
        match step {
            Step::Reply(payload) => Ok(payload),
            Step::Fail(err) => Err(err),
            Step::Panic => panic!("scripted probe panic"),
            Step::Hang => std::future::pending().await,
        }
    }
}

/// Hands out scripted probes and records every build
#[derive(Clone, Default)]
pub struct ScriptedFactory {
    scripts: Arc<Mutex<Vec<(i64, Vec<Step>, Step)>>>,
    pub builds: Arc<Mutex<Vec<i64>>>,
}

impl ScriptedFactory {
    pub fn script(&self, monitor_id: i64, steps: Vec<Step>, fallback: Step) {
        self.scripts
            .lock()
            .unwrap()
            .push((monitor_id, steps, fallback));
    }

    pub fn builds_of(&self, monitor_id: i64) -> usize {
        self.builds
            .lock()
            .unwrap()
            .iter()
            .filter(|id| **id == monitor_id)
            .count()
    }
}

impl ProbeFactory for ScriptedFactory {
    fn build(&self, config: &MonitorConfig) -> Result<Box<dyn Probe>, ConfigError> {
        self.builds.lock().unwrap().push(config.id);
        let scripts = self.scripts.lock().unwrap();
        let probe = match scripts.iter().find(|(id, _, _)| *id == config.id) {
            Some((_, steps, fallback)) => ScriptedProbe::new(steps.clone(), fallback.clone()),
            None => ScriptedProbe::latencies(&[], config.latency_threshold_ms()),
        };
        Ok(Box::new(probe))
    }
}
