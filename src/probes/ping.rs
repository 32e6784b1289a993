use std::io::ErrorKind;
use std::net::IpAddr;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::{instrument, trace};

use super::{Probe, ProbeError};
use crate::ReadingPayload;

static RTT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time\s*[=<]\s*([0-9]+(?:\.[0-9]+)?)\s*ms").expect("RTT pattern is valid")
});

/// Extracts the round trip time of the first reply from ping's output
pub fn parse_rtt(output: &str) -> Option<f64> {
    RTT_PATTERN
        .captures(output)
        .and_then(|captures| captures.get(1))
        .and_then(|rtt| rtt.as_str().parse().ok())
}

/// ICMP echo through the system `ping` utility
///
/// Uses the setuid/capability-enabled binary so the process itself needs no
/// raw socket privileges.
#[derive(Debug, Clone)]
pub struct PingProbe {
    address: IpAddr,
    threshold_ms: f64,
    timeout: Duration,
}

impl PingProbe {
    pub fn new(address: IpAddr, threshold_ms: f64, timeout: Duration) -> Self {
        Self {
            address,
            threshold_ms,
            timeout,
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new("ping");
        if self.address.is_ipv6() {
            command.arg("-6");
        }
        command.args(["-n", "-c", "1"]);

        #[cfg(target_os = "macos")]
        command.arg("-W").arg(self.timeout.as_millis().max(1).to_string());
        #[cfg(not(target_os = "macos"))]
        command
            .arg("-W")
            .arg(self.timeout.as_secs().max(1).to_string());

        command
            .arg(self.address.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Probe for PingProbe {
    #[instrument(skip(self), fields(target = %self.address))]
    async fn measure(&mut self) -> Result<ReadingPayload, ProbeError> {
        // ping rounds its own deadline up to whole seconds
        let deadline = self.timeout + Duration::from_secs(1);

        let output = match tokio::time::timeout(deadline, self.command().output()).await {
            Err(_) => {
                trace!("no reply within {deadline:?}");
                return Ok(ReadingPayload::ping_loss());
            }
            Ok(Err(err)) if err.kind() == ErrorKind::NotFound => {
                return Err(ProbeError::Fatal("ping executable not found".to_string()));
            }
            Ok(Err(err)) => {
                return Err(ProbeError::Fatal(format!("failed to run ping: {err}")));
            }
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_rtt(&stdout) {
            Some(rtt) if output.status.success() => {
                trace!("reply in {rtt}ms");
                Ok(ReadingPayload::ping_reply(rtt, self.threshold_ms))
            }
            _ => {
                trace!("no reply (exit status {})", output.status);
                Ok(ReadingPayload::ping_loss())
            }
        }
    }
}
