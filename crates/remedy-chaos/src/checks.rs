//! Per-category recovery checks
//!
//! Each fault category has a check that answers "does the workload still
//! show this symptom?". The same check confirms an injection (symptom
//! present) and verifies a remediation (symptom gone).

use crate::cluster::{is_sidecar_name, ClusterApi, ExecOutput, PodInfo};
use crate::error::ClusterError;
use regex::Regex;
use remedy_core::{FailureCategory, TargetSelector};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const DISK_PROBE_FILE: &str = "/var/log/mysql/test-disk-write.tmp";
const DISK_PROBE_MB: f64 = 10.0;
const PING_FALLBACK_CONTAINER: &str = "sidecar-busybox";

/// Thresholds used by the checks
#[derive(Debug, Clone, PartialEq)]
pub struct CheckThresholds {
    /// Usage/limit ratio at or above which CPU counts as stressed
    pub cpu_ratio: f64,
    /// Usage/limit ratio at or above which memory counts as stressed
    pub memory_ratio: f64,
    /// Highest acceptable average round trip
    pub max_latency_ms: f64,
    /// Highest acceptable packet loss
    pub max_loss_percent: f64,
    /// Lowest acceptable direct-write throughput
    pub min_write_mb_per_sec: f64,
    /// Address pinged from inside the pods
    pub ping_target: String,
}

impl Default for CheckThresholds {
    fn default() -> Self {
        Self {
            cpu_ratio: 0.5,
            memory_ratio: 0.5,
            max_latency_ms: 1000.0,
            max_loss_percent: 0.0,
            min_write_mb_per_sec: 10.0,
            ping_target: "8.8.8.8".to_string(),
        }
    }
}

/// Answer of one check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckVerdict {
    /// The symptom is gone
    pub recovered: bool,
    /// What was observed
    pub detail: String,
}

impl CheckVerdict {
    fn recovered(detail: impl Into<String>) -> Self {
        Self {
            recovered: true,
            detail: detail.into(),
        }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self {
            recovered: false,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for CheckVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.recovered { "recovered" } else { "degraded" };
        write!(f, "{state}: {}", self.detail)
    }
}

/// Parsed summary of a ping run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingStats {
    pub loss_percent: f64,
    pub avg_rtt_ms: Option<f64>,
}

/// Extract loss and average round trip from `ping` output
#[must_use]
pub fn parse_ping_output(output: &str) -> PingStats {
    let loss = Regex::new(r"([\d.]+)% packet loss").ok();
    let rtt = Regex::new(r"(?:rtt|round-trip) min/avg/max\S* = [\d.]+/([\d.]+)/").ok();

    let loss_percent = loss
        .and_then(|re| re.captures(output))
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(100.0);
    let avg_rtt_ms = rtt
        .and_then(|re| re.captures(output))
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok());
    PingStats {
        loss_percent,
        avg_rtt_ms,
    }
}

/// Extract the elapsed milliseconds printed last by the disk probe
#[must_use]
pub fn parse_write_duration_ms(output: &str) -> Option<u64> {
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.parse().ok())
}

/// Recovery checks over a cluster
#[derive(Clone)]
pub struct RecoveryChecks {
    cluster: Arc<dyn ClusterApi>,
    thresholds: CheckThresholds,
}

impl RecoveryChecks {
    /// Create checks with default thresholds
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self {
            cluster,
            thresholds: CheckThresholds::default(),
        }
    }

    /// With thresholds
    #[must_use]
    pub fn with_thresholds(mut self, thresholds: CheckThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Run the category's check once
    pub async fn evaluate(
        &self,
        category: FailureCategory,
        target: &TargetSelector,
    ) -> Result<CheckVerdict, ClusterError> {
        let selector = target.label_selector();
        let pods = self
            .cluster
            .list_pods(&target.namespace, Some(&selector))
            .await?;
        if pods.is_empty() {
            return Ok(CheckVerdict::degraded(format!("no pods match {selector}")));
        }

        match category {
            FailureCategory::PodFail => self.check_pods_serving(target, &pods).await,
            _ if pods.iter().any(|p| !p.is_serving()) => Ok(CheckVerdict::degraded(
                "some pods are not running and ready",
            )),
            FailureCategory::CpuStress => self.check_usage(target, &pods, Usage::Cpu).await,
            FailureCategory::MemoryStress => self.check_usage(target, &pods, Usage::Memory).await,
            FailureCategory::NetworkLoss | FailureCategory::NetworkDelay => {
                self.check_network(target, &pods).await
            }
            FailureCategory::DiskIo => self.check_disk(target, &pods).await,
            FailureCategory::PodConfigError => {
                let cpu = self.check_usage(target, &pods, Usage::Cpu).await?;
                if !cpu.recovered {
                    return Ok(cpu);
                }
                self.check_usage(target, &pods, Usage::Memory).await
            }
        }
    }

    /// Poll until the symptom is gone or `window` elapses
    ///
    /// Returns the last verdict. A zero window runs the check exactly once.
    pub async fn wait_recovered(
        &self,
        category: FailureCategory,
        target: &TargetSelector,
        window: Duration,
        interval: Duration,
    ) -> Result<CheckVerdict, ClusterError> {
        let deadline = Instant::now() + window;
        loop {
            let verdict = self.evaluate(category, target).await?;
            if verdict.recovered || Instant::now() + interval > deadline {
                return Ok(verdict);
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Poll until the symptom shows or `window` elapses
    ///
    /// Returns the verdict that confirmed the symptom, or `None` when the
    /// fault never took hold.
    pub async fn confirm_symptom(
        &self,
        category: FailureCategory,
        target: &TargetSelector,
        window: Duration,
        interval: Duration,
    ) -> Result<Option<CheckVerdict>, ClusterError> {
        let deadline = Instant::now() + window;
        loop {
            let verdict = self.evaluate(category, target).await?;
            if !verdict.recovered {
                return Ok(Some(verdict));
            }
            if Instant::now() + interval > deadline {
                return Ok(None);
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn check_pods_serving(
        &self,
        target: &TargetSelector,
        pods: &[PodInfo],
    ) -> Result<CheckVerdict, ClusterError> {
        let not_serving: Vec<&str> = pods
            .iter()
            .filter(|p| !p.is_serving())
            .map(|p| p.name.as_str())
            .collect();
        if !not_serving.is_empty() {
            return Ok(CheckVerdict::degraded(format!(
                "pods not ready: {}",
                not_serving.join(", ")
            )));
        }
        let sample = self
            .cluster
            .container_metrics(&target.namespace, Some(&target.label_selector()))
            .await?;
        if sample.has_data() {
            Ok(CheckVerdict::recovered("all pods ready and reporting metrics"))
        } else {
            Ok(CheckVerdict::degraded("pods ready but metrics unavailable"))
        }
    }

    async fn check_usage(
        &self,
        target: &TargetSelector,
        pods: &[PodInfo],
        usage: Usage,
    ) -> Result<CheckVerdict, ClusterError> {
        let sample = self
            .cluster
            .container_metrics(&target.namespace, Some(&target.label_selector()))
            .await?;
        if !sample.has_data() {
            return Ok(CheckVerdict::degraded("metrics unavailable"));
        }

        let threshold = match usage {
            Usage::Cpu => self.thresholds.cpu_ratio,
            Usage::Memory => self.thresholds.memory_ratio,
        };
        let mut worst: Option<(f64, String)> = None;
        for row in sample.usage() {
            if is_sidecar_name(&row.container) {
                continue;
            }
            let Some(container) = pods
                .iter()
                .find(|p| p.name == row.pod)
                .and_then(|p| p.container(&row.container))
            else {
                continue;
            };
            let (used, limit) = match usage {
                Usage::Cpu => (row.cpu_millicores, container.resources.limits.cpu_millicores()),
                Usage::Memory => (row.memory_bytes, container.resources.limits.memory_bytes()),
            };
            let Some(limit) = limit.filter(|l| *l > 0) else {
                tracing::debug!(pod = %row.pod, container = %row.container, "no limit declared");
                continue;
            };
            #[allow(clippy::cast_precision_loss)]
            let ratio = used as f64 / limit as f64;
            if ratio >= threshold && worst.as_ref().map_or(true, |(w, _)| ratio > *w) {
                worst = Some((ratio, format!("{}/{}", row.pod, row.container)));
            }
        }

        Ok(match worst {
            Some((ratio, at)) => CheckVerdict::degraded(format!(
                "{usage} usage of {at} at {:.0}% of limit",
                ratio * 100.0
            )),
            None => CheckVerdict::recovered(format!(
                "{usage} usage below {:.0}% of limit",
                threshold * 100.0
            )),
        })
    }

    async fn ping(&self, target: &TargetSelector, pod: &str) -> Result<ExecOutput, ClusterError> {
        let target_host = self.thresholds.ping_target.as_str();
        let command: Vec<String> = ["ping", "-c", "3", "-W", "2", target_host]
            .iter()
            .map(ToString::to_string)
            .collect();
        let out = self
            .cluster
            .exec(&target.namespace, pod, None, &command)
            .await?;
        let combined = out.combined();
        if combined.contains("executable file not found")
            || combined.contains("OCI runtime exec failed")
        {
            return self
                .cluster
                .exec(
                    &target.namespace,
                    pod,
                    Some(PING_FALLBACK_CONTAINER),
                    &command,
                )
                .await;
        }
        Ok(out)
    }

    async fn check_network(
        &self,
        target: &TargetSelector,
        pods: &[PodInfo],
    ) -> Result<CheckVerdict, ClusterError> {
        for pod in pods {
            let out = self.ping(target, &pod.name).await?;
            let stats = parse_ping_output(&out.stdout);
            if stats.loss_percent > self.thresholds.max_loss_percent {
                return Ok(CheckVerdict::degraded(format!(
                    "{} loses {:.0}% of packets",
                    pod.name, stats.loss_percent
                )));
            }
            match stats.avg_rtt_ms {
                Some(rtt) if rtt <= self.thresholds.max_latency_ms => {}
                Some(rtt) => {
                    return Ok(CheckVerdict::degraded(format!(
                        "{} average round trip {rtt:.1}ms",
                        pod.name
                    )))
                }
                None => {
                    return Ok(CheckVerdict::degraded(format!(
                        "{}: cannot read round trip from ping output",
                        pod.name
                    )))
                }
            }
        }
        Ok(CheckVerdict::recovered("no packet loss and latency within bounds"))
    }

    async fn check_disk(
        &self,
        target: &TargetSelector,
        pods: &[PodInfo],
    ) -> Result<CheckVerdict, ClusterError> {
        let script = format!(
            "start=$(date +%s%3N); \
             dd if=/dev/zero of={DISK_PROBE_FILE} bs=1M count=10 oflag=direct 2>&1; \
             end=$(date +%s%3N); echo $((end - start))"
        );
        let command = vec!["sh".to_string(), "-c".to_string(), script];
        let cleanup = vec!["rm".to_string(), "-f".to_string(), DISK_PROBE_FILE.to_string()];

        for pod in pods {
            let out = self
                .cluster
                .exec(&target.namespace, &pod.name, None, &command)
                .await?;
            let Some(ms) = parse_write_duration_ms(&out.stdout) else {
                return Ok(CheckVerdict::degraded(format!(
                    "{}: disk probe produced no timing",
                    pod.name
                )));
            };
            #[allow(clippy::cast_precision_loss)]
            let speed = DISK_PROBE_MB / (ms.max(1) as f64 / 1000.0);
            if speed < self.thresholds.min_write_mb_per_sec {
                return Ok(CheckVerdict::degraded(format!(
                    "{} writes at {speed:.2} MB/s",
                    pod.name
                )));
            }
            if let Err(e) = self
                .cluster
                .exec(&target.namespace, &pod.name, None, &cleanup)
                .await
            {
                tracing::debug!(pod = %pod.name, error = %e, "disk probe cleanup failed");
            }
        }
        Ok(CheckVerdict::recovered("disk write throughput within bounds"))
    }
}

impl fmt::Debug for RecoveryChecks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryChecks")
            .field("thresholds", &self.thresholds)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
enum Usage {
    Cpu,
    Memory,
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_linux_ping_summary() {
        let out = "3 packets transmitted, 3 received, 0% packet loss, time 2003ms\n\
                   rtt min/avg/max/mdev = 10.1/12.5/15.0/2.0 ms";
        let stats = parse_ping_output(out);
        assert_eq!(stats.loss_percent, 0.0);
        assert_eq!(stats.avg_rtt_ms, Some(12.5));
    }

    #[test]
    fn parses_busybox_ping_summary() {
        let out = "3 packets transmitted, 1 packets received, 66.6% packet loss\n\
                   round-trip min/avg/max = 2000.1/2010.3/2020.0 ms";
        let stats = parse_ping_output(out);
        assert!((stats.loss_percent - 66.6).abs() < f64::EPSILON);
        assert_eq!(stats.avg_rtt_ms, Some(2010.3));
    }

    #[test]
    fn missing_summary_counts_as_total_loss() {
        let stats = parse_ping_output("ping: bad address");
        assert_eq!(stats.loss_percent, 100.0);
        assert_eq!(stats.avg_rtt_ms, None);
    }

    #[test]
    fn write_duration_is_last_non_empty_line() {
        let out = "10+0 records in\n10+0 records out\n10485760 bytes copied\n420\n\n";
        assert_eq!(parse_write_duration_ms(out), Some(420));
        assert_eq!(parse_write_duration_ms("dd: permission denied"), None);
    }
}
