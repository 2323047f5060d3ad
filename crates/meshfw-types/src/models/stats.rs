//! Per-process resource samples and the inter-worker stats message.

use serde::{Deserialize, Serialize};

/// One resource sample for a single worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    /// Resident set size, in megabytes.
    #[serde(rename = "memoryMB")]
    pub memory_mb: f64,
    /// CPU usage percentage, rounded to 2 decimals.
    #[serde(rename = "cpuPercent")]
    pub cpu_percent: f64,
    /// OS load average over 1, 5 and 15 minutes.
    pub loadavg: [f64; 3],
}

/// Message broadcast by every worker to all of its siblings on each
/// sampling tick. Full mesh: every worker both sends and receives these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsMessage {
    /// Message discriminator on the process channel.
    #[serde(rename = "type")]
    pub kind: String,
    /// Cluster worker id of the sender.
    #[serde(rename = "workerID")]
    pub worker_id: u32,
    /// OS process id of the sender.
    pub pid: u32,
    /// The sample itself.
    pub message: ResourceSample,
}

impl StatsMessage {
    /// Discriminator value for stats broadcasts.
    pub const KIND: &'static str = "mfw_stats";

    /// Build a stats broadcast for the given worker.
    pub fn new(worker_id: u32, pid: u32, sample: ResourceSample) -> Self {
        Self { kind: Self::KIND.to_string(), worker_id, pid, message: sample }
    }

    /// Whether this message is a recognized stats broadcast.
    pub fn is_stats(&self) -> bool {
        self.kind == Self::KIND
    }
}
