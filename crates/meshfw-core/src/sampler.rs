//! Per-process resource sampling.
//!
//! The coordinator samples its own process on every tick; in legacy mode it
//! additionally polls sibling worker processes by pid. Both paths go
//! through the [`ResourceSampler`] trait so tests can inject deterministic
//! samples.

use meshfw_types::ResourceSample;
use std::time::Instant;
use sysinfo::{Pid, ProcessesToUpdate, System};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Source of resource samples for this process and for sibling pids.
pub trait ResourceSampler: Send {
    /// Sample the current process.
    fn sample_self(&mut self) -> ResourceSample;

    /// Sample the given sibling processes by pid (legacy polling mode).
    fn sample_pids(&mut self, pids: &[u32]) -> Vec<ResourceSample>;
}

/// sysinfo-backed sampler.
///
/// CPU percent for the own process uses delta accounting: the first sample
/// divides accumulated CPU time by process uptime, subsequent samples divide
/// CPU time deltas by the wall-clock delta since the previous sample. Every
/// result is rounded to 2 decimals.
pub struct SysinfoSampler {
    system: System,
    own_pid: Pid,
    last_cpu_ms: Option<u64>,
    last_sampled_at: Option<Instant>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            own_pid: Pid::from_u32(std::process::id()),
            last_cpu_ms: None,
            last_sampled_at: None,
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample_self(&mut self) -> ResourceSample {
        self.system.refresh_processes(ProcessesToUpdate::Some(&[self.own_pid]), true);

        let loadavg = load_average();
        let Some(process) = self.system.process(self.own_pid) else {
            return ResourceSample { memory_mb: 0.0, cpu_percent: 0.0, loadavg };
        };

        let memory_mb = process.memory() as f64 / BYTES_PER_MB;
        let cpu_ms = process.accumulated_cpu_time();
        let now = Instant::now();

        let cpu_percent = match (self.last_cpu_ms, self.last_sampled_at) {
            (Some(prev_cpu), Some(prev_at)) => {
                let wall_ms = now.duration_since(prev_at).as_millis() as f64;
                if wall_ms > 0.0 {
                    100.0 * cpu_ms.saturating_sub(prev_cpu) as f64 / wall_ms
                } else {
                    0.0
                }
            }
            _ => {
                let uptime_ms = process.run_time() as f64 * 1000.0;
                if uptime_ms > 0.0 { 100.0 * cpu_ms as f64 / uptime_ms } else { 0.0 }
            }
        };

        self.last_cpu_ms = Some(cpu_ms);
        self.last_sampled_at = Some(now);

        ResourceSample { memory_mb, cpu_percent: round2(cpu_percent), loadavg }
    }

    fn sample_pids(&mut self, pids: &[u32]) -> Vec<ResourceSample> {
        let targets: Vec<Pid> = pids.iter().copied().map(Pid::from_u32).collect();
        self.system.refresh_processes(ProcessesToUpdate::Some(&targets), true);

        let loadavg = load_average();
        pids.iter()
            .filter_map(|pid| self.system.process(Pid::from_u32(*pid)))
            .map(|process| ResourceSample {
                memory_mb: process.memory() as f64 / BYTES_PER_MB,
                // Percent since the previous refresh; settles after the
                // first polling interval.
                cpu_percent: round2(f64::from(process.cpu_usage())),
                loadavg,
            })
            .collect()
    }
}

fn load_average() -> [f64; 3] {
    let load = System::load_average();
    [load.one, load.five, load.fifteen]
}

/// Round to 2 decimal places.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
