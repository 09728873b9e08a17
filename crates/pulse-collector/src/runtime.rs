//! Process-level sampler.
//!
//! The historical implementation discovered its fields reflectively; here the
//! collected set is an explicit list so the emitted names are auditable.
//! On Linux the values come from procfs via `sysinfo`; unavailable fields
//! read as zero rather than dropping the batch.

use crate::Sampler;
use pulse_common::types::Metric;
use rand::Rng;
use sysinfo::{get_current_pid, Pid, Process, ProcessesToUpdate, System};

/// Gauges read from the current process, in emission order.
const PROCESS_GAUGES: &[(&str, fn(&Process) -> f64)] = &[
    ("ResidentMemory", |p| p.memory() as f64),
    ("VirtualMemory", |p| p.virtual_memory() as f64),
    ("CpuUsagePercent", |p| f64::from(p.cpu_usage())),
    ("RunTimeSeconds", |p| p.run_time() as f64),
    ("StartTimeSeconds", |p| p.start_time() as f64),
];

pub struct RuntimeSampler {
    system: System,
    pid: Option<Pid>,
    poll_count: i64,
}

impl RuntimeSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: get_current_pid().ok(),
            poll_count: 0,
        }
    }
}

impl Default for RuntimeSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for RuntimeSampler {
    fn name(&self) -> &str {
        "runtime"
    }

    fn sample(&mut self) -> Vec<Metric> {
        // Incremented before emission: the very first batch already reports 1.
        self.poll_count += 1;

        let mut batch = Vec::with_capacity(PROCESS_GAUGES.len() + 2);
        if let Some(pid) = self.pid {
            self.system
                .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            if let Some(process) = self.system.process(pid) {
                for (name, read) in PROCESS_GAUGES {
                    batch.push(Metric::gauge(*name, read(process)));
                }
            }
        }

        batch.push(Metric::counter("PollCount", self.poll_count));
        batch.push(Metric::gauge("RandomValue", rand::thread_rng().gen::<f64>()));
        batch
    }
}
