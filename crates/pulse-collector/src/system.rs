//! Host-level sampler: total/free memory in bytes and the schedulable CPU
//! count.

use crate::Sampler;
use pulse_common::types::Metric;
use sysinfo::System;

pub struct SystemSampler {
    system: System,
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        Self { system }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for SystemSampler {
    fn name(&self) -> &str {
        "system"
    }

    fn sample(&mut self) -> Vec<Metric> {
        self.system.refresh_memory();
        self.system.refresh_cpu_all();

        vec![
            Metric::gauge("TotalMemory", self.system.total_memory() as f64),
            Metric::gauge("FreeMemory", self.system.free_memory() as f64),
            Metric::gauge("CPUutilization1", self.system.cpus().len() as f64),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_common::types::MetricValue;

    #[test]
    fn emits_expected_gauges() {
        let mut sampler = SystemSampler::new();
        let batch = sampler.sample();
        let ids: Vec<&str> = batch.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["TotalMemory", "FreeMemory", "CPUutilization1"]);
        assert!(batch
            .iter()
            .all(|m| matches!(m.value, MetricValue::Gauge(_))));
    }

    #[test]
    fn cpu_count_is_positive() {
        let mut sampler = SystemSampler::new();
        let batch = sampler.sample();
        match batch[2].value {
            MetricValue::Gauge(v) => assert!(v >= 1.0),
            MetricValue::Counter(_) => panic!("CPUutilization1 must be a gauge"),
        }
    }
}
