//! Metric samplers for the agent.
//!
//! A sampler produces a fresh batch of metrics on every call; [`spawn`] turns
//! it into an unbounded lazy sequence on a capacity-1 channel. The single
//! buffer slot means a slow reader delays sampling rather than queueing stale
//! batches — the reader always observes (at most one tick old) latest values.

pub mod runtime;
pub mod system;

use pulse_common::types::Metric;
use tokio::sync::mpsc;

pub trait Sampler: Send + 'static {
    fn name(&self) -> &str;
    fn sample(&mut self) -> Vec<Metric>;
}

/// Runs `sampler` on a background task, emitting one batch per channel slot.
/// The task stops when the receiver is dropped.
pub fn spawn(mut sampler: impl Sampler) -> mpsc::Receiver<Vec<Metric>> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        loop {
            let batch = sampler.sample();
            tracing::debug!(sampler = sampler.name(), count = batch.len(), "sampled");
            if tx.send(batch).await.is_err() {
                return;
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TickSampler {
        n: i64,
    }

    impl Sampler for TickSampler {
        fn name(&self) -> &str {
            "tick"
        }

        fn sample(&mut self) -> Vec<Metric> {
            self.n += 1;
            vec![Metric::counter("tick", self.n)]
        }
    }

    #[tokio::test]
    async fn spawned_sampler_emits_fresh_batches() {
        let mut rx = spawn(TickSampler { n: 0 });
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first[0], Metric::counter("tick", 1));
        assert_eq!(second[0], Metric::counter("tick", 2));
    }

    #[tokio::test]
    async fn dropping_receiver_stops_sampler() {
        let rx = spawn(TickSampler { n: 0 });
        drop(rx);
        // The task notices the closed channel on its next send and exits;
        // nothing to assert beyond not hanging.
        tokio::task::yield_now().await;
    }
}
