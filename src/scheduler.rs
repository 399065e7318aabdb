//! Background period rollover driver.
//!
//! The core is purely reactive; this task is the external "period boundary
//! reached" signal. On each tick it starts a new period on the registry,
//! which resets every aggregator and records the new bounds.

use crate::core::Result;
use crate::metrics::{Period, Registry};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Periodically rolls the registry over to a new period.
pub struct PeriodScheduler {
    registry: Arc<Registry>,
    period: Arc<Period>,
}

/// Handle to a running scheduler task.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<u64>,
}

impl PeriodScheduler {
    /// Roll `registry` over every `period`
    pub fn new(registry: Arc<Registry>, period: Arc<Period>) -> Self {
        Self { registry, period }
    }

    /// Start the rollover loop on the current tokio runtime.
    ///
    /// The first period begins immediately; the first rollover fires one
    /// full period later.
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown, mut stop) = watch::channel(false);

        let task = tokio::spawn(async move {
            let length = self.period.duration();
            let mut rollovers = 0u64;

            if let Err(e) = self.registry.begin_period(length) {
                tracing::error!(error = %e, "failed to start initial period");
            }

            let mut ticker = interval_at(Instant::now() + length, length);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.registry.begin_period(length) {
                            Ok(reset) => {
                                rollovers += 1;
                                tracing::debug!(reset, period = %self.period, "period rollover");
                            },
                            Err(e) => {
                                tracing::error!(error = %e, category = e.category(), "period rollover failed");
                            },
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!(rollovers, "period scheduler stopped");
            rollovers
        });

        SchedulerHandle { shutdown, task }
    }
}

impl SchedulerHandle {
    /// Stop the loop and wait for it; returns completed rollovers
    pub async fn shutdown(self) -> Result<u64> {
        // Send only fails if the task already exited
        let _ = self.shutdown.send(true);
        Ok(self.task.await?)
    }

    /// Whether the task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{MemoryConfig, PeriodConfig, RawWindowConfig, RegistryConfig};
    use crate::core::MetricId;
    use crate::memory::NativeArena;
    use crate::metrics::PeriodNormalizer;
    use std::time::Duration;

    fn setup() -> (Arc<Registry>, Arc<Period>) {
        let arena = NativeArena::new(&MemoryConfig::default()).unwrap();
        let registry = Arc::new(
            Registry::new(&RegistryConfig::default(), &RawWindowConfig::default(), arena)
                .unwrap(),
        );
        let period = PeriodNormalizer::new(&PeriodConfig::default())
            .unwrap()
            .get_period(5)
            .unwrap();
        (registry, period)
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollover_resets_aggregators() {
        let (registry, period) = setup();
        let handle = PeriodScheduler::new(Arc::clone(&registry), period).spawn();
        tokio::task::yield_now().await;

        let bounds = registry.period_bounds();
        assert_eq!(bounds.end_millis - bounds.start_millis, 5_000);

        registry.process_value(MetricId(1), 10).unwrap();
        assert_eq!(registry.get(MetricId(1)).unwrap().count(), 1);

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(registry.get(MetricId(1)).unwrap().count(), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(handle.shutdown().await.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_first_tick() {
        let (registry, period) = setup();
        let handle = PeriodScheduler::new(registry, period).spawn();
        tokio::task::yield_now().await;

        assert!(!handle.is_finished());
        assert_eq!(handle.shutdown().await.unwrap(), 0);
    }
}
