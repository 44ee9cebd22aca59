//! Periodic tick plus recommendation maintenance

use chrono::Utc;
use drift_lib::{
    orchestrator::{DriftTick, TickOptions},
    recommendation::MaintenanceReport,
    TickReport,
};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// What one heartbeat did
#[derive(Debug, Default)]
pub struct Beat {
    pub report: Option<TickReport>,
    pub maintenance: Option<MaintenanceReport>,
}

pub struct Heartbeat {
    tick: DriftTick,
    interval: Duration,
}

impl Heartbeat {
    pub fn new(tick: DriftTick, interval: Duration) -> Self {
        Self { tick, interval }
    }

    /// One tick followed by the maintenance pass
    ///
    /// Maintenance runs even when the tick fails: snoozes still wake and
    /// stale recommendations still expire.
    pub async fn beat(&self) -> Beat {
        let report = match self.tick.run(TickOptions::default()).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "Heartbeat tick failed");
                None
            }
        };

        let maintenance = match self
            .tick
            .recommendations()
            .run_maintenance(Utc::now(), self.tick.executor())
            .await
        {
            Ok(maintenance) => {
                info!(
                    woken = maintenance.woken.len(),
                    executed = maintenance.executed.len(),
                    expired = maintenance.expired.len(),
                    "Recommendation maintenance finished"
                );
                Some(maintenance)
            }
            Err(e) => {
                warn!(error = %e, "Recommendation maintenance failed");
                None
            }
        };

        Beat {
            report,
            maintenance,
        }
    }

    /// Beat on the interval until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "Heartbeat started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.beat().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Heartbeat stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_lib::{
        pricing::StaticPricing,
        store::{MemoryAuditLog, MemoryResourceStore, MemorySettingsStore},
        MemoryRecommendationStore, ScenarioCatalog,
    };
    use std::sync::Arc;

    fn tick(store: Arc<MemoryResourceStore>) -> DriftTick {
        DriftTick::new(
            store,
            Arc::new(MemorySettingsStore::new()),
            Arc::new(MemoryRecommendationStore::new()),
            Arc::new(MemoryAuditLog::new()),
            Arc::new(ScenarioCatalog::builtin().unwrap()),
            Arc::new(StaticPricing::default()),
        )
    }

    #[tokio::test]
    async fn test_beat_runs_tick_and_maintenance() {
        let heartbeat = Heartbeat::new(
            tick(Arc::new(MemoryResourceStore::new())),
            Duration::from_secs(60),
        );
        let beat = heartbeat.beat().await;
        assert!(beat.report.is_some());
        assert!(beat.maintenance.is_some());
    }

    #[tokio::test]
    async fn test_failed_tick_still_runs_maintenance() {
        let store = Arc::new(MemoryResourceStore::new());
        store.disconnect();
        let beat = Heartbeat::new(tick(store), Duration::from_secs(60))
            .beat()
            .await;
        assert!(beat.report.is_none());
        assert!(beat.maintenance.is_some());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let heartbeat = Heartbeat::new(
            tick(Arc::new(MemoryResourceStore::new())),
            Duration::from_millis(10),
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(heartbeat.run(rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
