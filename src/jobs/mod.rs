//! Scheduled Jobs
//!
//! Background maintenance: reclaims expired ephemeral state (rate-limit
//! counters, step-up sessions) so the TTL store does not grow without
//! bound. Expiry itself is enforced on read; this loop is purely
//! housekeeping.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::clock::Clock;
use crate::store::{StoreError, TtlStore};

/// Configuration for the job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval between TTL purges (default: 1 minute)
    pub purge_interval: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            purge_interval: Duration::from_secs(60),
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks
pub struct JobScheduler {
    ttl_store: Arc<dyn TtlStore>,
    clock: Arc<dyn Clock>,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    pub fn new(ttl_store: Arc<dyn TtlStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl_store,
            clock,
            config: JobSchedulerConfig::default(),
        }
    }

    pub fn with_config(
        ttl_store: Arc<dyn TtlStore>,
        clock: Arc<dyn Clock>,
        config: JobSchedulerConfig,
    ) -> Self {
        Self {
            ttl_store,
            clock,
            config,
        }
    }

    /// Start the scheduler in the background.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        tracing::info!("Job scheduler started");

        let mut purge = interval(self.config.purge_interval);

        loop {
            purge.tick().await;
            match purge_expired_state(self.ttl_store.as_ref()).await {
                Ok(purged) if purged > 0 => {
                    tracing::info!(purged, "Reclaimed expired ephemeral state");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "TTL purge failed");
                }
            }
        }
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport {
            completed_at: self.clock.now(),
            ..MaintenanceReport::default()
        };

        match purge_expired_state(self.ttl_store.as_ref()).await {
            Ok(purged) => report.ttl_entries_purged = purged,
            Err(e) => report.errors.push(format!("TTL purge: {e}")),
        }

        report.completed_at = self.clock.now();
        report
    }
}

/// Drop expired TTL entries.
pub async fn purge_expired_state(store: &dyn TtlStore) -> Result<u64, StoreError> {
    store.purge_expired().await
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub ttl_entries_purged: u64,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::store::MemoryTtlStore;

    #[test]
    fn test_job_scheduler_config_default() {
        let config = JobSchedulerConfig::default();
        assert_eq!(config.purge_interval, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_run_all_once_purges_expired_entries() {
        let clock = Arc::new(MockClock::new(Utc::now()));
        let store = Arc::new(MemoryTtlStore::new(clock.clone()));

        store
            .put("stale", "x".to_string(), Some(Duration::from_secs(10)))
            .await
            .unwrap();
        store.put("live", "y".to_string(), None).await.unwrap();
        clock.advance(chrono::Duration::seconds(11));

        let scheduler = JobScheduler::new(store.clone(), clock);
        let report = scheduler.run_all_once().await;

        assert_eq!(report.ttl_entries_purged, 1);
        assert!(report.errors.is_empty());
        assert_eq!(store.get("live").await.unwrap().as_deref(), Some("y"));
    }
}
