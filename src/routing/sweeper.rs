//! Periodic expiry sweep

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::router::TaskRouter;
use crate::config::ConfigHandle;

/// How often the sweeper re-reads `sweep_interval_secs`
const RECHECK_EVERY: Duration = Duration::from_secs(1);

/// Run `sweep_expired` once at start and then every `sweep_interval_secs`
/// of the current config, until the handle is aborted. A reloaded interval
/// applies from the next recheck.
pub fn spawn_sweeper(router: TaskRouter, config: Arc<ConfigHandle>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RECHECK_EVERY);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_sweep: Option<Instant> = None;

        loop {
            ticker.tick().await;
            let due = last_sweep
                .map_or(true, |at| at.elapsed() >= config.current().sweep_interval());
            if !due {
                continue;
            }

            last_sweep = Some(Instant::now());
            if let Err(e) = router.sweep_expired(Utc::now()).await {
                tracing::warn!("Expiry sweep failed: {}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::registry::CodeRegistry;
    use crate::routing::events::NoopSink;
    use crate::routing::TaskStatus;
    use crate::store::tests::setup_test_db;
    use uuid::Uuid;

    async fn setup(sweep_interval_secs: u64) -> (TaskRouter, Arc<ConfigHandle>) {
        let store = setup_test_db().await;
        let config = Arc::new(ConfigHandle::new(CoreConfig {
            sweep_interval_secs,
            ..CoreConfig::default()
        }));
        let registry = CodeRegistry::new(store.clone(), Arc::clone(&config));
        registry.create_school("PK", "Peking").await.unwrap();
        registry.create_area("PK", "5F", "Fifth court").await.unwrap();
        let router = TaskRouter::new(store, registry, Arc::clone(&config), Arc::new(NoopSink));
        (router, config)
    }

    async fn wait_for_expiry(router: &TaskRouter, task_id: Uuid) -> TaskStatus {
        let mut status = TaskStatus::Available;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(30)).await;
            status = router.get_task(task_id).await.unwrap().status;
            if status == TaskStatus::Expired {
                break;
            }
        }
        status
    }

    #[tokio::test]
    async fn test_sweeper_expires_in_background() {
        let (router, config) = setup(1).await;
        let task = router
            .create_task("PK5F3D", "PK5F01", Some(chrono::Duration::milliseconds(5)))
            .await
            .unwrap();

        let handle = spawn_sweeper(router.clone(), config);
        let status = wait_for_expiry(&router, task.id).await;
        handle.abort();
        assert_eq!(status, TaskStatus::Expired);
    }

    #[tokio::test]
    async fn test_sweeper_follows_reloaded_interval() {
        let (router, config) = setup(3600).await;
        let handle = spawn_sweeper(router.clone(), Arc::clone(&config));
        // Let the initial sweep pass
        tokio::time::sleep(Duration::from_millis(100)).await;

        let task = router
            .create_task("PK5F3D", "PK5F01", Some(chrono::Duration::milliseconds(5)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(
            router.get_task(task.id).await.unwrap().status,
            TaskStatus::Available
        );

        config
            .reload(CoreConfig {
                sweep_interval_secs: 1,
                ..CoreConfig::default()
            })
            .unwrap();
        let status = wait_for_expiry(&router, task.id).await;
        handle.abort();
        assert_eq!(status, TaskStatus::Expired);
    }
}
