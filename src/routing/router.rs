//! Task routing: creation, claiming, progress and expiry
//!
//! Every task write is a version-checked conditional update. Claims are
//! never retried: losing the version check means somebody else holds the
//! task. Other writes re-read and re-validate a bounded number of times.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::events::TaskEventSink;
use super::task::{Task, TaskStatus};
use crate::config::{CancelPolicy, ConfigHandle, MAX_TTL_SECS};
use crate::error::{AppError, Result};
use crate::hierarchy::CourierTree;
use crate::models::Courier;
use crate::permission::{self, LoadSnapshot, PermissionEnforcer};
use crate::registry::CodeRegistry;
use crate::store::Store;

/// Who is cancelling a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "actor", content = "courier_id", rename_all = "snake_case")]
pub enum CancelActor {
    /// The party that created the task
    Sender,
    /// A courier; must be the one holding the task
    Courier(Uuid),
}

/// An eligible courier with its current load
#[derive(Debug, Clone, Serialize)]
pub struct CourierCandidate {
    pub courier: Courier,
    pub active_tasks: u32,
}

#[derive(Clone)]
pub struct TaskRouter {
    store: Store,
    registry: CodeRegistry,
    config: Arc<ConfigHandle>,
    events: Arc<dyn TaskEventSink>,
}

impl TaskRouter {
    pub fn new(
        store: Store,
        registry: CodeRegistry,
        config: Arc<ConfigHandle>,
        events: Arc<dyn TaskEventSink>,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            events,
        }
    }

    /// Create an available task between two registered codes
    pub async fn create_task(
        &self,
        pickup: &str,
        delivery: &str,
        ttl: Option<Duration>,
    ) -> Result<Task> {
        let pickup_code = self.registry.validate(pickup).await?;
        let delivery_code = self.registry.validate(delivery).await?;

        let ttl = ttl.unwrap_or_else(|| self.config.current().default_task_ttl());
        if ttl <= Duration::zero() {
            return Err(AppError::BadRequest("ttl must be positive".to_string()));
        }
        if ttl > Duration::seconds(MAX_TTL_SECS) {
            return Err(AppError::BadRequest(format!(
                "ttl must not exceed {} seconds",
                MAX_TTL_SECS
            )));
        }

        let task = Task::new(pickup_code, delivery_code, ttl)?;
        self.store.insert_task(&task).await?;

        tracing::info!(task_id = %task.id, expires_at = %task.expires_at, "Task created");
        self.events.on_task_status_changed(&task, None);

        Ok(task)
    }

    pub async fn get_task(&self, task_id: Uuid) -> Result<Task> {
        self.store.get_task(task_id).await
    }

    /// Claim an available task; of two concurrent claims exactly one wins
    pub async fn accept(&self, task_id: Uuid, courier_id: Uuid) -> Result<Task> {
        let now = Utc::now();
        let mut task = self.store.get_task(task_id).await?;
        task.ensure_open()?;
        if task.status != TaskStatus::Available {
            return Err(AppError::DuplicateClaim(task_id));
        }
        if task.is_expired_at(now) {
            return Err(AppError::TaskExpired(task_id));
        }

        let courier = self.store.get_courier(courier_id).await?;
        let load = self.store.active_task_count(courier_id).await?;
        let capacity = LoadSnapshot::new(
            HashMap::from([(courier_id, load)]),
            self.config.current().max_active_tasks,
        );
        if !permission::is_eligible(&courier, task.pickup_code.as_str(), &capacity) {
            tracing::warn!(%task_id, %courier_id, load, "Claim by ineligible courier");
            return Err(AppError::PermissionDenied(format!(
                "courier {} may not claim task {}",
                courier_id, task_id
            )));
        }

        let previous = task.status;
        let expected = task.version;
        task.accept(courier_id, now)?;
        task.version = expected + 1;

        if !self.store.commit_task(&task, expected).await? {
            tracing::debug!(%task_id, %courier_id, "Claim lost version check");
            return Err(AppError::DuplicateClaim(task_id));
        }

        tracing::info!(%task_id, %courier_id, "Task accepted");
        self.events.on_task_status_changed(&task, Some(previous));
        Ok(task)
    }

    /// Eligible couriers for a task's pickup code, best first.
    ///
    /// Order: fewest active tasks, then highest performance score, then id.
    pub async fn rank_candidates(&self, task_id: Uuid) -> Result<Vec<CourierCandidate>> {
        let task = self.store.get_task(task_id).await?;
        let tree = CourierTree::from_couriers(self.store.list_couriers().await?);
        let loads = LoadSnapshot::new(
            self.store.active_task_counts().await?,
            self.config.current().max_active_tasks,
        );

        let mut candidates: Vec<CourierCandidate> = PermissionEnforcer::new(&tree)
            .eligible_couriers(task.pickup_code.as_str(), &loads)
            .into_iter()
            .map(|courier| CourierCandidate {
                active_tasks: loads.load_of(courier.id),
                courier: courier.clone(),
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.active_tasks
                .cmp(&b.active_tasks)
                .then_with(|| {
                    b.courier
                        .performance_score
                        .total_cmp(&a.courier.performance_score)
                })
                .then_with(|| a.courier.id.cmp(&b.courier.id))
        });

        Ok(candidates)
    }

    /// Claim a task on behalf of the best-ranked eligible courier
    pub async fn assign_best(&self, task_id: Uuid) -> Result<Task> {
        let best = self
            .rank_candidates(task_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                AppError::PermissionDenied(format!("no eligible courier for task {}", task_id))
            })?;
        self.accept(task_id, best.courier.id).await
    }

    /// Move a held task one step forward
    pub async fn advance_status(
        &self,
        task_id: Uuid,
        courier_id: Uuid,
        to: TaskStatus,
    ) -> Result<Task> {
        let retries = self.config.current().max_write_retries;
        let in_progress_ttl = self.config.current().in_progress_ttl();

        for _ in 0..=retries {
            let now = Utc::now();
            let mut task = self.store.get_task(task_id).await?;
            task.ensure_open()?;
            if task.assigned_courier_id != Some(courier_id) {
                return Err(AppError::PermissionDenied(format!(
                    "courier {} does not hold task {}",
                    courier_id, task_id
                )));
            }
            if task.should_expire(now, in_progress_ttl) {
                return Err(AppError::TaskExpired(task_id));
            }

            let previous = task.status;
            let expected = task.version;
            task.advance(to, now)?;
            task.version = expected + 1;

            if self.store.commit_task(&task, expected).await? {
                tracing::info!(%task_id, %courier_id, from = %previous, to = %to, "Task advanced");
                self.events.on_task_status_changed(&task, Some(previous));
                return Ok(task);
            }
        }

        Err(AppError::Conflict(format!(
            "task {} kept changing; giving up",
            task_id
        )))
    }

    /// Cancel or release a task depending on who asks and the cancel policy
    pub async fn cancel(&self, task_id: Uuid, actor: CancelActor) -> Result<Task> {
        let config = self.config.current();

        for _ in 0..=config.max_write_retries {
            let now = Utc::now();
            let mut task = self.store.get_task(task_id).await?;
            task.ensure_open()?;

            let previous = task.status;
            match actor {
                CancelActor::Sender => task.cancel(now)?,
                CancelActor::Courier(courier_id) => {
                    if task.assigned_courier_id != Some(courier_id) {
                        return Err(AppError::PermissionDenied(format!(
                            "courier {} does not hold task {}",
                            courier_id, task_id
                        )));
                    }
                    match config.courier_cancel {
                        CancelPolicy::Release => task.release(now)?,
                        CancelPolicy::Terminate => task.cancel(now)?,
                    }
                }
            }

            let expected = task.version;
            task.version = expected + 1;
            if self.store.commit_task(&task, expected).await? {
                tracing::info!(%task_id, ?actor, to = %task.status, "Task cancelled");
                self.events.on_task_status_changed(&task, Some(previous));
                return Ok(task);
            }
        }

        Err(AppError::Conflict(format!(
            "task {} kept changing; giving up",
            task_id
        )))
    }

    /// Expire every open task whose deadline passed before `now`.
    ///
    /// Returns how many tasks this sweep expired. Tasks that change under
    /// the sweep are left for the next one.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let in_progress_ttl = self.config.current().in_progress_ttl();
        let mut expired = 0;

        for mut task in self.store.list_open_tasks().await? {
            if !task.should_expire(now, in_progress_ttl) {
                continue;
            }
            let previous = task.status;
            let expected = task.version;
            task.expire(now)?;
            task.version = expected + 1;

            if self.store.commit_task(&task, expected).await? {
                expired += 1;
                self.events.on_task_status_changed(&task, Some(previous));
            } else {
                tracing::debug!(task_id = %task.id, "Task changed during sweep");
            }
        }

        if expired > 0 {
            tracing::info!(expired, "Expired tasks swept");
        }
        Ok(expired)
    }

    /// Available tasks this courier could claim right now
    pub async fn eligible_tasks_for(&self, courier_id: Uuid) -> Result<Vec<Task>> {
        let courier = self.store.get_courier(courier_id).await?;
        if !courier.is_active {
            return Ok(Vec::new());
        }
        let load = self.store.active_task_count(courier_id).await?;
        if load >= self.config.current().max_active_tasks {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        Ok(self
            .store
            .list_available_tasks(&courier.managed_prefix)
            .await?
            .into_iter()
            .filter(|t| !t.is_expired_at(now))
            .collect())
    }
}
