//! Delivery tasks and their lifecycle
//!
//! `available → accepted → collected → in_transit → delivered`, with
//! `cancelled` and `expired` reachable from every non-terminal state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::LocationCode;

/// Status of a delivery task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for a courier to claim it
    Available,
    /// Claimed by exactly one courier
    Accepted,
    /// Picked up at the pickup code
    Collected,
    InTransit,
    Delivered,
    Cancelled,
    Expired,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Available => "available",
            TaskStatus::Accepted => "accepted",
            TaskStatus::Collected => "collected",
            TaskStatus::InTransit => "in_transit",
            TaskStatus::Delivered => "delivered",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Expired => "expired",
        }
    }

    /// Check if this is a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Delivered | TaskStatus::Cancelled | TaskStatus::Expired
        )
    }

    /// Claimed and not yet finished; counts against courier capacity
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            TaskStatus::Accepted | TaskStatus::Collected | TaskStatus::InTransit
        )
    }

    /// The single legal forward step an assigned courier may take
    pub fn next(&self) -> Option<TaskStatus> {
        match self {
            TaskStatus::Accepted => Some(TaskStatus::Collected),
            TaskStatus::Collected => Some(TaskStatus::InTransit),
            TaskStatus::InTransit => Some(TaskStatus::Delivered),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "available" => Ok(TaskStatus::Available),
            "accepted" => Ok(TaskStatus::Accepted),
            "collected" => Ok(TaskStatus::Collected),
            "in_transit" => Ok(TaskStatus::InTransit),
            "delivered" => Ok(TaskStatus::Delivered),
            "cancelled" => Ok(TaskStatus::Cancelled),
            "expired" => Ok(TaskStatus::Expired),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

/// One physical handoff between a pickup code and a delivery code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub pickup_code: LocationCode,
    pub delivery_code: LocationCode,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_courier_id: Option<Uuid>,
    /// Bumped by exactly one on every committed mutation
    pub version: i64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new available task; fails when `now + ttl` leaves the calendar
    pub fn new(
        pickup_code: LocationCode,
        delivery_code: LocationCode,
        ttl: Duration,
    ) -> Result<Self> {
        let now = Utc::now();
        let expires_at = now.checked_add_signed(ttl).ok_or_else(|| {
            AppError::BadRequest(format!("ttl of {}s is out of range", ttl.num_seconds()))
        })?;
        Ok(Self {
            id: Uuid::new_v4(),
            pickup_code,
            delivery_code,
            status: TaskStatus::Available,
            assigned_courier_id: None,
            version: 0,
            created_at: now,
            claimed_at: None,
            delivered_at: None,
            expires_at,
            updated_at: now,
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Whether a sweep at `now` should move this task to `expired`
    pub fn should_expire(&self, now: DateTime<Utc>, in_progress_ttl: Option<Duration>) -> bool {
        match self.status {
            TaskStatus::Available => self.is_expired_at(now),
            status if status.is_in_progress() => match (in_progress_ttl, self.claimed_at) {
                (Some(ttl), Some(claimed_at)) => claimed_at
                    .checked_add_signed(ttl)
                    .is_some_and(|deadline| deadline < now),
                _ => false,
            },
            _ => false,
        }
    }

    /// Terminal tasks reject every mutation
    pub fn ensure_open(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(AppError::InvalidStateTransition(format!(
                "task {} is already {}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// Claim the task for a courier
    pub fn accept(&mut self, courier_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        self.ensure_open()?;
        if self.status != TaskStatus::Available {
            return Err(AppError::DuplicateClaim(self.id));
        }
        self.status = TaskStatus::Accepted;
        self.assigned_courier_id = Some(courier_id);
        self.claimed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Move one step forward along the delivery path
    pub fn advance(&mut self, to: TaskStatus, now: DateTime<Utc>) -> Result<()> {
        self.ensure_open()?;
        if self.status.next() != Some(to) {
            return Err(AppError::InvalidStateTransition(format!(
                "cannot move task {} from {} to {}",
                self.id, self.status, to
            )));
        }
        self.status = to;
        if to == TaskStatus::Delivered {
            self.delivered_at = Some(now);
        }
        self.updated_at = now;
        Ok(())
    }

    /// Hand a claimed task back to the pool
    pub fn release(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.ensure_open()?;
        if !self.status.is_in_progress() {
            return Err(AppError::InvalidStateTransition(format!(
                "task {} is {} and cannot be released",
                self.id, self.status
            )));
        }
        self.status = TaskStatus::Available;
        self.assigned_courier_id = None;
        self.claimed_at = None;
        self.updated_at = now;
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.ensure_open()?;
        self.status = TaskStatus::Cancelled;
        self.updated_at = now;
        Ok(())
    }

    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.ensure_open()?;
        self.status = TaskStatus::Expired;
        self.updated_at = now;
        Ok(())
    }
}
