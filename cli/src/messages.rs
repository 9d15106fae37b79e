//! Wire types for the campost HTTP and WebSocket API
//!
//! These types mirror the server's JSON. Some fields are not read by the
//! CLI but are part of the response bodies.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a delivery task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum TaskStatus {
    Available,
    Accepted,
    Collected,
    InTransit,
    Delivered,
    Cancelled,
    Expired,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Available => "available",
            TaskStatus::Accepted => "accepted",
            TaskStatus::Collected => "collected",
            TaskStatus::InTransit => "in_transit",
            TaskStatus::Delivered => "delivered",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub pickup_code: String,
    pub delivery_code: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub assigned_courier_id: Option<Uuid>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Kind of place a code points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum PointType {
    Dormitory,
    Teaching,
    Administrative,
    Commercial,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Courier {
    pub id: Uuid,
    pub name: String,
    /// 1 = point, 2 = area, 3 = school, 4 = global
    pub level: u8,
    pub managed_prefix: String,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    pub performance_score: f64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierCandidate {
    pub courier: Courier,
    pub active_tasks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeApplication {
    pub id: Uuid,
    pub code: String,
    pub point_type: PointType,
    pub is_public: bool,
    pub requested_by: String,
    pub status: String,
    #[serde(default)]
    pub reviewed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeRecord {
    pub code: String,
    pub point_type: PointType,
    pub binding_status: String,
    pub is_public: bool,
    pub is_active: bool,
    #[serde(default)]
    pub managed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeView {
    pub display: String,
    pub role: String,
    #[serde(default)]
    pub school: Option<String>,
    #[serde(default)]
    pub area: Option<String>,
    #[serde(default)]
    pub point: Option<String>,
    pub point_type: PointType,
    pub is_active: bool,
}

// Request bodies

#[derive(Debug, Clone, Serialize)]
pub struct AllocateRequest {
    pub school: String,
    pub area: String,
    pub point_type: PointType,
    pub requested_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_point: Option<String>,
    pub is_public: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateCourierRequest {
    pub name: String,
    pub level: u8,
    pub managed_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateTaskRequest {
    pub pickup_code: String,
    pub delivery_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<i64>,
}

/// Who cancels a task
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(tag = "actor", content = "courier_id", rename_all = "snake_case")]
pub enum CancelActor {
    Sender,
    Courier(Uuid),
}

/// Error body returned by the server for every failed request
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub code: u16,
    pub kind: String,
    pub message: String,
}

/// Messages pushed on `/ws/tasks`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    Subscribed {
        courier_id: Uuid,
        managed_prefix: String,
    },
    TaskStatusChanged {
        task: Task,
        previous_status: Option<TaskStatus>,
    },
    Lagged {
        skipped: u64,
    },
}
