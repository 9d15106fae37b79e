//! Task status notifications
//!
//! The router reports every committed status change to a [`TaskEventSink`].
//! [`TaskEventBus`] fans changes out over a broadcast channel so any number
//! of listeners (websocket streams, tests) can subscribe.

use serde::Serialize;
use tokio::sync::broadcast;

use super::task::{Task, TaskStatus};

/// One committed status change
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatusChanged {
    pub task: Task,
    /// `None` when the task was just created
    pub previous_status: Option<TaskStatus>,
}

/// Receiver of status changes, invoked after the change is durable
pub trait TaskEventSink: Send + Sync {
    fn on_task_status_changed(&self, task: &Task, previous_status: Option<TaskStatus>);
}

/// Broadcast fan-out of task events
pub struct TaskEventBus {
    tx: broadcast::Sender<TaskStatusChanged>,
}

impl TaskEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to task events
    pub fn subscribe(&self) -> broadcast::Receiver<TaskStatusChanged> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for TaskEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl TaskEventSink for TaskEventBus {
    fn on_task_status_changed(&self, task: &Task, previous_status: Option<TaskStatus>) {
        tracing::debug!(
            task_id = %task.id,
            from = ?previous_status,
            to = %task.status,
            "Task status changed"
        );
        // No subscribers is not an error
        let _ = self.tx.send(TaskStatusChanged {
            task: task.clone(),
            previous_status,
        });
    }
}

/// Sink that drops every event
pub struct NoopSink;

impl TaskEventSink for NoopSink {
    fn on_task_status_changed(&self, _task: &Task, _previous_status: Option<TaskStatus>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LocationCode;
    use chrono::Duration;

    #[tokio::test]
    async fn test_bus_delivers_to_subscribers() {
        let bus = TaskEventBus::new(8);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let task = Task::new(
            LocationCode::parse("PK5F3D").unwrap(),
            LocationCode::parse("PK3D01").unwrap(),
            Duration::hours(1),
        )
        .unwrap();
        bus.on_task_status_changed(&task, None);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.task.id, task.id);
        assert_eq!(event.previous_status, None);
    }

    #[test]
    fn test_bus_without_subscribers() {
        let bus = TaskEventBus::default();
        let task = Task::new(
            LocationCode::parse("PK5F3D").unwrap(),
            LocationCode::parse("PK3D01").unwrap(),
            Duration::hours(1),
        )
        .unwrap();
        bus.on_task_status_changed(&task, Some(TaskStatus::Available));
    }
}
