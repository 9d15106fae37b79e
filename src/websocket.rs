//! WebSocket task event stream
//!
//! `GET /ws/tasks?courier_id=` pushes every task status change whose pickup
//! code lies inside the courier's managed prefix.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use uuid::Uuid;

use crate::error::Result;
use crate::models::Courier;
use crate::permission;
use crate::routing::{Task, TaskStatus, TaskStatusChanged};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub courier_id: Uuid,
}

/// WebSocket handler
pub async fn handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
) -> Result<impl IntoResponse> {
    let courier = state.hierarchy.get_courier(query.courier_id).await?;
    // Subscribe before the upgrade so nothing committed after the response is missed
    let events = state.events.subscribe();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, courier, events)))
}

async fn handle_socket(
    socket: WebSocket,
    courier: Courier,
    events: broadcast::Receiver<TaskStatusChanged>,
) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = BroadcastStream::new(events);
    tracing::debug!(courier_id = %courier.id, "Task stream opened");

    let hello = ServerMessage::Subscribed {
        courier_id: courier.id,
        managed_prefix: courier.managed_prefix.clone(),
    };
    if send(&mut sender, &hello).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::error!("WebSocket error: {}", e);
                    break;
                }
            },
            event = events.next() => {
                let msg = match event {
                    Some(Ok(event)) if permission::can_manage(&courier, event.task.pickup_code.as_str()) => {
                        ServerMessage::TaskStatusChanged {
                            task: event.task,
                            previous_status: event.previous_status,
                        }
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                        tracing::warn!(courier_id = %courier.id, skipped, "Task stream lagged");
                        ServerMessage::Lagged { skipped }
                    }
                    None => break,
                };
                if send(&mut sender, &msg).await.is_err() {
                    break;
                }
            }
        }
    }

    tracing::debug!(courier_id = %courier.id, "Task stream closed");
}

async fn send(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> std::result::Result<(), ()> {
    let text = serde_json::to_string(msg).map_err(|e| {
        tracing::error!("Failed to encode stream message: {}", e);
    })?;
    sender.send(Message::Text(text.into())).await.map_err(|e| {
        tracing::debug!("Failed to send stream message: {}", e);
    })
}

/// Messages from server to client
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Stream is live for this courier's scope
    Subscribed {
        courier_id: Uuid,
        managed_prefix: String,
    },
    /// A task in scope changed status
    TaskStatusChanged {
        task: Task,
        previous_status: Option<TaskStatus>,
    },
    /// The stream fell behind and dropped events
    Lagged { skipped: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LocationCode;
    use chrono::Duration;

    #[test]
    fn test_server_message_shape() {
        let task = Task::new(
            LocationCode::parse("PK5F3D").unwrap(),
            LocationCode::parse("PK3D01").unwrap(),
            Duration::hours(1),
        )
        .unwrap();
        let msg = ServerMessage::TaskStatusChanged {
            task,
            previous_status: None,
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "task_status_changed");
        assert_eq!(json["task"]["status"], "available");
        assert!(json["previous_status"].is_null());

        let lagged = serde_json::to_value(ServerMessage::Lagged { skipped: 3 }).unwrap();
        assert_eq!(lagged["type"], "lagged");
        assert_eq!(lagged["skipped"], 3);
    }
}
