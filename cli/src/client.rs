//! HTTP and WebSocket client for the campost server

use futures::StreamExt;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;
use uuid::Uuid;

use crate::messages::{
    AllocateRequest, CancelActor, CodeApplication, CodeRecord, CodeView, Courier,
    CourierCandidate, CreateCourierRequest, CreateTaskRequest, ErrorEnvelope, StreamMessage, Task,
    TaskStatus,
};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{kind} ({status}): {message}")]
    Server {
        status: u16,
        kind: String,
        message: String,
    },

    #[error("Invalid server URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl ApiError {
    /// Server-side error kind, e.g. `duplicate_claim`
    pub fn kind(&self) -> Option<&str> {
        match self {
            ApiError::Server { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Client for the campost REST API
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        decode(response).await
    }

    pub async fn allocate(&self, request: &AllocateRequest) -> Result<CodeApplication> {
        self.send(self.request(Method::POST, "/codes/applications").json(request))
            .await
    }

    pub async fn approve(&self, application_id: Uuid, courier_id: Uuid) -> Result<CodeRecord> {
        let path = format!("/codes/applications/{}/approve", application_id);
        self.send(
            self.request(Method::POST, &path)
                .json(&serde_json::json!({ "courier_id": courier_id })),
        )
        .await
    }

    pub async fn reject(&self, application_id: Uuid, courier_id: Uuid) -> Result<CodeApplication> {
        let path = format!("/codes/applications/{}/reject", application_id);
        self.send(
            self.request(Method::POST, &path)
                .json(&serde_json::json!({ "courier_id": courier_id })),
        )
        .await
    }

    pub async fn lookup(&self, code: &str, viewer: Option<Uuid>) -> Result<CodeView> {
        let mut request = self.request(Method::GET, &format!("/codes/{}", code));
        if let Some(courier_id) = viewer {
            request = request.query(&[("courier_id", courier_id.to_string())]);
        }
        self.send(request).await
    }

    pub async fn create_courier(&self, request: &CreateCourierRequest) -> Result<Courier> {
        self.send(self.request(Method::POST, "/couriers").json(request))
            .await
    }

    pub async fn descendants(&self, courier_id: Uuid) -> Result<Vec<Courier>> {
        let path = format!("/couriers/{}/descendants", courier_id);
        self.send(self.request(Method::GET, &path)).await
    }

    pub async fn eligible_tasks(&self, courier_id: Uuid) -> Result<Vec<Task>> {
        let path = format!("/couriers/{}/eligible-tasks", courier_id);
        self.send(self.request(Method::GET, &path)).await
    }

    pub async fn create_task(&self, request: &CreateTaskRequest) -> Result<Task> {
        self.send(self.request(Method::POST, "/tasks").json(request))
            .await
    }

    pub async fn get_task(&self, task_id: Uuid) -> Result<Task> {
        self.send(self.request(Method::GET, &format!("/tasks/{}", task_id)))
            .await
    }

    pub async fn candidates(&self, task_id: Uuid) -> Result<Vec<CourierCandidate>> {
        let path = format!("/tasks/{}/candidates", task_id);
        self.send(self.request(Method::GET, &path)).await
    }

    pub async fn accept(&self, task_id: Uuid, courier_id: Uuid) -> Result<Task> {
        let path = format!("/tasks/{}/accept", task_id);
        self.send(
            self.request(Method::POST, &path)
                .json(&serde_json::json!({ "courier_id": courier_id })),
        )
        .await
    }

    pub async fn assign(&self, task_id: Uuid) -> Result<Task> {
        let path = format!("/tasks/{}/assign", task_id);
        self.send(self.request(Method::POST, &path)).await
    }

    pub async fn advance(&self, task_id: Uuid, courier_id: Uuid, status: TaskStatus) -> Result<Task> {
        let path = format!("/tasks/{}/status", task_id);
        self.send(
            self.request(Method::POST, &path)
                .json(&serde_json::json!({ "courier_id": courier_id, "status": status })),
        )
        .await
    }

    pub async fn cancel(&self, task_id: Uuid, actor: CancelActor) -> Result<Task> {
        let path = format!("/tasks/{}/cancel", task_id);
        self.send(self.request(Method::POST, &path).json(&actor))
            .await
    }

    /// WebSocket URL of the task stream for a courier
    pub fn stream_url(&self, courier_id: Uuid) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        // http(s) -> ws(s) stays among special schemes, which set_scheme allows
        let _ = url.set_scheme(scheme);
        url.set_path("/ws/tasks");
        url.query_pairs_mut()
            .clear()
            .append_pair("courier_id", &courier_id.to_string());
        Ok(url)
    }

    /// Tail the task stream, calling `on_message` until it returns false
    pub async fn watch<F>(&self, courier_id: Uuid, mut on_message: F) -> Result<()>
    where
        F: FnMut(StreamMessage) -> bool,
    {
        let url = self.stream_url(courier_id)?;
        tracing::info!("Connecting to {}", url);
        let (mut ws_stream, _) = connect_async(url.as_str()).await?;

        while let Some(frame) = ws_stream.next().await {
            match frame? {
                Message::Text(text) => match serde_json::from_str::<StreamMessage>(&text) {
                    Ok(msg) => {
                        if !on_message(msg) {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse message: {} - {}", e, text);
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }

        Ok(())
    }
}

/// Turn a response into `T`, or into the server's error envelope
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let text = response.text().await.unwrap_or_default();
    Err(match serde_json::from_str::<ErrorEnvelope>(&text) {
        Ok(envelope) => ApiError::Server {
            status: envelope.error.code,
            kind: envelope.error.kind,
            message: envelope.error.message,
        },
        Err(_) => ApiError::Server {
            status: status.as_u16(),
            kind: "unknown".to_string(),
            message: text,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn task_json(id: Uuid, status: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "pickup_code": "PK5F3D",
            "delivery_code": "PK3D01",
            "status": status,
            "version": 1,
            "created_at": "2026-01-10T00:00:00Z",
            "expires_at": "2026-01-10T01:00:00Z",
            "updated_at": "2026-01-10T00:00:00Z"
        })
    }

    #[tokio::test]
    async fn test_accept_success() {
        let mock_server = MockServer::start().await;
        let task_id = Uuid::new_v4();
        let courier_id = Uuid::new_v4();

        Mock::given(method("POST"))
            .and(path(format!("/tasks/{}/accept", task_id)))
            .and(body_json(serde_json::json!({ "courier_id": courier_id })))
            .respond_with(ResponseTemplate::new(200).set_body_json(task_json(task_id, "accepted")))
            .mount(&mock_server)
            .await;

        let client = ApiClient::new(mock_server.uri());
        let task = client.accept(task_id, courier_id).await.unwrap();
        assert_eq!(task.id, task_id);
        assert_eq!(task.status, TaskStatus::Accepted);
    }

    #[tokio::test]
    async fn test_accept_duplicate_claim_error() {
        let mock_server = MockServer::start().await;
        let task_id = Uuid::new_v4();

        Mock::given(method("POST"))
            .and(path(format!("/tasks/{}/accept", task_id)))
            .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
                "error": {
                    "code": 409,
                    "kind": "duplicate_claim",
                    "message": "task was claimed by another courier"
                }
            })))
            .mount(&mock_server)
            .await;

        let client = ApiClient::new(mock_server.uri());
        let err = client.accept(task_id, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), Some("duplicate_claim"));
        match err {
            ApiError::Server { status, .. } => assert_eq!(status, 409),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_non_json_error_body() {
        let mock_server = MockServer::start().await;
        let task_id = Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path(format!("/tasks/{}", task_id)))
            .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
            .mount(&mock_server)
            .await;

        let client = ApiClient::new(mock_server.uri());
        match client.get_task(task_id).await.unwrap_err() {
            ApiError::Server {
                status,
                kind,
                message,
            } => {
                assert_eq!(status, 502);
                assert_eq!(kind, "unknown");
                assert_eq!(message, "Bad Gateway");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_lookup_passes_viewer() {
        let mock_server = MockServer::start().await;
        let viewer = Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path("/codes/PK5F3D"))
            .and(query_param("courier_id", viewer.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "display": "PK5F**",
                "role": "courier",
                "school": "PK",
                "area": "5F",
                "point_type": "dormitory",
                "is_active": true
            })))
            .mount(&mock_server)
            .await;

        let client = ApiClient::new(format!("{}/", mock_server.uri()));
        let view = client.lookup("PK5F3D", Some(viewer)).await.unwrap();
        assert_eq!(view.display, "PK5F**");
        assert_eq!(view.point, None);
    }

    #[tokio::test]
    async fn test_cancel_sends_actor() {
        let mock_server = MockServer::start().await;
        let task_id = Uuid::new_v4();

        Mock::given(method("POST"))
            .and(path(format!("/tasks/{}/cancel", task_id)))
            .and(body_json(serde_json::json!({ "actor": "sender" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(task_json(task_id, "cancelled")))
            .mount(&mock_server)
            .await;

        let client = ApiClient::new(mock_server.uri());
        let task = client.cancel(task_id, CancelActor::Sender).await.unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
    }

    #[test]
    fn test_stream_url() {
        let courier_id = Uuid::new_v4();
        let client = ApiClient::new("http://localhost:3000");
        let url = client.stream_url(courier_id).unwrap();
        assert_eq!(
            url.as_str(),
            format!("ws://localhost:3000/ws/tasks?courier_id={}", courier_id)
        );

        let secure = ApiClient::new("https://post.example.edu/").stream_url(courier_id).unwrap();
        assert_eq!(secure.scheme(), "wss");
    }
}
