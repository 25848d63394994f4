// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! reqwest-backed [`RemoteApi`].

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::traits::RemoteApi;
use crate::config::SyncConfig;
use crate::error::RemoteError;
use crate::task::{StatusChange, Task, TaskId, TaskPatch, TaskPayload};

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

pub struct HttpRemote {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemote {
    pub fn new(config: &SyncConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| RemoteError::Transient(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Attach a bearer token to every request.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = self.authorized(request).send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), body = %body, "Request failed");
        Err(RemoteError::from_status(status.as_u16(), error_message(status, body)))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RemoteError> {
        let response = self.send(request).await?;
        let status = response.status().as_u16();
        // A 2xx was applied server-side; retry to read the result.
        response.json::<T>().await.map_err(|e| {
            debug!(status, error = %e, "Unreadable success body");
            RemoteError::Transient(format!("unreadable {} response body: {}", status, e))
        })
    }
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    RemoteError::Transient(err.to_string())
}

fn error_message(status: StatusCode, body: String) -> String {
    if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("unknown error").to_string()
    } else {
        body
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    #[instrument(skip(self))]
    async fn list_tasks(&self) -> Result<Vec<Task>, RemoteError> {
        self.send_json(self.client.get(self.url("/tasks"))).await
    }

    #[instrument(skip(self))]
    async fn get_task(&self, id: TaskId) -> Result<Task, RemoteError> {
        self.send_json(self.client.get(self.url(&format!("/tasks/{}", id)))).await
    }

    #[instrument(skip(self, payload))]
    async fn create_task(&self, payload: &TaskPayload, idempotency_key: Uuid) -> Result<Task, RemoteError> {
        let request = self
            .client
            .post(self.url("/tasks"))
            .header(IDEMPOTENCY_HEADER, idempotency_key.to_string())
            .json(payload);
        self.send_json(request).await
    }

    #[instrument(skip(self, patch))]
    async fn update_task(&self, id: TaskId, patch: &TaskPatch) -> Result<Task, RemoteError> {
        self.send_json(self.client.put(self.url(&format!("/tasks/{}", id))).json(patch)).await
    }

    #[instrument(skip(self, change))]
    async fn set_status(&self, id: TaskId, change: &StatusChange) -> Result<Task, RemoteError> {
        self.send_json(self.client.put(self.url(&format!("/tasks/{}/status", id))).json(change))
            .await
    }

    #[instrument(skip(self))]
    async fn delete_task(&self, id: TaskId) -> Result<(), RemoteError> {
        self.send(self.client.delete(self.url(&format!("/tasks/{}", id)))).await?;
        Ok(())
    }
}
