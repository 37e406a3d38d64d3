//! HTTP client for a remote replication engine
//!
//! The engine exposes a small JSON API:
//!
//! | Call              | Route                                  |
//! |-------------------|----------------------------------------|
//! | replicate         | `POST   /v1/replications`              |
//! | list artifacts    | `GET    /v1/entities/{id}/artifacts`   |
//! | delete artifact   | `DELETE /v1/artifacts/{id}`            |
//! | recreate          | `POST   /v1/recreations`               |
//!
//! Ids are percent-encoded as single path segments.
//!
//! 5xx, 408 and 429 responses and connection failures are transient; other
//! error statuses are permanent.

use crate::{DriverError, RecreateRequest, ReplicationDriver, ReplicationRequest, Result};
use async_trait::async_trait;
use drlogic_core_registry::ArtifactRef;
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
pub struct RecreateResponse {
    pub resource_id: String,
}

#[derive(Debug, Clone)]
pub struct HttpDriver {
    client: Client,
    base_url: Url,
}

impl HttpDriver {
    pub fn new(base_url: impl AsRef<str>, request_timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url.as_ref()).map_err(|e| {
            DriverError::Permanent(format!("invalid engine URL {}: {}", base_url.as_ref(), e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(DriverError::Permanent(format!(
                "engine URL {} cannot carry a path",
                base_url
            )));
        }

        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| DriverError::Permanent(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Base URL extended by `segments`, each escaped as one path segment
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                DriverError::Permanent(format!("engine URL {} cannot carry a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = if body.is_empty() {
            status.to_string()
        } else {
            format!("{}: {}", status, body)
        };

        Err(classify(status, detail))
    }
}

fn classify(status: StatusCode, detail: String) -> DriverError {
    if status == StatusCode::NOT_FOUND {
        DriverError::NotFound(detail)
    } else if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        DriverError::Transient(detail)
    } else {
        DriverError::Permanent(detail)
    }
}

fn transport(err: reqwest::Error) -> DriverError {
    if err.is_decode() {
        DriverError::Permanent(format!("malformed engine response: {}", err))
    } else {
        DriverError::Transient(err.to_string())
    }
}

#[async_trait]
impl ReplicationDriver for HttpDriver {
    fn name(&self) -> &str {
        "http"
    }

    async fn replicate(&self, request: &ReplicationRequest) -> Result<ArtifactRef> {
        debug!(
            entity = %request.entity_id,
            bandwidth = request.bandwidth.units(),
            "POST replication"
        );
        let response = self
            .client
            .post(self.endpoint(&["v1", "replications"])?)
            .json(request)
            .send()
            .await
            .map_err(transport)?;

        Self::check(response).await?.json().await.map_err(transport)
    }

    async fn list_artifacts(&self, entity_id: &str) -> Result<Vec<ArtifactRef>> {
        let response = self
            .client
            .get(self.endpoint(&["v1", "entities", entity_id, "artifacts"])?)
            .send()
            .await
            .map_err(transport)?;

        let mut artifacts: Vec<ArtifactRef> =
            Self::check(response).await?.json().await.map_err(transport)?;
        artifacts.sort_by_key(|a| a.created_at);
        Ok(artifacts)
    }

    async fn delete_artifact(&self, artifact: &ArtifactRef) -> Result<()> {
        let response = self
            .client
            .delete(self.endpoint(&["v1", "artifacts", artifact.id.as_str()])?)
            .send()
            .await
            .map_err(transport)?;

        match Self::check(response).await {
            Ok(_) | Err(DriverError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn recreate(&self, request: &RecreateRequest) -> Result<String> {
        let response = self
            .client
            .post(self.endpoint(&["v1", "recreations"])?)
            .json(request)
            .send()
            .await
            .map_err(transport)?;

        let body: RecreateResponse =
            Self::check(response).await?.json().await.map_err(transport)?;
        Ok(body.resource_id)
    }
}
