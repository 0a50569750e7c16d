//! REST client for the assessment backend.
//!
//! [`SessionBackend`] is the seam the controller talks through;
//! [`HttpBackend`] implements it (and [`DraftStore`]) over [`reqwest`]
//! with a bearer token.

use async_trait::async_trait;
use recruit_core::question::{Draft, Question, Response};
use recruit_core::session::SessionStatus;
use recruit_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::autosave::{DraftStore, PersistError};
use crate::config::SessionConfig;

/// Errors from the REST backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("Backend error ({status}): {body}")]
    Api {
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

/// Final outcome reported once per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub status: SessionStatus,
    pub answered: usize,
    pub total: usize,
    pub elapsed_secs: u64,
    pub completed_at: Timestamp,
}

#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn fetch_questions(&self, assessment_id: DbId) -> Result<Vec<Question>, BackendError>;

    async fn submit_response(
        &self,
        session_id: DbId,
        response: &Response,
    ) -> Result<(), BackendError>;

    async fn complete_session(
        &self,
        session_id: DbId,
        report: &CompletionReport,
    ) -> Result<(), BackendError>;
}

#[derive(Debug, Deserialize)]
struct QuestionsEnvelope {
    data: Vec<Question>,
}

/// HTTP implementation of [`SessionBackend`].
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBackend {
    /// Build a client with the configured request timeout.
    pub fn new(config: &SessionConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(
            client,
            config.backend_url.clone(),
            config.api_token.clone(),
        ))
    }

    /// Reuse an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: String, token: Option<String>) -> Self {
        Self {
            client,
            base_url,
            token,
        }
    }

    pub async fn save_draft(&self, session_id: DbId, draft: &Draft) -> Result<(), BackendError> {
        let request = self.client.put(format!(
            "{}/sessions/{}/drafts/{}",
            self.base_url, session_id, draft.question_id
        ));
        let response = self.authorize(request).json(draft).send().await?;
        Self::check_status(response).await
    }

    // ---- private helpers ----

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Ensure the response has a success status code, or turn it into a
    /// [`BackendError::Api`] carrying the status and body text.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(BackendError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, BackendError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    async fn check_status(response: reqwest::Response) -> Result<(), BackendError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionBackend for HttpBackend {
    async fn fetch_questions(&self, assessment_id: DbId) -> Result<Vec<Question>, BackendError> {
        let request = self.client.get(format!(
            "{}/assessments/{}/questions",
            self.base_url, assessment_id
        ));
        let response = self.authorize(request).send().await?;
        let envelope: QuestionsEnvelope = Self::parse_response(response).await?;
        Ok(envelope.data)
    }

    async fn submit_response(
        &self,
        session_id: DbId,
        response: &Response,
    ) -> Result<(), BackendError> {
        let request = self
            .client
            .post(format!("{}/sessions/{}/responses", self.base_url, session_id));
        let reply = self.authorize(request).json(response).send().await?;
        Self::check_status(reply).await
    }

    async fn complete_session(
        &self,
        session_id: DbId,
        report: &CompletionReport,
    ) -> Result<(), BackendError> {
        let request = self
            .client
            .post(format!("{}/sessions/{}/complete", self.base_url, session_id));
        let response = self.authorize(request).json(report).send().await?;
        Self::check_status(response).await
    }
}

#[async_trait]
impl DraftStore for HttpBackend {
    async fn persist(&self, session_id: DbId, draft: &Draft) -> Result<(), PersistError> {
        self.save_draft(session_id, draft)
            .await
            .map_err(|e| PersistError::Failed(e.to_string()))
    }
}
