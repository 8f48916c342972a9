//! HTTP client for the local collaborator agent.
//!
//! The agent is a separate process on localhost that writes the screenshot
//! to disk under the configured root folder and returns a generated prompt.
//! Errors are reported once; there is no automatic retry.

use serde::Deserialize;

use super::{DeliveryError, DeliveryReceipt, DeliverySink, SaveFeedbackRequest};

/// Default address of the local agent process.
pub const DEFAULT_AGENT_URL: &str = "http://localhost:3000";

/// Client for the agent's `/save-feedback` endpoint.
pub struct LocalAgentClient {
    base_url: String,
    http: reqwest::Client,
}

/// Response envelope: on success `requestId`/`screenshotPath`/`prompt` are
/// set, on failure `error` is.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveFeedbackResponse {
    success: bool,
    request_id: Option<String>,
    screenshot_path: Option<String>,
    prompt: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

impl LocalAgentClient {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_AGENT_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Check that the agent process is up; returns its status line.
    pub async fn health(&self) -> Result<String, DeliveryError> {
        let response = self.http.get(&self.base_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                message: "health check failed".to_string(),
            });
        }
        let health: HealthResponse = response
            .json()
            .await
            .map_err(|e| DeliveryError::MalformedResponse(e.to_string()))?;
        Ok(health.status)
    }
}

impl Default for LocalAgentClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliverySink for LocalAgentClient {
    async fn deliver(
        &self,
        request: SaveFeedbackRequest,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        log::info!(
            "Delivering feedback #{} to {} ({} bytes of image data)",
            request.request_id,
            self.base_url,
            request.image_data_url.len()
        );

        let response = self
            .http
            .post(format!("{}/save-feedback", self.base_url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body: SaveFeedbackResponse = response
            .json()
            .await
            .map_err(|e| DeliveryError::MalformedResponse(e.to_string()))?;

        if !status.is_success() || !body.success {
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                message: body.error.unwrap_or_else(|| "unspecified agent error".to_string()),
            });
        }

        match (body.request_id, body.screenshot_path, body.prompt) {
            (Some(request_id), Some(screenshot_path), Some(prompt)) => Ok(DeliveryReceipt {
                request_id,
                screenshot_path,
                prompt,
            }),
            _ => Err(DeliveryError::MalformedResponse(
                "success response missing requestId, screenshotPath, or prompt".to_string(),
            )),
        }
    }
}
