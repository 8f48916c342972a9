//! Delivery domain — packaging the final artifact for the local agent.
//!
//! The pipeline's side of the file-writing endpoint contract: build the
//! wire payload, encode the image as a data URL, parse the receipt. The
//! endpoint itself (folder creation, file writes, prompt generation) is an
//! external collaborator.

mod agent;

pub use agent::{LocalAgentClient, DEFAULT_AGENT_URL};

use std::future::Future;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

/// Prefix carried by PNG data URLs on the wire. The endpoint strips it
/// before decoding; [`strip_png_data_url`] mirrors that for tests and
/// local consumers.
pub const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// The final artifact of one capture action. Built once by the coordinator
/// and handed to delivery; the pipeline holds no copy afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: String,
    pub feedback_text: String,
    pub page_url: String,
    pub timestamp_ms: u64,
    pub image_data_url: String,
}

/// Wire request for `POST /save-feedback`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveFeedbackRequest {
    pub root_folder: String,
    pub feedback_text: String,
    pub image_data_url: String,
    pub request_id: String,
}

/// Successful endpoint response: where the screenshot landed plus the
/// generated prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub request_id: String,
    pub screenshot_path: String,
    pub prompt: String,
}

/// Where finished feedback records go. The production sink is
/// [`LocalAgentClient`]; tests record submissions in memory.
pub trait DeliverySink: Send + Sync + 'static {
    fn deliver(
        &self,
        request: SaveFeedbackRequest,
    ) -> impl Future<Output = Result<DeliveryReceipt, DeliveryError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Root folder path is not configured")]
    MissingRootFolder,

    #[error("Delivery request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Agent rejected the submission ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed agent response: {0}")]
    MalformedResponse(String),
}

/// Encode PNG bytes as a `data:image/png;base64,` URL.
pub fn png_data_url(png: &[u8]) -> String {
    format!("{PNG_DATA_URL_PREFIX}{}", STANDARD.encode(png))
}

/// Decode a base64 PNG payload, stripping the data-URL prefix if present.
pub fn strip_png_data_url(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let body = payload.strip_prefix(PNG_DATA_URL_PREFIX).unwrap_or(payload);
    STANDARD.decode(body)
}
