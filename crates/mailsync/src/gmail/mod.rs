//! Gmail API integration
//!
//! This module provides:
//! - OAuth2 authentication and the access-token provider
//! - Gmail API transport for listing, history and metadata fetches
//! - Response normalization to domain models

mod auth;
mod client;
mod normalize;

pub use auth::{AccessTokenProvider, GmailAuth};
pub use client::GmailClient;
pub use normalize::{normalize_headers, parse_history_id};

/// Gmail API response types
pub mod api {
    use serde::{Deserialize, Serialize};

    /// Response from listing messages
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListMessagesResponse {
        pub messages: Option<Vec<MessageRef>>,
        pub next_page_token: Option<String>,
        pub result_size_estimate: Option<u32>,
    }

    /// Reference to a message (just ID and thread ID)
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        pub thread_id: Option<String>,
    }

    /// Response from the history endpoint
    ///
    /// `history_id` is the mailbox's current history id, encoded as a
    /// decimal string.
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryResponse {
        pub history: Option<Vec<HistoryRecord>>,
        pub next_page_token: Option<String>,
        pub history_id: Option<String>,
    }

    /// A single change-log entry
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryRecord {
        pub id: String,
        pub messages_added: Option<Vec<HistoryMessageAdded>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct HistoryMessageAdded {
        pub message: MessageRef,
    }

    /// Message fetched with `format=metadata`
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailMessage {
        pub id: String,
        pub thread_id: Option<String>,
        pub history_id: Option<String>,
        pub payload: Option<MessagePayload>,
    }

    /// Message payload containing headers
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePayload {
        pub headers: Option<Vec<Header>>,
        pub mime_type: Option<String>,
    }

    /// Email header (name-value pair)
    #[derive(Debug, Deserialize, Serialize)]
    pub struct Header {
        pub name: String,
        pub value: String,
    }

    /// Error body returned with non-2xx statuses
    #[derive(Debug, Deserialize)]
    pub struct ErrorResponse {
        pub error: ErrorBody,
    }

    #[derive(Debug, Deserialize)]
    pub struct ErrorBody {
        pub code: Option<u16>,
        pub message: Option<String>,
        pub errors: Option<Vec<ErrorDetail>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ErrorDetail {
        pub reason: Option<String>,
        pub domain: Option<String>,
    }

    /// Response from the profile endpoint
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ProfileResponse {
        pub email_address: String,
        pub messages_total: Option<u64>,
        pub threads_total: Option<u64>,
        pub history_id: String,
    }
}
