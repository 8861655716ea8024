//! Gmail API HTTP client
//!
//! Implements [`MailboxTransport`] over the Gmail REST API.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use log::debug;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::api::{
    ErrorResponse, GmailMessage, HistoryResponse, ListMessagesResponse, ProfileResponse,
};
use super::{AccessTokenProvider, normalize_headers, parse_history_id};
use crate::config::SyncSettings;
use crate::error::{CallSite, SyncError, classify_status, classify_status_with_reason};
use crate::models::{ItemHeaders, MessageId};
use crate::sync::SyncContext;
use crate::transport::{ChangePage, ListPage, MailboxTransport};

/// Headers requested for each message
const METADATA_HEADERS: [&str; 3] = ["To", "From", "Subject"];

/// Gmail API client used as the sync transport
pub struct GmailClient {
    auth: Arc<dyn AccessTokenProvider>,
    agent: ureq::Agent,
    base_url: String,
    page_size: u32,
    label: Option<String>,
    timeout: Duration,
}

impl GmailClient {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    /// Create a new Gmail client
    pub fn new(auth: Arc<dyn AccessTokenProvider>, settings: &SyncSettings) -> Self {
        let timeout = settings.request_timeout();
        // Error statuses are classified from their body, not by ureq
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();

        Self {
            auth,
            agent,
            base_url: Self::BASE_URL.to_string(),
            page_size: settings.effective_page_size(),
            label: settings.label.clone(),
            timeout,
        }
    }

    /// Point the client at a different API root
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, SyncError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| SyncError::Fatal(format!("invalid base URL {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| SyncError::Fatal(format!("base URL {} cannot be a base", self.base_url)))?
            .extend(["users", "me"])
            .extend(segments);
        Ok(url)
    }

    fn messages_url(&self, page_token: Option<&str>) -> Result<Url, SyncError> {
        let mut url = self.endpoint(&["messages"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("maxResults", &self.page_size.to_string());
            if let Some(label) = &self.label {
                query.append_pair("labelIds", label);
            }
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }
        Ok(url)
    }

    fn history_url(&self, since: u64, page_token: Option<&str>) -> Result<Url, SyncError> {
        let mut url = self.endpoint(&["history"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("startHistoryId", &since.to_string());
            query.append_pair("historyTypes", "messageAdded");
            query.append_pair("maxResults", &self.page_size.to_string());
            if let Some(label) = &self.label {
                query.append_pair("labelId", label);
            }
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }
        Ok(url)
    }

    fn message_url(&self, id: &MessageId) -> Result<Url, SyncError> {
        let mut url = self.endpoint(&["messages", id.as_str()])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("format", "metadata");
            for header in METADATA_HEADERS {
                query.append_pair("metadataHeaders", header);
            }
        }
        Ok(url)
    }

    /// GET `url` and decode the JSON body, classifying any failure
    fn get_json<T: DeserializeOwned>(
        &self,
        ctx: &SyncContext,
        url: Url,
        site: CallSite,
        what: &str,
    ) -> Result<T, SyncError> {
        ctx.check()?;

        let access_token = self
            .auth
            .access_token()
            .map_err(|e| SyncError::AuthorizationRequired(format!("{:#}", e)))?;

        let mut request = self
            .agent
            .get(url.as_str())
            .header("Authorization", &format!("Bearer {}", access_token));

        // Never wait past the cycle's deadline
        if let Some(remaining) = ctx.remaining() {
            request = request
                .config()
                .timeout_global(Some(remaining.min(self.timeout)))
                .build();
        }

        let result = request.call();
        ctx.check()?;

        let mut response = result.map_err(|err| classify_transport_error(&err, site, what))?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            return Err(classify_error_body(status, &body, site, what));
        }

        response
            .body_mut()
            .read_json::<T>()
            .map_err(|e| SyncError::malformed(format!("{}: {}", what, e)))
    }
}

impl MailboxTransport for GmailClient {
    fn list_items(
        &self,
        ctx: &SyncContext,
        page_token: Option<&str>,
    ) -> Result<ListPage, SyncError> {
        let url = self.messages_url(page_token)?;
        let response: ListMessagesResponse =
            self.get_json(ctx, url, CallSite::Listing, "list messages")?;
        let page = list_page(response);
        debug!(
            "[GMAIL] Listed {} messages (more: {})",
            page.ids.len(),
            page.next_page_token.is_some()
        );
        Ok(page)
    }

    fn list_changes(
        &self,
        ctx: &SyncContext,
        since: u64,
        page_token: Option<&str>,
    ) -> Result<ChangePage, SyncError> {
        let url = self.history_url(since, page_token)?;
        let response: HistoryResponse =
            self.get_json(ctx, url, CallSite::Changes, "list history")?;
        let page = change_page(response)?;
        debug!(
            "[GMAIL] History since {}: {} added, history id {:?}",
            since,
            page.added.len(),
            page.max_sequence
        );
        Ok(page)
    }

    fn get_item_headers(
        &self,
        ctx: &SyncContext,
        id: &MessageId,
    ) -> Result<ItemHeaders, SyncError> {
        let url = self.message_url(id)?;
        let message: GmailMessage = self.get_json(ctx, url, CallSite::Detail, "get message")?;
        Ok(normalize_headers(&message))
    }

    fn get_current_sequence(&self, ctx: &SyncContext) -> Result<u64, SyncError> {
        let url = self.endpoint(&["profile"])?;
        let profile: ProfileResponse = self.get_json(ctx, url, CallSite::Profile, "get profile")?;
        debug!(
            "[GMAIL] Profile {} at history id {}",
            profile.email_address, profile.history_id
        );
        parse_history_id(&profile.history_id)
    }
}

/// Convert a messages.list response; the listing carries no history id
fn list_page(response: ListMessagesResponse) -> ListPage {
    ListPage {
        ids: response
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|m| MessageId::new(m.id))
            .collect(),
        next_page_token: response.next_page_token,
        sequence: None,
    }
}

/// Convert a history.list response into added ids and the reported history id
fn change_page(response: HistoryResponse) -> Result<ChangePage, SyncError> {
    let max_sequence = response
        .history_id
        .as_deref()
        .map(parse_history_id)
        .transpose()?;

    let added = response
        .history
        .unwrap_or_default()
        .into_iter()
        .flat_map(|record| record.messages_added.unwrap_or_default())
        .map(|added| MessageId::new(added.message.id))
        .collect();

    Ok(ChangePage {
        added,
        next_page_token: response.next_page_token,
        max_sequence,
    })
}

/// Classify a non-2xx response using the first error reason in its body
fn classify_error_body(status: u16, body: &str, site: CallSite, what: &str) -> SyncError {
    let reason = serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|response| response.error.errors)
        .and_then(|errors| errors.into_iter().find_map(|detail| detail.reason));
    debug!("[GMAIL] {} failed with HTTP {} ({:?})", what, status, reason);
    classify_status_with_reason(status, reason.as_deref(), site, what)
}

fn classify_transport_error(err: &ureq::Error, site: CallSite, what: &str) -> SyncError {
    match err {
        ureq::Error::StatusCode(status) => classify_status(*status, site, what),
        ureq::Error::Timeout(_) => SyncError::RetryLater(format!("{}: {}", what, err)),
        _ => SyncError::Fatal(format!("{}: {}", what, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    struct StaticToken;

    impl AccessTokenProvider for StaticToken {
        fn access_token(&self) -> anyhow::Result<String> {
            Ok("token".to_string())
        }
    }

    struct NoToken;

    impl AccessTokenProvider for NoToken {
        fn access_token(&self) -> anyhow::Result<String> {
            anyhow::bail!("no token")
        }
    }

    fn client() -> GmailClient {
        GmailClient::new(Arc::new(StaticToken), &SyncSettings::default())
    }

    #[test]
    fn test_messages_url() {
        let url = client().messages_url(Some("next")).unwrap();
        assert_eq!(
            url.as_str(),
            "https://gmail.googleapis.com/gmail/v1/users/me/messages?maxResults=500&labelIds=INBOX&pageToken=next"
        );
    }

    #[test]
    fn test_history_url_without_label() {
        let settings = SyncSettings {
            label: None,
            page_size: 100,
            ..SyncSettings::default()
        };
        let client = GmailClient::new(Arc::new(StaticToken), &settings);
        let url = client.history_url(42, None).unwrap();
        assert_eq!(
            url.as_str(),
            "https://gmail.googleapis.com/gmail/v1/users/me/history?startHistoryId=42&historyTypes=messageAdded&maxResults=100"
        );
    }

    #[test]
    fn test_message_url_escapes_id() {
        let url = client().message_url(&MessageId::new("a/b")).unwrap();
        assert!(url.path().ends_with("/users/me/messages/a%2Fb"));
        assert_eq!(
            url.query(),
            Some("format=metadata&metadataHeaders=To&metadataHeaders=From&metadataHeaders=Subject")
        );
    }

    #[test]
    fn test_with_base_url() {
        let client = client().with_base_url("http://localhost:9000/gmail/v1/");
        let url = client.endpoint(&["profile"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:9000/gmail/v1/users/me/profile");
    }

    #[test]
    fn test_change_page_collects_added_ids() {
        let json = r#"{
            "history": [
                { "id": "101", "messagesAdded": [ { "message": { "id": "m1", "threadId": "t1" } } ] },
                { "id": "102" },
                { "id": "103", "messagesAdded": [
                    { "message": { "id": "m2", "threadId": "t2", "labelIds": ["INBOX"] } },
                    { "message": { "id": "m3", "threadId": "t2" } }
                ] }
            ],
            "nextPageToken": "p2",
            "historyId": "110"
        }"#;

        let response: HistoryResponse = serde_json::from_str(json).unwrap();
        let page = change_page(response).unwrap();

        let ids: Vec<&str> = page.added.iter().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
        assert_eq!(page.next_page_token.as_deref(), Some("p2"));
        assert_eq!(page.max_sequence, Some(110));
    }

    #[test]
    fn test_change_page_without_history() {
        let response: HistoryResponse = serde_json::from_str(r#"{ "historyId": "7" }"#).unwrap();
        let page = change_page(response).unwrap();
        assert!(page.added.is_empty());
        assert_eq!(page.max_sequence, Some(7));
    }

    #[test]
    fn test_change_page_malformed_history_id() {
        let response: HistoryResponse =
            serde_json::from_str(r#"{ "historyId": "not-a-number" }"#).unwrap();
        assert_eq!(change_page(response).unwrap_err().kind(), ErrorKind::Fatal);
    }

    #[test]
    fn test_list_page() {
        let json = r#"{
            "messages": [ { "id": "a", "threadId": "t" }, { "id": "b", "threadId": "t" } ],
            "nextPageToken": "n",
            "resultSizeEstimate": 2
        }"#;
        let response: ListMessagesResponse = serde_json::from_str(json).unwrap();
        let page = list_page(response);
        assert_eq!(page.ids, vec![MessageId::new("a"), MessageId::new("b")]);
        assert_eq!(page.sequence, None);

        let empty: ListMessagesResponse =
            serde_json::from_str(r#"{ "resultSizeEstimate": 0 }"#).unwrap();
        assert!(list_page(empty).ids.is_empty());
    }

    #[test]
    fn test_classify_transport_error() {
        let err = classify_transport_error(&ureq::Error::StatusCode(404), CallSite::Changes, "h");
        assert_eq!(err, SyncError::ResyncRequired);

        let err = classify_transport_error(&ureq::Error::StatusCode(401), CallSite::Detail, "m");
        assert_eq!(err.kind(), ErrorKind::AuthorizationRequired);

        let io = ureq::Error::Io(std::io::Error::other("connection reset"));
        let err = classify_transport_error(&io, CallSite::Listing, "l");
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }

    #[test]
    fn test_forbidden_rate_limit_body_is_retry_later() {
        let body = r#"{
            "error": {
                "code": 403,
                "message": "User-rate limit exceeded.",
                "errors": [
                    { "message": "User-rate limit exceeded.", "domain": "usageLimits", "reason": "userRateLimitExceeded" }
                ],
                "status": "PERMISSION_DENIED"
            }
        }"#;
        let err = classify_error_body(403, body, CallSite::Detail, "get message");
        assert_eq!(err.kind(), ErrorKind::RetryLater);

        let body = body.replace("userRateLimitExceeded", "rateLimitExceeded");
        let err = classify_error_body(403, &body, CallSite::Changes, "list history");
        assert_eq!(err.kind(), ErrorKind::RetryLater);
    }

    #[test]
    fn test_forbidden_permission_body_is_authorization() {
        let body = r#"{
            "error": {
                "code": 403,
                "message": "Request had insufficient authentication scopes.",
                "errors": [ { "domain": "global", "reason": "insufficientPermissions" } ]
            }
        }"#;
        let err = classify_error_body(403, body, CallSite::Detail, "get message");
        assert_eq!(err.kind(), ErrorKind::AuthorizationRequired);

        // Unparsable bodies fall back to the status alone
        let err = classify_error_body(403, "<html>Forbidden</html>", CallSite::Detail, "m");
        assert_eq!(err.kind(), ErrorKind::AuthorizationRequired);
        let err = classify_error_body(404, "", CallSite::Changes, "h");
        assert_eq!(err, SyncError::ResyncRequired);
    }

    #[test]
    fn test_missing_token_is_authorization_required() {
        let client = GmailClient::new(Arc::new(NoToken), &SyncSettings::default());
        let err = client.get_current_sequence(&SyncContext::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthorizationRequired);
    }

    #[test]
    fn test_cancelled_context_skips_request() {
        let ctx = SyncContext::new();
        ctx.cancel();
        let err = client().list_items(&ctx, None).unwrap_err();
        assert_eq!(err, SyncError::cancelled());
    }
}
