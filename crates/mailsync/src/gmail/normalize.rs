//! Gmail API response normalization
//!
//! Converts Gmail API responses to domain models.

use super::api::{GmailMessage, MessagePayload};
use crate::error::SyncError;
use crate::models::ItemHeaders;

/// Extract To/From/Subject from a metadata-format message
///
/// Missing headers become empty strings; a message without a payload has
/// no headers at all.
pub fn normalize_headers(message: &GmailMessage) -> ItemHeaders {
    let Some(payload) = message.payload.as_ref() else {
        return ItemHeaders::default();
    };

    ItemHeaders {
        to: extract_header(payload, "To").unwrap_or_default(),
        from: extract_header(payload, "From").unwrap_or_default(),
        subject: extract_header(payload, "Subject").unwrap_or_default(),
    }
}

/// Parse Gmail's decimal-string history id
pub fn parse_history_id(raw: &str) -> Result<u64, SyncError> {
    raw.trim()
        .parse()
        .map_err(|_| SyncError::malformed(format!("invalid history id {:?}", raw)))
}

/// Extract a header value by name
fn extract_header(payload: &MessagePayload, name: &str) -> Option<String> {
    payload.headers.as_ref()?.iter().find_map(|h| {
        if h.name.eq_ignore_ascii_case(name) {
            Some(h.value.clone())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::gmail::api::Header;

    fn make_message(headers: Vec<(&str, &str)>) -> GmailMessage {
        GmailMessage {
            id: "m1".to_string(),
            thread_id: Some("t1".to_string()),
            history_id: Some("100".to_string()),
            payload: Some(MessagePayload {
                headers: Some(
                    headers
                        .into_iter()
                        .map(|(name, value)| Header {
                            name: name.to_string(),
                            value: value.to_string(),
                        })
                        .collect(),
                ),
                mime_type: Some("text/plain".to_string()),
            }),
        }
    }

    #[test]
    fn test_normalize_headers() {
        let msg = make_message(vec![
            ("From", "John Doe <john@example.com>"),
            ("To", "me@example.com"),
            ("Subject", "Test Subject"),
        ]);

        let headers = normalize_headers(&msg);
        assert_eq!(headers.from, "John Doe <john@example.com>");
        assert_eq!(headers.to, "me@example.com");
        assert_eq!(headers.subject, "Test Subject");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let msg = make_message(vec![("subject", "lower"), ("FROM", "upper@example.com")]);

        let headers = normalize_headers(&msg);
        assert_eq!(headers.subject, "lower");
        assert_eq!(headers.from, "upper@example.com");
        assert_eq!(headers.to, "");
    }

    #[test]
    fn test_missing_payload() {
        let msg = GmailMessage {
            id: "m1".to_string(),
            thread_id: None,
            history_id: None,
            payload: None,
        };
        assert_eq!(normalize_headers(&msg), ItemHeaders::default());
    }

    #[test]
    fn test_deserialize_metadata_message() {
        let json = r#"{
            "id": "18c1",
            "threadId": "18c0",
            "historyId": "4242",
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": [
                    { "name": "Subject", "value": "Lunch?" },
                    { "name": "From", "value": "a@example.com" }
                ]
            }
        }"#;

        let msg: GmailMessage = serde_json::from_str(json).unwrap();
        let headers = normalize_headers(&msg);
        assert_eq!(headers.subject, "Lunch?");
        assert_eq!(headers.to, "");
    }

    #[test]
    fn test_parse_history_id() {
        assert_eq!(parse_history_id("12345").unwrap(), 12345);
        assert_eq!(parse_history_id(" 7 ").unwrap(), 7);
        assert_eq!(parse_history_id("abc").unwrap_err().kind(), ErrorKind::Fatal);
        assert!(parse_history_id("-1").is_err());
    }
}
