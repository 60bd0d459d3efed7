//! Gmail API v1 client implementing [`MailProvider`].
//!
//! Fetches recent messages (list + per-message full fetch, walking MIME
//! parts for a readable body) and manages labels. Label lookup is
//! cached per client; Gmail's `addLabelIds` modify call is naturally
//! idempotent, which is what the label applier relies on.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;

use crate::capabilities::MailProvider;
use crate::error::{classify_status, AutomationError};
use crate::retry::{send_with_retry, RetryPolicy};
use crate::types::{EmailMessage, FetchWindow};

const GMAIL_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageStub {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDetail {
    #[serde(default)]
    id: String,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    internal_date: Option<String>,
    #[serde(default)]
    payload: Option<MessagePayload>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePayload {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: Option<PayloadBody>,
    #[serde(default)]
    parts: Vec<MessagePayload>,
}

#[derive(Debug, Deserialize)]
struct Header {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayloadBody {
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelListResponse {
    #[serde(default)]
    labels: Vec<GmailLabel>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailLabel {
    id: String,
    name: String,
}

// ============================================================================
// Client
// ============================================================================

pub struct GmailMailbox {
    http: reqwest::Client,
    access_token: String,
    /// Lowercased label name -> label id, filled on first use.
    labels: tokio::sync::Mutex<Option<HashMap<String, String>>>,
}

impl GmailMailbox {
    pub fn new(access_token: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            http,
            access_token,
            labels: tokio::sync::Mutex::new(None),
        }
    }

    async fn fetch_message_detail(&self, message_id: &str) -> Result<EmailMessage, AutomationError> {
        let url = format!("{}/messages/{}", GMAIL_BASE, message_id);
        let resp = send_with_retry(
            self.http
                .get(&url)
                .bearer_auth(&self.access_token)
                .query(&[("format", "full")]),
            &RetryPolicy::default(),
        )
        .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status, "gmail message fetch"));
        }

        let detail: MessageDetail = resp
            .json()
            .await
            .map_err(|e| AutomationError::PermanentProvider(format!("gmail decode: {}", e)))?;
        Ok(detail_to_email(detail))
    }

    async fn fetch_label_map(&self) -> Result<HashMap<String, String>, AutomationError> {
        let resp = send_with_retry(
            self.http
                .get(format!("{}/labels", GMAIL_BASE))
                .bearer_auth(&self.access_token),
            &RetryPolicy::default(),
        )
        .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status, "gmail label list"));
        }

        let list: LabelListResponse = resp
            .json()
            .await
            .map_err(|e| AutomationError::PermanentProvider(format!("gmail decode: {}", e)))?;
        Ok(list
            .labels
            .into_iter()
            .map(|l| (l.name.to_lowercase(), l.id))
            .collect())
    }

    async fn create_label(&self, name: &str) -> Result<GmailLabel, AutomationError> {
        let body = serde_json::json!({
            "name": name,
            "labelListVisibility": "labelShow",
            "messageListVisibility": "show",
        });
        let resp = send_with_retry(
            self.http
                .post(format!("{}/labels", GMAIL_BASE))
                .bearer_auth(&self.access_token)
                .json(&body),
            &RetryPolicy::default(),
        )
        .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status, "gmail label create"));
        }
        resp.json()
            .await
            .map_err(|e| AutomationError::PermanentProvider(format!("gmail decode: {}", e)))
    }
}

#[async_trait]
impl MailProvider for GmailMailbox {
    async fn fetch_messages(
        &self,
        folder: &str,
        window: FetchWindow,
    ) -> Result<Vec<EmailMessage>, AutomationError> {
        let query = format!("in:{} newer_than:{}d", folder.to_lowercase(), window.days);
        let max_results = window.max_results.to_string();
        let resp = send_with_retry(
            self.http
                .get(format!("{}/messages", GMAIL_BASE))
                .bearer_auth(&self.access_token)
                .query(&[("q", query.as_str()), ("maxResults", max_results.as_str())]),
            &RetryPolicy::default(),
        )
        .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status, "gmail message list"));
        }

        let list: MessageListResponse = resp
            .json()
            .await
            .map_err(|e| AutomationError::PermanentProvider(format!("gmail decode: {}", e)))?;

        let mut emails = Vec::with_capacity(list.messages.len());
        for stub in &list.messages {
            match self.fetch_message_detail(&stub.id).await {
                Ok(email) => emails.push(email),
                Err(e) => {
                    log::debug!("Skipping message {}: {}", stub.id, e);
                    continue;
                }
            }
        }
        Ok(emails)
    }

    async fn ensure_label(&self, name: &str) -> Result<String, AutomationError> {
        let mut cache = self.labels.lock().await;
        if cache.is_none() {
            *cache = Some(self.fetch_label_map().await?);
        }
        let Some(map) = cache.as_mut() else {
            return Err(AutomationError::PermanentProvider(
                "gmail label cache unavailable".into(),
            ));
        };

        if let Some(id) = map.get(&name.to_lowercase()) {
            return Ok(id.clone());
        }

        let label = self.create_label(name).await?;
        map.insert(label.name.to_lowercase(), label.id.clone());
        Ok(label.id)
    }

    async fn apply_label(
        &self,
        message_id: &str,
        label_id: &str,
    ) -> Result<(), AutomationError> {
        let body = serde_json::json!({ "addLabelIds": [label_id] });
        let resp = send_with_retry(
            self.http
                .post(format!("{}/messages/{}/modify", GMAIL_BASE, message_id))
                .bearer_auth(&self.access_token)
                .json(&body),
            &RetryPolicy::default(),
        )
        .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status, "gmail label apply"));
        }
        Ok(())
    }
}

// ============================================================================
// Parsing helpers
// ============================================================================

fn detail_to_email(detail: MessageDetail) -> EmailMessage {
    let empty = MessagePayload::default();
    let payload = detail.payload.as_ref().unwrap_or(&empty);

    let get_header = |name: &str| -> String {
        payload
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.clone())
            .unwrap_or_default()
    };

    let body = extract_body_text(payload, "text/plain")
        .or_else(|| extract_body_text(payload, "text/html"));

    EmailMessage {
        id: detail.id,
        thread_id: detail.thread_id,
        from: get_header("From"),
        subject: get_header("Subject"),
        snippet: detail.snippet,
        received_at: detail.internal_date.as_deref().and_then(internal_date_to_rfc3339),
        body,
    }
}

/// Gmail's internalDate is milliseconds since epoch, as a string.
fn internal_date_to_rfc3339(internal: &str) -> Option<String> {
    let millis: i64 = internal.parse().ok()?;
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|t| t.to_rfc3339())
}

/// Recursively walk MIME parts to find body data of the target type.
fn extract_body_text(payload: &MessagePayload, target_mime: &str) -> Option<String> {
    if payload.mime_type == target_mime {
        if let Some(data) = payload.body.as_ref().and_then(|b| b.data.as_ref()) {
            return decode_url_safe_base64(data);
        }
    }
    for part in &payload.parts {
        if let Some(text) = extract_body_text(part, target_mime) {
            return Some(text);
        }
    }
    None
}

/// Decode URL-safe base64 (no padding) as used by the Gmail API.
fn decode_url_safe_base64(data: &str) -> Option<String> {
    use base64::Engine;
    match base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(data) {
        Ok(bytes) => String::from_utf8(bytes).ok(),
        Err(_) => None,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(text: &str) -> String {
        use base64::Engine;
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(text)
    }

    #[test]
    fn test_message_list_deserialization() {
        let json = r#"{"messages": [{"id": "msg1"}, {"id": "msg2"}]}"#;
        let resp: MessageListResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.messages.len(), 2);
        assert_eq!(resp.messages[0].id, "msg1");
    }

    #[test]
    fn test_message_list_empty() {
        let resp: MessageListResponse =
            serde_json::from_str(r#"{"resultSizeEstimate": 0}"#).unwrap();
        assert!(resp.messages.is_empty());
    }

    #[test]
    fn test_detail_to_email_with_plain_body() {
        let json = format!(
            r#"{{
                "id": "msg1",
                "threadId": "t1",
                "snippet": "Can we meet...",
                "internalDate": "1767225600000",
                "payload": {{
                    "mimeType": "multipart/alternative",
                    "headers": [
                        {{"name": "From", "value": "Alice <alice@example.com>"}},
                        {{"name": "Subject", "value": "Meeting request"}}
                    ],
                    "parts": [
                        {{"mimeType": "text/plain", "body": {{"data": "{}"}}}},
                        {{"mimeType": "text/html", "body": {{"data": "{}"}}}}
                    ]
                }}
            }}"#,
            b64("Can we meet Tuesday at 3pm?"),
            b64("<p>Can we meet Tuesday at 3pm?</p>"),
        );

        let detail: MessageDetail = serde_json::from_str(&json).unwrap();
        let email = detail_to_email(detail);

        assert_eq!(email.from, "Alice <alice@example.com>");
        assert_eq!(email.subject, "Meeting request");
        assert_eq!(email.body.as_deref(), Some("Can we meet Tuesday at 3pm?"));
        assert!(email.received_at.as_deref().unwrap().starts_with("2026-01-01"));
    }

    #[test]
    fn test_detail_to_email_html_fallback() {
        let json = format!(
            r#"{{
                "id": "msg1",
                "threadId": "t1",
                "snippet": "s",
                "payload": {{
                    "mimeType": "text/html",
                    "headers": [],
                    "body": {{"data": "{}"}}
                }}
            }}"#,
            b64("<b>html only</b>"),
        );

        let detail: MessageDetail = serde_json::from_str(&json).unwrap();
        let email = detail_to_email(detail);
        assert_eq!(email.body.as_deref(), Some("<b>html only</b>"));
    }

    #[test]
    fn test_detail_to_email_no_body() {
        let json = r#"{
            "id": "msg1",
            "threadId": "t1",
            "snippet": "attachment only",
            "payload": {
                "mimeType": "multipart/mixed",
                "headers": [{"name": "From", "value": "a@b.com"}],
                "parts": [{"mimeType": "application/pdf"}]
            }
        }"#;

        let detail: MessageDetail = serde_json::from_str(json).unwrap();
        let email = detail_to_email(detail);
        assert!(email.body.is_none());
        // Snippet remains the judging fallback.
        assert_eq!(email.judging_text(), "attachment only");
    }

    #[test]
    fn test_nested_part_extraction() {
        let json = format!(
            r#"{{
                "id": "m",
                "threadId": "t",
                "snippet": "",
                "payload": {{
                    "mimeType": "multipart/mixed",
                    "headers": [],
                    "parts": [
                        {{
                            "mimeType": "multipart/alternative",
                            "parts": [
                                {{"mimeType": "text/plain", "body": {{"data": "{}"}}}}
                            ]
                        }}
                    ]
                }}
            }}"#,
            b64("nested body"),
        );
        let detail: MessageDetail = serde_json::from_str(&json).unwrap();
        assert_eq!(detail_to_email(detail).body.as_deref(), Some("nested body"));
    }

    #[test]
    fn test_decode_url_safe_base64_invalid() {
        assert!(decode_url_safe_base64("!!not-base64!!").is_none());
    }

    #[test]
    fn test_internal_date_parse() {
        assert_eq!(
            internal_date_to_rfc3339("0").as_deref(),
            Some("1970-01-01T00:00:00+00:00")
        );
        assert!(internal_date_to_rfc3339("not-a-number").is_none());
    }

    #[test]
    fn test_label_map_is_case_insensitive() {
        let json = r#"{"labels": [
            {"id": "Label_1", "name": "Finance"},
            {"id": "Label_2", "name": "Travel"}
        ]}"#;
        let list: LabelListResponse = serde_json::from_str(json).unwrap();
        let map: HashMap<String, String> = list
            .labels
            .into_iter()
            .map(|l| (l.name.to_lowercase(), l.id))
            .collect();

        assert_eq!(map.get("finance").map(String::as_str), Some("Label_1"));
        assert_eq!(map.get("FINANCE".to_lowercase().as_str()).map(String::as_str), Some("Label_1"));
        assert!(map.get("unknown").is_none());
    }
}
