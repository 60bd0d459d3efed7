//! Google Calendar API v3 client implementing [`CalendarProvider`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::capabilities::CalendarProvider;
use crate::error::{classify_status, AutomationError};
use crate::retry::{send_with_retry, RetryPolicy};
use crate::types::{CalendarEntry, FetchWindow, Proposal};

const CALENDAR_BASE: &str = "https://www.googleapis.com/calendar/v3/calendars/primary";

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<GoogleEventRaw>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEventRaw {
    #[serde(default)]
    id: String,
    #[serde(default)]
    summary: Option<String>,
    start: Option<EventDateTime>,
    end: Option<EventDateTime>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventDateTime {
    date_time: Option<String>,
    date: Option<String>,
}

impl EventDateTime {
    fn as_str(&self) -> &str {
        self.date_time
            .as_deref()
            .or(self.date.as_deref())
            .unwrap_or("")
    }
}

#[derive(Debug, Deserialize)]
struct CreatedEvent {
    id: String,
}

// ============================================================================
// Client
// ============================================================================

pub struct GoogleCalendar {
    http: reqwest::Client,
    access_token: String,
}

impl GoogleCalendar {
    pub fn new(access_token: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { http, access_token }
    }
}

#[async_trait]
impl CalendarProvider for GoogleCalendar {
    async fn create_event(&self, proposal: &Proposal) -> Result<String, AutomationError> {
        let end = proposal
            .end
            .clone()
            .unwrap_or_else(|| default_end(&proposal.start));

        let mut body = serde_json::json!({
            "summary": proposal.title,
            "description": proposal.notes.clone().unwrap_or_default(),
            "start": { "dateTime": proposal.start },
            "end": { "dateTime": end },
        });
        if let Some(location) = &proposal.location {
            body["location"] = serde_json::json!(location);
        }
        if !proposal.attendees.is_empty() {
            body["attendees"] = serde_json::json!(proposal
                .attendees
                .iter()
                .map(|a| serde_json::json!({ "email": a }))
                .collect::<Vec<_>>());
        }

        let resp = send_with_retry(
            self.http
                .post(format!("{}/events", CALENDAR_BASE))
                .bearer_auth(&self.access_token)
                .query(&[("sendUpdates", "none")])
                .json(&body),
            &RetryPolicy::default(),
        )
        .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status, "calendar event insert"));
        }

        let created: CreatedEvent = resp
            .json()
            .await
            .map_err(|e| AutomationError::PermanentProvider(format!("calendar decode: {}", e)))?;
        log::info!("Created calendar event id={}", created.id);
        Ok(created.id)
    }

    async fn list_events(
        &self,
        window: FetchWindow,
    ) -> Result<Vec<CalendarEntry>, AutomationError> {
        let now = Utc::now();
        let time_min = now.to_rfc3339();
        let time_max = (now + chrono::Duration::days(window.days as i64)).to_rfc3339();

        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(format!("{}/events", CALENDAR_BASE))
                .bearer_auth(&self.access_token)
                .query(&[
                    ("timeMin", time_min.as_str()),
                    ("timeMax", time_max.as_str()),
                    ("singleEvents", "true"),
                    ("orderBy", "startTime"),
                    ("maxResults", "250"),
                ]);
            if let Some(ref token) = page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let resp = send_with_retry(request, &RetryPolicy::default()).await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(classify_status(status, "calendar event list"));
            }

            let body: EventListResponse = resp.json().await.map_err(|e| {
                AutomationError::PermanentProvider(format!("calendar decode: {}", e))
            })?;

            for item in body.items {
                if item.status.as_deref() == Some("cancelled") {
                    continue;
                }
                entries.push(CalendarEntry {
                    id: item.id,
                    summary: item.summary.unwrap_or_else(|| "(No title)".to_string()),
                    start: item.start.as_ref().map(EventDateTime::as_str).unwrap_or("").to_string(),
                    end: item.end.as_ref().map(EventDateTime::as_str).unwrap_or("").to_string(),
                });
                if entries.len() >= window.max_results as usize {
                    return Ok(entries);
                }
            }

            page_token = body.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        Ok(entries)
    }
}

/// Default event duration when the proposal has no end: one hour after
/// start. Falls back to the start itself when start is unparseable and
/// lets the provider report the bad datetime.
fn default_end(start: &str) -> String {
    match DateTime::parse_from_rfc3339(start) {
        Ok(t) => (t + chrono::Duration::hours(1)).to_rfc3339(),
        Err(_) => start.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_end_adds_one_hour() {
        assert_eq!(
            default_end("2026-08-11T10:00:00+08:00"),
            "2026-08-11T11:00:00+08:00"
        );
    }

    #[test]
    fn test_default_end_unparseable_start() {
        assert_eq!(default_end("next tuesday"), "next tuesday");
    }

    #[test]
    fn test_event_list_deserialization() {
        let json = r#"{
            "items": [
                {
                    "id": "evt1",
                    "summary": "Q4 roadmap sync",
                    "start": {"dateTime": "2026-08-11T10:00:00+08:00"},
                    "end": {"dateTime": "2026-08-11T11:00:00+08:00"}
                },
                {
                    "id": "evt2",
                    "start": {"date": "2026-08-12"},
                    "end": {"date": "2026-08-13"},
                    "status": "cancelled"
                }
            ],
            "nextPageToken": "tok"
        }"#;

        let resp: EventListResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.items.len(), 2);
        assert_eq!(resp.items[0].start.as_ref().unwrap().as_str(), "2026-08-11T10:00:00+08:00");
        // All-day events carry a date, not a dateTime.
        assert_eq!(resp.items[1].start.as_ref().unwrap().as_str(), "2026-08-12");
        assert_eq!(resp.next_page_token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_created_event_deserialization() {
        let created: CreatedEvent = serde_json::from_str(r#"{"id": "evt-xyz"}"#).unwrap();
        assert_eq!(created.id, "evt-xyz");
    }
}
