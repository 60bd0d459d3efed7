//! Core entity types shared across the automation pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Mailbox
// ============================================================================

/// A simplified email pulled from the mail provider.
///
/// `body` is best-effort: messages whose MIME tree yields no readable
/// text keep `None` and downstream consumers fall back to
/// subject + sender + snippet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    pub from: String,
    pub subject: String,
    #[serde(default)]
    pub snippet: String,
    /// RFC 3339 receive time, when the provider exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl EmailMessage {
    /// The text handed to LLM-backed capabilities: full body when
    /// readable, snippet otherwise.
    pub fn judging_text(&self) -> &str {
        match &self.body {
            Some(body) if !body.trim().is_empty() => body,
            _ => &self.snippet,
        }
    }
}

/// Fetch bounds for mailbox and calendar snapshots.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FetchWindow {
    /// Lookback in days.
    pub days: u32,
    /// Cap on items fetched.
    pub max_results: u32,
}

// ============================================================================
// Rules
// ============================================================================

/// A user-defined auto-label rule.
///
/// `label` is the tag to apply; `reason` is the free-text criterion the
/// oracle judges the email against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    pub label: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl Rule {
    pub fn new(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            label: label.into(),
            reason: reason.into(),
            created_at: Utc::now(),
        }
    }
}

/// A single rule the oracle judged as matching, with its confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMatch {
    pub rule_id: String,
    pub confidence: f64,
    #[serde(default)]
    pub explanation: String,
}

/// Tagged outcome of a rule evaluation. The oracle's output is
/// untrusted, so an unparseable reply is carried as `Malformed` rather
/// than guessed at.
#[derive(Debug, Clone)]
pub enum RuleEvaluation {
    Matched(Vec<RuleMatch>),
    Malformed(String),
}

// ============================================================================
// Proposals
// ============================================================================

/// A scheduling intent as returned by the summarizer, before it is
/// persisted as a [`Proposal`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalDraft {
    pub title: String,
    /// ISO 8601 start datetime.
    pub start: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub attendees: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Pending,
    Accepted,
    Rejected,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Accepted => "accepted",
            ProposalStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ProposalStatus::Pending),
            "accepted" => Some(ProposalStatus::Accepted),
            "rejected" => Some(ProposalStatus::Rejected),
            _ => None,
        }
    }
}

/// A persisted calendar-event proposal.
///
/// Lifecycle: created `pending` by extraction, then exactly one
/// transition to `accepted` (carries `event_id`) or `rejected`. Both
/// end states are terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: String,
    pub title: String,
    pub start: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub attendees: Vec<String>,
    pub source_email_id: String,
    pub source_summary: String,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

impl Proposal {
    /// Build a pending proposal from a summarizer draft.
    pub fn from_draft(draft: ProposalDraft, source_email_id: &str, source_summary: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            title: draft.title,
            start: draft.start,
            end: draft.end,
            location: draft.location,
            notes: draft.notes,
            attendees: draft.attendees,
            source_email_id: source_email_id.to_string(),
            source_summary: source_summary.to_string(),
            status: ProposalStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
            event_id: None,
        }
    }
}

/// Summarizer output for one email.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailDigest {
    /// One-line human-readable summary.
    #[serde(rename = "text")]
    pub summary: String,
    #[serde(default)]
    pub proposals: Vec<ProposalDraft>,
}

/// Tagged outcome of a summarize call, mirroring [`RuleEvaluation`].
#[derive(Debug, Clone)]
pub enum DigestOutcome {
    Parsed(EmailDigest),
    Malformed(String),
}

// ============================================================================
// Calendar
// ============================================================================

/// A normalized calendar event for the calendar snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEntry {
    pub id: String,
    pub summary: String,
    pub start: String,
    pub end: String,
}

// ============================================================================
// Dedup ledger
// ============================================================================

/// The two pipeline concerns tracked independently per email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Concern {
    Label,
    Proposal,
}

impl Concern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Concern::Label => "label",
            Concern::Proposal => "proposal",
        }
    }
}

// ============================================================================
// Status & observability
// ============================================================================

/// Snapshot of the automation status surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationStatus {
    pub automation_enabled: bool,
    pub auto_add_events: bool,
    pub running_now: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub last_labeled_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: ActivityLevel,
    pub message: String,
}

// ============================================================================
// Cycle
// ============================================================================

/// What kicked off a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleTrigger {
    Scheduled,
    Manual,
}

impl CycleTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleTrigger::Scheduled => "scheduled",
            CycleTrigger::Manual => "manual",
        }
    }
}

/// Counters from one completed cycle.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub labeled_emails: u32,
    pub proposals_created: u32,
    /// Stage errors that were contained rather than fatal.
    pub stage_errors: Vec<String>,
}
