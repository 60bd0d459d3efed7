//! Abstract capabilities consumed by the pipeline.
//!
//! The pipeline never talks to Gmail, Google Calendar, or the LLM
//! directly; it goes through these dyn-safe traits so tests (and
//! alternative providers) can swap in their own implementations.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AutomationError;
use crate::types::{
    CalendarEntry, DigestOutcome, EmailMessage, FetchWindow, Proposal, Rule, RuleEvaluation,
};

/// Mailbox operations: fetching recent messages and applying labels.
#[async_trait]
pub trait MailProvider: Send + Sync {
    async fn fetch_messages(
        &self,
        folder: &str,
        window: FetchWindow,
    ) -> Result<Vec<EmailMessage>, AutomationError>;

    /// Return the id of an existing label matching `name`
    /// case-insensitively, creating the label if absent.
    async fn ensure_label(&self, name: &str) -> Result<String, AutomationError>;

    /// Apply a label to a message. Re-applying an existing label is a
    /// no-op.
    async fn apply_label(&self, message_id: &str, label_id: &str)
        -> Result<(), AutomationError>;
}

/// Calendar operations: materializing proposals and snapshotting
/// upcoming events.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// Create a calendar event from a proposal; returns the event id.
    async fn create_event(&self, proposal: &Proposal) -> Result<String, AutomationError>;

    async fn list_events(&self, window: FetchWindow)
        -> Result<Vec<CalendarEntry>, AutomationError>;
}

/// LLM-backed judgment of an email against the active rule set.
///
/// One call covers the full rule set for one email. Transport failures
/// are `Err`; a reply that arrived but cannot be parsed is
/// `Ok(RuleEvaluation::Malformed)` so the caller can treat it as
/// no-match without conflating it with provider outages.
#[async_trait]
pub trait LabelOracle: Send + Sync {
    async fn evaluate(
        &self,
        email: &EmailMessage,
        rules: &[Rule],
    ) -> Result<RuleEvaluation, AutomationError>;
}

/// LLM-backed summary plus scheduling-proposal extraction for one email.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, email: &EmailMessage) -> Result<DigestOutcome, AutomationError>;
}

/// The full set of external collaborators a cycle needs.
#[derive(Clone)]
pub struct Collaborators {
    pub mail: Arc<dyn MailProvider>,
    pub calendar: Arc<dyn CalendarProvider>,
    pub oracle: Arc<dyn LabelOracle>,
    pub summarizer: Arc<dyn Summarizer>,
}
