//! Shared test support: scripted collaborators and state fixtures.
//!
//! Compiled only for tests (see `lib.rs`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::capabilities::{CalendarProvider, Collaborators, LabelOracle, MailProvider, Summarizer};
use crate::config::Config;
use crate::error::AutomationError;
use crate::state::AppState;
use crate::types::{
    CalendarEntry, DigestOutcome, EmailDigest, EmailMessage, FetchWindow, Proposal,
    ProposalDraft, Rule, RuleEvaluation, RuleMatch,
};

// ============================================================================
// Fixtures
// ============================================================================

pub fn test_email(id: &str, from: &str, subject: &str, body: &str) -> EmailMessage {
    EmailMessage {
        id: id.to_string(),
        thread_id: format!("thread-{}", id),
        from: from.to_string(),
        subject: subject.to_string(),
        snippet: body.chars().take(40).collect(),
        received_at: Some("2026-08-04T09:00:00+00:00".to_string()),
        body: Some(body.to_string()),
    }
}

pub fn pending_proposal(source_email_id: &str, title: &str) -> Proposal {
    Proposal::from_draft(
        ProposalDraft {
            title: title.to_string(),
            start: "2026-08-11T15:00:00+00:00".to_string(),
            end: Some("2026-08-11T16:00:00+00:00".to_string()),
            location: None,
            notes: None,
            attendees: vec!["bob@example.com".to_string()],
        },
        source_email_id,
        "Extracted from test email.",
    )
}

pub fn draft(title: &str) -> ProposalDraft {
    ProposalDraft {
        title: title.to_string(),
        start: "2026-08-11T15:00:00+00:00".to_string(),
        end: None,
        location: None,
        notes: None,
        attendees: Vec::new(),
    }
}

/// AppState over a temp directory with test-friendly knobs.
pub fn test_state(dir: &std::path::Path) -> AppState {
    let config = Config {
        state_dir: dir.to_path_buf(),
        startup_delay_secs: 0,
        ..Config::default()
    };
    AppState::open(config).expect("open test state")
}

// ============================================================================
// Mail provider
// ============================================================================

#[derive(Default)]
pub struct MockMail {
    pub emails: Mutex<Vec<EmailMessage>>,
    pub fail_fetch: AtomicBool,
    pub fail_apply: AtomicBool,
    pub fetch_delay: Mutex<Option<Duration>>,
    pub ensure_calls: Mutex<Vec<String>>,
    pub apply_calls: Mutex<Vec<(String, String)>>,
    labels: Mutex<HashMap<String, String>>,
    label_seq: AtomicUsize,
}

impl MockMail {
    pub fn with_emails(emails: Vec<EmailMessage>) -> Self {
        Self {
            emails: Mutex::new(emails),
            ..Self::default()
        }
    }

    pub fn ensure_count(&self) -> usize {
        self.ensure_calls.lock().unwrap().len()
    }

    pub fn apply_count(&self) -> usize {
        self.apply_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl MailProvider for MockMail {
    async fn fetch_messages(
        &self,
        _folder: &str,
        _window: FetchWindow,
    ) -> Result<Vec<EmailMessage>, AutomationError> {
        let delay = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(AutomationError::TransientProvider("mail fetch down".into()));
        }
        Ok(self.emails.lock().unwrap().clone())
    }

    async fn ensure_label(&self, name: &str) -> Result<String, AutomationError> {
        self.ensure_calls.lock().unwrap().push(name.to_string());
        let mut labels = self.labels.lock().unwrap();
        if let Some(id) = labels.get(&name.to_lowercase()) {
            return Ok(id.clone());
        }
        let id = format!("lbl-{}", self.label_seq.fetch_add(1, Ordering::SeqCst) + 1);
        labels.insert(name.to_lowercase(), id.clone());
        Ok(id)
    }

    async fn apply_label(
        &self,
        message_id: &str,
        label_id: &str,
    ) -> Result<(), AutomationError> {
        if self.fail_apply.load(Ordering::SeqCst) {
            return Err(AutomationError::PermanentProvider(
                "message not found".into(),
            ));
        }
        self.apply_calls
            .lock()
            .unwrap()
            .push((message_id.to_string(), label_id.to_string()));
        Ok(())
    }
}

// ============================================================================
// Calendar provider
// ============================================================================

#[derive(Default)]
pub struct MockCalendar {
    calls: AtomicUsize,
    fail_next: AtomicBool,
    delay: Option<Duration>,
    pub upcoming: Mutex<Vec<CalendarEntry>>,
    pub fail_list: AtomicBool,
}

impl MockCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Make the next create_event call fail with a transient error.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CalendarProvider for MockCalendar {
    async fn create_event(&self, _proposal: &Proposal) -> Result<String, AutomationError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(AutomationError::TransientProvider(
                "calendar timeout".into(),
            ));
        }
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("evt-{}", n))
    }

    async fn list_events(
        &self,
        _window: FetchWindow,
    ) -> Result<Vec<CalendarEntry>, AutomationError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(AutomationError::TransientProvider(
                "calendar list down".into(),
            ));
        }
        Ok(self.upcoming.lock().unwrap().clone())
    }
}

// ============================================================================
// Oracle / summarizer
// ============================================================================

pub enum OracleScript {
    Matches(Vec<RuleMatch>),
    Malformed(String),
    TransportError,
}

/// Oracle whose verdicts are scripted per email id. Unscripted emails
/// get zero matches.
#[derive(Default)]
pub struct ScriptedOracle {
    scripts: Mutex<HashMap<String, OracleScript>>,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, email_id: &str, script: OracleScript) {
        self.scripts
            .lock()
            .unwrap()
            .insert(email_id.to_string(), script);
    }

    pub fn match_rule(&self, email_id: &str, rule: &Rule, confidence: f64) {
        self.script(
            email_id,
            OracleScript::Matches(vec![RuleMatch {
                rule_id: rule.id.clone(),
                confidence,
                explanation: "scripted".into(),
            }]),
        );
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LabelOracle for ScriptedOracle {
    async fn evaluate(
        &self,
        email: &EmailMessage,
        _rules: &[Rule],
    ) -> Result<RuleEvaluation, AutomationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.scripts.lock().unwrap().get(&email.id) {
            Some(OracleScript::Matches(matches)) => Ok(RuleEvaluation::Matched(matches.clone())),
            Some(OracleScript::Malformed(raw)) => Ok(RuleEvaluation::Malformed(raw.clone())),
            Some(OracleScript::TransportError) => Err(AutomationError::TransientProvider(
                "oracle unreachable".into(),
            )),
            None => Ok(RuleEvaluation::Matched(Vec::new())),
        }
    }
}

pub enum SummarizerScript {
    Digest(EmailDigest),
    Malformed(String),
    TransportError,
}

/// Summarizer with per-email scripted digests. Unscripted emails get an
/// empty digest.
#[derive(Default)]
pub struct ScriptedSummarizer {
    scripts: Mutex<HashMap<String, SummarizerScript>>,
    calls: AtomicUsize,
}

impl ScriptedSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, email_id: &str, script: SummarizerScript) {
        self.scripts
            .lock()
            .unwrap()
            .insert(email_id.to_string(), script);
    }

    pub fn digest(&self, email_id: &str, summary: &str, proposals: Vec<ProposalDraft>) {
        self.script(
            email_id,
            SummarizerScript::Digest(EmailDigest {
                summary: summary.to_string(),
                proposals,
            }),
        );
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for ScriptedSummarizer {
    async fn summarize(&self, email: &EmailMessage) -> Result<DigestOutcome, AutomationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.scripts.lock().unwrap().get(&email.id) {
            Some(SummarizerScript::Digest(digest)) => Ok(DigestOutcome::Parsed(digest.clone())),
            Some(SummarizerScript::Malformed(raw)) => Ok(DigestOutcome::Malformed(raw.clone())),
            Some(SummarizerScript::TransportError) => Err(AutomationError::TransientProvider(
                "summarizer unreachable".into(),
            )),
            None => Ok(DigestOutcome::Parsed(EmailDigest {
                summary: "(no summary)".into(),
                proposals: Vec::new(),
            })),
        }
    }
}

// ============================================================================
// Bundling
// ============================================================================

pub fn collaborators(
    mail: Arc<MockMail>,
    calendar: Arc<MockCalendar>,
    oracle: Arc<ScriptedOracle>,
    summarizer: Arc<ScriptedSummarizer>,
) -> Collaborators {
    Collaborators {
        mail,
        calendar,
        oracle,
        summarizer,
    }
}
