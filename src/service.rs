//! Application surface: the handle an embedding application (HTTP
//! layer, GUI, CLI) uses to drive the automation pipeline.
//!
//! Everything returns the entity shapes from `types` directly. State
//! transitions on proposals go through the store's compare-and-set
//! paths, so user actions stay race-safe against an in-flight cycle.

use std::sync::Arc;

use crate::capabilities::Collaborators;
use crate::cycle::run_cycle;
use crate::error::AutomationError;
use crate::state::AppState;
use crate::types::{
    ActivityLogEntry, AutomationStatus, CycleReport, CycleTrigger, Proposal, ProposalStatus, Rule,
};

#[derive(Clone)]
pub struct Automation {
    state: Arc<AppState>,
    providers: Collaborators,
}

impl Automation {
    pub fn new(state: Arc<AppState>, providers: Collaborators) -> Self {
        Self { state, providers }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    // ------------------------------------------------------------------
    // Flags & status
    // ------------------------------------------------------------------

    pub fn set_automation_enabled(&self, enabled: bool) -> Result<AutomationStatus, AutomationError> {
        self.state.rules.set_automation_enabled(enabled)?;
        self.state.activity.info(if enabled {
            "Automation enabled"
        } else {
            "Automation disabled"
        });
        Ok(self.status())
    }

    pub fn set_auto_add_events(&self, enabled: bool) -> Result<AutomationStatus, AutomationError> {
        self.state.rules.set_auto_add_events(enabled)?;
        self.state.activity.info(if enabled {
            "Auto-add events enabled"
        } else {
            "Auto-add events disabled"
        });
        Ok(self.status())
    }

    pub fn status(&self) -> AutomationStatus {
        self.state.automation_status()
    }

    pub fn recent_activity(&self, limit: usize, within_hours: Option<u32>) -> Vec<ActivityLogEntry> {
        self.state.activity.recent(limit, within_hours)
    }

    // ------------------------------------------------------------------
    // Cycle
    // ------------------------------------------------------------------

    /// Run a cycle now. Returns `ConcurrencyRejected` when one is
    /// already in flight; nothing is queued.
    pub async fn run_now(&self) -> Result<CycleReport, AutomationError> {
        run_cycle(&self.state, &self.providers, CycleTrigger::Manual).await
    }

    // ------------------------------------------------------------------
    // Rules
    // ------------------------------------------------------------------

    pub fn rules(&self) -> Vec<Rule> {
        self.state.rules.list()
    }

    pub fn add_rule(&self, label: &str, reason: &str) -> Result<Rule, AutomationError> {
        let label = label.trim();
        let reason = reason.trim();
        if label.is_empty() || reason.is_empty() {
            return Err(AutomationError::InvalidState(
                "rule label and reason must be non-empty".into(),
            ));
        }
        let rule = self.state.rules.add(label, reason)?;
        self.state
            .activity
            .info(format!("Rule added: \"{}\"", rule.label));
        Ok(rule)
    }

    pub fn delete_rule(&self, rule_id: &str) -> Result<bool, AutomationError> {
        let deleted = self.state.rules.delete(rule_id)?;
        if deleted {
            self.state
                .activity
                .info(format!("Rule deleted: {}", rule_id));
        }
        Ok(deleted)
    }

    // ------------------------------------------------------------------
    // Proposals
    // ------------------------------------------------------------------

    pub fn proposals(&self, status: Option<ProposalStatus>) -> Result<Vec<Proposal>, AutomationError> {
        self.state.proposals.list(status)
    }

    pub async fn accept_proposal(&self, proposal_id: &str) -> Result<Proposal, AutomationError> {
        let proposal = self
            .state
            .proposals
            .accept(proposal_id, self.providers.calendar.as_ref())
            .await?;
        self.state
            .activity
            .info(format!("Proposal accepted: \"{}\"", proposal.title));
        Ok(proposal)
    }

    pub async fn reject_proposal(&self, proposal_id: &str) -> Result<Proposal, AutomationError> {
        let proposal = self.state.proposals.reject(proposal_id).await?;
        self.state
            .activity
            .info(format!("Proposal rejected: \"{}\"", proposal.title));
        Ok(proposal)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        automation: Automation,
        calendar: Arc<MockCalendar>,
    }

    impl Fixture {
        fn new(emails: Vec<crate::types::EmailMessage>) -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let state = Arc::new(test_state(dir.path()));
            let calendar = Arc::new(MockCalendar::new());
            let providers = collaborators(
                Arc::new(MockMail::with_emails(emails)),
                calendar.clone(),
                Arc::new(ScriptedOracle::new()),
                Arc::new(ScriptedSummarizer::new()),
            );
            Self {
                _dir: dir,
                automation: Automation::new(state, providers),
                calendar,
            }
        }
    }

    #[tokio::test]
    async fn test_flags_roundtrip_through_status() {
        let fx = Fixture::new(vec![]);

        let status = fx.automation.set_automation_enabled(true).unwrap();
        assert!(status.automation_enabled);
        assert!(!status.auto_add_events);

        let status = fx.automation.set_auto_add_events(true).unwrap();
        assert!(status.auto_add_events);

        let status = fx.automation.set_automation_enabled(false).unwrap();
        assert!(!status.automation_enabled);
        assert!(status.auto_add_events);
    }

    #[tokio::test]
    async fn test_rule_crud() {
        let fx = Fixture::new(vec![]);

        let rule = fx
            .automation
            .add_rule("Finance", "from billing@acme.com")
            .unwrap();
        assert_eq!(fx.automation.rules().len(), 1);

        assert!(fx.automation.delete_rule(&rule.id).unwrap());
        assert!(fx.automation.rules().is_empty());
        assert!(!fx.automation.delete_rule(&rule.id).unwrap());
    }

    #[tokio::test]
    async fn test_add_rule_rejects_blank_fields() {
        let fx = Fixture::new(vec![]);
        assert!(matches!(
            fx.automation.add_rule("  ", "reason"),
            Err(AutomationError::InvalidState(_))
        ));
        assert!(matches!(
            fx.automation.add_rule("Label", ""),
            Err(AutomationError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_accept_reject_via_facade() {
        let fx = Fixture::new(vec![]);
        let state = fx.automation.state();
        let p1 = pending_proposal("msg1", "Sync");
        let p2 = pending_proposal("msg2", "Review");
        state.proposals.insert(&p1).unwrap();
        state.proposals.insert(&p2).unwrap();

        let accepted = fx.automation.accept_proposal(&p1.id).await.unwrap();
        assert_eq!(accepted.status, ProposalStatus::Accepted);
        assert_eq!(fx.calendar.create_calls(), 1);

        let rejected = fx.automation.reject_proposal(&p2.id).await.unwrap();
        assert_eq!(rejected.status, ProposalStatus::Rejected);

        // Conflicting user action surfaces as an explicit error.
        assert!(matches!(
            fx.automation.accept_proposal(&p2.id).await,
            Err(AutomationError::InvalidState(_))
        ));

        assert_eq!(
            fx.automation
                .proposals(Some(ProposalStatus::Accepted))
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_run_now_reports_conflict() {
        let fx = Fixture::new(vec![]);
        let _token = fx.automation.state().status.begin_cycle().unwrap();

        assert!(matches!(
            fx.automation.run_now().await,
            Err(AutomationError::ConcurrencyRejected)
        ));
    }

    #[tokio::test]
    async fn test_run_now_full_pass() {
        let fx = Fixture::new(vec![test_email("msg1", "a@b.com", "Hi", "hello")]);
        let report = fx.automation.run_now().await.unwrap();
        assert_eq!(report.labeled_emails, 0);
        let status = fx.automation.status();
        assert!(status.last_run_at.is_some());
    }

    #[tokio::test]
    async fn test_activity_surface() {
        let fx = Fixture::new(vec![]);
        fx.automation.set_automation_enabled(true).unwrap();

        let recent = fx.automation.recent_activity(10, None);
        assert!(recent.iter().any(|e| e.message == "Automation enabled"));
    }
}
