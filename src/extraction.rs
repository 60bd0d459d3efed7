//! Proposal-extraction stage: summarize unprocessed mail and persist
//! any scheduling intents the summarizer finds.
//!
//! Same marker contract as the labeling stage: an email is marked
//! processed for the proposal concern only after its proposals are
//! durably stored. With auto-add enabled, each new proposal is
//! materialized first and persisted directly as accepted; if the
//! materializer fails, the proposal is stored pending so it can still
//! be accepted by hand.

use crate::capabilities::Collaborators;
use crate::error::AutomationError;
use crate::state::AppState;
use crate::types::{Concern, DigestOutcome, Proposal, ProposalStatus};

/// Run the extraction stage. Returns the number of proposals persisted.
pub async fn run_extraction(
    state: &AppState,
    providers: &Collaborators,
) -> Result<u32, AutomationError> {
    let Some(snapshot) = state.mail_cache.get() else {
        log::debug!("Extraction: no mailbox snapshot available yet");
        return Ok(0);
    };

    let auto_add = state.rules.auto_add_events();
    let cap = state.config.max_per_cycle;
    let mut evaluated = 0u32;
    let mut created = 0u32;

    for email in &snapshot.items {
        if evaluated >= cap {
            log::debug!("Extraction: per-cycle cap of {} reached", cap);
            break;
        }
        if state.ledger.has_processed(&email.id, Concern::Proposal)? {
            continue;
        }
        evaluated += 1;

        let digest = match providers.summarizer.summarize(email).await {
            Ok(DigestOutcome::Parsed(digest)) => digest,
            Ok(DigestOutcome::Malformed(raw)) => {
                log::error!(
                    "Summarizer reply for {} unusable: {}",
                    email.id,
                    AutomationError::OracleFormat(truncate(&raw, 200))
                );
                state.activity.error(format!(
                    "Summary for \"{}\" returned malformed output; no proposals extracted",
                    email.subject
                ));
                // The raw text still serves as a degraded summary with
                // nothing schedulable in it.
                crate::types::EmailDigest {
                    summary: truncate(raw.trim(), 500),
                    proposals: Vec::new(),
                }
            }
            Err(e) => {
                log::warn!(
                    "Summarize call failed for {}: {}; retrying next cycle",
                    email.id,
                    e
                );
                state
                    .activity
                    .warn(format!("Summary for \"{}\" failed: {}", email.subject, e));
                continue;
            }
        };

        for draft in digest.proposals {
            let mut proposal = Proposal::from_draft(draft, &email.id, &digest.summary);

            if auto_add {
                match providers.calendar.create_event(&proposal).await {
                    Ok(event_id) => {
                        proposal.status = ProposalStatus::Accepted;
                        proposal.event_id = Some(event_id);
                        proposal.resolved_at = Some(chrono::Utc::now());
                        state.activity.info(format!(
                            "Auto-added event \"{}\" from \"{}\"",
                            proposal.title, email.subject
                        ));
                    }
                    Err(e) => {
                        log::warn!(
                            "Auto-add materialize failed for \"{}\": {}; storing as pending",
                            proposal.title,
                            e
                        );
                        state.activity.warn(format!(
                            "Could not auto-add event \"{}\": {}; left pending",
                            proposal.title, e
                        ));
                    }
                }
            }

            // Storage failures are cycle-fatal and bubble out before
            // the marker below is written.
            state.proposals.insert(&proposal)?;
            if proposal.status == ProposalStatus::Pending {
                state.activity.info(format!(
                    "New proposal \"{}\" from \"{}\"",
                    proposal.title, email.subject
                ));
            }
            created += 1;
        }

        state.ledger.mark_processed(&email.id, Concern::Proposal)?;
    }

    Ok(created)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::*;
    use crate::types::FetchWindow;

    fn window() -> FetchWindow {
        FetchWindow {
            days: 7,
            max_results: 50,
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        state: AppState,
        mail: Arc<MockMail>,
        calendar: Arc<MockCalendar>,
        oracle: Arc<ScriptedOracle>,
        summarizer: Arc<ScriptedSummarizer>,
    }

    impl Fixture {
        fn new(emails: Vec<crate::types::EmailMessage>) -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let state = test_state(dir.path());
            state.mail_cache.replace(emails.clone(), window());
            Self {
                _dir: dir,
                state,
                mail: Arc::new(MockMail::with_emails(emails)),
                calendar: Arc::new(MockCalendar::new()),
                oracle: Arc::new(ScriptedOracle::new()),
                summarizer: Arc::new(ScriptedSummarizer::new()),
            }
        }

        fn providers(&self) -> Collaborators {
            collaborators(
                self.mail.clone(),
                self.calendar.clone(),
                self.oracle.clone(),
                self.summarizer.clone(),
            )
        }
    }

    fn meeting_email() -> crate::types::EmailMessage {
        test_email(
            "msg1",
            "bob@example.com",
            "Catch up",
            "meeting Tuesday 3pm with Bob",
        )
    }

    #[tokio::test]
    async fn test_extracts_pending_proposal() {
        // Scenario B: auto-add off, proposal lands pending.
        let fx = Fixture::new(vec![meeting_email()]);
        fx.summarizer.digest(
            "msg1",
            "Bob wants to meet Tuesday at 3pm.",
            vec![draft("Meeting with Bob")],
        );

        let created = run_extraction(&fx.state, &fx.providers()).await.unwrap();

        assert_eq!(created, 1);
        let proposals = fx.state.proposals.list(None).unwrap();
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].title, "Meeting with Bob");
        assert_eq!(proposals[0].status, ProposalStatus::Pending);
        assert_eq!(proposals[0].source_email_id, "msg1");
        assert_eq!(proposals[0].source_summary, "Bob wants to meet Tuesday at 3pm.");
        assert_eq!(fx.calendar.create_calls(), 0);
        assert!(fx
            .state
            .ledger
            .has_processed("msg1", Concern::Proposal)
            .unwrap());
    }

    #[tokio::test]
    async fn test_auto_add_materializes_before_persisting() {
        // Scenario C: auto-add on, proposal lands accepted with an event id.
        let fx = Fixture::new(vec![meeting_email()]);
        fx.state.rules.set_auto_add_events(true).unwrap();
        fx.summarizer.digest(
            "msg1",
            "Bob wants to meet Tuesday at 3pm.",
            vec![draft("Meeting with Bob")],
        );

        let created = run_extraction(&fx.state, &fx.providers()).await.unwrap();

        assert_eq!(created, 1);
        assert_eq!(fx.calendar.create_calls(), 1);
        let proposals = fx.state.proposals.list(None).unwrap();
        assert_eq!(proposals[0].status, ProposalStatus::Accepted);
        assert!(proposals[0].event_id.is_some());
        assert!(proposals[0].resolved_at.is_some());
    }

    #[tokio::test]
    async fn test_auto_add_failure_falls_back_to_pending() {
        let fx = Fixture::new(vec![meeting_email()]);
        fx.state.rules.set_auto_add_events(true).unwrap();
        fx.summarizer.digest("msg1", "summary", vec![draft("Meeting with Bob")]);
        fx.calendar.fail_next();

        let created = run_extraction(&fx.state, &fx.providers()).await.unwrap();

        assert_eq!(created, 1);
        let proposals = fx.state.proposals.list(None).unwrap();
        assert_eq!(proposals[0].status, ProposalStatus::Pending);
        assert!(proposals[0].event_id.is_none());
        // Email is still marked: the proposal itself was recorded.
        assert!(fx
            .state
            .ledger
            .has_processed("msg1", Concern::Proposal)
            .unwrap());
    }

    #[tokio::test]
    async fn test_no_proposals_still_marks() {
        let fx = Fixture::new(vec![test_email("msg1", "a@b.com", "FYI", "no meetings here")]);
        fx.summarizer.digest("msg1", "Nothing schedulable.", vec![]);

        let created = run_extraction(&fx.state, &fx.providers()).await.unwrap();

        assert_eq!(created, 0);
        assert!(fx.state.proposals.list(None).unwrap().is_empty());
        assert!(fx
            .state
            .ledger
            .has_processed("msg1", Concern::Proposal)
            .unwrap());
    }

    #[tokio::test]
    async fn test_malformed_summary_marks_without_proposals() {
        let fx = Fixture::new(vec![meeting_email()]);
        fx.summarizer
            .script("msg1", SummarizerScript::Malformed("free text reply".into()));

        let created = run_extraction(&fx.state, &fx.providers()).await.unwrap();

        assert_eq!(created, 0);
        assert!(fx.state.proposals.list(None).unwrap().is_empty());
        assert!(fx
            .state
            .ledger
            .has_processed("msg1", Concern::Proposal)
            .unwrap());
    }

    #[tokio::test]
    async fn test_transport_failure_does_not_mark() {
        let fx = Fixture::new(vec![meeting_email()]);
        fx.summarizer.script("msg1", SummarizerScript::TransportError);

        run_extraction(&fx.state, &fx.providers()).await.unwrap();

        assert!(!fx
            .state
            .ledger
            .has_processed("msg1", Concern::Proposal)
            .unwrap());
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let fx = Fixture::new(vec![meeting_email()]);
        fx.summarizer.digest("msg1", "summary", vec![draft("Meeting with Bob")]);

        run_extraction(&fx.state, &fx.providers()).await.unwrap();
        let calls = fx.summarizer.call_count();

        let created = run_extraction(&fx.state, &fx.providers()).await.unwrap();

        assert_eq!(created, 0);
        assert_eq!(fx.summarizer.call_count(), calls, "no re-summarization");
        assert_eq!(fx.state.proposals.list(None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_multiple_proposals_from_one_email() {
        let fx = Fixture::new(vec![meeting_email()]);
        fx.summarizer.digest(
            "msg1",
            "Two meetings proposed.",
            vec![draft("Kickoff"), draft("Retro")],
        );

        let created = run_extraction(&fx.state, &fx.providers()).await.unwrap();

        assert_eq!(created, 2);
        assert_eq!(fx.state.proposals.list(None).unwrap().len(), 2);
    }
}
