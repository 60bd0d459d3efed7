//! Rule-evaluation stage: judge unprocessed mail against the rule set
//! and apply matched labels.
//!
//! Per-email contract: the dedup marker is written only after the
//! email's label work has finished (applied, or individually logged and
//! skipped). A transport failure talking to the oracle leaves the email
//! unmarked so the next cycle retries it; a malformed oracle reply is a
//! no-match and the email is still marked.

use crate::capabilities::{Collaborators, MailProvider};
use crate::error::AutomationError;
use crate::state::AppState;
use crate::types::{Concern, EmailMessage, Rule, RuleEvaluation, RuleMatch};

/// Run the labeling stage. Returns the number of emails that received
/// at least one label.
///
/// Only durable-storage errors bubble out of this function; everything
/// else is contained to the email it happened on.
pub async fn run_labeling(
    state: &AppState,
    providers: &Collaborators,
) -> Result<u32, AutomationError> {
    let Some(snapshot) = state.mail_cache.get() else {
        log::debug!("Labeling: no mailbox snapshot available yet");
        return Ok(0);
    };

    let rules = state.rules.list();
    let cap = state.config.max_per_cycle;
    let mut evaluated = 0u32;
    let mut labeled = 0u32;

    for email in &snapshot.items {
        if evaluated >= cap {
            log::debug!("Labeling: per-cycle cap of {} reached", cap);
            break;
        }
        if state.ledger.has_processed(&email.id, Concern::Label)? {
            continue;
        }
        evaluated += 1;

        let matches = if rules.is_empty() {
            Vec::new()
        } else {
            match providers.oracle.evaluate(email, &rules).await {
                Ok(RuleEvaluation::Matched(matches)) => matches,
                Ok(RuleEvaluation::Malformed(raw)) => {
                    let err = AutomationError::OracleFormat(truncate(&raw, 200));
                    log::error!("Label oracle reply for {} unusable: {}", email.id, err);
                    state.activity.error(format!(
                        "Label evaluation for \"{}\" returned malformed output; treated as no match",
                        email.subject
                    ));
                    Vec::new()
                }
                Err(e) => {
                    log::warn!(
                        "Label oracle call failed for {}: {}; retrying next cycle",
                        email.id,
                        e
                    );
                    state.activity.warn(format!(
                        "Label evaluation for \"{}\" failed: {}",
                        email.subject, e
                    ));
                    continue;
                }
            }
        };

        if apply_matches(state, providers, email, &rules, &matches).await {
            labeled += 1;
        }

        // Side effects are done (or logged and skipped); the marker
        // makes this email final for the label concern.
        state.ledger.mark_processed(&email.id, Concern::Label)?;
    }

    Ok(labeled)
}

/// Apply every matched label to one email. Returns true if at least
/// one label landed.
async fn apply_matches(
    state: &AppState,
    providers: &Collaborators,
    email: &EmailMessage,
    rules: &[Rule],
    matches: &[RuleMatch],
) -> bool {
    let mut any_applied = false;
    for m in matches {
        let Some(rule) = rules.iter().find(|r| r.id == m.rule_id) else {
            log::warn!(
                "Oracle matched unknown rule id {} for {}; skipping",
                m.rule_id,
                email.id
            );
            continue;
        };

        match apply_rule(providers.mail.as_ref(), email, rule).await {
            Ok(()) => {
                any_applied = true;
                state.activity.info(format!(
                    "Applied label \"{}\" to \"{}\"",
                    rule.label, email.subject
                ));
            }
            Err(e) => {
                log::warn!(
                    "Could not apply label \"{}\" to {}: {}",
                    rule.label,
                    email.id,
                    e
                );
                state.activity.warn(format!(
                    "Could not apply label \"{}\" to \"{}\": {}",
                    rule.label, email.subject, e
                ));
            }
        }
    }
    any_applied
}

async fn apply_rule(
    mail: &dyn MailProvider,
    email: &EmailMessage,
    rule: &Rule,
) -> Result<(), AutomationError> {
    let label_id = mail.ensure_label(&rule.label).await?;
    mail.apply_label(&email.id, &label_id).await
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
    use crate::config::Config;
    use crate::testing::*;
    use crate::types::{ActivityLevel, FetchWindow};

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
        fn new(emails: Vec<EmailMessage>) -> Self {
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

    #[tokio::test]
    async fn test_matched_rule_applies_label_and_marks() {
        // Scenario A: billing email matches the Finance rule.
        let email = test_email(
            "msg1",
            "billing@acme.com",
            "Invoice #2024",
            "Your invoice is attached.",
        );
        let fx = Fixture::new(vec![email]);
        let rule = fx.state.rules.add("Finance", "from billing@acme.com").unwrap();
        fx.oracle.match_rule("msg1", &rule, 0.95);

        let labeled = run_labeling(&fx.state, &fx.providers()).await.unwrap();

        assert_eq!(labeled, 1);
        assert_eq!(fx.mail.ensure_calls.lock().unwrap().as_slice(), ["Finance"]);
        assert_eq!(fx.mail.apply_count(), 1);
        assert!(fx
            .state
            .ledger
            .has_processed("msg1", Concern::Label)
            .unwrap());
    }

    #[tokio::test]
    async fn test_zero_matches_still_marks() {
        let fx = Fixture::new(vec![test_email("msg1", "a@b.com", "Hi", "hello")]);
        fx.state.rules.add("Finance", "invoices").unwrap();
        // No script: oracle returns zero matches.

        let labeled = run_labeling(&fx.state, &fx.providers()).await.unwrap();

        assert_eq!(labeled, 0);
        assert_eq!(fx.mail.apply_count(), 0);
        assert!(fx
            .state
            .ledger
            .has_processed("msg1", Concern::Label)
            .unwrap());
    }

    #[tokio::test]
    async fn test_malformed_oracle_reply_marks_and_continues() {
        // Scenario E: malformed JSON is a logged no-match, not a crash.
        let fx = Fixture::new(vec![
            test_email("msg1", "a@b.com", "First", "one"),
            test_email("msg2", "c@d.com", "Second", "two"),
        ]);
        let rule = fx.state.rules.add("Finance", "invoices").unwrap();
        fx.oracle
            .script("msg1", OracleScript::Malformed("not json at all".into()));
        fx.oracle.match_rule("msg2", &rule, 0.8);

        let labeled = run_labeling(&fx.state, &fx.providers()).await.unwrap();

        // msg1 marked despite the bad reply; msg2 handled normally.
        assert!(fx
            .state
            .ledger
            .has_processed("msg1", Concern::Label)
            .unwrap());
        assert_eq!(labeled, 1);
        assert_eq!(fx.mail.apply_count(), 1);
        let errors: Vec<_> = fx
            .state
            .activity
            .recent(10, None)
            .into_iter()
            .filter(|e| e.level == ActivityLevel::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("malformed"));
    }

    #[tokio::test]
    async fn test_oracle_transport_failure_does_not_mark() {
        let fx = Fixture::new(vec![test_email("msg1", "a@b.com", "Hi", "hello")]);
        fx.state.rules.add("Finance", "invoices").unwrap();
        fx.oracle.script("msg1", OracleScript::TransportError);

        run_labeling(&fx.state, &fx.providers()).await.unwrap();
        assert!(!fx
            .state
            .ledger
            .has_processed("msg1", Concern::Label)
            .unwrap());

        // Next cycle retries the same email.
        fx.oracle.script("msg1", OracleScript::Matches(Vec::new()));
        run_labeling(&fx.state, &fx.providers()).await.unwrap();
        assert!(fx
            .state
            .ledger
            .has_processed("msg1", Concern::Label)
            .unwrap());
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let email = test_email("msg1", "billing@acme.com", "Invoice", "attached");
        let fx = Fixture::new(vec![email]);
        let rule = fx.state.rules.add("Finance", "invoices").unwrap();
        fx.oracle.match_rule("msg1", &rule, 0.9);

        run_labeling(&fx.state, &fx.providers()).await.unwrap();
        let oracle_calls = fx.oracle.call_count();
        let applies = fx.mail.apply_count();

        let labeled = run_labeling(&fx.state, &fx.providers()).await.unwrap();

        assert_eq!(labeled, 0);
        assert_eq!(fx.oracle.call_count(), oracle_calls, "no re-evaluation");
        assert_eq!(fx.mail.apply_count(), applies, "no re-application");
    }

    #[tokio::test]
    async fn test_unknown_rule_id_is_skipped() {
        let fx = Fixture::new(vec![test_email("msg1", "a@b.com", "Hi", "hello")]);
        fx.state.rules.add("Finance", "invoices").unwrap();
        fx.oracle.script(
            "msg1",
            OracleScript::Matches(vec![crate::types::RuleMatch {
                rule_id: "ghost-rule".into(),
                confidence: 0.9,
                explanation: String::new(),
            }]),
        );

        let labeled = run_labeling(&fx.state, &fx.providers()).await.unwrap();

        assert_eq!(labeled, 0);
        assert_eq!(fx.mail.ensure_count(), 0);
        assert!(fx
            .state
            .ledger
            .has_processed("msg1", Concern::Label)
            .unwrap());
    }

    #[tokio::test]
    async fn test_apply_failure_is_logged_and_marked() {
        let fx = Fixture::new(vec![test_email("msg1", "a@b.com", "Hi", "hello")]);
        let rule = fx.state.rules.add("Finance", "invoices").unwrap();
        fx.oracle.match_rule("msg1", &rule, 0.9);
        fx.mail.fail_apply.store(true, std::sync::atomic::Ordering::SeqCst);

        let labeled = run_labeling(&fx.state, &fx.providers()).await.unwrap();

        assert_eq!(labeled, 0);
        assert!(fx
            .state
            .ledger
            .has_processed("msg1", Concern::Label)
            .unwrap());
        let warns: Vec<_> = fx
            .state
            .activity
            .recent(10, None)
            .into_iter()
            .filter(|e| e.level == ActivityLevel::Warn)
            .collect();
        assert!(!warns.is_empty());
    }

    #[tokio::test]
    async fn test_per_cycle_cap() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config {
            state_dir: dir.path().to_path_buf(),
            max_per_cycle: 1,
            ..Config::default()
        };
        let state = AppState::open(config).unwrap();
        let emails = vec![
            test_email("msg1", "a@b.com", "One", "1"),
            test_email("msg2", "a@b.com", "Two", "2"),
        ];
        state.mail_cache.replace(emails.clone(), window());
        state.rules.add("Finance", "invoices").unwrap();

        let mail = Arc::new(MockMail::with_emails(emails));
        let oracle = Arc::new(ScriptedOracle::new());
        let providers = collaborators(
            mail,
            Arc::new(MockCalendar::new()),
            oracle.clone(),
            Arc::new(ScriptedSummarizer::new()),
        );

        run_labeling(&state, &providers).await.unwrap();

        assert_eq!(oracle.call_count(), 1);
        assert!(state.ledger.has_processed("msg1", Concern::Label).unwrap());
        assert!(!state.ledger.has_processed("msg2", Concern::Label).unwrap());
    }

    #[tokio::test]
    async fn test_no_rules_marks_without_oracle_calls() {
        let fx = Fixture::new(vec![test_email("msg1", "a@b.com", "Hi", "hello")]);

        run_labeling(&fx.state, &fx.providers()).await.unwrap();

        assert_eq!(fx.oracle.call_count(), 0);
        assert!(fx
            .state
            .ledger
            .has_processed("msg1", Concern::Label)
            .unwrap());
    }
}
