//! One automation cycle: refresh, label, extract.
//!
//! Both the periodic timer and the manual trigger funnel through
//! [`run_cycle`]. The status cell's compare-and-set guard makes the
//! cycle exclusive; a trigger that loses the race is a logged no-op.
//! Stages are isolated: a stage failure lands in `last_error` and the
//! next stage still runs. The one exception is durable-storage failure,
//! which aborts the cycle because the pipeline can no longer record
//! what it has done.

use chrono::Utc;

use crate::capabilities::Collaborators;
use crate::error::AutomationError;
use crate::extraction::run_extraction;
use crate::labeling::run_labeling;
use crate::state::AppState;
use crate::types::{CycleReport, CycleTrigger};

pub async fn run_cycle(
    state: &AppState,
    providers: &Collaborators,
    trigger: CycleTrigger,
) -> Result<CycleReport, AutomationError> {
    let Some(_token) = state.status.begin_cycle() else {
        log::info!(
            "Cycle trigger ({}) ignored: a cycle is already running",
            trigger.as_str()
        );
        return Err(AutomationError::ConcurrencyRejected);
    };

    log::info!("Cycle started ({})", trigger.as_str());
    state
        .activity
        .info(format!("Cycle started ({})", trigger.as_str()));

    let mut report = CycleReport::default();

    // Stage 1: refresh snapshots. Failures keep the previous snapshot.
    refresh_caches(state, providers).await;

    // Stage 2: rule evaluation, gated on the automation flag as of now.
    if state.rules.automation_enabled() {
        match run_labeling(state, providers).await {
            Ok(labeled) => {
                report.labeled_emails = labeled;
                state.status.set_last_labeled_count(labeled);
            }
            Err(e) if e.is_cycle_fatal() => return abort(state, e),
            Err(e) => {
                log::warn!("Labeling stage failed: {}", e);
                report.stage_errors.push(format!("labeling: {}", e));
            }
        }
    } else {
        log::debug!("Labeling stage skipped: automation disabled");
    }

    // Stage 3: proposal extraction runs regardless of the labeling
    // stage's outcome.
    match run_extraction(state, providers).await {
        Ok(created) => report.proposals_created = created,
        Err(e) if e.is_cycle_fatal() => return abort(state, e),
        Err(e) => {
            log::warn!("Extraction stage failed: {}", e);
            report.stage_errors.push(format!("extraction: {}", e));
        }
    }

    // Housekeeping: drop ledger entries that fell out of every window.
    match state.ledger.prune(state.config.ledger_max_age_days) {
        Ok(pruned) if pruned > 0 => log::debug!("Pruned {} ledger entries", pruned),
        Ok(_) => {}
        Err(e) => log::warn!("Ledger prune failed: {}", e),
    }

    let last_error = if report.stage_errors.is_empty() {
        None
    } else {
        Some(report.stage_errors.join("; "))
    };
    state.status.set_last_error(last_error);
    state.status.set_last_run_at(Utc::now());

    log::info!(
        "Cycle finished: {} emails labeled, {} proposals created",
        report.labeled_emails,
        report.proposals_created
    );
    state.activity.info(format!(
        "Cycle finished: {} emails labeled, {} proposals created",
        report.labeled_emails, report.proposals_created
    ));

    Ok(report)
}

/// Cycle-fatal exit: record the error, stamp the run, and surface it.
/// The cycle token resets `running_now` on drop in the caller.
fn abort(state: &AppState, error: AutomationError) -> Result<CycleReport, AutomationError> {
    log::error!("Cycle aborted: {}", error);
    state.activity.error(format!("Cycle aborted: {}", error));
    state.status.set_last_error(Some(error.to_string()));
    state.status.set_last_run_at(Utc::now());
    Err(error)
}

async fn refresh_caches(state: &AppState, providers: &Collaborators) {
    let window = state.config.fetch_window();

    match providers
        .mail
        .fetch_messages(&state.config.mail_folder, window)
        .await
    {
        Ok(items) => {
            log::debug!("Mailbox refresh: {} messages", items.len());
            state.mail_cache.replace(items, window);
            state.status.set_last_refresh_at(Utc::now());
        }
        Err(e) => {
            log::warn!("Mailbox refresh failed: {}; keeping previous snapshot", e);
            state.activity.warn(format!(
                "Mailbox refresh failed: {}; keeping previous snapshot",
                e
            ));
        }
    }

    match providers.calendar.list_events(window).await {
        Ok(items) => {
            log::debug!("Calendar refresh: {} events", items.len());
            state.calendar_cache.replace(items, window);
        }
        Err(e) => {
            log::warn!("Calendar refresh failed: {}; keeping previous snapshot", e);
            state.activity.warn(format!(
                "Calendar refresh failed: {}; keeping previous snapshot",
                e
            ));
        }
    }
}
