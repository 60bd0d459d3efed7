//! Background automation loop.
//!
//! Runs as a spawned task: startup delay, then one cycle per configured
//! interval. A tick that lands while a manual run is still in flight is
//! dropped by the cycle's own exclusivity guard, so this loop never
//! stacks cycles.

use std::sync::Arc;
use std::time::Duration;

use crate::capabilities::Collaborators;
use crate::cycle::run_cycle;
use crate::error::AutomationError;
use crate::state::AppState;
use crate::types::CycleTrigger;

pub async fn run_automation_loop(state: Arc<AppState>, providers: Collaborators) {
    let startup_delay = Duration::from_secs(state.config.startup_delay_secs);
    if !startup_delay.is_zero() {
        tokio::time::sleep(startup_delay).await;
    }

    let interval = interval_from_minutes(state.config.refresh_interval_minutes);
    log::info!(
        "Automation loop started (every {} min)",
        state.config.refresh_interval_minutes.max(1)
    );

    loop {
        match run_cycle(&state, &providers, CycleTrigger::Scheduled).await {
            Ok(report) => {
                log::debug!(
                    "Scheduled cycle done: {} labeled, {} proposals",
                    report.labeled_emails,
                    report.proposals_created
                );
            }
            Err(AutomationError::ConcurrencyRejected) => {
                log::debug!("Scheduled cycle skipped: another cycle is running");
            }
            Err(e) => {
                log::error!("Scheduled cycle failed: {}", e);
            }
        }

        tokio::time::sleep(interval).await;
    }
}

fn interval_from_minutes(minutes: u32) -> Duration {
    Duration::from_secs(u64::from(minutes.max(1)) * 60)
}
