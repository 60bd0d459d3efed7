//! mailpilot service binary.
//!
//! Loads config, wires the Google + LLM providers, and runs the
//! automation loop until ctrl-c. Pass `--run-once` to execute a single
//! cycle and exit (useful for cron-style deployments and smoke tests).

use std::sync::Arc;

use mailpilot::capabilities::Collaborators;
use mailpilot::config::Config;
use mailpilot::error::AutomationError;
use mailpilot::google_api::calendar::GoogleCalendar;
use mailpilot::google_api::gmail::GmailMailbox;
use mailpilot::llm::ChatClient;
use mailpilot::service::Automation;
use mailpilot::state::AppState;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        log::error!("mailpilot failed to start: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AutomationError> {
    let run_once = std::env::args().any(|arg| arg == "--run-once");

    let config = Config::load()?;
    let state_dir = config.state_dir.clone();

    let access_token = mailpilot::google_api::load_access_token(&state_dir)?;
    let llm = Arc::new(ChatClient::from_config(&config.llm)?);

    let providers = Collaborators {
        mail: Arc::new(GmailMailbox::new(access_token.clone())),
        calendar: Arc::new(GoogleCalendar::new(access_token)),
        oracle: llm.clone(),
        summarizer: llm,
    };

    let state = Arc::new(AppState::open(config)?);
    let automation = Automation::new(state.clone(), providers.clone());

    if run_once {
        let report = automation.run_now().await?;
        log::info!(
            "Cycle complete: {} emails labeled, {} proposals created",
            report.labeled_emails,
            report.proposals_created
        );
        return Ok(());
    }

    tokio::spawn(mailpilot::scheduler::run_automation_loop(
        state.clone(),
        providers,
    ));

    log::info!("mailpilot running; press ctrl-c to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
    }
    log::info!("Shutting down");
    Ok(())
}
