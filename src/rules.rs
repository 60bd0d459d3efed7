//! Rule store: user-defined auto-label rules plus the persisted
//! automation flags.
//!
//! State lives in `{state_dir}/rules.json` and is written atomically on
//! every mutation. A missing or corrupt file starts from defaults with
//! a logged warning; the rest of the system keeps working.

use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::AutomationError;
use crate::types::Rule;
use crate::util::atomic_write_str;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RulesState {
    #[serde(default)]
    automation_enabled: bool,
    #[serde(default)]
    auto_add_events: bool,
    #[serde(default)]
    rules: Vec<Rule>,
}

pub struct RuleStore {
    path: PathBuf,
    state: Mutex<RulesState>,
}

impl RuleStore {
    /// Open the store at `{state_dir}/rules.json`.
    pub fn open(state_dir: &std::path::Path) -> Self {
        Self::open_at(state_dir.join("rules.json"))
    }

    pub fn open_at(path: PathBuf) -> Self {
        let state = load_state(&path);
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub fn list(&self) -> Vec<Rule> {
        self.lock().map(|s| s.rules.clone()).unwrap_or_default()
    }

    pub fn get(&self, rule_id: &str) -> Option<Rule> {
        self.lock()
            .ok()
            .and_then(|s| s.rules.iter().find(|r| r.id == rule_id).cloned())
    }

    pub fn add(&self, label: &str, reason: &str) -> Result<Rule, AutomationError> {
        let rule = Rule::new(label, reason);
        let mut state = self.lock()?;
        state.rules.push(rule.clone());
        self.save(&state)?;
        Ok(rule)
    }

    /// Delete a rule by id. Returns false when no rule matched.
    pub fn delete(&self, rule_id: &str) -> Result<bool, AutomationError> {
        let mut state = self.lock()?;
        let before = state.rules.len();
        state.rules.retain(|r| r.id != rule_id);
        if state.rules.len() == before {
            return Ok(false);
        }
        self.save(&state)?;
        Ok(true)
    }

    pub fn automation_enabled(&self) -> bool {
        self.lock().map(|s| s.automation_enabled).unwrap_or(false)
    }

    pub fn auto_add_events(&self) -> bool {
        self.lock().map(|s| s.auto_add_events).unwrap_or(false)
    }

    pub fn set_automation_enabled(&self, enabled: bool) -> Result<(), AutomationError> {
        let mut state = self.lock()?;
        state.automation_enabled = enabled;
        self.save(&state)
    }

    pub fn set_auto_add_events(&self, enabled: bool) -> Result<(), AutomationError> {
        let mut state = self.lock()?;
        state.auto_add_events = enabled;
        self.save(&state)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, RulesState>, AutomationError> {
        self.state
            .lock()
            .map_err(|_| AutomationError::Storage("rule store lock poisoned".into()))
    }

    fn save(&self, state: &RulesState) -> Result<(), AutomationError> {
        let content = serde_json::to_string_pretty(state)?;
        atomic_write_str(&self.path, &content)?;
        Ok(())
    }
}

fn load_state(path: &std::path::Path) -> RulesState {
    if !path.exists() {
        return RulesState::default();
    }
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(state) => state,
            Err(e) => {
                log::warn!(
                    "Rule store at {} is corrupt ({}); starting from defaults",
                    path.display(),
                    e
                );
                RulesState::default()
            }
        },
        Err(e) => {
            log::warn!(
                "Could not read rule store at {} ({}); starting from defaults",
                path.display(),
                e
            );
            RulesState::default()
        }
    }
}
