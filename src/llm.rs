//! OpenAI-format chat client backing the LabelOracle and Summarizer
//! capabilities.
//!
//! The model is asked to reply with JSON only, but its output is
//! untrusted: replies are scanned for the first JSON object and parsed
//! against the expected shape. Anything that does not fit becomes a
//! `Malformed` outcome for the caller to treat as no-match, never a
//! crash.

use std::time::Duration;

use async_trait::async_trait;

use crate::capabilities::{LabelOracle, Summarizer};
use crate::config::LlmConfig;
use crate::error::{classify_status, AutomationError};
use crate::retry::{send_with_retry, RetryPolicy};
use crate::types::{
    DigestOutcome, EmailDigest, EmailMessage, Rule, RuleEvaluation, RuleMatch,
};

/// Matches below this confidence are dropped at the parse boundary.
const CONFIDENCE_FLOOR: f64 = 0.5;

/// Rule evaluation needs far fewer tokens than summarization.
const RULE_EVAL_MAX_TOKENS: u32 = 512;

pub struct ChatClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl ChatClient {
    /// Build a client from config, reading the API key from the
    /// configured environment variable.
    pub fn from_config(config: &LlmConfig) -> Result<Self, AutomationError> {
        if config.api_base.is_empty() || config.model.is_empty() {
            return Err(AutomationError::Config(
                "llm.apiBase and llm.model must be configured".into(),
            ));
        }
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            AutomationError::Config(format!("{} is not set", config.api_key_env))
        })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    async fn chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<String, AutomationError> {
        let payload = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt },
            ],
            "temperature": 0.0,
            "max_tokens": max_tokens,
        });

        let resp = send_with_retry(
            self.http
                .post(format!("{}/v1/chat/completions", self.api_base))
                .bearer_auth(&self.api_key)
                .json(&payload),
            &RetryPolicy::default(),
        )
        .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status, "llm chat"));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AutomationError::PermanentProvider(format!("llm decode: {}", e)))?;

        let text = body["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str().or(c["text"].as_str()))
            .unwrap_or_default()
            .to_string();
        log::debug!("llm reply ({} chars)", text.len());
        Ok(text)
    }
}

#[async_trait]
impl LabelOracle for ChatClient {
    async fn evaluate(
        &self,
        email: &EmailMessage,
        rules: &[Rule],
    ) -> Result<RuleEvaluation, AutomationError> {
        if rules.is_empty() {
            return Ok(RuleEvaluation::Matched(Vec::new()));
        }
        let (system_prompt, user_prompt) = build_rule_prompts(email, rules);
        let text = self
            .chat(&system_prompt, &user_prompt, RULE_EVAL_MAX_TOKENS)
            .await?;
        Ok(parse_rule_matches(&text))
    }
}

#[async_trait]
impl Summarizer for ChatClient {
    async fn summarize(&self, email: &EmailMessage) -> Result<DigestOutcome, AutomationError> {
        let (system_prompt, user_prompt) = build_summarize_prompts(email);
        let text = self
            .chat(&system_prompt, &user_prompt, self.max_tokens)
            .await?;
        Ok(parse_digest(&text))
    }
}

// ============================================================================
// Prompts
// ============================================================================

fn build_rule_prompts(email: &EmailMessage, rules: &[Rule]) -> (String, String) {
    let system_prompt = "You are an email triage assistant that evaluates emails against \
         user-defined labeling rules. Only match a rule when the email clearly satisfies the \
         condition in the rule's reason field; consider subject, sender, and body. Be \
         conservative: when uncertain, do not match. A rule's label is just the tag name; the \
         reason describes when to apply it. Score confidence from 0.0 to 1.0 and include only \
         matches at 0.5 or above. Respond with JSON only (no markdown, no extra explanation)."
        .to_string();

    let rules_description: String = rules
        .iter()
        .map(|r| {
            format!(
                "  - Rule ID: {}, Label: \"{}\", Reason: \"{}\"",
                r.id, r.label, r.reason
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let user_prompt = format!(
        "EMAIL TO EVALUATE:\nSubject: {}\nFrom: {}\nBody:\n{}\n\n\
         RULES TO CHECK:\n{}\n\n\
         Evaluate each rule against this email. Produce a JSON object with this exact \
         structure:\n\
         {{\"matches\": [{{\"rule_id\": \"<id>\", \"confidence\": <0.5-1.0>, \
         \"explanation\": \"<brief reason>\"}}]}}\n\
         If no rules match, return {{\"matches\": []}}. Return JSON only.",
        non_empty(&email.subject, "(no subject)"),
        non_empty(&email.from, "(unknown sender)"),
        non_empty(email.judging_text(), "(empty body)"),
        rules_description,
    );

    (system_prompt, user_prompt)
}

fn build_summarize_prompts(email: &EmailMessage) -> (String, String) {
    let system_prompt = "You are an assistant that extracts scheduling information from a \
         user's email. Produce a short, clean, one-line summary (include the sender's name if \
         available) and an array of proposed events. Use the received and current times to \
         resolve relative dates, and express all event datetimes as full ISO 8601 timestamps \
         with a timezone offset. Respond with JSON only (no extra explanation)."
        .to_string();

    let mut time_context = String::new();
    if let Some(received) = &email.received_at {
        time_context.push_str(&format!("Email received at: {}. ", received));
    }
    time_context.push_str(&format!(
        "Current system time: {}. ",
        chrono::Utc::now().to_rfc3339()
    ));

    let user_prompt = format!(
        "Email:\nSubject: {}\nFrom: {}\n{}\n\n{}\n\
         Produce a JSON object with keys:\n\
         - text: brief summary string\n\
         - proposals: an array (possibly empty) of objects with fields: title, start (ISO \
         8601), end (ISO 8601), attendees (array of emails), location, notes.\n\
         If there are no scheduling intents, use an empty array for proposals. Return JSON only.",
        email.subject,
        email.from,
        email.judging_text(),
        time_context,
    );

    (system_prompt, user_prompt)
}

fn non_empty<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

// ============================================================================
// Reply parsing
// ============================================================================

/// Extract the first JSON object from a model reply. Models sometimes
/// wrap JSON in fences or prose; find the outermost brace span.
fn extract_json(text: &str) -> Option<serde_json::Value> {
    let re = regex::Regex::new(r"\{[\s\S]*\}").ok()?;
    let candidate = re.find(text)?.as_str();
    serde_json::from_str(candidate).ok()
}

/// Parse an oracle reply into the tagged evaluation outcome.
pub fn parse_rule_matches(text: &str) -> RuleEvaluation {
    let Some(value) = extract_json(text) else {
        return RuleEvaluation::Malformed(text.to_string());
    };
    let Some(raw_matches) = value.get("matches").and_then(|m| m.as_array()) else {
        return RuleEvaluation::Malformed(text.to_string());
    };

    let mut matches = Vec::new();
    for entry in raw_matches {
        let Some(rule_id) = entry.get("rule_id").and_then(|v| v.as_str()) else {
            continue;
        };
        let confidence = entry
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        if confidence < CONFIDENCE_FLOOR {
            continue;
        }
        matches.push(RuleMatch {
            rule_id: rule_id.to_string(),
            confidence,
            explanation: entry
                .get("explanation")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        });
    }
    RuleEvaluation::Matched(matches)
}

/// Parse a summarizer reply into the tagged digest outcome. Proposals
/// without a title or start are dropped; they cannot become events.
pub fn parse_digest(text: &str) -> DigestOutcome {
    let Some(value) = extract_json(text) else {
        return DigestOutcome::Malformed(text.to_string());
    };
    let Ok(mut digest) = serde_json::from_value::<EmailDigest>(value) else {
        return DigestOutcome::Malformed(text.to_string());
    };
    digest
        .proposals
        .retain(|p| !p.title.trim().is_empty() && !p.start.trim().is_empty());
    DigestOutcome::Parsed(digest)
}

// ============================================================================
// Tests
// ============================================================================
