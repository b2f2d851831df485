//! # Action-Plan Generation
//!
//! Turns a transcript plus the client's UI context into an [`ActionPlan`] via
//! an OpenAI-compatible chat-completions service, with a deterministic
//! keyword fallback for when the service fails.
//!
//! ## Pipeline Contract:
//! `generate` may fail: upstream HTTP errors, timeouts, unparseable output,
//! and schema violations all surface as [`AgentError::Llm`]. `fallback_plan` is
//! the terminal branch: pure, total, and always at least a speak step, so the
//! command pipeline as a whole never comes back empty-handed.

use crate::config::LlmConfig;
use crate::error::{AgentError, AgentResult};
use crate::protocol::{ActionPlan, PlanMeta, Step, UserContext};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// System prompt constraining the model to the plan schema.
const SYSTEM_PROMPT: &str = r#"You are a voice-first banking assistant. You help users with:
- Checking balances and recent transactions
- Transferring money to beneficiaries
- Paying utility bills
- Managing profile settings

You receive the user's voice command and the current UI context (URL, visible elements).
Respond with a JSON action plan containing steps to execute.

Step kinds:
- navigate: Go to a URL (url field)
- fill: Fill a form field (target.aria or target.element_id, value)
- click: Click an element (target.aria or target.element_id)
- speak: Say something to the user (text field)

Always include a speak step to acknowledge the action.

Respond ONLY with valid JSON matching this schema:
{
  "plan_id": "uuid",
  "steps": [{"kind": "...", ...}],
  "meta": {"confidence": 0.0-1.0, "language": "en"}
}"#;

/// Adapter to the external language-model planner.
pub struct PlanGenerator {
    config: LlmConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

impl PlanGenerator {
    pub fn new(config: LlmConfig) -> AgentResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Llm(format!("client init: {}", e)))?;
        Ok(Self { config, client })
    }

    /// Ask the planner service for an action plan.
    pub async fn generate(
        &self,
        transcript: &str,
        context: &UserContext,
    ) -> AgentResult<ActionPlan> {
        if self.config.api_key.is_empty() {
            return Err(AgentError::Llm("LLM api key not configured".to_string()));
        }

        let user_message = format!(
            "User command: \"{}\"\n\n\
             Current context:\n\
             - URL: {}\n\
             - Visible elements: {:?}\n\
             - Locale: {}\n\n\
             Generate the action plan.",
            transcript,
            if context.url.is_empty() { "/" } else { &context.url },
            context.aria_ids,
            context.locale,
        );

        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user_message},
            ],
            "temperature": 0.2,
            "max_tokens": 1024,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Llm(format!("request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| AgentError::Llm(format!("upstream error: {}", e)))?;

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Llm(format!("bad response body: {}", e)))?;

        let content = chat
            .choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .ok_or_else(|| AgentError::Llm("response carried no choices".to_string()))?;

        parse_plan(content)
    }
}

/// Parse a plan out of model output, tolerating prose around the JSON.
pub fn parse_plan(content: &str) -> AgentResult<ActionPlan> {
    let raw = extract_json_object(content)
        .ok_or_else(|| AgentError::Llm("no JSON object in response".to_string()))?;

    let mut plan: ActionPlan = serde_json::from_str(raw)
        .map_err(|e| AgentError::Llm(format!("plan did not match schema: {}", e)))?;

    if plan.steps.is_empty() {
        return Err(AgentError::Llm("plan has no steps".to_string()));
    }

    if plan.plan_id.is_empty() {
        plan.plan_id = ActionPlan::new_id();
        debug!(plan_id = %plan.plan_id, "Filled in missing plan id");
    }

    if plan.meta.source.is_none() {
        plan.meta.source = Some("llm".to_string());
    }

    Ok(plan)
}

/// Locate the first balanced top-level `{...}` in free text.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Deterministic keyword fallback used whenever `generate` fails.
///
/// Pure and total: every input yields a plan with at least one step and
/// exactly one non-empty speak step. Keyword groups are checked in priority
/// order; the first hit wins.
pub fn fallback_plan(transcript: &str) -> ActionPlan {
    let lower = transcript.to_lowercase();
    let matches_any = |keywords: &[&str]| keywords.iter().any(|kw| lower.contains(kw));

    let (steps, confidence) = if matches_any(&["balance", "account", "money"]) {
        (
            route_and_speak("/dashboard", "Here is your account balance."),
            0.9,
        )
    } else if matches_any(&["transfer", "send", "payment"]) {
        (
            route_and_speak(
                "/transfers",
                "Opening transfers. Who would you like to send money to?",
            ),
            0.85,
        )
    } else if matches_any(&["bill", "electricity", "water", "gas", "broadband"]) {
        (
            route_and_speak(
                "/bills",
                "Opening bill payments. Which bill would you like to pay?",
            ),
            0.85,
        )
    } else if matches_any(&["profile", "settings", "beneficiary"]) {
        (
            route_and_speak("/profile", "Opening your profile settings."),
            0.85,
        )
    } else {
        (
            vec![Step::Speak {
                text: "I can help you check your balance, transfer money, pay bills, \
                       or update your profile. What would you like to do?"
                    .to_string(),
            }],
            0.5,
        )
    };

    ActionPlan {
        plan_id: ActionPlan::new_id(),
        steps,
        meta: PlanMeta {
            confidence,
            source: Some("fallback".to_string()),
            language: None,
        },
    }
}

fn route_and_speak(url: &str, text: &str) -> Vec<Step> {
    vec![
        Step::Navigate {
            url: url.to_string(),
        },
        Step::Speak {
            text: text.to_string(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speak_steps(plan: &ActionPlan) -> Vec<&str> {
        plan.steps
            .iter()
            .filter_map(|step| match step {
                Step::Speak { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn navigate_url(plan: &ActionPlan) -> Option<&str> {
        plan.steps.iter().find_map(|step| match step {
            Step::Navigate { url } => Some(url.as_str()),
            _ => None,
        })
    }

    #[test]
    fn test_fallback_balance_keywords() {
        for transcript in ["check my balance", "how much money do I have", "my account please"] {
            let plan = fallback_plan(transcript);
            assert_eq!(navigate_url(&plan), Some("/dashboard"));
            assert_eq!(speak_steps(&plan), vec!["Here is your account balance."]);
            assert_eq!(plan.meta.source.as_deref(), Some("fallback"));
        }
    }

    #[test]
    fn test_fallback_transfer_keywords() {
        let plan = fallback_plan("send five hundred to ravi");
        assert_eq!(navigate_url(&plan), Some("/transfers"));
    }

    #[test]
    fn test_fallback_bill_keywords() {
        for transcript in ["pay my electricity bill", "the water charges", "broadband renewal"] {
            assert_eq!(navigate_url(&fallback_plan(transcript)), Some("/bills"));
        }
    }

    #[test]
    fn test_fallback_profile_keywords() {
        let plan = fallback_plan("add a new beneficiary");
        assert_eq!(navigate_url(&plan), Some("/profile"));
    }

    #[test]
    fn test_fallback_priority_order() {
        // "balance" outranks "transfer" when both appear.
        let plan = fallback_plan("transfer my balance");
        assert_eq!(navigate_url(&plan), Some("/dashboard"));
    }

    #[test]
    fn test_fallback_no_match_is_speak_only() {
        let plan = fallback_plan("what is the weather like");
        assert!(navigate_url(&plan).is_none());
        assert_eq!(plan.steps.len(), 1);
        assert!((plan.meta.confidence - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_fallback_is_total() {
        // Weird inputs still produce exactly one non-empty speak step.
        let long_input = "a".repeat(10_000);
        for transcript in ["", "   ", "ß∆œ≈√", "\n\t", long_input.as_str()] {
            let plan = fallback_plan(transcript);
            assert!(!plan.steps.is_empty());
            let speaks = speak_steps(&plan);
            assert_eq!(speaks.len(), 1);
            assert!(!speaks[0].is_empty());
            assert!(!plan.plan_id.is_empty());
        }
    }

    #[test]
    fn test_parse_plan_plain_json() {
        let plan = parse_plan(
            r#"{"plan_id":"p1","steps":[{"kind":"navigate","url":"/bills"},
                {"kind":"speak","text":"Opening bills."}],
                "meta":{"confidence":0.92,"language":"en"}}"#,
        )
        .unwrap();
        assert_eq!(plan.plan_id, "p1");
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.meta.source.as_deref(), Some("llm"));
    }

    #[test]
    fn test_parse_plan_extracts_from_prose() {
        let content = r#"Sure! Here is the plan you asked for:
            {"steps":[{"kind":"speak","text":"Hello"}]}
            Let me know if you need anything else."#;
        let plan = parse_plan(content).unwrap();
        assert_eq!(plan.first_speak_text(), Some("Hello"));
        // Missing plan id is filled in locally.
        assert!(!plan.plan_id.is_empty());
    }

    #[test]
    fn test_parse_plan_handles_braces_in_strings() {
        let content = r#"{"steps":[{"kind":"speak","text":"use {curly} braces"}]}"#;
        let plan = parse_plan(content).unwrap();
        assert_eq!(plan.first_speak_text(), Some("use {curly} braces"));
    }

    #[test]
    fn test_parse_plan_rejects_empty_steps() {
        assert!(parse_plan(r#"{"plan_id":"p1","steps":[]}"#).is_err());
    }

    #[test]
    fn test_parse_plan_rejects_unknown_step_kind() {
        let result = parse_plan(r#"{"steps":[{"kind":"explode","url":"/"}]}"#);
        assert!(matches!(result, Err(AgentError::Llm(_))));
    }

    #[test]
    fn test_parse_plan_rejects_non_json() {
        assert!(parse_plan("I'm sorry, I can't help with that.").is_err());
    }

    #[tokio::test]
    async fn test_generate_without_key_fails() {
        let generator = PlanGenerator::new(LlmConfig {
            api_key: String::new(),
            base_url: "http://localhost:1".to_string(),
            model: "llama3-70b-8192".to_string(),
            timeout_secs: 1,
        })
        .unwrap();

        let result = generator
            .generate("check my balance", &UserContext::default())
            .await;
        assert!(matches!(result, Err(AgentError::Llm(_))));
    }
}
