//! Assistant copy
//!
//! Every user-facing sentence the engine emits comes from here. Defaults are
//! compiled in; a JSON file can override any subset of fields.

use crate::db::{AnswerMap, LeadCandidate, TenantQuestion};
use crate::valuation::ValuationResult;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Prompts {
    pub greeting: String,
    pub fallback: String,
    pub use_controls: String,
    pub lead_unavailable: String,
    pub valuation_in_progress: String,

    /// `{label}` and `{help}` are substituted
    pub appraisal_question: String,
    pub appraisal_reprompt: String,
    /// `{summary}` is substituted, one `label: value` line per answer
    pub appraisal_confirm: String,
    pub appraisal_confirmed: String,
    pub appraisal_cancelled: String,

    pub lead_name: String,
    pub lead_email: String,
    pub lead_phone: String,
    pub invalid_name: String,
    pub invalid_email: String,
    pub invalid_phone: String,
    pub lead_submitted: String,
    /// `{name}` and `{email}` are substituted
    pub identity_confirm: String,

    /// `{count}`, `{median}`, `{low}` and `{high}` are substituted
    pub valuation_ready: String,
    pub valuation_no_comparables: String,
    pub valuation_failed: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            greeting: "Hello! I can estimate what your item is worth, or put you in touch with \
                       one of our specialists. How can I help?"
                .to_string(),
            fallback: "Thank you for your message. Ask me what an item is worth to start an \
                       appraisal."
                .to_string(),
            use_controls: "Please use the buttons below to confirm or cancel.".to_string(),
            lead_unavailable: "Expert review becomes available once your valuation is ready. \
                               Ask me what your item is worth to get started."
                .to_string(),
            valuation_in_progress: "Your valuation is still running. I'll post the result here \
                                    as soon as it is ready."
                .to_string(),

            appraisal_question: "{label}{help}".to_string(),
            appraisal_reprompt: "I didn't catch that. {label}{help}".to_string(),
            appraisal_confirm: "Here is what you told me:\n{summary}\nShall I run the valuation?"
                .to_string(),
            appraisal_confirmed: "Thanks! I'm looking up comparable items now.".to_string(),
            appraisal_cancelled: "No problem, I've discarded that appraisal.".to_string(),

            lead_name: "Happy to arrange an expert review. What is your name?".to_string(),
            lead_email: "Thanks! What email address can we reach you at?".to_string(),
            lead_phone: "And what phone number should we use?".to_string(),
            invalid_name: "Please tell me your name.".to_string(),
            invalid_email: "That doesn't look like a valid email address. Please try again."
                .to_string(),
            invalid_phone: "Please enter a phone number with 7 to 15 digits.".to_string(),
            lead_submitted: "Thank you! A specialist will be in touch shortly.".to_string(),
            identity_confirm: "Should we contact you as {name} at {email} again?".to_string(),

            valuation_ready: "Based on {count} comparable items, your item is worth around \
                              {median} (typically {low} to {high})."
                .to_string(),
            valuation_no_comparables: "I couldn't find enough comparable items to estimate a \
                                       value. An expert review may help."
                .to_string(),
            valuation_failed: "Sorry, I couldn't complete the valuation right now.".to_string(),
        }
    }
}

impl Prompts {
    /// Load overrides from a JSON file; fields it omits keep their default
    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
        serde_json::from_str(&raw)
            .map_err(|e| format!("Invalid prompts file {}: {e}", path.display()))
    }

    pub fn question(&self, question: &TenantQuestion) -> String {
        fill_question(&self.appraisal_question, question)
    }

    pub fn reprompt(&self, question: &TenantQuestion) -> String {
        fill_question(&self.appraisal_reprompt, question)
    }

    pub fn confirmation(&self, answers: &AnswerMap, questions: &[TenantQuestion]) -> String {
        let summary = answers
            .iter()
            .map(|(key, value)| {
                let label = questions
                    .iter()
                    .find(|q| &q.key == key)
                    .map_or(key.as_str(), |q| q.label.as_str());
                format!("- {label}: {value}")
            })
            .collect::<Vec<_>>()
            .join("\n");
        self.appraisal_confirm.replace("{summary}", &summary)
    }

    pub fn identity(&self, candidate: &LeadCandidate) -> String {
        self.identity_confirm
            .replace("{name}", &candidate.name)
            .replace("{email}", &candidate.email)
    }

    pub fn valuation_summary(&self, result: &ValuationResult) -> String {
        let Some(median) = result.median.filter(|_| result.count > 0) else {
            return self.valuation_no_comparables.clone();
        };
        let (low, high) = result
            .range
            .as_ref()
            .map_or((median, median), |r| (r.low, r.high));
        self.valuation_ready
            .replace("{count}", &result.count.to_string())
            .replace("{median}", &money(median))
            .replace("{low}", &money(low))
            .replace("{high}", &money(high))
    }
}

fn fill_question(template: &str, question: &TenantQuestion) -> String {
    let help = question
        .help_text
        .as_deref()
        .filter(|h| !h.trim().is_empty())
        .map(|h| format!(" ({h})"))
        .unwrap_or_default();
    template
        .replace("{label}", &question.label)
        .replace("{help}", &help)
}

fn money(amount: f64) -> String {
    format!("${amount:.0}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::valuation::PriceRange;

    #[test]
    fn test_partial_override_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.json");
        std::fs::write(&path, r#"{ "greeting": "Welcome to Acme!" }"#).unwrap();

        let prompts = Prompts::load(&path).unwrap();
        assert_eq!(prompts.greeting, "Welcome to Acme!");
        assert_eq!(prompts.invalid_email, Prompts::default().invalid_email);
    }

    #[test]
    fn test_question_with_help_text() {
        let mut q = TenantQuestion::required("year", "What year was it made?", 1);
        let prompts = Prompts::default();
        assert_eq!(prompts.question(&q), "What year was it made?");

        q.help_text = Some("An estimate is fine".to_string());
        assert_eq!(prompts.question(&q), "What year was it made? (An estimate is fine)");
    }

    #[test]
    fn test_confirmation_uses_labels() {
        let questions = vec![TenantQuestion::required("maker", "Maker", 0)];
        let answers = AnswerMap::from([
            ("maker".to_string(), "Omega".to_string()),
            ("notes".to_string(), "boxed".to_string()),
        ]);
        let text = Prompts::default().confirmation(&answers, &questions);
        assert!(text.contains("- Maker: Omega"));
        assert!(text.contains("- notes: boxed"));
    }

    #[test]
    fn test_valuation_summary() {
        let prompts = Prompts::default();
        let result = ValuationResult {
            count: 12,
            median: Some(1450.0),
            range: Some(PriceRange {
                low: 900.0,
                high: 2100.0,
            }),
            ..ValuationResult::default()
        };
        assert_eq!(
            prompts.valuation_summary(&result),
            "Based on 12 comparable items, your item is worth around $1450 \
             (typically $900 to $2100)."
        );
        assert_eq!(
            prompts.valuation_summary(&ValuationResult::default()),
            prompts.valuation_no_comparables
        );
    }
}
