//! Intent classification
//!
//! Fixed keyword heuristics behind a narrow trait, so a smarter classifier
//! can replace them without touching the flows.

use regex::Regex;

/// What a free-text message asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Contact a human expert
    Lead,
    /// Estimate an item's value
    Appraisal,
    None,
}

pub trait IntentClassifier: Send + Sync {
    fn classify(&self, text: &str) -> Intent;
}

/// Case-insensitive whole-word keyword matching.
///
/// Lead wins over appraisal: "can an expert appraise this?" asks for a human.
pub struct KeywordClassifier {
    appraisal: Regex,
    lead_direct: Regex,
    review: Regex,
    escalation: Regex,
    contact: Regex,
}

impl KeywordClassifier {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            appraisal: keywords(&[
                "worth",
                "value",
                "appraise",
                "appraisal",
                "valuation",
                "how much",
            ])?,
            lead_direct: keywords(&["manual review", "expert review", "lead"])?,
            review: keywords(&["review", "appraise", "appraisal", "look at", "check"])?,
            escalation: keywords(&["expert", "specialist", "human", "someone", "team"])?,
            contact: keywords(&["contact", "call", "email", "reach out", "follow up"])?,
        })
    }

    fn is_lead(&self, text: &str) -> bool {
        if self.lead_direct.is_match(text) {
            return true;
        }
        let escalation = self.escalation.is_match(text);
        escalation && (self.review.is_match(text) || self.contact.is_match(text))
    }
}

impl IntentClassifier for KeywordClassifier {
    fn classify(&self, text: &str) -> Intent {
        if self.is_lead(text) {
            Intent::Lead
        } else if self.appraisal.is_match(text) {
            Intent::Appraisal
        } else {
            Intent::None
        }
    }
}

/// `(?i)\b(a|b|multi\s+word)\b`
fn keywords(words: &[&str]) -> Result<Regex, regex::Error> {
    let alternatives = words
        .iter()
        .map(|w| {
            w.split_whitespace()
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"\s+")
        })
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternatives})\b"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> Intent {
        KeywordClassifier::new().unwrap().classify(text)
    }

    #[test]
    fn test_appraisal_keywords() {
        for text in [
            "How much is this worth?",
            "what's the VALUE of my watch",
            "Can you appraise it",
            "I'd like a valuation",
            "how   much would it sell for",
        ] {
            assert_eq!(classify(text), Intent::Appraisal, "{text}");
        }
    }

    #[test]
    fn test_whole_words_only() {
        assert_eq!(classify("I love my valuables"), Intent::None);
        assert_eq!(classify("that was worthwhile"), Intent::None);
        assert_eq!(classify("misleading"), Intent::None);
    }

    #[test]
    fn test_direct_lead_keywords() {
        assert_eq!(classify("I want a manual review"), Intent::Lead);
        assert_eq!(classify("Expert review please"), Intent::Lead);
        assert_eq!(classify("submit a lead"), Intent::Lead);
    }

    #[test]
    fn test_review_plus_escalation() {
        assert_eq!(classify("Can a specialist look at it?"), Intent::Lead);
        // Lead beats appraisal
        assert_eq!(classify("Can an expert appraise this?"), Intent::Lead);
    }

    #[test]
    fn test_contact_plus_escalation() {
        assert_eq!(classify("I'd like someone to call me"), Intent::Lead);
        assert_eq!(classify("have your team reach out"), Intent::Lead);
    }

    #[test]
    fn test_escalation_alone_is_not_lead() {
        assert_eq!(classify("Is there a human here?"), Intent::None);
        assert_eq!(classify("please call me"), Intent::None);
    }

    #[test]
    fn test_no_intent() {
        assert_eq!(classify("hello there"), Intent::None);
        assert_eq!(classify(""), Intent::None);
    }
}
