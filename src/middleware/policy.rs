//! Financial-content policy classifier.
//!
//! Keyword dictionary and economic-context word list are fixed `&[&str]`
//! tables, in the shape of the teacher's guardrail category tables.

use super::classifier::ClassifierClient;

const FINANCIAL_KEYWORDS: &[&str] = &[
    "bank account",
    "routing number",
    "wire transfer",
    "loan",
    "mortgage",
    "credit score",
    "credit card",
    "investment",
    "stock",
    "bond",
    "portfolio",
    "insurance policy",
    "premium payment",
    "cryptocurrency",
    "bitcoin",
    "wallet address",
    "tax return",
    "irs",
    "payment due",
    "invoice",
    "swift code",
    "iban",
];

const ECONOMIC_CONTEXT_WORDS: &[&str] =
    &["money", "price", "cost", "budget", "fund", "economy", "market", "income"];

pub struct PolicyClassifier {
    classifier: ClassifierClient,
    strict_mode: bool,
}

impl PolicyClassifier {
    pub fn new(classifier: ClassifierClient, strict_mode: bool) -> Self {
        Self { classifier, strict_mode }
    }

    pub async fn is_financial(&self, text: &str) -> bool {
        let lower = text.to_lowercase();

        if contains_keyword(&lower, FINANCIAL_KEYWORDS) {
            return true;
        }

        let first_pass = match self.classifier.classify_financial(text, false).await {
            Ok(verdict) => verdict,
            Err(err) => {
                tracing::warn!("financial classifier call failed, using keyword result: {err}");
                return false;
            }
        };

        if !first_pass {
            return false;
        }

        if self.strict_mode && is_borderline(&lower) {
            return match self.classifier.classify_financial(text, true).await {
                Ok(second_pass) => second_pass,
                Err(err) => {
                    tracing::warn!("strict-mode second pass failed, using keyword result: {err}");
                    false
                }
            };
        }

        true
    }
}

fn contains_keyword(lower_text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| lower_text.contains(kw))
}

/// Borderline: mentions the general economy but none of the unambiguous
/// financial terms (those already short-circuited above).
fn is_borderline(lower_text: &str) -> bool {
    contains_keyword(lower_text, ECONOMIC_CONTEXT_WORDS) && !contains_keyword(lower_text, FINANCIAL_KEYWORDS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_dictionary_triggers_short_circuit() {
        assert!(contains_keyword("please wire transfer the funds", FINANCIAL_KEYWORDS));
        assert!(!contains_keyword("what's the weather today", FINANCIAL_KEYWORDS));
    }

    #[test]
    fn borderline_requires_economic_context_without_unambiguous_term() {
        assert!(is_borderline("what's the state of the economy"));
        assert!(!is_borderline("please approve my mortgage"));
        assert!(!is_borderline("what's the weather today"));
    }
}
