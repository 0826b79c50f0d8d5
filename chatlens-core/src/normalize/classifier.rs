//! Content heuristics for turns without explicit outcome flags.
//!
//! Everything here is best-effort inference, not authoritative
//! classification. The normalizer only consults a classifier for fields the
//! row did not state explicitly, and marks such turns as `inferred`.

use regex::Regex;
use std::sync::OnceLock;

/// Phrases the bot uses when it could not answer.
const FALLBACK_PHRASES: &[&str] = &[
    "ik weet het niet",
    "dat kan ik niet",
    "niet genoeg informatie",
    "ik begrijp je vraag niet",
    "niet met zekerheid beantwoorden",
    "i don't know",
    "i do not know",
    "i can't help with that",
    "not enough information",
    "i don't understand your question",
];

/// Markers of a handoff to human support.
const SUPPORT_KEYWORDS: &[&str] = &[
    "info@",
    "klantenservice",
    "customer service",
    "customer support",
    "verkoop",
    "doorzetten naar",
    "doorverbinden",
    "human agent",
];

/// Keywords that make a bot question a concrete next step.
const NEXT_STEP_KEYWORDS: &[&str] = &[
    "artikel",
    "maat",
    "kleur",
    "formaat",
    "kun je",
    "kunt u",
    "wil je",
    "size",
    "color",
    "colour",
    "would you like",
    "can you",
    "could you",
];

const POLICY_KEYWORDS: &[&str] = &[
    "retour",
    "verzending",
    "garantie",
    "betaling",
    "annuleren",
    "return",
    "refund",
    "shipping",
    "delivery",
    "warranty",
    "payment",
    "cancel",
];

/// Topic label and the keywords that select it, checked in order.
const TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    ("Returns", &["retour", "terugstur", "return", "refund"]),
    ("Shipping", &["verzending", "levering", "bezorg", "shipping", "delivery"]),
    ("Warranty", &["garantie", "warranty"]),
];

/// Combined text shorter than this (after trimming) counts as near-empty.
const NEAR_EMPTY_CHARS: usize = 3;

fn email_re() -> &'static Regex {
    static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
    EMAIL_RE.get_or_init(|| {
        Regex::new(r"[\w.+-]+@[\w-]+\.[\w.-]+").expect("valid email regex")
    })
}

fn phone_re() -> &'static Regex {
    static PHONE_RE: OnceLock<Regex> = OnceLock::new();
    PHONE_RE.get_or_init(|| Regex::new(r"\+?\d[\d\s()-]{6,}").expect("valid phone regex"))
}

fn link_re() -> &'static Regex {
    static LINK_RE: OnceLock<Regex> = OnceLock::new();
    LINK_RE.get_or_init(|| Regex::new(r"(?i)https?://\S+").expect("valid link regex"))
}

/// Text of one exchange, as seen by a classifier.
#[derive(Debug, Clone, Copy)]
pub struct TurnText<'a> {
    pub user_message: &'a str,
    pub ai_output: &'a str,
    /// The row referenced one or more products
    pub has_products: bool,
}

impl TurnText<'_> {
    /// Lowercased user message + assistant output.
    pub fn combined_lower(&self) -> String {
        format!("{}\n{}", self.user_message, self.ai_output).to_lowercase()
    }
}

/// Raw content signals. The normalizer combines them with explicit flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentSignals {
    /// Contact handoff marker present (email, support keyword, phone number)
    pub escalation_marker: bool,
    /// The answer matches known fallback phrasing
    pub fallback: bool,
    /// The answer offers a product, a link, or a next-step question
    pub success_signal: bool,
}

/// Pluggable content classifier.
///
/// Implementations must be pure: the same text always yields the same result.
pub trait OutcomeClassifier {
    /// Extract outcome signals from the exchange text.
    fn signals(&self, text: &TurnText<'_>) -> ContentSignals;

    /// Infer the exchange type when the row has none.
    fn infer_type(&self, text: &TurnText<'_>) -> String;

    /// Keyword-based topic, if any keyword matches.
    fn keyword_topic(&self, text: &TurnText<'_>) -> Option<String>;
}

/// Default keyword/regex classifier (Dutch and English phrasing).
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    fn has_escalation_marker(combined: &str) -> bool {
        SUPPORT_KEYWORDS.iter().any(|k| combined.contains(k))
            || email_re().is_match(combined)
            || phone_re().is_match(combined)
    }

    fn is_fallback(output: &str) -> bool {
        FALLBACK_PHRASES.iter().any(|p| output.contains(p))
    }

    fn has_next_step_question(output: &str) -> bool {
        output.contains('?') && NEXT_STEP_KEYWORDS.iter().any(|k| output.contains(k))
    }
}

impl OutcomeClassifier for KeywordClassifier {
    fn signals(&self, text: &TurnText<'_>) -> ContentSignals {
        let combined = text.combined_lower();
        let output = text.ai_output.to_lowercase();

        ContentSignals {
            escalation_marker: Self::has_escalation_marker(&combined),
            fallback: Self::is_fallback(&output),
            success_signal: text.has_products
                || link_re().is_match(text.ai_output)
                || Self::has_next_step_question(&output),
        }
    }

    fn infer_type(&self, text: &TurnText<'_>) -> String {
        if text.has_products {
            return "product".to_string();
        }
        let combined = text.combined_lower();
        if POLICY_KEYWORDS.iter().any(|k| combined.contains(k)) {
            return "policy".to_string();
        }
        if combined.trim().chars().count() < NEAR_EMPTY_CHARS {
            return "unknown".to_string();
        }
        "general".to_string()
    }

    fn keyword_topic(&self, text: &TurnText<'_>) -> Option<String> {
        let combined = text.combined_lower();
        TOPIC_KEYWORDS
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| combined.contains(k)))
            .map(|(label, _)| label.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text<'a>(user: &'a str, output: &'a str) -> TurnText<'a> {
        TurnText {
            user_message: user,
            ai_output: output,
            has_products: false,
        }
    }

    #[test]
    fn escalation_markers() {
        let c = KeywordClassifier::new();
        assert!(c.signals(&text("", "Mail ons op help@shop.nl")).escalation_marker);
        assert!(c.signals(&text("", "Bel +31 (0)20 123 4567")).escalation_marker);
        assert!(c.signals(&text("", "Neem contact op met de klantenservice")).escalation_marker);
        assert!(!c.signals(&text("Hoi", "Welke maat zoek je?")).escalation_marker);
    }

    #[test]
    fn fallback_phrasing_is_checked_on_output_only() {
        let c = KeywordClassifier::new();
        assert!(c.signals(&text("", "Sorry, ik weet het niet.")).fallback);
        assert!(!c.signals(&text("I don't know which size", "Which size do you need?")).fallback);
    }

    #[test]
    fn success_signals() {
        let c = KeywordClassifier::new();
        assert!(c.signals(&text("", "See https://shop.example/p/1")).success_signal);
        assert!(c.signals(&text("", "Welke kleur wil je?")).success_signal);
        assert!(!c.signals(&text("", "Welke kleur.")).success_signal);
        assert!(!c.signals(&text("", "Is dat alles?")).success_signal);

        let with_products = TurnText {
            has_products: true,
            ..text("", "")
        };
        assert!(c.signals(&with_products).success_signal);
    }

    #[test]
    fn type_inference_order() {
        let c = KeywordClassifier::new();
        let products = TurnText {
            has_products: true,
            ..text("retour", "")
        };
        assert_eq!(c.infer_type(&products), "product");
        assert_eq!(c.infer_type(&text("Hoe werkt retour?", "")), "policy");
        assert_eq!(c.infer_type(&text(" ", "")), "unknown");
        assert_eq!(c.infer_type(&text("Openingstijden?", "9-17")), "general");
    }

    #[test]
    fn keyword_topics() {
        let c = KeywordClassifier::new();
        assert_eq!(
            c.keyword_topic(&text("Can I get a refund?", "")),
            Some("Returns".to_string())
        );
        assert_eq!(
            c.keyword_topic(&text("", "Bezorging duurt 2 dagen")),
            Some("Shipping".to_string())
        );
        assert_eq!(
            c.keyword_topic(&text("Garantie op mijn fiets", "")),
            Some("Warranty".to_string())
        );
        assert_eq!(c.keyword_topic(&text("Hallo", "Hoi!")), None);
    }
}
