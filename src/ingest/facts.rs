//! Rule-based fact extraction from conversational input.
//!
//! Identifies discrete user-asserted facts (name, language, preferences,
//! goals, self-descriptions) so recall can target "facts about the user"
//! independently of the verbatim transcript. Each pattern carries its own
//! confidence; downstream these become `ConversationFact` items.

use once_cell::sync::Lazy;
use regex::Regex;

/// Maximum length of a captured fact value.
const MAX_VALUE_CHARS: usize = 120;

/// Languages the language-preference extractor accepts.
const KNOWN_LANGUAGES: &[&str] = &[
    "english", "bengali", "bangla", "spanish", "french", "german", "hindi", "japanese",
];

/// A fact pulled out of a message.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFact {
    pub key: &'static str,
    pub value: String,
    pub confidence: f64,
}

struct Extractor {
    key: &'static str,
    pattern: Regex,
    confidence: f64,
}

static EXTRACTORS: Lazy<Vec<Extractor>> = Lazy::new(|| {
    vec![
        Extractor {
            key: "name",
            pattern: Regex::new(
                r"(?i)(?:my name is|call me)\s+([A-Za-z]+(?:\s+[A-Za-z]+)?)",
            )
            .expect("valid regex"),
            confidence: 0.9,
        },
        Extractor {
            key: "language",
            pattern: Regex::new(
                r"(?i)(?:(?:speak|talk|chat|reply)\s+(?:in|using)|my language is)\s+([A-Za-z]+)",
            )
            .expect("valid regex"),
            confidence: 0.8,
        },
        Extractor {
            key: "preference",
            pattern: Regex::new(r"(?i)\b(?:i like|i prefer|i enjoy|i love)\s+([^.!?\n]+)")
                .expect("valid regex"),
            confidence: 0.7,
        },
        Extractor {
            key: "dislike",
            pattern: Regex::new(r"(?i)\b(?:i don't like|i hate|i dislike)\s+([^.!?\n]+)")
                .expect("valid regex"),
            confidence: 0.7,
        },
        Extractor {
            key: "favorite",
            pattern: Regex::new(r"(?i)\b(?:my favorite|my fav)\s+([^.!?\n]+)")
                .expect("valid regex"),
            confidence: 0.7,
        },
        Extractor {
            key: "goal",
            pattern: Regex::new(
                r"(?i)\b(?:i want to|i need to|my goal is to|i'm trying to)\s+([^.!?\n]+)",
            )
            .expect("valid regex"),
            confidence: 0.6,
        },
        Extractor {
            key: "about_me",
            pattern: Regex::new(r"(?i)\b(?:i am|i'm)\s+([^.!?\n]+)").expect("valid regex"),
            confidence: 0.6,
        },
    ]
});

/// Extract all facts asserted in a message.
pub fn extract_facts(message: &str) -> Vec<ExtractedFact> {
    let mut facts = Vec::new();
    for extractor in EXTRACTORS.iter() {
        for captures in extractor.pattern.captures_iter(message) {
            let Some(raw) = captures.get(1) else { continue };
            let value = raw.as_str().trim();
            if value.is_empty() || value.len() > MAX_VALUE_CHARS {
                continue;
            }
            if extractor.key == "language"
                && !KNOWN_LANGUAGES.contains(&value.to_lowercase().as_str())
            {
                continue;
            }
            // "i'm trying to X" already produced a goal; the about_me catch-all
            // would just restate it
            if extractor.key == "about_me" && value.to_lowercase().starts_with("trying to") {
                continue;
            }
            facts.push(ExtractedFact {
                key: extractor.key,
                value: value.to_string(),
                confidence: extractor.confidence,
            });
        }
    }
    facts
}
