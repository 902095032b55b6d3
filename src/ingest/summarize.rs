//! Extractive summarization for long documents.
//!
//! Produces a condensed Summary item so high-level recall doesn't have to scan
//! every chunk. Lead sentences are taken greedily until the character budget
//! is spent — generative summarization belongs to the LLM collaborator outside
//! this engine.

use super::chunk::split_sentences;

/// Build a lead-sentence summary within `max_chars`. Returns an empty string
/// for empty input.
pub fn extract_summary(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.is_empty() || max_chars == 0 {
        return String::new();
    }

    let mut summary = String::new();
    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        // Lead sentence of each paragraph carries the most signal
        let Some(sentence) = split_sentences(paragraph).into_iter().next() else {
            continue;
        };
        if summary.is_empty() {
            if sentence.len() > max_chars {
                // Degenerate case: one huge opening sentence
                let end = sentence
                    .char_indices()
                    .take_while(|(i, _)| *i < max_chars)
                    .last()
                    .map(|(i, c)| i + c.len_utf8())
                    .unwrap_or(0);
                return sentence[..end].to_string();
            }
            summary.push_str(sentence);
        } else {
            if summary.len() + sentence.len() + 1 > max_chars {
                break;
            }
            summary.push(' ');
            summary.push_str(sentence);
        }
    }
    summary
}
