//! Boundary-aware text chunking.
//!
//! Splits long text into segments bounded by `max_chars` so each chunk embeds
//! into a single vector without truncation loss. Paragraph boundaries are
//! preferred, then sentence boundaries; only a single sentence longer than the
//! budget gets a hard character split.

/// Split text into bounded chunks. Empty/whitespace input yields no chunks.
pub fn split_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() || max_chars == 0 {
        return Vec::new();
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if paragraph.len() > max_chars {
            // Oversized paragraph: flush and fall back to sentences
            flush(&mut chunks, &mut current);
            for sentence in split_sentences(paragraph) {
                if sentence.len() > max_chars {
                    flush(&mut chunks, &mut current);
                    chunks.extend(hard_split(sentence, max_chars));
                } else if current.len() + sentence.len() + 1 > max_chars {
                    flush(&mut chunks, &mut current);
                    current.push_str(sentence);
                } else {
                    if !current.is_empty() {
                        current.push(' ');
                    }
                    current.push_str(sentence);
                }
            }
            flush(&mut chunks, &mut current);
        } else if current.len() + paragraph.len() + 2 > max_chars {
            flush(&mut chunks, &mut current);
            current.push_str(paragraph);
        } else {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(paragraph);
        }
    }
    flush(&mut chunks, &mut current);

    chunks
}

/// Split a paragraph into sentences on `.`, `!`, `?` followed by whitespace,
/// and on line breaks.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let bytes = text.as_bytes();
    let mut start = 0;

    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let at_terminator = matches!(b, b'.' | b'!' | b'?')
            && bytes.get(i + 1).map_or(true, |next| next.is_ascii_whitespace());
        if at_terminator || b == b'\n' {
            let end = if b == b'\n' { i } else { i + 1 };
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
        i += 1;
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

fn flush(chunks: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        chunks.push(std::mem::take(current));
    }
}

/// Last resort: split a single oversized sentence at char boundaries.
fn hard_split(sentence: &str, max_chars: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut part = String::new();
    for c in sentence.chars() {
        if part.len() + c.len_utf8() > max_chars {
            parts.push(std::mem::take(&mut part));
        }
        part.push(c);
    }
    if !part.is_empty() {
        parts.push(part);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(split_chunks("", 100).is_empty());
        assert!(split_chunks("   \n\n  ", 100).is_empty());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = split_chunks("A single short paragraph.", 100);
        assert_eq!(chunks, vec!["A single short paragraph."]);
    }

    #[test]
    fn paragraphs_pack_up_to_the_budget() {
        let text = "First paragraph here.\n\nSecond paragraph here.\n\nThird paragraph here.";
        let chunks = split_chunks(text, 50);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.len() <= 50, "chunk too long: {}", chunk.len());
        }
        // No content lost
        let rejoined = chunks.join(" ");
        assert!(rejoined.contains("First paragraph"));
        assert!(rejoined.contains("Third paragraph"));
    }

    #[test]
    fn oversized_paragraph_splits_at_sentences() {
        let text = "One sentence here. Another sentence follows. And a third one ends it.";
        let chunks = split_chunks(text, 30);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.len() <= 30);
        }
        assert!(chunks[0].starts_with("One sentence"));
    }

    #[test]
    fn giant_sentence_gets_hard_split() {
        let text = "x".repeat(250);
        let chunks = split_chunks(&text, 100);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 100);
        assert_eq!(chunks[2].len(), 50);
    }

    #[test]
    fn hard_split_respects_utf8_boundaries() {
        let text = "é".repeat(100); // 2 bytes per char
        let chunks = split_chunks(&text, 51);
        for chunk in &chunks {
            assert!(chunk.len() <= 51);
            assert!(std::str::from_utf8(chunk.as_bytes()).is_ok());
        }
    }

    #[test]
    fn sentence_splitter_handles_terminators() {
        let sentences = split_sentences("First one. Second one! Third one? Fourth");
        assert_eq!(
            sentences,
            vec!["First one.", "Second one!", "Third one?", "Fourth"]
        );
    }

    #[test]
    fn sentence_splitter_ignores_inline_dots() {
        let sentences = split_sentences("Version 2.3 shipped today. It works.");
        assert_eq!(sentences, vec!["Version 2.3 shipped today.", "It works."]);
    }

    #[test]
    fn newlines_break_sentences() {
        let sentences = split_sentences("line one\nline two");
        assert_eq!(sentences, vec!["line one", "line two"]);
    }
}
