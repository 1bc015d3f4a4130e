//! Incremental sentence segmentation for streamed text.

/// Characters that close a sentence: half- and full-width comma, period,
/// question mark and exclamation mark, plus newline.
const SENTENCE_PUNCTUATION: [char; 9] = [',', '，', '.', '。', '?', '？', '!', '！', '\n'];

/// A sentence is force-closed once its trimmed text exceeds this many chars.
pub const MAX_SENTENCE_CHARS: usize = 100;

/// Split `text` into complete sentences, continuing from `fragment`.
///
/// Returns the sentences closed by this increment (trimmed, in order) and
/// the trimmed trailing fragment to carry into the next call. Sentences
/// with no alphanumeric character are dropped.
pub fn segment(fragment: &str, text: &str) -> (Vec<String>, String) {
    let mut sentences = Vec::new();
    let mut current = String::from(fragment);

    if char_len(current.trim()) > MAX_SENTENCE_CHARS {
        sentences.push(std::mem::take(&mut current));
    }

    for ch in text.chars() {
        current.push(ch);
        if SENTENCE_PUNCTUATION.contains(&ch) || char_len(current.trim()) > MAX_SENTENCE_CHARS {
            close_sentence(&mut current, &mut sentences);
        }
    }

    let remainder = current.trim();
    if char_len(remainder) > MAX_SENTENCE_CHARS {
        sentences.push(remainder.to_string());
        return (sentences, String::new());
    }
    (sentences, remainder.to_string())
}

fn close_sentence(current: &mut String, sentences: &mut Vec<String>) {
    let sentence = current.trim();
    if sentence.chars().any(char::is_alphanumeric) {
        sentences.push(sentence.to_string());
    }
    current.clear();
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
