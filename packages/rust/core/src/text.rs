//! Small text utilities shared by synthesis and attribution.

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "but", "by", "can", "could", "did", "does", "each", "for", "from", "had", "has", "have",
    "how", "if", "in", "into", "is", "it", "its", "more", "most", "much", "must", "not", "of",
    "on", "or", "other", "our", "should", "some", "such", "than", "that", "the", "their",
    "them", "then", "there", "these", "they", "this", "those", "through", "to", "was", "were",
    "what", "when", "where", "which", "while", "who", "will", "with", "would", "you", "your",
];

/// Lowercased alphanumeric words, in order.
pub(crate) fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

pub(crate) fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.binary_search(&word).is_ok()
}

/// Markdown heading (`# ...`) or a bold-only line (`**...**`).
pub(crate) fn is_heading_line(line: &str) -> bool {
    let line = line.trim();
    line.starts_with('#') || (line.len() > 4 && line.starts_with("**") && line.ends_with("**"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_words_are_sorted() {
        let mut sorted = STOP_WORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, STOP_WORDS);
    }

    #[test]
    fn words_split_on_punctuation() {
        assert_eq!(words("ABA's fee: $495!"), vec!["aba", "s", "fee", "495"]);
    }

    #[test]
    fn heading_lines() {
        assert!(is_heading_line("## Summary"));
        assert!(is_heading_line("**Fees**"));
        assert!(!is_heading_line("The **fee** is $495."));
    }
}
