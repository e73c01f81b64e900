//! Source attribution for synthesized answers.
//!
//! In [`CitationMode::Paragraph`] every non-heading paragraph gets a marker
//! such as ` [1, 3]` naming the sources whose text covers at least 30% of the
//! paragraph's significant words; a paragraph no source clears is attributed
//! to source 1. [`CitationMode::SingleSource`] surfaces only the single most
//! relevant source as a footnote.

use std::collections::HashSet;

use tracing::debug;

use awardsearch_shared::{Citation, CitationMode, CitedAnswer, PageRecord};

use crate::text::{is_heading_line, is_stop_word, words};

/// Fraction of a paragraph's significant words a source must contain.
const SUPPORT_THRESHOLD: f64 = 0.3;

/// Attaches citation markers and a footnote block.
pub struct CitationSystem {
    mode: CitationMode,
}

impl CitationSystem {
    pub fn new(mode: CitationMode) -> Self {
        Self { mode }
    }

    pub fn add_citations(&self, answer: &str, sources: &[PageRecord]) -> CitedAnswer {
        if sources.is_empty() {
            return CitedAnswer {
                answer: answer.to_string(),
                citations: Vec::new(),
            };
        }

        let vocabularies: Vec<HashSet<String>> = sources.iter().map(source_vocabulary).collect();

        match self.mode {
            CitationMode::Paragraph => paragraph_citations(answer, sources, &vocabularies),
            CitationMode::SingleSource => single_source_citation(answer, sources, &vocabularies),
        }
    }
}

fn paragraph_citations(
    answer: &str,
    sources: &[PageRecord],
    vocabularies: &[HashSet<String>],
) -> CitedAnswer {
    let mut cited = Vec::new();

    for paragraph in answer.split("\n\n") {
        let trimmed = paragraph.trim_end();
        if trimmed.trim().is_empty() || trimmed.lines().all(is_heading_line) {
            cited.push(trimmed.to_string());
            continue;
        }

        let body: String = trimmed
            .lines()
            .filter(|l| !is_heading_line(l))
            .collect::<Vec<_>>()
            .join(" ");
        let significant = significant_words(&body);

        let mut supporting: Vec<usize> = vocabularies
            .iter()
            .enumerate()
            .filter(|(_, vocab)| supports(&significant, vocab))
            .map(|(i, _)| i + 1)
            .collect();
        if supporting.is_empty() {
            supporting.push(1);
        }

        let marker = supporting
            .iter()
            .map(usize::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        cited.push(format!("{trimmed} [{marker}]"));
    }

    let mut text = cited.join("\n\n");
    text.push_str("\n\nSources:\n");
    text.push_str(&footnotes(sources.iter().enumerate().map(|(i, p)| (i + 1, p))));

    debug!(sources = sources.len(), "paragraph citations attached");

    CitedAnswer {
        answer: text,
        citations: sources.iter().map(Citation::from_page).collect(),
    }
}

fn single_source_citation(
    answer: &str,
    sources: &[PageRecord],
    vocabularies: &[HashSet<String>],
) -> CitedAnswer {
    let significant = significant_words(answer);

    // Highest overlap wins; ties keep the earliest source.
    let mut best = 0;
    let mut best_overlap = 0;
    for (i, vocab) in vocabularies.iter().enumerate() {
        let overlap = significant.iter().filter(|w| vocab.contains(*w)).count();
        if overlap > best_overlap {
            best = i;
            best_overlap = overlap;
        }
    }

    let source = &sources[best];
    let text = format!(
        "{}\n\nSource:\n{}",
        answer.trim_end(),
        footnotes(std::iter::once((1, source)))
    );

    CitedAnswer {
        answer: text,
        citations: vec![Citation::from_page(source)],
    }
}

fn footnotes<'a>(entries: impl Iterator<Item = (usize, &'a PageRecord)>) -> String {
    entries
        .map(|(n, page)| format!("[{n}] {} - {}", page.title, page.url))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Words longer than three characters that are not stop words.
fn significant_words(text: &str) -> HashSet<String> {
    words(text)
        .into_iter()
        .filter(|w| w.chars().count() > 3 && !is_stop_word(w))
        .collect()
}

fn source_vocabulary(page: &PageRecord) -> HashSet<String> {
    let mut vocab: HashSet<String> = words(&page.title).into_iter().collect();
    for heading in &page.headings {
        vocab.extend(words(heading));
    }
    vocab.extend(words(&page.content));
    vocab
}

fn supports(significant: &HashSet<String>, vocab: &HashSet<String>) -> bool {
    if significant.is_empty() {
        return false;
    }
    let found = significant.iter().filter(|w| vocab.contains(*w)).count();
    found as f64 / significant.len() as f64 >= SUPPORT_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use awardsearch_shared::PageMetadata;

    fn page(url: &str, title: &str, content: &str) -> PageRecord {
        PageRecord {
            url: url.into(),
            title: title.into(),
            content: content.into(),
            headings: vec![],
            tables: vec![],
            entities: vec![],
            metadata: PageMetadata {
                retrieved_at: chrono::Utc::now(),
                content_type: "text/html".into(),
                depth: 0,
            },
        }
    }

    fn sources() -> Vec<PageRecord> {
        vec![
            page(
                "https://www.stevieawards.com/aba/deadlines",
                "ABA Deadlines",
                "The final entry deadline for the American Business Awards is March 10, 2026.",
            ),
            page(
                "https://www.stevieawards.com/aba/entry-fees",
                "ABA Entry Fees",
                "Standard entry fees are $495 per nomination. Late entries incur an additional fee.",
            ),
            page(
                "https://www.stevieawards.com/aba",
                "American Business Awards",
                "The American Business Awards honor organizations. Entry deadline in March.",
            ),
        ]
    }

    /// Paragraphs before the footnote block.
    fn body_paragraphs(answer: &str) -> Vec<&str> {
        let body = answer.split("\n\nSources:\n").next().unwrap();
        body.split("\n\n").collect()
    }

    #[test]
    fn markers_list_supporting_sources() {
        let system = CitationSystem::new(CitationMode::Paragraph);
        let answer = "The final entry deadline is March 10, 2026.\n\n\
                      Standard fees are $495 per nomination, plus late fees.";
        let cited = system.add_citations(answer, &sources());
        let paragraphs = body_paragraphs(&cited.answer);

        assert_eq!(paragraphs[0], "The final entry deadline is March 10, 2026. [1, 3]");
        assert_eq!(paragraphs[1], "Standard fees are $495 per nomination, plus late fees. [2]");
        assert_eq!(cited.citations.len(), 3);
    }

    #[test]
    fn unsupported_paragraph_defaults_to_first_source() {
        let system = CitationSystem::new(CitationMode::Paragraph);
        let cited = system.add_citations("Quantum chromodynamics explains gluons.", &sources());
        assert!(cited.answer.starts_with("Quantum chromodynamics explains gluons. [1]"));
    }

    #[test]
    fn every_paragraph_is_cited_and_headings_are_skipped() {
        let system = CitationSystem::new(CitationMode::Paragraph);
        let answer = "## Summary\n\nDeadline is March.\n\n## Detailed Information\n\n\
                      Fees are $495.\n\nOk.\n\n- Entries close March 10\n- Fees rise after";
        let cited = system.add_citations(answer, &sources());

        for paragraph in body_paragraphs(&cited.answer) {
            if paragraph.lines().all(is_heading_line) {
                assert!(!paragraph.contains('['), "{paragraph}");
            } else {
                assert!(paragraph.trim_end().ends_with(']'), "{paragraph}");
            }
        }
    }

    #[test]
    fn footnotes_follow_source_order() {
        let system = CitationSystem::new(CitationMode::Paragraph);
        let cited = system.add_citations("Deadline is March.", &sources());
        let footer = cited.answer.split("\n\nSources:\n").nth(1).unwrap();
        assert_eq!(
            footer,
            "[1] ABA Deadlines - https://www.stevieawards.com/aba/deadlines\n\
             [2] ABA Entry Fees - https://www.stevieawards.com/aba/entry-fees\n\
             [3] American Business Awards - https://www.stevieawards.com/aba"
        );
    }

    #[test]
    fn no_sources_leaves_answer_untouched() {
        let system = CitationSystem::new(CitationMode::Paragraph);
        let cited = system.add_citations("Nothing found.", &[]);
        assert_eq!(cited.answer, "Nothing found.");
        assert!(cited.citations.is_empty());
    }

    #[test]
    fn single_source_mode_picks_best_match() {
        let system = CitationSystem::new(CitationMode::SingleSource);
        let cited = system.add_citations("Standard entry fees are $495 per nomination.", &sources());

        assert_eq!(cited.citations.len(), 1);
        assert_eq!(cited.citations[0].title, "ABA Entry Fees");
        assert!(cited.answer.ends_with(
            "Source:\n[1] ABA Entry Fees - https://www.stevieawards.com/aba/entry-fees"
        ));
        assert!(!cited.answer.contains("[2]"));
    }
}
