//! Structural extraction of page records from HTML and plain text.
//!
//! Produces the normalized [`PageRecord`] fields: title, h1–h3 headings, body
//! text from paragraphs and list items (navigation chrome skipped), tables, and
//! heuristic entities (award names, categories, dates, prices).

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use awardsearch_shared::{
    CONTENT_CHAR_LIMIT, EntityType, PageEntity, PageMetadata, PageRecord, PageTable,
    normalize_whitespace, truncate_chars,
};

/// Cap on entities kept per page.
const MAX_ENTITIES: usize = 50;

/// Cap on body rows kept per table.
const MAX_TABLE_ROWS: usize = 50;

/// Characters of surrounding text kept on each side of an entity.
const CONTEXT_RADIUS: usize = 40;

/// Elements whose text is site chrome rather than page content.
const CHROME_TAGS: &[&str] = &["nav", "header", "footer", "aside", "script", "style", "noscript"];

macro_rules! selector {
    ($name:ident, $css:expr) => {
        static $name: LazyLock<Selector> =
            LazyLock::new(|| Selector::parse($css).expect("valid selector"));
    };
}

selector!(TITLE_SEL, "title");
selector!(HEADING_SEL, "h1, h2, h3");
selector!(BODY_TEXT_SEL, "p, li");
selector!(NESTED_BLOCK_SEL, "p, li");
selector!(FALLBACK_SEL, "main, article, body");
selector!(TABLE_SEL, "table");
selector!(ROW_SEL, "tr");
selector!(HEADER_CELL_SEL, "th");
selector!(CELL_SEL, "th, td");
selector!(LINK_SEL, "a[href]");

// ---------------------------------------------------------------------------
// HTML extraction
// ---------------------------------------------------------------------------

/// Parse an HTML document into a page record plus the links it contains.
pub fn parse_html(html: &str, url: &Url, depth: u32, content_type: &str) -> (PageRecord, Vec<String>) {
    let doc = Html::parse_document(html);

    let headings = extract_headings(&doc);
    let title = extract_title(&doc)
        .or_else(|| headings.first().cloned())
        .unwrap_or_else(|| url.to_string());
    let content = extract_body_text(&doc);
    let tables = extract_tables(&doc);
    let entities = extract_entities(&format!("{title}\n{content}"));
    let links = extract_links(&doc, url);

    let record = PageRecord {
        url: url.to_string(),
        title,
        content,
        headings,
        tables,
        entities,
        metadata: PageMetadata {
            retrieved_at: Utc::now(),
            content_type: content_type.to_string(),
            depth,
        },
    };

    (record, links)
}

/// `<title>` text, whitespace-normalized.
fn extract_title(doc: &Html) -> Option<String> {
    doc.select(&TITLE_SEL)
        .next()
        .map(|el| normalize_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

/// h1–h3 in document order, normalized and deduplicated.
fn extract_headings(doc: &Html) -> Vec<String> {
    let mut seen = HashSet::new();
    doc.select(&HEADING_SEL)
        .filter(|el| !in_chrome(el))
        .map(|el| normalize_whitespace(&el.text().collect::<String>()))
        .filter(|h| !h.is_empty() && seen.insert(h.clone()))
        .collect()
}

/// Paragraph and list-item text, one block per line, capped.
fn extract_body_text(doc: &Html) -> String {
    let mut blocks: Vec<String> = Vec::new();

    for el in doc.select(&BODY_TEXT_SEL) {
        if in_chrome(&el) {
            continue;
        }
        // A list item wrapping its own paragraphs or sub-list would repeat them.
        if el.value().name() == "li" && el.select(&NESTED_BLOCK_SEL).next().is_some() {
            continue;
        }
        let text = normalize_whitespace(&el.text().collect::<String>());
        if !text.is_empty() {
            blocks.push(text);
        }
    }

    if blocks.is_empty() {
        if let Some(el) = doc.select(&FALLBACK_SEL).next() {
            blocks.push(normalize_whitespace(&el.text().collect::<String>()));
        }
    }

    truncate_chars(&blocks.join("\n"), CONTENT_CHAR_LIMIT)
}

/// Header row (`th` cells of the first row) plus body rows.
fn extract_tables(doc: &Html) -> Vec<PageTable> {
    let mut tables = Vec::new();

    for table in doc.select(&TABLE_SEL) {
        if in_chrome(&table) {
            continue;
        }
        let mut headers = Vec::new();
        let mut rows = Vec::new();

        for (i, row) in table.select(&ROW_SEL).enumerate() {
            if i == 0 && row.select(&HEADER_CELL_SEL).next().is_some() {
                headers = cell_texts(&row, &HEADER_CELL_SEL);
                continue;
            }
            let cells = cell_texts(&row, &CELL_SEL);
            if cells.iter().any(|c| !c.is_empty()) && rows.len() < MAX_TABLE_ROWS {
                rows.push(cells);
            }
        }

        if !headers.is_empty() || !rows.is_empty() {
            tables.push(PageTable { headers, rows });
        }
    }

    tables
}

fn cell_texts(row: &ElementRef<'_>, sel: &Selector) -> Vec<String> {
    row.select(sel)
        .map(|cell| normalize_whitespace(&cell.text().collect::<String>()))
        .collect()
}

/// Whether an element sits inside navigation/header/footer chrome.
fn in_chrome(el: &ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| CHROME_TAGS.contains(&a.value().name()))
}

/// Extract all links from a document, resolved against the base URL.
pub(crate) fn extract_links(doc: &Html, base_url: &Url) -> Vec<String> {
    let mut links = Vec::new();

    for el in doc.select(&LINK_SEL) {
        if let Some(href) = el.value().attr("href") {
            // Skip anchors, javascript:, mailto:
            if href.starts_with('#')
                || href.starts_with("javascript:")
                || href.starts_with("mailto:")
                || href.starts_with("tel:")
            {
                continue;
            }

            if let Ok(mut resolved) = base_url.join(href) {
                resolved.set_fragment(None);
                links.push(resolved.to_string());
            }
        }
    }

    links
}

// ---------------------------------------------------------------------------
// Plain-text / Markdown extraction (reader strategy)
// ---------------------------------------------------------------------------

/// Build a page record from already-cleaned Markdown-ish text.
pub fn parse_text(url: &str, title: &str, text: &str, content_type: &str) -> PageRecord {
    static MD_HEADING_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^#{1,3}\s+(.+?)\s*#*$").expect("valid regex"));

    let mut headings = Vec::new();
    let mut lines = Vec::new();
    for raw in text.lines() {
        let line = normalize_whitespace(raw);
        if line.is_empty() {
            continue;
        }
        if let Some(caps) = MD_HEADING_RE.captures(&line) {
            let heading = caps[1].to_string();
            if !headings.contains(&heading) {
                headings.push(heading);
            }
        }
        lines.push(line);
    }

    let content = truncate_chars(&lines.join("\n"), CONTENT_CHAR_LIMIT);
    let title = match normalize_whitespace(title) {
        t if !t.is_empty() => t,
        _ => headings.first().cloned().unwrap_or_else(|| url.to_string()),
    };
    let entities = extract_entities(&format!("{title}\n{content}"));

    PageRecord {
        url: url.to_string(),
        title,
        content,
        headings,
        tables: Vec::new(),
        entities,
        metadata: PageMetadata {
            retrieved_at: Utc::now(),
            content_type: content_type.to_string(),
            depth: 0,
        },
    }
}

// ---------------------------------------------------------------------------
// Entity heuristics
// ---------------------------------------------------------------------------

static AWARD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:[A-Z][A-Za-z&'\-]*\s+){1,5}Awards?\b").expect("valid regex")
});

static CATEGORY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bcategory:\s*([^\n.;]{3,80})").expect("valid regex")
});

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \b(?:Jan(?:uary)?|Feb(?:ruary)?|Mar(?:ch)?|Apr(?:il)?|May|June?|July?|Aug(?:ust)?
           |Sep(?:t(?:ember)?)?|Oct(?:ober)?|Nov(?:ember)?|Dec(?:ember)?)\.?
           \s+\d{1,2}(?:st|nd|rd|th)?,?\s+\d{4}\b
        | \b\d{1,2}/\d{1,2}/\d{2,4}\b
        | \b\d{4}-\d{2}-\d{2}\b",
    )
    .expect("valid regex")
});

static PRICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\s?\d[\d,]*(?:\.\d{2})?").expect("valid regex")
});

/// Run every entity heuristic over `text`. Deduplicated by type and value.
pub fn extract_entities(text: &str) -> Vec<PageEntity> {
    let mut entities = Vec::new();
    let mut seen = HashSet::new();

    let mut push = |kind: EntityType, start: usize, end: usize, value: &str| {
        let value = normalize_whitespace(value);
        if value.is_empty() || !seen.insert((kind, value.clone())) {
            return;
        }
        entities.push(PageEntity {
            kind,
            value,
            context: context_window(text, start, end),
        });
    };

    for m in AWARD_RE.find_iter(text) {
        push(EntityType::Award, m.start(), m.end(), m.as_str());
    }
    for caps in CATEGORY_RE.captures_iter(text) {
        if let Some(m) = caps.get(1) {
            push(EntityType::Category, m.start(), m.end(), m.as_str());
        }
    }
    for m in DATE_RE.find_iter(text) {
        push(EntityType::Date, m.start(), m.end(), m.as_str());
    }
    for m in PRICE_RE.find_iter(text) {
        push(EntityType::Price, m.start(), m.end(), m.as_str().trim_end_matches(','));
    }

    entities.truncate(MAX_ENTITIES);
    entities
}

/// Text around `[start, end)`, widened by [`CONTEXT_RADIUS`] on char boundaries.
fn context_window(text: &str, start: usize, end: usize) -> String {
    let mut from = start.saturating_sub(CONTEXT_RADIUS);
    while !text.is_char_boundary(from) {
        from -= 1;
    }
    let mut to = (end + CONTEXT_RADIUS).min(text.len());
    while !text.is_char_boundary(to) {
        to += 1;
    }
    normalize_whitespace(&text[from..to])
}
