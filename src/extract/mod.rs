//! Poll item extraction from a rendered poll page.
//!
//! The page marks each candidate with `.poll_list_item`; inside it the display
//! name sits in `.poll_label` and the tally in `.txt` (e.g. `1,234표`).

use crate::errors::ExtractionError;
use crate::models::PollEntry;
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

lazy_static! {
    static ref ITEM: Selector = Selector::parse(".poll_list_item").unwrap();
    static ref LABEL: Selector = Selector::parse(".poll_label").unwrap();
    static ref COUNT: Selector = Selector::parse(".txt").unwrap();
    // digits, optionally grouped by commas, then the vote unit
    static ref COUNT_TEXT: Regex = Regex::new(r"^\s*(\d{1,3}(?:,\d{3})+|\d+)\s*표?\s*$").unwrap();
}

// Extract every poll item in document order. Zero items is an error: the page
// is either not rendered yet or not the poll page at all.
pub fn extract(page_source: &str) -> Result<Vec<PollEntry>, ExtractionError> {
    let document = Html::parse_document(page_source);

    let entries = document
        .select(&ITEM)
        .enumerate()
        .map(|(index, item)| extract_item(index, item))
        .collect::<Result<Vec<_>, _>>()?;

    if entries.is_empty() {
        return Err(ExtractionError::NoItems);
    }
    Ok(entries)
}

// Cheap readiness probe used while waiting for the page to render
pub fn has_poll_items(page_source: &str) -> bool {
    Html::parse_document(page_source).select(&ITEM).next().is_some()
}

fn extract_item(index: usize, item: ElementRef<'_>) -> Result<PollEntry, ExtractionError> {
    let label = item
        .select(&LABEL)
        .next()
        .ok_or(ExtractionError::MissingPart { index, part: "label" })?;
    let count = item
        .select(&COUNT)
        .next()
        .ok_or(ExtractionError::MissingPart { index, part: "count" })?;

    let name = element_text(label);
    if name.is_empty() {
        return Err(ExtractionError::EmptyName { index });
    }

    let text = element_text(count);
    let vote_count = parse_vote_count(&text).ok_or_else(|| ExtractionError::BadCount {
        name: name.clone(),
        text,
    })?;

    Ok(PollEntry::new(name, vote_count))
}

/// Parse a tally such as `"1,234표"`, `"57표"` or `"8"`.
pub fn parse_vote_count(text: &str) -> Option<u64> {
    let caps = COUNT_TEXT.captures(text)?;
    caps[1].replace(',', "").parse().ok()
}

// Rendered text of an element: descendant text with runs of whitespace collapsed
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
