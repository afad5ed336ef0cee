//! Read-only queries: the stored index, single sections and the reference graph.
//!
//! These operate on the text of one document and never write to it.

use crate::error::QueryError;
use crate::index;
use crate::parser::{self, INDEX_MARKER};
use crate::section::Document;
use std::collections::BTreeSet;

/// Returns the stored index block lines (everything between the index and content markers).
///
/// # Errors
///
/// Returns [`QueryError::NoIndex`] if the document has never been indexed, or a parse error if it
/// is structurally invalid.
pub fn stored_index(text: &str) -> Result<Vec<String>, QueryError> {
    let document = parser::parse_document(text)?;
    if !has_index(text) {
        return Err(QueryError::NoIndex);
    }
    Ok(document.index_block.lines().map(str::to_string).collect())
}

fn has_index(text: &str) -> bool {
    parser::split_content(text).is_some_and(|(head, _)| {
        head.lines().any(|line| line.trim() == INDEX_MARKER)
    })
}

/// Returns the body lines of section `id`, i.e. exactly the lines its index entry points at.
///
/// # Errors
///
/// Returns [`QueryError::SectionNotFound`] for an unknown id, or a parse error.
pub fn read_section(text: &str, id: &str) -> Result<Vec<String>, QueryError> {
    let document = parser::parse_document(text)?;
    let section = document
        .section(id)
        .ok_or_else(|| QueryError::SectionNotFound(id.to_string()))?;
    Ok(section.body.lines().map(str::to_string).collect())
}

/// Finds a section id by title using the stored index.
///
/// An exact case-insensitive match wins; otherwise the first entry whose title contains `title`
/// (case-insensitively) is taken.
///
/// # Errors
///
/// Returns [`QueryError::NoIndex`] if there is no index, [`QueryError::TitleNotFound`] if nothing
/// matches, or a parse error.
pub fn find_by_title(text: &str, title: &str) -> Result<String, QueryError> {
    let document = parser::parse_document(text)?;
    if !has_index(text) {
        return Err(QueryError::NoIndex);
    }
    let entries = index::parse_entries(&document.index_block);
    let wanted = title.to_lowercase();

    entries
        .iter()
        .find(|entry| entry.title.to_lowercase() == wanted)
        .or_else(|| {
            entries
                .iter()
                .find(|entry| entry.title.to_lowercase().contains(&wanted))
        })
        .map(|entry| entry.id.clone())
        .ok_or_else(|| QueryError::TitleNotFound(title.to_string()))
}

#[must_use]
/// Renders the reference graph, one line per section in document order.
///
/// Outgoing lines read `id -> a, b`; with `incoming` they read `id <- a, b`. Sections without
/// edges print their bare id. Neighbours are sorted and deduplicated.
pub fn graph(document: &Document, incoming: bool) -> Vec<String> {
    let arrow = if incoming { "<-" } else { "->" };
    document
        .sections
        .iter()
        .map(|section| {
            let neighbours: BTreeSet<&str> = if incoming {
                document
                    .sections
                    .iter()
                    .filter(|source| source.references.contains_key(&section.id))
                    .map(|source| source.id.as_str())
                    .collect()
            } else {
                section.references.keys().map(String::as_str).collect()
            };
            if neighbours.is_empty() {
                section.id.clone()
            } else {
                let joined: Vec<&str> = neighbours.into_iter().collect();
                format!("{} {arrow} {}", section.id, joined.join(", "))
            }
        })
        .collect()
}

#[cfg(test)]
#[path = "tests/query.rs"]
mod tests;
