//! Cross-reference validation.

use crate::error::ReferenceError;
use crate::section::Document;
use std::collections::HashSet;

#[must_use]
/// Reports every `{@id}` reference that names no section of `document`.
///
/// Errors come out in document order, then in the order the references first appear within a
/// section. A section referring to itself is fine.
pub fn validate_references(document: &Document) -> Vec<ReferenceError> {
    let known: HashSet<&str> = document.sections.iter().map(|s| s.id.as_str()).collect();

    document
        .sections
        .iter()
        .flat_map(|section| {
            section
                .references
                .iter()
                .filter(|(target, _)| !known.contains(target.as_str()))
                .map(|(target, &line)| ReferenceError {
                    source_section: section.id.clone(),
                    target: target.clone(),
                    line,
                })
        })
        .collect()
}

#[cfg(test)]
#[path = "tests/references.rs"]
mod tests;
