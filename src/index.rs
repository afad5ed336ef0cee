//! Rendering and reading of the generated index block.
//!
//! The index block is a header of three HTML comments (a do-not-edit notice, the generation time
//! and the content digest) followed by one entry per section in document order. Entries carry no
//! time-dependent data, so the only bytes that differ between two generations over unchanged
//! content are in the `Generated:` comment.

use crate::digest::ContentDigest;
use crate::section::IndexEntry;
use regex::Regex;
use std::sync::LazyLock;

/// Lines taken by [`IndexHeader::render`]: three comments and a blank separator.
pub const HEADER_LINES: usize = 4;

const NOTICE: &str = "<!-- AUTO-GENERATED - DO NOT EDIT MANUALLY -->";
const GENERATED_PREFIX: &str = "<!-- Generated:";
const HASH_PREFIX: &str = "<!-- Content-Hash:";
const COMMENT_SUFFIX: &str = "-->";

static ENTRY_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^#{1,6}\s+(.*?)\s*\{#([a-z][a-z0-9-]*)\s*\|\s*lines:(\d+)-(\d+)\s*\|\s*words:(\d+)\s*\}$",
    )
    .expect("valid index entry pattern")
});

#[derive(Clone, Debug, PartialEq, Eq)]
/// Generation time and content digest recorded at the top of an index block.
pub struct IndexHeader {
    /// RFC 3339 generation timestamp, kept verbatim.
    pub generated: String,
    /// Digest of the content block the index was built from.
    pub digest: ContentDigest,
}

impl IndexHeader {
    #[must_use]
    /// Reads the header comments of a stored index block.
    ///
    /// Returns `None` unless both the `Generated:` and a well-formed `Content-Hash:` comment are
    /// present, in which case the stored index is treated as having no usable digest.
    pub fn parse(index_block: &str) -> Option<Self> {
        let mut generated = None;
        let mut digest = None;
        for line in index_block.lines().map(str::trim) {
            if let Some(value) = comment_value(line, GENERATED_PREFIX) {
                generated = Some(value.to_string());
            } else if let Some(value) = comment_value(line, HASH_PREFIX) {
                digest = value.parse().ok();
            }
        }
        Some(Self {
            generated: generated.filter(|g| !g.is_empty())?,
            digest: digest?,
        })
    }

    #[must_use]
    /// Header comment lines followed by the blank separator line.
    pub fn render(&self) -> Vec<String> {
        vec![
            NOTICE.to_string(),
            format!("{GENERATED_PREFIX} {} {COMMENT_SUFFIX}", self.generated),
            format!("{HASH_PREFIX} {} {COMMENT_SUFFIX}", self.digest),
            String::new(),
        ]
    }
}

fn comment_value<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.strip_prefix(prefix)?
        .strip_suffix(COMMENT_SUFFIX)
        .map(str::trim)
}

#[must_use]
/// Renders the entry lines for `entries`, each entry followed by a blank line.
pub fn render_entries(entries: &[IndexEntry]) -> Vec<String> {
    let mut lines = Vec::with_capacity(entries.len() * 4);
    for entry in entries {
        lines.push(format!(
            "# {} {{#{} | lines:{}-{} | words:{}}}",
            entry.title, entry.id, entry.line_start, entry.line_end, entry.word_count
        ));
        lines.push(format!("> {}", entry.summary));

        let stamps: Vec<String> = [("Created", &entry.created), ("Modified", &entry.modified)]
            .into_iter()
            .filter_map(|(label, value)| value.as_ref().map(|v| format!("{label}: {v}")))
            .collect();
        if !stamps.is_empty() {
            lines.push(format!("  {}", stamps.join(" | ")));
        }
        lines.push(String::new());
    }
    lines
}

#[must_use]
/// Renders a complete index block: header comments then entries.
pub fn render_index(header: &IndexHeader, entries: &[IndexEntry]) -> Vec<String> {
    let mut lines = header.render();
    lines.extend(render_entries(entries));
    lines
}

#[must_use]
/// Reads the entries of a stored index block, in the order they appear.
///
/// Lines that are not part of a recognisable entry are skipped, so a hand-edited or partly
/// corrupted index yields whatever entries can still be read.
pub fn parse_entries(index_block: &str) -> Vec<IndexEntry> {
    let mut entries: Vec<IndexEntry> = Vec::new();
    let mut current: Option<usize> = None;

    for line in index_block.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            current = None;
            continue;
        }
        if let Some(caps) = ENTRY_HEADING.captures(trimmed) {
            let (Ok(line_start), Ok(line_end), Ok(word_count)) =
                (caps[3].parse(), caps[4].parse(), caps[5].parse())
            else {
                current = None;
                continue;
            };
            entries.push(IndexEntry {
                id: caps[2].to_string(),
                title: caps[1].to_string(),
                line_start,
                line_end,
                word_count,
                summary: String::new(),
                created: None,
                modified: None,
            });
            current = Some(entries.len() - 1);
            continue;
        }
        let Some(entry) = current.map(|i| &mut entries[i]) else {
            continue;
        };
        if let Some(summary) = trimmed.strip_prefix('>') {
            entry.summary = summary.trim().to_string();
        } else {
            for part in trimmed.split('|').map(str::trim) {
                if let Some(value) = part.strip_prefix("Created:") {
                    entry.created = Some(value.trim().to_string());
                } else if let Some(value) = part.strip_prefix("Modified:") {
                    entry.modified = Some(value.trim().to_string());
                }
            }
        }
    }
    entries
}

#[cfg(test)]
#[path = "tests/index.rs"]
mod tests;
