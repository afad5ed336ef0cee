//! Line-oriented parser for IATF documents.
//!
//! The file is split at its boundary markers into a preamble, the (untrusted) index block and the
//! content block. The content block is then scanned line by line with a small state machine that
//! tracks the open section, whether its metadata block is still running, and whether the scan is
//! inside a fenced code block. Every rejection names the line it happened on.

use crate::error::ParseError;
use crate::section::{Document, LineEnding, Section};
use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// First line of every IATF document.
pub const FORMAT_MARKER: &str = ":::IATF";
/// Line opening the generated index block.
pub const INDEX_MARKER: &str = "===INDEX===";
/// Line opening the content block.
pub const CONTENT_MARKER: &str = "===CONTENT===";

const TITLE_PREFIX: &str = "@title:";
const FENCE: &str = "```";

static MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{([#/])([a-z][a-z0-9-]*)\}$").expect("valid marker pattern"));
static METADATA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@([A-Za-z][A-Za-z0-9_-]*):(.*)$").expect("valid metadata pattern"));
// Wider than the id syntax so that a reference to an impossible id is still reported.
static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{@([a-zA-Z][a-zA-Z0-9_-]*)\}").expect("valid reference pattern")
});

/// A physical line of the source with its 1-indexed number and byte span.
struct RawLine<'a> {
    number: usize,
    text: &'a str,
    end: usize,
}

fn raw_lines(text: &str) -> Vec<RawLine<'_>> {
    let mut offset = 0;
    text.split_inclusive('\n')
        .enumerate()
        .map(|(i, chunk)| {
            offset += chunk.len();
            let text = chunk.strip_suffix('\n').unwrap_or(chunk);
            let text = text.strip_suffix('\r').unwrap_or(text);
            RawLine {
                number: i + 1,
                text,
                end: offset,
            }
        })
        .collect()
}

/// Where the boundary markers sit in a file.
struct Layout {
    index_marker: Option<usize>,
    content_marker: usize,
}

fn locate_markers(lines: &[RawLine<'_>]) -> Result<Layout, ParseError> {
    let mut index_marker = None;
    for (i, line) in lines.iter().enumerate() {
        match line.text.trim() {
            CONTENT_MARKER => {
                return Ok(Layout {
                    index_marker,
                    content_marker: i,
                })
            }
            INDEX_MARKER if index_marker.is_some() => {
                return Err(ParseError::DuplicateMarker {
                    line: line.number,
                    marker: INDEX_MARKER,
                })
            }
            INDEX_MARKER => index_marker = Some(i),
            _ => {}
        }
    }
    Err(ParseError::MissingContentMarker {
        line: lines.len().max(1),
    })
}

/// Splits `text` after its content marker line into the head (preamble, index block and marker)
/// and the raw content block. Returns `None` when there is no content marker.
///
/// This is the cheap path used by the watch loop: it never looks at section markup.
#[must_use]
pub fn split_content(text: &str) -> Option<(&str, &str)> {
    let lines = raw_lines(text);
    let marker = lines
        .iter()
        .find(|line| line.text.trim() == CONTENT_MARKER)?;
    Some(text.split_at(marker.end))
}

/// Parses a whole IATF file.
///
/// # Errors
///
/// Returns the first structural problem found, with the line it occurs on.
pub fn parse_document(text: &str) -> Result<Document, ParseError> {
    let lines = raw_lines(text);

    match lines.first() {
        Some(first) if first.text.trim() == FORMAT_MARKER => {}
        _ => return Err(ParseError::MissingFormatMarker { line: 1 }),
    }

    let layout = locate_markers(&lines)?;
    let header_end = layout.index_marker.unwrap_or(layout.content_marker);

    let title = lines[1..header_end]
        .iter()
        .find_map(|line| line.text.trim().strip_prefix(TITLE_PREFIX))
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .ok_or(ParseError::MissingTitle {
            line: lines[header_end].number,
        })?
        .to_string();

    let mut preamble: Vec<String> = lines[..header_end]
        .iter()
        .map(|line| line.text.to_string())
        .collect();
    while preamble.last().is_some_and(|line| line.trim().is_empty()) {
        preamble.pop();
    }

    let index_block = layout.index_marker.map_or_else(String::new, |start| {
        lines[start + 1..layout.content_marker]
            .iter()
            .map(|line| line.text)
            .collect::<Vec<_>>()
            .join("\n")
    });

    let marker_line = &lines[layout.content_marker];
    let content_block = text[marker_line.end..].to_string();
    let content_first_line = marker_line.number + 1;

    let sections = parse_sections(&lines[layout.content_marker + 1..], marker_line.number)?;

    Ok(Document {
        title,
        preamble,
        index_block,
        content_block,
        content_first_line,
        line_ending: LineEnding::detect(text),
        sections,
    })
}

/// Section under construction while the scanner is between its markers.
struct OpenSection {
    id: String,
    open_line: usize,
    summary: Option<String>,
    created: Option<String>,
    modified: Option<String>,
    in_metadata: bool,
    last_key: Option<String>,
    in_fence: bool,
    body_start: Option<usize>,
    body: Vec<String>,
    references: IndexMap<String, usize>,
}

impl OpenSection {
    fn new(id: String, open_line: usize) -> Self {
        Self {
            id,
            open_line,
            summary: None,
            created: None,
            modified: None,
            in_metadata: true,
            last_key: None,
            in_fence: false,
            body_start: None,
            body: Vec::new(),
            references: IndexMap::new(),
        }
    }

    /// Consumes one metadata line, returning `false` if the line is not metadata.
    ///
    /// Keys other than summary, created and modified are accepted and ignored.
    fn metadata(&mut self, line: &RawLine<'_>) -> Result<bool, ParseError> {
        if let Some(caps) = METADATA.captures(line.text) {
            let key = &caps[1];
            let slot = match key {
                "summary" => &mut self.summary,
                "created" => &mut self.created,
                "modified" => &mut self.modified,
                _ => {
                    self.last_key = Some(key.to_string());
                    return Ok(true);
                }
            };
            if slot.is_some() {
                return Err(ParseError::DuplicateMetadata {
                    line: line.number,
                    key: key.to_string(),
                });
            }
            *slot = Some(caps[2].trim().to_string());
            self.last_key = Some(key.to_string());
            return Ok(true);
        }

        let indented = line.text.starts_with([' ', '\t']) && !line.text.trim().is_empty();
        if indented && self.last_key.as_deref() == Some("summary") {
            return Err(ParseError::MultilineSummary {
                line: line.number,
                id: self.id.clone(),
            });
        }
        Ok(false)
    }

    fn end_metadata(&mut self) -> Result<(), ParseError> {
        self.in_metadata = false;
        if self.summary.as_deref().is_none_or(str::is_empty) {
            return Err(ParseError::MissingSummary {
                line: self.open_line,
                id: self.id.clone(),
            });
        }
        Ok(())
    }

    fn push_body(&mut self, line: &RawLine<'_>) -> Result<(), ParseError> {
        let trimmed = line.text.trim();
        if trimmed.starts_with(FENCE) {
            self.in_fence = !self.in_fence;
        } else if !self.in_fence {
            if let Some(caps) = METADATA.captures(line.text) {
                if matches!(&caps[1], "summary" | "created" | "modified") {
                    return Err(ParseError::MisplacedMetadata {
                        line: line.number,
                        key: caps[1].to_string(),
                    });
                }
            }
            for caps in REFERENCE.captures_iter(line.text) {
                self.references
                    .entry(caps[1].to_string())
                    .or_insert(line.number);
            }
        }
        self.body_start.get_or_insert(line.number);
        self.body.push(line.text.to_string());
        Ok(())
    }

    fn close(self, close_line: usize) -> Result<Section, ParseError> {
        let Some(line_start) = self.body_start else {
            return Err(ParseError::EmptySection {
                line: close_line,
                id: self.id,
            });
        };
        let title = self
            .body
            .iter()
            .find_map(|line| {
                line.starts_with('#')
                    .then(|| line.trim_start_matches('#').trim())
            })
            .filter(|title| !title.is_empty())
            .map_or_else(|| self.id.clone(), str::to_string);
        let body = self.body.join("\n");
        let word_count = count_words(&body);

        Ok(Section {
            id: self.id,
            summary: self.summary.unwrap_or_default(),
            title,
            created: self.created,
            modified: self.modified,
            body,
            line_start,
            line_end: close_line - 1,
            word_count,
            references: self.references,
        })
    }
}

/// Counts prose tokens, ignoring cross-reference markers entirely.
#[must_use]
pub fn count_words(body: &str) -> usize {
    REFERENCE
        .replace_all(body, " ")
        .split_whitespace()
        .count()
}

fn parse_sections(
    lines: &[RawLine<'_>],
    content_marker_line: usize,
) -> Result<Vec<Section>, ParseError> {
    let mut sections = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut open: Option<OpenSection> = None;

    for line in lines {
        let trimmed = line.text.trim();
        let in_fence = open.as_ref().is_some_and(|s| s.in_fence);

        if !in_fence && (trimmed.starts_with("{#") || trimmed.starts_with("{/")) {
            let caps = MARKER
                .captures(trimmed)
                .ok_or_else(|| ParseError::MalformedMarker {
                    line: line.number,
                    text: trimmed.to_string(),
                })?;
            let id = caps[2].to_string();

            if &caps[1] == "#" {
                if let Some(current) = &open {
                    return Err(ParseError::NestedSection {
                        line: line.number,
                        id,
                        open: current.id.clone(),
                    });
                }
                if let Some(&first_line) = seen.get(&id) {
                    return Err(ParseError::DuplicateId {
                        line: line.number,
                        id,
                        first_line,
                    });
                }
                seen.insert(id.clone(), line.number);
                open = Some(OpenSection::new(id, line.number));
                continue;
            }

            let Some(mut current) = open.take() else {
                return Err(ParseError::UnmatchedClose {
                    line: line.number,
                    id,
                });
            };
            if current.id != id {
                return Err(ParseError::MismatchedClose {
                    line: line.number,
                    expected: current.id,
                    found: id,
                });
            }
            if current.in_metadata {
                current.end_metadata()?;
            }
            sections.push(current.close(line.number)?);
            continue;
        }

        match open.as_mut() {
            Some(current) => {
                if current.in_metadata {
                    if current.metadata(line)? {
                        continue;
                    }
                    current.end_metadata()?;
                }
                current.push_body(line)?;
            }
            None if trimmed.is_empty() => {}
            None => return Err(ParseError::TextOutsideSection { line: line.number }),
        }
    }

    if let Some(current) = open {
        return Err(ParseError::UnterminatedSection {
            line: current.open_line,
            id: current.id,
        });
    }
    if sections.is_empty() {
        return Err(ParseError::NoSections {
            line: content_marker_line,
        });
    }
    Ok(sections)
}

#[cfg(test)]
#[path = "tests/parser.rs"]
mod tests;
