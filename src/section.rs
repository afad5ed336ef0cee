//! Section representation for parsed IATF documents.
//!
//! A section is a named, addressable division of a document's content block. Sections track
//! precise whole-file line coordinates so the generated index can point a reader at exactly the
//! lines it needs, and they record the cross-references found in their body.

use indexmap::IndexMap;

#[derive(Clone, Debug, PartialEq, Eq)]
/// Addressable document division with exact whole-file line coordinates.
pub struct Section {
    /// Lowercase hyphenated identifier from the `{#id}` marker.
    pub id: String,
    /// Mandatory one-line summary from `@summary:`.
    pub summary: String,
    /// Display heading: the first `#` line of the body, or the id.
    pub title: String,
    /// Value of `@created:` when given.
    pub created: Option<String>,
    /// Value of `@modified:` when given.
    pub modified: Option<String>,
    /// Body lines joined by `\n`, without markers or metadata.
    pub body: String,
    /// First body line (1-indexed, inclusive).
    pub line_start: usize,
    /// Last body line (1-indexed, inclusive).
    pub line_end: usize,
    /// Whitespace-delimited prose tokens in the body.
    pub word_count: usize,
    /// Referenced ids mapped to the first line each occurs on.
    pub references: IndexMap<String, usize>,
}

impl Section {
    /// Moves the section's coordinates by `delta` lines.
    pub fn shift(&mut self, delta: isize) {
        self.line_start = self.line_start.saturating_add_signed(delta);
        self.line_end = self.line_end.saturating_add_signed(delta);
        for line in self.references.values_mut() {
            *line = line.saturating_add_signed(delta);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Line terminator used when writing generated lines back to a document.
pub enum LineEnding {
    /// Unix `\n`.
    Lf,
    /// Windows `\r\n`.
    CrLf,
}

impl LineEnding {
    #[must_use]
    /// Prefers CRLF whenever the file already contains one, avoiding mixed endings.
    pub fn detect(text: &str) -> Self {
        if text.contains("\r\n") {
            Self::CrLf
        } else {
            Self::Lf
        }
    }

    #[must_use]
    /// The terminator's text.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }
}

#[derive(Clone, Debug)]
/// A parsed IATF file split into its preamble, index block and content block.
pub struct Document {
    /// Value of the `@title:` header line.
    pub title: String,
    /// Format marker and header lines, verbatim, without trailing blank lines.
    pub preamble: Vec<String>,
    /// Existing index text between the index and content markers. Never trusted.
    pub index_block: String,
    /// Raw text after the content marker line, byte-for-byte.
    pub content_block: String,
    /// 1-indexed file line of the first content line.
    pub content_first_line: usize,
    /// Line terminator detected in the source text.
    pub line_ending: LineEnding,
    /// Sections in order of appearance.
    pub sections: Vec<Section>,
}

impl Document {
    #[must_use]
    /// Looks up a section by id.
    pub fn section(&self, id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == id)
    }

    /// Re-bases every section so the content block starts at `first_line`.
    pub fn relocate_content(&mut self, first_line: usize) {
        let delta = first_line.cast_signed() - self.content_first_line.cast_signed();
        if delta == 0 {
            return;
        }
        for section in &mut self.sections {
            section.shift(delta);
        }
        self.content_first_line = first_line;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// One line-addressed row of the generated index, derived from a [`Section`].
pub struct IndexEntry {
    /// Section id.
    pub id: String,
    /// Display heading.
    pub title: String,
    /// First body line.
    pub line_start: usize,
    /// Last body line.
    pub line_end: usize,
    /// Prose token count.
    pub word_count: usize,
    /// One-line summary.
    pub summary: String,
    /// Creation stamp copied from the section metadata.
    pub created: Option<String>,
    /// Modification stamp copied from the section metadata.
    pub modified: Option<String>,
}

impl From<&Section> for IndexEntry {
    fn from(section: &Section) -> Self {
        Self {
            id: section.id.clone(),
            title: section.title.clone(),
            line_start: section.line_start,
            line_end: section.line_end,
            word_count: section.word_count,
            summary: section.summary.clone(),
            created: section.created.clone(),
            modified: section.modified.clone(),
        }
    }
}
