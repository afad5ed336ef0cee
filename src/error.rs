//! Error taxonomy shared by the parser, the rebuild engine and the watch registry.
//!
//! Parse errors are fatal for the document they occur in and always carry the 1-indexed line of
//! the offending text. Reference errors are warnings: they are collected and reported, but never
//! stop a rebuild. I/O and registry errors carry the path they relate to.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
/// Structural problem that prevents a document from being indexed.
pub enum ParseError {
    /// The first line is not the `:::IATF` format marker.
    #[error("missing format declaration (:::IATF)")]
    MissingFormatMarker {
        /// Line holding the unexpected text.
        line: usize,
    },
    /// The header has no `@title:` line.
    #[error("missing @title: declaration in the header")]
    MissingTitle {
        /// Line where the header ends.
        line: usize,
    },
    /// No `===CONTENT===` line was found.
    #[error("no ===CONTENT=== section found")]
    MissingContentMarker {
        /// Last line of the file.
        line: usize,
    },
    /// A boundary marker appears more than once.
    #[error("duplicate {marker} marker")]
    DuplicateMarker {
        /// Line of the repeated marker.
        line: usize,
        /// The repeated marker text.
        marker: &'static str,
    },
    /// A line looks like a section marker but is not `{#id}` or `{/id}`.
    #[error("malformed section marker: {text}")]
    MalformedMarker {
        /// Line of the marker.
        line: usize,
        /// The offending text, trimmed.
        text: String,
    },
    /// A section opens while another one is still open.
    #[error("section {id} opens inside unclosed section {open}")]
    NestedSection {
        /// Line of the inner opening marker.
        line: usize,
        /// Id of the inner section.
        id: String,
        /// Id of the section that is still open.
        open: String,
    },
    /// Two sections share an id.
    #[error("duplicate section id {id} (first opened at line {first_line})")]
    DuplicateId {
        /// Line of the second opening marker.
        line: usize,
        /// The shared id.
        id: String,
        /// Line of the first opening marker.
        first_line: usize,
    },
    /// A closing marker appears with no section open.
    #[error("closing tag without matching opening: {id}")]
    UnmatchedClose {
        /// Line of the closing marker.
        line: usize,
        /// Id named by the closing marker.
        id: String,
    },
    /// A closing marker names a different section than the open one.
    #[error("closing tag {found} does not match open section {expected}")]
    MismatchedClose {
        /// Line of the closing marker.
        line: usize,
        /// Id of the open section.
        expected: String,
        /// Id named by the closing marker.
        found: String,
    },
    /// A section is still open at the end of the file.
    #[error("unclosed section: {id}")]
    UnterminatedSection {
        /// Line of the opening marker.
        line: usize,
        /// Id of the unclosed section.
        id: String,
    },
    /// A section has no `@summary:` line, or an empty one.
    #[error("section {id} is missing @summary")]
    MissingSummary {
        /// Line of the opening marker.
        line: usize,
        /// Id of the section.
        id: String,
    },
    /// The summary continues onto an indented second line.
    #[error("@summary of section {id} must be a single line")]
    MultilineSummary {
        /// Line of the continuation.
        line: usize,
        /// Id of the section.
        id: String,
    },
    /// A metadata key appears twice in one section.
    #[error("@{key} given more than once")]
    DuplicateMetadata {
        /// Line of the second entry.
        line: usize,
        /// The repeated key.
        key: String,
    },
    /// Section metadata after the first body line.
    #[error("@{key} must directly follow the opening marker")]
    MisplacedMetadata {
        /// Line of the misplaced entry.
        line: usize,
        /// The metadata key.
        key: String,
    },
    /// A section has metadata but no body lines.
    #[error("section {id} has no content")]
    EmptySection {
        /// Line of the closing marker.
        line: usize,
        /// Id of the section.
        id: String,
    },
    /// Non-blank text in the content block outside any section.
    #[error("content outside section block")]
    TextOutsideSection {
        /// Line of the stray text.
        line: usize,
    },
    /// The content block holds no sections.
    #[error("no sections found")]
    NoSections {
        /// Line of the content marker.
        line: usize,
    },
}

impl ParseError {
    #[must_use]
    /// The 1-indexed line the error was detected on.
    pub fn line(&self) -> usize {
        match self {
            Self::MissingFormatMarker { line }
            | Self::MissingTitle { line }
            | Self::MissingContentMarker { line }
            | Self::DuplicateMarker { line, .. }
            | Self::MalformedMarker { line, .. }
            | Self::NestedSection { line, .. }
            | Self::DuplicateId { line, .. }
            | Self::UnmatchedClose { line, .. }
            | Self::MismatchedClose { line, .. }
            | Self::UnterminatedSection { line, .. }
            | Self::MissingSummary { line, .. }
            | Self::MultilineSummary { line, .. }
            | Self::DuplicateMetadata { line, .. }
            | Self::MisplacedMetadata { line, .. }
            | Self::EmptySection { line, .. }
            | Self::TextOutsideSection { line }
            | Self::NoSections { line } => *line,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("reference {{@{target}}} at line {line} in section {source_section}: target section does not exist")]
/// Cross-reference naming a section id the document does not define.
pub struct ReferenceError {
    /// Section whose body holds the reference.
    pub source_section: String,
    /// The id that does not resolve.
    pub target: String,
    /// First line the reference occurs on.
    pub line: usize,
}

#[derive(Error, Debug)]
/// Fatal failure of a single document rebuild or validation.
pub enum RebuildError {
    /// The document could not be read or written.
    #[error("{}: {source}", path.display())]
    Io {
        /// Document path.
        path: PathBuf,
        /// Underlying I/O failure.
        source: io::Error,
    },
    /// The document is structurally invalid and was left untouched.
    #[error("{}:{}: {source}", path.display(), source.line())]
    Parse {
        /// Document path.
        path: PathBuf,
        /// What the parser rejected.
        source: ParseError,
    },
    /// Another process holds the document lock.
    #[error("{}: document is locked by another rebuild", path.display())]
    Busy {
        /// Document path.
        path: PathBuf,
    },
}

impl RebuildError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Error, Debug)]
/// Failure to read, update or persist the watch registry.
pub enum RegistryError {
    /// The state file or a watched path could not be accessed.
    #[error("{}: {source}", path.display())]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O failure.
        source: io::Error,
    },
    /// The state file exists but does not hold a valid registry.
    #[error("{}: corrupt watch state: {source}", path.display())]
    Corrupt {
        /// State file path.
        path: PathBuf,
        /// Decoding failure.
        source: serde_json::Error,
    },
    /// The registry could not be serialised.
    #[error("failed to encode watch state: {0}")]
    Encode(#[from] serde_json::Error),
    /// A path passed to `watch` does not exist.
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// A path passed to `watch-dir` is not a directory.
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
}

impl RegistryError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Error, Debug)]
/// Failure to answer a read-only query against a document.
pub enum QueryError {
    /// The document is structurally invalid.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// The document has never been indexed.
    #[error("INDEX not generated (run 'iatf rebuild' first)")]
    NoIndex,
    /// No section has the requested id.
    #[error("section not found: {0}")]
    SectionNotFound(String),
    /// No index entry has a title matching the query.
    #[error("no section found with title matching: {0}")]
    TitleNotFound(String),
}
