use super::{parse_entries, render_entries, render_index, IndexHeader, HEADER_LINES};
use crate::digest::ContentDigest;
use crate::section::IndexEntry;

fn entry(id: &str, created: Option<&str>, modified: Option<&str>) -> IndexEntry {
    IndexEntry {
        id: id.to_string(),
        title: format!("Title of {id}"),
        line_start: 10,
        line_end: 12,
        word_count: 5,
        summary: format!("About {id}"),
        created: created.map(str::to_string),
        modified: modified.map(str::to_string),
    }
}

fn header() -> IndexHeader {
    IndexHeader {
        generated: "2025-01-01T00:00:00Z".to_string(),
        digest: ContentDigest::compute("content"),
    }
}

#[test]
fn test_header_renders_four_lines() {
    let lines = header().render();
    assert_eq!(lines.len(), HEADER_LINES);
    assert_eq!(lines[0], "<!-- AUTO-GENERATED - DO NOT EDIT MANUALLY -->");
    assert_eq!(lines[1], "<!-- Generated: 2025-01-01T00:00:00Z -->");
    assert!(lines[2].starts_with("<!-- Content-Hash: sha256:"));
    assert!(lines[3].is_empty());
}

#[test]
fn test_header_parse_reads_rendered_header() {
    let block = header().render().join("\n");
    assert_eq!(IndexHeader::parse(&block), Some(header()));
}

#[test]
fn test_header_parse_needs_both_comments() {
    assert_eq!(IndexHeader::parse("<!-- Generated: 2025 -->"), None);
    assert_eq!(
        IndexHeader::parse("<!-- Generated: 2025 -->\n<!-- Content-Hash: sha256:zz -->"),
        None
    );
    assert_eq!(IndexHeader::parse(""), None);
}

#[test]
fn test_entry_layout() {
    let lines = render_entries(&[
        entry("a", None, None),
        entry("b", Some("2025-01-01"), Some("2025-02-01")),
    ]);
    assert_eq!(
        lines,
        vec![
            "# Title of a {#a | lines:10-12 | words:5}",
            "> About a",
            "",
            "# Title of b {#b | lines:10-12 | words:5}",
            "> About b",
            "  Created: 2025-01-01 | Modified: 2025-02-01",
            "",
        ]
    );
}

#[test]
fn test_entry_with_only_modified() {
    let lines = render_entries(&[entry("a", None, Some("2025-03-01"))]);
    assert_eq!(lines[2], "  Modified: 2025-03-01");
}

#[test]
fn test_parse_entries_reads_rendered_index() {
    let entries = vec![
        entry("a", None, None),
        entry("b", Some("2025-01-01"), Some("2025-02-01")),
    ];
    let block = render_index(&header(), &entries).join("\n");
    assert_eq!(parse_entries(&block), entries);
}

#[test]
fn test_parse_entries_skips_garbage() {
    let block = "random text\n# Not an entry\n# Kept {#kept | lines:3-4 | words:2}\n> kept summary\n";
    let entries = parse_entries(block);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, "kept");
    assert_eq!(entries[0].title, "Kept");
    assert_eq!((entries[0].line_start, entries[0].line_end), (3, 4));
    assert_eq!(entries[0].summary, "kept summary");
}
