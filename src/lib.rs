//! iatf: self-indexing sectioned documents.
//!
//! An IATF document carries a generated index mapping each `{#id}` section to its line range,
//! word count and summary, so a reader can jump straight to the section it needs. This crate
//! parses documents, detects stale indexes by content digest, regenerates them deterministically
//! and atomically, validates cross-references, and keeps watched documents up to date.
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod digest;
pub mod error;
pub mod index;
pub mod input;
pub mod lock;
pub mod parser;
pub mod persist;
pub mod query;
pub mod rebuild;
pub mod references;
pub mod registry;
pub mod section;
