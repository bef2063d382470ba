//src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Fatal problems loading the taxonomy table or the accession index.
#[derive(Debug, Error)]
pub enum TaxonomyLoadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("taxonomy table {0} contains no taxa")]
    Empty(PathBuf),

    #[error("taxonomy table {0} has no root (taxon 1)")]
    MissingRoot(PathBuf),

    #[error("local taxonomy table {0} is out of date (parent of taxon 2 is the root)")]
    OutOfDate(PathBuf),
}

/// A taxon id outside the loaded taxonomy.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("unknown taxon id {0}")]
pub struct UnknownTaxonError(pub u32);

/// A single hit line that could not be turned into a `Hit`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HitParseError {
    #[error("expected at least {expected} columns, found {found}")]
    TooFewColumns { expected: usize, found: usize },

    #[error("column {column}: cannot parse '{value}' as a number")]
    BadNumber { column: usize, value: String },

    #[error("invalid query range {start}..{end} for length {length}")]
    BadRange { start: u64, end: u64, length: u64 },

    #[error("no query length known for '{0}'")]
    MissingLength(String),

    #[error("unrecognized alignment format")]
    UnknownFormat,
}

/// A coverage table row that could not be read back.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RowParseError {
    #[error("expected {expected} columns, found {found}")]
    ColumnCount { expected: usize, found: usize },

    #[error("column {column}: cannot parse '{value}'")]
    BadValue { column: &'static str, value: String },
}

/// Top level error returned by the library entry points.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    TaxonomyLoad(#[from] TaxonomyLoadError),

    #[error(transparent)]
    UnknownTaxon(#[from] UnknownTaxonError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Row(#[from] RowParseError),
}
