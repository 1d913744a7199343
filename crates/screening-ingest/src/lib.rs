//! File ingestion for the screening pipeline.
//!
//! Delimited sources (snapshots, cross-reference, overrides, taxonomy) are
//! read with `csv`; the multi-sheet membership workbook with `calamine`.
//! Headers are lower-cased and trimmed on ingestion, values are normalized
//! into `screening-core` types, and every source is validated against an
//! explicit schema. A missing required column is fatal for that source.

use std::collections::BTreeMap;

pub mod membership;
pub mod overrides;
pub mod snapshot;
pub mod taxonomy;
pub mod xref;

pub use membership::{member_rows_from_cells, read_member_table, read_membership};
pub use overrides::read_overrides;
pub use snapshot::read_snapshot;
pub use taxonomy::read_taxonomy;
pub use xref::read_xref;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// A required column is absent from a source table. Fatal for the run.
    #[error("schema error in {source_name}: required column `{column}` is missing")]
    MissingColumn { source_name: String, column: String },

    /// A required sheet is absent from the membership workbook.
    #[error("schema error in {source_name}: required sheet `{sheet}` is missing")]
    MissingSheet { source_name: String, sheet: String },

    #[error("failed to read delimited source {source_name}")]
    Csv {
        source_name: String,
        #[source]
        source: csv::Error,
    },

    #[error("failed to read workbook {source_name}")]
    Workbook {
        source_name: String,
        #[source]
        source: calamine::Error,
    },
}

/// Header positions keyed by lower-cased, trimmed column name.
pub(crate) fn header_index(headers: &csv::StringRecord) -> BTreeMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(position, name)| (name.trim().to_ascii_lowercase(), position))
        .collect()
}

pub(crate) fn require_column(
    index: &BTreeMap<String, usize>,
    source_name: &str,
    column: &str,
) -> Result<usize, IngestError> {
    index.get(column).copied().ok_or_else(|| IngestError::MissingColumn {
        source_name: source_name.to_string(),
        column: column.to_string(),
    })
}

pub(crate) fn csv_error(source_name: &str, source: csv::Error) -> IngestError {
    IngestError::Csv { source_name: source_name.to_string(), source }
}

/// A trimmed cell, `None` when empty.
pub(crate) fn field<'a>(record: &'a csv::StringRecord, position: usize) -> Option<&'a str> {
    record.get(position).map(str::trim).filter(|value| !value.is_empty())
}
