//! Cross-reference loader: group-system id to primary id mapping.

use std::io::Read;

use screening_core::XrefRow;

use crate::{csv_error, field, header_index, require_column, IngestError};

/// Read the cross-reference table.
///
/// Required columns: `group_system_id`, `issuer_id`. A `name` column is
/// optional. Missing per-row values are carried as `None`; the identity
/// resolver decides what to drop.
///
/// # Errors
/// [`IngestError::MissingColumn`] when the canonical-id column is entirely
/// absent, [`IngestError::Csv`] on malformed input.
pub fn read_xref<R: Read>(reader: R, source_name: &str) -> Result<Vec<XrefRow>, IngestError> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = csv_reader.headers().map_err(|err| csv_error(source_name, err))?.clone();
    let index = header_index(&headers);

    let external_position = require_column(&index, source_name, "group_system_id")?;
    let canonical_position = require_column(&index, source_name, "issuer_id")?;
    let name_position = index.get("name").copied();

    let mut rows = Vec::new();
    for row in csv_reader.records() {
        let row = row.map_err(|err| csv_error(source_name, err))?;
        rows.push(XrefRow {
            external_id: field(&row, external_position).map(ToString::to_string),
            canonical_id: field(&row, canonical_position).map(ToString::to_string),
            display_name: name_position
                .and_then(|position| field(&row, position))
                .map(ToString::to_string),
        });
    }

    tracing::info!(source = source_name, rows = rows.len(), "cross-reference loaded");
    Ok(rows)
}
