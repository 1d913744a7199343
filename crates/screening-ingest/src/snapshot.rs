//! Snapshot loader: one delimited file per period, one row per issuer.

use std::io::Read;

use screening_core::{AttributeValue, IssuerId, IssuerRecord, StrategyCode};

use crate::{csv_error, field, header_index, require_column, IngestError};

/// Read one period snapshot.
///
/// Required columns: `issuer_id`, `name`, plus one column per tracked
/// attribute. The attribute list is the explicit schema; a missing attribute
/// column is a schema error, never inferred from naming conventions. Empty
/// cells mean the attribute is absent for that issuer. Duplicate canonical
/// ids are left to [`screening_core::Snapshot::from_records`].
///
/// # Errors
/// [`IngestError::MissingColumn`] when a required column is absent,
/// [`IngestError::Csv`] on malformed input.
pub fn read_snapshot<R: Read>(
    reader: R,
    source_name: &str,
    attributes: &[StrategyCode],
) -> Result<Vec<IssuerRecord>, IngestError> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = csv_reader.headers().map_err(|err| csv_error(source_name, err))?.clone();
    let index = header_index(&headers);

    let id_position = require_column(&index, source_name, "issuer_id")?;
    let name_position = require_column(&index, source_name, "name")?;
    let group_system_position = index.get("group_system_id").copied();

    let mut attribute_positions = Vec::with_capacity(attributes.len());
    for attribute in attributes {
        let position =
            require_column(&index, source_name, &attribute.as_str().to_ascii_lowercase())?;
        attribute_positions.push((attribute.clone(), position));
    }

    let mut records = Vec::new();
    let mut skipped = 0_usize;
    for row in csv_reader.records() {
        let row = row.map_err(|err| csv_error(source_name, err))?;
        let Some(id) = field(&row, id_position) else {
            skipped += 1;
            continue;
        };

        let mut record = IssuerRecord {
            canonical_id: IssuerId::new(id),
            display_name: field(&row, name_position).unwrap_or_default().to_string(),
            secondary_ids: std::collections::BTreeMap::new(),
            attributes: std::collections::BTreeMap::new(),
        };
        if let Some(position) = group_system_position {
            if let Some(value) = field(&row, position) {
                record.secondary_ids.insert("group_system".to_string(), value.to_string());
            }
        }
        for (attribute, position) in &attribute_positions {
            if let Some(raw) = row.get(*position) {
                if let Some(value) = AttributeValue::normalize(raw) {
                    record.attributes.insert(attribute.clone(), value);
                }
            }
        }
        records.push(record);
    }

    if skipped > 0 {
        tracing::warn!(source = source_name, count = skipped, "snapshot rows skipped: empty issuer id");
    }
    tracing::info!(source = source_name, rows = records.len(), "snapshot loaded");
    Ok(records)
}
