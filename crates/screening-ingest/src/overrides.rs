//! Override ledger loader.

use std::io::Read;

use screening_core::{AttributeValue, IssuerId, OverrideEntry, StrategyCode};

use crate::{csv_error, field, header_index, require_column, IngestError};

/// Read the analyst override table.
///
/// Required columns: `issuer_id`, `attribute`, `value`, `active`. The
/// `group_system_id` column is optional and carried through for reporting.
/// Rows with an empty id, attribute, or value are skipped and counted;
/// conflict detection between active rows belongs to
/// [`screening_core::OverrideLedger::build`].
///
/// # Errors
/// [`IngestError::MissingColumn`] when a required column is absent,
/// [`IngestError::Csv`] on malformed input.
pub fn read_overrides<R: Read>(
    reader: R,
    source_name: &str,
) -> Result<Vec<OverrideEntry>, IngestError> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = csv_reader.headers().map_err(|err| csv_error(source_name, err))?.clone();
    let index = header_index(&headers);

    let id_position = require_column(&index, source_name, "issuer_id")?;
    let attribute_position = require_column(&index, source_name, "attribute")?;
    let value_position = require_column(&index, source_name, "value")?;
    let active_position = require_column(&index, source_name, "active")?;
    let group_system_position = index.get("group_system_id").copied();

    let mut entries = Vec::new();
    let mut skipped = 0_usize;
    for row in csv_reader.records() {
        let row = row.map_err(|err| csv_error(source_name, err))?;
        let (Some(id), Some(attribute), Some(raw_value)) = (
            field(&row, id_position),
            field(&row, attribute_position),
            field(&row, value_position),
        ) else {
            skipped += 1;
            continue;
        };
        let Some(asserted_value) = AttributeValue::normalize(raw_value) else {
            skipped += 1;
            continue;
        };

        entries.push(OverrideEntry {
            canonical_id: IssuerId::new(id),
            group_system_id: group_system_position
                .and_then(|position| field(&row, position))
                .map(ToString::to_string),
            attribute: StrategyCode::new(attribute),
            asserted_value,
            active: parse_active(field(&row, active_position)),
        });
    }

    if skipped > 0 {
        tracing::warn!(source = source_name, count = skipped, "override rows skipped: incomplete");
    }
    tracing::info!(source = source_name, rows = entries.len(), "overrides loaded");
    Ok(entries)
}

/// An unrecognized or empty flag reads as inactive.
fn parse_active(raw: Option<&str>) -> bool {
    matches!(
        raw.map(str::to_ascii_lowercase).as_deref(),
        Some("true" | "yes" | "y" | "1" | "active")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use screening_core::Classification;

    // Test IDs: OVL-001
    #[test]
    fn entries_parse_with_optional_group_system_id() {
        let body = "issuer_id,group_system_id,attribute,value,active\n\
                    X001,B001,str_001,OK,true\n\
                    X002,,str_001,EXCLUDED,no\n";
        let entries = match read_overrides(body.as_bytes(), "overrides") {
            Ok(entries) => entries,
            Err(err) => panic!("overrides should load: {err}"),
        };

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].group_system_id.as_deref(), Some("B001"));
        assert!(entries[0].active);
        assert_eq!(
            entries[0].asserted_value,
            AttributeValue::Known(Classification::Ok)
        );
        assert_eq!(entries[1].group_system_id, None);
        assert!(!entries[1].active);
    }

    // Test IDs: OVL-002
    #[test]
    fn incomplete_rows_are_skipped() {
        let body = "issuer_id,attribute,value,active\n\
                    ,str_001,OK,true\n\
                    X001,,OK,true\n\
                    X001,str_001,,true\n\
                    X001,str_001,FLAG,1\n";
        let entries = match read_overrides(body.as_bytes(), "overrides") {
            Ok(entries) => entries,
            Err(err) => panic!("overrides should load: {err}"),
        };

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].attribute, StrategyCode::new("str_001"));
        assert!(entries[0].active);
    }

    // Test IDs: OVL-003
    #[test]
    fn missing_active_column_is_a_schema_error() {
        let body = "issuer_id,attribute,value\nX001,str_001,OK\n";
        let result = read_overrides(body.as_bytes(), "overrides");

        let Err(err) = result else { panic!("expected a schema error") };
        assert!(err.to_string().contains("active"));
    }

    // Test IDs: OVL-004
    #[test]
    fn unexpected_asserted_values_are_preserved() {
        let body = "issuer_id,attribute,value,active\nX001,str_001,Watchlist,yes\n";
        let entries = match read_overrides(body.as_bytes(), "overrides") {
            Ok(entries) => entries,
            Err(err) => panic!("overrides should load: {err}"),
        };

        assert_eq!(
            entries[0].asserted_value,
            AttributeValue::Other("Watchlist".to_string())
        );
    }
}
