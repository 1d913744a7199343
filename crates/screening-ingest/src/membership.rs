//! Membership workbook loader.
//!
//! Portfolio and benchmark membership arrives as one multi-sheet workbook
//! from the group system. The `Portfolios` and `Benchmarks` sheets are
//! required (matched case-insensitively); each carries `group_system_id`,
//! `group_id`, an optional `description`, and any further columns are read
//! as the group system's own classification values keyed by attribute name.

use std::collections::BTreeMap;
use std::io::Read as IoRead;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use screening_core::{AttributeValue, GroupId, GroupKind, GroupMemberRow, StrategyCode};

use crate::{csv_error, field, header_index, require_column, IngestError};

/// Read both membership sheets from a workbook on disk.
///
/// # Errors
/// [`IngestError::Workbook`] when the file cannot be opened or a sheet
/// cannot be read, [`IngestError::MissingSheet`] when a required sheet is
/// absent, [`IngestError::MissingColumn`] when a sheet lacks its id columns.
pub fn read_membership(path: &Path) -> Result<Vec<GroupMemberRow>, IngestError> {
    let source_name = path.display().to_string();
    let mut workbook = open_workbook_auto(path)
        .map_err(|err| IngestError::Workbook { source_name: source_name.clone(), source: err })?;
    let sheet_names = workbook.sheet_names();

    let mut rows = Vec::new();
    for (sheet, kind) in [("Portfolios", GroupKind::Portfolio), ("Benchmarks", GroupKind::Benchmark)]
    {
        let Some(name) = sheet_names.iter().find(|name| name.eq_ignore_ascii_case(sheet)) else {
            return Err(IngestError::MissingSheet {
                source_name: source_name.clone(),
                sheet: sheet.to_string(),
            });
        };
        let range = workbook.worksheet_range(name).map_err(|err| IngestError::Workbook {
            source_name: source_name.clone(),
            source: err,
        })?;
        let cells: Vec<Vec<Data>> = range.rows().map(<[Data]>::to_vec).collect();
        let sheet_source = format!("{source_name}#{name}");
        rows.extend(member_rows_from_cells(kind, &sheet_source, &cells)?);
    }

    tracing::info!(source = %path.display(), rows = rows.len(), "membership loaded");
    Ok(rows)
}

/// Parse one sheet's cell grid into membership rows.
///
/// The first row is the header. Rows missing either id are skipped and
/// counted; extra columns become per-attribute values on the row.
///
/// # Errors
/// [`IngestError::MissingColumn`] when `group_system_id` or `group_id` is
/// absent from the header row.
pub fn member_rows_from_cells(
    kind: GroupKind,
    source_name: &str,
    cells: &[Vec<Data>],
) -> Result<Vec<GroupMemberRow>, IngestError> {
    let Some(header) = cells.first() else {
        return Err(missing_column(source_name, "group_system_id"));
    };
    let index: BTreeMap<String, usize> = header
        .iter()
        .enumerate()
        .filter_map(|(position, cell)| {
            cell_text(cell).map(|name| (name.to_ascii_lowercase(), position))
        })
        .collect();

    let external_position = *index
        .get("group_system_id")
        .ok_or_else(|| missing_column(source_name, "group_system_id"))?;
    let group_position =
        *index.get("group_id").ok_or_else(|| missing_column(source_name, "group_id"))?;
    let description_position = index.get("description").copied();
    let value_columns: Vec<(StrategyCode, usize)> = index
        .iter()
        .filter(|(name, _)| {
            !matches!(name.as_str(), "group_system_id" | "group_id" | "description")
        })
        .map(|(name, position)| (StrategyCode::new(name.clone()), *position))
        .collect();

    let mut rows = Vec::new();
    let mut skipped = 0_usize;
    for cell_row in &cells[1..] {
        let (Some(external), Some(group)) =
            (text_at(cell_row, external_position), text_at(cell_row, group_position))
        else {
            skipped += 1;
            continue;
        };

        let mut values = BTreeMap::new();
        for (attribute, position) in &value_columns {
            if let Some(value) = text_at(cell_row, *position).and_then(|t| AttributeValue::normalize(&t)) {
                values.insert(attribute.clone(), value);
            }
        }
        rows.push(GroupMemberRow {
            kind,
            group_id: GroupId::new(group),
            group_system_id: external,
            description: description_position
                .and_then(|position| text_at(cell_row, position))
                .unwrap_or_default(),
            values,
        });
    }

    if skipped > 0 {
        tracing::warn!(source = source_name, count = skipped, "membership rows skipped: missing ids");
    }
    Ok(rows)
}

/// Read one membership table from a delimited source instead of a workbook
/// sheet. Same schema: `group_system_id`, `group_id`, optional `description`,
/// extra columns as per-attribute values.
///
/// # Errors
/// [`IngestError::MissingColumn`] when an id column is absent,
/// [`IngestError::Csv`] on malformed input.
pub fn read_member_table<R: IoRead>(
    reader: R,
    source_name: &str,
    kind: GroupKind,
) -> Result<Vec<GroupMemberRow>, IngestError> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = csv_reader.headers().map_err(|err| csv_error(source_name, err))?.clone();
    let index = header_index(&headers);

    let external_position = require_column(&index, source_name, "group_system_id")?;
    let group_position = require_column(&index, source_name, "group_id")?;
    let description_position = index.get("description").copied();
    let value_columns: Vec<(StrategyCode, usize)> = index
        .iter()
        .filter(|(name, _)| {
            !matches!(name.as_str(), "group_system_id" | "group_id" | "description")
        })
        .map(|(name, position)| (StrategyCode::new(name.clone()), *position))
        .collect();

    let mut rows = Vec::new();
    let mut skipped = 0_usize;
    for row in csv_reader.records() {
        let row = row.map_err(|err| csv_error(source_name, err))?;
        let (Some(external), Some(group)) =
            (field(&row, external_position), field(&row, group_position))
        else {
            skipped += 1;
            continue;
        };

        let mut values = BTreeMap::new();
        for (attribute, position) in &value_columns {
            if let Some(value) = field(&row, *position).and_then(AttributeValue::normalize) {
                values.insert(attribute.clone(), value);
            }
        }
        rows.push(GroupMemberRow {
            kind,
            group_id: GroupId::new(group),
            group_system_id: external.to_string(),
            description: description_position
                .and_then(|position| field(&row, position))
                .unwrap_or_default()
                .to_string(),
            values,
        });
    }

    if skipped > 0 {
        tracing::warn!(source = source_name, count = skipped, "membership rows skipped: missing ids");
    }
    tracing::info!(source = source_name, rows = rows.len(), "membership table loaded");
    Ok(rows)
}

fn missing_column(source_name: &str, column: &str) -> IngestError {
    IngestError::MissingColumn { source_name: source_name.to_string(), column: column.to_string() }
}

/// Spreadsheet cells come back typed; ids exported as numbers still need to
/// read as text.
fn cell_text(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::Empty => return None,
        Data::String(value) => value.trim().to_string(),
        Data::Float(value) => {
            if value.fract() == 0.0 {
                format!("{value:.0}")
            } else {
                value.to_string()
            }
        }
        Data::Int(value) => value.to_string(),
        Data::Bool(value) => value.to_string(),
        other => other.to_string(),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn text_at(row: &[Data], position: usize) -> Option<String> {
    row.get(position).and_then(cell_text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use screening_core::Classification;

    fn text(value: &str) -> Data {
        Data::String(value.to_string())
    }

    fn grid(rows: &[&[&str]]) -> Vec<Vec<Data>> {
        rows.iter().map(|row| row.iter().map(|cell| text(cell)).collect()).collect()
    }

    // Test IDs: MWB-001
    #[test]
    fn rows_parse_with_extra_columns_as_values() {
        let cells = grid(&[
            &["Group_System_ID", "Group_ID", "Description", "STR_001"],
            &["B001", "PF1", "Main portfolio", "OK"],
            &["B002", "PF1", "Main portfolio", ""],
        ]);
        let rows = match member_rows_from_cells(GroupKind::Portfolio, "sheet", &cells) {
            Ok(rows) => rows,
            Err(err) => panic!("sheet should parse: {err}"),
        };

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].group_id, GroupId::new("PF1"));
        assert_eq!(rows[0].group_system_id, "B001");
        assert_eq!(
            rows[0].values.get(&StrategyCode::new("str_001")),
            Some(&AttributeValue::Known(Classification::Ok))
        );
        assert!(rows[1].values.is_empty());
    }

    // Test IDs: MWB-002
    #[test]
    fn numeric_ids_are_read_as_text() {
        let cells = vec![
            vec![text("group_system_id"), text("group_id")],
            vec![Data::Float(1001.0), text("PF1")],
        ];
        let rows = match member_rows_from_cells(GroupKind::Benchmark, "sheet", &cells) {
            Ok(rows) => rows,
            Err(err) => panic!("sheet should parse: {err}"),
        };

        assert_eq!(rows[0].group_system_id, "1001");
        assert_eq!(rows[0].kind, GroupKind::Benchmark);
    }

    // Test IDs: MWB-003
    #[test]
    fn rows_missing_either_id_are_skipped() {
        let cells = grid(&[
            &["group_system_id", "group_id"],
            &["", "PF1"],
            &["B001", ""],
            &["B001", "PF1"],
        ]);
        let rows = match member_rows_from_cells(GroupKind::Portfolio, "sheet", &cells) {
            Ok(rows) => rows,
            Err(err) => panic!("sheet should parse: {err}"),
        };

        assert_eq!(rows.len(), 1);
    }

    // Test IDs: MWB-004
    #[test]
    fn missing_id_column_is_a_schema_error() {
        let cells = grid(&[&["group_system_id", "description"], &["B001", "x"]]);
        let result = member_rows_from_cells(GroupKind::Portfolio, "sheet", &cells);

        let Err(err) = result else { panic!("expected a schema error") };
        assert!(err.to_string().contains("group_id"));
    }

    // Test IDs: MWB-005
    #[test]
    fn empty_grid_is_a_schema_error() {
        let result = member_rows_from_cells(GroupKind::Portfolio, "sheet", &[]);
        assert!(result.is_err());
    }

    // Test IDs: MWB-006
    #[test]
    fn delimited_member_table_matches_the_sheet_schema() {
        let body = "group_system_id,group_id,description,str_001\nB001,PF1,Main,OK\n,PF1,,\n";
        let rows = match read_member_table(body.as_bytes(), "portfolios", GroupKind::Portfolio) {
            Ok(rows) => rows,
            Err(err) => panic!("table should parse: {err}"),
        };

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].description, "Main");
        assert_eq!(
            rows[0].values.get(&StrategyCode::new("str_001")),
            Some(&AttributeValue::Known(Classification::Ok))
        );
    }
}
