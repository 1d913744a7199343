//! Strategy taxonomy loader.
//!
//! The taxonomy file is column-oriented: each header is a strategy name and
//! the cells below it are the group ids assigned to that strategy. A group
//! id appearing under several headers belongs to several strategies.

use std::collections::BTreeMap;
use std::io::Read;

use screening_core::{GroupId, StrategyCode, StrategyTaxonomy};

use crate::{csv_error, IngestError};

/// Read the group-to-strategy taxonomy.
///
/// # Errors
/// [`IngestError::Csv`] on malformed input. An empty file yields an empty
/// taxonomy; the pipeline decides whether that is acceptable.
pub fn read_taxonomy<R: Read>(
    reader: R,
    source_name: &str,
) -> Result<StrategyTaxonomy, IngestError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let headers = csv_reader.headers().map_err(|err| csv_error(source_name, err))?.clone();
    let strategies: Vec<StrategyCode> = headers
        .iter()
        .map(|name| StrategyCode::new(name.trim().to_ascii_lowercase()))
        .collect();

    let mut by_group: BTreeMap<GroupId, Vec<StrategyCode>> = BTreeMap::new();
    for row in csv_reader.records() {
        let row = row.map_err(|err| csv_error(source_name, err))?;
        for (position, strategy) in strategies.iter().enumerate() {
            let Some(cell) = row.get(position).map(str::trim).filter(|cell| !cell.is_empty())
            else {
                continue;
            };
            let assigned = by_group.entry(GroupId::new(cell)).or_default();
            if !assigned.contains(strategy) {
                assigned.push(strategy.clone());
            }
        }
    }

    tracing::info!(
        source = source_name,
        strategies = strategies.len(),
        groups = by_group.len(),
        "taxonomy loaded"
    );
    Ok(StrategyTaxonomy::new(by_group))
}
