//! In-memory report tables with a stable, documented column order.
//!
//! The external writer renders these into multi-sheet documents; the core
//! only guarantees the column contract: primary id first, display name
//! second, then delta/impact columns.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::impact::StrategyImpact;
use crate::model::{AttributeValue, IssuerId, Snapshot, StrategyCode, TransitionKind};

/// Detail table column order. The writer relies on this being stable.
pub const IMPACT_COLUMNS: [&str; 8] = [
    "issuer_id",
    "display_name",
    "attribute",
    "old_value",
    "new_value",
    "group_system_value",
    "override_value",
    "affected_groups",
];

/// Column order for the new-only / dropped issuer tables.
pub const ISSUER_LIST_COLUMNS: [&str; 2] = ["issuer_id", "display_name"];

/// A plain in-memory table, one string cell per column.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ReportTable {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ReportTable {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Summary plus detail breakdown for one strategy.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct StrategyReport {
    pub strategy: StrategyCode,
    pub reported: usize,
    pub suppressed: usize,
    pub summary: ReportTable,
    pub detail: ReportTable,
}

fn cell(value: Option<&AttributeValue>) -> String {
    value.map(ToString::to_string).unwrap_or_default()
}

impl StrategyReport {
    #[must_use]
    pub fn from_impact(impact: &StrategyImpact) -> Self {
        let detail_rows = impact
            .rows
            .iter()
            .map(|row| {
                vec![
                    row.canonical_id.to_string(),
                    row.display_name.clone(),
                    row.attribute.to_string(),
                    cell(row.old_value.as_ref()),
                    cell(row.new_value.as_ref()),
                    cell(row.group_system_value.as_ref()),
                    cell(row.override_value.as_ref()),
                    row.affected_groups
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(";"),
                ]
            })
            .collect();

        let mut summary_rows: Vec<Vec<String>> = [
            TransitionKind::NewExclusion,
            TransitionKind::NewInclusion,
            TransitionKind::NewFlag,
        ]
        .iter()
        .map(|kind| {
            vec![
                kind.as_str().to_string(),
                impact.counts.get(kind).copied().unwrap_or(0).to_string(),
            ]
        })
        .collect();
        summary_rows.push(vec!["suppressed".to_string(), impact.suppressed.to_string()]);

        Self {
            strategy: impact.strategy.clone(),
            reported: impact.rows.len(),
            suppressed: impact.suppressed,
            summary: ReportTable {
                name: format!("{}_summary", impact.strategy),
                columns: vec!["measure".to_string(), "count".to_string()],
                rows: summary_rows,
            },
            detail: ReportTable {
                name: format!("{}_detail", impact.strategy),
                columns: IMPACT_COLUMNS.iter().map(ToString::to_string).collect(),
                rows: detail_rows,
            },
        }
    }
}

/// Table of issuers present in only one snapshot (`new_only` or `dropped`),
/// with display names from whichever snapshot knows them.
#[must_use]
pub fn issuer_list_table(name: &str, ids: &BTreeSet<IssuerId>, source: &Snapshot) -> ReportTable {
    let rows = ids
        .iter()
        .map(|id| {
            let display_name =
                source.get(id).map(|record| record.display_name.clone()).unwrap_or_default();
            vec![id.to_string(), display_name]
        })
        .collect();
    ReportTable {
        name: name.to_string(),
        columns: ISSUER_LIST_COLUMNS.iter().map(ToString::to_string).collect(),
        rows,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::model::{Classification, PeriodId, StrategyImpactRow};

    // Test IDs: RPT-001
    #[test]
    fn detail_table_keeps_the_documented_column_order() {
        let impact = StrategyImpact {
            strategy: StrategyCode::new("str_001"),
            rows: vec![StrategyImpactRow {
                canonical_id: IssuerId::new("X001"),
                display_name: "Acme".to_string(),
                attribute: StrategyCode::new("str_001"),
                old_value: Some(AttributeValue::Known(Classification::Ok)),
                new_value: Some(AttributeValue::Known(Classification::Excluded)),
                group_system_value: None,
                override_value: None,
                affected_groups: vec![crate::model::GroupId::new("PF1")],
            }],
            counts: [(TransitionKind::NewExclusion, 1)].into_iter().collect(),
            suppressed: 0,
        };

        let report = StrategyReport::from_impact(&impact);

        assert_eq!(report.detail.columns, IMPACT_COLUMNS.to_vec());
        assert_eq!(
            report.detail.rows[0],
            vec![
                "X001".to_string(),
                "Acme".to_string(),
                "str_001".to_string(),
                "OK".to_string(),
                "EXCLUDED".to_string(),
                String::new(),
                String::new(),
                "PF1".to_string(),
            ]
        );
        assert_eq!(report.reported, 1);
    }

    // Test IDs: RPT-002
    #[test]
    fn issuer_list_table_reports_ids_and_names() {
        let record = crate::model::IssuerRecord {
            canonical_id: IssuerId::new("X002"),
            display_name: "Globex".to_string(),
            secondary_ids: BTreeMap::new(),
            attributes: BTreeMap::new(),
        };
        let (snapshot, _) = Snapshot::from_records(PeriodId::new("2024-10"), vec![record]);
        let ids: BTreeSet<IssuerId> = [IssuerId::new("X002")].into_iter().collect();

        let table = issuer_list_table("new_only", &ids, &snapshot);

        assert_eq!(table.columns, vec!["issuer_id".to_string(), "display_name".to_string()]);
        assert_eq!(table.rows, vec![vec!["X002".to_string(), "Globex".to_string()]]);
    }
}
