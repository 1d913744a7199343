//! Structured data-quality diagnostics emitted alongside the business
//! output. Recoverable conditions land here; schema errors abort the run
//! instead.

use serde::{Deserialize, Serialize};

use crate::model::{IssuerId, PeriodId, StrategyCode};

/// Duplicate canonical ids found while building one snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DuplicateIssuers {
    pub period: PeriodId,
    pub count: usize,
    /// At most [`SAMPLE_LIMIT`] ids, for audit without flooding the report.
    pub sample_ids: Vec<IssuerId>,
}

/// One external id observed mapping to multiple canonical ids.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct XrefConflict {
    pub external_id: String,
    pub canonical_ids: Vec<IssuerId>,
}

/// Aggregated occurrences of a value outside the known classification
/// domain. Passed through untouched, never coerced.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct UnknownValue {
    pub attribute: StrategyCode,
    pub raw_value: String,
    pub count: usize,
}

/// A strategy whose impact computation failed. Sibling strategies are
/// unaffected.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct StrategyFailure {
    pub strategy: StrategyCode,
    pub message: String,
}

pub const SAMPLE_LIMIT: usize = 20;

/// Everything analysts need to audit one run's data quality.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct RunDiagnostics {
    #[serde(default)]
    pub duplicate_issuers: Vec<DuplicateIssuers>,
    #[serde(default)]
    pub xref_rows_dropped: usize,
    #[serde(default)]
    pub xref_rows_deduplicated: usize,
    #[serde(default)]
    pub xref_conflicts: Vec<XrefConflict>,
    #[serde(default)]
    pub unknown_values: Vec<UnknownValue>,
    #[serde(default)]
    pub unresolved_member_rows: usize,
    #[serde(default)]
    pub new_only_count: usize,
    #[serde(default)]
    pub dropped_count: usize,
    #[serde(default)]
    pub strategy_failures: Vec<StrategyFailure>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl RunDiagnostics {
    pub fn record_duplicates(&mut self, period: &PeriodId, duplicates: &[IssuerId]) {
        if duplicates.is_empty() {
            return;
        }
        tracing::warn!(
            period = %period,
            count = duplicates.len(),
            "duplicate canonical ids deduplicated (first row wins)"
        );
        self.duplicate_issuers.push(DuplicateIssuers {
            period: period.clone(),
            count: duplicates.len(),
            sample_ids: duplicates.iter().take(SAMPLE_LIMIT).cloned().collect(),
        });
    }

    pub fn record_unknown_value(&mut self, attribute: &StrategyCode, raw_value: &str) {
        if let Some(existing) = self
            .unknown_values
            .iter_mut()
            .find(|entry| entry.attribute == *attribute && entry.raw_value == raw_value)
        {
            existing.count += 1;
            return;
        }
        tracing::warn!(attribute = %attribute, raw_value, "unexpected categorical value");
        self.unknown_values.push(UnknownValue {
            attribute: attribute.clone(),
            raw_value: raw_value.to_string(),
            count: 1,
        });
    }

    pub fn record_strategy_failure(&mut self, strategy: &StrategyCode, message: &str) {
        tracing::error!(strategy = %strategy, message, "strategy impact computation failed");
        self.strategy_failures.push(StrategyFailure {
            strategy: strategy.clone(),
            message: message.to_string(),
        });
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        self.warnings.push(message);
    }

    /// True when any recoverable condition was recorded.
    #[must_use]
    pub fn has_findings(&self) -> bool {
        !self.duplicate_issuers.is_empty()
            || self.xref_rows_dropped > 0
            || self.xref_rows_deduplicated > 0
            || !self.xref_conflicts.is_empty()
            || !self.unknown_values.is_empty()
            || self.unresolved_member_rows > 0
            || !self.strategy_failures.is_empty()
            || !self.warnings.is_empty()
    }
}
