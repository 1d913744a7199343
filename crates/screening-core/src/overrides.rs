//! The manual-override ledger and transition reconciliation.
//!
//! Overrides are evaluated as a snapshot: the ledger is built once, conflicts
//! are rejected up front, and filtering is order-independent.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ScreeningError;
use crate::model::{
    AttributeValue, ConditionSet, Direction, IssuerId, OverrideEntry, StrategyCode,
    TransitionKind, TransitionRow, TransitionSet,
};

/// Active overrides keyed by canonical id and attribute.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct OverrideLedger {
    by_issuer: BTreeMap<IssuerId, BTreeMap<StrategyCode, AttributeValue>>,
}

impl OverrideLedger {
    /// Build the ledger from raw entries, keeping only `active` assertions.
    ///
    /// # Errors
    /// Returns [`ScreeningError::OverrideConflict`] when more than one active
    /// override exists for the same (issuer, attribute) pair. Conflicts are
    /// a hard data-quality condition; no precedence rule is guessed.
    pub fn build(entries: &[OverrideEntry]) -> Result<Self, ScreeningError> {
        let mut by_issuer: BTreeMap<IssuerId, BTreeMap<StrategyCode, AttributeValue>> =
            BTreeMap::new();
        let mut conflicts: Vec<(IssuerId, StrategyCode)> = Vec::new();

        for entry in entries {
            if !entry.active {
                continue;
            }
            let issuer_overrides = by_issuer.entry(entry.canonical_id.clone()).or_default();
            if issuer_overrides.contains_key(&entry.attribute) {
                conflicts.push((entry.canonical_id.clone(), entry.attribute.clone()));
                continue;
            }
            issuer_overrides.insert(entry.attribute.clone(), entry.asserted_value.clone());
        }

        if let Some((first_issuer, first_attribute)) = conflicts.first() {
            tracing::error!(
                count = conflicts.len(),
                issuer = %first_issuer,
                attribute = %first_attribute,
                "conflicting active overrides in ledger"
            );
            return Err(ScreeningError::OverrideConflict {
                conflict_count: conflicts.len(),
                first_issuer: first_issuer.to_string(),
                first_attribute: first_attribute.to_string(),
            });
        }

        Ok(Self { by_issuer })
    }

    /// The active override value for an (issuer, attribute) pair, if any.
    #[must_use]
    pub fn value_of(&self, id: &IssuerId, attribute: &StrategyCode) -> Option<&AttributeValue> {
        self.by_issuer.get(id).and_then(|overrides| overrides.get(attribute))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_issuer.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_issuer.is_empty()
    }
}

/// Whether an asserted override value contradicts (and therefore cancels) a
/// transition of the given kind. An override of `OK` or `FLAG` cancels a
/// `new_exclusion`; an override of `EXCLUDED` cancels a `new_inclusion`.
/// Values outside the known domain cancel nothing.
#[must_use]
fn cancels(kind: TransitionKind, asserted: &AttributeValue) -> bool {
    let (condition, direction) = match kind {
        TransitionKind::NewExclusion => (ConditionSet::exclusion(), Direction::Entering),
        TransitionKind::NewInclusion => (ConditionSet::exclusion(), Direction::Leaving),
        TransitionKind::NewFlag => (ConditionSet::flag(), Direction::Entering),
    };
    if !asserted.is_known() {
        return false;
    }
    match direction {
        // The transition claims the issuer entered the condition set; an
        // override asserting a value outside the set contradicts it.
        Direction::Entering => !condition.contains(asserted),
        Direction::Leaving => condition.contains(asserted),
    }
}

/// Remove transitions whose target attribute carries an active, contradicting
/// override. Rows whose transition list empties are dropped entirely; rows
/// with no matching override pass through unchanged.
#[must_use]
pub fn filter_with_overrides(
    transitions: &TransitionSet,
    ledger: &OverrideLedger,
) -> TransitionSet {
    let rows = transitions.rows().filter_map(|row| {
        let surviving: Vec<_> = row
            .transitions
            .iter()
            .filter(|transition| {
                match ledger.value_of(&row.canonical_id, &transition.attribute) {
                    Some(asserted) => !cancels(transition.kind, asserted),
                    None => true,
                }
            })
            .cloned()
            .collect();
        if surviving.is_empty() {
            tracing::debug!(issuer = %row.canonical_id, "all transitions cancelled by overrides");
            return None;
        }
        Some(TransitionRow {
            canonical_id: row.canonical_id.clone(),
            display_name: row.display_name.clone(),
            transitions: surviving,
            affected_groups: row.affected_groups.clone(),
        })
    });
    TransitionSet::from_rows(rows)
}
