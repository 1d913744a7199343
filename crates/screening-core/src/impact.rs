//! Per-strategy impact aggregation.
//!
//! Each strategy's table is independent of every other strategy's and shares
//! only read-only inputs, so the computation fans out across a rayon pool.
//! A failure in one strategy is captured and reported per-strategy; sibling
//! strategies always complete.

use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::diagnostics::StrategyFailure;
use crate::error::ScreeningError;
use crate::membership::MembershipIndex;
use crate::model::{
    GroupId, Snapshot, StrategyCode, StrategyImpactRow, TransitionKind, TransitionSet,
};
use crate::overrides::OverrideLedger;

/// The sign-off table for one strategy.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct StrategyImpact {
    pub strategy: StrategyCode,
    pub rows: Vec<StrategyImpactRow>,
    /// Transition counts per kind over the reported rows.
    pub counts: BTreeMap<TransitionKind, usize>,
    /// Rows dropped because all independent sources already agree.
    pub suppressed: usize,
}

/// Read-only inputs shared by every strategy worker.
#[derive(Debug, Clone, Copy)]
pub struct ImpactInputs<'a> {
    pub old: &'a Snapshot,
    pub new: &'a Snapshot,
    pub transitions: &'a TransitionSet,
    pub membership: &'a MembershipIndex,
    pub overrides: &'a OverrideLedger,
}

/// Build one strategy's impact table from four independent lookups per
/// surviving transition: old snapshot, new snapshot, group-system value,
/// and the override ledger.
///
/// Rows where the old value, the group-system value, and the override value
/// all agree are suppressed: the only divergent source is the new feed, so
/// once the override is applied there is no actionable discrepancy. This is
/// a coarser, cross-source check than override cancellation and runs after
/// it.
///
/// # Errors
/// Returns [`ScreeningError::StrategyFailed`] when the strategy's inputs are
/// internally inconsistent (a transition row naming a group the membership
/// index does not know).
pub fn compute_strategy_impact(
    strategy: &StrategyCode,
    inputs: ImpactInputs<'_>,
) -> Result<StrategyImpact, ScreeningError> {
    let mut rows = Vec::new();
    let mut counts: BTreeMap<TransitionKind, usize> = BTreeMap::new();
    let mut suppressed = 0_usize;

    for row in inputs.transitions.rows() {
        let matching: Vec<_> = row
            .transitions
            .iter()
            .filter(|transition| transition.attribute == *strategy)
            .collect();
        if matching.is_empty() {
            continue;
        }

        let affected_groups: Vec<GroupId> = row
            .affected_groups
            .iter()
            .filter(|(_, code)| code == strategy)
            .map(|(group, _)| group.clone())
            .collect();
        for group in &affected_groups {
            if inputs.membership.group(group).is_none() {
                return Err(ScreeningError::StrategyFailed {
                    strategy: strategy.to_string(),
                    message: format!("transition row references unknown group {group}"),
                });
            }
        }

        let old_value = inputs.old.value_of(&row.canonical_id, strategy).cloned();
        let new_value = inputs.new.value_of(&row.canonical_id, strategy).cloned();
        let group_system_value =
            inputs.membership.group_system_value(&row.canonical_id, strategy).cloned();
        let override_value =
            inputs.overrides.value_of(&row.canonical_id, strategy).cloned();

        let all_agree = match (&old_value, &group_system_value, &override_value) {
            (Some(old), Some(group_system), Some(overridden)) => {
                old == group_system && group_system == overridden
            }
            _ => false,
        };
        if all_agree {
            suppressed += 1;
            continue;
        }

        for transition in &matching {
            *counts.entry(transition.kind).or_insert(0) += 1;
        }
        rows.push(StrategyImpactRow {
            canonical_id: row.canonical_id.clone(),
            display_name: row.display_name.clone(),
            attribute: strategy.clone(),
            old_value,
            new_value,
            group_system_value,
            override_value,
            affected_groups,
        });
    }

    rows.sort_by(|lhs, rhs| lhs.canonical_id.cmp(&rhs.canonical_id));
    Ok(StrategyImpact { strategy: strategy.clone(), rows, counts, suppressed })
}

/// Fan the per-strategy computation out across worker threads, joined before
/// report assembly. Failed strategies are returned separately and never
/// abort their siblings.
#[must_use]
pub fn aggregate_impacts(
    strategies: &BTreeSet<StrategyCode>,
    inputs: ImpactInputs<'_>,
) -> (Vec<StrategyImpact>, Vec<StrategyFailure>) {
    let results: Vec<Result<StrategyImpact, ScreeningError>> = strategies
        .par_iter()
        .map(|strategy| compute_strategy_impact(strategy, inputs))
        .collect();

    let mut impacts = Vec::new();
    let mut failures = Vec::new();
    for (strategy, result) in strategies.iter().zip(results) {
        match result {
            Ok(impact) => {
                tracing::debug!(
                    strategy = %impact.strategy,
                    reported = impact.rows.len(),
                    suppressed = impact.suppressed,
                    "strategy impact computed"
                );
                impacts.push(impact);
            }
            Err(err) => failures.push(StrategyFailure {
                strategy: strategy.clone(),
                message: err.to_string(),
            }),
        }
    }
    (impacts, failures)
}
