//! Group membership indices and the strategy taxonomy.
//!
//! Membership is independent of the snapshots and is computed once per run:
//! a forward index (group -> members), a flattened reverse index
//! (issuer -> (group, strategy) pairs), and the group system's own
//! classification values used as a consistency check by the aggregator.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::identity::IdentityResolver;
use crate::model::{
    AttributeValue, Group, GroupId, GroupKind, IssuerId, StrategyCode, TransitionRow,
    TransitionSet,
};

/// One raw membership row: a group-system issuer id inside one group, plus
/// whatever classification values the group system feed carries.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct GroupMemberRow {
    pub kind: GroupKind,
    pub group_id: GroupId,
    pub group_system_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub values: BTreeMap<StrategyCode, AttributeValue>,
}

/// Externally maintained mapping from group id to its strategy names.
/// Portfolios carry at most one strategy, benchmarks may carry several.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct StrategyTaxonomy {
    by_group: BTreeMap<GroupId, Vec<StrategyCode>>,
}

impl StrategyTaxonomy {
    #[must_use]
    pub fn new(by_group: BTreeMap<GroupId, Vec<StrategyCode>>) -> Self {
        Self { by_group }
    }

    #[must_use]
    pub fn strategies_for(&self, group: &GroupId) -> &[StrategyCode] {
        self.by_group.get(group).map_or(&[], Vec::as_slice)
    }

    /// Every strategy named anywhere in the taxonomy, deduplicated.
    #[must_use]
    pub fn all_strategies(&self) -> BTreeSet<StrategyCode> {
        self.by_group.values().flatten().cloned().collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_group.is_empty()
    }
}

/// Findings from one membership index build.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct MembershipReport {
    /// Rows whose group-system id could not be resolved to a canonical id.
    pub unresolved_rows: usize,
    /// Portfolio groups assigned more than one strategy by the taxonomy.
    pub multi_strategy_portfolios: Vec<GroupId>,
}

/// Immutable membership indices for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct MembershipIndex {
    groups: BTreeMap<GroupId, Group>,
    reverse: BTreeMap<IssuerId, Vec<(GroupId, StrategyCode)>>,
    group_values: BTreeMap<IssuerId, BTreeMap<StrategyCode, AttributeValue>>,
}

impl MembershipIndex {
    /// Build the indices from raw membership rows.
    ///
    /// Group-system ids are resolved to canonical ids through the identity
    /// resolver; unresolved rows are dropped and counted. Groups with no
    /// taxonomy assignment keep their forward entry but contribute nothing
    /// to the reverse index, excluding them from impact aggregation.
    #[must_use]
    pub fn build(
        rows: &[GroupMemberRow],
        taxonomy: &StrategyTaxonomy,
        resolver: &IdentityResolver,
    ) -> (Self, MembershipReport) {
        let mut index = Self::default();
        let mut report = MembershipReport::default();

        for row in rows {
            let Some(canonical) = resolver.resolve(&row.group_system_id) else {
                report.unresolved_rows += 1;
                continue;
            };

            let group = index.groups.entry(row.group_id.clone()).or_insert_with(|| Group {
                group_id: row.group_id.clone(),
                kind: row.kind,
                member_ids: BTreeSet::new(),
            });
            group.member_ids.insert(canonical.clone());

            let strategies = taxonomy.strategies_for(&row.group_id);
            if row.kind == GroupKind::Portfolio
                && strategies.len() > 1
                && !report.multi_strategy_portfolios.contains(&row.group_id)
            {
                tracing::warn!(
                    group = %row.group_id,
                    strategies = strategies.len(),
                    "portfolio assigned multiple strategies by taxonomy"
                );
                report.multi_strategy_portfolios.push(row.group_id.clone());
            }
            for strategy in strategies {
                let pairs = index.reverse.entry(canonical.clone()).or_default();
                let pair = (row.group_id.clone(), strategy.clone());
                if !pairs.contains(&pair) {
                    pairs.push(pair);
                }
            }

            if !row.values.is_empty() {
                let values = index.group_values.entry(canonical).or_default();
                for (attribute, value) in &row.values {
                    values.entry(attribute.clone()).or_insert_with(|| value.clone());
                }
            }
        }

        if report.unresolved_rows > 0 {
            tracing::warn!(
                count = report.unresolved_rows,
                "membership rows dropped: unresolved group-system id"
            );
        }

        (index, report)
    }

    #[must_use]
    pub fn group(&self, id: &GroupId) -> Option<&Group> {
        self.groups.get(id)
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// The flattened (group, strategy) pairs for one issuer.
    #[must_use]
    pub fn pairs_for(&self, id: &IssuerId) -> &[(GroupId, StrategyCode)] {
        self.reverse.get(id).map_or(&[], Vec::as_slice)
    }

    /// Every strategy the issuer is currently a member of through any group.
    #[must_use]
    pub fn strategies_for(&self, id: &IssuerId) -> BTreeSet<StrategyCode> {
        self.pairs_for(id).iter().map(|(_, strategy)| strategy.clone()).collect()
    }

    /// The group system's own classification for an (issuer, attribute)
    /// pair, when the membership feed carried one.
    #[must_use]
    pub fn group_system_value(
        &self,
        id: &IssuerId,
        attribute: &StrategyCode,
    ) -> Option<&AttributeValue> {
        self.group_values.get(id).and_then(|values| values.get(attribute))
    }
}

/// Keep only transitions on attributes whose owning strategy the issuer is
/// currently a member of, narrowing both the transition list and the
/// affected-groups pairs to that intersection.
#[must_use]
pub fn filter_to_affected(transitions: &TransitionSet, index: &MembershipIndex) -> TransitionSet {
    let rows = transitions.rows().filter_map(|row| {
        let member_strategies = index.strategies_for(&row.canonical_id);
        if member_strategies.is_empty() {
            return None;
        }
        let narrowed: Vec<_> = row
            .transitions
            .iter()
            .filter(|transition| member_strategies.contains(&transition.attribute))
            .cloned()
            .collect();
        if narrowed.is_empty() {
            return None;
        }
        let narrowed_codes: BTreeSet<StrategyCode> =
            narrowed.iter().map(|transition| transition.attribute.clone()).collect();
        let affected_groups: Vec<(GroupId, StrategyCode)> = index
            .pairs_for(&row.canonical_id)
            .iter()
            .filter(|(_, strategy)| narrowed_codes.contains(strategy))
            .cloned()
            .collect();
        Some(TransitionRow {
            canonical_id: row.canonical_id.clone(),
            display_name: row.display_name.clone(),
            transitions: narrowed,
            affected_groups,
        })
    });
    TransitionSet::from_rows(rows)
}
