//! Snapshot alignment and transition classification.
//!
//! `compare` aligns two snapshots over their common key set and records raw
//! per-attribute diffs; `classify` turns raw diffs into directional
//! transitions against a configurable condition set. Both are pure functions
//! returning new value types.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::{
    AttributeValue, ConditionSet, Direction, IssuerId, PeriodId, Snapshot, StrategyCode,
    Transition, TransitionKind, TransitionRow, TransitionSet,
};

/// One raw attribute change between two snapshots, before classification.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct AttributeDiff {
    pub attribute: StrategyCode,
    pub old_value: AttributeValue,
    pub new_value: AttributeValue,
}

/// All raw diffs for one issuer. Issuers with zero changed attributes never
/// appear in the delta at all.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DeltaRow {
    pub canonical_id: IssuerId,
    pub display_name: String,
    pub diffs: Vec<AttributeDiff>,
}

/// Output of one snapshot comparison.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DeltaSet {
    pub previous_period: PeriodId,
    pub current_period: PeriodId,
    /// Size of the common key set the diff ran over.
    pub common_count: usize,
    /// Issuers present only in the new snapshot; reported, never diffed.
    pub new_only: BTreeSet<IssuerId>,
    /// Issuers present only in the old snapshot; reported, never diffed.
    pub dropped: BTreeSet<IssuerId>,
    rows: Vec<DeltaRow>,
}

impl DeltaSet {
    #[must_use]
    pub fn rows(&self) -> &[DeltaRow] {
        &self.rows
    }

    /// Common issuers with no changed attribute.
    #[must_use]
    pub fn unchanged_count(&self) -> usize {
        self.common_count - self.rows.len()
    }
}

/// A parameterized classification rule: one transition kind, the condition
/// set it tests, and the direction of the test.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct TransitionRule {
    pub kind: TransitionKind,
    pub condition: ConditionSet,
    pub direction: Direction,
}

impl TransitionRule {
    /// Exclusion detection: a value entering `{EXCLUDED}`.
    #[must_use]
    pub fn new_exclusion() -> Self {
        Self {
            kind: TransitionKind::NewExclusion,
            condition: ConditionSet::exclusion(),
            direction: Direction::Entering,
        }
    }

    /// Inclusion detection: a value leaving `{EXCLUDED}` for `{OK, FLAG}`.
    #[must_use]
    pub fn new_inclusion() -> Self {
        Self {
            kind: TransitionKind::NewInclusion,
            condition: ConditionSet::exclusion(),
            direction: Direction::Leaving,
        }
    }

    /// Flag detection: a value entering `{FLAG}`.
    #[must_use]
    pub fn new_flag() -> Self {
        Self {
            kind: TransitionKind::NewFlag,
            condition: ConditionSet::flag(),
            direction: Direction::Entering,
        }
    }

    /// The three standard rules applied by every production run.
    #[must_use]
    pub fn standard() -> Vec<Self> {
        vec![Self::new_exclusion(), Self::new_inclusion(), Self::new_flag()]
    }

    /// Whether one raw diff qualifies under this rule. `Other` values never
    /// satisfy condition-set membership.
    #[must_use]
    pub fn qualifies(&self, diff: &AttributeDiff) -> bool {
        let old_in = self.condition.contains(&diff.old_value);
        let new_in = self.condition.contains(&diff.new_value);
        match self.direction {
            Direction::Entering => !old_in && new_in,
            Direction::Leaving => old_in && !new_in,
        }
    }
}

/// Align two snapshots over their common key set and record raw diffs for
/// every tracked attribute whose normalized values differ.
///
/// Attributes present in only one snapshot are skipped (no comparison
/// possible). Ids present in only one snapshot are reported in `new_only` /
/// `dropped` and excluded from diffing.
#[must_use]
pub fn compare(old: &Snapshot, new: &Snapshot, attributes: &[StrategyCode]) -> DeltaSet {
    let old_ids = old.ids();
    let new_ids = new.ids();

    let common: BTreeSet<IssuerId> = old_ids.intersection(&new_ids).cloned().collect();
    let new_only: BTreeSet<IssuerId> = new_ids.difference(&old_ids).cloned().collect();
    let dropped: BTreeSet<IssuerId> = old_ids.difference(&new_ids).cloned().collect();

    tracing::info!(
        previous = %old.period,
        current = %new.period,
        common = common.len(),
        new_only = new_only.len(),
        dropped = dropped.len(),
        "aligned snapshots"
    );
    if common.is_empty() {
        tracing::warn!("snapshots share no common issuers; delta is empty");
    }

    let mut rows = Vec::new();
    for id in &common {
        let (Some(old_record), Some(new_record)) = (old.get(id), new.get(id)) else {
            continue;
        };
        let mut diffs = Vec::new();
        for attribute in attributes {
            let (Some(old_value), Some(new_value)) =
                (old_record.attribute(attribute), new_record.attribute(attribute))
            else {
                continue;
            };
            if old_value != new_value {
                diffs.push(AttributeDiff {
                    attribute: attribute.clone(),
                    old_value: old_value.clone(),
                    new_value: new_value.clone(),
                });
            }
        }
        if !diffs.is_empty() {
            rows.push(DeltaRow {
                canonical_id: id.clone(),
                display_name: new_record.display_name.clone(),
                diffs,
            });
        }
    }

    DeltaSet {
        previous_period: old.period.clone(),
        current_period: new.period.clone(),
        common_count: common.len(),
        new_only,
        dropped,
        rows,
    }
}

/// Classify raw diffs under one rule. Issuers with no qualifying diff are
/// dropped entirely.
#[must_use]
pub fn classify(delta: &DeltaSet, rule: &TransitionRule) -> TransitionSet {
    let rows = delta.rows().iter().filter_map(|row| {
        let transitions: Vec<Transition> = row
            .diffs
            .iter()
            .filter(|diff| rule.qualifies(diff))
            .map(|diff| Transition {
                attribute: diff.attribute.clone(),
                old_value: diff.old_value.clone(),
                new_value: diff.new_value.clone(),
                kind: rule.kind,
            })
            .collect();
        if transitions.is_empty() {
            return None;
        }
        Some(TransitionRow {
            canonical_id: row.canonical_id.clone(),
            display_name: row.display_name.clone(),
            transitions,
            affected_groups: Vec::new(),
        })
    });
    TransitionSet::from_rows(rows)
}

/// Classify under several rules and merge per issuer. An attribute may
/// qualify under more than one rule (e.g. `EXCLUDED -> FLAG` is both a new
/// inclusion and a new flag); both transitions are kept.
#[must_use]
pub fn classify_all(delta: &DeltaSet, rules: &[TransitionRule]) -> TransitionSet {
    let mut merged: std::collections::BTreeMap<IssuerId, TransitionRow> =
        std::collections::BTreeMap::new();
    for rule in rules {
        let classified = classify(delta, rule);
        for (id, row) in classified.iter() {
            merged
                .entry(id.clone())
                .and_modify(|existing| existing.transitions.extend(row.transitions.clone()))
                .or_insert_with(|| row.clone());
        }
    }
    TransitionSet::from_rows(merged.into_values())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;

    use super::*;
    use crate::model::{Classification, IssuerRecord};

    fn code(value: &str) -> StrategyCode {
        StrategyCode::new(value)
    }

    fn known(classification: Classification) -> AttributeValue {
        AttributeValue::Known(classification)
    }

    fn record(id: &str, attributes: &[(&str, AttributeValue)]) -> IssuerRecord {
        IssuerRecord {
            canonical_id: IssuerId::new(id),
            display_name: format!("{id} Corp"),
            secondary_ids: BTreeMap::new(),
            attributes: attributes
                .iter()
                .map(|(attribute, value)| (code(attribute), value.clone()))
                .collect(),
        }
    }

    fn snapshot(period: &str, records: Vec<IssuerRecord>) -> Snapshot {
        let (snapshot, duplicates) = Snapshot::from_records(PeriodId::new(period), records);
        assert!(duplicates.is_empty(), "fixture snapshots must not contain duplicates");
        snapshot
    }

    // Test IDs: DEL-001
    #[test]
    fn unchanged_issuers_are_dropped_not_flagged() {
        let old = snapshot(
            "2024-09",
            vec![
                record("X001", &[("str_001", known(Classification::Ok))]),
                record("X002", &[("str_001", known(Classification::Ok))]),
            ],
        );
        let new = snapshot(
            "2024-10",
            vec![
                record("X001", &[("str_001", known(Classification::Excluded))]),
                record("X002", &[("str_001", known(Classification::Ok))]),
            ],
        );

        let delta = compare(&old, &new, &[code("str_001")]);

        assert_eq!(delta.common_count, 2);
        assert_eq!(delta.rows().len(), 1);
        assert_eq!(delta.unchanged_count(), 1);
        assert_eq!(delta.rows()[0].canonical_id, IssuerId::new("X001"));
    }

    // Test IDs: DEL-002
    #[test]
    fn one_sided_issuers_are_reported_and_never_diffed() {
        let old = snapshot("2024-09", vec![record("X001", &[("str_001", known(Classification::Ok))])]);
        let new = snapshot(
            "2024-10",
            vec![
                record("X001", &[("str_001", known(Classification::Ok))]),
                record("X002", &[("str_001", known(Classification::Excluded))]),
            ],
        );

        let delta = compare(&old, &new, &[code("str_001")]);

        assert!(delta.new_only.contains(&IssuerId::new("X002")));
        assert!(delta.dropped.is_empty());
        assert!(delta.rows().is_empty());
    }

    // Test IDs: DEL-003
    #[test]
    fn attribute_absent_on_one_side_is_skipped() {
        let old = snapshot("2024-09", vec![record("X001", &[("str_001", known(Classification::Ok))])]);
        let new = snapshot("2024-10", vec![record("X001", &[("cs_002", known(Classification::Excluded))])]);

        let delta = compare(&old, &new, &[code("str_001"), code("cs_002")]);

        assert!(delta.rows().is_empty());
        assert_eq!(delta.unchanged_count(), 1);
    }

    // Test IDs: DEL-004
    #[test]
    fn classify_detects_new_exclusions() {
        let old = snapshot("2024-09", vec![record("X001", &[("str_001", known(Classification::Ok))])]);
        let new = snapshot("2024-10", vec![record("X001", &[("str_001", known(Classification::Excluded))])]);

        let delta = compare(&old, &new, &[code("str_001")]);
        let transitions = classify(&delta, &TransitionRule::new_exclusion());

        assert_eq!(transitions.len(), 1);
        let row = transitions.get(&IssuerId::new("X001"));
        let Some(row) = row else { panic!("expected a transition row for X001") };
        assert_eq!(row.transitions.len(), 1);
        assert_eq!(row.transitions[0].kind, TransitionKind::NewExclusion);
        assert_eq!(row.transition_list(), vec![code("str_001")]);
    }

    // Test IDs: DEL-005
    #[test]
    fn unexpected_values_never_match_a_condition_set() {
        let old = snapshot("2024-09", vec![record("X001", &[("str_001", known(Classification::Ok))])]);
        let new = snapshot(
            "2024-10",
            vec![record("X001", &[("str_001", AttributeValue::Other("REVIEW".to_string()))])],
        );

        let delta = compare(&old, &new, &[code("str_001")]);
        // The raw diff is preserved untouched...
        assert_eq!(delta.rows().len(), 1);
        // ...but `REVIEW` does not count as entering {EXCLUDED} or {FLAG}.
        assert!(classify(&delta, &TransitionRule::new_exclusion()).is_empty());
        assert!(classify(&delta, &TransitionRule::new_flag()).is_empty());
    }

    // Test IDs: DEL-006
    #[test]
    fn excluded_to_flag_is_both_inclusion_and_flag() {
        let old = snapshot("2024-09", vec![record("X001", &[("str_001", known(Classification::Excluded))])]);
        let new = snapshot("2024-10", vec![record("X001", &[("str_001", known(Classification::Flag))])]);

        let delta = compare(&old, &new, &[code("str_001")]);
        let transitions = classify_all(&delta, &TransitionRule::standard());

        let Some(row) = transitions.get(&IssuerId::new("X001")) else {
            panic!("expected a transition row for X001")
        };
        let kinds: Vec<TransitionKind> =
            row.transitions.iter().map(|transition| transition.kind).collect();
        assert!(kinds.contains(&TransitionKind::NewInclusion));
        assert!(kinds.contains(&TransitionKind::NewFlag));
    }

    fn classification_strategy() -> impl Strategy<Value = Classification> {
        prop_oneof![
            Just(Classification::Ok),
            Just(Classification::Flag),
            Just(Classification::Excluded),
        ]
    }

    proptest! {
        // Test IDs: DEL-101
        // Swapping the snapshots and the direction yields the same
        // transition set with old/new values swapped.
        #[test]
        fn direction_swap_is_idempotent(values in proptest::collection::vec(
            (classification_strategy(), classification_strategy()),
            1..40,
        )) {
            let old_records: Vec<IssuerRecord> = values
                .iter()
                .enumerate()
                .map(|(index, (old_value, _))| {
                    record(&format!("X{index:04}"), &[("str_001", known(*old_value))])
                })
                .collect();
            let new_records: Vec<IssuerRecord> = values
                .iter()
                .enumerate()
                .map(|(index, (_, new_value))| {
                    record(&format!("X{index:04}"), &[("str_001", known(*new_value))])
                })
                .collect();

            let old = snapshot("2024-09", old_records);
            let new = snapshot("2024-10", new_records);

            let forward = classify(&compare(&old, &new, &[code("str_001")]), &TransitionRule::new_exclusion());
            let swapped = classify(
                &compare(&new, &old, &[code("str_001")]),
                &TransitionRule {
                    kind: TransitionKind::NewExclusion,
                    condition: ConditionSet::exclusion(),
                    direction: Direction::Leaving,
                },
            );

            prop_assert_eq!(forward.len(), swapped.len());
            for (id, row) in forward.iter() {
                let mirror = swapped.get(id);
                prop_assert!(mirror.is_some(), "missing mirrored row for {}", id);
                let Some(mirror) = mirror else { continue };
                prop_assert_eq!(row.transitions.len(), mirror.transitions.len());
                for (transition, mirrored) in row.transitions.iter().zip(&mirror.transitions) {
                    prop_assert_eq!(&transition.old_value, &mirrored.new_value);
                    prop_assert_eq!(&transition.new_value, &mirrored.old_value);
                }
            }
        }

        // Test IDs: DEL-102
        // |common| = |unchanged| + |issuers with >= 1 diff|.
        #[test]
        fn conservation_over_common_ids(values in proptest::collection::vec(
            (classification_strategy(), classification_strategy()),
            0..40,
        )) {
            let old_records: Vec<IssuerRecord> = values
                .iter()
                .enumerate()
                .map(|(index, (old_value, _))| {
                    record(&format!("X{index:04}"), &[("str_001", known(*old_value))])
                })
                .collect();
            let new_records: Vec<IssuerRecord> = values
                .iter()
                .enumerate()
                .map(|(index, (_, new_value))| {
                    record(&format!("X{index:04}"), &[("str_001", known(*new_value))])
                })
                .collect();

            let old = snapshot("2024-09", old_records);
            let new = snapshot("2024-10", new_records);
            let delta = compare(&old, &new, &[code("str_001")]);

            prop_assert_eq!(delta.common_count, delta.unchanged_count() + delta.rows().len());
        }
    }
}
