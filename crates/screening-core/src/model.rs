//! Domain model for the classification delta pipeline.
//!
//! Snapshots, the override ledger, and membership indices are built once per
//! run and never mutated afterwards; every pipeline stage returns new value
//! types instead of editing shared state.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Canonical issuer identifier used by all joins after cross-reference
/// resolution.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct IssuerId(pub String);

impl IssuerId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for IssuerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Portfolio or benchmark identifier.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct GroupId(pub String);

impl GroupId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for GroupId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strategy test-code. Attribute names in snapshots and strategy names in
/// the taxonomy share this namespace; the transition list joins against
/// taxonomy strategy names by these codes.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct StrategyCode(pub String);

impl StrategyCode {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for StrategyCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reporting period tag, e.g. "2024-10".
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PeriodId(pub String);

impl PeriodId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PeriodId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The known categorical classification domain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Ok,
    Flag,
    Excluded,
}

impl Classification {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Flag => "FLAG",
            Self::Excluded => "EXCLUDED",
        }
    }

    /// Parse a raw provider value after trimming and upper-casing.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "OK" => Some(Self::Ok),
            "FLAG" => Some(Self::Flag),
            "EXCLUDED" => Some(Self::Excluded),
            _ => None,
        }
    }
}

impl Display for Classification {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An attribute value as loaded from a feed. Values outside the known
/// classification domain are preserved verbatim and never coerced; they do
/// not participate in condition-set membership.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    Known(Classification),
    Other(String),
}

impl AttributeValue {
    /// Normalize a raw cell. Returns `None` for empty/null cells.
    #[must_use]
    pub fn normalize(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        match Classification::parse(trimmed) {
            Some(classification) => Some(Self::Known(classification)),
            None => Some(Self::Other(trimmed.to_string())),
        }
    }

    #[must_use]
    pub fn classification(&self) -> Option<Classification> {
        match self {
            Self::Known(classification) => Some(*classification),
            Self::Other(_) => None,
        }
    }

    #[must_use]
    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }
}

impl Display for AttributeValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Known(classification) => write!(f, "{classification}"),
            Self::Other(raw) => write!(f, "{raw}"),
        }
    }
}

/// A set of classifications used to detect transitions. `Other` values never
/// match a condition set.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ConditionSet(BTreeSet<Classification>);

impl ConditionSet {
    #[must_use]
    pub fn new(values: impl IntoIterator<Item = Classification>) -> Self {
        Self(values.into_iter().collect())
    }

    /// `{EXCLUDED}`, used for exclusion and inclusion detection.
    #[must_use]
    pub fn exclusion() -> Self {
        Self::new([Classification::Excluded])
    }

    /// `{FLAG}`, used for flag detection.
    #[must_use]
    pub fn flag() -> Self {
        Self::new([Classification::Flag])
    }

    #[must_use]
    pub fn contains(&self, value: &AttributeValue) -> bool {
        value.classification().is_some_and(|classification| self.0.contains(&classification))
    }

    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = Classification> + '_ {
        self.0.iter().copied()
    }
}

/// Transition detection direction relative to the condition set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// `old ∉ condition_set ∧ new ∈ condition_set`.
    Entering,
    /// `old ∈ condition_set ∧ new ∉ condition_set`.
    Leaving,
}

impl Direction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Entering => "entering",
            Self::Leaving => "leaving",
        }
    }
}

/// Classified transition kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    NewExclusion,
    NewInclusion,
    NewFlag,
}

impl TransitionKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewExclusion => "new_exclusion",
            Self::NewInclusion => "new_inclusion",
            Self::NewFlag => "new_flag",
        }
    }
}

/// One row per issuer per snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct IssuerRecord {
    pub canonical_id: IssuerId,
    pub display_name: String,
    #[serde(default)]
    pub secondary_ids: BTreeMap<String, String>,
    #[serde(default)]
    pub attributes: BTreeMap<StrategyCode, AttributeValue>,
}

impl IssuerRecord {
    #[must_use]
    pub fn attribute(&self, code: &StrategyCode) -> Option<&AttributeValue> {
        self.attributes.get(code)
    }
}

/// Immutable, period-tagged issuer table keyed by canonical id.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Snapshot {
    pub period: PeriodId,
    records: BTreeMap<IssuerId, IssuerRecord>,
}

impl Snapshot {
    /// Build a snapshot from loaded rows, deduplicating on canonical id.
    ///
    /// The first row for a given id wins; every later duplicate id is
    /// returned so the caller can record it as a data-quality finding.
    #[must_use]
    pub fn from_records(
        period: PeriodId,
        records: impl IntoIterator<Item = IssuerRecord>,
    ) -> (Self, Vec<IssuerId>) {
        let mut unique: BTreeMap<IssuerId, IssuerRecord> = BTreeMap::new();
        let mut duplicates = Vec::new();
        for record in records {
            if unique.contains_key(&record.canonical_id) {
                duplicates.push(record.canonical_id.clone());
                continue;
            }
            unique.insert(record.canonical_id.clone(), record);
        }
        (Self { period, records: unique }, duplicates)
    }

    #[must_use]
    pub fn get(&self, id: &IssuerId) -> Option<&IssuerRecord> {
        self.records.get(id)
    }

    #[must_use]
    pub fn ids(&self) -> BTreeSet<IssuerId> {
        self.records.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IssuerId, &IssuerRecord)> {
        self.records.iter()
    }

    /// Attribute value for an issuer, `None` when the issuer or the
    /// attribute is absent.
    #[must_use]
    pub fn value_of(&self, id: &IssuerId, code: &StrategyCode) -> Option<&AttributeValue> {
        self.records.get(id).and_then(|record| record.attribute(code))
    }
}

/// One manual override assertion as loaded from the ledger source.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct OverrideEntry {
    pub canonical_id: IssuerId,
    #[serde(default)]
    pub group_system_id: Option<String>,
    pub attribute: StrategyCode,
    pub asserted_value: AttributeValue,
    pub active: bool,
}

/// Group kind; portfolios map to at most one strategy, benchmarks to many.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    Portfolio,
    Benchmark,
}

impl GroupKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Portfolio => "portfolio",
            Self::Benchmark => "benchmark",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "portfolio" => Some(Self::Portfolio),
            "benchmark" => Some(Self::Benchmark),
            _ => None,
        }
    }
}

/// A named collection of issuers (portfolio or benchmark).
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Group {
    pub group_id: GroupId,
    pub kind: GroupKind,
    pub member_ids: BTreeSet<IssuerId>,
}

/// One detected attribute change, classified by direction.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Transition {
    pub attribute: StrategyCode,
    pub old_value: AttributeValue,
    pub new_value: AttributeValue,
    pub kind: TransitionKind,
}

/// All qualifying transitions for one issuer, plus the group/strategy pairs
/// the membership mapper attributed them to.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct TransitionRow {
    pub canonical_id: IssuerId,
    pub display_name: String,
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub affected_groups: Vec<(GroupId, StrategyCode)>,
}

impl TransitionRow {
    /// Exactly the attributes that qualified; the join key against taxonomy
    /// strategy names.
    #[must_use]
    pub fn transition_list(&self) -> Vec<StrategyCode> {
        self.transitions.iter().map(|transition| transition.attribute.clone()).collect()
    }
}

/// Issuer-keyed set of transition rows. Produced by the delta engine and
/// rebuilt (never edited in place) by each downstream filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct TransitionSet {
    rows: BTreeMap<IssuerId, TransitionRow>,
}

impl TransitionSet {
    #[must_use]
    pub fn from_rows(rows: impl IntoIterator<Item = TransitionRow>) -> Self {
        Self {
            rows: rows.into_iter().map(|row| (row.canonical_id.clone(), row)).collect(),
        }
    }

    #[must_use]
    pub fn get(&self, id: &IssuerId) -> Option<&TransitionRow> {
        self.rows.get(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IssuerId, &TransitionRow)> {
        self.rows.iter()
    }

    pub fn rows(&self) -> impl Iterator<Item = &TransitionRow> {
        self.rows.values()
    }
}

/// One sign-off row per (issuer, attribute) for a strategy, assembled from
/// four independent sources.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct StrategyImpactRow {
    pub canonical_id: IssuerId,
    pub display_name: String,
    pub attribute: StrategyCode,
    pub old_value: Option<AttributeValue>,
    pub new_value: Option<AttributeValue>,
    pub group_system_value: Option<AttributeValue>,
    pub override_value: Option<AttributeValue>,
    pub affected_groups: Vec<GroupId>,
}
