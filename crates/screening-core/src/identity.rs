//! Cross-reference resolution between external (group-system) identifiers
//! and the canonical issuer id space used by all downstream joins.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::diagnostics::XrefConflict;
use crate::model::IssuerId;

/// One raw cross-reference row. Either id may be missing in the source.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct XrefRow {
    pub external_id: Option<String>,
    pub canonical_id: Option<String>,
    pub display_name: Option<String>,
}

/// Deterministic policy for dropping repeated canonical ids from the
/// cross-reference table before lookups are built.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    FirstSeen,
    LastSeen,
}

/// Data-quality findings from one resolver build.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct XrefReport {
    /// Rows dropped because the canonical id was missing.
    pub rows_dropped: usize,
    /// Rows dropped by the canonical-id dedup policy.
    pub rows_deduplicated: usize,
    /// External ids observed mapping to more than one canonical id.
    pub conflicts: Vec<XrefConflict>,
}

/// Bidirectional lookup between external and canonical issuer ids.
/// Pure function of the input rows; building it mutates nothing else.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct IdentityResolver {
    to_canonical: BTreeMap<String, IssuerId>,
    to_external: BTreeMap<IssuerId, String>,
    display_names: BTreeMap<IssuerId, String>,
}

impl IdentityResolver {
    /// Build the resolver from raw cross-reference rows.
    ///
    /// Rows without a canonical id are dropped and counted. The table is
    /// deduplicated on canonical id under the given policy before any
    /// lookup is built. An external id mapping to multiple canonical ids is
    /// recorded as a conflict; the policy-selected mapping answers forward
    /// lookups while every canonical id keeps its reverse mapping.
    #[must_use]
    pub fn build(rows: &[XrefRow], policy: DedupPolicy) -> (Self, XrefReport) {
        let mut report = XrefReport::default();

        let mut deduplicated: BTreeMap<IssuerId, &XrefRow> = BTreeMap::new();
        for row in rows {
            let Some(canonical_raw) = row.canonical_id.as_deref() else {
                report.rows_dropped += 1;
                continue;
            };
            let canonical_raw = canonical_raw.trim();
            if canonical_raw.is_empty() {
                report.rows_dropped += 1;
                continue;
            }
            let canonical = IssuerId::new(canonical_raw);
            match policy {
                DedupPolicy::FirstSeen => {
                    if deduplicated.contains_key(&canonical) {
                        report.rows_deduplicated += 1;
                    } else {
                        deduplicated.insert(canonical, row);
                    }
                }
                DedupPolicy::LastSeen => {
                    if deduplicated.insert(canonical, row).is_some() {
                        report.rows_deduplicated += 1;
                    }
                }
            }
        }

        let mut resolver = Self::default();
        let mut seen_externals: BTreeMap<String, Vec<IssuerId>> = BTreeMap::new();
        for (canonical, row) in &deduplicated {
            if let Some(name) = row.display_name.as_deref() {
                let name = name.trim();
                if !name.is_empty() {
                    resolver.display_names.insert(canonical.clone(), name.to_string());
                }
            }
            let Some(external) = row.external_id.as_deref() else {
                continue;
            };
            let external = external.trim();
            if external.is_empty() {
                continue;
            }
            resolver.to_external.insert(canonical.clone(), external.to_string());
            seen_externals.entry(external.to_string()).or_default().push(canonical.clone());
            resolver.to_canonical.entry(external.to_string()).or_insert_with(|| canonical.clone());
        }

        for (external, canonicals) in seen_externals {
            if canonicals.len() > 1 {
                tracing::warn!(
                    external_id = %external,
                    count = canonicals.len(),
                    "external id maps to multiple canonical ids"
                );
                report.conflicts.push(XrefConflict { external_id: external, canonical_ids: canonicals });
            }
        }

        if report.rows_dropped > 0 {
            tracing::warn!(count = report.rows_dropped, "cross-reference rows dropped: missing canonical id");
        }

        (resolver, report)
    }

    #[must_use]
    pub fn canonical_for(&self, external: &str) -> Option<&IssuerId> {
        self.to_canonical.get(external.trim())
    }

    #[must_use]
    pub fn external_for(&self, canonical: &IssuerId) -> Option<&str> {
        self.to_external.get(canonical).map(String::as_str)
    }

    #[must_use]
    pub fn display_name(&self, canonical: &IssuerId) -> Option<&str> {
        self.display_names.get(canonical).map(String::as_str)
    }

    /// Resolve any known identifier to the canonical id space. A value that
    /// already is a canonical id resolves to itself.
    #[must_use]
    pub fn resolve(&self, raw: &str) -> Option<IssuerId> {
        let trimmed = raw.trim();
        if self.to_external.contains_key(&IssuerId::new(trimmed)) {
            return Some(IssuerId::new(trimmed));
        }
        self.to_canonical.get(trimmed).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.to_external.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_external.is_empty()
    }
}
