//! End-to-end orchestration of one run: loader output in, report tables out.
//!
//! Configuration is passed explicitly; there is no global state and no
//! column discovery by naming convention. The tracked attribute list is the
//! validated schema.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use ulid::Ulid;

use crate::delta::{classify_all, compare, TransitionRule};
use crate::diagnostics::RunDiagnostics;
use crate::error::ScreeningError;
use crate::identity::{DedupPolicy, IdentityResolver, XrefRow};
use crate::impact::{aggregate_impacts, ImpactInputs};
use crate::membership::{GroupMemberRow, MembershipIndex, StrategyTaxonomy};
use crate::model::{IssuerRecord, OverrideEntry, PeriodId, Snapshot, StrategyCode};
use crate::overrides::{filter_with_overrides, OverrideLedger};
use crate::report::{issuer_list_table, ReportTable, StrategyReport};

/// Explicit per-run configuration. The two period ids come from the outer
/// CLI/config layer; the attribute list is the load-time schema.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct PipelineConfig {
    pub previous_period: PeriodId,
    pub current_period: PeriodId,
    pub attributes: Vec<StrategyCode>,
    #[serde(default = "default_dedup_policy")]
    pub xref_dedup: DedupPolicy,
}

fn default_dedup_policy() -> DedupPolicy {
    DedupPolicy::FirstSeen
}

/// Everything the loaders produced for one run. Held immutably for the
/// run's duration; the pipeline never mutates a source after loading.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct RunInputs {
    pub previous: Vec<IssuerRecord>,
    pub current: Vec<IssuerRecord>,
    pub xref: Vec<XrefRow>,
    pub overrides: Vec<OverrideEntry>,
    pub members: Vec<GroupMemberRow>,
    pub taxonomy: StrategyTaxonomy,
}

/// Determinism metadata for one run: what ran, over which inputs.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RunManifest {
    pub run_id: Ulid,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub previous_period: PeriodId,
    pub current_period: PeriodId,
    pub attributes: Vec<StrategyCode>,
    /// sha256 over the serialized inputs, for replay auditing.
    pub input_digest: String,
}

/// The business output plus the data-quality report for one run.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RunOutput {
    pub manifest: RunManifest,
    pub reports: Vec<StrategyReport>,
    pub new_only: ReportTable,
    pub dropped: ReportTable,
    pub diagnostics: RunDiagnostics,
}

fn input_digest(inputs: &RunInputs) -> Result<String, ScreeningError> {
    let body = serde_json::to_vec(inputs)
        .map_err(|err| ScreeningError::Config(format!("inputs are not serializable: {err}")))?;
    let mut hasher = Sha256::new();
    hasher.update(&body);
    Ok(hex::encode(hasher.finalize()))
}

fn record_unknown_values(
    snapshot: &Snapshot,
    attributes: &[StrategyCode],
    diagnostics: &mut RunDiagnostics,
) {
    for (_, record) in snapshot.iter() {
        for attribute in attributes {
            if let Some(crate::model::AttributeValue::Other(raw)) = record.attribute(attribute) {
                diagnostics.record_unknown_value(attribute, raw);
            }
        }
    }
}

/// Run the full pipeline: align, diff, classify, reconcile against the
/// override ledger, cross-reference membership, and aggregate per-strategy
/// impact tables.
///
/// # Errors
/// Returns [`ScreeningError::OverrideConflict`] when the override ledger
/// carries conflicting active assertions, or [`ScreeningError::Config`] when
/// the configuration is unusable. Everything else is recovered locally and
/// recorded in [`RunDiagnostics`].
pub fn run_pipeline(config: &PipelineConfig, inputs: &RunInputs) -> Result<RunOutput, ScreeningError> {
    if config.attributes.is_empty() {
        return Err(ScreeningError::Config("attribute list must not be empty".to_string()));
    }

    let run_id = Ulid::new();
    tracing::info!(
        %run_id,
        previous = %config.previous_period,
        current = %config.current_period,
        attributes = config.attributes.len(),
        "starting screening run"
    );
    let digest = input_digest(inputs)?;
    let mut diagnostics = RunDiagnostics::default();

    let (old, old_duplicates) =
        Snapshot::from_records(config.previous_period.clone(), inputs.previous.clone());
    diagnostics.record_duplicates(&config.previous_period, &old_duplicates);
    let (new, new_duplicates) =
        Snapshot::from_records(config.current_period.clone(), inputs.current.clone());
    diagnostics.record_duplicates(&config.current_period, &new_duplicates);

    record_unknown_values(&old, &config.attributes, &mut diagnostics);
    record_unknown_values(&new, &config.attributes, &mut diagnostics);

    let (resolver, xref_report) = IdentityResolver::build(&inputs.xref, config.xref_dedup);
    diagnostics.xref_rows_dropped = xref_report.rows_dropped;
    diagnostics.xref_rows_deduplicated = xref_report.rows_deduplicated;
    diagnostics.xref_conflicts = xref_report.conflicts;

    let delta = compare(&old, &new, &config.attributes);
    diagnostics.new_only_count = delta.new_only.len();
    diagnostics.dropped_count = delta.dropped.len();
    if delta.common_count == 0 {
        diagnostics.warn("snapshots share no common issuers; all outputs will be empty");
    }

    let raw_transitions = classify_all(&delta, &TransitionRule::standard());
    let ledger = OverrideLedger::build(&inputs.overrides)?;
    let surviving = filter_with_overrides(&raw_transitions, &ledger);

    let (membership, membership_report) =
        MembershipIndex::build(&inputs.members, &inputs.taxonomy, &resolver);
    diagnostics.unresolved_member_rows = membership_report.unresolved_rows;
    for group in membership_report.multi_strategy_portfolios {
        diagnostics.warn(format!("portfolio {group} is assigned multiple strategies"));
    }

    let affected = crate::membership::filter_to_affected(&surviving, &membership);
    tracing::info!(
        raw = raw_transitions.len(),
        surviving = surviving.len(),
        affected = affected.len(),
        "transition funnel"
    );

    let strategies = inputs.taxonomy.all_strategies();
    if strategies.is_empty() {
        diagnostics.warn("strategy taxonomy is empty; no impact tables will be produced");
    }
    let (impacts, failures) = aggregate_impacts(
        &strategies,
        ImpactInputs {
            old: &old,
            new: &new,
            transitions: &affected,
            membership: &membership,
            overrides: &ledger,
        },
    );
    for failure in failures {
        diagnostics.record_strategy_failure(&failure.strategy, &failure.message);
    }

    let reports = impacts.iter().map(StrategyReport::from_impact).collect();
    let new_only = issuer_list_table("new_only", &delta.new_only, &new);
    let dropped = issuer_list_table("dropped", &delta.dropped, &old);

    Ok(RunOutput {
        manifest: RunManifest {
            run_id,
            generated_at: OffsetDateTime::now_utc(),
            previous_period: config.previous_period.clone(),
            current_period: config.current_period.clone(),
            attributes: config.attributes.clone(),
            input_digest: digest,
        },
        reports,
        new_only,
        dropped,
        diagnostics,
    })
}
