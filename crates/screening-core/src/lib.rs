//! Classification delta and compliance-impact engine.
//!
//! One run aligns two period-tagged issuer snapshots, classifies attribute
//! transitions, reconciles them against the manual-override ledger, narrows
//! them to current portfolio/benchmark membership, and aggregates
//! per-strategy impact tables for sign-off. All stages are pure functions
//! over immutable inputs.

pub mod delta;
pub mod diagnostics;
mod error;
pub mod identity;
pub mod impact;
pub mod membership;
pub mod model;
pub mod overrides;
pub mod pipeline;
pub mod report;

pub use delta::{classify, classify_all, compare, AttributeDiff, DeltaRow, DeltaSet, TransitionRule};
pub use diagnostics::{RunDiagnostics, StrategyFailure, UnknownValue, XrefConflict};
pub use error::ScreeningError;
pub use identity::{DedupPolicy, IdentityResolver, XrefReport, XrefRow};
pub use impact::{aggregate_impacts, compute_strategy_impact, ImpactInputs, StrategyImpact};
pub use membership::{
    filter_to_affected, GroupMemberRow, MembershipIndex, MembershipReport, StrategyTaxonomy,
};
pub use model::{
    AttributeValue, Classification, ConditionSet, Direction, Group, GroupId, GroupKind, IssuerId,
    IssuerRecord, OverrideEntry, PeriodId, Snapshot, StrategyCode, StrategyImpactRow, Transition,
    TransitionKind, TransitionRow, TransitionSet,
};
pub use overrides::{filter_with_overrides, OverrideLedger};
pub use pipeline::{run_pipeline, PipelineConfig, RunInputs, RunManifest, RunOutput};
pub use report::{issuer_list_table, ReportTable, StrategyReport, IMPACT_COLUMNS};
