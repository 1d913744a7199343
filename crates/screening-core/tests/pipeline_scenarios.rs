//! Full-pipeline scenarios over hand-built inputs: one issuer, one
//! portfolio, one strategy, varied only in the override ledger and the
//! membership/taxonomy wiring.

use std::collections::BTreeMap;

use screening_core::{
    run_pipeline, AttributeValue, Classification, GroupId, GroupKind, GroupMemberRow, IssuerId,
    IssuerRecord, OverrideEntry, PeriodId, PipelineConfig, RunInputs, ScreeningError,
    StrategyCode, StrategyTaxonomy, XrefRow,
};

fn code(value: &str) -> StrategyCode {
    StrategyCode::new(value)
}

fn known(classification: Classification) -> AttributeValue {
    AttributeValue::Known(classification)
}

fn issuer(id: &str, name: &str, values: &[(&str, Classification)]) -> IssuerRecord {
    IssuerRecord {
        canonical_id: IssuerId::new(id),
        display_name: name.to_string(),
        secondary_ids: BTreeMap::new(),
        attributes: values
            .iter()
            .map(|(attribute, classification)| (code(attribute), known(*classification)))
            .collect(),
    }
}

fn config() -> PipelineConfig {
    PipelineConfig {
        previous_period: PeriodId::new("2024-09"),
        current_period: PeriodId::new("2024-10"),
        attributes: vec![code("str_001")],
        xref_dedup: screening_core::DedupPolicy::FirstSeen,
    }
}

fn base_inputs() -> RunInputs {
    RunInputs {
        previous: vec![issuer("X001", "Acme", &[("str_001", Classification::Ok)])],
        current: vec![issuer("X001", "Acme", &[("str_001", Classification::Excluded)])],
        xref: vec![XrefRow {
            external_id: Some("B001".to_string()),
            canonical_id: Some("X001".to_string()),
            display_name: Some("Acme".to_string()),
        }],
        overrides: Vec::new(),
        members: vec![GroupMemberRow {
            kind: GroupKind::Portfolio,
            group_id: GroupId::new("PF1"),
            group_system_id: "B001".to_string(),
            description: "Main portfolio".to_string(),
            values: BTreeMap::new(),
        }],
        taxonomy: StrategyTaxonomy::new(
            [(GroupId::new("PF1"), vec![code("str_001")])].into_iter().collect(),
        ),
    }
}

// Scenario: OK -> EXCLUDED, no override, issuer in a portfolio mapped to the
// strategy. Exactly one reported row.
#[test]
fn new_exclusion_in_member_portfolio_is_reported() {
    let output = match run_pipeline(&config(), &base_inputs()) {
        Ok(output) => output,
        Err(err) => panic!("pipeline should run: {err}"),
    };

    let report = output
        .reports
        .iter()
        .find(|report| report.strategy == code("str_001"));
    let Some(report) = report else { panic!("expected a report for str_001") };
    assert_eq!(report.reported, 1);
    let row = &report.detail.rows[0];
    assert_eq!(row[0], "X001");
    assert_eq!(row[1], "Acme");
    assert_eq!(row[3], "OK");
    assert_eq!(row[4], "EXCLUDED");
    assert!(output.diagnostics.strategy_failures.is_empty());
}

// Scenario: same change, but an active override asserting OK stands. The
// transition is cancelled and nothing is reported.
#[test]
fn standing_override_cancels_the_report() {
    let mut inputs = base_inputs();
    inputs.overrides.push(OverrideEntry {
        canonical_id: IssuerId::new("X001"),
        group_system_id: Some("B001".to_string()),
        attribute: code("str_001"),
        asserted_value: known(Classification::Ok),
        active: true,
    });

    let output = match run_pipeline(&config(), &inputs) {
        Ok(output) => output,
        Err(err) => panic!("pipeline should run: {err}"),
    };

    for report in &output.reports {
        assert_eq!(report.reported, 0, "strategy {} must be empty", report.strategy);
    }
}

// Scenario: same change, but the issuer belongs to no group mapped to the
// strategy. The transition is computed and then filtered out.
#[test]
fn non_member_issuer_is_filtered_at_membership() {
    let mut inputs = base_inputs();
    inputs.taxonomy = StrategyTaxonomy::new(
        [(GroupId::new("PF1"), vec![code("cs_002")])].into_iter().collect(),
    );

    let output = match run_pipeline(&config(), &inputs) {
        Ok(output) => output,
        Err(err) => panic!("pipeline should run: {err}"),
    };

    for report in &output.reports {
        assert_eq!(report.reported, 0, "strategy {} must be empty", report.strategy);
    }
}

// Scenario: an issuer present only in the new snapshot appears in new_only
// and in no impact table.
#[test]
fn new_only_issuers_never_reach_impact_tables() {
    let mut inputs = base_inputs();
    inputs.current.push(issuer("X002", "Globex", &[("str_001", Classification::Excluded)]));

    let output = match run_pipeline(&config(), &inputs) {
        Ok(output) => output,
        Err(err) => panic!("pipeline should run: {err}"),
    };

    assert_eq!(output.new_only.rows, vec![vec!["X002".to_string(), "Globex".to_string()]]);
    for report in &output.reports {
        for row in &report.detail.rows {
            assert_ne!(row[0], "X002");
        }
    }
    assert_eq!(output.diagnostics.new_only_count, 1);
}

// Membership narrowing invariant: every reported row's issuer is a current
// member of at least one group whose taxonomy includes the strategy.
#[test]
fn reported_rows_respect_membership() {
    let mut inputs = base_inputs();
    // A second issuer transitions but is in no group at all.
    inputs.previous.push(issuer("X003", "Initech", &[("str_001", Classification::Ok)]));
    inputs.current.push(issuer("X003", "Initech", &[("str_001", Classification::Excluded)]));

    let output = match run_pipeline(&config(), &inputs) {
        Ok(output) => output,
        Err(err) => panic!("pipeline should run: {err}"),
    };

    let reported_ids: Vec<&str> = output
        .reports
        .iter()
        .flat_map(|report| report.detail.rows.iter().map(|row| row[0].as_str()))
        .collect();
    assert_eq!(reported_ids, vec!["X001"]);
}

// Conflicting active overrides abort the run instead of guessing.
#[test]
fn conflicting_overrides_abort_the_run() {
    let mut inputs = base_inputs();
    for classification in [Classification::Ok, Classification::Excluded] {
        inputs.overrides.push(OverrideEntry {
            canonical_id: IssuerId::new("X001"),
            group_system_id: None,
            attribute: code("str_001"),
            asserted_value: known(classification),
            active: true,
        });
    }

    let result = run_pipeline(&config(), &inputs);
    let Err(err) = result else { panic!("expected an override conflict") };
    assert!(matches!(err, ScreeningError::OverrideConflict { .. }));
}

// Disjoint snapshots produce empty outputs plus a warning, never an error.
#[test]
fn empty_intersection_is_a_warning_not_an_error() {
    let mut inputs = base_inputs();
    inputs.previous = vec![issuer("Y900", "Vandelay", &[("str_001", Classification::Ok)])];

    let output = match run_pipeline(&config(), &inputs) {
        Ok(output) => output,
        Err(err) => panic!("pipeline should run: {err}"),
    };

    for report in &output.reports {
        assert_eq!(report.reported, 0);
    }
    assert!(output
        .diagnostics
        .warnings
        .iter()
        .any(|warning| warning.contains("no common issuers")));
}

// Unexpected categorical values surface in diagnostics and never classify.
#[test]
fn unexpected_values_are_logged_and_never_classified() {
    let mut inputs = base_inputs();
    inputs.current = vec![IssuerRecord {
        canonical_id: IssuerId::new("X001"),
        display_name: "Acme".to_string(),
        secondary_ids: BTreeMap::new(),
        attributes: [(code("str_001"), AttributeValue::Other("REVIEW".to_string()))]
            .into_iter()
            .collect(),
    }];

    let output = match run_pipeline(&config(), &inputs) {
        Ok(output) => output,
        Err(err) => panic!("pipeline should run: {err}"),
    };

    assert_eq!(output.diagnostics.unknown_values.len(), 1);
    assert_eq!(output.diagnostics.unknown_values[0].raw_value, "REVIEW");
    for report in &output.reports {
        assert_eq!(report.reported, 0);
    }
}
