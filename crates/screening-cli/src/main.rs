use std::fs;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use screening_core::{
    classify_all, compare, run_pipeline, DedupPolicy, GroupKind, OverrideLedger, PeriodId,
    PipelineConfig, RunInputs, RunOutput, Snapshot, StrategyCode, TransitionRule,
};
use screening_ingest::{
    read_member_table, read_membership, read_overrides, read_snapshot, read_taxonomy, read_xref,
};
use serde::Deserialize;
use serde_json::Value;

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const MANIFEST_FILE: &str = "manifest.json";
const DIAGNOSTICS_FILE: &str = "diagnostics.json";
const NEW_ONLY_FILE: &str = "new_only.json";
const DROPPED_FILE: &str = "dropped.json";

#[derive(Debug, Parser)]
#[command(name = "screenctl")]
#[command(about = "Classification delta and compliance-impact engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the full pipeline and write report files to the output directory.
    Run(RunArgs),
    /// Align the two snapshots and print classified transitions, before
    /// override reconciliation and membership narrowing.
    Diff(DiffArgs),
    /// Validate the override ledger without running the pipeline.
    CheckOverrides(CheckOverridesArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long)]
    config: PathBuf,
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct DiffArgs {
    #[arg(long)]
    config: PathBuf,
}

#[derive(Debug, Args)]
struct CheckOverridesArgs {
    #[arg(long)]
    config: PathBuf,
}

/// One run's YAML configuration. Source paths are resolved relative to the
/// config file's directory.
#[derive(Debug, Deserialize)]
struct RunConfigFile {
    previous_period: String,
    current_period: String,
    attributes: Vec<String>,
    #[serde(default)]
    xref_dedup: Option<DedupPolicy>,
    sources: SourcePaths,
}

#[derive(Debug, Deserialize)]
struct SourcePaths {
    previous_snapshot: PathBuf,
    current_snapshot: PathBuf,
    xref: PathBuf,
    overrides: PathBuf,
    taxonomy: PathBuf,
    /// Multi-sheet workbook carrying `Portfolios` and `Benchmarks`.
    #[serde(default)]
    membership_workbook: Option<PathBuf>,
    /// Delimited alternatives to the workbook, one table per group kind.
    #[serde(default)]
    portfolios: Option<PathBuf>,
    #[serde(default)]
    benchmarks: Option<PathBuf>,
}

impl RunConfigFile {
    fn load(path: &Path) -> Result<Self> {
        let body = fs::read_to_string(path)
            .with_context(|| format!("failed to read run config {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&body)
            .with_context(|| format!("failed to parse run config {}", path.display()))?;
        if config.attributes.is_empty() {
            return Err(anyhow!("run config {} lists no attributes", path.display()));
        }
        Ok(config)
    }

    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            previous_period: PeriodId::new(&self.previous_period),
            current_period: PeriodId::new(&self.current_period),
            attributes: self.attributes.iter().map(StrategyCode::new).collect(),
            xref_dedup: self.xref_dedup.unwrap_or(DedupPolicy::FirstSeen),
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run_run(&args),
        Command::Diff(args) => run_diff(&args),
        Command::CheckOverrides(args) => run_check_overrides(&args),
    }
}

fn run_run(args: &RunArgs) -> Result<()> {
    let config_file = RunConfigFile::load(&args.config)?;
    let config = config_file.pipeline_config();
    let inputs = load_inputs(&args.config, &config_file, &config.attributes)?;

    let output = run_pipeline(&config, &inputs)?;
    write_run_output(&args.out, &output)?;

    emit_json(serde_json::json!({
        "run_id": output.manifest.run_id.to_string(),
        "out_dir": args.out,
        "previous_period": output.manifest.previous_period,
        "current_period": output.manifest.current_period,
        "input_digest": output.manifest.input_digest,
        "reports": output
            .reports
            .iter()
            .map(|report| {
                serde_json::json!({
                    "strategy": report.strategy,
                    "reported": report.reported,
                    "suppressed": report.suppressed,
                })
            })
            .collect::<Vec<_>>(),
        "new_only": output.new_only.rows.len(),
        "dropped": output.dropped.rows.len(),
        "has_findings": output.diagnostics.has_findings(),
    }))
}

fn run_diff(args: &DiffArgs) -> Result<()> {
    let config_file = RunConfigFile::load(&args.config)?;
    let config = config_file.pipeline_config();
    let inputs = load_inputs(&args.config, &config_file, &config.attributes)?;

    let (old, old_duplicates) =
        Snapshot::from_records(config.previous_period.clone(), inputs.previous);
    let (new, new_duplicates) =
        Snapshot::from_records(config.current_period.clone(), inputs.current);
    let delta = compare(&old, &new, &config.attributes);
    let transitions = classify_all(&delta, &TransitionRule::standard());

    emit_json(serde_json::json!({
        "previous_period": delta.previous_period,
        "current_period": delta.current_period,
        "previous_duplicates": old_duplicates.len(),
        "current_duplicates": new_duplicates.len(),
        "common": delta.common_count,
        "changed": delta.rows().len(),
        "new_only": delta.new_only,
        "dropped": delta.dropped,
        "transitions": transitions.rows().collect::<Vec<_>>(),
    }))
}

fn run_check_overrides(args: &CheckOverridesArgs) -> Result<()> {
    let config_file = RunConfigFile::load(&args.config)?;
    let base = config_base(&args.config);
    let path = resolve(&base, &config_file.sources.overrides);
    let entries = read_overrides(open(&path)?, &path.display().to_string())?;

    let active = entries.iter().filter(|entry| entry.active).count();
    let ledger = OverrideLedger::build(&entries)?;
    emit_json(serde_json::json!({
        "rows": entries.len(),
        "active": active,
        "distinct_active_keys": ledger.len(),
        "status": "ok",
    }))
}

fn write_run_output(out_dir: &Path, output: &RunOutput) -> Result<()> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create output directory {}", out_dir.display()))?;

    write_json(&out_dir.join(MANIFEST_FILE), &output.manifest)?;
    write_json(&out_dir.join(DIAGNOSTICS_FILE), &output.diagnostics)?;
    write_json(&out_dir.join(NEW_ONLY_FILE), &output.new_only)?;
    write_json(&out_dir.join(DROPPED_FILE), &output.dropped)?;
    for report in &output.reports {
        write_json(&out_dir.join(format!("strategy_{}.json", report.strategy)), report)?;
    }
    Ok(())
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_vec_pretty(value)
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))
}

fn config_base(config_path: &Path) -> PathBuf {
    config_path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn open(path: &Path) -> Result<File> {
    File::open(path).with_context(|| format!("failed to open {}", path.display()))
}

fn load_inputs(
    config_path: &Path,
    config_file: &RunConfigFile,
    attributes: &[StrategyCode],
) -> Result<RunInputs> {
    let base = config_base(config_path);
    let sources = &config_file.sources;

    let previous_path = resolve(&base, &sources.previous_snapshot);
    let previous =
        read_snapshot(open(&previous_path)?, &previous_path.display().to_string(), attributes)?;
    let current_path = resolve(&base, &sources.current_snapshot);
    let current =
        read_snapshot(open(&current_path)?, &current_path.display().to_string(), attributes)?;

    let xref_path = resolve(&base, &sources.xref);
    let xref = read_xref(open(&xref_path)?, &xref_path.display().to_string())?;

    let overrides_path = resolve(&base, &sources.overrides);
    let overrides = read_overrides(open(&overrides_path)?, &overrides_path.display().to_string())?;

    let taxonomy_path = resolve(&base, &sources.taxonomy);
    let taxonomy = read_taxonomy(open(&taxonomy_path)?, &taxonomy_path.display().to_string())?;

    let mut members = Vec::new();
    if let Some(path) = &sources.membership_workbook {
        members.extend(read_membership(&resolve(&base, path))?);
    }
    if let Some(path) = &sources.portfolios {
        let path = resolve(&base, path);
        members.extend(read_member_table(
            open(&path)?,
            &path.display().to_string(),
            GroupKind::Portfolio,
        )?);
    }
    if let Some(path) = &sources.benchmarks {
        let path = resolve(&base, path);
        members.extend(read_member_table(
            open(&path)?,
            &path.display().to_string(),
            GroupKind::Benchmark,
        )?);
    }
    if members.is_empty() {
        tracing::warn!("no membership rows loaded; every impact table will be empty");
    }

    Ok(RunInputs { previous, current, xref, overrides, members, taxonomy })
}
