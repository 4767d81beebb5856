use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, info_span, instrument};
use uuid::Uuid;

pub mod processing;

use crate::config::{validate_join_sources, Config, JoinSource};
use crate::constants::{DEDUP_STAGE, FLATTEN_STAGE, JOIN_STAGE, SUSPENSION_STAGE};
use crate::error::{ConsolidatorError, Result};
use crate::storage::{ensure_exists, read_table, write_json, write_table};
use crate::types::{DriveRegistry, GrantTable, SuspendedAccounts};
use processing::{
    dedup_organizer_table, dedup_organizers, filter_suspended, filter_suspended_tables, DedupReport,
    DuplicateKeyPolicy, EntityJoiner, FilterReport, FlattenReport, GrantFlattener, JoinReport,
};

/// Table labels; secondary join tables are labelled by their config entry.
pub const PRIMARY_LABEL: &str = "drives";
pub const PERMISSIONS_LABEL: &str = "permissions";
pub const GRANTS_LABEL: &str = "grants";
pub const SUSPENDED_LABEL: &str = "suspended_accounts";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Stage-specific counters carried in the run summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageDetails {
    Flatten(FlattenReport),
    Join(JoinReport),
    Dedup(DedupReport),
    Suspension(FilterReport),
}

/// Outcome of one stage invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: &'static str,
    pub status: StageStatus,
    pub output: Option<String>,
    pub rows_out: usize,
    pub message: Option<String>,
    pub details: Option<StageDetails>,
}

impl StageReport {
    fn succeeded(stage: &'static str, output: &Path, rows_out: usize, details: StageDetails) -> Self {
        Self {
            stage,
            status: StageStatus::Succeeded,
            output: Some(output.display().to_string()),
            rows_out,
            message: None,
            details: Some(details),
        }
    }

    fn failed(stage: &'static str, err: &ConsolidatorError) -> Self {
        Self {
            stage,
            status: StageStatus::Failed,
            output: None,
            rows_out: 0,
            message: Some(err.to_string()),
            details: None,
        }
    }

    fn skipped(stage: &'static str, reason: &str) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped,
            output: None,
            rows_out: 0,
            message: Some(reason.to_string()),
            details: None,
        }
    }
}

/// Result of a complete pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub stages: Vec<StageReport>,
}

impl RunSummary {
    /// True when no stage failed; skipped stages do not count as failures.
    pub fn success(&self) -> bool {
        self.stages.iter().all(|s| s.status != StageStatus::Failed)
    }

    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == name)
    }

    /// Persist the summary as pretty-printed JSON.
    pub fn persist(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }
}

/// Full recomputation over one input snapshot, driven by [`Config`].
pub struct Pipeline {
    config: Config,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Every input file the run will read, in stage order.
    pub fn required_inputs(&self) -> Vec<PathBuf> {
        let cfg = &self.config;
        let mut inputs = vec![
            cfg.input_path(&cfg.inputs.drives),
            cfg.input_path(&cfg.inputs.permissions),
            cfg.input_path(&cfg.join.primary),
        ];
        inputs.extend(cfg.join.sources.iter().map(|s| cfg.input_path(&s.path)));
        if let Some(suspended) = &cfg.inputs.suspended {
            inputs.push(cfg.input_path(suspended));
        }
        inputs
    }

    /// Run every stage.
    ///
    /// A missing input file aborts the whole run before anything is written.
    /// After that, a failing stage only fails itself: stages that consume its
    /// output are skipped and independent stages still run.
    pub fn run(&self) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = info_span!("pipeline_run", %run_id);
        let _enter = span.enter();

        for path in self.required_inputs() {
            if let Err(e) = ensure_exists(&path) {
                error!("Required input is missing: {}", path.display());
                return Err(e);
            }
        }

        let cfg = &self.config;
        let mut stages = Vec::new();
        metrics::counter!("acl_pipeline_runs_total").increment(1);
        info!("🚀 Starting ACL consolidation run");

        let flattened = run_stage(&mut stages, FLATTEN_STAGE, || {
            normalize(
                &cfg.input_path(&cfg.inputs.drives),
                &cfg.input_path(&cfg.inputs.permissions),
                &cfg.output_path(&cfg.outputs.normalized),
            )
        });

        let sources: Vec<JoinSource> = cfg
            .join
            .sources
            .iter()
            .map(|s| JoinSource::new(s.label.clone(), cfg.input_path(&s.path)))
            .collect();
        run_stage(&mut stages, JOIN_STAGE, || {
            merge_files(
                &cfg.input_path(&cfg.join.primary),
                &sources,
                cfg.join.duplicate_keys,
                &cfg.output_path(&cfg.outputs.consolidated),
            )
            .map(|report| ((), report))
        });

        let deduped = match flattened {
            Some(grants) => run_stage(&mut stages, DEDUP_STAGE, || {
                dedup(grants, &cfg.output_path(&cfg.outputs.deduplicated))
            }),
            None => {
                stages.push(StageReport::skipped(DEDUP_STAGE, "flatten stage did not complete"));
                None
            }
        };

        match (&cfg.inputs.suspended, deduped) {
            (None, _) => stages.push(StageReport::skipped(
                SUSPENSION_STAGE,
                "no suspended accounts file configured",
            )),
            (Some(_), None) => {
                stages.push(StageReport::skipped(SUSPENSION_STAGE, "dedup stage did not complete"))
            }
            (Some(path), Some(grants)) => {
                run_stage(&mut stages, SUSPENSION_STAGE, || {
                    suspend(
                        &grants,
                        &cfg.input_path(path),
                        &cfg.output_path(&cfg.outputs.suspended),
                    )
                    .map(|report| ((), report))
                });
            }
        }

        let summary = RunSummary {
            run_id,
            started_at,
            completed_at: Utc::now(),
            stages,
        };
        if summary.success() {
            info!("🎉 ACL consolidation run completed");
        } else {
            error!("💥 ACL consolidation run finished with failed stages");
        }
        Ok(summary)
    }
}

fn run_stage<T>(
    stages: &mut Vec<StageReport>,
    stage: &'static str,
    f: impl FnOnce() -> Result<(T, StageReport)>,
) -> Option<T> {
    let started = Instant::now();
    let result = f();
    metrics::histogram!("acl_stage_duration_seconds", "stage" => stage)
        .record(started.elapsed().as_secs_f64());

    match result {
        Ok((value, report)) => {
            info!("✅ Stage '{}' wrote {} rows", stage, report.rows_out);
            stages.push(report);
            Some(value)
        }
        Err(e) => {
            error!("❌ Stage '{}' failed: {}", stage, e);
            metrics::counter!("acl_stage_failures_total", "stage" => stage).increment(1);
            stages.push(StageReport::failed(stage, &e));
            None
        }
    }
}

fn normalize(drives: &Path, permissions: &Path, output: &Path) -> Result<(GrantTable, StageReport)> {
    let registry_table = read_table(drives, PRIMARY_LABEL)?;
    let registry = DriveRegistry::from_table(FLATTEN_STAGE, &registry_table)?;
    let wide = read_table(permissions, PERMISSIONS_LABEL)?;

    let (grants, report) = GrantFlattener::new(&registry).flatten_table(&wide)?;
    write_table(output, &grants.to_table(GRANTS_LABEL))?;

    let stage = StageReport::succeeded(FLATTEN_STAGE, output, grants.len(), StageDetails::Flatten(report));
    Ok((grants, stage))
}

fn dedup(grants: GrantTable, output: &Path) -> Result<(GrantTable, StageReport)> {
    let (deduped, report) = dedup_organizers(grants);
    write_table(output, &deduped.to_table(GRANTS_LABEL))?;

    let stage = StageReport::succeeded(DEDUP_STAGE, output, deduped.len(), StageDetails::Dedup(report));
    Ok((deduped, stage))
}

fn suspend(grants: &GrantTable, suspended: &Path, output: &Path) -> Result<StageReport> {
    let accounts = SuspendedAccounts::from_table(SUSPENSION_STAGE, &read_table(suspended, SUSPENDED_LABEL)?)?;
    let (matched, report) = filter_suspended(grants, &accounts);
    write_table(output, &matched.to_table(GRANTS_LABEL))?;

    Ok(StageReport::succeeded(
        SUSPENSION_STAGE,
        output,
        matched.len(),
        StageDetails::Suspension(report),
    ))
}

/// Flatten the wide permission export against the drive registry.
#[instrument(skip_all, fields(stage = FLATTEN_STAGE))]
pub fn normalize_files(drives: &Path, permissions: &Path, output: &Path) -> Result<StageReport> {
    ensure_exists(drives)?;
    ensure_exists(permissions)?;
    normalize(drives, permissions, output).map(|(_, report)| report)
}

/// Left-join `sources` onto `primary` by `id`.
#[instrument(skip_all, fields(stage = JOIN_STAGE))]
pub fn merge_files(
    primary: &Path,
    sources: &[JoinSource],
    policy: DuplicateKeyPolicy,
    output: &Path,
) -> Result<StageReport> {
    validate_join_sources(sources)?;
    ensure_exists(primary)?;
    for source in sources {
        ensure_exists(&source.path)?;
    }

    let primary_table = read_table(primary, PRIMARY_LABEL)?;
    let secondaries = sources
        .iter()
        .map(|s| read_table(&s.path, &s.label))
        .collect::<Result<Vec<_>>>()?;

    let (joined, report) = EntityJoiner::new(policy).join_all(primary_table, &secondaries)?;
    write_table(output, &joined)?;

    Ok(StageReport::succeeded(JOIN_STAGE, output, joined.len(), StageDetails::Join(report)))
}

/// Deduplicate organizer grants of a normalized grant file.
#[instrument(skip_all, fields(stage = DEDUP_STAGE))]
pub fn dedup_file(input: &Path, output: &Path) -> Result<StageReport> {
    let table = read_table(input, GRANTS_LABEL)?;
    let (deduped, report) = dedup_organizer_table(&table)?;
    write_table(output, &deduped.to_table(GRANTS_LABEL))?;

    Ok(StageReport::succeeded(DEDUP_STAGE, output, deduped.len(), StageDetails::Dedup(report)))
}

/// Keep the grants held by suspended accounts.
#[instrument(skip_all, fields(stage = SUSPENSION_STAGE))]
pub fn suspended_file(grants: &Path, suspended: &Path, output: &Path) -> Result<StageReport> {
    ensure_exists(grants)?;
    ensure_exists(suspended)?;

    let grants_table = read_table(grants, GRANTS_LABEL)?;
    let suspended_table = read_table(suspended, SUSPENDED_LABEL)?;
    let (matched, report) = filter_suspended_tables(&grants_table, &suspended_table)?;
    write_table(output, &matched.to_table(GRANTS_LABEL))?;

    Ok(StageReport::succeeded(
        SUSPENSION_STAGE,
        output,
        matched.len(),
        StageDetails::Suspension(report),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_success_ignores_skipped_stages() {
        let summary = RunSummary {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            completed_at: Utc::now(),
            stages: vec![StageReport::skipped(SUSPENSION_STAGE, "not configured")],
        };
        assert!(summary.success());
        assert_eq!(summary.stage(SUSPENSION_STAGE).unwrap().status, StageStatus::Skipped);
    }

    #[test]
    fn test_failed_stage_carries_error_message() {
        let err = ConsolidatorError::MissingColumns {
            stage: DEDUP_STAGE,
            table: GRANTS_LABEL.to_string(),
            missing: vec!["role".to_string()],
        };
        let report = StageReport::failed(DEDUP_STAGE, &err);
        assert_eq!(report.status, StageStatus::Failed);
        assert_eq!(
            report.message.as_deref(),
            Some("[dedup] table 'grants' is missing required columns: role")
        );
    }

    #[test]
    fn test_required_inputs_include_optional_suspended_file() {
        let mut config = Config::default();
        assert_eq!(Pipeline::new(config.clone()).required_inputs().len(), 6);

        config.inputs.suspended = Some(PathBuf::from("Suspended.csv"));
        let inputs = Pipeline::new(config).required_inputs();
        assert_eq!(inputs.len(), 7);
        assert_eq!(inputs.last().unwrap(), &PathBuf::from(".").join("Suspended.csv"));
    }
}
