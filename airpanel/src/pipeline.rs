//! Sequential pipeline orchestration.
//!
//! Runs the selected model specifications in catalogue order, containing
//! failures per specification: a malformed panel or degenerate design logs
//! an error and the remaining specifications still run. Results accumulate
//! in an explicit record list that is returned to the caller and persisted
//! once at the end; nothing accumulates through ambient state.

use anyhow::Result;
use log::{error, info, warn};

use crate::audit::{audit_panel, PanelBalance};
use crate::config::Config;
use crate::estimate::{extract_design, fit_ols, fit_panel_fe, group_indices, FitSummary};
use crate::gate::{check_lag_gate, GateDecision, GateOutcome};
use crate::ingest::Tables;
use crate::output;
use crate::panel::{assemble, model_catalogue, EstimatorKind, ModelId, ModelSpec, PanelOutcome};
use crate::COL;

/// Terminal outcome of one model specification within a run.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Fitted(FitSummary),
    /// Deliberate non-estimation: too little data, or a gate SKIP.
    Skipped { reason: String },
    /// A contained failure; the rest of the run continued.
    Failed { reason: String },
}

/// Everything the run learned about one model specification.
#[derive(Debug, Clone)]
pub struct ModelRecord {
    pub id: ModelId,
    pub name: String,
    pub outcome: RunOutcome,
    pub balance: Option<PanelBalance>,
    pub gate: Option<GateDecision>,
}

/// Run the pipeline over the selected specifications (all of them when no
/// selection is given). Returns one record per specification attempted.
pub fn run(
    tables: &Tables,
    config: &Config,
    selection: Option<&[ModelId]>,
) -> Result<Vec<ModelRecord>> {
    output::ensure_output_dir(config)?;

    let specs: Vec<ModelSpec> = model_catalogue()
        .into_iter()
        .filter(|spec| selection.map_or(true, |ids| ids.contains(&spec.id)))
        .collect();

    let mut records: Vec<ModelRecord> = Vec::with_capacity(specs.len());
    for spec in &specs {
        info!("running {} ({})", spec.name, spec.title);
        records.push(run_model(spec, tables, config));
    }

    let fitted: Vec<&FitSummary> = records
        .iter()
        .filter_map(|record| match &record.outcome {
            RunOutcome::Fitted(fit) => Some(fit),
            _ => None,
        })
        .collect();
    output::write_run_summary(config, &fitted)?;

    Ok(records)
}

fn run_model(spec: &ModelSpec, tables: &Tables, config: &Config) -> ModelRecord {
    match run_model_inner(spec, tables, config) {
        Ok(record) => record,
        Err(err) => {
            error!("{} failed: {err:#}", spec.name);
            ModelRecord {
                id: spec.id,
                name: spec.name.to_string(),
                outcome: RunOutcome::Failed {
                    reason: format!("{err:#}"),
                },
                balance: None,
                gate: None,
            }
        }
    }
}

fn run_model_inner(spec: &ModelSpec, tables: &Tables, config: &Config) -> Result<ModelRecord> {
    let record = |outcome, balance, gate| ModelRecord {
        id: spec.id,
        name: spec.name.to_string(),
        outcome,
        balance,
        gate,
    };

    let assembled = match assemble(spec, tables, config)? {
        PanelOutcome::Assembled(assembled) => assembled,
        PanelOutcome::Skipped { reason } => {
            warn!("{}: skipped: {reason}", spec.name);
            return Ok(record(RunOutcome::Skipped { reason }, None, None));
        }
    };

    let stats = assembled.stats;
    if stats.n_dropped_log > 0 {
        warn!(
            "{}: {} rows dropped (zero or negative measurements under log transform)",
            spec.name, stats.n_dropped_log
        );
    }
    if stats.n_dropped_missing > 0 {
        info!(
            "{}: {} rows dropped (missing required measurements)",
            spec.name, stats.n_dropped_missing
        );
    }

    let mut df = assembled.df;
    output::write_panel(config, spec.panel_file, &mut df)?;
    let balance = audit_panel(&df)?;
    info!("{}: {balance}", spec.name);

    if stats.n_rows < spec.min_rows {
        let reason = format!(
            "insufficient rows after join/transform: {} < {}",
            stats.n_rows, spec.min_rows
        );
        warn!("{}: skipped: {reason}", spec.name);
        return Ok(record(RunOutcome::Skipped { reason }, Some(balance), None));
    }

    let ln_response = COL::ln(spec.response);
    let ln_regressors: Vec<String> =
        spec.regressors.iter().map(|name| COL::ln(name)).collect();

    match spec.estimator {
        EstimatorKind::Ols => {
            let (y, x) = extract_design(&df, &ln_response, &ln_regressors)?;
            let fit = fit_ols(spec.name, &y, &x, &ln_regressors)?;
            output::write_fit_outputs(config, &fit)?;
            Ok(record(RunOutcome::Fitted(fit), Some(balance), None))
        }
        EstimatorKind::TwoWayFixedEffects => {
            let (entities, _) = group_indices(&df, COL::ISO3)?;
            let (times, _) = group_indices(&df, COL::YEAR)?;
            let (y, x) = extract_design(&df, &ln_response, &ln_regressors)?;
            let fit = fit_panel_fe(spec.name, &entities, Some(&times), &y, &x, &ln_regressors)?;
            output::write_fit_outputs(config, &fit)?;
            Ok(record(RunOutcome::Fitted(fit), Some(balance), None))
        }
        EstimatorKind::LaggedFixedEffects => {
            let decision = check_lag_gate(&df)?;
            output::write_gate_report(config, &decision)?;
            if decision.outcome == GateOutcome::Skip {
                let reason = format!(
                    "lag gate SKIP: {}",
                    decision.reason.as_deref().unwrap_or("criteria not met")
                );
                warn!("{}: {reason}", spec.name);
                return Ok(record(
                    RunOutcome::Skipped { reason },
                    Some(balance),
                    Some(decision),
                ));
            }
            info!("{}: lag gate ESTIMATE", spec.name);

            let lagged = crate::panel::build_lagged_panel(&df, &ln_regressors)?;
            let lag_regressors: Vec<String> =
                ln_regressors.iter().map(|name| COL::lag(name)).collect();
            let (entities, _) = group_indices(&lagged, COL::ISO3)?;
            let (y, x) = extract_design(&lagged, &ln_response, &lag_regressors)?;
            let fit = fit_panel_fe(spec.name, &entities, None, &y, &x, &lag_regressors)?;
            output::write_fit_outputs(config, &fit)?;
            Ok(record(
                RunOutcome::Fitted(fit),
                Some(balance),
                Some(decision),
            ))
        }
    }
}
