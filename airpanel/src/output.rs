//! Writers for the derived artifacts of a run: panels, model summaries,
//! coefficient tables, residual data for external diagnostic plotting, gate
//! diagnostics and the combined run summary. All persistence happens through
//! these functions, once per artifact, at the point the pipeline decides the
//! artifact is final.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::Result;
use itertools::Itertools;
use log::info;
use polars::prelude::*;

use crate::config::Config;
use crate::estimate::FitSummary;
use crate::gate::GateDecision;

/// File that the gate decision is rendered to, written for every lagged
/// attempt regardless of outcome.
pub const GATE_REPORT_FILE: &str = "lag_gate_check.txt";
/// Machine-readable twin of the gate report.
pub const GATE_REPORT_JSON_FILE: &str = "lag_gate_check.json";
/// Combined summary of every model that produced a fit.
pub const RUN_SUMMARY_FILE: &str = "summary_all_models.csv";

pub fn ensure_output_dir(config: &Config) -> Result<PathBuf> {
    let dir = PathBuf::from(&config.output_dir);
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Path a panel with the given file stem is persisted to.
pub fn panel_path(config: &Config, stem: &str) -> PathBuf {
    Path::new(&config.output_dir).join(format!("{stem}.csv"))
}

fn write_df_csv(path: &Path, df: &mut DataFrame) -> Result<()> {
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).finish(df)?;
    Ok(())
}

/// Persist an assembled panel.
pub fn write_panel(config: &Config, stem: &str, df: &mut DataFrame) -> Result<PathBuf> {
    let path = panel_path(config, stem);
    write_df_csv(&path, df)?;
    info!("saved {stem} -> {} rows", df.height());
    Ok(path)
}

/// Persist the gate decision, both as the human-readable report and as JSON.
/// Always called, pass or fail.
pub fn write_gate_report(config: &Config, decision: &GateDecision) -> Result<PathBuf> {
    let dir = Path::new(&config.output_dir);
    let path = dir.join(GATE_REPORT_FILE);
    fs::write(&path, decision.render_report())?;
    fs::write(
        dir.join(GATE_REPORT_JSON_FILE),
        serde_json::to_string_pretty(decision)?,
    )?;
    info!("saved gate diagnostics to {}", path.display());
    Ok(path)
}

/// Persist the per-model artifacts of a fit: human-readable summary,
/// coefficients table, and fitted/residual pairs for external plotting.
pub fn write_fit_outputs(config: &Config, fit: &FitSummary) -> Result<()> {
    let dir = Path::new(&config.output_dir);
    fs::write(dir.join(format!("{}_summary.txt", fit.name)), render_summary(fit))?;

    let mut coefficients = df!(
        "term" => fit.coefficients.iter().map(|c| c.term.clone()).collect_vec(),
        "estimate" => fit.coefficients.iter().map(|c| c.estimate).collect_vec(),
        "std_error" => fit.coefficients.iter().map(|c| c.std_error).collect_vec(),
        "t_stat" => fit.coefficients.iter().map(|c| c.t_stat).collect_vec(),
        "p_value" => fit.coefficients.iter().map(|c| c.p_value).collect_vec(),
        "ci_low" => fit.coefficients.iter().map(|c| c.ci_low).collect_vec(),
        "ci_high" => fit.coefficients.iter().map(|c| c.ci_high).collect_vec(),
    )?;
    write_df_csv(&dir.join(format!("{}_coefficients.csv", fit.name)), &mut coefficients)?;

    let mut residuals = df!(
        "fitted" => fit.fitted.clone(),
        "residual" => fit.residuals.clone(),
    )?;
    write_df_csv(&dir.join(format!("{}_residuals.csv", fit.name)), &mut residuals)?;
    info!("saved model outputs for {}", fit.name);
    Ok(())
}

/// Render the human-readable model summary.
pub fn render_summary(fit: &FitSummary) -> String {
    let mut lines = vec![fit.name.clone(), "=".repeat(60)];
    lines.push(format!("Observations: {}", fit.n_obs));
    if let Some(n_entities) = fit.n_entities {
        lines.push(format!("Entities: {n_entities}"));
    }
    match (fit.r_squared, fit.r_squared_within) {
        (Some(r2), _) => {
            let adj = fit
                .adj_r_squared
                .map(|v| format!("    Adj. R-squared: {v:.4}"))
                .unwrap_or_default();
            lines.push(format!("R-squared: {r2:.4}{adj}"));
        }
        (None, Some(within)) => lines.push(format!("R-squared (within): {within:.4}")),
        (None, None) => {}
    }
    lines.push(String::new());
    lines.push(format!(
        "{:<28} {:>12} {:>12} {:>9} {:>9} {:>11} {:>11}",
        "term", "estimate", "std_error", "t", "P>|t|", "[0.025", "0.975]"
    ));
    lines.push("-".repeat(97));
    for c in &fit.coefficients {
        lines.push(format!(
            "{:<28} {:>12.6} {:>12.6} {:>9.3} {:>9.3} {:>11.6} {:>11.6}",
            c.term, c.estimate, c.std_error, c.t_stat, c.p_value, c.ci_low, c.ci_high
        ));
    }
    lines.join("\n")
}

/// Persist the combined run summary: one row per non-intercept term of every
/// model that produced a fit.
pub fn write_run_summary(config: &Config, fits: &[&FitSummary]) -> Result<PathBuf> {
    let mut model = vec![];
    let mut n_obs = vec![];
    let mut r_squared: Vec<Option<f64>> = vec![];
    let mut adj_r_squared: Vec<Option<f64>> = vec![];
    let mut r_squared_within: Vec<Option<f64>> = vec![];
    let mut term = vec![];
    let mut estimate = vec![];
    let mut std_error = vec![];
    let mut p_value = vec![];

    for fit in fits {
        for c in fit.coefficients.iter().filter(|c| c.term != "const") {
            model.push(fit.name.clone());
            n_obs.push(fit.n_obs as u32);
            r_squared.push(fit.r_squared);
            adj_r_squared.push(fit.adj_r_squared);
            r_squared_within.push(fit.r_squared_within);
            term.push(c.term.clone());
            estimate.push(c.estimate);
            std_error.push(c.std_error);
            p_value.push(c.p_value);
        }
    }

    let mut summary = df!(
        "model" => model,
        "n_obs" => n_obs,
        "r_squared" => r_squared,
        "adj_r_squared" => adj_r_squared,
        "r_squared_within" => r_squared_within,
        "term" => term,
        "estimate" => estimate,
        "std_error" => std_error,
        "p_value" => p_value,
    )?;
    let path = Path::new(&config.output_dir).join(RUN_SUMMARY_FILE);
    write_df_csv(&path, &mut summary)?;
    info!("saved combined summary ({} fitted terms)", summary.height());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimate::fit_ols;

    fn test_fit() -> FitSummary {
        let x: Vec<f64> = (1..=6).map(|v| v as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 + 3.0 * v).collect();
        fit_ols("ModelTest", &y, &x, &["ln_x".to_string()]).unwrap()
    }

    fn test_config(dir: &Path) -> Config {
        Config {
            output_dir: dir.to_string_lossy().to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn summary_text_contains_terms_and_fit_stats() {
        let text = render_summary(&test_fit());
        assert!(text.contains("ModelTest"));
        assert!(text.contains("Observations: 6"));
        assert!(text.contains("const"));
        assert!(text.contains("ln_x"));
        assert!(text.contains("R-squared"));
    }

    #[test]
    fn fit_outputs_should_be_written() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        ensure_output_dir(&config).unwrap();
        write_fit_outputs(&config, &test_fit()).unwrap();

        assert!(dir.path().join("ModelTest_summary.txt").exists());
        assert!(dir.path().join("ModelTest_coefficients.csv").exists());
        assert!(dir.path().join("ModelTest_residuals.csv").exists());

        let coefficients = LazyCsvReader::new(dir.path().join("ModelTest_coefficients.csv"))
            .with_has_header(true)
            .finish()
            .unwrap()
            .collect()
            .unwrap();
        assert_eq!(coefficients.height(), 2);
        assert!(coefficients.get_column_names().contains(&"p_value"));
    }

    #[test]
    fn gate_report_is_written_in_both_renderings() {
        use crate::gate::check_lag_gate;
        use crate::COL;

        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        ensure_output_dir(&config).unwrap();

        let panel = df!(
            COL::ISO3 => &["AAA", "AAA", "AAA", "AAA", "BBB", "BBB", "BBB", "BBB"],
            COL::YEAR => &[2015i32, 2016, 2017, 2018, 2015, 2016, 2017, 2018],
        )
        .unwrap();
        let decision = check_lag_gate(&panel).unwrap();
        write_gate_report(&config, &decision).unwrap();

        let text = std::fs::read_to_string(dir.path().join(GATE_REPORT_FILE)).unwrap();
        assert!(text.contains("Gate criteria:"));

        let json = std::fs::read_to_string(dir.path().join(GATE_REPORT_JSON_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["outcome"], "Estimate");
        assert_eq!(value["criteria"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn run_summary_excludes_intercepts() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        ensure_output_dir(&config).unwrap();
        let fit = test_fit();
        let path = write_run_summary(&config, &[&fit]).unwrap();

        let summary = LazyCsvReader::new(path)
            .with_has_header(true)
            .finish()
            .unwrap()
            .collect()
            .unwrap();
        assert_eq!(summary.height(), 1);
        let term = summary.column("term").unwrap().str().unwrap();
        assert_eq!(term.get(0), Some("ln_x"));
    }
}
