//! Go/no-go gating for temporally-lagged specifications.
//!
//! Lagging a panel by one period silently discards every entity's first
//! observation, and on a sparse panel that can hollow out the sample enough
//! to make the estimate meaningless. The gate simulates the lag, measures
//! what would be lost, and only clears estimation when the retained panel
//! still has enough structure. A SKIP is a valid terminal outcome and the
//! full decision is always persisted for audit.

use std::collections::HashSet;
use std::fmt::Display;

use anyhow::Result;
use polars::prelude::*;
use serde::Serialize;

use crate::audit::{median_count, obs_per_entity};
use crate::error::AirpanelError;
use crate::COL;

pub const MIN_MEDIAN_OBS: f64 = 3.0;
pub const MAX_SAMPLE_LOSS: f64 = 0.30;
pub const MIN_ENTITY_RETENTION: f64 = 0.67;

/// One named gate criterion with its observed value and threshold.
#[derive(Debug, Clone, Serialize)]
pub struct GateCriterion {
    pub name: &'static str,
    pub value: f64,
    pub threshold: f64,
    pub passed: bool,
}

/// Panel shape before or after the simulated lag.
#[derive(Debug, Clone, Serialize)]
pub struct GateStats {
    pub n_obs: usize,
    pub n_entities: usize,
    pub median_obs_per_entity: f64,
}

/// Terminal outcome of one gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GateOutcome {
    Estimate,
    Skip,
}

impl Display for GateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateOutcome::Estimate => write!(f, "ESTIMATE"),
            GateOutcome::Skip => write!(f, "SKIP"),
        }
    }
}

/// Immutable record of one gate decision.
#[derive(Debug, Clone, Serialize)]
pub struct GateDecision {
    pub baseline: GateStats,
    pub retained: GateStats,
    pub sample_loss: f64,
    pub entity_retention: f64,
    pub criteria: Vec<GateCriterion>,
    pub outcome: GateOutcome,
    pub reason: Option<String>,
}

impl GateDecision {
    /// Render the decision as the structured diagnostics report that is
    /// written to disk regardless of outcome.
    pub fn render_report(&self) -> String {
        let mut lines = vec![
            "Lagged specification gate diagnostics".to_string(),
            "=".repeat(40),
            String::new(),
            "Baseline panel:".to_string(),
            format!("- Observations: N = {}", self.baseline.n_obs),
            format!("- Countries: {}", self.baseline.n_entities),
            format!(
                "- Median obs per country: {:.0}",
                self.baseline.median_obs_per_entity
            ),
            String::new(),
            "After lagging (t-1):".to_string(),
            format!("- Observations retained: {}", self.retained.n_obs),
            format!("- Countries retained: {}", self.retained.n_entities),
            format!(
                "- Median obs per country: {:.0}",
                self.retained.median_obs_per_entity
            ),
            format!("- Sample loss: {:.1}%", self.sample_loss * 100.0),
            format!("- Country retention: {:.1}%", self.entity_retention * 100.0),
            String::new(),
            "Gate criteria:".to_string(),
        ];
        for criterion in &self.criteria {
            lines.push(format!(
                "- {}: {} (value {:.3}, threshold {:.3})",
                criterion.name,
                if criterion.passed { "PASS" } else { "FAIL" },
                criterion.value,
                criterion.threshold
            ));
        }
        lines.push(String::new());
        lines.push("Decision:".to_string());
        match &self.reason {
            None => lines.push(format!("-> {}", self.outcome)),
            Some(reason) => lines.push(format!("-> {} ({reason})", self.outcome)),
        }
        lines.join("\n")
    }
}

/// Decide whether a panel can support a one-period-lagged specification.
///
/// Simulates the lag (each entity's first chronological row has no
/// predecessor and is discarded), measures sample loss and entity retention,
/// and evaluates the three gate criteria. Missing join-key or time columns
/// are a precondition violation, not a degraded computation.
pub fn check_lag_gate(panel: &DataFrame) -> Result<GateDecision> {
    for required in [COL::ISO3, COL::YEAR] {
        if !panel.get_column_names().contains(&required) {
            return Err(AirpanelError::MissingColumn(
                required.to_string(),
                "lag-gate input panel".to_string(),
            )
            .into());
        }
    }

    let baseline_counts = obs_per_entity(panel, COL::ISO3)?;
    let baseline = GateStats {
        n_obs: panel.height(),
        n_entities: baseline_counts.len(),
        median_obs_per_entity: median_count(&baseline_counts),
    };

    let lagged = retain_lag_valid(panel)?;
    let retained_counts = obs_per_entity(&lagged, COL::ISO3)?;
    let retained = GateStats {
        n_obs: lagged.height(),
        n_entities: retained_counts.len(),
        median_obs_per_entity: median_count(&retained_counts),
    };

    let sample_loss = if baseline.n_obs > 0 {
        (baseline.n_obs - retained.n_obs) as f64 / baseline.n_obs as f64
    } else {
        1.0
    };
    let entity_retention = if baseline.n_entities > 0 {
        retained.n_entities as f64 / baseline.n_entities as f64
    } else {
        0.0
    };

    let criteria = vec![
        GateCriterion {
            name: "median obs per country >= 3",
            value: baseline.median_obs_per_entity,
            threshold: MIN_MEDIAN_OBS,
            passed: baseline.median_obs_per_entity >= MIN_MEDIAN_OBS,
        },
        GateCriterion {
            name: "sample loss <= 30%",
            value: sample_loss,
            threshold: MAX_SAMPLE_LOSS,
            passed: sample_loss <= MAX_SAMPLE_LOSS,
        },
        GateCriterion {
            name: "country retention >= 67%",
            value: entity_retention,
            threshold: MIN_ENTITY_RETENTION,
            passed: entity_retention >= MIN_ENTITY_RETENTION,
        },
    ];

    let failing: Vec<&str> = criteria
        .iter()
        .filter(|criterion| !criterion.passed)
        .map(|criterion| criterion.name)
        .collect();
    let (outcome, reason) = if failing.is_empty() {
        (GateOutcome::Estimate, None)
    } else {
        (GateOutcome::Skip, Some(failing.join("; ")))
    };

    Ok(GateDecision {
        baseline,
        retained,
        sample_loss,
        entity_retention,
        criteria,
        outcome,
        reason,
    })
}

/// Drop each entity's first chronological row, keeping only rows that would
/// have a one-period lag available.
pub fn retain_lag_valid(panel: &DataFrame) -> Result<DataFrame> {
    let sorted = panel.sort([COL::ISO3, COL::YEAR], SortMultipleOptions::default())?;
    let keys = sorted.column(COL::ISO3)?.str()?;
    let mut seen: HashSet<&str> = HashSet::new();
    let mut lag_valid: Vec<bool> = Vec::with_capacity(sorted.height());
    for opt_key in keys.into_iter() {
        match opt_key {
            Some(key) => lag_valid.push(!seen.insert(key)),
            None => lag_valid.push(false),
        }
    }
    let mask = Series::new("lag_valid", lag_valid);
    Ok(sorted.filter(mask.bool()?)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balanced_panel() -> DataFrame {
        // 5 entities x 4 years, no missing cells.
        let mut iso3 = vec![];
        let mut year = vec![];
        let mut value = vec![];
        for entity in ["AAA", "BBB", "CCC", "DDD", "EEE"] {
            for y in 2015i32..2019 {
                iso3.push(entity);
                year.push(y);
                value.push(1.0);
            }
        }
        df!(COL::ISO3 => iso3, COL::YEAR => year, "ln_pm25" => value).unwrap()
    }

    #[test]
    fn balanced_panel_clears_the_gate() {
        let decision = check_lag_gate(&balanced_panel()).unwrap();
        assert_eq!(decision.baseline.n_obs, 20);
        // Exactly one row lost per entity.
        assert_eq!(decision.retained.n_obs, 15);
        assert_eq!(decision.sample_loss, 0.25);
        assert_eq!(decision.entity_retention, 1.0);
        assert_eq!(decision.baseline.median_obs_per_entity, 4.0);
        assert_eq!(decision.outcome, GateOutcome::Estimate);
        assert!(decision.reason.is_none());
        assert!(decision.criteria.iter().all(|criterion| criterion.passed));
    }

    #[test]
    fn singleton_heavy_panel_is_skipped_on_median() {
        // 2 of 5 entities have a single observation; median obs = 2 < 3.
        let iso3 = vec![
            "AAA", "AAA", "BBB", "BBB", "CCC", "CCC", "DDD", "EEE",
        ];
        let year = vec![2015i32, 2016, 2015, 2016, 2015, 2016, 2015, 2015];
        let value = vec![1.0; 8];
        let panel = df!(COL::ISO3 => iso3, COL::YEAR => year, "ln_pm25" => value).unwrap();

        let decision = check_lag_gate(&panel).unwrap();
        assert_eq!(decision.outcome, GateOutcome::Skip);
        assert!(!decision.criteria[0].passed, "median criterion must fail");
        let reason = decision.reason.unwrap();
        assert!(reason.contains("median obs per country"), "reason was: {reason}");
    }

    #[test]
    fn heavy_attrition_is_skipped_on_sample_loss() {
        // Two-observation entities lose half their rows to the lag.
        let iso3 = vec!["AAA", "AAA", "AAA", "BBB", "BBB", "CCC", "CCC"];
        let year = vec![2015i32, 2016, 2017, 2015, 2016, 2015, 2016];
        let value = vec![1.0; 7];
        let panel = df!(COL::ISO3 => iso3, COL::YEAR => year, "ln_pm25" => value).unwrap();

        let decision = check_lag_gate(&panel).unwrap();
        // 3 of 7 rows lost: 42.9% > 30%.
        assert!(decision.sample_loss > MAX_SAMPLE_LOSS);
        assert_eq!(decision.outcome, GateOutcome::Skip);
    }

    #[test]
    fn missing_columns_are_a_precondition_violation() {
        let panel = df!("x" => &[1.0, 2.0]).unwrap();
        let err = check_lag_gate(&panel).unwrap_err();
        assert!(err.to_string().contains("iso3"), "error was: {err}");
    }

    #[test]
    fn empty_panel_is_skipped() {
        let panel = df!(
            COL::ISO3 => Vec::<&str>::new(),
            COL::YEAR => Vec::<i32>::new(),
        )
        .unwrap();
        let decision = check_lag_gate(&panel).unwrap();
        assert_eq!(decision.outcome, GateOutcome::Skip);
        assert_eq!(decision.sample_loss, 1.0);
        assert_eq!(decision.entity_retention, 0.0);
    }

    #[test]
    fn report_contains_all_criteria_and_decision() {
        let decision = check_lag_gate(&balanced_panel()).unwrap();
        let report = decision.render_report();
        assert!(report.contains("median obs per country >= 3: PASS"));
        assert!(report.contains("sample loss <= 30%: PASS"));
        assert!(report.contains("country retention >= 67%: PASS"));
        assert!(report.contains("-> ESTIMATE"));

        let skipped = check_lag_gate(
            &df!(
                COL::ISO3 => &["AAA", "BBB"],
                COL::YEAR => &[2015i32, 2015],
            )
            .unwrap(),
        )
        .unwrap();
        let report = skipped.render_report();
        assert!(report.contains("FAIL"));
        assert!(report.contains("-> SKIP"));
    }
}
