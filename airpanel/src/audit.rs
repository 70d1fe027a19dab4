//! Panel balance diagnostics.
//!
//! Read-only summaries of an assembled panel: how many observations,
//! entities and years it covers, and how observations distribute across
//! entities. Estimation-independent; the lag gate builds on the same
//! per-entity counts.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::Path;

use anyhow::Result;
use polars::prelude::*;
use serde::Serialize;

use crate::COL;

/// Balance summary for one assembled panel.
#[derive(Debug, Clone, Serialize)]
pub struct PanelBalance {
    pub n_obs: usize,
    pub n_countries: usize,
    pub n_years: usize,
    pub year_min: Option<i32>,
    pub year_max: Option<i32>,
    pub median_obs_per_country: f64,
    pub min_obs_per_country: usize,
    pub max_obs_per_country: usize,
}

impl Display for PanelBalance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} observations, {} countries, {} years",
            self.n_obs, self.n_countries, self.n_years
        )?;
        if let (Some(min), Some(max)) = (self.year_min, self.year_max) {
            write!(f, " ({min}-{max})")?;
        }
        write!(
            f,
            ", obs per country median={:.0} min={} max={}",
            self.median_obs_per_country, self.min_obs_per_country, self.max_obs_per_country
        )
    }
}

/// Balance state of a panel that may not have been produced at all.
#[derive(Debug, Clone, Serialize)]
pub enum PanelAudit {
    Available(PanelBalance),
    NotAvailable { reason: String },
}

/// Count observations per entity, in first-appearance order.
pub fn obs_per_entity(df: &DataFrame, key: &str) -> Result<Vec<usize>> {
    let keys = df.column(key)?.str()?;
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order: Vec<&str> = vec![];
    for opt_key in keys.into_iter().flatten() {
        let count = counts.entry(opt_key).or_insert(0);
        if *count == 0 {
            order.push(opt_key);
        }
        *count += 1;
    }
    Ok(order.into_iter().map(|k| counts[k]).collect())
}

/// Median of a set of per-entity counts. Empty input yields 0.
pub fn median_count(counts: &[usize]) -> f64 {
    if counts.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<usize> = counts.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid] as f64
    } else {
        (sorted[mid - 1] + sorted[mid]) as f64 / 2.0
    }
}

/// Compute the balance summary for an assembled panel.
pub fn audit_panel(df: &DataFrame) -> Result<PanelBalance> {
    let counts = obs_per_entity(df, COL::ISO3)?;
    let years = df.column(COL::YEAR)?.i32()?;
    Ok(PanelBalance {
        n_obs: df.height(),
        n_countries: counts.len(),
        n_years: df.column(COL::YEAR)?.n_unique()?,
        year_min: years.min(),
        year_max: years.max(),
        median_obs_per_country: median_count(&counts),
        min_obs_per_country: counts.iter().copied().min().unwrap_or(0),
        max_obs_per_country: counts.iter().copied().max().unwrap_or(0),
    })
}

/// Audit a panel persisted by a previous run.
///
/// A missing file is an explicit not-available state, not an error; a run
/// may legitimately have skipped the panel.
pub fn audit_saved_panel(path: &Path) -> PanelAudit {
    if !path.exists() {
        return PanelAudit::NotAvailable {
            reason: format!("{} not found (run the pipeline first)", path.display()),
        };
    }
    // CSV inference reads the year column back as Int64.
    let loaded = LazyCsvReader::new(path)
        .with_has_header(true)
        .finish()
        .and_then(|lf| {
            lf.with_column(col(COL::YEAR).cast(DataType::Int32))
                .collect()
        });
    match loaded {
        Ok(df) => match audit_panel(&df) {
            Ok(balance) => PanelAudit::Available(balance),
            Err(err) => PanelAudit::NotAvailable {
                reason: format!("{}: {err}", path.display()),
            },
        },
        Err(err) => PanelAudit::NotAvailable {
            reason: format!("{}: {err}", path.display()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panel() -> DataFrame {
        df!(
            COL::ISO3 => &["GRC", "GRC", "GRC", "SWE", "SWE", "DEU"],
            COL::YEAR => &[2015i32, 2016, 2017, 2015, 2016, 2015],
            "ln_pm25" => &[1.0, 1.1, 1.2, 0.9, 0.8, 1.3],
        )
        .unwrap()
    }

    #[test]
    fn audit_reports_counts_and_coverage() {
        let balance = audit_panel(&panel()).unwrap();
        assert_eq!(balance.n_obs, 6);
        assert_eq!(balance.n_countries, 3);
        assert_eq!(balance.n_years, 3);
        assert_eq!(balance.year_min, Some(2015));
        assert_eq!(balance.year_max, Some(2017));
        assert_eq!(balance.median_obs_per_country, 2.0);
        assert_eq!(balance.min_obs_per_country, 1);
        assert_eq!(balance.max_obs_per_country, 3);
    }

    #[test]
    fn audit_does_not_mutate_the_panel() {
        let df = panel();
        let before = df.clone();
        audit_panel(&df).unwrap();
        assert_eq!(df, before);
    }

    #[test]
    fn median_count_handles_even_odd_and_empty() {
        assert_eq!(median_count(&[]), 0.0);
        assert_eq!(median_count(&[4]), 4.0);
        assert_eq!(median_count(&[1, 3]), 2.0);
        assert_eq!(median_count(&[1, 2, 10]), 2.0);
    }

    #[test]
    fn saved_panel_round_trips_through_the_audit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panel_a.csv");
        let mut df = panel();
        let mut file = std::fs::File::create(&path).unwrap();
        CsvWriter::new(&mut file).finish(&mut df).unwrap();

        match audit_saved_panel(&path) {
            PanelAudit::Available(balance) => {
                assert_eq!(balance.n_obs, 6);
                assert_eq!(balance.n_countries, 3);
                assert_eq!(balance.year_max, Some(2017));
            }
            PanelAudit::NotAvailable { reason } => panic!("audit unavailable: {reason}"),
        }
    }

    #[test]
    fn missing_panel_file_reports_not_available() {
        let dir = tempfile::tempdir().unwrap();
        let audit = audit_saved_panel(&dir.path().join("panel_x.csv"));
        match audit {
            PanelAudit::NotAvailable { reason } => {
                assert!(reason.contains("not found"), "reason was: {reason}")
            }
            PanelAudit::Available(_) => panic!("expected NotAvailable"),
        }
    }
}
