//! Model specifications and panel assembly.
//!
//! A model specification pairs two harmonized tables, names the response and
//! regressor measurements, and fixes the join strategy, estimator kind and
//! minimum sample size. The assembler turns a specification into a
//! regression-ready panel: join, log-transform, convert non-finite results
//! to missing, and drop incomplete rows, reporting how many rows each step
//! cost.

use anyhow::Result;
use log::debug;
use nonempty::{nonempty, NonEmpty};
use polars::prelude::*;
use serde::Serialize;
use strum_macros::{Display, EnumString};

use crate::config::Config;
use crate::ingest::Tables;
use crate::join::nearest_year_join;
use crate::COL;

/// Stable model identifiers, used for CLI selection and output naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, Serialize)]
#[strum(ascii_case_insensitive)]
pub enum ModelId {
    A,
    B,
    C,
    D,
    E,
    #[strum(to_string = "E-lag", serialize = "e-lag", serialize = "elag")]
    ELag,
    F,
}

/// Which harmonized table a specification side draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Dataset {
    AirQuality,
    EmissionsTotals,
    EmissionsSectoral,
    HealthBurden,
    Mortality,
}

impl Dataset {
    pub fn table<'a>(&self, tables: &'a Tables) -> &'a DataFrame {
        match self {
            Dataset::AirQuality => &tables.air_quality,
            Dataset::EmissionsTotals => &tables.emissions_totals,
            Dataset::EmissionsSectoral => &tables.emissions_sectoral,
            Dataset::HealthBurden => &tables.health_burden,
            Dataset::Mortality => &tables.mortality,
        }
    }
}

/// How the two sides of a specification are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JoinStrategy {
    /// Inner join on (canonical id, year); both datasets report the same
    /// year granularity.
    ExactYear,
    /// Nearest-year join within the configured tolerance window; the
    /// datasets are snapshots from misaligned years.
    NearestYear,
}

/// Which estimator the pipeline hands the finished panel to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EstimatorKind {
    Ols,
    TwoWayFixedEffects,
    /// One-period-lagged fixed effects; only runs when the lag gate clears.
    LaggedFixedEffects,
}

/// A full model specification.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub id: ModelId,
    pub name: &'static str,
    pub title: &'static str,
    pub left: Dataset,
    pub right: Dataset,
    pub response: &'static str,
    pub regressors: NonEmpty<&'static str>,
    pub join: JoinStrategy,
    pub estimator: EstimatorKind,
    pub min_rows: usize,
    /// Case-insensitive substring filter on the raw country name, applied
    /// before transformation (country-subset models).
    pub country_pattern: Option<&'static str>,
    pub panel_file: &'static str,
}

impl ModelSpec {
    /// Response plus regressors, in reporting order.
    pub fn required_measurements(&self) -> Vec<&'static str> {
        let mut columns = vec![self.response];
        columns.extend(self.regressors.iter());
        columns
    }
}

/// The full model catalogue, in run order.
pub fn model_catalogue() -> Vec<ModelSpec> {
    vec![
        ModelSpec {
            id: ModelId::A,
            name: "ModelA_Emissions_PM25",
            title: "Total emissions -> PM2.5",
            left: Dataset::AirQuality,
            right: Dataset::EmissionsTotals,
            response: COL::PM25,
            regressors: nonempty![COL::TOTAL_EMISSIONS],
            join: JoinStrategy::ExactYear,
            estimator: EstimatorKind::Ols,
            min_rows: 10,
            country_pattern: None,
            panel_file: "panel_a",
        },
        ModelSpec {
            id: ModelId::B,
            name: "ModelB_PM25_DALY",
            title: "PM2.5 -> health burden (DALY)",
            left: Dataset::AirQuality,
            right: Dataset::HealthBurden,
            response: COL::DALY,
            regressors: nonempty![COL::PM25],
            join: JoinStrategy::NearestYear,
            estimator: EstimatorKind::Ols,
            min_rows: 10,
            country_pattern: None,
            panel_file: "panel_b_health",
        },
        ModelSpec {
            id: ModelId::C,
            name: "ModelC_Sectoral_PM25",
            title: "Sectoral emissions -> PM2.5",
            left: Dataset::AirQuality,
            right: Dataset::EmissionsSectoral,
            response: COL::PM25,
            regressors: nonempty![
                COL::ENERGY_EMISSIONS,
                COL::INDUSTRY_EMISSIONS,
                COL::TRANSPORT_EMISSIONS
            ],
            join: JoinStrategy::ExactYear,
            estimator: EstimatorKind::Ols,
            min_rows: 10,
            country_pattern: None,
            panel_file: "panel_c_sectoral",
        },
        ModelSpec {
            id: ModelId::D,
            name: "ModelD_PM25_YLL",
            title: "PM2.5 -> mortality burden (YLL)",
            left: Dataset::AirQuality,
            right: Dataset::Mortality,
            response: COL::YLL_ASMR,
            regressors: nonempty![COL::PM25],
            join: JoinStrategy::NearestYear,
            estimator: EstimatorKind::Ols,
            min_rows: 10,
            country_pattern: None,
            panel_file: "panel_d_mortality",
        },
        ModelSpec {
            id: ModelId::E,
            name: "ModelE_TwoWayFE",
            title: "Total emissions -> PM2.5, two-way fixed effects",
            left: Dataset::AirQuality,
            right: Dataset::EmissionsTotals,
            response: COL::PM25,
            regressors: nonempty![COL::TOTAL_EMISSIONS],
            join: JoinStrategy::ExactYear,
            estimator: EstimatorKind::TwoWayFixedEffects,
            min_rows: 30,
            country_pattern: None,
            panel_file: "panel_e_fe",
        },
        ModelSpec {
            id: ModelId::ELag,
            name: "ModelELag_Sectoral_PM25",
            title: "Lagged sectoral emissions -> PM2.5, fixed effects",
            left: Dataset::AirQuality,
            right: Dataset::EmissionsSectoral,
            response: COL::PM25,
            regressors: nonempty![
                COL::ENERGY_EMISSIONS,
                COL::INDUSTRY_EMISSIONS,
                COL::TRANSPORT_EMISSIONS
            ],
            join: JoinStrategy::ExactYear,
            estimator: EstimatorKind::LaggedFixedEffects,
            min_rows: 30,
            country_pattern: None,
            panel_file: "panel_e_lag",
        },
        ModelSpec {
            id: ModelId::F,
            name: "ModelF_Greece_Emissions_PM25",
            title: "Total emissions -> PM2.5, Greece subset",
            left: Dataset::AirQuality,
            right: Dataset::EmissionsTotals,
            response: COL::PM25,
            regressors: nonempty![COL::TOTAL_EMISSIONS],
            join: JoinStrategy::ExactYear,
            estimator: EstimatorKind::Ols,
            min_rows: 3,
            country_pattern: Some("greece"),
            panel_file: "panel_f_greece",
        },
    ]
}

/// Row accounting for one assembled panel.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PanelStats {
    /// Rows produced by the join, before transformation.
    pub n_rows_joined: usize,
    /// Rows in the finished panel.
    pub n_rows: usize,
    /// Rows lost because a zero or negative measurement produced a
    /// non-finite logarithm.
    pub n_dropped_log: usize,
    /// Rows lost to missing raw measurements.
    pub n_dropped_missing: usize,
    pub n_countries: usize,
    pub n_years: usize,
}

/// A finished panel plus its row accounting.
#[derive(Debug, Clone)]
pub struct AssembledPanel {
    pub df: DataFrame,
    pub stats: PanelStats,
}

/// Outcome of one assembly attempt. Skipping is a value, not an error: the
/// orchestrator decides what a skip means for the run.
#[derive(Debug, Clone)]
pub enum PanelOutcome {
    Assembled(AssembledPanel),
    Skipped { reason: String },
}

/// Assemble the panel for one model specification.
pub fn assemble(spec: &ModelSpec, tables: &Tables, config: &Config) -> Result<PanelOutcome> {
    let left = spec.left.table(tables);
    let right = spec.right.table(tables);

    let joined = match spec.join {
        JoinStrategy::ExactYear => {
            let joined = left.join(
                right,
                vec![COL::ISO3, COL::YEAR],
                vec![COL::ISO3, COL::YEAR],
                JoinArgs::new(JoinType::Inner),
            )?;
            // The raw name travels on both sides; keep the left one.
            match joined.get_column_names().contains(&"country_right") {
                true => joined.drop("country_right")?,
                false => joined,
            }
        }
        JoinStrategy::NearestYear => nearest_year_join(
            left,
            right,
            COL::ISO3,
            COL::YEAR,
            COL::YEAR,
            config.year_tolerance,
        )?,
    };

    let joined = match spec.country_pattern {
        Some(pattern) => joined
            .lazy()
            .filter(
                col(COL::COUNTRY)
                    .str()
                    .contains(lit(format!("(?i){}", regex::escape(pattern))), false),
            )
            .collect()?,
        None => joined,
    };

    if joined.height() == 0 {
        return Ok(PanelOutcome::Skipped {
            reason: format!(
                "no overlapping country-years between {:?} and {:?}",
                spec.left, spec.right
            ),
        });
    }

    let (panel, n_dropped_log, n_dropped_missing) =
        log_transform_and_drop(joined, &spec.required_measurements())?;

    let stats = PanelStats {
        n_rows_joined: panel.height() + n_dropped_log + n_dropped_missing,
        n_rows: panel.height(),
        n_dropped_log,
        n_dropped_missing,
        n_countries: panel.column(COL::ISO3)?.n_unique()?,
        n_years: panel.column(COL::YEAR)?.n_unique()?,
    };
    debug!("{}: assembled {:?}", spec.name, stats);

    Ok(PanelOutcome::Assembled(AssembledPanel { df: panel, stats }))
}

/// Apply the log transform to every required measurement, convert
/// non-finite results (zero or negative inputs) to missing, and drop rows
/// with any missing required field. Returns the panel plus the number of
/// rows lost to the log step and to already-missing measurements.
fn log_transform_and_drop(
    joined: DataFrame,
    measurements: &[&str],
) -> Result<(DataFrame, usize, usize)> {
    let height = joined.height();
    let mut lost_to_log = vec![false; height];
    let mut lost_to_missing = vec![false; height];
    let mut ln_columns: Vec<Series> = Vec::with_capacity(measurements.len());

    for &measurement in measurements {
        let raw = joined.column(measurement)?.f64()?;
        let mut ln_values: Vec<Option<f64>> = Vec::with_capacity(height);
        for (row, opt) in raw.into_iter().enumerate() {
            match opt {
                Some(value) => {
                    let ln = value.ln();
                    if ln.is_finite() {
                        ln_values.push(Some(ln));
                    } else {
                        lost_to_log[row] = true;
                        ln_values.push(None);
                    }
                }
                None => {
                    lost_to_missing[row] = true;
                    ln_values.push(None);
                }
            }
        }
        ln_columns.push(Series::new(&COL::ln(measurement), ln_values));
    }

    let mut panel = joined;
    for series in ln_columns {
        panel.with_column(series)?;
    }
    let keep: Vec<bool> = (0..height)
        .map(|row| !lost_to_log[row] && !lost_to_missing[row])
        .collect();
    let mask = Series::new("keep", keep);
    let panel = panel.filter(mask.bool()?)?;

    // A row can lose fields to both causes; attribute it to the log step so
    // zero/negative measurements are never silently folded into "missing".
    let n_dropped_log = lost_to_log.iter().filter(|&&lost| lost).count();
    let n_dropped_missing = lost_to_missing
        .iter()
        .zip(&lost_to_log)
        .filter(|(&missing, &log)| missing && !log)
        .count();
    Ok((panel, n_dropped_log, n_dropped_missing))
}

/// Derive the one-period-lagged panel: sort by (entity, year), and for every
/// row with a predecessor in the same entity attach `<col>_lag1` columns
/// holding the predecessor's values. First rows per entity are dropped.
pub fn build_lagged_panel(panel: &DataFrame, lag_columns: &[String]) -> Result<DataFrame> {
    let sorted = panel.sort([COL::ISO3, COL::YEAR], SortMultipleOptions::default())?;
    let keys = sorted.column(COL::ISO3)?.str()?;

    let mut kept: Vec<IdxSize> = vec![];
    for row in 1..sorted.height() {
        if keys.get(row) == keys.get(row - 1) && keys.get(row).is_some() {
            kept.push(row as IdxSize);
        }
    }

    let mut lag_series: Vec<Series> = Vec::with_capacity(lag_columns.len());
    for name in lag_columns {
        let values = sorted.column(name)?.f64()?;
        let lagged: Vec<Option<f64>> = kept
            .iter()
            .map(|&row| values.get(row as usize - 1))
            .collect();
        lag_series.push(Series::new(&COL::lag(name), lagged));
    }

    let mut lagged_panel = sorted.take(&IdxCa::from_vec("idx", kept))?;
    for series in lag_series {
        lagged_panel.with_column(series)?;
    }
    Ok(lagged_panel)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_tables() -> Tables {
        let air_quality = df!(
            COL::COUNTRY => &["Greece", "Greece", "Sweden", "Sweden"],
            COL::YEAR => &[2015i32, 2016, 2015, 2016],
            COL::PM25 => &[10.0, 12.0, 8.0, 0.0],
            COL::ISO3 => &["GRC", "GRC", "SWE", "SWE"],
        )
        .unwrap();
        let emissions_totals = df!(
            COL::COUNTRY => &["Greece", "Greece", "Sweden", "Sweden"],
            COL::YEAR => &[2015i32, 2016, 2015, 2016],
            COL::TOTAL_EMISSIONS => &[100.0, 110.0, 50.0, 55.0],
            COL::ISO3 => &["GRC", "GRC", "SWE", "SWE"],
        )
        .unwrap();
        let emissions_sectoral = df!(
            COL::COUNTRY => &["Greece"],
            COL::YEAR => &[2015i32],
            COL::ENERGY_EMISSIONS => &[60.0],
            COL::INDUSTRY_EMISSIONS => &[25.0],
            COL::TRANSPORT_EMISSIONS => &[15.0],
            COL::ISO3 => &["GRC"],
        )
        .unwrap();
        let health_burden = df!(
            COL::COUNTRY => &["Greece"],
            COL::YEAR => &[2017i32],
            COL::DALY => &[1200.0],
            COL::ISO3 => &["GRC"],
        )
        .unwrap();
        let mortality = df!(
            COL::COUNTRY => &["Greece"],
            COL::YEAR => &[2030i32],
            COL::YLL_ASMR => &[900.0],
            COL::ISO3 => &["GRC"],
        )
        .unwrap();
        Tables {
            air_quality,
            emissions_totals,
            emissions_sectoral,
            health_burden,
            mortality,
        }
    }

    fn spec(id: ModelId) -> ModelSpec {
        model_catalogue()
            .into_iter()
            .find(|spec| spec.id == id)
            .unwrap()
    }

    #[test]
    fn exact_join_panel_has_finite_transforms_and_counts_log_losses() {
        let tables = test_tables();
        let outcome = assemble(&spec(ModelId::A), &tables, &Config::default()).unwrap();
        let PanelOutcome::Assembled(panel) = outcome else {
            panic!("expected an assembled panel")
        };
        // Sweden@2016 has pm25 = 0: ln is -inf, so the row must be dropped
        // and counted, not kept with a non-finite value.
        assert_eq!(panel.stats.n_rows_joined, 4);
        assert_eq!(panel.stats.n_rows, 3);
        assert_eq!(panel.stats.n_dropped_log, 1);
        assert_eq!(panel.stats.n_dropped_missing, 0);
        let ln_pm25 = panel.df.column(&COL::ln(COL::PM25)).unwrap().f64().unwrap();
        assert!(ln_pm25.into_iter().all(|v| v.is_some_and(f64::is_finite)));
    }

    #[test]
    fn nearest_join_panel_matches_within_tolerance_only() {
        let tables = test_tables();
        // Health burden is at 2017: within +-3 of 2015 and 2016 (GRC only).
        let outcome = assemble(&spec(ModelId::B), &tables, &Config::default()).unwrap();
        let PanelOutcome::Assembled(panel) = outcome else {
            panic!("expected an assembled panel")
        };
        assert_eq!(panel.stats.n_rows, 2);
        assert!(panel
            .df
            .get_column_names()
            .contains(&COL::YEAR_MATCHED));

        // Mortality sits at 2030, outside every window: model D joins empty.
        let outcome = assemble(&spec(ModelId::D), &tables, &Config::default()).unwrap();
        match outcome {
            PanelOutcome::Skipped { reason } => {
                assert!(reason.contains("no overlapping"), "reason was: {reason}")
            }
            PanelOutcome::Assembled(_) => panic!("expected a skip"),
        }
    }

    #[test]
    fn country_pattern_restricts_the_panel() {
        let tables = test_tables();
        let outcome = assemble(&spec(ModelId::F), &tables, &Config::default()).unwrap();
        let PanelOutcome::Assembled(panel) = outcome else {
            panic!("expected an assembled panel")
        };
        let iso3 = panel.df.column(COL::ISO3).unwrap().str().unwrap();
        assert!(iso3.into_iter().all(|v| v == Some("GRC")));
    }

    #[test]
    fn missing_sector_rows_are_counted_as_missing_not_log_losses() {
        let mut tables = test_tables();
        tables.emissions_sectoral = df!(
            COL::COUNTRY => &["Greece", "Greece"],
            COL::YEAR => &[2015i32, 2016],
            COL::ENERGY_EMISSIONS => &[Some(60.0), Some(70.0)],
            COL::INDUSTRY_EMISSIONS => &[Some(25.0), None],
            COL::TRANSPORT_EMISSIONS => &[Some(15.0), Some(16.0)],
            COL::ISO3 => &["GRC", "GRC"],
        )
        .unwrap();
        let outcome = assemble(&spec(ModelId::C), &tables, &Config::default()).unwrap();
        let PanelOutcome::Assembled(panel) = outcome else {
            panic!("expected an assembled panel")
        };
        assert_eq!(panel.stats.n_rows, 1);
        assert_eq!(panel.stats.n_dropped_missing, 1);
        assert_eq!(panel.stats.n_dropped_log, 0);
    }

    #[test]
    fn lagged_panel_shifts_values_within_entities() {
        let panel = df!(
            COL::ISO3 => &["GRC", "GRC", "GRC", "SWE", "SWE"],
            COL::YEAR => &[2015i32, 2016, 2017, 2015, 2016],
            "ln_x" => &[1.0, 2.0, 3.0, 10.0, 20.0],
        )
        .unwrap();
        let lagged = build_lagged_panel(&panel, &["ln_x".to_string()]).unwrap();
        // First row per entity is gone.
        assert_eq!(lagged.height(), 3);
        let lag = lagged.column(&COL::lag("ln_x")).unwrap().f64().unwrap();
        let current = lagged.column("ln_x").unwrap().f64().unwrap();
        assert_eq!(current.get(0), Some(2.0));
        assert_eq!(lag.get(0), Some(1.0));
        assert_eq!(current.get(1), Some(3.0));
        assert_eq!(lag.get(1), Some(2.0));
        assert_eq!(current.get(2), Some(20.0));
        assert_eq!(lag.get(2), Some(10.0));
    }

    #[test]
    fn model_ids_parse_case_insensitively() {
        assert_eq!("a".parse::<ModelId>().unwrap(), ModelId::A);
        assert_eq!("E-LAG".parse::<ModelId>().unwrap(), ModelId::ELag);
        assert_eq!("elag".parse::<ModelId>().unwrap(), ModelId::ELag);
        assert!("z".parse::<ModelId>().is_err());
    }
}
