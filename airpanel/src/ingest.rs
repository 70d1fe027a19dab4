//! Loading and harmonization of the raw input datasets.
//!
//! Each loader maps publisher-specific headers onto the canonical column
//! names, aggregates to one row per country-year, attaches the canonical
//! identifier, and drops rows that cannot participate in joins. The loaders
//! deliberately keep measurement nulls that later stages are responsible for
//! (e.g. a country-year missing one emissions sector survives ingestion).

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Result;
use log::info;
use polars::prelude::*;
use regex::Regex;

use crate::config::Config;
use crate::resolve::attach_canonical_id;
use crate::COL;

/// This module contains the names of the files that hold the raw datasets.
pub mod paths {
    pub const AIR_QUALITY: &str = "who_air_quality.csv";
    pub const EMISSIONS: &str = "unfccc_totals.csv";
    pub const HEALTH_BURDEN: &str = "eea_burden_disease.csv";
    pub const MORTALITY: &str = "health_gbd2021_yll_bothsex_asmr.csv";
}
use paths as PATHS;

// Raw source headers.
const AIR_COUNTRY: &str = "WHO Country Name";
const AIR_YEAR: &str = "Measurement Year";
const AIR_PM25: &str = "PM2.5 (μg/m3)";

const EMISSIONS_COUNTRY: &str = "Country";
const EMISSIONS_YEAR: &str = "Year";
const EMISSIONS_SECTOR: &str = "Sector_name";
const EMISSIONS_VALUE: &str = "emissions";

const BURDEN_COUNTRY: &str = "Country Or Territory";
const BURDEN_YEAR: &str = "Year";
const BURDEN_URBANISATION: &str = "Degree Of Urbanisation";
const BURDEN_POLLUTANT: &str = "Air Pollutant";
const BURDEN_INDICATOR: &str = "Health Indicator";
const BURDEN_VALUE: &str = "Value";

const MORTALITY_COUNTRY: &str = "location_name";

// Sector labels in the emissions dataset.
const SECTOR_TOTAL: &str = "Total emissions (UNFCCC)";
const SECTOR_ENERGY: &str = "1.A.1 - Energy Industries";
const SECTOR_INDUSTRY: &str = "1.A.2 - Manufacturing Industries and Construction";
const SECTOR_TRANSPORT: &str = "1.A.3 - Transport";

const URBANISATION_ALL: &str = "All Areas (incl.unclassified)";
const POLLUTANT_PM25: &str = "PM2.5";
const INDICATOR_DALY: &str = "Disability-Adjusted Life Years (DALY)";

/// The harmonized country-year tables for one pipeline run.
#[derive(Debug)]
pub struct Tables {
    pub air_quality: DataFrame,
    pub emissions_totals: DataFrame,
    pub emissions_sectoral: DataFrame,
    pub health_burden: DataFrame,
    pub mortality: DataFrame,
}

/// Load every input dataset from the configured data directory.
pub fn load_all(config: &Config) -> Result<Tables> {
    let data_dir = Path::new(&config.data_dir);
    let air_quality = load_air_quality(data_dir)?;
    let emissions_totals = load_emissions_totals(data_dir)?;
    let emissions_sectoral = load_emissions_sectoral(data_dir)?;
    let health_burden = load_health_burden(data_dir)?;
    let mortality = load_mortality(data_dir)?;
    info!(
        "loaded tables: air_quality={} emissions_totals={} emissions_sectoral={} \
         health_burden={} mortality={} rows",
        air_quality.height(),
        emissions_totals.height(),
        emissions_sectoral.height(),
        health_burden.height(),
        mortality.height()
    );
    Ok(Tables {
        air_quality,
        emissions_totals,
        emissions_sectoral,
        health_burden,
        mortality,
    })
}

fn read_csv(path: PathBuf) -> Result<LazyFrame> {
    Ok(LazyCsvReader::new(path).with_has_header(true).finish()?)
}

fn sorted(df: DataFrame) -> Result<DataFrame> {
    // Keeps right-table row order (and hence tolerance-join tie-breaks)
    // independent of the grouping implementation.
    Ok(df.sort([COL::COUNTRY, COL::YEAR], SortMultipleOptions::default())?)
}

/// City-level air quality measurements, aggregated to country-year means.
pub fn load_air_quality(data_dir: &Path) -> Result<DataFrame> {
    air_quality_from(read_csv(data_dir.join(PATHS::AIR_QUALITY))?)
}

fn air_quality_from(lf: LazyFrame) -> Result<DataFrame> {
    let df = lf
        .select([
            col(AIR_COUNTRY).alias(COL::COUNTRY),
            col(AIR_YEAR).cast(DataType::Int32).alias(COL::YEAR),
            col(AIR_PM25).cast(DataType::Float64).alias(COL::PM25),
        ])
        .group_by([col(COL::COUNTRY), col(COL::YEAR)])
        .agg([col(COL::PM25).mean()])
        .collect()?;
    let df = attach_canonical_id(df)?
        .lazy()
        .drop_nulls(Some(vec![col(COL::ISO3), col(COL::PM25)]))
        .collect()?;
    sorted(df)
}

/// Reported total emissions per country-year.
pub fn load_emissions_totals(data_dir: &Path) -> Result<DataFrame> {
    emissions_totals_from(read_csv(data_dir.join(PATHS::EMISSIONS))?)
}

fn emissions_totals_from(lf: LazyFrame) -> Result<DataFrame> {
    let df = lf
        .filter(col(EMISSIONS_SECTOR).eq(lit(SECTOR_TOTAL)))
        .select([
            col(EMISSIONS_COUNTRY).alias(COL::COUNTRY),
            col(EMISSIONS_YEAR).cast(DataType::Int32).alias(COL::YEAR),
            col(EMISSIONS_VALUE)
                .cast(DataType::Float64)
                .alias(COL::TOTAL_EMISSIONS),
        ])
        .group_by([col(COL::COUNTRY), col(COL::YEAR)])
        .agg([col(COL::TOTAL_EMISSIONS).sum()])
        .collect()?;
    let df = attach_canonical_id(df)?
        .lazy()
        .drop_nulls(Some(vec![col(COL::ISO3)]))
        .collect()?;
    sorted(df)
}

/// Combustion-sector emissions widened to one column per sector.
///
/// A country-year missing a sector keeps a null in that column rather than
/// being dropped; only the panel assembler's required-field drop removes it.
pub fn load_emissions_sectoral(data_dir: &Path) -> Result<DataFrame> {
    emissions_sectoral_from(read_csv(data_dir.join(PATHS::EMISSIONS))?)
}

fn emissions_sectoral_from(lf: LazyFrame) -> Result<DataFrame> {
    let sectors = [
        (SECTOR_ENERGY, COL::ENERGY_EMISSIONS),
        (SECTOR_INDUSTRY, COL::INDUSTRY_EMISSIONS),
        (SECTOR_TRANSPORT, COL::TRANSPORT_EMISSIONS),
    ];

    let in_any_sector = col(EMISSIONS_SECTOR)
        .eq(lit(SECTOR_ENERGY))
        .or(col(EMISSIONS_SECTOR).eq(lit(SECTOR_INDUSTRY)))
        .or(col(EMISSIONS_SECTOR).eq(lit(SECTOR_TRANSPORT)));
    let mut widened = lf
        .clone()
        .filter(in_any_sector)
        .select([
            col(EMISSIONS_COUNTRY).alias(COL::COUNTRY),
            col(EMISSIONS_YEAR).cast(DataType::Int32).alias(COL::YEAR),
        ])
        .unique(None, UniqueKeepStrategy::First)
        .collect()?;

    for (sector, out_col) in sectors {
        let sector_df = lf
            .clone()
            .filter(col(EMISSIONS_SECTOR).eq(lit(sector)))
            .select([
                col(EMISSIONS_COUNTRY).alias(COL::COUNTRY),
                col(EMISSIONS_YEAR).cast(DataType::Int32).alias(COL::YEAR),
                col(EMISSIONS_VALUE).cast(DataType::Float64).alias(out_col),
            ])
            .group_by([col(COL::COUNTRY), col(COL::YEAR)])
            .agg([col(out_col).sum()])
            .collect()?;
        widened = widened.join(
            &sector_df,
            vec![COL::COUNTRY, COL::YEAR],
            vec![COL::COUNTRY, COL::YEAR],
            JoinArgs::new(JoinType::Left),
        )?;
    }

    let df = attach_canonical_id(widened)?
        .lazy()
        .drop_nulls(Some(vec![col(COL::ISO3)]))
        .collect()?;
    sorted(df)
}

/// Health-burden measurements filtered to the all-areas PM2.5 DALY stratum.
pub fn load_health_burden(data_dir: &Path) -> Result<DataFrame> {
    health_burden_from(read_csv(data_dir.join(PATHS::HEALTH_BURDEN))?)
}

fn health_burden_from(lf: LazyFrame) -> Result<DataFrame> {
    let df = lf
        .filter(
            col(BURDEN_URBANISATION)
                .eq(lit(URBANISATION_ALL))
                .and(col(BURDEN_POLLUTANT).eq(lit(POLLUTANT_PM25)))
                .and(col(BURDEN_INDICATOR).eq(lit(INDICATOR_DALY))),
        )
        .select([
            col(BURDEN_COUNTRY).alias(COL::COUNTRY),
            col(BURDEN_YEAR).cast(DataType::Int32).alias(COL::YEAR),
            col(BURDEN_VALUE).cast(DataType::Float64).alias(COL::DALY),
        ])
        .group_by([col(COL::COUNTRY), col(COL::YEAR)])
        .agg([col(COL::DALY).sum()])
        .collect()?;
    let df = attach_canonical_id(df)?
        .lazy()
        .drop_nulls(Some(vec![col(COL::ISO3), col(COL::DALY)]))
        .collect()?;
    sorted(df)
}

/// Mortality burden shipped wide, one column per reporting year.
pub fn load_mortality(data_dir: &Path) -> Result<DataFrame> {
    mortality_from(read_csv(data_dir.join(PATHS::MORTALITY))?.collect()?)
}

fn mortality_from(wide: DataFrame) -> Result<DataFrame> {
    let year_re = year_column_regex();
    let height = wide.height();
    let year_columns: Vec<(String, i32)> = wide
        .get_column_names()
        .into_iter()
        .filter_map(|name| {
            year_re
                .captures(name)
                .and_then(|caps| caps[1].parse::<i32>().ok())
                .map(|year| (name.to_string(), year))
        })
        .collect();

    let mut long: Option<DataFrame> = None;
    for (name, year) in year_columns {
        let mut country = wide.column(MORTALITY_COUNTRY)?.clone();
        country.rename(COL::COUNTRY);
        let frame = DataFrame::new(vec![
            country,
            Series::new(COL::YEAR, vec![year; height]),
            Series::new(COL::YLL_ASMR, numeric_values(wide.column(&name)?)?),
        ])?;
        long = Some(match long {
            Some(acc) => acc.vstack(&frame)?,
            None => frame,
        });
    }
    let long = long.unwrap_or_else(|| {
        DataFrame::new(vec![
            Series::new_empty(COL::COUNTRY, &DataType::String),
            Series::new_empty(COL::YEAR, &DataType::Int32),
            Series::new_empty(COL::YLL_ASMR, &DataType::Float64),
        ])
        .expect("empty mortality frame")
    });

    let df = attach_canonical_id(long)?
        .lazy()
        .drop_nulls(Some(vec![col(COL::ISO3), col(COL::YLL_ASMR)]))
        .collect()?;
    sorted(df)
}

fn year_column_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4})").expect("valid year regex"))
}

/// Extract the leading numeric token from a mixed-content value, tolerating
/// thousands separators and scientific notation (`"1,234.5 (900-1,500)"`
/// parses as 1234.5).
pub fn leading_number(raw: &str) -> Option<f64> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"[-+]?\d*\.?\d+(?:[eE][-+]?\d+)?").expect("valid number regex")
    });
    let cleaned = raw.replace(',', "");
    re.find(&cleaned).and_then(|m| m.as_str().parse::<f64>().ok())
}

fn numeric_values(series: &Series) -> Result<Vec<Option<f64>>> {
    match series.dtype() {
        DataType::String => Ok(series
            .str()?
            .into_iter()
            .map(|opt| opt.and_then(leading_number))
            .collect()),
        _ => Ok(series.cast(&DataType::Float64)?.f64()?.into_iter().collect()),
    }
}
