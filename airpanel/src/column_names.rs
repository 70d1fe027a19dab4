//! This module stores the canonical column names used across the harmonized
//! tables and assembled panels. Note that the ingest module is responsible
//! for mapping raw source headers onto these names!

pub const COUNTRY: &str = "country";
pub const YEAR: &str = "year";
pub const ISO3: &str = "iso3";

pub const PM25: &str = "pm25";
pub const TOTAL_EMISSIONS: &str = "total_emissions_kt";
pub const ENERGY_EMISSIONS: &str = "energy_emissions";
pub const INDUSTRY_EMISSIONS: &str = "industry_emissions";
pub const TRANSPORT_EMISSIONS: &str = "transport_emissions";
pub const DALY: &str = "daly";
pub const YLL_ASMR: &str = "yll_asmr";

/// Year of the right-hand row selected by a nearest-year join. Kept separate
/// from [`YEAR`] so both sides of the join stay distinguishable.
pub const YEAR_MATCHED: &str = "year_matched";
/// Absolute distance between the target year and the matched year.
pub const YEAR_DISTANCE: &str = "year_distance";

/// Name of the log-transformed version of a measurement column.
pub fn ln(name: &str) -> String {
    format!("ln_{name}")
}

/// Name of the one-period-lagged version of a column.
pub fn lag(name: &str) -> String {
    format!("{name}_lag1")
}
