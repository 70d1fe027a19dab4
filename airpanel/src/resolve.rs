//! Country identity resolution.
//!
//! Every input dataset keys rows by a free-text country name, and the names
//! rarely agree across publishers. Resolution maps each raw name onto an ISO
//! 3166 alpha-3 code wherever the registry recognises it, and otherwise falls
//! back to the trimmed raw string so the row can still participate in joins.

use std::str::FromStr;

use celes::Country;
use polars::prelude::*;

use crate::COL;

/// Resolve a raw country name to a canonical identifier.
///
/// Returns `None` for empty or whitespace-only input, the ISO 3166 alpha-3
/// code when the registry recognises the name (by long name, alias or alpha
/// code, case-insensitively), and the trimmed input string otherwise. The
/// fallback is deliberate: an unrecognised name is still a usable join key,
/// just not a canonical one.
///
/// Distinct unrecognised names that trim to the same string will collide
/// silently; callers treat this as a documented limitation of free-text keys.
pub fn resolve_country(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match Country::from_str(trimmed) {
        Ok(country) => Some(country.alpha3.to_uppercase()),
        Err(_) => Some(trimmed.to_string()),
    }
}

/// Attach a canonical identifier column derived from the country column.
///
/// Rows whose country name is null or whitespace-only get a null identifier;
/// downstream loaders drop those before joining.
pub fn attach_canonical_id(df: DataFrame) -> anyhow::Result<DataFrame> {
    let resolved: StringChunked = df
        .column(COL::COUNTRY)?
        .str()?
        .into_iter()
        .map(|opt_name| opt_name.and_then(resolve_country))
        .collect();
    let mut df = df;
    df.with_column(resolved.into_series().with_name(COL::ISO3))?;
    Ok(df)
}
