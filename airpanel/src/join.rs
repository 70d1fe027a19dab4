//! Nearest-year joining between country-year tables.
//!
//! Datasets in this domain are frequently cross-sectional snapshots taken in
//! different years, so an exact equi-join on (key, year) throws away most of
//! the overlap. The tolerance join below matches each left row to the closest
//! right-side year within a bounded window instead.

use std::collections::HashMap;

use anyhow::Result;
use log::debug;
use polars::prelude::*;

use crate::COL;

/// Join each left row to the nearest same-key right row within `tolerance`
/// years.
///
/// Semantics, per left row:
/// - candidates are the right rows sharing the join key, restricted to
///   `|candidate_year - target_year| <= tolerance`;
/// - no candidate means the left row is dropped (no null-padded output);
/// - the minimal-distance candidate wins, with ties broken by right-table
///   row order (first occurrence);
/// - the output row is the union of left and winning right fields. Right
///   fields win name collisions, except the join key (kept once) and the
///   right year column, which is emitted as [`COL::YEAR_MATCHED`]. The
///   winning distance is emitted as [`COL::YEAR_DISTANCE`].
///
/// The right table is indexed by key up front; the probe order still follows
/// the left table row-major, so results match a naive per-row scan.
pub fn nearest_year_join(
    left: &DataFrame,
    right: &DataFrame,
    on_key: &str,
    left_year: &str,
    right_year: &str,
    tolerance: i64,
) -> Result<DataFrame> {
    let left_keys = left.column(on_key)?.str()?;
    let left_years = left.column(left_year)?.i32()?;
    let right_keys = right.column(on_key)?.str()?;
    let right_years = right.column(right_year)?.i32()?;

    let mut by_key: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, opt_key) in right_keys.into_iter().enumerate() {
        if let Some(key) = opt_key {
            by_key.entry(key).or_default().push(idx);
        }
    }

    let mut left_idx: Vec<IdxSize> = vec![];
    let mut right_idx: Vec<IdxSize> = vec![];
    let mut distances: Vec<i64> = vec![];

    for row in 0..left.height() {
        let (Some(key), Some(target_year)) = (left_keys.get(row), left_years.get(row)) else {
            continue;
        };
        let Some(candidates) = by_key.get(key) else {
            continue;
        };
        let mut winner: Option<(usize, i64)> = None;
        for &candidate in candidates {
            let Some(candidate_year) = right_years.get(candidate) else {
                continue;
            };
            let distance = i64::from(candidate_year - target_year).abs();
            if distance > tolerance {
                continue;
            }
            // Strict comparison keeps the first occurrence on ties.
            if winner.map_or(true, |(_, best)| distance < best) {
                winner = Some((candidate, distance));
            }
        }
        if let Some((candidate, distance)) = winner {
            left_idx.push(row as IdxSize);
            right_idx.push(candidate as IdxSize);
            distances.push(distance);
        }
    }

    debug!(
        "nearest-year join on `{on_key}` (tolerance {tolerance}): {} of {} left rows matched",
        left_idx.len(),
        left.height()
    );

    let left_taken = left.take(&IdxCa::from_vec("idx", left_idx))?;
    let mut right_taken = right.take(&IdxCa::from_vec("idx", right_idx))?;
    right_taken.rename(right_year, COL::YEAR_MATCHED)?;
    let right_taken = right_taken.drop(on_key)?;

    // Right fields take precedence on name collision.
    let mut merged = left_taken;
    for series in right_taken.get_columns() {
        if merged.get_column_names().contains(&series.name()) {
            merged = merged.drop(series.name())?;
        }
    }
    let mut merged = merged.hstack(right_taken.get_columns())?;
    merged.with_column(Series::new(COL::YEAR_DISTANCE, distances))?;
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn left_table() -> DataFrame {
        df!(
            COL::ISO3 => &["AAA", "AAA", "BBB", "CCC"],
            COL::YEAR => &[2015i32, 2010, 2015, 2015],
            COL::PM25 => &[10.0, 12.0, 8.0, 9.0],
        )
        .unwrap()
    }

    fn right_table() -> DataFrame {
        df!(
            COL::ISO3 => &["AAA", "AAA", "BBB"],
            COL::YEAR => &[2017i32, 2012, 2019],
            COL::DALY => &[20.0, 5.0, 7.0],
        )
        .unwrap()
    }

    #[test]
    fn nearest_candidate_within_tolerance_wins() {
        // AAA@2015 has candidates at distance 2 (2017) and 3 (2012); the
        // closer one must win even though it appears first in neither sense.
        let joined =
            nearest_year_join(&left_table(), &right_table(), COL::ISO3, COL::YEAR, COL::YEAR, 3)
                .unwrap();
        let iso3 = joined.column(COL::ISO3).unwrap().str().unwrap();
        let matched = joined.column(COL::YEAR_MATCHED).unwrap().i32().unwrap();
        let daly = joined.column(COL::DALY).unwrap().f64().unwrap();

        // AAA@2015 -> 2017, AAA@2010 -> 2012; BBB@2015 (distance 4) and CCC
        // (no candidates) are dropped.
        assert_eq!(joined.height(), 2);
        assert_eq!(iso3.get(0), Some("AAA"));
        assert_eq!(matched.get(0), Some(2017));
        assert_eq!(daly.get(0), Some(20.0));
        assert_eq!(matched.get(1), Some(2012));
        assert_eq!(daly.get(1), Some(5.0));
    }

    #[test]
    fn matched_distance_is_reported() {
        let joined =
            nearest_year_join(&left_table(), &right_table(), COL::ISO3, COL::YEAR, COL::YEAR, 3)
                .unwrap();
        let distance = joined.column(COL::YEAR_DISTANCE).unwrap().i64().unwrap();
        assert_eq!(distance.get(0), Some(2));
        assert_eq!(distance.get(1), Some(2));
    }

    #[test]
    fn unmatched_left_rows_produce_no_output() {
        let left = df!(
            COL::ISO3 => &["ZZZ"],
            COL::YEAR => &[2015i32],
            COL::PM25 => &[1.0],
        )
        .unwrap();
        let joined =
            nearest_year_join(&left, &right_table(), COL::ISO3, COL::YEAR, COL::YEAR, 3).unwrap();
        assert_eq!(joined.height(), 0);
    }

    #[test]
    fn ties_break_by_right_row_order() {
        let right = df!(
            COL::ISO3 => &["AAA", "AAA"],
            COL::YEAR => &[2016i32, 2014],
            COL::DALY => &[1.0, 2.0],
        )
        .unwrap();
        let left = df!(
            COL::ISO3 => &["AAA"],
            COL::YEAR => &[2015i32],
            COL::PM25 => &[10.0],
        )
        .unwrap();
        // Both candidates sit at distance 1; the first right row wins.
        let joined = nearest_year_join(&left, &right, COL::ISO3, COL::YEAR, COL::YEAR, 3).unwrap();
        assert_eq!(joined.height(), 1);
        assert_eq!(
            joined.column(COL::YEAR_MATCHED).unwrap().i32().unwrap().get(0),
            Some(2016)
        );
    }

    #[test]
    fn zero_tolerance_equals_exact_join() {
        let left = left_table();
        let right = right_table();
        let tolerance_joined =
            nearest_year_join(&left, &right, COL::ISO3, COL::YEAR, COL::YEAR, 0).unwrap();
        let exact_joined = left
            .join(
                &right,
                vec![COL::ISO3, COL::YEAR],
                vec![COL::ISO3, COL::YEAR],
                JoinArgs::new(JoinType::Inner),
            )
            .unwrap();
        assert_eq!(tolerance_joined.height(), exact_joined.height());
        // No shared (iso3, year) pairs exist in the fixtures, so both joins
        // must be empty; widen the fixtures if this ever changes.
        assert_eq!(tolerance_joined.height(), 0);
    }

    #[test]
    fn zero_tolerance_matches_exact_join_on_shared_years() {
        let left = df!(
            COL::ISO3 => &["AAA", "BBB"],
            COL::YEAR => &[2015i32, 2016],
            COL::PM25 => &[10.0, 11.0],
        )
        .unwrap();
        let right = df!(
            COL::ISO3 => &["AAA", "BBB", "BBB"],
            COL::YEAR => &[2015i32, 2017, 2016],
            COL::DALY => &[3.0, 4.0, 5.0],
        )
        .unwrap();
        let joined = nearest_year_join(&left, &right, COL::ISO3, COL::YEAR, COL::YEAR, 0).unwrap();
        assert_eq!(joined.height(), 2);
        let daly = joined.column(COL::DALY).unwrap().f64().unwrap();
        assert_eq!(daly.get(0), Some(3.0));
        assert_eq!(daly.get(1), Some(5.0));
        let distance = joined.column(COL::YEAR_DISTANCE).unwrap().i64().unwrap();
        assert!(distance.into_iter().all(|d| d == Some(0)));
    }

    #[test]
    fn right_fields_win_name_collisions_except_key_and_year() {
        let left = df!(
            COL::ISO3 => &["AAA"],
            COL::YEAR => &[2015i32],
            COL::COUNTRY => &["left name"],
            COL::PM25 => &[10.0],
        )
        .unwrap();
        let right = df!(
            COL::ISO3 => &["AAA"],
            COL::YEAR => &[2016i32],
            COL::COUNTRY => &["right name"],
            COL::DALY => &[2.0],
        )
        .unwrap();
        let joined = nearest_year_join(&left, &right, COL::ISO3, COL::YEAR, COL::YEAR, 3).unwrap();
        let country = joined.column(COL::COUNTRY).unwrap().str().unwrap();
        assert_eq!(country.get(0), Some("right name"));
        // Target year and matched year both survive, distinguishable.
        assert_eq!(joined.column(COL::YEAR).unwrap().i32().unwrap().get(0), Some(2015));
        assert_eq!(
            joined.column(COL::YEAR_MATCHED).unwrap().i32().unwrap().get(0),
            Some(2016)
        );
    }
}
