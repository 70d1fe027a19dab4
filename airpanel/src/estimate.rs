//! Regression estimators.
//!
//! The pipeline treats these as opaque numerical solvers: they receive a
//! fully assembled, finite-valued design and hand back a coefficient table
//! plus fit diagnostics. Ordinary least squares is solved via the normal
//! equations; the panel estimator absorbs entity (and optionally time)
//! effects by alternating demeaning before running OLS on the transformed
//! data, with Liang-Zeger cluster-robust standard errors.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use nalgebra::{DMatrix, DVector};
use polars::prelude::*;
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::error::AirpanelError;

/// Convergence tolerance for the alternating-demeaning passes.
const DEMEAN_TOL: f64 = 1e-8;
/// Safety bound on demeaning iterations.
const DEMEAN_MAX_ITER: usize = 10_000;

/// One row of a coefficient table.
#[derive(Debug, Clone, Serialize)]
pub struct CoefficientRow {
    pub term: String,
    pub estimate: f64,
    pub std_error: f64,
    pub t_stat: f64,
    pub p_value: f64,
    pub ci_low: f64,
    pub ci_high: f64,
}

/// Result of a fitted model, shared between the OLS and panel estimators.
#[derive(Debug, Clone, Serialize)]
pub struct FitSummary {
    pub name: String,
    pub coefficients: Vec<CoefficientRow>,
    pub n_obs: usize,
    pub n_entities: Option<usize>,
    pub r_squared: Option<f64>,
    pub adj_r_squared: Option<f64>,
    pub r_squared_within: Option<f64>,
    pub fitted: Vec<f64>,
    pub residuals: Vec<f64>,
}

/// Extract a response vector and row-major design matrix from a panel.
///
/// Panels reaching the estimators have already dropped rows with missing
/// required fields, so a null here is a schema violation, not data noise.
pub fn extract_design(
    df: &DataFrame,
    response: &str,
    regressors: &[String],
) -> Result<(Vec<f64>, Vec<f64>)> {
    let y_ca = df.column(response)?.f64()?;
    let mut y = Vec::with_capacity(df.height());
    for opt in y_ca.into_iter() {
        y.push(opt.ok_or_else(|| {
            AirpanelError::MalformedSchema(format!("null in response column `{response}`"))
        })?);
    }

    let mut x = Vec::with_capacity(df.height() * regressors.len());
    let columns = regressors
        .iter()
        .map(|name| Ok(df.column(name)?.f64()?.clone()))
        .collect::<Result<Vec<_>>>()?;
    for row in 0..df.height() {
        for (ca, name) in columns.iter().zip(regressors) {
            x.push(ca.get(row).ok_or_else(|| {
                AirpanelError::MalformedSchema(format!("null in regressor column `{name}`"))
            })?);
        }
    }
    Ok((y, x))
}

/// Map a key column onto dense 0-based group indices.
pub fn group_indices(df: &DataFrame, column: &str) -> Result<(Vec<usize>, usize)> {
    let series = df.column(column)?;
    let mut lookup: HashMap<String, usize> = HashMap::new();
    let mut groups = Vec::with_capacity(df.height());
    for row in 0..series.len() {
        let value = series.get(row)?.to_string();
        let next = lookup.len();
        groups.push(*lookup.entry(value).or_insert(next));
    }
    let n_groups = lookup.len();
    Ok((groups, n_groups))
}

/// Fit ordinary least squares with an intercept.
///
/// `x` is row-major with `regressor_names.len()` columns. Returns estimate,
/// standard error, t-statistic, two-sided p-value and 95% bounds per term,
/// with the intercept reported as `const`.
pub fn fit_ols(name: &str, y: &[f64], x: &[f64], regressor_names: &[String]) -> Result<FitSummary> {
    let n = y.len();
    let p = regressor_names.len();
    validate_dims(n, p, x.len())?;

    // Intercept column first, matching the reported term order.
    let k = p + 1;
    let mut design = Vec::with_capacity(n * k);
    for row in 0..n {
        design.push(1.0);
        design.extend_from_slice(&x[row * p..(row + 1) * p]);
    }

    let x_mat = DMatrix::from_row_slice(n, k, &design);
    let y_vec = DVector::from_column_slice(y);
    let xtx = x_mat.transpose() * &x_mat;
    let xtx_inv = xtx
        .try_inverse()
        .ok_or_else(|| AirpanelError::DegenerateDesign("X'X is singular".into()))?;
    let beta = &xtx_inv * (x_mat.transpose() * &y_vec);

    let fitted_vec = &x_mat * &beta;
    let resid = &y_vec - &fitted_vec;
    let rss: f64 = resid.iter().map(|r| r * r).sum();
    let y_mean = y.iter().sum::<f64>() / n as f64;
    let tss: f64 = y.iter().map(|v| (v - y_mean).powi(2)).sum();
    let r_squared = if tss > 0.0 { 1.0 - rss / tss } else { 0.0 };

    let dof = n as f64 - k as f64;
    if dof <= 0.0 {
        return Err(AirpanelError::DegenerateDesign(format!(
            "{n} observations cannot identify {k} parameters"
        ))
        .into());
    }
    let sigma2 = rss / dof;
    let se: Vec<f64> = (0..k).map(|j| (sigma2 * xtx_inv[(j, j)]).sqrt()).collect();
    let adj_r_squared = 1.0 - (1.0 - r_squared) * (n as f64 - 1.0) / dof;

    let mut terms = Vec::with_capacity(k);
    terms.push("const".to_string());
    terms.extend(regressor_names.iter().cloned());
    let coefficients = coefficient_rows(&terms, beta.as_slice(), &se, dof)?;

    Ok(FitSummary {
        name: name.to_string(),
        coefficients,
        n_obs: n,
        n_entities: None,
        r_squared: Some(r_squared),
        adj_r_squared: Some(adj_r_squared),
        r_squared_within: None,
        fitted: fitted_vec.iter().copied().collect(),
        residuals: resid.iter().copied().collect(),
    })
}

/// Fit a panel within estimator with entity (and optionally time) effects.
///
/// Effects are absorbed by alternating demeaning until convergence; no
/// intercept is reported because it is absorbed. Standard errors are
/// cluster-robust with entities as clusters. The two-way degrees-of-freedom
/// correction assumes a connected entity-time panel.
pub fn fit_panel_fe(
    name: &str,
    entities: &[usize],
    times: Option<&[usize]>,
    y: &[f64],
    x: &[f64],
    regressor_names: &[String],
) -> Result<FitSummary> {
    let n = y.len();
    let p = regressor_names.len();
    validate_dims(n, p, x.len())?;
    if entities.len() != n {
        return Err(AirpanelError::DegenerateDesign(format!(
            "entity index length {} != {n}",
            entities.len()
        ))
        .into());
    }

    let mut dims: Vec<Vec<Vec<usize>>> = vec![index_groups(entities)];
    if let Some(times) = times {
        if times.len() != n {
            return Err(AirpanelError::DegenerateDesign(format!(
                "time index length {} != {n}",
                times.len()
            ))
            .into());
        }
        dims.push(index_groups(times));
    }

    let mut y_dm = y.to_vec();
    partial_out(&mut y_dm, &dims)?;
    let mut x_dm = vec![0.0; n * p];
    for j in 0..p {
        let mut column: Vec<f64> = (0..n).map(|i| x[i * p + j]).collect();
        partial_out(&mut column, &dims)?;
        for i in 0..n {
            x_dm[i * p + j] = column[i];
        }
    }

    let x_mat = DMatrix::from_row_slice(n, p, &x_dm);
    let y_vec = DVector::from_column_slice(&y_dm);
    let xtx = x_mat.transpose() * &x_mat;
    let xtx_inv = xtx
        .try_inverse()
        .ok_or_else(|| AirpanelError::DegenerateDesign("X'X is singular after demeaning".into()))?;
    let beta = &xtx_inv * (x_mat.transpose() * &y_vec);

    let fitted_vec = &x_mat * &beta;
    let resid = &y_vec - &fitted_vec;
    let rss: f64 = resid.iter().map(|r| r * r).sum();
    let tss: f64 = y_dm.iter().map(|v| v * v).sum();
    let r_squared_within = if tss > 0.0 { 1.0 - rss / tss } else { 0.0 };

    let n_entities = dims[0].len();
    let absorbed = n_entities
        + match times {
            Some(_) => dims[1].len().saturating_sub(1),
            None => 0,
        };
    let dof = n as f64 - p as f64 - absorbed as f64;
    if dof <= 0.0 {
        return Err(AirpanelError::DegenerateDesign(format!(
            "{n} observations cannot identify {p} slopes plus {absorbed} absorbed effects"
        ))
        .into());
    }

    let se = cluster_robust_se(&x_mat, &resid, &xtx_inv, entities);
    let coefficients = coefficient_rows(regressor_names, beta.as_slice(), &se, dof)?;

    Ok(FitSummary {
        name: name.to_string(),
        coefficients,
        n_obs: n,
        n_entities: Some(n_entities),
        r_squared: None,
        adj_r_squared: None,
        r_squared_within: Some(r_squared_within),
        fitted: fitted_vec.iter().copied().collect(),
        residuals: resid.iter().copied().collect(),
    })
}

fn validate_dims(n: usize, p: usize, x_len: usize) -> Result<()> {
    if n == 0 {
        return Err(AirpanelError::DegenerateDesign("y must be non-empty".into()).into());
    }
    if p == 0 {
        return Err(AirpanelError::DegenerateDesign("at least one regressor required".into()).into());
    }
    if x_len != n * p {
        return Err(AirpanelError::DegenerateDesign(format!(
            "x length {x_len} != n*p ({n}*{p})"
        ))
        .into());
    }
    Ok(())
}

fn index_groups(groups: &[usize]) -> Vec<Vec<usize>> {
    let n_levels = groups.iter().copied().max().map_or(0, |max| max + 1);
    let mut indices: Vec<Vec<usize>> = vec![Vec::new(); n_levels];
    for (i, &g) in groups.iter().enumerate() {
        indices[g].push(i);
    }
    indices
}

/// Subtract group means for every dimension, repeating until the largest
/// remaining group mean is negligible. One pass is exact for a single
/// dimension.
fn partial_out(values: &mut [f64], dims: &[Vec<Vec<usize>>]) -> Result<()> {
    if dims.len() == 1 {
        demean_dim(values, &dims[0]);
        return Ok(());
    }
    for _ in 0..DEMEAN_MAX_ITER {
        for dim in dims {
            demean_dim(values, dim);
        }
        let worst = dims
            .iter()
            .flat_map(|dim| dim.iter())
            .filter(|group| !group.is_empty())
            .map(|group| {
                (group.iter().map(|&i| values[i]).sum::<f64>() / group.len() as f64).abs()
            })
            .fold(0.0_f64, f64::max);
        if worst < DEMEAN_TOL {
            return Ok(());
        }
    }
    Err(anyhow!("fixed-effects demeaning failed to converge"))
}

fn demean_dim(values: &mut [f64], groups: &[Vec<usize>]) {
    for group in groups {
        if group.is_empty() {
            continue;
        }
        let mean = group.iter().map(|&i| values[i]).sum::<f64>() / group.len() as f64;
        for &i in group {
            values[i] -= mean;
        }
    }
}

/// Liang-Zeger cluster-robust (HC0 sandwich) standard errors with the usual
/// small-sample correction.
fn cluster_robust_se(
    x: &DMatrix<f64>,
    residuals: &DVector<f64>,
    xtx_inv: &DMatrix<f64>,
    cluster_ids: &[usize],
) -> Vec<f64> {
    let n = x.nrows();
    let p = x.ncols();

    let mut cluster_map: HashMap<usize, Vec<usize>> = HashMap::new();
    for (i, &cid) in cluster_ids.iter().enumerate() {
        cluster_map.entry(cid).or_default().push(i);
    }
    let g = cluster_map.len() as f64;

    let mut meat = DMatrix::zeros(p, p);
    for indices in cluster_map.values() {
        let mut score = vec![0.0_f64; p];
        for &i in indices {
            let e_i = residuals[i];
            for j in 0..p {
                score[j] += x[(i, j)] * e_i;
            }
        }
        for a in 0..p {
            for b in 0..p {
                meat[(a, b)] += score[a] * score[b];
            }
        }
    }

    let n_f = n as f64;
    let p_f = p as f64;
    let correction = if g > 1.0 && n_f > p_f {
        (g / (g - 1.0)) * ((n_f - 1.0) / (n_f - p_f))
    } else {
        1.0
    };
    let vcr = (xtx_inv * &meat) * xtx_inv * correction;
    (0..p).map(|j| vcr[(j, j)].max(0.0).sqrt()).collect()
}

fn coefficient_rows(
    terms: &[String],
    estimates: &[f64],
    std_errors: &[f64],
    dof: f64,
) -> Result<Vec<CoefficientRow>> {
    let t_dist = StudentsT::new(0.0, 1.0, dof)
        .map_err(|err| anyhow!("invalid t-distribution with {dof} dof: {err}"))?;
    let t_crit = t_dist.inverse_cdf(0.975);
    Ok(terms
        .iter()
        .zip(estimates.iter().zip(std_errors))
        .map(|(term, (&estimate, &std_error))| {
            let t_stat = estimate / std_error;
            let p_value = 2.0 * (1.0 - t_dist.cdf(t_stat.abs()));
            CoefficientRow {
                term: term.clone(),
                estimate,
                std_error,
                t_stat,
                p_value,
                ci_low: estimate - t_crit * std_error,
                ci_high: estimate + t_crit * std_error,
            }
        })
        .collect())
}
