use airpanel::{
    audit::PanelAudit,
    gate::GateOutcome,
    panel::{EstimatorKind, JoinStrategy, ModelSpec},
    pipeline::{ModelRecord, RunOutcome},
};
use comfy_table::{presets::NOTHING, *};

fn record_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_style(comfy_table::TableComponent::BottomBorder, '─')
        .set_style(comfy_table::TableComponent::BottomBorderIntersections, '─')
        .set_style(comfy_table::TableComponent::TopBorder, '─')
        .set_style(comfy_table::TableComponent::TopBorderIntersections, '─');
    table
}

fn finish_record_table(mut table: Table) {
    if let Some(column) = table.column_mut(0) {
        column.set_cell_alignment(CellAlignment::Right);
    }
    println!("\n{}", table);
}

pub fn display_run_records(records: &[ModelRecord]) {
    for record in records {
        let mut table = record_table();
        table.add_row(vec![
            Cell::new("Model").add_attribute(Attribute::Bold),
            record.name.clone().into(),
        ]);

        match &record.outcome {
            RunOutcome::Fitted(fit) => {
                table.add_row(vec![
                    Cell::new("Outcome").add_attribute(Attribute::Bold),
                    "fitted".into(),
                ]);
                table.add_row(vec![
                    Cell::new("Observations").add_attribute(Attribute::Bold),
                    fit.n_obs.to_string().into(),
                ]);
                if let Some(r2) = fit.r_squared {
                    table.add_row(vec![
                        Cell::new("R-squared").add_attribute(Attribute::Bold),
                        format!("{r2:.4}").into(),
                    ]);
                }
                if let Some(within) = fit.r_squared_within {
                    table.add_row(vec![
                        Cell::new("R-squared (within)").add_attribute(Attribute::Bold),
                        format!("{within:.4}").into(),
                    ]);
                }
                for c in fit.coefficients.iter().filter(|c| c.term != "const") {
                    table.add_row(vec![
                        Cell::new(&c.term).add_attribute(Attribute::Bold),
                        format!(
                            "{:.4} (se {:.4}, p {:.4})",
                            c.estimate, c.std_error, c.p_value
                        )
                        .into(),
                    ]);
                }
            }
            RunOutcome::Skipped { reason } => {
                table.add_row(vec![
                    Cell::new("Outcome").add_attribute(Attribute::Bold),
                    "skipped".into(),
                ]);
                table.add_row(vec![
                    Cell::new("Reason").add_attribute(Attribute::Bold),
                    reason.clone().into(),
                ]);
            }
            RunOutcome::Failed { reason } => {
                table.add_row(vec![
                    Cell::new("Outcome").add_attribute(Attribute::Bold),
                    "failed".into(),
                ]);
                table.add_row(vec![
                    Cell::new("Reason").add_attribute(Attribute::Bold),
                    reason.clone().into(),
                ]);
            }
        }

        if let Some(balance) = &record.balance {
            table.add_row(vec![
                Cell::new("Panel balance").add_attribute(Attribute::Bold),
                balance.to_string().into(),
            ]);
        }
        if let Some(gate) = &record.gate {
            let decision = match (gate.outcome, &gate.reason) {
                (GateOutcome::Estimate, _) => "ESTIMATE".to_string(),
                (GateOutcome::Skip, Some(reason)) => format!("SKIP ({reason})"),
                (GateOutcome::Skip, None) => "SKIP".to_string(),
            };
            table.add_row(vec![
                Cell::new("Lag gate").add_attribute(Attribute::Bold),
                decision.into(),
            ]);
        }

        finish_record_table(table);
    }
}

pub fn display_balance_reports(audits: &[(&str, PanelAudit)]) {
    for (name, audit) in audits {
        let mut table = record_table();
        table.add_row(vec![
            Cell::new("Model").add_attribute(Attribute::Bold),
            (*name).into(),
        ]);
        match audit {
            PanelAudit::Available(balance) => {
                table.add_row(vec![
                    Cell::new("Observations").add_attribute(Attribute::Bold),
                    balance.n_obs.to_string().into(),
                ]);
                table.add_row(vec![
                    Cell::new("Countries").add_attribute(Attribute::Bold),
                    balance.n_countries.to_string().into(),
                ]);
                let years = match (balance.year_min, balance.year_max) {
                    (Some(min), Some(max)) => format!("{} ({min}-{max})", balance.n_years),
                    _ => balance.n_years.to_string(),
                };
                table.add_row(vec![
                    Cell::new("Years").add_attribute(Attribute::Bold),
                    years.into(),
                ]);
                table.add_row(vec![
                    Cell::new("Obs per country").add_attribute(Attribute::Bold),
                    format!(
                        "median={:.0}, min={}, max={}",
                        balance.median_obs_per_country,
                        balance.min_obs_per_country,
                        balance.max_obs_per_country
                    )
                    .into(),
                ]);
            }
            PanelAudit::NotAvailable { reason } => {
                table.add_row(vec![
                    Cell::new("Status").add_attribute(Attribute::Bold),
                    format!("not available: {reason}").into(),
                ]);
            }
        }
        finish_record_table(table);
    }
}

pub fn display_model_catalogue(specs: &[ModelSpec]) {
    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Model", "Specification", "Join", "Estimator", "Min rows"]);
    for spec in specs {
        let join = match spec.join {
            JoinStrategy::ExactYear => "exact year",
            JoinStrategy::NearestYear => "nearest year",
        };
        let estimator = match spec.estimator {
            EstimatorKind::Ols => "OLS",
            EstimatorKind::TwoWayFixedEffects => "two-way FE",
            EstimatorKind::LaggedFixedEffects => "lagged FE (gated)",
        };
        table.add_row(vec![
            spec.id.to_string(),
            spec.title.to_string(),
            join.to_string(),
            estimator.to_string(),
            spec.min_rows.to_string(),
        ]);
    }
    println!("\n{}", table);
}
