use airpanel::{
    audit::{audit_saved_panel, PanelAudit},
    config::Config,
    output::panel_path,
    panel::{model_catalogue, ModelId},
    Airpanel,
};
use anyhow::anyhow;
use clap::{Args, Parser, Subcommand};
use enum_dispatch::enum_dispatch;
use log::info;
use spinners::{Spinner, Spinners};

use crate::display::{display_balance_reports, display_model_catalogue, display_run_records};
use crate::error::AirpanelCliResult;

const DEFAULT_PROGRESS_SPINNER: Spinners = Spinners::Dots;
const COMPLETE_PROGRESS_STRING: &str = "✔";
const RUNNING_TAIL_STRING: &str = "...";
const LOADING_DATASETS_STRING: &str = "Loading and harmonizing datasets";

/// Trait that defines what to run when a given subcommand is invoked.
#[enum_dispatch]
pub trait RunCommand {
    fn run(&self, config: Config) -> AirpanelCliResult<()>;
}

/// Expected behaviour: model identifiers are the catalogue letters, case
/// insensitively, with the lagged specification written `e-lag` (or `elag`).
fn parse_model_id(value: &str) -> Result<ModelId, anyhow::Error> {
    value
        .parse::<ModelId>()
        .map_err(|_| anyhow!("unknown model `{value}` (expected one of: a, b, c, d, e, e-lag, f)"))
}

/// The `run` command loads the raw datasets, assembles the panels and
/// estimates every selected model specification.
#[derive(Args, Debug)]
pub struct PipelineCommand {
    #[arg(
        short = 'm',
        long = "model",
        value_name = "A|B|C|D|E|E-LAG|F",
        help = "\
            Restrict the run to the given model(s); repeat the flag to select\n\
            several. Without it every specification in the catalogue runs.",
        value_parser = parse_model_id
    )]
    model: Vec<ModelId>,
    #[arg(long, help = "Override the configured input data directory")]
    data_dir: Option<String>,
    #[arg(long, help = "Override the configured output directory")]
    output_dir: Option<String>,
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for PipelineCommand {
    fn run(&self, config: Config) -> AirpanelCliResult<()> {
        info!("Running `run` subcommand");
        let mut config = config;
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }

        let sp = (!self.quiet).then(|| {
            Spinner::with_timer(
                DEFAULT_PROGRESS_SPINNER,
                LOADING_DATASETS_STRING.to_string() + RUNNING_TAIL_STRING,
            )
        });
        let airpanel = Airpanel::new_with_config(config)?;
        if let Some(mut s) = sp {
            s.stop_with_symbol(COMPLETE_PROGRESS_STRING);
        }

        let selection = (!self.model.is_empty()).then(|| self.model.clone());
        let records = airpanel.run(selection.as_deref())?;
        display_run_records(&records);
        Ok(())
    }
}

/// The `audit` command replays the balance diagnostics over the panels a
/// previous run saved, without re-running any estimation.
#[derive(Args, Debug)]
pub struct AuditCommand {
    #[arg(long, help = "Override the configured output directory to audit")]
    output_dir: Option<String>,
}

impl RunCommand for AuditCommand {
    fn run(&self, config: Config) -> AirpanelCliResult<()> {
        info!("Running `audit` subcommand");
        let mut config = config;
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }

        println!("\nPanel balance (from saved outputs):");
        let audits: Vec<(&'static str, PanelAudit)> = model_catalogue()
            .iter()
            .map(|spec| {
                (
                    spec.name,
                    audit_saved_panel(&panel_path(&config, spec.panel_file)),
                )
            })
            .collect();
        display_balance_reports(&audits);
        Ok(())
    }
}

/// The `models` command lists the model catalogue and how each entry is
/// assembled and estimated.
#[derive(Args, Debug)]
pub struct ModelsCommand;

impl RunCommand for ModelsCommand {
    fn run(&self, _config: Config) -> AirpanelCliResult<()> {
        info!("Running `models` subcommand");
        println!("\nThe following model specifications are available:");
        display_model_catalogue(&model_catalogue());
        Ok(())
    }
}

/// The entrypoint for the CLI.
#[derive(Parser, Debug)]
#[command(version, about="Airpanel builds regression-ready country-year panels from environmental and health data!", long_about = None, name="airpanel")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
    #[arg(
        short = 'q',
        long = "quiet",
        help = "\
            Do not print progress spinners to stdout. Results and logs (when\n\
            `RUST_LOG` is set) will still be printed.",
        global = true
    )]
    quiet: bool,
}

/// Commands contains the list of subcommands avaliable for use in the CLI.
/// Each command should implmement the RunCommand trait and specify the list
/// of required args for that command.
#[derive(Subcommand, Debug)]
#[enum_dispatch(RunCommand)]
pub enum Commands {
    /// Assemble panels and estimate the selected model specifications
    Run(PipelineCommand),
    /// Report panel balance from a previous run's saved outputs
    Audit(AuditCommand),
    /// List the model catalogue
    Models(ModelsCommand),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model_id() {
        assert_eq!(parse_model_id("a").unwrap(), ModelId::A);
        assert_eq!(parse_model_id("E").unwrap(), ModelId::E);
        assert_eq!(parse_model_id("e-lag").unwrap(), ModelId::ELag);
        assert_eq!(parse_model_id("ELAG").unwrap(), ModelId::ELag);
        assert!(parse_model_id("q").is_err());
    }

    #[test]
    fn run_command_accepts_repeated_model_flags() {
        let cli = Cli::parse_from(["airpanel", "run", "-m", "a", "-m", "c"]);
        let Some(Commands::Run(command)) = cli.command else {
            panic!("expected the run subcommand")
        };
        assert_eq!(command.model, vec![ModelId::A, ModelId::C]);
    }

    #[test]
    fn run_command_without_models_selects_everything() {
        let cli = Cli::parse_from(["airpanel", "run"]);
        let Some(Commands::Run(command)) = cli.command else {
            panic!("expected the run subcommand")
        };
        assert!(command.model.is_empty());
    }
}
