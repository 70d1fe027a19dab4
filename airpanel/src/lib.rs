use anyhow::Result;
use log::debug;

use crate::config::Config;
use crate::ingest::Tables;
use crate::panel::ModelId;
use crate::pipeline::ModelRecord;

// Re-exports
pub use column_names as COL;

// Modules
pub mod audit;
pub mod column_names;
pub mod config;
pub mod error;
pub mod estimate;
pub mod gate;
pub mod ingest;
pub mod join;
pub mod output;
pub mod panel;
pub mod pipeline;
pub mod resolve;

/// Type for the airpanel data and API
pub struct Airpanel {
    pub tables: Tables,
    pub config: Config,
}

impl Airpanel {
    /// Setup the Airpanel object with default configuration
    pub fn new() -> Result<Self> {
        Self::new_with_config(Config::default())
    }

    /// Setup the Airpanel object with custom configuration, loading every
    /// input dataset from the configured data directory
    pub fn new_with_config(config: Config) -> Result<Self> {
        debug!("config: {config:?}");
        let tables = ingest::load_all(&config)?;
        Ok(Self { tables, config })
    }

    /// Run the pipeline over the selected model specifications (all of them
    /// when no selection is given), returning one record per specification
    pub fn run(&self, selection: Option<&[ModelId]>) -> Result<Vec<ModelRecord>> {
        pipeline::run(&self.tables, &self.config, selection)
    }
}
