use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Directory holding the raw input CSVs.
    pub data_dir: String,
    /// Directory that panels, model outputs and gate diagnostics are written to.
    pub output_dir: String,
    /// Window (in years, each side) for nearest-year joins between datasets
    /// with misaligned measurement years.
    pub year_tolerance: i64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: "data".into(),
            output_dir: "output".into(),
            year_tolerance: 3,
        }
    }
}
