//! Run configuration, stored as TOML.
//!
//! Every field has a default, so an empty file (or no file at all) is a valid
//! configuration. Command-line flags override individual fields after loading.

use crate::columns::AliasTable;
use crate::lag::LagMode;
use crate::subset::SubsetConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub input_path: PathBuf,
    pub output_dir: PathBuf,
    /// Lags of the score regressors for the fixed-effects, Hausman and VIF families.
    pub lags: Vec<usize>,
    /// Lags used by the controls family.
    pub control_lags: Vec<usize>,
    pub lag_mode: LagMode,
    /// Entities with fewer rows are dropped before estimation.
    pub min_observations: usize,
    /// Same, for the Hausman appendix panel.
    pub hausman_min_observations: usize,
    /// Threshold below which the Hausman test prefers fixed effects.
    pub significance: f64,
    /// Apply the G/(G-1)·(n-1)/(n-k) correction and Student t p-values.
    pub small_sample: bool,
    /// Include an intercept in the VIF auxiliary regressions.
    pub vif_intercept: bool,
    /// Run the batch jobs on the rayon pool.
    pub parallel: bool,
    pub subsets: SubsetConfig,
    pub aliases: AliasTable,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("data/merged_panel.csv"),
            output_dir: PathBuf::from("outputs"),
            lags: vec![0, 1, 2, 3],
            control_lags: vec![0, 1, 2],
            lag_mode: LagMode::Positional,
            min_observations: 2,
            hausman_min_observations: 3,
            significance: 0.05,
            small_sample: false,
            vif_intercept: true,
            parallel: true,
            subsets: SubsetConfig::default(),
            aliases: AliasTable::default(),
        }
    }
}

impl AnalysisConfig {
    /// Loads a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Writes the configuration as pretty TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self)?;
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = BufWriter::new(fs::File::create(path).map_err(io_error)?);
        file.write_all(text.as_bytes()).map_err(io_error)?;
        file.flush().map_err(io_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::LogicalField;
    use crate::subset::YearWindow;
    use tempfile::tempdir;

    #[test]
    fn empty_document_gives_defaults() {
        let config = AnalysisConfig::from_toml("").unwrap();
        assert_eq!(config, AnalysisConfig::default());
        assert_eq!(config.lags, vec![0, 1, 2, 3]);
        assert_eq!(config.subsets.covid_window, YearWindow::new(2020, 2021));
    }

    #[test]
    fn partial_document_overrides_only_named_fields() {
        let config = AnalysisConfig::from_toml(
            r#"
            lag_mode = "calendar"
            lags = [1]

            [subsets]
            sector_token = "casino"

            [aliases]
            firm = ["permno"]
            "#,
        )
        .unwrap();
        assert_eq!(config.lag_mode, LagMode::Calendar);
        assert_eq!(config.lags, vec![1]);
        assert_eq!(config.subsets.sector_token, "casino");
        assert_eq!(
            config.subsets.non_covid_outer,
            Some(YearWindow::new(2008, 2024))
        );
        assert_eq!(config.aliases.aliases(LogicalField::Firm), vec!["permno"]);
        assert_eq!(config.aliases.aliases(LogicalField::Year), vec!["Year"]);
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("esgpanel.toml");
        let config = AnalysisConfig {
            small_sample: true,
            control_lags: vec![0, 2],
            ..AnalysisConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(AnalysisConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = AnalysisConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}
