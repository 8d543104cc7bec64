//! Result tables and their CSV serialization.
//!
//! Every estimation job produces one row. Jobs that cannot be estimated are
//! still written, with missing statistics and a [`RecordStatus`] naming the
//! reason.

use crate::index::PanelError;
use crate::stats::estimate::EstimationError;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A failure confined to one (subset, outcome, lag) job.
#[derive(Error, Debug)]
pub enum SkipError {
    #[error(transparent)]
    Panel(#[from] PanelError),
    #[error(transparent)]
    Estimation(#[from] EstimationError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordStatus {
    Ok,
    InsufficientPanel,
    /// The fit failed; carries [`EstimationError::kind`].
    EstimationFailed(&'static str),
    /// A column was unusable for this job.
    InvalidInput(String),
}

impl RecordStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::InsufficientPanel => f.write_str("skipped: insufficient panel"),
            Self::EstimationFailed(kind) => write!(f, "skipped: estimation error ({kind})"),
            Self::InvalidInput(detail) => write!(f, "skipped: invalid input ({detail})"),
        }
    }
}

impl From<&SkipError> for RecordStatus {
    fn from(err: &SkipError) -> Self {
        match err {
            SkipError::Panel(PanelError::Insufficient { .. }) => Self::InsufficientPanel,
            SkipError::Panel(other) => Self::InvalidInput(other.to_string()),
            SkipError::Estimation(err) => Self::EstimationFailed(err.kind()),
        }
    }
}

/// One cell of a result table.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Count(usize),
    Int(i64),
    /// Written as an empty cell when `NaN`.
    Float(f64),
    Flag(bool),
    Missing,
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<usize> for Cell {
    fn from(value: usize) -> Self {
        Self::Count(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Missing, Into::into)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Count(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) if value.is_nan() => Ok(()),
            Self::Float(value) => write!(f, "{value}"),
            Self::Flag(value) => write!(f, "{value}"),
            Self::Missing => Ok(()),
        }
    }
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write '{path}': {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error("Failed to create output directory '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A named table of rows ready to be written as CSV.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable {
    pub file_name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl ResultTable {
    pub fn new<S: AsRef<str>>(file_name: &str, columns: &[S]) -> Self {
        Self {
            file_name: file_name.to_string(),
            columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<Cell>) {
        debug_assert_eq!(row.len(), self.columns.len());
        self.rows.push(row);
    }

    /// Index of `column`, if present.
    pub fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Writes the table as `<dir>/<file_name>` and returns the path.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, ReportError> {
        fs::create_dir_all(dir).map_err(|source| ReportError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(&self.file_name);
        let csv_error = |source| ReportError::Csv {
            path: path.clone(),
            source,
        };
        let mut writer = csv::Writer::from_path(&path).map_err(csv_error)?;
        writer.write_record(&self.columns).map_err(csv_error)?;
        for row in &self.rows {
            writer
                .write_record(row.iter().map(Cell::to_string))
                .map_err(csv_error)?;
        }
        writer.flush().map_err(|source| ReportError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}
