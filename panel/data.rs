//! # Input Loading
//!
//! Reads the firm-year CSV with `polars`, resolves every logical field through
//! the alias table and hands back a [`FlatTable`] whose columns carry the
//! canonical names. Only the entity and time fields are required here; the
//! estimation families ask for the fields they need through
//! [`LoadedData::require`].
//!
//! Bytes that are not valid UTF-8 are replaced rather than rejected, so files
//! exported with a legacy code page still load. Numeric fields are cast
//! leniently: a cell that does not parse becomes missing, as does any
//! infinite value.

use crate::columns::{AliasTable, ColumnError, LogicalField, ResolvedColumns};
use crate::frame::{ColumnData, FlatTable};
use crate::index::PanelError;
use ndarray::Array1;
use polars::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the derived debt-to-assets column.
pub const DEBT_RATIO: &str = "Debt_ratio";

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Input file '{0}' does not exist")]
    InputNotFound(PathBuf),
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error("Failed to assemble the input table: {0}")]
    Table(#[from] PanelError),
    #[error("Input file '{0}' contains no data rows")]
    Empty(PathBuf),
}

/// The loaded table together with the header mapping that produced it.
#[derive(Debug, Clone)]
pub struct LoadedData {
    pub table: FlatTable,
    pub resolved: ResolvedColumns,
}

impl LoadedData {
    /// Canonical column name of `field`, or the alias error when the input
    /// has no such column.
    pub fn require(&self, field: LogicalField) -> Result<&'static str, ColumnError> {
        self.resolved.require(field).map(|_| field.canonical())
    }

    pub fn has(&self, field: LogicalField) -> bool {
        self.resolved.get(field).is_some()
    }
}

fn numeric_column(df: &DataFrame, header: &str) -> Result<Array1<f64>, DataError> {
    let casted = df.column(header)?.cast(&DataType::Float64)?;
    Ok(casted
        .f64()?
        .into_iter()
        .map(|value| value.filter(|v| v.is_finite()).unwrap_or(f64::NAN))
        .collect())
}

fn text_column(df: &DataFrame, header: &str) -> Result<Vec<Option<String>>, DataError> {
    let casted = df.column(header)?.cast(&DataType::String)?;
    Ok(casted
        .str()?
        .into_iter()
        .map(|value| {
            value
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_string)
        })
        .collect())
}

/// Reads `path` and maps its headers onto the logical fields.
pub fn load_table(path: &Path, aliases: &AliasTable) -> Result<LoadedData, DataError> {
    if !path.exists() {
        return Err(DataError::InputNotFound(path.to_path_buf()));
    }
    log::info!("Loading data from '{}'", path.display());

    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(None)
                .with_parse_options(
                    CsvParseOptions::default().with_encoding(CsvEncoding::LossyUtf8),
                ),
        )
        .finish()?;
    if df.height() == 0 {
        return Err(DataError::Empty(path.to_path_buf()));
    }

    let headers: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect();
    let resolved = aliases.resolve(&headers);
    resolved.require(LogicalField::Firm)?;
    resolved.require(LogicalField::Year)?;

    let mut table = FlatTable::new();
    for (field, header) in resolved.iter() {
        log::debug!("Column '{header}' provides {field}");
        let data = if field.is_text() {
            ColumnData::Text(text_column(&df, header)?)
        } else {
            ColumnData::Numeric(numeric_column(&df, header)?)
        };
        table = table.with_column(field.canonical(), data)?;
    }

    if resolved.get(LogicalField::Debt).is_some() && resolved.get(LogicalField::Assets).is_some() {
        table = table.with_ratio(
            DEBT_RATIO,
            LogicalField::Debt.canonical(),
            LogicalField::Assets.canonical(),
        )?;
    }

    let missing: Vec<&str> = LogicalField::ALL
        .iter()
        .filter(|&&field| resolved.get(field).is_none())
        .map(|field| field.canonical())
        .collect();
    log::info!(
        "Loaded {} rows and {} columns; unresolved fields: [{}]",
        table.n_rows(),
        headers.len(),
        missing.join(", ")
    );

    Ok(LoadedData { table, resolved })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Write};
    use tempfile::NamedTempFile;

    fn create_test_csv(content: &str) -> io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        write!(file, "{content}")?;
        file.flush()?;
        Ok(file)
    }

    #[test]
    fn aliases_map_onto_canonical_names() {
        let file = create_test_csv(
            "company,fiscal year,Industry,Total Debt,TotalAssets,Return on Assets\n\
             A,2019,Hotels,10,20,0.1\n\
             A,2020,Hotels,5,0,0.2\n\
             B,2019,Airlines,n/a,40,inf\n",
        )
        .unwrap();
        let loaded = load_table(file.path(), &AliasTable::default()).unwrap();
        let table = &loaded.table;
        assert_eq!(table.n_rows(), 3);
        assert!(matches!(
            table.column("Company_Code"),
            Some(ColumnData::Text(_))
        ));
        assert_eq!(table.numeric("Year").unwrap()[0], 2019.0);

        let debt = table.numeric("Debt").unwrap();
        assert!(debt[2].is_nan());
        let roa = table.numeric("ROA").unwrap();
        assert!(roa[2].is_nan());

        let ratio = table.numeric(DEBT_RATIO).unwrap();
        assert_eq!(ratio[0], 0.5);
        assert!(ratio[1].is_nan());

        assert_eq!(loaded.require(LogicalField::Roa).unwrap(), "ROA");
        assert!(!loaded.has(LogicalField::Esg));
        assert!(loaded.require(LogicalField::Esg).is_err());
    }

    #[test]
    fn missing_entity_column_is_fatal() {
        let file = create_test_csv("Year,ROA\n2019,0.1\n").unwrap();
        let err = load_table(file.path(), &AliasTable::default()).unwrap_err();
        match err {
            DataError::Column(ColumnError::NotFound { field, .. }) => {
                assert_eq!(field, LogicalField::Firm)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_table(Path::new("no/such/input.csv"), &AliasTable::default()).unwrap_err();
        assert!(matches!(err, DataError::InputNotFound(_)));
        assert!(err.to_string().contains("no/such/input.csv"));
    }

    #[test]
    fn latin1_bytes_do_not_abort_loading() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"Company_Code,Year,Sector\nCaf\xe9 SA,2019,H\xf4tels\nB,2020,Banks\n")
            .unwrap();
        file.flush().unwrap();
        let loaded = load_table(file.path(), &AliasTable::default()).unwrap();
        assert_eq!(loaded.table.n_rows(), 2);
    }
}
