//! The flat, un-indexed table handed over by the loader.
//!
//! Numeric columns store missing values as `NaN`; text columns store them as
//! `None`. Adding a column never mutates an existing one.

use crate::index::PanelError;
use ndarray::Array1;

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Numeric(Array1<f64>),
    Text(Vec<Option<String>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            Self::Numeric(values) => values.len(),
            Self::Text(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keeps only the rows at `rows`, in the given order.
    pub fn gather(&self, rows: &[usize]) -> Self {
        match self {
            Self::Numeric(values) => Self::Numeric(rows.iter().map(|&r| values[r]).collect()),
            Self::Text(values) => Self::Text(rows.iter().map(|&r| values[r].clone()).collect()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatTable {
    columns: Vec<(String, ColumnData)>,
    n_rows: usize,
}

impl FlatTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, data)| data)
    }

    pub fn numeric(&self, name: &str) -> Result<&Array1<f64>, PanelError> {
        match self.column(name) {
            Some(ColumnData::Numeric(values)) => Ok(values),
            Some(ColumnData::Text(_)) => Err(PanelError::NotNumeric(name.to_string())),
            None => Err(PanelError::UnknownColumn(name.to_string())),
        }
    }

    /// Returns a table with `data` added under `name`, replacing any column
    /// of the same name.
    pub fn with_column(mut self, name: &str, data: ColumnData) -> Result<Self, PanelError> {
        if !self.columns.is_empty() && data.len() != self.n_rows {
            return Err(PanelError::LengthMismatch {
                column: name.to_string(),
                found: data.len(),
                expected: self.n_rows,
            });
        }
        self.n_rows = data.len();
        match self.columns.iter_mut().find(|(existing, _)| existing == name) {
            Some(slot) => slot.1 = data,
            None => self.columns.push((name.to_string(), data)),
        }
        Ok(self)
    }

    /// Adds `numerator / denominator` as a new column. Divisions that do not
    /// produce a finite number are stored as missing.
    pub fn with_ratio(
        self,
        name: &str,
        numerator: &str,
        denominator: &str,
    ) -> Result<Self, PanelError> {
        let num = self.numeric(numerator)?;
        let den = self.numeric(denominator)?;
        let ratio: Array1<f64> = num
            .iter()
            .zip(den.iter())
            .map(|(&n, &d)| {
                let value = n / d;
                if value.is_finite() { value } else { f64::NAN }
            })
            .collect();
        self.with_column(name, ColumnData::Numeric(ratio))
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &ColumnData)> {
        self.columns.iter().map(|(name, data)| (name.as_str(), data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn ratio_column_masks_division_by_zero() {
        let table = FlatTable::new()
            .with_column("Debt", ColumnData::Numeric(array![10.0, 5.0, f64::NAN]))
            .unwrap()
            .with_column("Assets", ColumnData::Numeric(array![20.0, 0.0, 4.0]))
            .unwrap()
            .with_ratio("Debt_ratio", "Debt", "Assets")
            .unwrap();
        let ratio = table.numeric("Debt_ratio").unwrap();
        assert_eq!(ratio[0], 0.5);
        assert!(ratio[1].is_nan());
        assert!(ratio[2].is_nan());
    }

    #[test]
    fn mismatched_length_is_rejected() {
        let err = FlatTable::new()
            .with_column("a", ColumnData::Numeric(array![1.0, 2.0]))
            .unwrap()
            .with_column("b", ColumnData::Numeric(array![1.0]))
            .unwrap_err();
        assert!(matches!(err, PanelError::LengthMismatch { .. }));
    }

    #[test]
    fn text_column_is_not_numeric() {
        let table = FlatTable::new()
            .with_column("Sector", ColumnData::Text(vec![Some("Hotels".into())]))
            .unwrap();
        assert!(matches!(
            table.numeric("Sector"),
            Err(PanelError::NotNumeric(_))
        ));
    }
}
