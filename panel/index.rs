//! # Panel Indexer
//!
//! Turns a [`FlatTable`] into a [`Panel`]: rows sorted by (entity, time), one
//! row per (entity, time) pair, and only entities with at least the configured
//! number of observations. A panel with fewer than two entities, fewer than
//! two periods, or ten rows or fewer is not estimable; that condition is a
//! [`PanelError::Insufficient`] and callers report it as a skipped result
//! rather than aborting.

use crate::frame::{ColumnData, FlatTable};
use ndarray::{Array1, ArrayView1};
use std::collections::BTreeSet;
use std::ops::Range;
use thiserror::Error;

/// Rows strictly above this count are required for a panel to be estimable.
pub const MINIMUM_PANEL_ROWS: usize = 10;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PanelError {
    #[error(
        "Insufficient panel: {entities} entities, {periods} periods and {rows} rows (need at least 2 entities, 2 periods and more than 10 rows)"
    )]
    Insufficient {
        entities: usize,
        periods: usize,
        rows: usize,
    },
    #[error("Column '{0}' is not present in the panel.")]
    UnknownColumn(String),
    #[error("Column '{0}' holds text, but a numeric column was expected.")]
    NotNumeric(String),
    #[error("Column '{0}' holds numbers, but a text column was expected.")]
    NotText(String),
    #[error("Column '{column}' has {found} rows, but the table has {expected}.")]
    LengthMismatch {
        column: String,
        found: usize,
        expected: usize,
    },
}

/// A table indexed by (entity, time), sorted ascending on both levels.
#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    entity_name: String,
    time_name: String,
    entity_labels: Vec<String>,
    entity: Vec<usize>,
    time: Vec<i64>,
    groups: Vec<Range<usize>>,
    columns: Vec<(String, ColumnData)>,
}

impl Panel {
    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn time_name(&self) -> &str {
        &self.time_name
    }

    pub fn n_rows(&self) -> usize {
        self.time.len()
    }

    pub fn n_entities(&self) -> usize {
        self.entity_labels.len()
    }

    pub fn n_periods(&self) -> usize {
        self.time.iter().collect::<BTreeSet<_>>().len()
    }

    /// Entity label for every row.
    pub fn entity_label(&self, row: usize) -> &str {
        &self.entity_labels[self.entity[row]]
    }

    pub fn entity_labels(&self) -> &[String] {
        &self.entity_labels
    }

    /// Dense entity code (index into [`Panel::entity_labels`]) for every row.
    pub fn entity_codes(&self) -> &[usize] {
        &self.entity
    }

    pub fn times(&self) -> &[i64] {
        &self.time
    }

    /// Row range of every entity, in entity order.
    pub fn groups(&self) -> &[Range<usize>] {
        &self.groups
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some() || name == self.time_name
    }

    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, data)| data)
    }

    /// A numeric view of `name`. The time level can be read as a column too.
    pub fn numeric(&self, name: &str) -> Result<Array1<f64>, PanelError> {
        if name == self.time_name && self.column(name).is_none() {
            return Ok(self.time.iter().map(|&t| t as f64).collect());
        }
        match self.column(name) {
            Some(ColumnData::Numeric(values)) => Ok(values.clone()),
            Some(ColumnData::Text(_)) => Err(PanelError::NotNumeric(name.to_string())),
            None => Err(PanelError::UnknownColumn(name.to_string())),
        }
    }

    pub fn numeric_view(&self, name: &str) -> Result<ArrayView1<'_, f64>, PanelError> {
        match self.column(name) {
            Some(ColumnData::Numeric(values)) => Ok(values.view()),
            Some(ColumnData::Text(_)) => Err(PanelError::NotNumeric(name.to_string())),
            None => Err(PanelError::UnknownColumn(name.to_string())),
        }
    }

    pub fn text(&self, name: &str) -> Result<&[Option<String>], PanelError> {
        match self.column(name) {
            Some(ColumnData::Text(values)) => Ok(values),
            Some(ColumnData::Numeric(_)) => Err(PanelError::NotText(name.to_string())),
            None => Err(PanelError::UnknownColumn(name.to_string())),
        }
    }

    /// Returns a new panel with `values` stored under `name`. The source
    /// panel is left untouched.
    pub fn with_numeric(&self, name: &str, values: Array1<f64>) -> Result<Panel, PanelError> {
        if values.len() != self.n_rows() {
            return Err(PanelError::LengthMismatch {
                column: name.to_string(),
                found: values.len(),
                expected: self.n_rows(),
            });
        }
        let mut next = self.clone();
        let data = ColumnData::Numeric(values);
        match next.columns.iter_mut().find(|(existing, _)| existing == name) {
            Some(slot) => slot.1 = data,
            None => next.columns.push((name.to_string(), data)),
        }
        Ok(next)
    }

    /// Keeps the listed rows. `rows` must be ascending so that the sort order
    /// of the source panel is preserved.
    pub fn select_rows(&self, rows: &[usize]) -> Panel {
        debug_assert!(rows.windows(2).all(|w| w[0] < w[1]));
        let codes: Vec<usize> = rows.iter().map(|&r| self.entity[r]).collect();
        let (entity_labels, entity, groups) = regroup(&self.entity_labels, &codes);
        Panel {
            entity_name: self.entity_name.clone(),
            time_name: self.time_name.clone(),
            entity_labels,
            entity,
            time: rows.iter().map(|&r| self.time[r]).collect(),
            groups,
            columns: self
                .columns
                .iter()
                .map(|(name, data)| (name.clone(), data.gather(rows)))
                .collect(),
        }
    }

    /// Fails with [`PanelError::Insufficient`] unless the panel has at least
    /// two entities, two periods and more than [`MINIMUM_PANEL_ROWS`] rows.
    pub fn check_estimable(&self) -> Result<(), PanelError> {
        check_shape(self.n_entities(), self.n_periods(), self.n_rows())
    }
}

pub(crate) fn check_shape(entities: usize, periods: usize, rows: usize) -> Result<(), PanelError> {
    if entities < 2 || periods < 2 || rows <= MINIMUM_PANEL_ROWS {
        return Err(PanelError::Insufficient {
            entities,
            periods,
            rows,
        });
    }
    Ok(())
}

/// Rebuilds dense entity codes for rows that are already grouped by entity.
fn regroup(labels: &[String], codes: &[usize]) -> (Vec<String>, Vec<usize>, Vec<Range<usize>>) {
    let mut new_labels = Vec::new();
    let mut new_codes = Vec::with_capacity(codes.len());
    let mut groups: Vec<Range<usize>> = Vec::new();
    let mut previous: Option<usize> = None;
    for (row, &code) in codes.iter().enumerate() {
        if previous != Some(code) {
            new_labels.push(labels[code].clone());
            groups.push(row..row);
            previous = Some(code);
        }
        new_codes.push(new_labels.len() - 1);
        if let Some(group) = groups.last_mut() {
            group.end = row + 1;
        }
    }
    (new_labels, new_codes, groups)
}

/// Builds [`Panel`]s from flat tables.
#[derive(Debug, Clone, Copy)]
pub struct PanelIndexer {
    /// Entities with fewer rows than this are removed.
    pub min_observations: usize,
}

impl Default for PanelIndexer {
    fn default() -> Self {
        Self {
            min_observations: 2,
        }
    }
}

impl PanelIndexer {
    pub fn new(min_observations: usize) -> Self {
        Self { min_observations }
    }

    /// Indexes `table` by (`entity_column`, `time_column`) and fails with
    /// [`PanelError::Insufficient`] when the result cannot be estimated.
    pub fn index(
        &self,
        table: &FlatTable,
        entity_column: &str,
        time_column: &str,
    ) -> Result<Panel, PanelError> {
        let panel = self.arrange(table, entity_column, time_column)?;
        panel.check_estimable()?;
        Ok(panel)
    }

    /// Sorts and filters `table` into a panel without judging its size.
    ///
    /// Rows with a missing entity or a non-finite time are dropped. When an
    /// (entity, time) pair repeats, the first row wins.
    pub fn arrange(
        &self,
        table: &FlatTable,
        entity_column: &str,
        time_column: &str,
    ) -> Result<Panel, PanelError> {
        let entities: Vec<Option<String>> = match table.column(entity_column) {
            Some(ColumnData::Text(values)) => values.clone(),
            Some(ColumnData::Numeric(values)) => values
                .iter()
                .map(|v| v.is_finite().then(|| format!("{v}")))
                .collect(),
            None => return Err(PanelError::UnknownColumn(entity_column.to_string())),
        };
        let times = table.numeric(time_column)?;

        let mut keyed: Vec<(String, i64, usize)> = entities
            .into_iter()
            .zip(times.iter())
            .enumerate()
            .filter_map(|(row, (entity, &time))| match entity {
                Some(label) if time.is_finite() => Some((label, time.round() as i64, row)),
                _ => None,
            })
            .collect();
        let missing_keys = table.n_rows() - keyed.len();
        if missing_keys > 0 {
            log::debug!("Dropped {missing_keys} rows with a missing entity or time key");
        }
        keyed.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let before = keyed.len();
        keyed.dedup_by(|later, earlier| later.0 == earlier.0 && later.1 == earlier.1);
        if keyed.len() < before {
            log::warn!(
                "Found {} duplicate (entity, time) rows; keeping the first occurrence of each",
                before - keyed.len()
            );
        }

        let mut kept: Vec<(String, i64, usize)> = Vec::with_capacity(keyed.len());
        let mut dropped_entities = 0usize;
        let mut start = 0;
        while start < keyed.len() {
            let mut end = start + 1;
            while end < keyed.len() && keyed[end].0 == keyed[start].0 {
                end += 1;
            }
            if end - start >= self.min_observations {
                kept.extend(keyed[start..end].iter().cloned());
            } else {
                dropped_entities += 1;
            }
            start = end;
        }
        if dropped_entities > 0 {
            log::debug!(
                "Removed {dropped_entities} entities with fewer than {} observations",
                self.min_observations
            );
        }

        let rows: Vec<usize> = kept.iter().map(|(_, _, row)| *row).collect();
        let mut entity_labels: Vec<String> = Vec::new();
        let mut codes = Vec::with_capacity(kept.len());
        for (label, _, _) in &kept {
            if entity_labels.last() != Some(label) {
                entity_labels.push(label.clone());
            }
            codes.push(entity_labels.len() - 1);
        }
        let (entity_labels, entity, groups) = regroup(&entity_labels, &codes);

        Ok(Panel {
            entity_name: entity_column.to_string(),
            time_name: time_column.to_string(),
            entity_labels,
            entity,
            time: kept.iter().map(|(_, time, _)| *time).collect(),
            groups,
            columns: table
                .columns()
                .filter(|(name, _)| *name != entity_column && *name != time_column)
                .map(|(name, data)| (name.to_string(), data.gather(&rows)))
                .collect(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ndarray::Array1;

    /// Builds a flat table with `entities` firms observed over `years`.
    pub(crate) fn balanced_table(entities: usize, years: &[i64]) -> FlatTable {
        let mut firm = Vec::new();
        let mut year = Vec::new();
        let mut value = Vec::new();
        for e in 0..entities {
            for (i, &y) in years.iter().enumerate() {
                firm.push(Some(format!("F{e:02}")));
                year.push(y as f64);
                value.push((e * 10 + i) as f64);
            }
        }
        FlatTable::new()
            .with_column("Company_Code", ColumnData::Text(firm))
            .unwrap()
            .with_column("Year", ColumnData::Numeric(Array1::from(year)))
            .unwrap()
            .with_column("x", ColumnData::Numeric(Array1::from(value)))
            .unwrap()
    }

    #[test]
    fn column_accessors_distinguish_kind_from_absence() {
        let panel = PanelIndexer::new(2)
            .index(&balanced_table(3, &[2018, 2019, 2020, 2021]), "Company_Code", "Year")
            .unwrap();
        assert_eq!(panel.text("x"), Err(PanelError::NotText("x".to_string())));
        assert_eq!(panel.text("Sector"), Err(PanelError::UnknownColumn("Sector".to_string())));
        assert_eq!(
            panel.numeric("Company_Code"),
            Err(PanelError::NotNumeric("Company_Code".to_string()))
        );
    }

    #[test]
    fn rows_are_sorted_by_entity_then_time() {
        let table = FlatTable::new()
            .with_column(
                "Company_Code",
                ColumnData::Text(
                    ["B", "A", "B", "A", "C", "C", "A", "B", "C", "D", "D", "D"]
                        .iter()
                        .map(|s| Some(s.to_string()))
                        .collect(),
                ),
            )
            .unwrap()
            .with_column(
                "Year",
                ColumnData::Numeric(ndarray::array![
                    2020.0, 2021.0, 2019.0, 2019.0, 2019.0, 2020.0, 2020.0, 2021.0, 2021.0,
                    2019.0, 2020.0, 2021.0
                ]),
            )
            .unwrap();
        let panel = PanelIndexer::new(1)
            .index(&table, "Company_Code", "Year")
            .unwrap();
        assert_eq!(panel.entity_labels(), &["A", "B", "C", "D"]);
        assert_eq!(panel.times()[..3], [2019, 2020, 2021]);
        assert_eq!(panel.groups()[1], 3..6);
    }

    #[test]
    fn entities_below_threshold_are_removed() {
        let mut table = balanced_table(5, &[2018, 2019, 2020, 2021]);
        let mut firm: Vec<Option<String>> = match table.column("Company_Code") {
            Some(ColumnData::Text(v)) => v.clone(),
            _ => unreachable!(),
        };
        // Leave F04 with a single observation.
        for label in firm.iter_mut().skip(17) {
            *label = None;
        }
        table = table
            .with_column("Company_Code", ColumnData::Text(firm))
            .unwrap();
        let panel = PanelIndexer::new(2)
            .index(&table, "Company_Code", "Year")
            .unwrap();
        assert_eq!(panel.n_entities(), 4);
        for group in panel.groups() {
            assert!(group.len() >= 2);
        }
    }

    #[test]
    fn tiny_panels_are_insufficient() {
        let table = balanced_table(2, &[2019, 2020, 2021]);
        let err = PanelIndexer::default()
            .index(&table, "Company_Code", "Year")
            .unwrap_err();
        assert_eq!(
            err,
            PanelError::Insufficient {
                entities: 2,
                periods: 3,
                rows: 6
            }
        );
        let arranged = PanelIndexer::default()
            .arrange(&table, "Company_Code", "Year")
            .unwrap();
        assert_eq!(arranged.n_rows(), 6);
    }

    #[test]
    fn duplicate_pairs_keep_first_row() {
        let table = FlatTable::new()
            .with_column(
                "Company_Code",
                ColumnData::Text((0..16).map(|i| Some(format!("F{}", i / 4))).collect()),
            )
            .unwrap()
            .with_column(
                "Year",
                ColumnData::Numeric(Array1::from(
                    (0..16).map(|i| (2018 + (i % 4).min(2)) as f64).collect::<Vec<_>>(),
                )),
            )
            .unwrap()
            .with_column(
                "x",
                ColumnData::Numeric(Array1::from((0..16).map(|i| i as f64).collect::<Vec<_>>())),
            )
            .unwrap();
        let panel = PanelIndexer::new(1)
            .index(&table, "Company_Code", "Year")
            .unwrap();
        assert_eq!(panel.n_rows(), 12);
        let x = panel.numeric("x").unwrap();
        assert_eq!(x[2], 2.0);
    }

    #[test]
    fn selecting_rows_regroups_entities() {
        let panel = PanelIndexer::new(1)
            .index(&balanced_table(4, &[2018, 2019, 2020, 2021]), "Company_Code", "Year")
            .unwrap();
        let subset = panel.select_rows(&[4, 5, 12, 13, 14]);
        assert_eq!(subset.entity_labels(), &["F01", "F03"]);
        assert_eq!(subset.groups(), &[0..2, 2..5]);
        assert_eq!(subset.entity_codes(), &[0, 0, 1, 1, 1]);
    }
}
