//! # Subset Selector
//!
//! Named sub-panels are described by a [`Predicate`] over one row at a time.
//! Selection returns a new [`Panel`] and never touches the source.

use crate::index::{Panel, PanelError};
use serde::{Deserialize, Serialize};

/// Inclusive range of years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearWindow {
    pub start: i64,
    pub end: i64,
}

impl YearWindow {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }
}

/// A row filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    /// Every row.
    Everything,
    /// Case-insensitive substring match against a text column. Missing
    /// labels never match.
    Contains { column: String, token: String },
    /// Inclusive numeric range. Missing values never match.
    Range { column: String, start: f64, end: f64 },
    Not { predicate: Box<Predicate> },
    All { predicates: Vec<Predicate> },
}

impl Predicate {
    pub fn contains(column: &str, token: &str) -> Self {
        Self::Contains {
            column: column.to_string(),
            token: token.to_string(),
        }
    }

    pub fn years(column: &str, window: YearWindow) -> Self {
        Self::Range {
            column: column.to_string(),
            start: window.start as f64,
            end: window.end as f64,
        }
    }

    pub fn negate(self) -> Self {
        Self::Not {
            predicate: Box::new(self),
        }
    }

    /// Evaluates the predicate for every row of `panel`.
    pub fn mask(&self, panel: &Panel) -> Result<Vec<bool>, PanelError> {
        let n = panel.n_rows();
        match self {
            Self::Everything => Ok(vec![true; n]),
            Self::Contains { column, token } => {
                let needle = token.to_lowercase();
                Ok(panel
                    .text(column)?
                    .iter()
                    .map(|label| {
                        label
                            .as_deref()
                            .is_some_and(|text| text.to_lowercase().contains(&needle))
                    })
                    .collect())
            }
            Self::Range { column, start, end } => Ok(panel
                .numeric(column)?
                .iter()
                .map(|&v| v >= *start && v <= *end)
                .collect()),
            Self::Not { predicate } => Ok(predicate.mask(panel)?.into_iter().map(|m| !m).collect()),
            Self::All { predicates } => {
                let mut mask = vec![true; n];
                for predicate in predicates {
                    for (slot, hit) in mask.iter_mut().zip(predicate.mask(panel)?) {
                        *slot &= hit;
                    }
                }
                Ok(mask)
            }
        }
    }

    /// Rows of `panel` satisfying the predicate, as a new panel.
    pub fn select(&self, panel: &Panel) -> Result<Panel, PanelError> {
        let rows: Vec<usize> = self
            .mask(panel)?
            .into_iter()
            .enumerate()
            .filter_map(|(row, keep)| keep.then_some(row))
            .collect();
        Ok(panel.select_rows(&rows))
    }
}

/// A labelled subset used to tag output rows and name output files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsetSpec {
    /// Human-readable label written into result tables.
    pub label: String,
    /// Short identifier used in file names.
    pub slug: String,
    pub predicate: Predicate,
}

impl SubsetSpec {
    pub fn new(label: &str, slug: &str, predicate: Predicate) -> Self {
        Self {
            label: label.to_string(),
            slug: slug.to_string(),
            predicate,
        }
    }
}

/// Parameters of the four standard subsets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubsetConfig {
    /// Token searched for in the sector label for the sector subset.
    pub sector_token: String,
    pub covid_window: YearWindow,
    /// When set, the non-COVID subset is further restricted to this window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub non_covid_outer: Option<YearWindow>,
}

impl Default for SubsetConfig {
    fn default() -> Self {
        Self {
            sector_token: "hotel".to_string(),
            covid_window: YearWindow::new(2020, 2021),
            non_covid_outer: Some(YearWindow::new(2008, 2024)),
        }
    }
}

impl SubsetConfig {
    pub fn full(&self) -> SubsetSpec {
        SubsetSpec::new("Full Period", "full", Predicate::Everything)
    }

    pub fn sector(&self, sector_column: &str) -> SubsetSpec {
        SubsetSpec::new(
            "Hotels Only",
            "hotels",
            Predicate::contains(sector_column, &self.sector_token),
        )
    }

    pub fn covid(&self, time_column: &str) -> SubsetSpec {
        SubsetSpec::new("COVID", "covid", Predicate::years(time_column, self.covid_window))
    }

    pub fn non_covid(&self, time_column: &str) -> SubsetSpec {
        let outside = Predicate::years(time_column, self.covid_window).negate();
        let predicate = match self.non_covid_outer {
            Some(outer) => Predicate::All {
                predicates: vec![outside, Predicate::years(time_column, outer)],
            },
            None => outside,
        };
        SubsetSpec::new("Non-COVID", "noncovid", predicate)
    }

    /// Full, COVID, non-COVID and sector subsets, in reporting order.
    pub fn standard(&self, time_column: &str, sector_column: &str) -> Vec<SubsetSpec> {
        vec![
            self.full(),
            self.covid(time_column),
            self.non_covid(time_column),
            self.sector(sector_column),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ColumnData;
    use crate::index::PanelIndexer;
    use crate::index::tests::balanced_table;

    fn panel_2015_2023() -> Panel {
        let years: Vec<i64> = (2015..=2023).collect();
        let table = balanced_table(4, &years);
        let sectors = (0..4 * years.len())
            .map(|row| match row / years.len() {
                0 => Some("Hotels & Motels".to_string()),
                1 => Some("Casinos".to_string()),
                2 => None,
                _ => Some("Luxury HOTEL groups".to_string()),
            })
            .collect();
        let table = table
            .with_column("Sector", ColumnData::Text(sectors))
            .unwrap();
        PanelIndexer::new(2)
            .index(&table, "Company_Code", "Year")
            .unwrap()
    }

    #[test]
    fn covid_and_non_covid_partition_the_panel() {
        let panel = panel_2015_2023();
        let config = SubsetConfig::default();
        let covid = config.covid("Year").predicate.select(&panel).unwrap();
        let rest = config.non_covid("Year").predicate.select(&panel).unwrap();
        assert_eq!(covid.n_rows() + rest.n_rows(), panel.n_rows());

        let covid_mask = config.covid("Year").predicate.mask(&panel).unwrap();
        let rest_mask = config.non_covid("Year").predicate.mask(&panel).unwrap();
        for (a, b) in covid_mask.iter().zip(&rest_mask) {
            assert!(a ^ b, "every row belongs to exactly one window");
        }
        assert!(covid.times().iter().all(|&t| (2020..=2021).contains(&t)));
    }

    #[test]
    fn outer_window_trims_the_complement() {
        let panel = panel_2015_2023();
        let config = SubsetConfig {
            non_covid_outer: Some(YearWindow::new(2016, 2022)),
            ..SubsetConfig::default()
        };
        let rest = config.non_covid("Year").predicate.select(&panel).unwrap();
        assert!(rest.times().iter().all(|&t| t != 2015 && t != 2023));
        assert_eq!(rest.n_rows(), 4 * 5);
    }

    #[test]
    fn sector_match_is_case_insensitive_and_skips_missing() {
        let panel = panel_2015_2023();
        let hotels = SubsetConfig::default()
            .sector("Sector")
            .predicate
            .select(&panel)
            .unwrap();
        assert_eq!(hotels.entity_labels(), &["F00", "F03"]);
        assert_eq!(hotels.n_rows(), 18);
    }

    #[test]
    fn selection_leaves_the_source_untouched() {
        let panel = panel_2015_2023();
        let before = panel.clone();
        let _ = SubsetConfig::default().covid("Year").predicate.select(&panel);
        assert_eq!(panel, before);
    }

    #[test]
    fn unknown_columns_are_reported() {
        let panel = panel_2015_2023();
        let err = Predicate::contains("Industry", "hotel")
            .select(&panel)
            .unwrap_err();
        assert_eq!(err, PanelError::UnknownColumn("Industry".to_string()));
    }
}
