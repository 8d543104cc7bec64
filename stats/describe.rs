//! Descriptive tables over an indexed panel: per-variable summaries,
//! pairwise-complete correlations, availability counts, sample overviews,
//! sector composition and yearly means.

use crate::index::{Panel, PanelError};
use crate::stats::linalg::{nan_mean, nan_variance, pearson_complete};
use ndarray::Array2;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub variable: String,
    pub n: usize,
    pub mean: f64,
    pub sd: f64,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

/// Quantile `p` of ascending `sorted` data, interpolating linearly between
/// neighbouring order statistics.
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let position = p.clamp(0.0, 1.0) * (n - 1) as f64;
            let lower = position.floor() as usize;
            let upper = position.ceil() as usize;
            let weight = position - lower as f64;
            sorted[lower] + weight * (sorted[upper] - sorted[lower])
        }
    }
}

/// Summary of the finite values of one series.
pub fn summarize_values(variable: &str, values: &[f64]) -> Summary {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    finite.sort_by(f64::total_cmp);
    Summary {
        variable: variable.to_string(),
        n: finite.len(),
        mean: nan_mean(&finite),
        sd: nan_variance(&finite).sqrt(),
        min: finite.first().copied().unwrap_or(f64::NAN),
        q1: quantile_sorted(&finite, 0.25),
        median: quantile_sorted(&finite, 0.5),
        q3: quantile_sorted(&finite, 0.75),
        max: finite.last().copied().unwrap_or(f64::NAN),
    }
}

pub fn summarize<S: AsRef<str>>(panel: &Panel, columns: &[S]) -> Result<Vec<Summary>, PanelError> {
    columns
        .iter()
        .map(|name| {
            let values = panel.numeric_view(name.as_ref())?;
            Ok(summarize_values(name.as_ref(), &values.to_vec()))
        })
        .collect()
}

/// Pearson correlations where each pair uses only the rows on which both
/// columns are present.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationMatrix {
    pub names: Vec<String>,
    pub values: Array2<f64>,
    /// Number of complete pairs behind each entry.
    pub pairs: Array2<usize>,
}

pub fn correlation_matrix<S: AsRef<str>>(
    panel: &Panel,
    columns: &[S],
) -> Result<CorrelationMatrix, PanelError> {
    let data = columns
        .iter()
        .map(|name| panel.numeric_view(name.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    let k = data.len();
    let mut values = Array2::from_elem((k, k), f64::NAN);
    let mut pairs = Array2::zeros((k, k));
    for i in 0..k {
        for j in i..k {
            let (r, n) = pearson_complete(data[i], data[j]);
            let r = if i == j && n >= 2 && r.is_finite() { 1.0 } else { r };
            values[[i, j]] = r;
            values[[j, i]] = r;
            pairs[[i, j]] = n;
            pairs[[j, i]] = n;
        }
    }
    Ok(CorrelationMatrix {
        names: columns.iter().map(|c| c.as_ref().to_string()).collect(),
        values,
        pairs,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct Availability {
    pub variable: String,
    pub non_null: usize,
    pub missing: usize,
    /// Percentage of rows with a value, 0 to 100.
    pub pct_available: f64,
}

pub fn availability<S: AsRef<str>>(
    panel: &Panel,
    columns: &[S],
) -> Result<Vec<Availability>, PanelError> {
    let rows = panel.n_rows();
    columns
        .iter()
        .map(|name| {
            let values = panel.numeric_view(name.as_ref())?;
            let non_null = values.iter().filter(|v| v.is_finite()).count();
            Ok(Availability {
                variable: name.as_ref().to_string(),
                non_null,
                missing: rows - non_null,
                pct_available: if rows == 0 {
                    f64::NAN
                } else {
                    100.0 * non_null as f64 / rows as f64
                },
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleOverview {
    pub label: String,
    pub entities: usize,
    pub obs: usize,
    pub years_min: Option<i64>,
    pub years_max: Option<i64>,
    /// Inclusive count of calendar years between the first and last.
    pub years_span: Option<i64>,
}

pub fn overview(label: &str, panel: &Panel) -> SampleOverview {
    let years_min = panel.times().iter().copied().min();
    let years_max = panel.times().iter().copied().max();
    SampleOverview {
        label: label.to_string(),
        entities: panel.n_entities(),
        obs: panel.n_rows(),
        years_min,
        years_max,
        years_span: years_min.zip(years_max).map(|(lo, hi)| hi - lo + 1),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectorCount {
    /// `None` collects the rows without a sector label.
    pub sector: Option<String>,
    pub entities: usize,
    pub obs: usize,
}

/// Rows and distinct entities per sector, largest sector first.
pub fn sector_breakdown(panel: &Panel, sector_column: &str) -> Result<Vec<SectorCount>, PanelError> {
    let sectors = panel.text(sector_column)?;
    let mut counts: BTreeMap<Option<&str>, (BTreeSet<usize>, usize)> = BTreeMap::new();
    for (sector, &entity) in sectors.iter().zip(panel.entity_codes()) {
        let slot = counts.entry(sector.as_deref()).or_default();
        slot.0.insert(entity);
        slot.1 += 1;
    }
    let mut rows: Vec<SectorCount> = counts
        .into_iter()
        .map(|(sector, (entities, obs))| SectorCount {
            sector: sector.map(str::to_string),
            entities: entities.len(),
            obs,
        })
        .collect();
    rows.sort_by(|a, b| b.obs.cmp(&a.obs));
    Ok(rows)
}

#[derive(Debug, Clone, PartialEq)]
pub struct YearTrend {
    pub year: i64,
    /// Mean of each requested column in that year, in request order.
    pub means: Vec<f64>,
}

pub fn trend_by_year<S: AsRef<str>>(panel: &Panel, columns: &[S]) -> Result<Vec<YearTrend>, PanelError> {
    let data = columns
        .iter()
        .map(|name| panel.numeric_view(name.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    let mut by_year: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (row, &year) in panel.times().iter().enumerate() {
        by_year.entry(year).or_default().push(row);
    }
    Ok(by_year
        .into_iter()
        .map(|(year, rows)| YearTrend {
            year,
            means: data
                .iter()
                .map(|column| nan_mean(rows.iter().map(|&r| &column[r])))
                .collect(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ColumnData;
    use crate::index::PanelIndexer;
    use crate::index::tests::balanced_table;
    use approx::assert_abs_diff_eq;
    use ndarray::Array1;

    fn panel() -> Panel {
        let table = balanced_table(3, &[2018, 2019, 2020, 2021]);
        let sectors = (0..12)
            .map(|row| match row / 4 {
                0 => Some("Hotels".to_string()),
                1 => None,
                _ => Some("Airlines".to_string()),
            })
            .collect();
        let mut z: Vec<f64> = (0..12).map(|v| v as f64 * 0.5).collect();
        z[1] = f64::NAN;
        z[7] = f64::NAN;
        let table = table
            .with_column("Sector", ColumnData::Text(sectors))
            .unwrap()
            .with_column("z", ColumnData::Numeric(Array1::from(z)))
            .unwrap();
        PanelIndexer::new(2)
            .index(&table, "Company_Code", "Year")
            .unwrap()
    }

    #[test]
    fn quantiles_interpolate_linearly() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_abs_diff_eq!(quantile_sorted(&sorted, 0.25), 1.75);
        assert_abs_diff_eq!(quantile_sorted(&sorted, 0.5), 2.5);
        assert_abs_diff_eq!(quantile_sorted(&sorted, 0.75), 3.25);
        assert!(quantile_sorted(&[], 0.5).is_nan());
    }

    #[test]
    fn summary_skips_missing_values() {
        let s = summarize_values("v", &[4.0, f64::NAN, 1.0, 3.0, 2.0]);
        assert_eq!(s.n, 4);
        assert_abs_diff_eq!(s.mean, 2.5);
        assert_abs_diff_eq!(s.sd, (5.0_f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_eq!((s.min, s.max), (1.0, 4.0));
        assert_abs_diff_eq!(s.median, 2.5);
    }

    #[test]
    fn correlations_use_complete_pairs() {
        let panel = panel();
        let corr = correlation_matrix(&panel, &["x", "z"]).unwrap();
        assert_eq!(corr.pairs[[0, 1]], 10);
        assert_eq!(corr.pairs[[0, 0]], 12);
        assert_abs_diff_eq!(corr.values[[0, 0]], 1.0);
        assert_abs_diff_eq!(corr.values[[0, 1]], corr.values[[1, 0]]);
    }

    #[test]
    fn availability_counts_missing_cells() {
        let panel = panel();
        let rows = availability(&panel, &["x", "z"]).unwrap();
        assert_eq!(rows[1].non_null, 10);
        assert_eq!(rows[1].missing, 2);
        assert_abs_diff_eq!(rows[0].pct_available, 100.0);
    }

    #[test]
    fn overview_and_sectors_describe_the_sample() {
        let panel = panel();
        let o = overview("Full Period", &panel);
        assert_eq!((o.entities, o.obs), (3, 12));
        assert_eq!(o.years_span, Some(4));

        let sectors = sector_breakdown(&panel, "Sector").unwrap();
        assert_eq!(sectors.len(), 3);
        assert!(sectors.iter().all(|s| s.obs == 4 && s.entities == 1));
        assert!(sectors.iter().any(|s| s.sector.is_none()));
    }

    #[test]
    fn yearly_means_follow_calendar_order() {
        let panel = panel();
        let trend = trend_by_year(&panel, &["x"]).unwrap();
        let years: Vec<i64> = trend.iter().map(|t| t.year).collect();
        assert_eq!(years, vec![2018, 2019, 2020, 2021]);
        // x = 10 * entity + period index, so the 2018 mean is (0 + 10 + 20) / 3.
        assert_abs_diff_eq!(trend[0].means[0], 10.0);
    }
}
