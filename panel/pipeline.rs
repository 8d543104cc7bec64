//! # Batch Pipeline
//!
//! Turns one loaded table into every result table. Each family expands into
//! independent jobs (subset × outcome × lag); jobs read an immutable [`Panel`]
//! and return a private row, so they run on the rayon pool when the
//! configuration allows it. Rows come back in job order regardless of
//! scheduling.
//!
//! A job that cannot be estimated never aborts the batch: its row is written
//! with missing statistics and a status naming the reason. Only unresolvable
//! columns, a missing input file and output failures are fatal.

use crate::columns::{ColumnError, LogicalField};
use crate::config::{AnalysisConfig, ConfigError};
use crate::data::{DEBT_RATIO, DataError, LoadedData, load_table};
use crate::index::{Panel, PanelError, PanelIndexer};
use crate::lag::lagged_name;
use crate::report::{Cell, RecordStatus, ReportError, ResultTable, SkipError};
use crate::stats::covariance::{ClusterBy, CovarianceKind};
use crate::stats::describe;
use crate::stats::design::DesignMatrix;
use crate::stats::estimate::{EstimationError, EstimatorKind, FitOptions, PanelFit, fit};
use crate::stats::hausman::{HausmanComparison, hausman};
use crate::stats::residuals::{DiagnosticStatistic, diagnose};
use crate::stats::vif::{complete_matrix, variance_inflation};
use crate::subset::SubsetSpec;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use rayon::prelude::*;
use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;
use thiserror::Error;

const OUTCOMES: [LogicalField; 2] = [LogicalField::Roa, LogicalField::Niat];
const PILLARS: [LogicalField; 3] = [
    LogicalField::Environmental,
    LogicalField::Social,
    LogicalField::Governance,
];

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error("Failed to index the input table: {0}")]
    Panel(#[from] PanelError),
}

/// A group of result tables produced together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// Two-way FE of the outcomes on lagged ESG and controls.
    EsgFixedEffects,
    /// Same, with the three pillar scores in place of ESG.
    PillarFixedEffects,
    /// Control coefficients under two-way clustering.
    Controls,
    Hausman,
    /// Fit statistics and residual tests on the full panel.
    Diagnostics,
    Vif,
    Describe,
}

impl Family {
    pub const ALL: [Family; 7] = [
        Family::Describe,
        Family::EsgFixedEffects,
        Family::PillarFixedEffects,
        Family::Controls,
        Family::Hausman,
        Family::Diagnostics,
        Family::Vif,
    ];

    /// Fields that must resolve for the family to run at all.
    pub fn required_fields(self) -> &'static [LogicalField] {
        use LogicalField::*;
        match self {
            Self::EsgFixedEffects => &[Roa, Niat, Esg, Employees, Debt, Assets, Sector],
            Self::PillarFixedEffects => &[
                Roa,
                Niat,
                Environmental,
                Social,
                Governance,
                Employees,
                Debt,
                Assets,
                Sector,
            ],
            Self::Controls | Self::Hausman => &[Roa, Niat, Esg, Employees, Debt, Sector],
            Self::Diagnostics => &[Roa, Niat, Esg, Employees, Debt, Assets],
            Self::Vif => &[Esg, Employees, Debt, Sector],
            Self::Describe => &[],
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EsgFixedEffects => "ESG fixed effects",
            Self::PillarFixedEffects => "pillar fixed effects",
            Self::Controls => "controls",
            Self::Hausman => "Hausman",
            Self::Diagnostics => "diagnostics",
            Self::Vif => "VIF",
            Self::Describe => "descriptives",
        })
    }
}

/// A table written to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenTable {
    pub path: PathBuf,
    pub rows: usize,
    /// Rows whose status is not `ok`.
    pub skipped: usize,
}

struct Job<'a> {
    subset: &'a SubsetSpec,
    outcome: &'static str,
    lag: usize,
}

/// Observation and entity counts of the last stage a job reached.
#[derive(Debug, Clone, Copy, Default)]
struct Counts {
    nobs: usize,
    entities: usize,
}

struct Estimate {
    counts: Counts,
    fit: Result<PanelFit, SkipError>,
}

impl Estimate {
    fn status(&self) -> RecordStatus {
        match &self.fit {
            Ok(_) => RecordStatus::Ok,
            Err(err) => RecordStatus::from(err),
        }
    }

    fn coefficient(&self, name: &str) -> (Cell, Cell) {
        match &self.fit {
            Ok(fit) => (fit.param(name).into(), fit.pvalue(name).into()),
            Err(_) => (Cell::Missing, Cell::Missing),
        }
    }
}

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(10)
    } else {
        ProgressDrawTarget::hidden()
    };
    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    if let Ok(style) =
        ProgressStyle::with_template("> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(message.to_string());
    pb
}

/// The loaded data plus the panels derived from it.
pub struct Pipeline {
    config: AnalysisConfig,
    data: LoadedData,
    /// Every row with a valid key, for descriptives.
    full: Panel,
    /// Entities with at least `min_observations` rows.
    estimation: Panel,
    /// Entities with at least `hausman_min_observations` rows.
    hausman: Panel,
}

impl Pipeline {
    /// Loads `config.input_path` and prepares the panels.
    pub fn load(config: AnalysisConfig) -> Result<Self, PipelineError> {
        let data = load_table(&config.input_path, &config.aliases)?;
        Self::new(config, data)
    }

    pub fn new(config: AnalysisConfig, data: LoadedData) -> Result<Self, PipelineError> {
        let entity = data.require(LogicalField::Firm)?;
        let time = data.require(LogicalField::Year)?;
        let arrange = |min_observations: usize| {
            PanelIndexer::new(min_observations).arrange(&data.table, entity, time)
        };
        let full = arrange(1)?;
        let estimation = arrange(config.min_observations)?;
        let hausman = arrange(config.hausman_min_observations)?;
        log::info!(
            "Panel has {} entities over {} periods ({} rows); {} entities kept for estimation, {} for the Hausman appendix",
            full.n_entities(),
            full.n_periods(),
            full.n_rows(),
            estimation.n_entities(),
            hausman.n_entities()
        );
        Ok(Self {
            config,
            data,
            full,
            estimation,
            hausman,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Builds and writes the tables of every family in `families`.
    pub fn run(&self, families: &[Family]) -> Result<Vec<WrittenTable>, PipelineError> {
        for &family in families {
            for &field in family.required_fields() {
                self.data.require(field)?;
            }
        }
        let mut written = Vec::new();
        for &family in families {
            log::info!("Running {family}");
            for table in self.tables(family)? {
                let path = table.write_to(&self.config.output_dir)?;
                let skipped = skipped_rows(&table);
                log::info!(
                    "Wrote {} ({} rows, {} skipped)",
                    path.display(),
                    table.rows.len(),
                    skipped
                );
                written.push(WrittenTable {
                    path,
                    rows: table.rows.len(),
                    skipped,
                });
            }
        }
        Ok(written)
    }

    /// The result tables of one family, without writing them.
    pub fn tables(&self, family: Family) -> Result<Vec<ResultTable>, PipelineError> {
        for &field in family.required_fields() {
            self.data.require(field)?;
        }
        Ok(match family {
            Family::EsgFixedEffects => vec![self.esg_fixed_effects()],
            Family::PillarFixedEffects => vec![self.pillar_fixed_effects()],
            Family::Controls => self.controls(),
            Family::Hausman => vec![self.hausman_appendix()],
            Family::Diagnostics => vec![self.diagnostics()],
            Family::Vif => vec![self.vif_summary()],
            Family::Describe => self.descriptives(),
        })
    }

    fn execute<J: Sync, R: Send>(&self, family: Family, jobs: &[J], run: impl Fn(&J) -> R + Sync) -> Vec<R> {
        let bar = create_progress_bar(jobs.len() as u64, &family.to_string());
        let step = |job: &J| {
            let row = run(job);
            bar.inc(1);
            row
        };
        let rows: Vec<R> = if self.config.parallel {
            jobs.par_iter().map(step).collect()
        } else {
            jobs.iter().map(step).collect()
        };
        bar.finish_and_clear();
        rows
    }

    fn standard_subsets(&self) -> Vec<SubsetSpec> {
        self.config.subsets.standard(
            LogicalField::Year.canonical(),
            LogicalField::Sector.canonical(),
        )
    }

    /// Full and sector subsets, used by the Hausman and VIF families.
    fn appendix_subsets(&self) -> Vec<SubsetSpec> {
        let subsets = &self.config.subsets;
        vec![subsets.full(), subsets.sector(LogicalField::Sector.canonical())]
    }

    fn jobs<'a>(&self, subsets: &'a [SubsetSpec], lags: &[usize]) -> Vec<Job<'a>> {
        let mut jobs = Vec::new();
        for subset in subsets {
            for outcome in OUTCOMES {
                for &lag in lags {
                    jobs.push(Job {
                        subset,
                        outcome: outcome.canonical(),
                        lag,
                    });
                }
            }
        }
        jobs
    }

    /// Subset, lag and assemble the design of one job, recording how far it
    /// got in `counts`.
    fn prepare(
        &self,
        panel: &Panel,
        job: &Job<'_>,
        lagged: &[&str],
        regressors: &[String],
        counts: &mut Counts,
    ) -> Result<DesignMatrix, SkipError> {
        let subset = job.subset.predicate.select(panel)?;
        *counts = Counts {
            nobs: subset.n_rows(),
            entities: subset.n_entities(),
        };
        subset.check_estimable()?;
        let (subset, _) = subset.with_lags(lagged, job.lag, self.config.lag_mode)?;
        let design = DesignMatrix::from_panel(&subset, job.outcome, regressors)?;
        *counts = Counts {
            nobs: design.nobs(),
            entities: design.n_entities(),
        };
        design.check_estimable()?;
        Ok(design)
    }

    fn estimate(
        &self,
        job: &Job<'_>,
        lagged: &[&str],
        controls: &[&str],
        options: &FitOptions,
    ) -> Estimate {
        let regressors = regressor_names(lagged, controls, job.lag);
        let mut counts = Counts::default();
        let fit = self
            .prepare(&self.estimation, job, lagged, &regressors, &mut counts)
            .and_then(|design| Ok(fit(&design, options)?));
        if let Err(err) = &fit {
            log::debug!(
                "{} / {} / lag {} skipped: {err}",
                job.subset.label,
                job.outcome,
                job.lag
            );
        }
        Estimate { counts, fit }
    }

    fn fixed_effects_options(&self, cluster: ClusterBy) -> FitOptions {
        FitOptions::new(EstimatorKind::TWO_WAY, CovarianceKind::Clustered(cluster))
            .with_small_sample(self.config.small_sample)
    }

    fn esg_fixed_effects(&self) -> ResultTable {
        let esg = LogicalField::Esg.canonical();
        let controls = [LogicalField::Employees.canonical(), DEBT_RATIO];
        let options = self.fixed_effects_options(ClusterBy::Entity);
        let subsets = self.standard_subsets();
        let jobs = self.jobs(&subsets, &self.config.lags);

        let mut table = ResultTable::new(
            "results_model_a_panel_fe.csv",
            &[
                "Subset", "Outcome", "Lag", "N (obs)", "Entities", "R2_within", "coef_ESG",
                "p_ESG", "status",
            ],
        );
        for (job, estimate) in jobs.iter().zip(self.execute(
            Family::EsgFixedEffects,
            &jobs,
            |job| self.estimate(job, &[esg], &controls, &options),
        )) {
            let (coef, p) = estimate.coefficient(&lagged_name(esg, job.lag));
            table.push(vec![
                job.subset.label.as_str().into(),
                job.outcome.into(),
                job.lag.into(),
                estimate.counts.nobs.into(),
                estimate.counts.entities.into(),
                within_r2(&estimate),
                coef,
                p,
                estimate.status().to_string().into(),
            ]);
        }
        table
    }

    fn pillar_fixed_effects(&self) -> ResultTable {
        let pillars = PILLARS.map(LogicalField::canonical);
        let controls = [LogicalField::Employees.canonical(), DEBT_RATIO];
        let options = self.fixed_effects_options(ClusterBy::Entity);
        let subsets = self.standard_subsets();
        let jobs = self.jobs(&subsets, &self.config.lags);

        let mut table = ResultTable::new(
            "results_model_b_panel_fe.csv",
            &[
                "Subset", "Outcome", "Lag", "N (obs)", "Entities", "R2_within", "coef_E", "p_E",
                "coef_S", "p_S", "coef_G", "p_G", "status",
            ],
        );
        for (job, estimate) in jobs.iter().zip(self.execute(
            Family::PillarFixedEffects,
            &jobs,
            |job| self.estimate(job, &pillars, &controls, &options),
        )) {
            let mut row = vec![
                job.subset.label.as_str().into(),
                job.outcome.into(),
                job.lag.into(),
                estimate.counts.nobs.into(),
                estimate.counts.entities.into(),
                within_r2(&estimate),
            ];
            for pillar in pillars {
                let (coef, p) = estimate.coefficient(&lagged_name(pillar, job.lag));
                row.push(coef);
                row.push(p);
            }
            row.push(estimate.status().to_string().into());
            table.push(row);
        }
        table
    }

    fn controls(&self) -> Vec<ResultTable> {
        let esg = LogicalField::Esg.canonical();
        let employees = LogicalField::Employees.canonical();
        let debt = LogicalField::Debt.canonical();
        let covariance = ClusterBy::EntityTime;
        let options = self.fixed_effects_options(covariance);
        let subsets = self.standard_subsets();

        subsets
            .iter()
            .map(|subset| {
                let jobs = self.jobs(std::slice::from_ref(subset), &self.config.control_lags);
                let estimates = self.execute(Family::Controls, &jobs, |job| {
                    self.estimate(job, &[esg], &[employees, debt], &options)
                });
                let mut table = ResultTable::new(
                    &format!("controls_{}.csv", subset.slug),
                    &[
                        "panel", "outcome", "lag", "entities", "obs_used", "clustered_SEs",
                        "coef_Employees", "p_Employees", "coef_Debt", "p_Debt", "note",
                    ],
                );
                for (job, estimate) in jobs.iter().zip(estimates) {
                    let (coef_employees, p_employees) = estimate.coefficient(employees);
                    let (coef_debt, p_debt) = estimate.coefficient(debt);
                    table.push(vec![
                        subset.label.as_str().into(),
                        job.outcome.into(),
                        job.lag.into(),
                        estimate.counts.entities.into(),
                        estimate.counts.nobs.into(),
                        CovarianceKind::Clustered(covariance).to_string().into(),
                        coef_employees,
                        p_employees,
                        coef_debt,
                        p_debt,
                        estimate.status().to_string().into(),
                    ]);
                }
                table
            })
            .collect()
    }

    fn compare(&self, job: &Job<'_>) -> (HausmanComparison, RecordStatus) {
        let esg = LogicalField::Esg.canonical();
        let controls = [
            LogicalField::Employees.canonical(),
            LogicalField::Debt.canonical(),
        ];
        let regressors = regressor_names(&[esg], &controls, job.lag);
        let fe_options = FitOptions::new(EstimatorKind::TWO_WAY, CovarianceKind::Unadjusted);
        let re_options = FitOptions::new(EstimatorKind::RandomEffects, CovarianceKind::Unadjusted);

        let mut counts = Counts::default();
        let result = self
            .prepare(&self.hausman, job, &[esg], &regressors, &mut counts)
            .and_then(|design| {
                let (design, constant) = design.without_constant_columns();
                if !constant.is_empty() {
                    log::debug!("Dropped constant columns before the Hausman fits: {constant:?}");
                }
                let fe = fit(&design, &fe_options)?;
                let re = fit(&design, &re_options)?;
                Ok::<_, SkipError>(hausman(&fe, &re, self.config.significance))
            });
        match result {
            Ok(comparison) => (comparison, RecordStatus::Ok),
            Err(err) => {
                log::debug!(
                    "Hausman {} / {} / lag {} not available: {err}",
                    job.subset.slug,
                    job.outcome,
                    job.lag
                );
                (HausmanComparison::not_available(), RecordStatus::from(&err))
            }
        }
    }

    fn hausman_appendix(&self) -> ResultTable {
        let subsets = self.appendix_subsets();
        let jobs = self.jobs(&subsets, &self.config.lags);
        let mut table = ResultTable::new(
            "appendix_a1_hausman.csv",
            &[
                "sample", "outcome", "lag", "chi2", "df", "p", "decision", "pseudo_inverse",
                "status",
            ],
        );
        for (job, (comparison, status)) in jobs
            .iter()
            .zip(self.execute(Family::Hausman, &jobs, |job| self.compare(job)))
        {
            table.push(vec![
                job.subset.slug.as_str().into(),
                job.outcome.into(),
                job.lag.into(),
                ((comparison.statistic * 1e4).round() / 1e4).into(),
                comparison.df.into(),
                comparison.pvalue.into(),
                comparison.decision.to_string().into(),
                comparison.pseudo_inverse_used.into(),
                status.to_string().into(),
            ]);
        }
        table
    }

    fn diagnostics(&self) -> ResultTable {
        let regressors: Vec<String> = [
            LogicalField::Esg,
            LogicalField::Employees,
            LogicalField::Debt,
            LogicalField::Assets,
        ]
        .iter()
        .map(|field| field.canonical().to_string())
        .collect();
        let subsets = [self.config.subsets.full()];
        let jobs = self.jobs(&subsets, &[0]);
        let options = self.fixed_effects_options(ClusterBy::EntityTime);

        let mut table = ResultTable::new(
            "model_diagnostics.csv",
            &[
                "Dependent_Var", "Model", "Obs_used", "Entities", "Years", "R2_within",
                "R2_between", "R2_overall", "F_stat", "F_pval", "Wooldridge_stat",
                "Wooldridge_pval", "PesaranCD_stat", "PesaranCD_pval", "Wald_stat", "Wald_pval",
                "Covariance_PSD", "status",
            ],
        );
        let rows = self.execute(Family::Diagnostics, &jobs, |job| {
            let mut counts = Counts::default();
            let fit = self
                .prepare(&self.estimation, job, &[], &regressors, &mut counts)
                .and_then(|design| Ok((design.complete_periods(), fit(&design, &options)?)));
            (job.outcome, fit)
        });
        for (outcome, result) in rows {
            let mut row: Vec<Cell> = vec![outcome.into(), EstimatorKind::TWO_WAY.to_string().into()];
            match &result {
                Ok((years, fit)) => {
                    let tests = diagnose(&fit.residuals);
                    let summary: [Cell; 8] = [
                        fit.nobs.into(),
                        fit.n_entities.into(),
                        (*years).into(),
                        fit.rsquared.within.into(),
                        fit.rsquared.between.into(),
                        fit.rsquared.overall.into(),
                        fit.f_stat.statistic.into(),
                        fit.f_stat.pvalue.into(),
                    ];
                    row.extend(summary);
                    for test in [&tests.serial, &tests.cross_section, &tests.heteroskedasticity] {
                        row.extend(statistic_cells(test));
                    }
                    row.push(fit.covariance_psd.into());
                    row.push(RecordStatus::Ok.to_string().into());
                }
                Err(err) => {
                    row.extend(std::iter::repeat_n(Cell::Missing, 15));
                    row.push(RecordStatus::from(err).to_string().into());
                }
            }
            table.push(row);
        }
        table
    }

    fn vif_rows(&self, job: &Job<'_>, spec: &str, lagged: &[&str]) -> Vec<Vec<Cell>> {
        let controls = [
            LogicalField::Employees.canonical(),
            LogicalField::Debt.canonical(),
        ];
        let names = regressor_names(lagged, &controls, job.lag);
        let result = job
            .subset
            .predicate
            .select(&self.full)
            .and_then(|subset| subset.with_lags(lagged, job.lag, self.config.lag_mode))
            .and_then(|(subset, _)| complete_matrix(&subset, &names))
            .map_err(SkipError::from)
            .and_then(|x| Ok(variance_inflation(x.view(), &names, self.config.vif_intercept)?));
        match result {
            Ok(vif) => vif
                .entries
                .iter()
                .map(|entry| {
                    vec![
                        job.subset.slug.as_str().into(),
                        job.lag.into(),
                        spec.into(),
                        entry.variable.as_str().into(),
                        entry.vif.into(),
                        vif.mean.into(),
                        vif.max.into(),
                    ]
                })
                .collect(),
            Err(SkipError::Estimation(EstimationError::EmptyDesign)) => Vec::new(),
            Err(err) => {
                log::warn!(
                    "VIF {} / {spec} / lag {} not computed: {err}",
                    job.subset.slug,
                    job.lag
                );
                Vec::new()
            }
        }
    }

    fn vif_summary(&self) -> ResultTable {
        let esg = [LogicalField::Esg.canonical()];
        let pillars = PILLARS.map(LogicalField::canonical);
        let has_pillars = PILLARS.iter().all(|&field| self.data.has(field));
        let subsets = self.appendix_subsets();
        let jobs: Vec<Job<'_>> = subsets
            .iter()
            .flat_map(|subset| {
                self.config.lags.iter().map(move |&lag| Job {
                    subset,
                    outcome: "",
                    lag,
                })
            })
            .collect();

        let mut table = ResultTable::new(
            "vif_summary.csv",
            &["sample", "lag", "spec", "variable", "vif", "mean_vif", "max_vif"],
        );
        let blocks = self.execute(Family::Vif, &jobs, |job| {
            let mut rows = self.vif_rows(job, "ESG", &esg);
            if has_pillars {
                rows.extend(self.vif_rows(job, "Pillars", &pillars));
            }
            rows
        });
        for row in blocks.into_iter().flatten() {
            table.push(row);
        }
        table
    }

    fn descriptives(&self) -> Vec<ResultTable> {
        let present = |fields: &[LogicalField]| -> Vec<&'static str> {
            fields
                .iter()
                .filter(|&&field| self.data.has(field))
                .map(|field| field.canonical())
                .collect()
        };
        use LogicalField::*;
        let summary_columns = present(&[Esg, Roa, Niat, Employees, Debt]);
        let correlation_columns = present(&[
            Roa, Niat, Environmental, Social, Governance, Esg, Employees, Assets, Debt,
        ]);
        let trend_columns = present(&[Esg, Environmental, Social, Governance]);
        let mut availability_columns: Vec<&str> = LogicalField::ALL
            .iter()
            .filter(|field| !field.is_text() && **field != Year && self.data.has(**field))
            .map(|field| field.canonical())
            .collect();
        if self.data.table.column(DEBT_RATIO).is_some() {
            availability_columns.push(DEBT_RATIO);
        }

        let has_sector = self.data.has(Sector);
        let subsets: Vec<SubsetSpec> = if has_sector {
            self.standard_subsets()
        } else {
            let s = &self.config.subsets;
            let time = Year.canonical();
            vec![s.full(), s.covid(time), s.non_covid(time)]
        };

        let mut tables = Vec::new();
        let mut overview = ResultTable::new(
            "sample_overview.csv",
            &["label", "entities", "obs", "years_min", "years_max", "years_span"],
        );
        for subset in &subsets {
            let panel = match subset.predicate.select(&self.full) {
                Ok(panel) => panel,
                Err(err) => {
                    log::warn!("Subset '{}' could not be selected: {err}", subset.label);
                    continue;
                }
            };
            let o = describe::overview(&subset.label, &panel);
            overview.push(vec![
                o.label.into(),
                o.entities.into(),
                o.obs.into(),
                o.years_min.into(),
                o.years_max.into(),
                o.years_span.into(),
            ]);

            let mut desc = ResultTable::new(
                &format!("desc_{}.csv", subset.slug),
                &["variable", "n", "mean", "sd", "min", "q1", "median", "q3", "max"],
            );
            match describe::summarize(&panel, &summary_columns) {
                Ok(rows) => {
                    for s in rows {
                        desc.push(vec![
                            s.variable.into(),
                            s.n.into(),
                            s.mean.into(),
                            s.sd.into(),
                            s.min.into(),
                            s.q1.into(),
                            s.median.into(),
                            s.q3.into(),
                            s.max.into(),
                        ]);
                    }
                }
                Err(err) => log::warn!("Descriptives for '{}' failed: {err}", subset.label),
            }
            tables.push(desc);
        }
        tables.insert(0, overview);

        if has_sector {
            let mut sectors = ResultTable::new("sector_breakdown.csv", &["sector", "entities", "obs"]);
            match describe::sector_breakdown(&self.full, Sector.canonical()) {
                Ok(rows) => {
                    for s in rows {
                        sectors.push(vec![s.sector.into(), s.entities.into(), s.obs.into()]);
                    }
                }
                Err(err) => log::warn!("Sector breakdown failed: {err}"),
            }
            tables.push(sectors);
        }

        match describe::correlation_matrix(&self.full, &correlation_columns) {
            Ok(corr) => {
                let mut header = vec!["variable".to_string()];
                header.extend(corr.names.iter().cloned());
                let mut table = ResultTable::new("correlation_matrix.csv", &header);
                for (name, values) in corr.names.iter().zip(corr.values.rows()) {
                    let mut row: Vec<Cell> = vec![name.as_str().into()];
                    row.extend(values.iter().map(|&v| Cell::from(v)));
                    table.push(row);
                }
                tables.push(table);
            }
            Err(err) => log::warn!("Correlation matrix failed: {err}"),
        }

        match describe::availability(&self.full, &availability_columns) {
            Ok(rows) => {
                let mut table = ResultTable::new(
                    "variable_availability.csv",
                    &["variable", "non_null", "missing", "pct_available"],
                );
                for a in rows {
                    table.push(vec![
                        a.variable.into(),
                        a.non_null.into(),
                        a.missing.into(),
                        a.pct_available.into(),
                    ]);
                }
                tables.push(table);
            }
            Err(err) => log::warn!("Availability table failed: {err}"),
        }

        match describe::trend_by_year(&self.full, &trend_columns) {
            Ok(rows) => {
                let mut header = vec!["year"];
                header.extend(trend_columns.iter().copied());
                let mut table = ResultTable::new("trend_by_year.csv", &header);
                for t in rows {
                    let mut row: Vec<Cell> = vec![t.year.into()];
                    row.extend(t.means.into_iter().map(Cell::from));
                    table.push(row);
                }
                tables.push(table);
            }
            Err(err) => log::warn!("Yearly trend failed: {err}"),
        }
        tables
    }
}

fn regressor_names(lagged: &[&str], controls: &[&str], lag: usize) -> Vec<String> {
    lagged
        .iter()
        .map(|column| lagged_name(column, lag))
        .chain(controls.iter().map(|column| column.to_string()))
        .collect()
}

fn within_r2(estimate: &Estimate) -> Cell {
    match &estimate.fit {
        Ok(fit) => fit.rsquared.within.into(),
        Err(_) => Cell::Missing,
    }
}

fn statistic_cells(test: &DiagnosticStatistic) -> [Cell; 2] {
    [test.statistic.into(), test.pvalue.into()]
}

fn skipped_rows(table: &ResultTable) -> usize {
    let ok = RecordStatus::Ok.to_string();
    table
        .position("status")
        .or_else(|| table.position("note"))
        .map_or(0, |column| {
            table
                .rows
                .iter()
                .filter(|row| !matches!(&row[column], Cell::Text(text) if *text == ok))
                .count()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ColumnData, FlatTable};
    use ndarray::Array1;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, Normal};

    /// Twelve firms over 2012–2023, four of them hotels.
    fn synthetic_data() -> LoadedData {
        let mut rng = StdRng::seed_from_u64(11);
        let noise = Normal::new(0.0, 1.0).unwrap();
        let years: Vec<i64> = (2012..=2023).collect();
        let (mut firm, mut year, mut sector) = (Vec::new(), Vec::new(), Vec::new());
        let mut numeric: Vec<Vec<f64>> = vec![Vec::new(); 9];
        for e in 0..12 {
            let effect = noise.sample(&mut rng);
            for &y in &years {
                firm.push(Some(format!("C{e:02}")));
                year.push(y as f64);
                sector.push(Some(if e < 4 { "Hotels" } else { "Restaurants" }.to_string()));
                let esg = 50.0 + 10.0 * noise.sample(&mut rng);
                let pillars = [
                    esg + noise.sample(&mut rng),
                    esg + noise.sample(&mut rng),
                    esg + noise.sample(&mut rng),
                ];
                let employees = 100.0 + 20.0 * noise.sample(&mut rng);
                let assets = 1000.0 + 100.0 * noise.sample(&mut rng);
                let debt = 400.0 + 50.0 * noise.sample(&mut rng);
                let roa = 0.02 * esg + effect + noise.sample(&mut rng);
                let niat = 3.0 * roa + noise.sample(&mut rng);
                for (slot, v) in numeric.iter_mut().zip([
                    roa, niat, esg, pillars[0], pillars[1], pillars[2], employees, debt, assets,
                ]) {
                    slot.push(v);
                }
            }
        }
        let names = [
            "ROA",
            "NIAT",
            "ESG_Score",
            "Environmental_Score",
            "Social_Score",
            "Governance_Score",
            "Employees",
            "Debt",
            "Assets",
        ];
        let mut table = FlatTable::new()
            .with_column("Company_Code", ColumnData::Text(firm))
            .unwrap()
            .with_column("Year", ColumnData::Numeric(Array1::from(year)))
            .unwrap()
            .with_column("Sector", ColumnData::Text(sector))
            .unwrap();
        for (name, values) in names.iter().zip(numeric) {
            table = table
                .with_column(name, ColumnData::Numeric(Array1::from(values)))
                .unwrap();
        }
        loaded(table.with_ratio(DEBT_RATIO, "Debt", "Assets").unwrap())
    }

    fn loaded(table: FlatTable) -> LoadedData {
        let headers: Vec<String> = table.names().map(str::to_string).collect();
        let resolved = crate::columns::AliasTable::default().resolve(&headers);
        LoadedData { table, resolved }
    }

    /// Four firms over 2018–2021 whose two-way residuals cancel within every
    /// firm and every year, plus a fifth firm complete only in 2016.
    fn offsetting_residual_data() -> LoadedData {
        let mut rng = StdRng::seed_from_u64(5);
        let noise = Normal::new(0.0, 1.0).unwrap();
        let pattern = [1.0, 1.0, -2.0, 0.0];
        let shock = |e: usize, t: usize| match (e, t) {
            (0, 0) | (1, 1) => 1.0,
            (0, 1) | (1, 0) => -1.0,
            _ => 0.0,
        };
        let (mut firm, mut year) = (Vec::new(), Vec::new());
        let mut numeric: Vec<Vec<f64>> = vec![Vec::new(); 6];
        let mut controls = [[[0.0; 4]; 4]; 3];
        for grid in controls.iter_mut() {
            for row in grid.iter_mut() {
                for cell in row.iter_mut() {
                    *cell = 10.0 * noise.sample(&mut rng);
                }
            }
            // Orthogonal to the residual pattern.
            grid[1][1] = grid[0][1] + grid[1][0] - grid[0][0];
        }
        for e in 0..4 {
            for t in 0..4 {
                firm.push(Some(format!("C{e:02}")));
                year.push((2018 + t) as f64);
                let esg = 50.0 + 5.0 * pattern[e] * pattern[t] + 3.0 * e as f64 + t as f64;
                let [employees, debt, assets] = controls.map(|grid| grid[e][t]);
                let roa = 0.02 * esg + 0.01 * employees - 0.005 * debt + e as f64 - 0.5 * t as f64
                    + shock(e, t);
                for (slot, v) in numeric
                    .iter_mut()
                    .zip([roa, 3.0 * roa, esg, employees, debt, assets])
                {
                    slot.push(v);
                }
            }
        }
        for (y, complete) in [(2016.0, true), (2017.0, false)] {
            firm.push(Some("C04".to_string()));
            year.push(y);
            let outcome = if complete { 1.0 } else { f64::NAN };
            for (slot, v) in numeric
                .iter_mut()
                .zip([outcome, outcome, 55.0, 1.0, 2.0, 3.0])
            {
                slot.push(v);
            }
        }
        let mut table = FlatTable::new()
            .with_column("Company_Code", ColumnData::Text(firm))
            .unwrap()
            .with_column("Year", ColumnData::Numeric(Array1::from(year)))
            .unwrap();
        for (name, values) in ["ROA", "NIAT", "ESG_Score", "Employees", "Debt", "Assets"]
            .iter()
            .zip(numeric)
        {
            table = table
                .with_column(name, ColumnData::Numeric(Array1::from(values)))
                .unwrap();
        }
        loaded(table)
    }

    fn pipeline(parallel: bool) -> Pipeline {
        let config = AnalysisConfig {
            parallel,
            ..AnalysisConfig::default()
        };
        Pipeline::new(config, synthetic_data()).unwrap()
    }

    fn column<'a>(table: &'a ResultTable, name: &str) -> Vec<&'a Cell> {
        let index = table.position(name).unwrap();
        table.rows.iter().map(|row| &row[index]).collect()
    }

    #[test]
    fn esg_family_covers_every_job_in_order() {
        let table = &pipeline(true).tables(Family::EsgFixedEffects).unwrap()[0];
        assert_eq!(table.rows.len(), 4 * 2 * 4);
        let subsets = column(table, "Subset");
        assert_eq!(subsets[0], &Cell::from("Full Period"));
        assert_eq!(subsets[8], &Cell::from("COVID"));
        assert_eq!(subsets[31], &Cell::from("Hotels Only"));

        let status = column(table, "status");
        assert_eq!(status[0], &Cell::from("ok"));
        // Two years cannot support a lag of two periods within the window.
        assert_eq!(status[8 + 2], &Cell::from("skipped: insufficient panel"));
    }

    #[test]
    fn parallel_and_sequential_runs_agree() {
        let a = pipeline(true).tables(Family::Controls).unwrap();
        let b = pipeline(false).tables(Family::Controls).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
        assert_eq!(a[0].file_name, "controls_full.csv");
        assert_eq!(column(&a[0], "clustered_SEs")[0], &Cell::from("entity+year"));
    }

    #[test]
    fn hausman_rows_carry_a_decision() {
        let table = &pipeline(true).tables(Family::Hausman).unwrap()[0];
        assert_eq!(table.rows.len(), 2 * 2 * 4);
        for decision in column(table, "decision") {
            assert!(matches!(decision, Cell::Text(d) if d == "FE" || d == "RE" || d == "NA"));
        }
        assert_eq!(column(table, "df")[0], &Cell::from(3usize));
    }

    #[test]
    fn diagnostics_report_residual_tests() {
        let table = &pipeline(false).tables(Family::Diagnostics).unwrap()[0];
        assert_eq!(table.rows.len(), 2);
        assert_eq!(column(table, "Model")[0], &Cell::from("FE (entity + time)"));
        assert_eq!(column(table, "Obs_used")[0], &Cell::from(144usize));
        assert!(matches!(column(table, "Wooldridge_stat")[0], Cell::Float(v) if v.is_finite()));
    }

    #[test]
    fn diagnostics_flag_an_indefinite_two_way_covariance() {
        let pipeline = Pipeline::new(AnalysisConfig::default(), offsetting_residual_data()).unwrap();
        let table = &pipeline.tables(Family::Diagnostics).unwrap()[0];
        assert_eq!(column(table, "status"), vec![&Cell::from("ok"); 2]);
        assert_eq!(column(table, "Covariance_PSD"), vec![&Cell::from(false); 2]);
        // C04 is dropped as a singleton but its year still counts.
        assert_eq!(column(table, "Obs_used")[0], &Cell::from(16usize));
        assert_eq!(column(table, "Entities")[0], &Cell::from(4usize));
        assert_eq!(column(table, "Years")[0], &Cell::from(5usize));
    }

    #[test]
    fn vif_summary_includes_both_blocks() {
        let table = &pipeline(true).tables(Family::Vif).unwrap()[0];
        let specs = column(table, "spec");
        assert!(specs.contains(&&Cell::from("ESG")));
        assert!(specs.contains(&&Cell::from("Pillars")));
        for vif in column(table, "vif") {
            assert!(matches!(vif, Cell::Float(v) if *v >= 1.0));
        }
    }

    #[test]
    fn descriptives_cover_subsets_and_tables() {
        let tables = pipeline(true).tables(Family::Describe).unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.file_name.as_str()).collect();
        for expected in [
            "sample_overview.csv",
            "desc_full.csv",
            "desc_hotels.csv",
            "sector_breakdown.csv",
            "correlation_matrix.csv",
            "variable_availability.csv",
            "trend_by_year.csv",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
        assert_eq!(tables[0].rows.len(), 4);
    }

    #[test]
    fn missing_required_field_is_fatal() {
        let mut data = synthetic_data();
        let headers: Vec<String> = data
            .table
            .names()
            .filter(|name| *name != "NIAT")
            .map(str::to_string)
            .collect();
        data.resolved = crate::columns::AliasTable::default().resolve(&headers);
        let pipeline = Pipeline::new(AnalysisConfig::default(), data).unwrap();
        let err = pipeline.tables(Family::Controls).unwrap_err();
        assert!(matches!(err, PipelineError::Column(_)));
        assert!(pipeline.tables(Family::Describe).is_ok());
    }
}
