#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use esgpanel::config::AnalysisConfig;
use esgpanel::lag::LagMode;
use esgpanel::pipeline::{Family, Pipeline, WrittenTable};

/// Flags shared by every estimation subcommand. Each one overrides the
/// matching field of the configuration file.
#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// TOML configuration file (defaults are used when omitted)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Firm-year CSV to analyse
    #[arg(long, value_name = "CSV")]
    data: Option<PathBuf>,

    /// Directory receiving the result tables
    #[arg(long, value_name = "DIR")]
    out: Option<PathBuf>,

    /// How lagged regressors find the previous observation
    #[arg(long, value_enum)]
    lag_mode: Option<LagMode>,

    /// Run the batch jobs on a single thread
    #[arg(long)]
    sequential: bool,
}

impl RunArgs {
    fn resolve(&self) -> Result<AnalysisConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => AnalysisConfig::load(path)?,
            None => AnalysisConfig::default(),
        };
        if let Some(data) = &self.data {
            config.input_path = data.clone();
        }
        if let Some(out) = &self.out {
            config.output_dir = out.clone();
        }
        if let Some(mode) = self.lag_mode {
            config.lag_mode = mode;
        }
        if self.sequential {
            config.parallel = false;
        }
        Ok(config)
    }
}

#[derive(Parser)]
#[command(
    name = "esgpanel",
    about = "Panel econometrics for ESG and firm performance",
    long_about = "Estimates fixed- and random-effects panel regressions of firm \
                 performance on lagged ESG scores, with clustered standard errors, \
                 Hausman comparisons, residual diagnostics, VIF and descriptive tables."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every estimation family and the descriptive tables
    #[command(about = "Run all analyses (outputs: every result table)")]
    Run(RunArgs),

    /// Two-way fixed effects of performance on lagged ESG and on lagged pillars
    #[command(about = "ESG and pillar fixed-effects models (outputs: results_model_*_panel_fe.csv)")]
    FixedEffects(RunArgs),

    /// Fixed effects with entity and year clustering, reporting the controls
    #[command(about = "Control-variable models (outputs: controls_*.csv)")]
    Controls(RunArgs),

    /// Fixed versus random effects comparison
    #[command(about = "Hausman appendix (outputs: appendix_a1_hausman.csv)")]
    Hausman(RunArgs),

    /// Fit statistics and residual tests of the full-panel models
    #[command(about = "Residual diagnostics (outputs: model_diagnostics.csv)")]
    Diagnostics(RunArgs),

    /// Variance inflation factors of the regressor blocks
    #[command(about = "Multicollinearity check (outputs: vif_summary.csv)")]
    Vif(RunArgs),

    /// Summaries, correlations and sample composition
    #[command(about = "Descriptive statistics (outputs: sample_overview.csv, desc_*.csv, ...)")]
    Describe(RunArgs),

    /// Write the default configuration so it can be edited
    #[command(about = "Write a default configuration file")]
    InitConfig {
        /// Destination of the TOML file
        #[arg(value_name = "PATH", default_value = "esgpanel.toml")]
        path: PathBuf,

        /// Replace the file if it already exists
        #[arg(long)]
        force: bool,
    },

    /// Display version and build information
    #[command(about = "Display version and build information")]
    Version,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Run(args)) => run_families(&args, &Family::ALL),
        Some(Commands::FixedEffects(args)) => run_families(
            &args,
            &[Family::EsgFixedEffects, Family::PillarFixedEffects],
        ),
        Some(Commands::Controls(args)) => run_families(&args, &[Family::Controls]),
        Some(Commands::Hausman(args)) => run_families(&args, &[Family::Hausman]),
        Some(Commands::Diagnostics(args)) => run_families(&args, &[Family::Diagnostics]),
        Some(Commands::Vif(args)) => run_families(&args, &[Family::Vif]),
        Some(Commands::Describe(args)) => run_families(&args, &[Family::Describe]),
        Some(Commands::InitConfig { path, force }) => init_config(path, force),
        Some(Commands::Version) => {
            print_version_info();
            Ok(())
        }
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_families(args: &RunArgs, families: &[Family]) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.resolve()?;
    println!("Input:  {}", config.input_path.display());
    println!("Output: {}", config.output_dir.display());
    println!(
        "Lags {:?} ({} mode), control lags {:?}",
        config.lags, config.lag_mode, config.control_lags
    );

    let pipeline = Pipeline::load(config)?;
    let written = pipeline.run(families)?;
    print_summary(&written);
    Ok(())
}

fn print_summary(written: &[WrittenTable]) {
    println!("\nWrote {} tables:", written.len());
    for table in written {
        if table.skipped == 0 {
            println!("  {} ({} rows)", table.path.display(), table.rows);
        } else {
            println!(
                "  {} ({} rows, {} skipped)",
                table.path.display(),
                table.rows,
                table.skipped
            );
        }
    }
    let skipped: usize = written.iter().map(|t| t.skipped).sum();
    if skipped > 0 {
        println!("{skipped} rows could not be estimated; see their status column.");
    }
}

fn init_config(path: PathBuf, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() && !force {
        return Err(format!(
            "'{}' already exists; pass --force to replace it",
            path.display()
        )
        .into());
    }
    AnalysisConfig::default().save(&path)?;
    println!("Default configuration written to {}", path.display());
    Ok(())
}

/// Format seconds into a human-readable duration like "2.4 hours ago"
fn format_duration_ago(seconds: u64) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;

    if seconds < MINUTE {
        format!("{seconds} seconds ago")
    } else if seconds < HOUR {
        format!("{:.1} minutes ago", seconds as f64 / MINUTE as f64)
    } else if seconds < DAY {
        format!("{:.1} hours ago", seconds as f64 / HOUR as f64)
    } else {
        format!("{:.1} days ago", seconds as f64 / DAY as f64)
    }
}

fn print_version_info() {
    let version = env!("CARGO_PKG_VERSION");
    let build_timestamp: u64 = env!("ESGPANEL_BUILD_TIMESTAMP").parse().unwrap_or(0);

    println!("esgpanel {version}");

    if build_timestamp > 0 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if now > build_timestamp {
            println!("Built: {}", format_duration_ago(now - build_timestamp));
        } else {
            println!("Built: just now");
        }
    }
}
