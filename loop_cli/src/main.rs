use clap::{Parser, Subcommand, ValueEnum};
use loop_core::*;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "loopctl")]
#[command(about = "Glucose forecasting and insulin dosing engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Forecast glucose from an input snapshot
    Predict {
        /// Input snapshot (JSON)
        #[arg(long)]
        input: PathBuf,

        /// Also write the forecast and effect curves as CSV
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Print the full output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Forecast and recommend a dose
    Recommend {
        /// Input snapshot (JSON)
        #[arg(long)]
        input: PathBuf,

        /// Override the recommendation kind requested by the input
        #[arg(long, value_enum)]
        kind: Option<KindArg>,

        /// Print the full output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration
    Config {
        /// Write the default configuration to the config path
        #[arg(long)]
        init: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    ManualBolus,
    AutomaticBolus,
    TempBasal,
}

impl From<KindArg> for RecommendationKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::ManualBolus => RecommendationKind::ManualBolus,
            KindArg::AutomaticBolus => RecommendationKind::AutomaticBolus,
            KindArg::TempBasal => RecommendationKind::TempBasal,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::default_config_path);

    if let Commands::Config { init: true } = cli.command {
        loop_core::logging::init();
        return cmd_config_init(&config_path);
    }

    let config = match &cli.config {
        Some(path) if path.exists() => Config::load_from(path)?,
        Some(path) => return Err(Error::Config(format!("Config file not found: {}", path.display()))),
        None => Config::load()?,
    };
    loop_core::logging::init_from_config(&config.logging);

    match cli.command {
        Commands::Predict { input, csv, json } => cmd_predict(&input, csv.as_deref(), json, &config),
        Commands::Recommend { input, kind, json } => cmd_recommend(&input, kind, json, &config),
        Commands::Config { .. } => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn load_input(path: &Path) -> Result<LoopAlgorithmInput> {
    let contents = std::fs::read_to_string(path)?;
    let input: LoopAlgorithmInput = serde_json::from_str(&contents)?;
    tracing::debug!(
        "Loaded input with {} glucose samples, {} doses, {} carb entries",
        input.glucose_history.len(),
        input.doses.len(),
        input.carb_entries.len()
    );
    Ok(input)
}

fn cmd_predict(input_path: &Path, csv_path: Option<&Path>, json: bool, config: &Config) -> Result<()> {
    let input = load_input(input_path)?;
    let output = loop_core::predict(&input, &config.algorithm)?;

    if let Some(path) = csv_path {
        let rows = write_prediction_csv(&output, input.glucose_unit, path)?;
        if !json {
            println!("✓ Wrote {} rows to {}", rows, path.display());
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        display_forecast(&output, input.glucose_unit);
    }
    Ok(())
}

fn cmd_recommend(input_path: &Path, kind: Option<KindArg>, json: bool, config: &Config) -> Result<()> {
    let mut input = load_input(input_path)?;
    if let Some(kind) = kind {
        input.recommendation_kind = kind.into();
    }
    let output = loop_core::run(&input, &config.algorithm)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    display_forecast(&output, input.glucose_unit);
    if let Some(correction) = &output.correction {
        display_correction(correction, input.glucose_unit);
    }
    if let Some(recommendation) = &output.recommendation {
        display_recommendation(recommendation);
    }
    Ok(())
}

fn cmd_config_init(path: &Path) -> Result<()> {
    if path.exists() {
        println!("Config already exists at {}", path.display());
        return Ok(());
    }
    Config::default().save_to(path)?;
    println!("✓ Wrote default config to {}", path.display());
    Ok(())
}

fn format_glucose(value: f64, unit: GlucoseUnit) -> String {
    let converted = unit.from_mgdl(value);
    match unit {
        GlucoseUnit::MilligramsPerDeciliter => format!("{:.0} {}", converted, unit.label()),
        GlucoseUnit::MillimolesPerLiter => format!("{:.1} {}", converted, unit.label()),
    }
}

fn display_forecast(output: &LoopAlgorithmOutput, unit: GlucoseUnit) {
    let (Some(first), Some(last)) = (output.prediction.first(), output.prediction.last()) else {
        return;
    };
    let min = output
        .prediction
        .iter()
        .min_by(|a, b| a.value.total_cmp(&b.value))
        .unwrap_or(first);

    println!("\n╭─────────────────────────────────────────╮");
    println!("│  GLUCOSE FORECAST");
    println!("╰─────────────────────────────────────────╯");
    println!();
    println!("  Current:   {} at {}", format_glucose(first.value, unit), first.timestamp.format("%H:%M"));
    println!("  Minimum:   {} at {}", format_glucose(min.value, unit), min.timestamp.format("%H:%M"));
    println!("  Eventual:  {} at {}", format_glucose(last.value, unit), last.timestamp.format("%H:%M"));
    println!();
    println!("  IOB: {:.2} U   COB: {:.0} g", output.insulin_on_board, output.carbs_on_board);
    println!();

    for point in output
        .prediction
        .iter()
        .filter(|point| (point.timestamp - first.timestamp).num_minutes() % 30 == 0)
    {
        println!("  {}  {}", point.timestamp.format("%H:%M"), format_glucose(point.value, unit));
    }
    println!();
}

fn display_correction(correction: &InsulinCorrection, unit: GlucoseUnit) {
    match correction {
        InsulinCorrection::InRange => println!("  Correction: in range"),
        InsulinCorrection::AboveRange { units, correcting, .. } => println!(
            "  Correction: above range, {:.2} U to correct {}",
            units,
            format_glucose(correcting.value, unit)
        ),
        InsulinCorrection::EntirelyBelowRange { units, min_glucose, .. } => println!(
            "  Correction: below range (min {}), withhold {:.2} U",
            format_glucose(min_glucose.value, unit),
            units
        ),
        InsulinCorrection::Suspend { min_glucose } => println!(
            "  Correction: suspend, {} predicted at {}",
            format_glucose(min_glucose.value, unit),
            min_glucose.timestamp.format("%H:%M")
        ),
    }
}

fn display_temp_basal(temp_basal: Option<&TempBasalRecommendation>) {
    match temp_basal {
        Some(TempBasalRecommendation::Set {
            units_per_hour,
            duration,
        }) => println!(
            "  → Temp basal {:.2} U/hr for {} min",
            units_per_hour,
            duration.num_minutes()
        ),
        Some(TempBasalRecommendation::Cancel) => println!("  → Cancel temp basal"),
        None => println!("  → No basal change"),
    }
}

fn display_recommendation(recommendation: &LoopRecommendation) {
    match recommendation {
        LoopRecommendation::TempBasal(temp_basal) => display_temp_basal(temp_basal.as_ref()),
        LoopRecommendation::AutomaticBolus(dose) => {
            display_temp_basal(dose.basal_adjustment.as_ref());
            println!("  → Automatic bolus {:.2} U", dose.bolus_units.unwrap_or(0.0));
        }
        LoopRecommendation::ManualBolus(bolus) => {
            println!("  → Bolus {:.2} U", bolus.amount);
            if let Some(notice) = &bolus.notice {
                println!("  ℹ {}", describe_notice(notice));
            }
        }
    }
    println!();
}

fn describe_notice(notice: &BolusRecommendationNotice) -> String {
    match notice {
        BolusRecommendationNotice::GlucoseBelowSuspendThreshold { min_glucose } => format!(
            "Predicted glucose of {:.0} mg/dL is below the suspend threshold",
            min_glucose.value
        ),
        BolusRecommendationNotice::CurrentGlucoseBelowTarget { glucose } => {
            format!("Current glucose of {:.0} mg/dL is below target", glucose.value)
        }
        BolusRecommendationNotice::PredictedGlucoseBelowTarget { min_glucose } => format!(
            "Glucose is predicted to drop to {:.0} mg/dL before rising",
            min_glucose.value
        ),
        BolusRecommendationNotice::PredictedGlucoseInRange => "Predicted glucose is in range".into(),
        BolusRecommendationNotice::AllGlucoseBelowTarget { min_glucose } => format!(
            "Predicted glucose stays below target, reaching {:.0} mg/dL",
            min_glucose.value
        ),
    }
}
