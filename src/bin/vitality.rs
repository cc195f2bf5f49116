//! Vitality CLI - Command-line interface for Synheart Vitality
//!
//! Commands:
//! - recompute: Recompute snapshots and episodes for a person over a date range
//! - score: Score daily rows without touching any state
//! - snooze / dismiss: Suppress notifications for an active episode
//! - validate: Validate scoring schema and threshold documents
//! - doctor: Diagnose configuration and state health
//! - config: Print the built-in configuration documents

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use synheart_vitality::baseline::BaselineCalculator;
use synheart_vitality::normalizer::Normalizer;
use synheart_vitality::schema::{SCORING_SCHEMA_VERSION, THRESHOLD_CONFIG_VERSION};
use synheart_vitality::types::{DailyRawMetrics, PatternMetric, PatternType, SnapshotRecord};
use synheart_vitality::{
    ComputeError, EngineSettings, MemoryStore, ScoringSchema, SnapshotEncoder, ThresholdConfig,
    VitalityEngine, PRODUCER_NAME, VITALITY_VERSION,
};

/// Vitality - Age-adjusted vitality scoring and baseline-deviation alerting
#[derive(Parser)]
#[command(name = "vitality")]
#[command(author = "Synheart AI Inc")]
#[command(version = VITALITY_VERSION)]
#[command(about = "Score daily wearable metrics and track sustained deviations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recompute snapshots and episodes for a person over a date range
    Recompute {
        /// State file (rows, profiles, snapshots, episodes, notifications)
        #[arg(short, long, env = "VITALITY_STATE")]
        state: PathBuf,

        /// Person to recompute
        #[arg(short, long)]
        person: String,

        /// First date of the range (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,

        /// Last date of the range (YYYY-MM-DD), defaults to start
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Evaluation instant (RFC 3339), defaults to now
        #[arg(long)]
        now: Option<DateTime<Utc>>,

        /// Print the summary without writing the state file back
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Score daily rows without touching any state
    Score {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "json")]
        input_format: InputFormat,

        /// Age of the person in whole years
        #[arg(long)]
        age: u32,

        /// Person whose rows are scored, defaults to the first row's person
        #[arg(long)]
        person: Option<String>,

        /// Only score this date
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Snooze notifications for an active episode
    Snooze {
        #[command(flatten)]
        key: EpisodeArgs,

        /// Suppress notifications until this instant (RFC 3339)
        #[arg(long)]
        until: DateTime<Utc>,
    },

    /// Dismiss an active episode
    Dismiss {
        #[command(flatten)]
        key: EpisodeArgs,
    },

    /// Validate scoring schema and threshold documents
    Validate {
        /// Scoring schema file
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Threshold table file
        #[arg(long)]
        thresholds: Option<PathBuf>,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and state health
    Doctor {
        /// Check a state file
        #[arg(long, env = "VITALITY_STATE")]
        state: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a built-in configuration document
    Config {
        #[arg(value_enum)]
        document: ConfigDocument,
    },
}

/// Engine configuration shared by commands that evaluate data
#[derive(Args)]
struct EngineArgs {
    /// Scoring schema file, defaults to the built-in schema
    #[arg(long, env = "VITALITY_SCHEMA")]
    schema: Option<PathBuf>,

    /// Threshold table file, defaults to the built-in table
    #[arg(long, env = "VITALITY_THRESHOLDS")]
    thresholds: Option<PathBuf>,

    /// Track episodes without enqueueing notifications
    #[arg(long, env = "VITALITY_SHADOW_MODE")]
    shadow: bool,

    /// Scoring window in days
    #[arg(long, env = "VITALITY_WINDOW_DAYS", default_value = "7")]
    window_days: i64,

    /// Days searched before the window for a backfill value
    #[arg(long, env = "VITALITY_BACKFILL_DAYS", default_value = "7")]
    backfill_days: i64,

    /// Relative deviation still counted as a clean day
    #[arg(long, env = "VITALITY_HYSTERESIS_BAND", default_value = "0.05")]
    hysteresis_band: f64,

    /// Recent window length in days
    #[arg(long, env = "VITALITY_RECENT_DAYS", default_value = "3")]
    recent_days: usize,
}

#[derive(Args)]
struct EpisodeArgs {
    /// State file
    #[arg(short, long, env = "VITALITY_STATE")]
    state: PathBuf,

    /// Person the episode belongs to
    #[arg(short, long)]
    person: String,

    /// Pattern metric (e.g. sleep_minutes, steps, hrv_ms)
    #[arg(long)]
    metric: String,

    /// Pattern type (drop_vs_baseline or rise_vs_baseline)
    #[arg(long, default_value = "drop_vs_baseline")]
    pattern: String,
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one row per line)
    Ndjson,
    /// JSON array of rows
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one payload per line)
    Ndjson,
    /// Pretty-printed JSON array
    JsonPretty,
}

#[derive(Clone, ValueEnum)]
enum ConfigDocument {
    /// Built-in scoring schema (vitality.scoring.v1)
    Schema,
    /// Built-in threshold table (vitality.thresholds.v1)
    Thresholds,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_env("VITALITY_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), VitalityCliError> {
    match cli.command {
        Commands::Recompute {
            state,
            person,
            start,
            end,
            now,
            dry_run,
            engine,
        } => cmd_recompute(
            &state,
            &person,
            start,
            end.unwrap_or(start),
            now.unwrap_or_else(Utc::now),
            dry_run,
            &engine,
        ),

        Commands::Score {
            input,
            input_format,
            age,
            person,
            date,
            output_format,
            engine,
        } => cmd_score(
            &input,
            input_format,
            age,
            person.as_deref(),
            date,
            output_format,
            &engine,
        ),

        Commands::Snooze { key, until } => cmd_episode_action(&key, EpisodeAction::Snooze(until)),

        Commands::Dismiss { key } => cmd_episode_action(&key, EpisodeAction::Dismiss),

        Commands::Validate {
            schema,
            thresholds,
            json,
        } => cmd_validate(schema.as_deref(), thresholds.as_deref(), json),

        Commands::Doctor { state, json } => cmd_doctor(state.as_deref(), json),

        Commands::Config { document } => cmd_config(document),
    }
}

fn cmd_recompute(
    state_path: &Path,
    person: &str,
    start: NaiveDate,
    end: NaiveDate,
    now: DateTime<Utc>,
    dry_run: bool,
    args: &EngineArgs,
) -> Result<(), VitalityCliError> {
    let engine = build_engine(args)?;
    let mut state = load_state(state_path)?;
    let source = state.clone();

    let summary = engine.recompute(person, start, end, &source, &mut state, now)?;

    if !dry_run {
        fs::write(state_path, state.to_json()?)?;
    }

    let encoder = SnapshotEncoder::new();
    println!("{}", encoder.summary_to_json(&summary, now)?);
    Ok(())
}

fn cmd_score(
    input: &Path,
    input_format: InputFormat,
    age: u32,
    person: Option<&str>,
    date: Option<NaiveDate>,
    output_format: OutputFormat,
    args: &EngineArgs,
) -> Result<(), VitalityCliError> {
    let engine = build_engine(args)?;
    let input_data = read_input(input)?;

    let rows: Vec<DailyRawMetrics> = match input_format {
        InputFormat::Json => serde_json::from_str(&input_data)?,
        InputFormat::Ndjson => input_data
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?,
    };

    let person_id = match person {
        Some(p) => p.to_string(),
        None => rows
            .first()
            .map(|r| r.person_id.clone())
            .ok_or(VitalityCliError::NoRows)?,
    };

    let days = Normalizer::merge(&person_id, &rows);
    if days.is_empty() {
        return Err(VitalityCliError::NoRows);
    }

    let dates: Vec<NaiveDate> = match date {
        Some(d) => vec![d],
        None => days.keys().copied().collect(),
    };

    let settings = engine.settings();
    let encoder = SnapshotEncoder::new();
    let computed_at = Utc::now();
    let mut payloads = Vec::new();

    for date in dates {
        let windowed = Normalizer::window(
            &days,
            &person_id,
            date,
            settings.scoring_window_days,
            settings.backfill_lookback_days,
        );
        if let Some(snapshot) = engine.score_day(age, &windowed.row) {
            let record = SnapshotRecord {
                person_id: person_id.clone(),
                date,
                snapshot,
                computed_at,
            };
            payloads.push(encoder.encode_snapshot(&record));
        }
    }

    if payloads.is_empty() {
        return Err(VitalityCliError::NotEligible);
    }

    match output_format {
        OutputFormat::Ndjson => {
            for payload in &payloads {
                println!("{}", serde_json::to_string(payload)?);
            }
        }
        OutputFormat::JsonPretty => println!("{}", serde_json::to_string_pretty(&payloads)?),
    }

    Ok(())
}

enum EpisodeAction {
    Snooze(DateTime<Utc>),
    Dismiss,
}

fn cmd_episode_action(args: &EpisodeArgs, action: EpisodeAction) -> Result<(), VitalityCliError> {
    let engine = VitalityEngine::builtin(EngineSettings::default())?;
    let metric: PatternMetric = parse_enum("metric", &args.metric)?;
    let pattern: PatternType = parse_enum("pattern", &args.pattern)?;

    let mut state = load_state(&args.state)?;
    let now = Utc::now();
    let episode = match action {
        EpisodeAction::Snooze(until) => {
            engine.snooze_episode(&mut state, &args.person, metric, pattern, until)?
        }
        EpisodeAction::Dismiss => engine.dismiss_episode(&mut state, &args.person, metric, pattern, now)?,
    };
    fs::write(&args.state, state.to_json()?)?;

    let encoder = SnapshotEncoder::new();
    println!(
        "{}",
        serde_json::to_string_pretty(&encoder.encode_episode(&episode, now))?
    );
    Ok(())
}

fn cmd_validate(
    schema: Option<&Path>,
    thresholds: Option<&Path>,
    json: bool,
) -> Result<(), VitalityCliError> {
    if schema.is_none() && thresholds.is_none() {
        return Err(VitalityCliError::NothingToValidate);
    }

    let mut documents: Vec<DocumentReport> = Vec::new();

    if let Some(path) = schema {
        let result = read_document(path).and_then(|content| ScoringSchema::from_json(&content).map(|_| ()));
        documents.push(DocumentReport::new("schema", path, result));
    }

    if let Some(path) = thresholds {
        let result =
            read_document(path).and_then(|content| ThresholdConfig::from_json(&content).map(|_| ()));
        documents.push(DocumentReport::new("thresholds", path, result));
    }

    let invalid = documents.iter().filter(|d| !d.valid).count();
    let report = ValidationReport {
        total_documents: documents.len(),
        invalid_documents: invalid,
        documents,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        for doc in &report.documents {
            let status = if doc.valid { "[OK]" } else { "[ERR]" };
            println!("  {} {} ({})", status, doc.kind, doc.path);
            if let Some(error) = &doc.error {
                println!("      {}", error);
            }
        }
    }

    if invalid > 0 {
        Err(VitalityCliError::ValidationFailed(invalid))
    } else {
        Ok(())
    }
}

fn cmd_doctor(state: Option<&Path>, json: bool) -> Result<(), VitalityCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "vitality_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Vitality version {}", VITALITY_VERSION),
    });

    checks.push(match VitalityEngine::builtin(EngineSettings::default()) {
        Ok(_) => DoctorCheck {
            name: "builtin_config".to_string(),
            status: CheckStatus::Ok,
            message: format!(
                "Built-in {} and {} are valid",
                SCORING_SCHEMA_VERSION, THRESHOLD_CONFIG_VERSION
            ),
        },
        Err(e) => DoctorCheck {
            name: "builtin_config".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        },
    });

    if let Some(state_path) = state {
        let check = if !state_path.exists() {
            DoctorCheck {
                name: "state".to_string(),
                status: CheckStatus::Warning,
                message: "State file does not exist".to_string(),
            }
        } else {
            match load_state(state_path) {
                Ok(store) => {
                    let active = store.episodes.iter().filter(|e| e.is_active()).count();
                    DoctorCheck {
                        name: "state".to_string(),
                        status: CheckStatus::Ok,
                        message: format!(
                            "State file valid ({} rows, {} profiles, {} snapshots, {} active episodes, {} queued notifications)",
                            store.rows.len(),
                            store.profiles.len(),
                            store.snapshots.len(),
                            active,
                            store.notifications.len()
                        ),
                    }
                }
                Err(e) => DoctorCheck {
                    name: "state".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot load state file: {}", CliError::from(e).message),
                },
            }
        };
        checks.push(check);
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (score --input - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: VITALITY_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Vitality Doctor Report");
        println!("======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(VitalityCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn cmd_config(document: ConfigDocument) -> Result<(), VitalityCliError> {
    let json = match document {
        ConfigDocument::Schema => ScoringSchema::builtin().to_json()?,
        ConfigDocument::Thresholds => ThresholdConfig::builtin().to_json()?,
    };
    println!("{}", json);
    Ok(())
}

// Helper functions

fn build_engine(args: &EngineArgs) -> Result<VitalityEngine, VitalityCliError> {
    let schema = match &args.schema {
        Some(path) => ScoringSchema::from_json(&fs::read_to_string(path)?)?,
        None => ScoringSchema::builtin(),
    };
    let thresholds = match &args.thresholds {
        Some(path) => ThresholdConfig::from_json(&fs::read_to_string(path)?)?,
        None => ThresholdConfig::builtin(),
    };

    let settings = EngineSettings {
        shadow_mode: args.shadow,
        scoring_window_days: args.window_days,
        backfill_lookback_days: args.backfill_days,
        hysteresis_band: args.hysteresis_band,
        baseline: BaselineCalculator {
            recent_window: args.recent_days,
            ..BaselineCalculator::default()
        },
        ..EngineSettings::default()
    };

    Ok(VitalityEngine::new(schema, thresholds, settings)?)
}

fn load_state(path: &Path) -> Result<MemoryStore, VitalityCliError> {
    let content = fs::read_to_string(path)?;
    Ok(MemoryStore::from_json(&content)?)
}

fn read_input(input: &Path) -> Result<String, VitalityCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

/// Parse a snake_case identifier into one of the engine's serde enums
fn parse_enum<T: serde::de::DeserializeOwned>(what: &str, value: &str) -> Result<T, VitalityCliError> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| VitalityCliError::UnknownValue(what.to_string(), value.to_string()))
}

fn read_document(path: &Path) -> Result<String, ComputeError> {
    fs::read_to_string(path).map_err(|e| ComputeError::ParseError(format!("cannot read file: {}", e)))
}

// Error types

#[derive(Debug)]
enum VitalityCliError {
    Io(io::Error),
    Compute(ComputeError),
    Json(serde_json::Error),
    NoRows,
    NotEligible,
    NothingToValidate,
    UnknownValue(String, String),
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for VitalityCliError {
    fn from(e: io::Error) -> Self {
        VitalityCliError::Io(e)
    }
}

impl From<ComputeError> for VitalityCliError {
    fn from(e: ComputeError) -> Self {
        VitalityCliError::Compute(e)
    }
}

impl From<serde_json::Error> for VitalityCliError {
    fn from(e: serde_json::Error) -> Self {
        VitalityCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<VitalityCliError> for CliError {
    fn from(e: VitalityCliError) -> Self {
        match e {
            VitalityCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            VitalityCliError::Compute(e) => {
                let (code, hint) = match &e {
                    ComputeError::InvalidConfiguration(_) => (
                        "INVALID_CONFIGURATION",
                        "Run 'vitality validate' on the schema and threshold files",
                    ),
                    ComputeError::InvalidRequest(_) => {
                        ("INVALID_REQUEST", "Check the person id and date range")
                    }
                    ComputeError::FetchFailure(_) => {
                        ("FETCH_FAILURE", "Check that the state file holds the person's rows and profile")
                    }
                    ComputeError::PersistenceFailure(_) => {
                        ("PERSISTENCE_FAILURE", "Run 'vitality doctor --state <file>'")
                    }
                    ComputeError::JsonError(_) => ("JSON_ERROR", "Check JSON syntax"),
                    ComputeError::ParseError(_) => ("PARSE_ERROR", "Check input format"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            VitalityCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            VitalityCliError::NoRows => CliError {
                code: "NO_ROWS".to_string(),
                message: "No rows found in input".to_string(),
                hint: Some("Ensure input file is not empty and --person matches the rows".to_string()),
            },
            VitalityCliError::NotEligible => CliError {
                code: "NOT_ELIGIBLE".to_string(),
                message: "No date had enough pillars with data to score".to_string(),
                hint: Some("At least two pillars need data on a date".to_string()),
            },
            VitalityCliError::NothingToValidate => CliError {
                code: "NOTHING_TO_VALIDATE".to_string(),
                message: "No document given".to_string(),
                hint: Some("Pass --schema and/or --thresholds".to_string()),
            },
            VitalityCliError::UnknownValue(what, value) => CliError {
                code: "UNKNOWN_VALUE".to_string(),
                message: format!("Unknown {}: {}", what, value),
                hint: Some("Use snake_case names as printed by 'vitality config thresholds'".to_string()),
            },
            VitalityCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} documents failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            VitalityCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_documents: usize,
    invalid_documents: usize,
    documents: Vec<DocumentReport>,
}

#[derive(serde::Serialize)]
struct DocumentReport {
    kind: String,
    path: String,
    valid: bool,
    error: Option<String>,
}

impl DocumentReport {
    fn new(kind: &str, path: &Path, result: Result<(), ComputeError>) -> Self {
        Self {
            kind: kind.to_string(),
            path: path.display().to_string(),
            valid: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
        }
    }
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
