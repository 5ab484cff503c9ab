//! VitaBand CLI - Command-line interface for the VitaBand alert engine
//!
//! Commands:
//! - classify: Evaluate readings into alerts and insights (batch mode)
//! - monitor: Run readings from stdin through the full engine (streaming mode)
//! - thresholds: Print or validate threshold bands
//! - doctor: Diagnose configuration files and environment

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use vitaband_alerts::error::CallError;
use vitaband_alerts::escalation::{
    EscalationPrompt, Notice, PromptOption, PromptResponse, Telephony, UserPrompt,
    AUTO_EXECUTE_DELAY,
};
use vitaband_alerts::transport::{attach_engine, BrokerAddress, LoopbackTransport, Transport, VITALS_TOPIC};
use vitaband_alerts::types::{HealthInsight, ThresholdAlert};
use vitaband_alerts::{
    is_critical, AlertEngine, AlertError, EmergencyConfig, EngineOptions, EscalationOutcome,
    EscalationPhase, InsightGenerator, ReadingReport, SharedEngine, ThresholdBands,
    ThresholdClassifier, VitalsReading, PRODUCER_NAME, VITABAND_VERSION,
};

/// VitaBand - Health alert engine for wearable vitals
#[derive(Parser)]
#[command(name = "vitaband")]
#[command(author = "VitaBand Contributors")]
#[command(version = VITABAND_VERSION)]
#[command(about = "Classify vitals and run the emergency escalation protocol", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify readings into alerts and insights (batch mode)
    Classify {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Load threshold bands from file
        #[arg(long)]
        thresholds: Option<PathBuf>,
    },

    /// Run readings from stdin through the full engine (streaming mode)
    Monitor {
        /// Emergency settings file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Load threshold bands from file
        #[arg(long)]
        thresholds: Option<PathBuf>,

        /// Enable automatic escalation with this number
        #[arg(long)]
        emergency_number: Option<String>,

        /// Countdown before the call is placed, in milliseconds
        #[arg(long, default_value_t = AUTO_EXECUTE_DELAY.as_millis() as u64)]
        countdown_ms: u64,

        /// Answer every escalation prompt immediately instead of waiting
        #[arg(long)]
        answer: Option<Answer>,

        /// Broker URL readings are routed through
        #[arg(long, default_value = "mqtt://localhost:1883")]
        broker: String,
    },

    /// Print threshold bands, optionally validating a file
    Thresholds {
        /// Threshold bands file to validate and print
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Check emergency settings file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Check threshold bands file
        #[arg(long)]
        thresholds: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one reading per line)
    Ndjson,
    /// JSON array of readings
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Clone, Copy, ValueEnum)]
enum Answer {
    Cancel,
    CallNow,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(io::stderr))
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), VitabandCliError> {
    match cli.command {
        Commands::Classify {
            input,
            input_format,
            output_format,
            thresholds,
        } => cmd_classify(&input, input_format, output_format, thresholds.as_deref()),

        Commands::Monitor {
            config,
            thresholds,
            emergency_number,
            countdown_ms,
            answer,
            broker,
        } => cmd_monitor(
            config.as_deref(),
            thresholds.as_deref(),
            emergency_number,
            Duration::from_millis(countdown_ms),
            answer,
            &broker,
        ),

        Commands::Thresholds { file } => cmd_thresholds(file.as_deref()),

        Commands::Doctor {
            config,
            thresholds,
            json,
        } => cmd_doctor(config.as_deref(), thresholds.as_deref(), json),
    }
}

/// One classified reading
#[derive(Serialize)]
struct ClassifiedReading {
    reading: VitalsReading,
    critical: bool,
    alerts: Vec<ThresholdAlert>,
    insights: Vec<HealthInsight>,
}

fn cmd_classify(
    input: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    thresholds: Option<&Path>,
) -> Result<(), VitabandCliError> {
    let input_data = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let readings = match input_format {
        InputFormat::Ndjson => parse_ndjson(&input_data)?,
        InputFormat::Json => serde_json::from_str::<Vec<VitalsReading>>(&input_data)?,
    };

    if readings.is_empty() {
        return Err(VitabandCliError::NoReadings);
    }

    let classifier = ThresholdClassifier::new(load_bands(thresholds)?);

    let records: Vec<ClassifiedReading> = readings
        .into_iter()
        .map(|reading| {
            let alerts = classifier.classify(&reading);
            let insights = InsightGenerator::generate(&reading, &alerts);
            ClassifiedReading {
                critical: is_critical(&alerts),
                reading,
                alerts,
                insights,
            }
        })
        .collect();

    print!("{}", format_output(&records, &output_format)?);
    Ok(())
}

/// Dialer that reports calls on stderr
struct ConsoleTelephony;

impl Telephony for ConsoleTelephony {
    fn place_call(&self, number: &str) -> Result<(), CallError> {
        eprintln!("📞 Calling {}", number);
        Ok(())
    }
}

/// Prompt that prints to stderr; stdin carries readings, so answers are scripted
struct ConsolePrompt {
    answer: Option<Answer>,
}

impl UserPrompt for ConsolePrompt {
    fn prompt(&self, prompt: &EscalationPrompt) -> PromptResponse {
        eprintln!("{}", prompt.title);
        eprintln!("{}", prompt.message);
        for (_, label) in &prompt.options {
            eprintln!("  [{}]", label);
        }

        match self.answer {
            Some(Answer::Cancel) => PromptResponse::Selected(PromptOption::Cancel),
            Some(Answer::CallNow) => PromptResponse::Selected(PromptOption::CallNow),
            None => PromptResponse::Deferred,
        }
    }

    fn confirm_call(&self, _number: &str) -> bool {
        true
    }

    fn notice(&self, notice: &Notice) {
        eprintln!("{}: {}", notice.title, notice.message);
    }
}

fn cmd_monitor(
    config: Option<&Path>,
    thresholds: Option<&Path>,
    emergency_number: Option<String>,
    countdown: Duration,
    answer: Option<Answer>,
    broker: &str,
) -> Result<(), VitabandCliError> {
    let mut emergency = match config {
        Some(path) => EmergencyConfig::from_json(&fs::read_to_string(path)?)?,
        None => EmergencyConfig::default(),
    };
    if let Some(number) = emergency_number {
        emergency.auto_emergency_enabled = true;
        emergency.emergency_number = number;
    }

    let options = EngineOptions {
        bands: load_bands(thresholds)?,
        countdown,
        config: emergency,
        ..EngineOptions::default()
    };
    let engine = AlertEngine::new(
        options,
        Arc::new(ConsoleTelephony),
        Arc::new(ConsolePrompt { answer }),
    );

    let (fired_tx, fired) = crossbeam_channel::unbounded();
    let shared = SharedEngine::new(engine).with_countdown_listener(Arc::new(move |outcome: &EscalationOutcome| {
        if let Ok(json) = serde_json::to_string(outcome) {
            println!("{}", json);
        }
        let _ = fired_tx.send(());
    }));

    // Readings reach the engine through the vitals topic
    let transport = LoopbackTransport::new(BrokerAddress::parse(broker)?);
    transport.connect()?;
    attach_engine(
        &transport,
        shared.clone(),
        Some(Arc::new(|report: &ReadingReport| {
            if let Ok(json) = serde_json::to_string(report) {
                let mut stdout = io::stdout().lock();
                let _ = writeln!(stdout, "{}", json);
                let _ = stdout.flush();
            }
        })),
    )?;

    let stdin = io::stdin();

    for line in stdin.lock().lines() {
        let line = line?;
        let trimmed = line.trim();

        if trimmed.is_empty() {
            continue;
        }

        VitalsReading::from_json(trimmed).map_err(|e| {
            VitabandCliError::ParseError(format!("Failed to parse reading: {}", e))
        })?;

        transport.publish(VITALS_TOPIC, trimmed)?;
    }

    // Let a pending countdown place its call before exiting
    if matches!(shared.phase(), EscalationPhase::Pending { .. }) {
        let _ = fired.recv();
    }

    transport.disconnect();
    Ok(())
}

fn cmd_thresholds(file: Option<&Path>) -> Result<(), VitabandCliError> {
    let bands = load_bands(file)?;
    println!("{}", bands.to_json()?);
    Ok(())
}

fn cmd_doctor(
    config: Option<&Path>,
    thresholds: Option<&Path>,
    json: bool,
) -> Result<(), VitabandCliError> {
    let mut checks: Vec<DoctorCheck> = vec![DoctorCheck {
        name: "vitaband_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("VitaBand alerts version {}", VITABAND_VERSION),
    }];

    if let Some(path) = config {
        checks.push(check_file("emergency_config", path, |content| {
            let config = EmergencyConfig::from_json(content).map_err(|e| e.to_string())?;
            if config.auto_emergency_enabled && !config.has_emergency_number() {
                Err("automatic escalation enabled without an emergency number".to_string())
            } else {
                Ok(format!(
                    "Emergency settings valid (auto emergency {})",
                    if config.auto_emergency_enabled { "on" } else { "off" }
                ))
            }
        }));
    }

    if let Some(path) = thresholds {
        checks.push(check_file("thresholds", path, |content| {
            ThresholdBands::from_json(content)
                .map(|_| "Threshold bands valid".to_string())
                .map_err(|e| e.to_string())
        }));
    }

    // Check stdin is available (for monitor mode)
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
            message: "stdin is a pipe (monitor mode ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: VITABAND_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("VitaBand Doctor Report");
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
        Err(VitabandCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn check_file(
    name: &str,
    path: &Path,
    validate: impl FnOnce(&str) -> Result<String, String>,
) -> DoctorCheck {
    let (status, message) = if !path.exists() {
        (CheckStatus::Warning, format!("{} does not exist", path.display()))
    } else {
        match fs::read_to_string(path) {
            Ok(content) => match validate(&content) {
                Ok(message) => (CheckStatus::Ok, message),
                Err(e) => (CheckStatus::Error, e),
            },
            Err(e) => (CheckStatus::Error, format!("Cannot read file: {}", e)),
        }
    };

    DoctorCheck {
        name: name.to_string(),
        status,
        message,
    }
}

fn load_bands(path: Option<&Path>) -> Result<ThresholdBands, VitabandCliError> {
    match path {
        Some(path) => Ok(ThresholdBands::from_json(&fs::read_to_string(path)?)?),
        None => Ok(ThresholdBands::default()),
    }
}

fn parse_ndjson(data: &str) -> Result<Vec<VitalsReading>, VitabandCliError> {
    data.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            VitalsReading::from_json(line.trim()).map_err(|e| {
                VitabandCliError::ParseError(format!("Line {}: {}", index + 1, e))
            })
        })
        .collect()
}

fn format_output<T: Serialize>(records: &[T], format: &OutputFormat) -> Result<String, VitabandCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for record in records {
                lines.push(serde_json::to_string(record)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(records)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(records)? + "\n"),
    }
}

// Error types

#[derive(Debug)]
enum VitabandCliError {
    Io(io::Error),
    Engine(AlertError),
    Json(serde_json::Error),
    NoReadings,
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for VitabandCliError {
    fn from(e: io::Error) -> Self {
        VitabandCliError::Io(e)
    }
}

impl From<AlertError> for VitabandCliError {
    fn from(e: AlertError) -> Self {
        VitabandCliError::Engine(e)
    }
}

impl From<serde_json::Error> for VitabandCliError {
    fn from(e: serde_json::Error) -> Self {
        VitabandCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<VitabandCliError> for CliError {
    fn from(e: VitabandCliError) -> Self {
        match e {
            VitabandCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            VitabandCliError::Engine(e) => {
                let hint = match &e {
                    AlertError::Configuration(_) => "Run 'vitaband doctor' to check configuration files",
                    AlertError::Transport(_) => "Check the broker URL",
                    _ => "Check input and settings",
                };
                CliError {
                    code: "ENGINE_ERROR".to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            VitabandCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            VitabandCliError::NoReadings => CliError {
                code: "NO_READINGS".to_string(),
                message: "No readings found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            VitabandCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more checks failed".to_string(),
                hint: Some("Fix the reported errors and retry".to_string()),
            },
            VitabandCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Each line must be a JSON reading object".to_string()),
            },
        }
    }
}

// Report types

#[derive(Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
