//! Strider CLI - Command-line interface for the Strider step tracker
//!
//! Commands:
//! - run: Classify pulses from stdin, or from a simulated detector
//! - steps: Query the step log
//! - summary / week: Goal progress, distance and calories
//! - profile, goal, theme: Read and write settings
//! - doctor: Diagnose data directory and configuration

use chrono::{DateTime, Local, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use strider::sensor::SimulatedDetector;
use strider::summary::{format_calories, format_distance, DaySummary, WeekSummary};
use strider::{
    BiometricProfile, Gender, Pulse, ServiceCommand, ServiceEvent, Step, Theme, TrackerConfig,
    TrackerContext, TrackerError, PRODUCER_NAME, STRIDER_VERSION,
};

/// Strider - On-device step tracking engine
#[derive(Parser)]
#[command(name = "strider")]
#[command(version = STRIDER_VERSION)]
#[command(about = "Classify steps, track distance, calories and daily goals", long_about = None)]
struct Cli {
    /// Directory holding the step log and settings
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Config file (defaults to <data-dir>/strider.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify pulses and append them to the step log
    Run {
        /// Generate pulses at this cadence (steps/min) instead of reading stdin
        #[arg(long)]
        simulate: Option<f64>,

        /// Stop after this many simulated pulses
        #[arg(long)]
        count: Option<u64>,

        /// Print every live event, not just steps
        #[arg(long)]
        events: bool,
    },

    /// Query steps in (from, to]
    Steps {
        /// Local calendar day (YYYY-MM-DD); overrides --from/--to
        #[arg(long)]
        date: Option<String>,

        /// Exclusive lower bound (RFC 3339)
        #[arg(long)]
        from: Option<String>,

        /// Inclusive upper bound (RFC 3339)
        #[arg(long)]
        to: Option<String>,

        /// Only print the number of steps
        #[arg(long)]
        count: bool,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Daily progress toward the goal
    Summary {
        /// Local calendar day (YYYY-MM-DD), today by default
        #[arg(long)]
        date: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Seven days of progress ending at a date
    Week {
        /// Last day of the week (YYYY-MM-DD), today by default
        #[arg(long)]
        end: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show or set the biometric profile
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Show or set the daily step goal
    Goal {
        /// New goal (steps per day)
        goal: Option<u64>,
    },

    /// Show or set the display theme
    Theme {
        /// New theme
        #[arg(value_enum)]
        theme: Option<ThemeArg>,
    },

    /// Diagnose data directory and configuration
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Print the saved profile
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replace the saved profile
    Set {
        #[arg(long)]
        name: String,

        #[arg(long, value_enum)]
        gender: GenderArg,

        /// Height (cm)
        #[arg(long)]
        height: f64,

        /// Weight (kg)
        #[arg(long)]
        weight: f64,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one step per line)
    Ndjson,
    /// JSON array of steps
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Clone, Copy, ValueEnum)]
enum GenderArg {
    Male,
    Female,
    Unspecified,
}

impl From<GenderArg> for Gender {
    fn from(g: GenderArg) -> Self {
        match g {
            GenderArg::Male => Gender::Male,
            GenderArg::Female => Gender::Female,
            GenderArg::Unspecified => Gender::Unspecified,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ThemeArg {
    System,
    Light,
    Dark,
}

impl From<ThemeArg> for Theme {
    fn from(t: ThemeArg) -> Self {
        match t {
            ThemeArg::System => Theme::System,
            ThemeArg::Light => Theme::Light,
            ThemeArg::Dark => Theme::Dark,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

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

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}

fn load_config(cli: &Cli) -> Result<TrackerConfig, StriderCliError> {
    let mut config = match &cli.config {
        Some(path) => TrackerConfig::from_file(path)?,
        None => TrackerConfig::load(
            cli.data_dir
                .clone()
                .unwrap_or_else(|| TrackerConfig::default().data_dir),
        )?,
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<(), StriderCliError> {
    let config = load_config(&cli)?;

    if let Commands::Doctor { json } = &cli.command {
        return cmd_doctor(&config, *json);
    }

    let ctx = TrackerContext::open(config)?;

    match cli.command {
        Commands::Run {
            simulate,
            count,
            events,
        } => cmd_run(&ctx, simulate, count, events),

        Commands::Steps {
            date,
            from,
            to,
            count,
            output_format,
        } => cmd_steps(&ctx, date.as_deref(), from.as_deref(), to.as_deref(), count, output_format),

        Commands::Summary { date, json } => cmd_summary(&ctx, date.as_deref(), json),

        Commands::Week { end, json } => cmd_week(&ctx, end.as_deref(), json),

        Commands::Profile { action } => cmd_profile(&ctx, action),

        Commands::Goal { goal } => cmd_goal(&ctx, goal),

        Commands::Theme { theme } => cmd_theme(&ctx, theme),

        Commands::Doctor { .. } => Ok(()),
    }
}

fn cmd_run(
    ctx: &TrackerContext,
    simulate: Option<f64>,
    count: Option<u64>,
    print_events: bool,
) -> Result<(), StriderCliError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match simulate {
            Some(cadence) => run_simulated(ctx, cadence, count, print_events).await,
            None => run_stdin(ctx).await,
        }
    })
}

/// Each stdin line is one pulse: an RFC 3339 timestamp, epoch milliseconds,
/// or anything else for "now".
async fn run_stdin(ctx: &TrackerContext) -> Result<(), StriderCliError> {
    use tokio::io::AsyncBufReadExt;

    let mut classifier = ctx.classifier();
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = io::stdout();

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let step = classifier.on_pulse_at(parse_pulse(trimmed).at).await;
        writeln!(stdout, "{}", serde_json::to_string(&step)?)?;
        stdout.flush()?;
    }

    classifier.shutdown();
    Ok(())
}

fn parse_pulse(line: &str) -> Pulse {
    if let Ok(at) = DateTime::parse_from_rfc3339(line) {
        return Pulse::new(at.with_timezone(&Utc));
    }
    if let Some(at) = line.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis) {
        return Pulse::new(at);
    }
    Pulse::now()
}

async fn run_simulated(
    ctx: &TrackerContext,
    cadence: f64,
    count: Option<u64>,
    print_events: bool,
) -> Result<(), StriderCliError> {
    let detector = SimulatedDetector::new(cadence, count)?;
    let mut service = ctx.service(Box::new(detector));
    let mut events = service.events();
    service.handle(ServiceCommand::Start).await?;

    let mut stdout = io::stdout();
    let mut steps_seen: u64 = 0;

    loop {
        if count.map_or(false, |limit| steps_seen >= limit) {
            break;
        }
        tokio::select! {
            event = events.recv() => match event {
                Ok(ServiceEvent::Step(step)) => {
                    steps_seen += 1;
                    writeln!(stdout, "{}", serde_json::to_string(&step)?)?;
                }
                Ok(other) => {
                    if print_events {
                        writeln!(stdout, "{}", serde_json::to_string(&other)?)?;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    log::warn!("output fell behind, {} events skipped", missed);
                    steps_seen += missed;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
        stdout.flush()?;
    }

    service.handle(ServiceCommand::Stop).await?;
    Ok(())
}

fn cmd_steps(
    ctx: &TrackerContext,
    date: Option<&str>,
    from: Option<&str>,
    to: Option<&str>,
    count_only: bool,
    output_format: OutputFormat,
) -> Result<(), StriderCliError> {
    let (from, to) = resolve_range(date, from, to)?;

    if count_only {
        println!("{}", ctx.steps().count(from, to));
        return Ok(());
    }

    let steps = ctx.steps().query(from, to);
    print!("{}", format_steps(&steps, &output_format)?);
    Ok(())
}

fn cmd_summary(ctx: &TrackerContext, date: Option<&str>, json: bool) -> Result<(), StriderCliError> {
    let summary = ctx.day_summary(parse_date(date)?, &Local)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_day(&summary);
    }
    Ok(())
}

fn cmd_week(ctx: &TrackerContext, end: Option<&str>, json: bool) -> Result<(), StriderCliError> {
    let week = ctx.week_summary(parse_date(end)?, &Local)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&week)?);
    } else {
        print_week(&week);
    }
    Ok(())
}

fn cmd_profile(ctx: &TrackerContext, action: ProfileAction) -> Result<(), StriderCliError> {
    match action {
        ProfileAction::Show { json } => {
            let profile = ctx.biometrics().current();
            if json {
                println!("{}", serde_json::to_string_pretty(&profile)?);
            } else {
                println!("Name:   {}", profile.name);
                println!(
                    "Gender: {}",
                    profile.gender.map(|g| g.as_str()).unwrap_or("not set")
                );
                println!("Height: {} cm", profile.height_cm);
                println!("Weight: {} kg", profile.weight_kg);
                if !profile.is_complete() {
                    println!("\nProfile is incomplete; run 'strider profile set'");
                }
            }
        }
        ProfileAction::Set {
            name,
            gender,
            height,
            weight,
        } => {
            ctx.biometrics()
                .save(BiometricProfile::new(name, gender.into(), height, weight))?;
            println!("Profile saved");
        }
    }
    Ok(())
}

fn cmd_goal(ctx: &TrackerContext, goal: Option<u64>) -> Result<(), StriderCliError> {
    if let Some(goal) = goal {
        ctx.preferences().save_goal(goal)?;
    }
    println!("{}", ctx.preferences().goal());
    Ok(())
}

fn cmd_theme(ctx: &TrackerContext, theme: Option<ThemeArg>) -> Result<(), StriderCliError> {
    if let Some(theme) = theme {
        ctx.preferences().save_theme(theme.into())?;
    }
    println!("{}", ctx.preferences().theme().as_str());
    Ok(())
}

fn cmd_doctor(config: &TrackerConfig, json: bool) -> Result<(), StriderCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "strider_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Strider version {}", STRIDER_VERSION),
    });

    checks.push(match config.validate() {
        Ok(()) => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: format!(
                "window {}s, cool-down {}ms, stride coefficient {}",
                config.window_secs, config.cooldown_ms, config.stride_coefficient
            ),
        },
        Err(e) => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        },
    });

    if !config.data_dir.exists() {
        checks.push(DoctorCheck {
            name: "data_dir".to_string(),
            status: CheckStatus::Warning,
            message: format!(
                "{} does not exist yet (created on first run)",
                config.data_dir.display()
            ),
        });
    } else {
        match TrackerContext::open(config.clone()) {
            Ok(ctx) => {
                checks.push(DoctorCheck {
                    name: "step_log".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("{} steps recorded", ctx.steps().len()),
                });
                checks.push(if ctx.biometrics().has_profile() {
                    DoctorCheck {
                        name: "profile".to_string(),
                        status: CheckStatus::Ok,
                        message: "Biometric profile complete".to_string(),
                    }
                } else {
                    DoctorCheck {
                        name: "profile".to_string(),
                        status: CheckStatus::Warning,
                        message: "Biometric profile incomplete; speed and calories will be zero"
                            .to_string(),
                    }
                });
                checks.push(DoctorCheck {
                    name: "goal".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("Daily goal {} steps", ctx.preferences().goal()),
                });
            }
            Err(e) => checks.push(DoctorCheck {
                name: "data_dir".to_string(),
                status: CheckStatus::Error,
                message: format!("Cannot open {}: {}", config.data_dir.display(), e),
            }),
        }
    }

    // Check stdin is available (for `run` without --simulate)
    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (type one pulse per line)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (pulse stream ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: STRIDER_VERSION.to_string(),
        data_dir: config.data_dir.display().to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Strider Doctor Report");
        println!("=====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("Data dir: {}", report.data_dir);
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

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(StriderCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn parse_date(date: Option<&str>) -> Result<NaiveDate, StriderCliError> {
    match date {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|e| StriderCliError::ParseError(format!("Invalid date '{}': {}", s, e))),
        None => Ok(Local::now().date_naive()),
    }
}

/// `--date` wins; `--from`/`--to` must come as a pair; neither means today
fn resolve_range(
    date: Option<&str>,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), StriderCliError> {
    match (date, from, to) {
        (Some(date), _, _) => Ok(strider::summary::day_range(parse_date(Some(date))?, &Local)?),
        (None, Some(from), Some(to)) => Ok((parse_instant(from)?, parse_instant(to)?)),
        (None, None, None) => Ok(strider::summary::day_range(parse_date(None)?, &Local)?),
        (None, Some(_), None) => Err(StriderCliError::ParseError(
            "--from requires --to".to_string(),
        )),
        (None, None, Some(_)) => Err(StriderCliError::ParseError(
            "--to requires --from".to_string(),
        )),
    }
}

fn parse_instant(s: &str) -> Result<DateTime<Utc>, StriderCliError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StriderCliError::ParseError(format!("Invalid timestamp '{}': {}", s, e)))
}

fn format_steps(steps: &[Step], format: &OutputFormat) -> Result<String, StriderCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut out = String::new();
            for step in steps {
                out.push_str(&serde_json::to_string(step)?);
                out.push('\n');
            }
            Ok(out)
        }
        OutputFormat::Json => Ok(serde_json::to_string(steps)? + "\n"),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(steps)? + "\n"),
    }
}

fn print_day(summary: &DaySummary) {
    println!("{}", summary.date);
    println!(
        "  Steps:    {} / {} ({:.0}%)",
        summary.steps,
        summary.goal,
        summary.progress * 100.0
    );
    println!("  Distance: {}", summary.distance_label());
    println!("  Calories: {}", summary.calories_label());
    if summary.goal_reached {
        println!("  Goal reached");
    }
}

fn print_week(week: &WeekSummary) {
    for day in &week.days {
        let mark = if day.goal_reached { "*" } else { " " };
        println!(
            "{} {} {:>6} steps  {:>9}  {:>12}",
            mark,
            day.date.format("%a %Y-%m-%d"),
            day.steps,
            day.distance_label(),
            day.calories_label()
        );
    }
    println!();
    println!("Total: {} steps", week.total_steps);
    println!("       {}", format_distance(week.total_distance_km));
    println!("       {}", format_calories(week.total_calories));
    println!("Goal reached on {} of {} days", week.days_goal_reached, week.days.len());
}

// Error types

#[derive(Debug)]
enum StriderCliError {
    Io(io::Error),
    Tracker(TrackerError),
    Json(serde_json::Error),
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for StriderCliError {
    fn from(e: io::Error) -> Self {
        StriderCliError::Io(e)
    }
}

impl From<TrackerError> for StriderCliError {
    fn from(e: TrackerError) -> Self {
        StriderCliError::Tracker(e)
    }
}

impl From<serde_json::Error> for StriderCliError {
    fn from(e: serde_json::Error) -> Self {
        StriderCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<StriderCliError> for CliError {
    fn from(e: StriderCliError) -> Self {
        match e {
            StriderCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            StriderCliError::Tracker(e) => {
                let (code, hint) = match &e {
                    TrackerError::InvalidProfile(_) => (
                        "INVALID_PROFILE",
                        "Name must not be blank; height and weight must be positive",
                    ),
                    TrackerError::InvalidGoal(_) => ("INVALID_GOAL", "Goal must be at least 1 step"),
                    TrackerError::SensorUnavailable(_) => (
                        "SENSOR_UNAVAILABLE",
                        "Use 'strider run --simulate <cadence>' or pipe pulses on stdin",
                    ),
                    TrackerError::InvalidDate(_) => ("INVALID_DATE", "Use YYYY-MM-DD"),
                    TrackerError::Config(_) => ("CONFIG_ERROR", "Run 'strider doctor' for details"),
                    _ => ("TRACKER_ERROR", "Run 'strider doctor' for details"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            StriderCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            StriderCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            StriderCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Check input format".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    data_dir: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
