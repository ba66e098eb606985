use std::path::PathBuf;
use std::sync::Arc;

use alertpilot::alert::{AlertCandidate, Severity};
use alertpilot::config::{AppConfig, LoggingConfig};
use alertpilot::forecast::Threshold;
use alertpilot::noise::{MetadataValue, NewSuppressionRule, RuleFilter, RuleType};
use alertpilot::{scheduler, AlertPipeline};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "alertpilot",
    about = "Alert intelligence: metric forecasting and alert noise reduction",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (TOML). Defaults to $ALERTPILOT_CONFIG, then the system path.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the database path from the configuration
    #[arg(long, global = true, env = "ALERTPILOT_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Forecast a metric at one or more horizons
    Predict {
        #[arg(long)]
        device: String,

        #[arg(long)]
        metric: String,

        /// Horizon in minutes (repeatable). Defaults to the configured horizons.
        #[arg(long = "horizon")]
        horizons: Vec<u32>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Predict when a metric crosses a threshold
    Crossing {
        #[arg(long)]
        device: String,

        #[arg(long)]
        metric: String,

        /// Threshold as label=value (repeatable). Defaults to warning=80, critical=90.
        #[arg(long = "threshold", value_parser = parse_threshold)]
        thresholds: Vec<(String, f64)>,

        /// Treat thresholds as lower bounds (crossing while falling)
        #[arg(long)]
        lower: bool,

        #[arg(long)]
        json: bool,
    },

    /// Project exhaustion of disk, memory and connection pool usage
    Exhaustion {
        #[arg(long)]
        device: String,

        #[arg(long)]
        json: bool,
    },

    /// Decide whether an alert should be suppressed
    Check {
        #[arg(long)]
        device: String,

        #[arg(long)]
        alert_type: String,

        #[arg(long)]
        message: String,

        #[arg(long, default_value = "warning")]
        severity: Severity,

        /// Store the alert and record the suppression outcome
        #[arg(long)]
        record: bool,

        #[arg(long)]
        json: bool,
    },

    /// Manage suppression rules
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },

    /// Noise reduction statistics
    Stats {
        /// Reporting window in hours
        #[arg(long, default_value = "24")]
        hours: u32,

        #[arg(long)]
        json: bool,
    },

    /// List alerts oscillating between states
    Flapping {
        #[arg(long, default_value = "24")]
        hours: u32,

        #[arg(long)]
        json: bool,
    },

    /// Periodically scan devices for resource exhaustion
    Watch {
        /// Cron expression (6-field, seconds first)
        #[arg(long, default_value = "0 */5 * * * *")]
        schedule: String,

        /// Device to scan (repeatable)
        #[arg(long = "device", required = true)]
        devices: Vec<String>,

        /// Hours of alert history reviewed for flapping on each scan
        #[arg(long, default_value = "1")]
        review_hours: u32,

        /// Run a single scan and print the report
        #[arg(long)]
        once: bool,

        /// Print the scan times in the next N hours and exit
        #[arg(long, value_name = "HOURS", conflicts_with = "once")]
        preview: Option<u32>,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RulesAction {
    /// List suppression rules
    List {
        #[arg(long)]
        device: Option<String>,

        #[arg(long = "type")]
        rule_type: Option<RuleType>,

        #[arg(long)]
        active_only: bool,

        #[arg(long)]
        json: bool,
    },

    /// Add a suppression rule
    Add {
        #[arg(long)]
        name: String,

        /// maintenance, known_issue, schedule or regex
        #[arg(long = "type")]
        rule_type: RuleType,

        #[arg(long)]
        device: Option<String>,

        /// Substring (or regular expression for regex rules)
        #[arg(long)]
        pattern: Option<String>,

        /// RFC 3339 start of the active window
        #[arg(long)]
        start: Option<DateTime<Utc>>,

        /// RFC 3339 end of the active window
        #[arg(long)]
        end: Option<DateTime<Utc>>,

        /// Weekdays, 0 = Monday (comma separated)
        #[arg(long, value_delimiter = ',')]
        days: Vec<u8>,

        #[arg(long, default_value = "cli")]
        created_by: String,

        /// Annotation as key=value (repeatable)
        #[arg(long = "meta", value_parser = parse_key_value)]
        metadata: Vec<(String, String)>,

        /// Create the rule disabled
        #[arg(long)]
        inactive: bool,
    },

    /// Remove a suppression rule
    Remove {
        #[arg(long)]
        id: Uuid,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    Ok((key.trim().to_string(), value.trim().to_string()))
}

fn parse_threshold(raw: &str) -> Result<(String, f64), String> {
    let (label, value) = parse_key_value(raw)?;
    let value: f64 = value
        .parse()
        .map_err(|_| format!("threshold value in '{}' is not a number", raw))?;
    Ok((label, value))
}

fn metadata_value(raw: String) -> MetadataValue {
    if let Ok(b) = raw.parse::<bool>() {
        MetadataValue::Bool(b)
    } else if let Ok(n) = raw.parse::<f64>() {
        MetadataValue::Number(n)
    } else {
        MetadataValue::Text(raw)
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::load_or_default(),
    };
    if let Some(db) = cli.db {
        config.storage.db_path = db;
    }
    init_tracing(&config.logging);

    let (pipeline, store) = AlertPipeline::open(&config)?;

    match cli.command {
        Commands::Predict {
            device,
            metric,
            horizons,
            json,
        } => {
            let predictions = pipeline.forecast.predict_metric(&device, &metric, &horizons).await;
            if json {
                print_json(&predictions)?;
            } else if predictions.is_empty() {
                println!(
                    "Not enough history for {} on {} (need {} samples).",
                    metric,
                    device,
                    config.forecast.min_samples
                );
            } else {
                println!("{:<10} | {:>10} | {:>21} | Model", "Horizon", "Predicted", "95% interval");
                println!("{:-<10}-|-{:->10}-|-{:->21}-|-{:-<11}", "", "", "", "");
                for p in predictions {
                    println!(
                        "{:<10} | {:>10.2} | {:>10.2} - {:<8.2} | {}",
                        format!("{}m", p.horizon_minutes),
                        p.predicted_value,
                        p.ci_lower,
                        p.ci_upper,
                        p.model_type
                    );
                }
            }
        }
        Commands::Crossing {
            device,
            metric,
            thresholds,
            lower,
            json,
        } => {
            let thresholds: Vec<Threshold> = thresholds
                .into_iter()
                .map(|(label, value)| {
                    if lower {
                        Threshold::lower(label, value)
                    } else {
                        Threshold::upper(label, value)
                    }
                })
                .collect();
            let custom = (!thresholds.is_empty()).then_some(thresholds.as_slice());
            let crossing = pipeline
                .forecast
                .predict_threshold_crossing(&device, &metric, custom)
                .await;
            if json {
                print_json(&crossing)?;
            } else {
                match crossing {
                    Some(c) => {
                        println!("Threshold:  {} ({:.2}, {:?})", c.threshold_label, c.threshold_value, c.threshold_type);
                        println!("Crossing:   {} ({:.1}h from now)", c.estimated_crossing_time.to_rfc3339(), c.hours_until_crossing);
                        println!("Current:    {:.2} ({:?}, {:+.3}/h)", c.current_value, c.trend, c.growth_rate_per_hour);
                        println!("Confidence: {:.0}%", c.confidence * 100.0);
                    }
                    None => println!("No threshold crossing predicted for {} on {}.", metric, device),
                }
            }
        }
        Commands::Exhaustion { device, json } => {
            let warnings = pipeline.forecast.detect_resource_exhaustion(&device).await;
            if json {
                print_json(&warnings)?;
            } else if warnings.is_empty() {
                println!("No resource exhaustion projected for {}.", device);
            } else {
                for w in warnings {
                    println!("[{}] {}", w.severity.to_string().to_uppercase(), w.message);
                }
            }
        }
        Commands::Check {
            device,
            alert_type,
            message,
            severity,
            record,
            json,
        } => {
            let candidate = AlertCandidate::new(device, alert_type, message, severity);
            let decision = if record {
                let alert_id = Uuid::new_v4().to_string();
                store
                    .insert_alert(&alert_id, &candidate, "active")
                    .await
                    .context("Failed to record alert")?;
                pipeline.noise.process_alert(&alert_id, &candidate).await
            } else {
                pipeline.noise.evaluate(&candidate).await
            };
            if json {
                print_json(&decision)?;
            } else {
                match &decision.reason {
                    Some(reason) => println!("SUPPRESS ({})", reason),
                    None => println!("ADMIT"),
                }
            }
        }
        Commands::Rules { action } => match action {
            RulesAction::List {
                device,
                rule_type,
                active_only,
                json,
            } => {
                let filter = RuleFilter {
                    device_id: device,
                    rule_type,
                    active_only,
                };
                let rules = pipeline.noise.get_suppression_rules(&filter).await?;
                if json {
                    print_json(&rules)?;
                } else if rules.is_empty() {
                    println!("No suppression rules found.");
                } else {
                    println!("{:<36} | {:<20} | {:<12} | {:<12} | Active", "ID", "Name", "Type", "Device");
                    println!("{:-<36}-|-{:-<20}-|-{:-<12}-|-{:-<12}-|-{:-<6}", "", "", "", "", "");
                    for r in rules {
                        println!(
                            "{:<36} | {:<20} | {:<12} | {:<12} | {}",
                            r.id,
                            r.name,
                            r.rule_type,
                            r.device_id.as_deref().unwrap_or("*"),
                            r.is_active
                        );
                    }
                }
            }
            RulesAction::Add {
                name,
                rule_type,
                device,
                pattern,
                start,
                end,
                days,
                created_by,
                metadata,
                inactive,
            } => {
                let mut input = NewSuppressionRule::new(name, rule_type, created_by);
                input.device_id = device;
                input.alert_pattern = pattern;
                input.start_time = start;
                input.end_time = end;
                input.days_of_week = (!days.is_empty()).then_some(days);
                input.is_active = !inactive;
                input.metadata = metadata
                    .into_iter()
                    .map(|(k, v)| (k, metadata_value(v)))
                    .collect();
                let rule = pipeline.noise.create_suppression_rule(input).await?;
                println!("Rule '{}' added ({}).", rule.name, rule.id);
            }
            RulesAction::Remove { id } => {
                pipeline.noise.delete_suppression_rule(id).await?;
                println!("Rule {} removed.", id);
            }
        },
        Commands::Stats { hours, json } => {
            let stats = pipeline.noise.get_noise_reduction_stats(hours).await?;
            if json {
                print_json(&stats)?;
            } else {
                println!("Noise reduction, last {} hours", stats.period_hours);
                println!("Total:      {}", stats.total_alerts);
                println!("Suppressed: {} ({:.1}%)", stats.suppressed_alerts, stats.suppression_rate);
                println!("Admitted:   {}", stats.admitted_alerts);
                for (reason, count) in &stats.by_reason {
                    println!("  {:<28} {}", reason, count);
                }
            }
        }
        Commands::Flapping { hours, json } => {
            let flapping = pipeline.noise.detect_flapping_alerts(hours).await;
            if json {
                print_json(&flapping)?;
            } else if flapping.is_empty() {
                println!("No flapping alerts in the last {} hours.", hours);
            } else {
                for f in flapping {
                    println!(
                        "{} / {}: {} transitions over {} alerts ({:.1}/h)",
                        f.device_id, f.alert_type, f.transitions, f.occurrences, f.flaps_per_hour
                    );
                }
            }
        }
        Commands::Watch {
            schedule,
            devices,
            review_hours,
            once,
            preview,
            json,
        } => {
            let schedule = scheduler::parse_schedule(&schedule)?;
            if let Some(hours) = preview {
                let runs = scheduler::preview(&schedule, Utc::now(), hours);
                if json {
                    print_json(&runs)?;
                } else {
                    println!("Upcoming scans in the next {}h ({}):", hours, runs.len());
                    for run in &runs {
                        println!("  {}", run.to_rfc3339());
                    }
                }
            } else if once {
                let report = scheduler::run_scan_once(&pipeline, &devices, review_hours).await;
                if json {
                    print_json(&report)?;
                } else {
                    println!(
                        "Scanned {} devices: {} warnings, {} admitted, {} suppressed, {} flapping",
                        report.devices,
                        report.warnings.len(),
                        report.admitted.len(),
                        report.suppressed.len(),
                        report.flapping.len()
                    );
                }
            } else {
                tracing::info!(devices = ?devices, "Starting exhaustion watch");
                scheduler::run_scan_loop(Arc::new(pipeline), schedule, devices, review_hours).await;
            }
        }
    }

    Ok(())
}
