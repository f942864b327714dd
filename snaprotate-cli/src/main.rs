/*!
Snaprotate CLI - Command-line interface for tag-driven snapshot rotation.

Runs a rotation pass described by an invocation event (a JSON file or stdin)
against AWS, or checks an event without touching any cloud API.
*/

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};
use snaprotate_core::{init_observability, RotationEvent};
use std::io::Read;
use tabled::{Table, Tabled};
use tracing::info;

#[derive(Parser)]
#[command(name = "snaprotate")]
#[command(about = "Tag-driven rotation of EC2 volume and RDS database snapshots")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one rotation pass and print the response
    Run {
        /// Event file, or `-` for stdin
        #[arg(short, long, env = "SNAPROTATE_EVENT")]
        event: String,
        /// Print a summary table instead of the JSON response
        #[arg(short, long)]
        table: bool,
        /// Dump Prometheus metrics after the pass
        #[arg(short, long)]
        metrics: bool,
    },
    /// Validate an event and show the resolved rotation settings
    Check {
        /// Event file, or `-` for stdin
        #[arg(short, long, env = "SNAPROTATE_EVENT")]
        event: String,
    },
}

#[derive(Tabled)]
struct KindSummary {
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Resources")]
    resources: usize,
    #[tabled(rename = "Created")]
    created: usize,
    #[tabled(rename = "Deleted")]
    deleted: usize,
    #[tabled(rename = "Errors")]
    errors: usize,
}

#[derive(Tabled)]
struct KindSettings {
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Region")]
    region: String,
    #[tabled(rename = "Period")]
    period: String,
    #[tabled(rename = "Date Suffix")]
    date_suffix: String,
    #[tabled(rename = "Tag")]
    tag: String,
    #[tabled(rename = "Keep")]
    keep: usize,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    init_observability(cli.verbose, cli.json_logs)?;

    match cli.command {
        Commands::Run {
            event,
            table,
            metrics,
        } => run(&read_event(&event)?, table, metrics)?,
        Commands::Check { event } => check(&read_event(&event)?)?,
    }

    Ok(())
}

fn read_event(source: &str) -> Result<RotationEvent, anyhow::Error> {
    let event = if source == "-" {
        let mut json = String::new();
        std::io::stdin().read_to_string(&mut json)?;
        RotationEvent::from_json(&json)?
    } else {
        RotationEvent::from_path(source)
            .with_context(|| format!("Failed to read event from {source}"))?
    };
    Ok(event)
}

#[cfg(feature = "aws")]
fn run(event: &RotationEvent, table: bool, metrics: bool) -> Result<(), anyhow::Error> {
    use snaprotate_core::{handle_event, RotationMetrics};

    info!("Running rotation for period {}", event.period_label);
    let body = handle_event(event)?.into_value();

    if table {
        println!("{}", Table::new(summary_rows(event, &body)));
    } else {
        println!("{}", serde_json::to_string_pretty(&body)?);
    }

    if metrics {
        println!("{}", RotationMetrics::global()?.gather_metrics()?);
    }

    Ok(())
}

#[cfg(not(feature = "aws"))]
fn run(_event: &RotationEvent, _table: bool, _metrics: bool) -> Result<(), anyhow::Error> {
    Err(anyhow::anyhow!("AWS support not enabled"))
}

fn check(event: &RotationEvent) -> Result<(), anyhow::Error> {
    info!("Checking event for period {}", event.period_label);
    event.validate()?;
    let settings = settings_rows(event)?;

    if settings.is_empty() {
        println!("No regions configured; nothing would be rotated");
    } else {
        println!("{}", Table::new(settings));
    }
    if let Some(arn) = &event.arn {
        println!("Reports: {arn}");
    }
    if let Some(arn) = &event.error_arn {
        println!("Errors: {arn}");
    }

    Ok(())
}

fn settings_rows(event: &RotationEvent) -> Result<Vec<KindSettings>, anyhow::Error> {
    let date_suffix = event.date_suffix(Local::now())?;
    let config = event.rotation_config(date_suffix);

    Ok(event
        .configured_kinds()
        .into_iter()
        .map(|(kind, region)| KindSettings {
            kind: kind.service_name().to_string(),
            region: region.to_string(),
            period: config.period.clone(),
            date_suffix: config.date_suffix.clone(),
            tag: format!("{}={}", config.tag_key, config.tag_value),
            keep: config.keep_count,
        })
        .collect())
}

#[cfg_attr(not(feature = "aws"), allow(dead_code))]
fn summary_rows(event: &RotationEvent, body: &serde_json::Value) -> Vec<KindSummary> {
    let count = |metrics: &serde_json::Value, key: &str| {
        metrics[key].as_u64().unwrap_or_default() as usize
    };

    event
        .configured_kinds()
        .into_iter()
        .map(|(kind, _)| {
            let metrics = &body[format!("{}_metrics", kind.label())];
            KindSummary {
                kind: kind.service_name().to_string(),
                resources: count(metrics, "total_resources"),
                created: count(metrics, "total_creates"),
                deleted: count(metrics, "total_deletes"),
                errors: count(metrics, "total_errors"),
            }
        })
        .collect()
}
