//! `forcetrack replay`: feed a recorded report log through a [`ForceService`].
//!
//! Reports are applied in file order with their own timestamps as the
//! receive time, so connectivity is judged on the log's timeline.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tabled::{settings::Style, Table, Tabled};

use force_tracker::{DeadZone, ForceService, ForceSnapshot, LocationReport, TrackerConfig};

/// Arguments for the replay command
#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// JSON array of location reports
    #[arg(short, long)]
    pub input: PathBuf,

    /// Tracker configuration (JSON); defaults are used for missing fields
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// JSON array of dead zones
    #[arg(short, long)]
    pub dead_zones: Option<PathBuf>,

    /// Forecast horizon in seconds
    #[arg(long, default_value = "30")]
    pub horizon: f64,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum OutputFormat {
    /// Pretty table output
    #[default]
    Table,
    /// JSON output
    Json,
    /// Tab-separated, one force per line
    Compact,
}

/// Dead zone as written in the zones file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadZoneInput {
    /// Zone identifier
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Centre latitude
    pub latitude: f64,
    /// Centre longitude
    pub longitude: f64,
    /// Radius in metres
    pub radius: f64,
}

/// Counts from one replay.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Reports applied to a filter
    pub accepted: usize,
    /// Reports rejected as invalid
    pub rejected: usize,
    /// Forces marked disconnected at the end of the log
    pub disconnected: usize,
}

/// Force display row for tables
#[derive(Tabled, Serialize, Deserialize, Debug)]
pub struct ForceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    force_type: String,
    #[tabled(rename = "Latitude")]
    latitude: String,
    #[tabled(rename = "Longitude")]
    longitude: String,
    #[tabled(rename = "Velocity (deg/s)")]
    velocity: String,
    #[tabled(rename = "Forecast")]
    forecast: String,
    #[tabled(rename = "Reports")]
    reports: u64,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Dead Zones")]
    dead_zones: String,
}

/// Execute the replay command
pub async fn execute(args: ReplayArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => read_json::<TrackerConfig>(path).await?,
        None => TrackerConfig::default(),
    };
    let service = ForceService::new(config).context("Invalid tracker configuration")?;

    if let Some(path) = &args.dead_zones {
        let zones: Vec<DeadZoneInput> = read_json(path).await?;
        let count = load_dead_zones(&service, zones)?;
        tracing::info!(zones = count, "Loaded dead zones");
    }

    let reports: Vec<LocationReport> = read_json(&args.input).await?;
    let summary = replay_reports(&service, reports);

    let rows = force_rows(&service, args.horizon, matches!(args.format, OutputFormat::Table));
    print_rows(rows, &summary, &args.format)
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Register `zones` with the service. Returns how many were loaded.
pub fn load_dead_zones(service: &ForceService, zones: Vec<DeadZoneInput>) -> Result<usize> {
    let count = zones.len();
    for zone in zones {
        let dz = DeadZone::new(&zone.id, zone.name, zone.latitude, zone.longitude, zone.radius)
            .with_context(|| format!("Invalid dead zone '{}'", zone.id))?;
        service.dead_zones().upsert(dz);
    }
    Ok(count)
}

/// Apply `reports` in order, then mark forces silent at the end of the log.
pub fn replay_reports(service: &ForceService, reports: Vec<LocationReport>) -> ReplaySummary {
    let mut summary = ReplaySummary::default();
    let mut log_end = i64::MIN;

    for report in reports {
        let received = report.timestamp_ms;
        match service.report_at(report, received) {
            Ok(_) => {
                summary.accepted += 1;
                log_end = log_end.max(received);
            }
            Err(_) => summary.rejected += 1,
        }
    }

    if summary.accepted > 0 {
        summary.disconnected = service.sweep_disconnected(log_end).len();
    }
    summary
}

/// One display row per force, with the position forecast `horizon` seconds ahead.
pub fn force_rows(service: &ForceService, horizon: f64, use_color: bool) -> Vec<ForceRow> {
    service
        .forces()
        .into_iter()
        .map(|force| {
            let forecast = service.forecast(&force.id, horizon);
            to_row(force, forecast, use_color)
        })
        .collect()
}

fn to_row(
    force: ForceSnapshot,
    forecast: force_tracker::Result<[f64; 2]>,
    use_color: bool,
) -> ForceRow {
    let [lat, lon, v_lat, v_lon] = force.estimate;
    let forecast = match forecast {
        Ok([f_lat, f_lon]) => format!("{f_lat:.6}, {f_lon:.6}"),
        Err(e) => e.to_string(),
    };
    let status = match (force.connected, use_color) {
        (true, true) => "Connected".green().to_string(),
        (false, true) => "Disconnected".red().to_string(),
        (true, false) => "Connected".to_string(),
        (false, false) => "Disconnected".to_string(),
    };

    ForceRow {
        id: force.id,
        name: force.name,
        force_type: force.force_type,
        latitude: format!("{lat:.6}"),
        longitude: format!("{lon:.6}"),
        velocity: format!("{v_lat:+.2e}, {v_lon:+.2e}"),
        forecast,
        reports: force.reports,
        status,
        dead_zones: force.dead_zones.join(","),
    }
}

fn print_rows(rows: Vec<ForceRow>, summary: &ReplaySummary, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Compact => {
            for r in &rows {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    r.id, r.latitude, r.longitude, r.forecast, r.status
                );
            }
        }
        OutputFormat::Table => {
            println!("{}", "Tracked Forces".bold().cyan());
            println!("{}", "=".repeat(100));

            if rows.is_empty() {
                println!("No forces tracked.");
            } else {
                println!("{}", Table::new(rows).with(Style::rounded()).to_string());
            }

            let tag = if summary.rejected == 0 {
                "[OK]".green().bold()
            } else {
                "[WARN]".yellow().bold()
            };
            println!(
                "{} Replayed {} reports ({} rejected), {} disconnected at end of log",
                tag, summary.accepted, summary.rejected, summary.disconnected
            );
        }
    }
    Ok(())
}
