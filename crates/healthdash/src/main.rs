//! `hdash` - CLI for healthdash
//!
//! This binary collects records from an HCGateway server and renders the
//! dashboard and analyses in the terminal.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Parser;
use tracing::warn;

use healthdash::analytics::series::{
    aggregate_by_date, clean_series, days_before, moving_average, parse_since, percentages,
};
use healthdash::analytics::stats::{
    correlation_matrix, detect_trend, identify_outliers, summary_report, BasicStats,
};
use healthdash::analytics::{extract_points, AggFunc, HealthAnalyzer, HealthReport};
use healthdash::cli::{
    AnalyzeCommand, Cli, CollectCommand, Command, ConfigCommand, CorrelateCommand, ExportCommand,
    ImportCommand, SummaryCommand,
};
use healthdash::export::{export_all, export_method_csv, import_csv};
use healthdash::record::{is_known_method, ALL_METHODS};
use healthdash::{init_logging, Collector, CollectorHandle, Config, GatewayClient, Storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone()).context("loading configuration")?;

    // Execute the command
    match cli.command {
        Command::Collect(cmd) => handle_collect(&config, cmd).await,
        Command::Status(cmd) => handle_status(&config, cmd.json),
        Command::Report(cmd) => handle_report(&config, cmd.json),
        Command::Analyze(cmd) => handle_analyze(&config, &cmd),
        Command::Correlate(cmd) => handle_correlate(&config, &cmd),
        Command::Summary(cmd) => handle_summary(&config, &cmd),
        Command::Export(cmd) => handle_export(&config, &cmd),
        Command::Import(cmd) => handle_import(&config, &cmd),
        Command::Prune(cmd) => handle_prune(&config, &cmd.older_than),
        Command::Methods(cmd) => {
            handle_methods(&config, cmd.all);
            Ok(())
        }
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

fn open_storage(config: &Config) -> anyhow::Result<Storage> {
    let path = config.database_path();
    Storage::open(&path).with_context(|| format!("opening database {}", path.display()))
}

fn fmt_time(ts: Option<DateTime<Utc>>) -> String {
    ts.map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string())
}

fn fmt_opt(value: Option<f64>, unit: &str) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.1}{unit}"))
}

fn lookback(config: &Config, days: Option<u32>) -> anyhow::Result<DateTime<Utc>> {
    let days = days.unwrap_or(config.dashboard.default_days);
    days_before(Utc::now(), days).context("--days reaches too far back")
}

async fn handle_collect(config: &Config, cmd: CollectCommand) -> anyhow::Result<()> {
    let client = GatewayClient::new(&config.gateway)?;
    let storage = open_storage(config)?;
    let collector = Collector::new(client, storage, config.collector.clone())
        .with_retention(config.max_age());

    match cmd {
        CollectCommand::Run => {
            collector.run(&config.methods(), &CollectorHandle::new()).await?;
        }
        CollectCommand::Once { methods } => {
            let methods = if methods.is_empty() {
                config.methods()
            } else {
                methods
            };
            if let Some(unknown) = methods.iter().find(|m| !is_known_method(m)) {
                return Err(healthdash::Error::UnknownMethod(unknown.clone()))
                    .context("see `hdash methods --all`");
            }

            let report = collector.run_cycle(&methods).await;
            for outcome in &report.outcomes {
                println!(
                    "{:<24} fetched {:>6}  new {:>6}  updated {:>6}",
                    outcome.method, outcome.fetched, outcome.inserted, outcome.updated
                );
            }
            for failure in &report.failures {
                println!("{:<24} FAILED: {}", failure.method, failure.error);
            }
            if !report.is_clean() {
                bail!("{} of {} methods failed", report.failures.len(), methods.len());
            }
        }
    }
    Ok(())
}

fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    let stats = storage.stats()?;
    let methods = storage.method_stats()?;

    if json {
        let status = serde_json::json!({
            "database_path": storage.path(),
            "storage": stats,
            "methods": methods,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("hdash status");
    println!("------------");
    println!("Database:      {}", storage.path().display());
    println!("Size:          {} bytes", stats.db_size_bytes);
    println!("Records:       {}", stats.total_records);
    println!("Methods:       {}", stats.methods);
    println!("Oldest:        {}", fmt_time(stats.oldest_record));
    println!("Newest:        {}", fmt_time(stats.newest_record));
    println!();
    if methods.is_empty() {
        println!("No records collected yet. Run `hdash collect once`.");
        return Ok(());
    }
    println!(
        "{:<24} {:>8}  {:<16}  {:<16}",
        "METHOD", "RECORDS", "CURSOR", "LAST INGEST"
    );
    for m in &methods {
        println!(
            "{:<24} {:>8}  {:<16}  {:<16}",
            m.method,
            m.records,
            fmt_time(m.cursor),
            fmt_time(m.last_ingested)
        );
    }
    Ok(())
}

fn handle_report(config: &Config, json: bool) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    let report = HealthAnalyzer::new(&storage, Utc::now()).report()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&config.dashboard.name, &report);
    }
    Ok(())
}

fn print_report(name: &str, report: &HealthReport) {
    let trend = |t: Option<healthdash::analytics::TrendLabel>| {
        t.map_or_else(String::new, |t| format!(" ({t})"))
    };

    println!("{name}");
    println!("{}", "=".repeat(name.len()));
    println!("Generated: {}", fmt_time(Some(report.generated_at)));
    println!();

    let body = &report.body_composition;
    println!("[Body composition]");
    println!(
        "  Weight:             {}{}",
        fmt_opt(body.weight.current, " kg"),
        trend(body.weight.trend)
    );
    println!(
        "  Height:             {}",
        body.height
            .current
            .map_or_else(|| "-".to_string(), |h| format!("{h:.2} m"))
    );
    match body.bmi {
        Some(bmi) => println!("  BMI:                {:.1} ({})", bmi.value, bmi.category),
        None => println!("  BMI:                -"),
    }
    println!(
        "  Body fat:           {}{}",
        fmt_opt(body.body_fat.current, " %"),
        trend(body.body_fat.trend)
    );
    println!(
        "  Lean mass:          {}",
        fmt_opt(body.lean_body_mass.current, " kg")
    );
    println!(
        "  BMR:                {}",
        fmt_opt(body.basal_metabolic_rate.current, " kcal/day")
    );
    println!();

    let vitals = &report.vital_signs;
    println!("[Vital signs]");
    println!(
        "  Heart rate:         {}{}",
        fmt_opt(vitals.heart_rate.current, " bpm"),
        trend(vitals.heart_rate.trend)
    );
    println!(
        "  Resting HR:         {}",
        fmt_opt(vitals.resting_heart_rate, " bpm")
    );
    match (vitals.blood_pressure.systolic, vitals.blood_pressure.diastolic) {
        (Some(s), Some(d)) => println!("  Blood pressure:     {s:.0}/{d:.0} mmHg"),
        _ => println!("  Blood pressure:     -"),
    }
    println!(
        "  SpO2:               {}",
        fmt_opt(vitals.oxygen_saturation.current, " %")
    );
    println!(
        "  Temperature:        {}",
        fmt_opt(vitals.body_temperature.current, " °C")
    );
    println!();

    let fitness = &report.fitness;
    println!("[Fitness]");
    match fitness.steps.daily_average {
        Some(avg) => println!(
            "  Steps/day (totals): {avg}{}",
            trend(fitness.steps.trend)
        ),
        None => println!("  Steps/day (totals): -"),
    }
    println!(
        "  Distance/day:       {}",
        fitness
            .distance
            .daily_average_km
            .map_or_else(|| "-".to_string(), |km| format!("{km:.2} km"))
    );
    println!(
        "  Active kcal/day:    {}",
        fitness
            .calories
            .active_daily_average
            .map_or_else(|| "-".to_string(), |v| v.to_string())
    );
    println!(
        "  Total kcal/day:     {}",
        fitness
            .calories
            .total_daily_average
            .map_or_else(|| "-".to_string(), |v| v.to_string())
    );
    println!("  VO2 max:            {}", fmt_opt(fitness.vo2_max.current, ""));
    println!();

    println!("[Sleep]");
    println!(
        "  Average:            {} ({} sessions)",
        report
            .sleep
            .average_hours
            .map_or_else(|| "-".to_string(), |h| format!("{h:.2} h")),
        report.sleep.sessions
    );
    println!();

    let score = &report.health_score;
    println!("[Health score]");
    println!("  Body composition:   {}", score.body_composition);
    println!("  Cardiovascular:     {}", score.cardiovascular);
    println!("  Fitness:            {}", score.fitness);
    println!("  Overall:            {}", score.overall);
}

fn handle_analyze(config: &Config, cmd: &AnalyzeCommand) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    let records = storage.records_since(&cmd.method, lookback(config, cmd.days)?)?;
    let points = clean_series(&extract_points(&records, &cmd.method, &cmd.key));
    if points.is_empty() {
        bail!(
            "no numeric '{}.{}' values in the selected window",
            cmd.method,
            cmd.key
        );
    }

    let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
    let stats = BasicStats::from_values(&values);
    let trend = detect_trend(&points);
    let flags = identify_outliers(&values, cmd.outliers.into());
    let outliers: Vec<_> = points
        .iter()
        .zip(&flags)
        .filter(|(_, flagged)| **flagged)
        .map(|(p, _)| *p)
        .collect();

    let agg: AggFunc = cmd.agg.into();
    let daily = aggregate_by_date(&points, agg);
    let daily_values: Vec<f64> = daily.iter().map(|d| d.value).collect();
    let smoothed = moving_average(&daily_values, cmd.window);

    if cmd.json {
        let rows: Vec<_> = daily
            .iter()
            .zip(&smoothed)
            .map(|(d, ma)| serde_json::json!({"date": d.date, "value": d.value, "moving_average": ma}))
            .collect();
        let out = serde_json::json!({
            "method": cmd.method,
            "key": cmd.key,
            "statistics": stats,
            "trend": trend,
            "outliers": outliers,
            "aggregation": agg,
            "window": cmd.window,
            "daily": rows,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{}.{} ({} values)", cmd.method, cmd.key, values.len());
    if let Some(s) = stats {
        println!(
            "  mean {:.2}  median {:.2}  std {:.2}  min {:.2}  max {:.2}",
            s.mean, s.median, s.std, s.min, s.max
        );
    }
    match trend {
        Some(t) => println!(
            "  trend: {:?}, {:?} (slope {:.4}, R² {:.3})",
            t.direction, t.strength, t.slope, t.r_squared
        ),
        None => println!("  trend: not enough data"),
    }
    println!("  outliers: {}", outliers.len());
    for (t, v) in &outliers {
        println!("    {}  {v:.2}", fmt_time(Some(*t)));
    }
    println!();
    println!("  {:<10}  {:>12}  {:>12}", "DATE", agg.to_string().to_uppercase(), "MA");
    for (d, ma) in daily.iter().zip(&smoothed) {
        let ma = ma.map_or_else(|| "-".to_string(), |m| format!("{m:.2}"));
        println!("  {:<10}  {:>12.2}  {ma:>12}", d.date.to_string(), d.value);
    }
    Ok(())
}

fn handle_correlate(config: &Config, cmd: &CorrelateCommand) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    let cutoff = lookback(config, cmd.days)?;

    let mut series: Vec<(String, BTreeMap<NaiveDate, f64>)> = Vec::new();
    for field in &cmd.fields {
        let Some((method, key)) = field.split_once('.') else {
            bail!("'{field}' is not of the form METHOD.KEY");
        };
        let records = storage.records_since(method, cutoff)?;
        let daily = aggregate_by_date(&extract_points(&records, method, key), AggFunc::Mean);
        series.push((
            field.clone(),
            daily.into_iter().map(|d| (d.date, d.value)).collect(),
        ));
    }

    // Only days where every field has a value
    let common: Vec<NaiveDate> = series
        .first()
        .map(|(_, first)| {
            first
                .keys()
                .filter(|date| series.iter().all(|(_, s)| s.contains_key(*date)))
                .copied()
                .collect()
        })
        .unwrap_or_default();
    if common.len() < 2 {
        bail!("fewer than two days with data for every field");
    }

    let columns: Vec<(String, Vec<f64>)> = series
        .iter()
        .map(|(name, s)| {
            let values = common.iter().filter_map(|d| s.get(d).copied()).collect();
            (name.clone(), values)
        })
        .collect();
    let matrix = correlation_matrix(&columns);

    if cmd.json {
        let out = serde_json::json!({"days": common.len(), "correlation": matrix});
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Pearson correlation over {} days", common.len());
    let width = matrix.names.iter().map(String::len).max().unwrap_or(0).max(6);
    print!("{:<width$}", "");
    for name in &matrix.names {
        print!("  {name:>width$}");
    }
    println!();
    for (name, row) in matrix.names.iter().zip(&matrix.values) {
        print!("{name:<width$}");
        for r in row {
            if r.is_nan() {
                print!("  {:>width$}", "-");
            } else {
                print!("  {r:>width$.3}");
            }
        }
        println!();
    }
    Ok(())
}

fn handle_summary(config: &Config, cmd: &SummaryCommand) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    let records = match cmd.days {
        Some(days) => storage.records_since(&cmd.method, lookback(config, Some(days))?)?,
        None => storage.records(&cmd.method)?,
    };
    let summary = summary_report(&records, &cmd.method);

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{} summary", summary.method);
    println!("  Records:        {}", summary.records);
    println!("  Duplicate keys: {}", summary.duplicate_keys);
    println!(
        "  Missing:        start {}, end {}, app {}",
        summary.missing.start, summary.missing.end, summary.missing.app
    );
    println!(
        "  Range:          {} .. {}",
        fmt_time(summary.first_start),
        fmt_time(summary.last_start)
    );
    println!(
        "  Apps:           {} distinct, most common {}",
        summary.apps.unique_values,
        summary.apps.most_common.as_deref().unwrap_or("-")
    );
    for share in percentages(records.iter().filter_map(|r| r.app.as_deref())) {
        println!(
            "    {:<28} {:>6}  {:>5.1} %",
            share.value, share.count, share.percent
        );
    }
    for (field, s) in &summary.numeric_statistics {
        println!(
            "  {field:<24} mean {:.2}  median {:.2}  std {:.2}  min {:.2}  max {:.2}  n {}",
            s.mean, s.median, s.std, s.min, s.max, s.count
        );
    }
    Ok(())
}

fn handle_export(config: &Config, cmd: &ExportCommand) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    let dir = cmd.out.clone().unwrap_or_else(|| config.export_dir());

    let files = match &cmd.method {
        Some(method) => vec![export_method_csv(&storage, method, &dir)?],
        None => export_all(&storage, &dir)?,
    };
    for file in &files {
        println!("{:<24} {:>8} rows  {}", file.method, file.rows, file.path.display());
    }
    if files.is_empty() {
        println!("Nothing to export.");
    }
    Ok(())
}

fn handle_import(config: &Config, cmd: &ImportCommand) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    for path in &cmd.files {
        let report = import_csv(&storage, cmd.method.as_deref(), path)
            .with_context(|| format!("importing {}", path.display()))?;
        if !is_known_method(&report.method) {
            warn!(method = %report.method, "Imported rows under a method the gateway does not serve");
        }
        println!(
            "{:<24} {:>8} rows  new {}  updated {}  warnings {}  ({})",
            report.method,
            report.rows,
            report.summary.inserted,
            report.summary.updated,
            report.warnings,
            display_name(path)
        );
    }
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

fn handle_prune(config: &Config, older_than: &str) -> anyhow::Result<()> {
    let now = Utc::now();
    let max_age = now.signed_duration_since(parse_since(older_than, now)?);
    let storage = open_storage(config)?;
    let deleted = storage.prune_older_than(max_age)?;
    println!("Deleted {deleted} records older than {older_than}.");
    Ok(())
}

fn handle_methods(config: &Config, all: bool) {
    let configured = config.methods();
    if all {
        for method in ALL_METHODS {
            let marker = if configured.iter().any(|m| m == method) {
                "*"
            } else {
                " "
            };
            println!("{marker} {method}");
        }
    } else {
        for method in &configured {
            println!("{method}");
        }
    }
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let shown = config.redacted();
            if json {
                println!("{}", serde_json::to_string_pretty(&shown)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Gateway]");
                println!("  Base URL:           {}", shown.gateway.base_url);
                println!(
                    "  Username:           {}",
                    shown.gateway.username.as_deref().unwrap_or("-")
                );
                println!(
                    "  Password:           {}",
                    shown.gateway.password.as_deref().unwrap_or("-")
                );
                println!("  Timeout (s):        {}", shown.gateway.timeout_secs);
                println!("  Retry attempts:     {}", shown.gateway.retry_attempts);
                println!();
                println!("[Collector]");
                println!("  Tick (s):           {}", shown.collector.tick_seconds);
                println!("  Methods mode:       {}", shown.collector.methods_mode);
                println!("  Methods:            {}", shown.methods().join(", "));
                println!(
                    "  Initial lookback:   {} h",
                    shown.collector.initial_lookback_hours
                );
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", shown.database_path().display());
                println!("  Export dir:         {}", shown.export_dir().display());
                println!("  Max age (days):     {}", shown.storage.max_age_days);
                println!();
                println!("[Dashboard]");
                println!("  Name:               {}", shown.dashboard.name);
                println!("  Default days:       {}", shown.dashboard.default_days);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(loaded) if loaded.has_credentials() => println!("Configuration is valid."),
                Ok(_) => println!(
                    "Configuration is valid, but gateway credentials are missing; collection will fail."
                ),
                Err(e) => bail!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
