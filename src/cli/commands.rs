use super::render::{self, Labels};
use crate::backup::{
    pre_check_retention, progress_channel, run_backups, run_restore, BackupOptions, RestoreSource, RunSummary,
};
use crate::config::{AppConfig, DatabaseConfig};
use crate::database::create_driver;
use crate::error::{BackupError, Result};
use crate::storage::{list_for_database, Storage};
use console::style;
use dialoguer::Confirm;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// The requested databases in the order given, or every configured one in
/// sorted order when none were named.
pub fn select_databases(config: &AppConfig, requested: &[String]) -> Result<Vec<String>> {
    if requested.is_empty() {
        return Ok(config.databases.keys().cloned().collect());
    }
    for name in requested {
        if !config.databases.contains_key(name) {
            return Err(BackupError::Config(format!("unknown database: {}", name)));
        }
    }
    Ok(requested.to_vec())
}

fn lookup<'a>(config: &'a AppConfig, name: &str) -> Result<&'a DatabaseConfig> {
    config
        .databases
        .get(name)
        .ok_or_else(|| BackupError::Config(format!("unknown database: {}", name)))
}

fn confirm(prompt: &str) -> Result<bool> {
    Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| BackupError::Config(format!("reading confirmation: {}", e)))
}

pub async fn backup(
    config: Arc<AppConfig>,
    storage: Arc<dyn Storage>,
    requested: &[String],
    opts: BackupOptions,
    yes: bool,
    interrupts: Arc<AtomicUsize>,
) -> Result<bool> {
    let databases = select_databases(&config, requested)?;

    let plan = if opts.dry_run || opts.skip_retention {
        None
    } else {
        let plan = pre_check_retention(storage.as_ref(), &config, &databases).await;
        if !plan.is_empty() {
            println!("{}", style("Retention will delete after upload:").yellow().bold());
            for line in render::plan_lines(&plan) {
                println!("{}", line);
            }
            if !yes && std::io::stdin().is_terminal() && !confirm("Proceed?")? {
                println!("{}", style("Backup cancelled").yellow());
                return Ok(false);
            }
        }
        Some(plan)
    };

    if interrupts.load(Ordering::SeqCst) > 0 {
        println!("{}", style("Interrupted before start; nothing was backed up").yellow());
        return Ok(false);
    }

    let labels: Labels = databases
        .iter()
        .filter_map(|name| {
            let label = config.databases.get(name)?.compression.label()?;
            Some((name.clone(), label))
        })
        .collect();

    let (tx, mut rx) = progress_channel();
    let run = tokio::spawn(run_backups(config, storage, databases, opts, plan, tx));

    while let Some(event) = rx.recv().await {
        render::print_event(&event, &labels);
    }
    let states = run
        .await
        .map_err(|e| BackupError::Execution(format!("backup run failed: {}", e)))?;

    let summary = RunSummary::from_states(&states);
    info!("Run finished: {:?}", summary);
    println!();
    let line = render::summary_line(summary.succeeded, summary.failed);
    if summary.failed == 0 {
        println!("{}", style(line).green().bold());
    } else {
        println!("{}", style(line).red().bold());
    }
    Ok(summary.failed == 0)
}

pub async fn restore(
    config: &AppConfig,
    storage: &dyn Storage,
    name: &str,
    file: String,
    local: bool,
) -> Result<bool> {
    let db = lookup(config, name)?;
    let source = if local {
        RestoreSource::Local(PathBuf::from(file))
    } else {
        RestoreSource::Remote(file)
    };

    let (tx, mut rx) = mpsc::channel(16);
    let printer = tokio::spawn(async move {
        let labels = Labels::new();
        while let Some(event) = rx.recv().await {
            render::print_event(&event, &labels);
        }
    });

    let result = run_restore(name, db, storage, source, &tx).await;
    drop(tx);
    let _ = printer.await;

    match result {
        Ok(()) => {
            println!("{}", style(format!("Restore of {} finished", name)).green().bold());
            Ok(true)
        }
        Err(_) => Ok(false),
    }
}

pub async fn list(config: &AppConfig, storage: &dyn Storage, name: &str) -> Result<bool> {
    let db = lookup(config, name)?;
    let backups = list_for_database(storage, &db.dest, name).await?;

    if backups.is_empty() {
        println!("No backups found for {} at {}", name, db.dest);
        return Ok(true);
    }

    println!("{}", style(format!("Backups of {} at {}:", name, db.dest)).bold());
    for backup in &backups {
        println!(
            "  {}  {:>10.2} MB  {}",
            backup.timestamp.format("%Y-%m-%d %H:%M:%S"),
            backup.file.size as f64 / 1024.0 / 1024.0,
            backup.file.name
        );
    }
    Ok(true)
}

pub async fn check(config: &AppConfig, storage: &dyn Storage, requested: &[String]) -> Result<bool> {
    let databases = select_databases(config, requested)?;
    let mut all_ok = true;

    for name in &databases {
        let db = lookup(config, name)?;
        let driver = create_driver(db);

        match driver.test_connection().await {
            Ok(()) => println!("[{}] {} connection: {}", name, driver.engine_name(), style("ok").green()),
            Err(e) => {
                all_ok = false;
                println!("[{}] {} connection: {}", name, driver.engine_name(), style(e).red());
            }
        }
        match storage.test_access(&db.dest).await {
            Ok(()) => println!("[{}] destination {}: {}", name, db.dest, style("ok").green()),
            Err(e) => {
                all_ok = false;
                println!("[{}] destination {}: {}", name, db.dest, style(e).red());
            }
        }
    }

    Ok(all_ok)
}
