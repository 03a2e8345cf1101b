use crate::backup::naming::{backups_for, BackupFile};
use crate::config::RetentionConfig;
use crate::storage::RemoteFile;
use chrono::{Duration, Local, NaiveDateTime};
use std::collections::HashSet;
use tracing::debug;

/// Returns the files of `db_name` that the retention rules want deleted.
///
/// Only files following the backup naming convention for this database are
/// considered, and ages come from the timestamp in the filename. A file is
/// deleted if any active rule marks it. `pending_backups` counts backups that
/// are about to be added, so `keep_last` keeps that many fewer existing files.
///
/// The result is ordered newest first and contains each file once.
pub fn apply(
    files: &[RemoteFile],
    db_name: &str,
    rules: &RetentionConfig,
    pending_backups: u32,
) -> Vec<RemoteFile> {
    apply_at(files, db_name, rules, pending_backups, Local::now().naive_local())
}

pub fn apply_at(
    files: &[RemoteFile],
    db_name: &str,
    rules: &RetentionConfig,
    pending_backups: u32,
    now: NaiveDateTime,
) -> Vec<RemoteFile> {
    let backups = backups_for(files, db_name);
    if backups.is_empty() {
        return Vec::new();
    }

    let mut marked: HashSet<&str> = HashSet::new();

    if rules.keep_last > 0 {
        let threshold = rules.keep_last.saturating_sub(pending_backups) as usize;
        marked.extend(keep_last(&backups, threshold));
    }
    if rules.keep_days > 0 {
        marked.extend(keep_days(&backups, rules.keep_days, now));
    }
    if rules.max_size_mb > 0 {
        marked.extend(max_size(&backups, rules.max_size_mb));
    }

    let mut emitted = HashSet::new();
    let to_delete: Vec<RemoteFile> = backups
        .iter()
        .filter(|b| marked.contains(b.file.name.as_str()) && emitted.insert(b.file.name.as_str()))
        .map(|b| b.file.clone())
        .collect();

    debug!(
        "Retention for {}: {} of {} backup(s) marked for deletion",
        db_name,
        to_delete.len(),
        backups.len()
    );
    to_delete
}

fn keep_last(backups: &[BackupFile], keep: usize) -> impl Iterator<Item = &str> {
    backups.iter().skip(keep).map(|b| b.file.name.as_str())
}

fn keep_days(backups: &[BackupFile], days: u32, now: NaiveDateTime) -> impl Iterator<Item = &str> {
    let cutoff = now - Duration::days(i64::from(days));
    backups
        .iter()
        .filter(move |b| b.timestamp < cutoff)
        .map(|b| b.file.name.as_str())
}

fn max_size(backups: &[BackupFile], max_size_mb: u64) -> impl Iterator<Item = &str> {
    let max_bytes = max_size_mb.saturating_mul(1024 * 1024);
    let mut total: u64 = 0;
    backups
        .iter()
        .filter(move |b| {
            total = total.saturating_add(b.file.size);
            total > max_bytes
        })
        .map(|b| b.file.name.as_str())
}
