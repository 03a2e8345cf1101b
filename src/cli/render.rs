use crate::backup::{BackupStep, ProgressEvent, RetentionPlan};
use console::style;
use std::collections::BTreeMap;

/// Compression label per database, shown on the dump step.
pub type Labels = BTreeMap<String, &'static str>;

pub fn event_line(event: &ProgressEvent, labels: &Labels) -> String {
    let prefix = format!("[{}]", event.db_name);

    if let Some(err) = &event.error {
        return format!("{} {} failed: {}", prefix, event.step, err);
    }
    match &event.message {
        None => match (event.step, labels.get(&event.db_name)) {
            (BackupStep::Dumping, Some(label)) => {
                format!("{} Dumping & compressing database ({})...", prefix, label)
            }
            _ => format!("{} {}...", prefix, event.step),
        },
        Some(msg) if event.skipped => format!("{} {} skipped: {}", prefix, event.step, msg),
        Some(msg) => format!("{} {} completed: {}", prefix, event.step, msg),
    }
}

pub fn print_event(event: &ProgressEvent, labels: &Labels) {
    let line = event_line(event, labels);
    if event.error.is_some() {
        println!("{}", style(line).red());
    } else if event.skipped {
        println!("{}", style(line).dim());
    } else if event.is_start() {
        println!("{}", line);
    } else {
        println!("{}", style(line).green());
    }
}

pub fn plan_lines(plan: &RetentionPlan) -> Vec<String> {
    plan.iter()
        .flat_map(|(db, files)| {
            files.iter().map(move |f| {
                format!("  [{}] {} ({:.2} MB)", db, f.name, f.size as f64 / 1024.0 / 1024.0)
            })
        })
        .collect()
}

pub fn summary_line(succeeded: usize, failed: usize) -> String {
    format!("Backup finished: {} succeeded, {} failed", succeeded, failed)
}
