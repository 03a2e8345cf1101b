use crate::backup::pipeline::{run_pipeline, BackupOptions};
use crate::backup::progress::{BackupState, BackupStep, ProgressEvent};
use crate::backup::retention;
use crate::config::AppConfig;
use crate::error::BackupError;
use crate::storage::{RemoteFile, Storage};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Files each database would lose to retention, keyed by database name.
pub type RetentionPlan = BTreeMap<String, Vec<RemoteFile>>;

pub const PROGRESS_BUFFER: usize = 100;

pub fn progress_channel() -> (mpsc::Sender<ProgressEvent>, mpsc::Receiver<ProgressEvent>) {
    mpsc::channel(PROGRESS_BUFFER)
}

/// Works out what retention would delete once one more backup per database
/// lands. Databases without an active policy, or whose destination cannot
/// be listed, are left out.
pub async fn pre_check_retention(storage: &dyn Storage, config: &AppConfig, databases: &[String]) -> RetentionPlan {
    let mut plan = RetentionPlan::new();

    for name in databases {
        let Some(db) = config.databases.get(name) else {
            continue;
        };
        if !db.retention.is_enabled() {
            continue;
        }

        let files = match storage.list(&db.dest).await {
            Ok(files) => files,
            Err(e) => {
                warn!("Retention pre-check skipped for {}: {}", name, e);
                continue;
            }
        };

        let to_delete = retention::apply(&files, name, &db.retention, 1);
        if !to_delete.is_empty() {
            debug!("{}: {} backup(s) marked for deletion", name, to_delete.len());
            plan.insert(name.clone(), to_delete);
        }
    }

    plan
}

/// Runs one pipeline per database concurrently and returns their final
/// states in the order requested. Every event goes to `progress`; the
/// stream closes once the last pipeline has finished.
pub async fn run_backups(
    config: Arc<AppConfig>,
    storage: Arc<dyn Storage>,
    databases: Vec<String>,
    opts: BackupOptions,
    plan: Option<RetentionPlan>,
    progress: mpsc::Sender<ProgressEvent>,
) -> Vec<BackupState> {
    info!("Starting backup of {} database(s)", databases.len());
    let plan = plan.map(Arc::new);

    let handles: Vec<_> = databases
        .iter()
        .map(|name| {
            let name = name.clone();
            let config = Arc::clone(&config);
            let storage = Arc::clone(&storage);
            let plan = plan.clone();
            let progress = progress.clone();

            tokio::spawn(async move {
                let Some(db) = config.databases.get(&name) else {
                    let err = BackupError::Config(format!("unknown database: {}", name));
                    let event = ProgressEvent::failed(&name, BackupStep::Dumping, &err);
                    let mut state = BackupState::new(&name);
                    state.record(&event);
                    let _ = progress.send(event).await;
                    return state;
                };
                run_pipeline(&name, db, storage.as_ref(), opts, plan.as_deref(), &progress).await
            })
        })
        .collect();

    let results = join_all(handles).await;
    drop(progress);

    results
        .into_iter()
        .zip(databases)
        .map(|(result, name)| match result {
            Ok(state) => state,
            Err(e) => {
                error!("Backup task for {} did not finish: {}", name, e);
                let event = ProgressEvent::failed(&name, BackupStep::Dumping, format!("task failed: {}", e));
                let mut state = BackupState::new(&name);
                state.record(&event);
                state
            }
        })
        .collect()
}
