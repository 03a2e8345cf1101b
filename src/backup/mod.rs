pub mod compression;
pub mod coordinator;
pub mod naming;
pub mod pipeline;
pub mod progress;
pub mod restore;
pub mod retention;

pub use coordinator::{pre_check_retention, progress_channel, run_backups, RetentionPlan};
pub use pipeline::BackupOptions;
pub use progress::{BackupStep, ProgressEvent, RunSummary};
pub use restore::{run_restore, RestoreSource};
