use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackupStep {
    Dumping,
    Uploading,
    Retention,
    Downloading,
    Restoring,
}

impl fmt::Display for BackupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupStep::Dumping => write!(f, "Dumping database"),
            BackupStep::Uploading => write!(f, "Saving backup"),
            BackupStep::Retention => write!(f, "Applying retention policy"),
            BackupStep::Downloading => write!(f, "Downloading backup"),
            BackupStep::Restoring => write!(f, "Restoring database"),
        }
    }
}

/// One update from a pipeline. An event without a message or error marks
/// the start of a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub db_name: String,
    pub step: BackupStep,
    pub message: Option<String>,
    pub error: Option<String>,
    pub skipped: bool,
    /// Last event of this database's pipeline.
    pub done: bool,
}

impl ProgressEvent {
    pub fn started(db_name: &str, step: BackupStep) -> Self {
        Self {
            db_name: db_name.to_string(),
            step,
            message: None,
            error: None,
            skipped: false,
            done: false,
        }
    }

    pub fn completed(db_name: &str, step: BackupStep, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::started(db_name, step)
        }
    }

    pub fn skipped(db_name: &str, step: BackupStep, message: impl Into<String>) -> Self {
        Self {
            skipped: true,
            ..Self::completed(db_name, step, message)
        }
    }

    pub fn failed(db_name: &str, step: BackupStep, error: impl fmt::Display) -> Self {
        Self {
            error: Some(error.to_string()),
            done: true,
            ..Self::started(db_name, step)
        }
    }

    pub fn finishing(mut self) -> Self {
        self.done = true;
        self
    }

    pub fn is_start(&self) -> bool {
        self.message.is_none() && self.error.is_none()
    }
}

/// Per-database record of a run, owned by that database's pipeline.
#[derive(Debug, Clone)]
pub struct BackupState {
    pub db_name: String,
    pub step: BackupStep,
    /// Completed, skipped and failed steps, in order.
    pub steps: Vec<ProgressEvent>,
    /// Local artifact, while it exists.
    pub artifact: Option<PathBuf>,
    pub done: bool,
    pub error: Option<String>,
}

impl BackupState {
    pub fn new(db_name: &str) -> Self {
        Self {
            db_name: db_name.to_string(),
            step: BackupStep::Dumping,
            steps: Vec::new(),
            artifact: None,
            done: false,
            error: None,
        }
    }

    pub fn record(&mut self, event: &ProgressEvent) {
        self.step = event.step;
        if !event.is_start() {
            self.steps.push(event.clone());
        }
        if event.error.is_some() {
            self.error = event.error.clone();
        }
        if event.done {
            self.done = true;
        }
    }

    pub fn succeeded(&self) -> bool {
        self.done && self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn from_states(states: &[BackupState]) -> Self {
        let succeeded = states.iter().filter(|s| s.succeeded()).count();
        Self {
            succeeded,
            failed: states.len() - succeeded,
        }
    }
}
