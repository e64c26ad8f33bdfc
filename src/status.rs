use serde::{Deserialize, Serialize};

/// Normalized run status reported by the service.
///
/// Anything outside the known set maps to `Unknown` (displayed as "NA"),
/// never to an error: the backend adds statuses faster than clients ship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Initializing,
    Running,
    Stopping,
    SystemError,
    Aborted,
    Failed,
    Passed,
    Stopped,
    Halted,
    Unknown,
}

impl RunStatus {
    /// Parse a raw status string; unrecognized values become `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "INITIALIZING" => RunStatus::Initializing,
            "RUNNING" => RunStatus::Running,
            "STOPPING" => RunStatus::Stopping,
            "SYSTEM_ERROR" => RunStatus::SystemError,
            "ABORTED" => RunStatus::Aborted,
            "FAILED" => RunStatus::Failed,
            "PASSED" => RunStatus::Passed,
            "STOPPED" => RunStatus::Stopped,
            "HALTED" => RunStatus::Halted,
            _ => RunStatus::Unknown,
        }
    }

    /// Display name, derived attributes: (name, ended, error, success).
    fn table(self) -> (&'static str, bool, bool, bool) {
        match self {
            RunStatus::Initializing => ("INITIALIZING", false, false, false),
            RunStatus::Running => ("RUNNING", false, false, false),
            RunStatus::Stopping => ("STOPPING", false, false, false),
            RunStatus::SystemError => ("SYSTEM_ERROR", true, true, false),
            RunStatus::Aborted => ("ABORTED", true, false, false),
            RunStatus::Failed => ("FAILED", true, false, false),
            RunStatus::Passed => ("PASSED", true, false, true),
            RunStatus::Stopped => ("STOPPED", true, false, false),
            RunStatus::Halted => ("HALTED", true, false, false),
            RunStatus::Unknown => ("NA", false, false, false),
        }
    }

    pub fn name(self) -> &'static str {
        self.table().0
    }

    /// Terminal status. Note this is weaker than "completely ended";
    /// see `TestRun::completely_ended`.
    pub fn is_ended(self) -> bool {
        self.table().1
    }

    pub fn is_error(self) -> bool {
        self.table().2
    }

    pub fn is_success(self) -> bool {
        self.table().3
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
