use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Unable to determine latest Goss release: {0}")]
    Resolution(String),

    #[error("Unable to install Goss binary: {0}")]
    Download(String),

    #[error("Goss Execution Failed (Unable to run tests) (rc={rc})")]
    Execution {
        rc: i32,
        reason: String,
        stdout_lines: Vec<String>,
    },

    #[error("Goss Execution Failed (timed out after {secs}s)")]
    Timeout { secs: u64, stdout_lines: Vec<String> },

    #[error("Unable to prepare run workspace: {0}")]
    Workspace(String),
}

impl RunError {
    pub fn rc(&self) -> Option<i32> {
        match self {
            RunError::Execution { rc, .. } => Some(*rc),
            _ => None,
        }
    }

    pub fn stdout_lines(&self) -> Option<&[String]> {
        match self {
            RunError::Execution { stdout_lines, .. } | RunError::Timeout { stdout_lines, .. } => {
                Some(stdout_lines)
            }
            _ => None,
        }
    }

    pub fn is_errored_run(&self) -> bool {
        matches!(self, RunError::Execution { .. } | RunError::Timeout { .. })
    }
}

#[derive(Debug, Error)]
pub enum MalformedInput {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("String value did not contain a dictionary, rather a {0}")]
    NotAnObject(&'static str),
}
