use serde::Serialize;
use serde_json::Value;

pub const MSG_PASSED: &str = "Goss Tests Passed";
pub const MSG_FAILED: &str = "Goss Tests Failed";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RunOutcome {
    Completed(CompletedReport),
    Fatal(FatalReport),
}

impl RunOutcome {
    pub fn is_failure(&self) -> bool {
        match self {
            RunOutcome::Completed(report) => report.failed,
            RunOutcome::Fatal(_) => true,
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({
                "failed": true,
                "module_failed": true,
                "msg": format!("failed to serialize result: {e}"),
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedReport {
    pub changed: bool,
    pub msg: String,
    pub failed: bool,
    pub test_result: Option<Value>,
    pub tests_total: u64,
    pub tests_failed: u64,
    pub tests_passed: u64,
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FatalReport {
    pub failed: bool,
    pub module_failed: bool,
    pub msg: String,
    pub output_lines: Vec<String>,
    pub test_count: Option<u64>,
    pub failed_tests: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rc: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_lines: Option<Vec<String>>,
}
