use crate::cleaner::CleanPolicy;
use crate::vars::VarsInput;
use crate::version::LATEST;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    #[serde(alias = "tmp_root")]
    pub scratch_root: PathBuf,
    pub test_dir: PathBuf,
    pub test_file: String,
    #[serde(default = "default_version", deserialize_with = "version_text")]
    pub version: String,
    #[serde(default)]
    pub facts: VarsInput,
    #[serde(default)]
    pub variables: VarsInput,
    #[serde(default, deserialize_with = "boolish")]
    pub debug: bool,
    #[serde(default = "default_true", deserialize_with = "boolish")]
    pub clean: bool,
    #[serde(default = "default_true", deserialize_with = "boolish")]
    pub clean_on_failure: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub sha256: Option<String>,
}

fn default_version() -> String {
    LATEST.to_string()
}

fn default_true() -> bool {
    true
}

impl RunRequest {
    pub fn new(scratch_root: &Path, test_dir: &Path, test_file: &str) -> Self {
        Self {
            scratch_root: scratch_root.to_path_buf(),
            test_dir: test_dir.to_path_buf(),
            test_file: test_file.to_string(),
            version: default_version(),
            facts: VarsInput::default(),
            variables: VarsInput::default(),
            debug: false,
            clean: true,
            clean_on_failure: true,
            timeout_secs: None,
            sha256: None,
        }
    }

    pub fn into_config(self) -> Result<RunConfig, ConfigError> {
        let test_file = basename(&self.test_file)
            .ok_or_else(|| ConfigError::TestFile(self.test_file.clone()))?
            .to_string();
        Ok(RunConfig {
            layout: ScratchLayout::new(&self.scratch_root),
            test_dir: self.test_dir,
            test_file,
            version: self.version,
            facts: self.facts,
            variables: self.variables,
            debug: self.debug,
            policy: CleanPolicy {
                clean: self.clean,
                clean_on_failure: self.clean_on_failure,
            },
            timeout: self.timeout_secs.map(Duration::from_secs),
            sha256: self.sha256.filter(|s| !s.trim().is_empty()),
        })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("test_file {0:?} does not name a file")]
    TestFile(String),
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub layout: ScratchLayout,
    pub test_dir: PathBuf,
    pub test_file: String,
    pub version: String,
    pub facts: VarsInput,
    pub variables: VarsInput,
    pub debug: bool,
    pub policy: CleanPolicy,
    pub timeout: Option<Duration>,
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchLayout {
    pub root: PathBuf,
    pub bin_dir: PathBuf,
    pub executable: PathBuf,
    pub log_dir: PathBuf,
    pub log_file: PathBuf,
    pub result_file: PathBuf,
}

impl ScratchLayout {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            bin_dir: root.join("bin"),
            executable: root.join("bin").join("goss"),
            log_dir: root.join("logs"),
            log_file: root.join("logs").join("degoss.log"),
            result_file: root.join("result.json"),
        }
    }
}

pub fn basename(raw: &str) -> Option<&str> {
    let name = raw
        .rsplit(|c: char| c == '/' || c == std::path::MAIN_SEPARATOR)
        .next()
        .unwrap_or(raw);
    match name {
        "" | "." | ".." => None,
        other => Some(other),
    }
}

pub fn parse_bool_param(raw: &str) -> bool {
    let lower = raw.to_lowercase();
    ["true", "yes", "on"].iter().any(|w| lower.contains(w))
}

/// YAML reads `version: 0.4` as a float; take numbers by their text.
fn version_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "version must be a string, got {other}"
        ))),
    }
}

fn boolish<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::String(s) => parse_bool_param(&s),
        _ => false,
    })
}
