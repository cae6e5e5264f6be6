use crate::logger::RunLogger;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub type Remover = fn(&Path) -> io::Result<()>;

pub fn remove_tree(root: &Path) -> io::Result<()> {
    fs::remove_dir_all(root)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanPolicy {
    pub clean: bool,
    pub clean_on_failure: bool,
}

impl Default for CleanPolicy {
    fn default() -> Self {
        Self {
            clean: true,
            clean_on_failure: true,
        }
    }
}

impl CleanPolicy {
    pub fn should_remove(&self, failed_or_errored: bool) -> bool {
        self.clean && (!failed_or_errored || self.clean_on_failure)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanOutcome {
    Disabled,
    NotADirectory,
    Retained,
    Removed,
    Failed(String),
}

/// Removes the scratch root according to `policy`. Errors are logged and
/// reported in the outcome rather than returned, so a failing cleanup never
/// replaces the reason a run failed.
pub fn clean(
    root: &Path,
    policy: CleanPolicy,
    failed_or_errored: bool,
    log: &RunLogger,
) -> CleanOutcome {
    clean_with(root, policy, failed_or_errored, log, remove_tree)
}

pub fn clean_with(
    root: &Path,
    policy: CleanPolicy,
    failed_or_errored: bool,
    log: &RunLogger,
    remover: Remover,
) -> CleanOutcome {
    if !policy.clean {
        log.info(format_args!(
            "Cleaning is disabled, taking no action to remove {}",
            root.display()
        ));
        return CleanOutcome::Disabled;
    }
    if !root.is_dir() {
        log.error(format_args!(
            "Unable to clean up: {} is not a directory on disk",
            root.display()
        ));
        return CleanOutcome::NotADirectory;
    }
    if !policy.should_remove(failed_or_errored) {
        log.info("Not cleaning because clean_on_failure is false and there were errors/failures.");
        return CleanOutcome::Retained;
    }

    log.info("Removing all traces of Goss from the system");
    log.debug(format_args!(
        "Recursively removing the temporary root directory {}",
        root.display()
    ));
    match remover(root) {
        Ok(()) => CleanOutcome::Removed,
        Err(e) => {
            log.error(format_args!("Exception raised when trying to clean up: {}", e));
            CleanOutcome::Failed(e.to_string())
        }
    }
}

/// Owns the scratch root for the duration of a run. Dropping it without
/// calling [`ScratchGuard::release`] cleans as if the run had failed.
pub struct ScratchGuard {
    root: PathBuf,
    policy: CleanPolicy,
    log: RunLogger,
    remover: Remover,
    released: Option<CleanOutcome>,
}

impl ScratchGuard {
    pub fn new(root: &Path, policy: CleanPolicy, log: RunLogger) -> Self {
        Self {
            root: root.to_path_buf(),
            policy,
            log,
            remover: remove_tree,
            released: None,
        }
    }

    pub fn with_remover(mut self, remover: Remover) -> Self {
        self.remover = remover;
        self
    }

    pub fn release(&mut self, failed_or_errored: bool) -> CleanOutcome {
        if let Some(outcome) = &self.released {
            return outcome.clone();
        }
        let outcome = clean_with(
            &self.root,
            self.policy,
            failed_or_errored,
            &self.log,
            self.remover,
        );
        self.released = Some(outcome.clone());
        outcome
    }

    pub fn is_released(&self) -> bool {
        self.released.is_some()
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        if self.released.is_none() {
            let _ = self.release(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsutil::unique_test_dir;

    fn populated_root(label: &str) -> PathBuf {
        let root = unique_test_dir(label);
        fs::create_dir_all(root.join("bin")).expect("bin");
        fs::write(root.join("bin").join("goss"), b"x").expect("file");
        root
    }

    #[test]
    fn decision_table() {
        for clean in [false, true] {
            for clean_on_failure in [false, true] {
                for failed in [false, true] {
                    let policy = CleanPolicy {
                        clean,
                        clean_on_failure,
                    };
                    let expected = clean && (!failed || clean_on_failure);
                    assert_eq!(
                        policy.should_remove(failed),
                        expected,
                        "clean={} clean_on_failure={} failed={}",
                        clean,
                        clean_on_failure,
                        failed
                    );
                }
            }
        }
    }

    #[test]
    fn removes_root_on_success() {
        let root = populated_root("clean_ok");
        let log = RunLogger::new(false);
        let outcome = clean(&root, CleanPolicy::default(), false, &log);
        assert_eq!(outcome, CleanOutcome::Removed);
        assert!(!root.exists());
    }

    #[test]
    fn retains_failed_run_when_asked() {
        let root = populated_root("clean_retain");
        let log = RunLogger::new(false);
        let policy = CleanPolicy {
            clean: true,
            clean_on_failure: false,
        };
        assert_eq!(clean(&root, policy, true, &log), CleanOutcome::Retained);
        assert!(root.join("bin").join("goss").exists());
        assert_eq!(clean(&root, policy, false, &log), CleanOutcome::Removed);
        assert!(!root.exists());
    }

    #[test]
    fn disabled_wins_over_everything() {
        let root = populated_root("clean_disabled");
        let log = RunLogger::new(false);
        let policy = CleanPolicy {
            clean: false,
            clean_on_failure: true,
        };
        assert_eq!(clean(&root, policy, true, &log), CleanOutcome::Disabled);
        assert!(root.exists());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn missing_root_is_logged_not_raised() {
        let root = unique_test_dir("clean_missing");
        let log = RunLogger::new(false);
        assert_eq!(
            clean(&root, CleanPolicy::default(), false, &log),
            CleanOutcome::NotADirectory
        );
        assert!(log.buffered_lines()[0].starts_with("[ERROR] Unable to clean up"));
    }

    #[test]
    fn file_root_is_not_removed() {
        let parent = unique_test_dir("clean_file");
        fs::create_dir_all(&parent).expect("parent");
        let root = parent.join("not_a_dir");
        fs::write(&root, b"x").expect("file");
        let log = RunLogger::new(false);
        assert_eq!(
            clean(&root, CleanPolicy::default(), false, &log),
            CleanOutcome::NotADirectory
        );
        assert!(root.exists());
        let _ = fs::remove_dir_all(parent);
    }

    #[test]
    fn guard_cleans_on_drop_as_failure() {
        let retained = populated_root("guard_retain");
        let removed = populated_root("guard_remove");
        let log = RunLogger::new(false);
        {
            let _keep = ScratchGuard::new(
                &retained,
                CleanPolicy {
                    clean: true,
                    clean_on_failure: false,
                },
                log.clone(),
            );
            let _gone = ScratchGuard::new(&removed, CleanPolicy::default(), log.clone());
        }
        assert!(retained.exists());
        assert!(!removed.exists());
        let _ = fs::remove_dir_all(retained);
    }

    #[test]
    fn guard_releases_once() {
        let root = populated_root("guard_once");
        let log = RunLogger::new(false);
        let mut guard = ScratchGuard::new(&root, CleanPolicy::default(), log);
        assert!(!guard.is_released());
        assert_eq!(guard.release(false), CleanOutcome::Removed);
        assert_eq!(guard.release(false), CleanOutcome::Removed);
        assert!(guard.is_released());
    }

    #[test]
    fn removal_error_is_logged_and_reported() {
        let root = populated_root("clean_remove_err");
        let log = RunLogger::new(false);
        let outcome = clean_with(&root, CleanPolicy::default(), true, &log, |_: &Path| {
            Err(io::Error::other("Device or resource busy"))
        });
        assert_eq!(
            outcome,
            CleanOutcome::Failed("Device or resource busy".to_string())
        );
        assert!(log
            .buffered_lines()
            .iter()
            .any(|l| l == "[ERROR] Exception raised when trying to clean up: Device or resource busy"));
        assert!(root.exists());
        let _ = fs::remove_dir_all(root);
    }
}
