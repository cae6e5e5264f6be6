use crate::cleaner::{remove_tree, Remover, ScratchGuard};
use crate::config::RunConfig;
use crate::error::RunError;
use crate::executor::{self, Invocation, ParsedResult};
use crate::fsutil::ensure_dir;
use crate::logger::RunLogger;
use crate::platform::Platform;
use crate::provision;
use crate::report::{CompletedReport, FatalReport, RunOutcome, MSG_FAILED, MSG_PASSED};
use crate::transport::Transport;
use crate::vars;
use crate::version::VersionState;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Initialized,
    Provisioned,
    Executed,
    Fatal,
    Finalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    NotRun,
    Passed,
    Failed,
    Errored,
}

#[derive(Debug, Default)]
pub struct RunState {
    pub platform: Option<Platform>,
    pub version: VersionState,
    pub has_run: bool,
    pub errored: bool,
    pub total_tests: Option<u64>,
    pub failed_tests: Option<u64>,
    pub failed_messages: Vec<String>,
    pub test_result: Option<Value>,
}

impl RunState {
    pub fn failed(&self) -> bool {
        self.has_run && !self.errored && self.failed_tests.unwrap_or(0) > 0
    }

    pub fn errored(&self) -> bool {
        self.has_run && self.errored
    }

    pub fn passed(&self) -> bool {
        self.has_run && !self.failed() && !self.errored()
    }

    pub fn status(&self) -> RunStatus {
        if self.errored() {
            RunStatus::Errored
        } else if self.failed() {
            RunStatus::Failed
        } else if self.passed() {
            RunStatus::Passed
        } else {
            RunStatus::NotRun
        }
    }

    fn record(&mut self, parsed: ParsedResult) {
        self.total_tests = Some(parsed.total);
        self.failed_tests = Some(parsed.failed);
        self.failed_messages = parsed.failures;
        self.test_result = Some(parsed.raw);
    }
}

pub struct RunOrchestrator {
    config: RunConfig,
    transport: Box<dyn Transport>,
    log: RunLogger,
    state: RunState,
    phase: Phase,
    remover: Remover,
}

impl RunOrchestrator {
    pub fn new(config: RunConfig, transport: Box<dyn Transport>) -> Self {
        let log = RunLogger::new(config.debug);
        Self {
            config,
            transport,
            log,
            state: RunState::default(),
            phase: Phase::Created,
            remover: remove_tree,
        }
    }

    pub fn with_remover(mut self, remover: Remover) -> Self {
        self.remover = remover;
        self
    }

    pub fn logger(&self) -> &RunLogger {
        &self.log
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn execute(&mut self) -> RunOutcome {
        let mut guard = ScratchGuard::new(
            &self.config.layout.root,
            self.config.policy,
            self.log.clone(),
        )
        .with_remover(self.remover);
        match self.run_lifecycle() {
            Ok(()) => {
                guard.release(self.state.failed() || self.state.errored());
                self.advance(Phase::Finalized);
                self.completed()
            }
            Err(err) => self.fail(err, &mut guard),
        }
    }

    fn run_lifecycle(&mut self) -> Result<(), RunError> {
        let platform = self.initialize()?;
        self.install(&platform)?;
        self.test()
    }

    fn initialize(&mut self) -> Result<Platform, RunError> {
        let platform = Platform::detect();
        let layout = &self.config.layout;
        for dir in [&layout.bin_dir, &layout.log_dir] {
            ensure_dir(dir, &platform.os).map_err(|e| RunError::Workspace(format!("{e:#}")))?;
        }
        self.log.attach_file(&layout.log_file).map_err(|e| {
            RunError::Workspace(format!("open {}: {}", layout.log_file.display(), e))
        })?;
        self.log.debug(format_args!(
            "Detected host operating system ({}) and architecture ({}).",
            platform.os, platform.arch
        ));
        self.state.platform = Some(platform.clone());
        self.advance(Phase::Initialized);
        Ok(platform)
    }

    fn install(&mut self, platform: &Platform) -> Result<(), RunError> {
        let version =
            self.state
                .version
                .resolve(&self.config.version, self.transport.as_ref(), &self.log)?;
        provision::provision(
            self.transport.as_ref(),
            &version,
            &platform.os,
            &platform.arch,
            &self.config.layout.executable,
            self.config.sha256.as_deref(),
            &self.log,
        )?;
        self.advance(Phase::Provisioned);
        Ok(())
    }

    fn test(&mut self) -> Result<(), RunError> {
        let payload = vars::merge(&self.config.facts, &self.config.variables, &self.log);
        self.state.has_run = true;
        let parsed = executor::execute(
            &Invocation {
                binary: &self.config.layout.executable,
                test_file: &self.config.test_file,
                work_dir: &self.config.test_dir,
                payload: &payload,
                result_file: &self.config.layout.result_file,
                timeout: self.config.timeout,
            },
            &self.log,
        )?;
        self.state.record(parsed);
        self.advance(Phase::Executed);
        Ok(())
    }

    fn completed(&self) -> RunOutcome {
        let total = self.state.total_tests.unwrap_or(0);
        let failed_count = self.state.failed_tests.unwrap_or(0);
        let failed = self.state.failed();
        if failed {
            self.log.info(format_args!(
                "Goss test(s) failed, {} of {} test(s) failed: \n{}",
                failed_count,
                total,
                self.state.failed_messages.join("\n\n")
            ));
        } else {
            self.log.info(format_args!(
                "Goss test(s) successful, no failed tests out of {} total test(s).",
                total
            ));
        }
        RunOutcome::Completed(CompletedReport {
            changed: false,
            msg: if failed { MSG_FAILED } else { MSG_PASSED }.to_string(),
            failed,
            test_result: self.state.test_result.clone(),
            tests_total: total,
            tests_failed: failed_count,
            tests_passed: total.saturating_sub(failed_count),
            failures: self.state.failed_messages.clone(),
        })
    }

    fn fail(&mut self, err: RunError, guard: &mut ScratchGuard) -> RunOutcome {
        if self.state.has_run {
            self.state.errored = true;
        }
        self.advance(Phase::Fatal);
        self.log.error(format_args!(
            "Fatal module or Goss execution error: {}",
            err
        ));
        guard.release(self.state.failed() || self.state.errored());
        self.advance(Phase::Finalized);

        RunOutcome::Fatal(FatalReport {
            failed: true,
            module_failed: true,
            msg: err.to_string(),
            output_lines: self.log.buffered_lines(),
            test_count: self.state.total_tests,
            failed_tests: self.state.failed_tests,
            rc: err.rc(),
            stdout_lines: err.stdout_lines().map(<[String]>::to_vec),
        })
    }

    fn advance(&mut self, next: Phase) {
        self.log
            .debug(format_args!("Run phase {:?} -> {:?}", self.phase, next));
        self.phase = next;
    }
}
