pub mod cleaner;
pub mod config;
pub mod error;
pub mod executor;
pub mod fsutil;
pub mod logger;
pub mod orchestrator;
pub mod platform;
pub mod provision;
pub mod report;
pub mod transport;
pub mod vars;
pub mod version;

pub use cleaner::{CleanOutcome, CleanPolicy, Remover};
pub use config::{ConfigError, RunConfig, RunRequest, ScratchLayout};
pub use error::RunError;
pub use executor::ParsedResult;
pub use logger::RunLogger;
pub use orchestrator::{Phase, RunOrchestrator, RunState, RunStatus};
pub use platform::Platform;
pub use report::{CompletedReport, FatalReport, RunOutcome};
pub use transport::{HttpTransport, Transport};
pub use vars::{VarMap, VarsInput};

pub fn run(request: RunRequest) -> RunOutcome {
    let config = match request.into_config() {
        Ok(config) => config,
        Err(e) => return config_error(e),
    };
    let transport: Box<dyn Transport> = match HttpTransport::new() {
        Ok(t) => Box::new(t),
        Err(e) => Box::new(transport::Unavailable::new(format!("{e:#}"))),
    };
    RunOrchestrator::new(config, transport).execute()
}

fn config_error(err: ConfigError) -> RunOutcome {
    RunOutcome::Fatal(FatalReport {
        failed: true,
        module_failed: true,
        msg: err.to_string(),
        output_lines: Vec::new(),
        test_count: None,
        failed_tests: None,
        rc: None,
        stdout_lines: None,
    })
}
