use crate::error::RunError;
use crate::fsutil::atomic_write_json_pretty;
use crate::logger::RunLogger;
use crate::vars::VarMap;
use serde::Deserialize;
use serde_json::Value;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const DRAIN_GRACE: Duration = Duration::from_millis(500);

pub const RC_UNAVAILABLE: i32 = -1;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResult {
    pub total: u64,
    pub failed: u64,
    pub failures: Vec<String>,
    pub raw: Value,
}

impl ParsedResult {
    pub fn passed(&self) -> u64 {
        self.total.saturating_sub(self.failed)
    }
}

pub struct Invocation<'a> {
    pub binary: &'a Path,
    pub test_file: &'a str,
    pub work_dir: &'a Path,
    pub payload: &'a VarMap,
    pub result_file: &'a Path,
    pub timeout: Option<Duration>,
}

pub fn goss_args(test_file: &str) -> Vec<String> {
    [
        "--gossfile",
        test_file,
        "--vars",
        "/dev/stdin",
        "validate",
        "--no-color",
        "--format",
        "json",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub fn execute(inv: &Invocation<'_>, log: &RunLogger) -> Result<ParsedResult, RunError> {
    let args = goss_args(inv.test_file);
    let stdin_bytes = serde_json::to_vec(inv.payload).map_err(|e| RunError::Execution {
        rc: RC_UNAVAILABLE,
        reason: format!("serialize variables: {e}"),
        stdout_lines: Vec::new(),
    })?;

    log.info("Executing Goss test cases");
    log.debug(format_args!(
        "Executing Goss as \"{} {}\" in {}",
        inv.binary.display(),
        args.join(" "),
        inv.work_dir.display()
    ));

    let mut cmd = Command::new(inv.binary);
    cmd.args(&args).current_dir(inv.work_dir);

    let captured = run_captured(cmd, stdin_bytes, inv.timeout).map_err(|e| {
        log.error(format_args!("Unable to launch Goss: {}", e));
        RunError::Execution {
            rc: RC_UNAVAILABLE,
            reason: e.to_string(),
            stdout_lines: Vec::new(),
        }
    })?;
    let text = String::from_utf8_lossy(&captured.output).to_string();
    let stdout_lines: Vec<String> = text.lines().map(str::to_string).collect();

    if captured.timed_out {
        let secs = inv.timeout.map(|t| t.as_secs()).unwrap_or_default();
        log.error(format_args!("Goss did not finish within {}s, killed", secs));
        return Err(RunError::Timeout { secs, stdout_lines });
    }

    let rc = captured.code.unwrap_or(RC_UNAVAILABLE);
    let parsed = parse_report(&text).map_err(|reason| {
        log.error(format_args!("Fatal Goss error (rc={}): {}", rc, reason));
        RunError::Execution {
            rc,
            reason,
            stdout_lines,
        }
    })?;

    log.debug(format_args!(
        "Writing Goss JSON test results to {}",
        inv.result_file.display()
    ));
    atomic_write_json_pretty(inv.result_file, &parsed.raw)
        .map_err(|e| RunError::Workspace(format!("{e:#}")))?;
    log.debug("Goss executed successfully, looking for failed test cases.");

    Ok(parsed)
}

#[derive(Debug, Default, Deserialize)]
struct Report {
    #[serde(default)]
    summary: Summary,
    #[serde(default)]
    results: Option<Vec<CaseResult>>,
}

#[derive(Debug, Default, Deserialize)]
struct Summary {
    #[serde(rename = "test-count", default)]
    test_count: u64,
    #[serde(rename = "failed-count", default)]
    failed_count: u64,
}

#[derive(Debug, Deserialize)]
struct CaseResult {
    #[serde(default)]
    successful: Value,
    #[serde(rename = "summary-line", default)]
    summary_line: Option<String>,
}

pub fn parse_report(text: &str) -> Result<ParsedResult, String> {
    let raw: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    if !raw.is_object() {
        return Err("report is not a JSON object".to_string());
    }
    let report: Report = serde_json::from_value(raw.clone()).map_err(|e| e.to_string())?;

    let mut failures = Vec::new();
    if report.summary.failed_count > 0 {
        let results = report
            .results
            .ok_or_else(|| "report lists failures but has no results".to_string())?;
        for case in results {
            if case.successful != Value::Bool(true) {
                let line = case
                    .summary_line
                    .ok_or_else(|| "unsuccessful result without summary-line".to_string())?;
                failures.push(line);
            }
        }
    }

    Ok(ParsedResult {
        total: report.summary.test_count,
        failed: report.summary.failed_count,
        failures,
        raw,
    })
}

struct Captured {
    code: Option<i32>,
    output: Vec<u8>,
    timed_out: bool,
}

/// Spawns `cmd` with stdout and stderr sharing one pipe, feeds `input` on
/// stdin and collects everything written until the child exits. Processes
/// the tool leaves behind can hold the pipe open, so once the child is gone
/// output is only drained for a bounded time.
fn run_captured(
    mut cmd: Command,
    input: Vec<u8>,
    timeout: Option<Duration>,
) -> io::Result<Captured> {
    let (mut reader, writer) = io::pipe()?;
    cmd.stdin(Stdio::piped())
        .stdout(writer.try_clone()?)
        .stderr(writer);
    let mut child = spawn(&mut cmd)?;
    // the command still holds write ends of the pipe
    drop(cmd);

    let stdin = child.stdin.take();
    let feeder = thread::spawn(move || {
        if let Some(mut stdin) = stdin {
            let _ = stdin.write_all(&input);
        }
    });
    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let status = match timeout {
        None => Some(child.wait()?),
        Some(limit) => wait_with_deadline(&mut child, limit)?,
    };
    let timed_out = status.is_none();
    if timed_out {
        let _ = child.kill();
        let _ = child.wait();
    } else {
        let _ = feeder.join();
    }
    let output = drain(&rx, timeout.map(|_| Instant::now() + DRAIN_GRACE));

    Ok(Captured {
        code: status.and_then(|s| s.code()),
        output,
        timed_out,
    })
}

fn drain(rx: &mpsc::Receiver<Vec<u8>>, until: Option<Instant>) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let chunk = match until {
            None => match rx.recv() {
                Ok(chunk) => chunk,
                Err(_) => break,
            },
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(left) {
                    Ok(chunk) => chunk,
                    Err(_) => break,
                }
            }
        };
        out.extend_from_slice(&chunk);
    }
    out
}

/// A freshly written binary can be briefly busy while another thread forks.
fn spawn(cmd: &mut Command) -> io::Result<Child> {
    let mut attempts = 0;
    loop {
        match cmd.spawn() {
            Err(e) if e.kind() == io::ErrorKind::ExecutableFileBusy && attempts < 10 => {
                attempts += 1;
                thread::sleep(POLL_INTERVAL);
            }
            other => return other,
        }
    }
}

fn wait_with_deadline(child: &mut Child, limit: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}
