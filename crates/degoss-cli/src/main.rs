use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use degoss_runner::{version, HttpTransport, Platform, RunLogger, RunRequest};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "degoss", version, about = "Download, run and remove Goss against a test file")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Run(RunArgs),
    ResolveVersion {
        #[arg(long = "goss-version", default_value = "latest")]
        goss_version: String,
        #[arg(long)]
        debug: bool,
    },
    Platform,
}

#[derive(Args, Default)]
struct RunArgs {
    #[arg(long)]
    args: Option<PathBuf>,
    #[arg(long, alias = "tmp-root")]
    scratch_root: Option<PathBuf>,
    #[arg(long)]
    test_dir: Option<PathBuf>,
    #[arg(long)]
    test_file: Option<String>,
    #[arg(long = "goss-version")]
    goss_version: Option<String>,
    #[arg(long)]
    facts: Option<String>,
    #[arg(long = "vars")]
    variables: Option<String>,
    #[arg(long)]
    debug: bool,
    #[arg(long)]
    no_clean: bool,
    #[arg(long)]
    keep_on_failure: bool,
    #[arg(long)]
    timeout_secs: Option<u64>,
    #[arg(long)]
    sha256: Option<String>,
}

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();

    let cli = Cli::parse();
    match run_command(cli.command) {
        Ok((payload, failed)) => {
            emit_json(&payload);
            if failed {
                std::process::exit(1);
            }
            Ok(())
        }
        Err(err) => {
            emit_json(&json_error("command_failed", format!("{err:#}"), json!({})));
            std::process::exit(1);
        }
    }
}

fn run_command(command: Commands) -> Result<(Value, bool)> {
    match command {
        Commands::Run(args) => {
            let request = build_request(&args)?;
            tracing::debug!(
                scratch_root = %request.scratch_root.display(),
                test_file = %request.test_file,
                "starting run"
            );
            let outcome = degoss_runner::run(request);
            Ok((outcome.to_json(), outcome.is_failure()))
        }
        Commands::ResolveVersion {
            goss_version,
            debug,
        } => {
            let transport = HttpTransport::new()?;
            let log = RunLogger::new(debug);
            match version::resolve_version(&goss_version, &transport, &log) {
                Ok(resolved) => Ok((
                    json!({
                        "ok": true,
                        "command": "resolve-version",
                        "requested": goss_version,
                        "version": resolved,
                    }),
                    false,
                )),
                Err(err) => Ok((
                    json_error(
                        "resolution_failed",
                        err.to_string(),
                        json!({ "output_lines": log.buffered_lines() }),
                    ),
                    true,
                )),
            }
        }
        Commands::Platform => {
            let platform = Platform::detect();
            Ok((
                json!({
                    "ok": true,
                    "command": "platform",
                    "os": platform.os,
                    "arch": platform.arch,
                }),
                false,
            ))
        }
    }
}

fn build_request(args: &RunArgs) -> Result<RunRequest> {
    let mut fields = match &args.args {
        Some(path) => load_args_file(path)?,
        None => Map::new(),
    };

    if let Some(p) = &args.scratch_root {
        fields.insert("scratch_root".into(), json!(p.display().to_string()));
        fields.remove("tmp_root");
    }
    if let Some(p) = &args.test_dir {
        fields.insert("test_dir".into(), json!(p.display().to_string()));
    }
    if let Some(f) = &args.test_file {
        fields.insert("test_file".into(), json!(f));
    }
    if let Some(v) = &args.goss_version {
        fields.insert("version".into(), json!(v));
    }
    if let Some(raw) = &args.facts {
        fields.insert("facts".into(), json!(raw));
    }
    if let Some(raw) = &args.variables {
        fields.insert("variables".into(), json!(raw));
    }
    if args.debug {
        fields.insert("debug".into(), json!(true));
    }
    if args.no_clean {
        fields.insert("clean".into(), json!(false));
    }
    if args.keep_on_failure {
        fields.insert("clean_on_failure".into(), json!(false));
    }
    if let Some(secs) = args.timeout_secs {
        fields.insert("timeout_secs".into(), json!(secs));
    }
    if let Some(sum) = &args.sha256 {
        fields.insert("sha256".into(), json!(sum));
    }

    serde_json::from_value(Value::Object(fields)).context("invalid run arguments")
}

fn load_args_file(path: &Path) -> Result<Map<String, Value>> {
    tracing::debug!(path = %path.display(), "loading run arguments");
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read args file {}", path.display()))?;
    let yaml_value: serde_yaml::Value = serde_yaml::from_str(&raw)
        .with_context(|| format!("parse args file {}", path.display()))?;
    match serde_json::to_value(yaml_value)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => Err(anyhow::anyhow!(
            "args file {} must contain a mapping",
            path.display()
        )),
    }
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}
