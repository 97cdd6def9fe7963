//! `PlateBridge` CLI - send one call through the bridge and print its envelope.
//!
//! The envelope is printed as JSON on stdout; logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use platebridge::service::ResultChannel;
use platebridge::{init_tracing, Bridge, BridgeConfig, InvocationRequest, LogFormat};
use platebridge_core::Value;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ResultSource {
    /// Read script results from standard output
    Stdout,
    /// Read script results from a per-run result file
    File,
}

#[derive(Parser)]
#[command(name = "platebridge-cli")]
#[command(about = "Route a plate-recognition call through PlateBridge", long_about = None)]
struct Args {
    /// Channel to call: legacy, embedded or environment
    #[arg(long, required_unless_present = "request_file")]
    channel: Option<String>,

    /// Method name within the channel, e.g. processImage
    #[arg(long, required_unless_present = "request_file")]
    method: Option<String>,

    /// Method arguments as a JSON object
    #[arg(long, default_value = "{}")]
    args: String,

    /// JSON file holding {"channel", "method", "args", "timeoutMs"}
    #[arg(long, conflicts_with_all = ["channel", "method"])]
    request_file: Option<PathBuf>,

    /// Call deadline in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Do not run `initialize` on the channel before the call
    #[arg(long)]
    no_initialize: bool,

    /// Interpreter for helper scripts
    #[arg(long, env = "PLATEBRIDGE_INTERPRETER", default_value = "python3")]
    interpreter: PathBuf,

    /// Directory holding helper scripts
    #[arg(long, env = "PLATEBRIDGE_SCRIPTS_DIR", default_value = ".")]
    scripts_dir: PathBuf,

    /// Script run by processImage
    #[arg(long, default_value = "predator_mobile.py")]
    recognition_script: String,

    /// Where helper scripts leave their result
    #[arg(long, value_enum, default_value = "stdout")]
    result_source: ResultSource,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestFile {
    channel: String,
    method: String,
    #[serde(default)]
    args: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

fn parse_args_object(raw: &str) -> anyhow::Result<serde_json::Map<String, serde_json::Value>> {
    let json: serde_json::Value = serde_json::from_str(raw).context("--args is not valid JSON")?;
    let serde_json::Value::Object(map) = json else {
        bail!("--args must be a JSON object");
    };
    Ok(map)
}

fn build_request(args: &Args) -> anyhow::Result<InvocationRequest> {
    let (channel, method, raw_args, timeout_ms) = match &args.request_file {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let file: RequestFile = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            (file.channel, file.method, file.args, file.timeout_ms.or(args.timeout_ms))
        }
        None => {
            let (Some(channel), Some(method)) = (&args.channel, &args.method) else {
                bail!("--channel and --method are required without --request-file");
            };
            (channel.clone(), method.clone(), parse_args_object(&args.args)?, args.timeout_ms)
        }
    };

    let mut request = InvocationRequest::new(channel, method)
        .with_args(raw_args.into_iter().map(|(k, v)| (k, Value::from(v))));
    request.timeout_ms = timeout_ms;
    Ok(request)
}

fn config_from(args: &Args) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.external.interpreter.clone_from(&args.interpreter);
    config.external.scripts_dir.clone_from(&args.scripts_dir);
    config.external.recognition_script.clone_from(&args.recognition_script);
    config.external.result_channel = match args.result_source {
        ResultSource::Stdout => ResultChannel::Stdout,
        ResultSource::File => ResultChannel::ResultFile,
    };
    config
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.log_format)?;

    let request = build_request(&args)?;
    let bridge = Bridge::builder(config_from(&args)).build();

    if !args.no_initialize && request.method != "initialize" {
        let init = bridge
            .call(InvocationRequest::new(request.channel.clone(), "initialize"))
            .await;
        if !init.is_success() {
            tracing::warn!(
                channel = %request.channel,
                "initialize failed; sending the call anyway"
            );
        }
    }

    let envelope = bridge.call(request).await;
    println!("{}", serde_json::to_string_pretty(&envelope)?);

    bridge.shutdown().await?;
    Ok(if envelope.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
