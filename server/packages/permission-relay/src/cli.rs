use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

// Include the generated version constant
mod build_version {
    include!(concat!(env!("OUT_DIR"), "/version.rs"));
}
use reqwest::blocking::Client as HttpClient;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::automation::HeadlessAutomation;
use crate::coordinator::{
    Coordinator, CoordinatorConfig, DEFAULT_MAX_PENDING, DEFAULT_SNAPSHOT_SIZE,
    DEFAULT_SUMMARY_CHARS,
};
use crate::discovery::DiscoveryConfig;
use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::hooks::{self, HookContext, HookKind, DEFAULT_ENDPOINT};
use crate::hub::DEFAULT_OUTBOUND_QUEUE;
use crate::protocol::{Decision, DecisionInput};
use crate::run_server_with_coordinator;

const API_PREFIX: &str = "/v1";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8765;

#[derive(Parser, Debug)]
#[command(name = "permission-relay", bin_name = "permission-relay")]
#[command(about = "Relay agent permission prompts to a remote client", version = build_version::VERSION)]
#[command(arg_required_else_help = true)]
pub struct PermissionRelayCli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay HTTP/WebSocket server.
    Server(ServerArgs),
    /// Agent hook entry points; read the hook payload from stdin.
    Hook(HookArgs),
    /// Call the HTTP API of a running relay.
    Api(ApiArgs),
}

#[derive(Args, Debug)]
pub struct ServerArgs {
    #[arg(long, short = 'H', default_value = DEFAULT_HOST)]
    host: String,

    #[arg(long, short = 'p', default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(long, default_value_t = 55_000)]
    permission_timeout_ms: u64,

    #[arg(long, default_value_t = DEFAULT_HISTORY_CAPACITY)]
    history_capacity: usize,

    #[arg(long, default_value_t = DEFAULT_SNAPSHOT_SIZE)]
    snapshot_size: usize,

    #[arg(long, default_value_t = DEFAULT_SUMMARY_CHARS)]
    summary_chars: usize,

    /// Cap on in-flight permission requests; 0 disables the cap.
    #[arg(long, default_value_t = DEFAULT_MAX_PENDING)]
    max_pending: usize,

    #[arg(long, default_value_t = DEFAULT_OUTBOUND_QUEUE)]
    outbound_queue: usize,

    /// WebSocket ping interval; a client silent for twice this is dropped.
    #[arg(long, default_value_t = 20_000)]
    keepalive_ms: u64,

    #[arg(long, default_value = "claude")]
    title_keyword: String,

    #[arg(long = "terminal-class")]
    terminal_class: Vec<String>,

    #[arg(long)]
    editor_class: Option<String>,

    #[arg(long)]
    editor_title: Option<String>,
}

#[derive(Args, Debug)]
pub struct HookArgs {
    #[command(subcommand)]
    command: HookCommand,
}

#[derive(Subcommand, Debug)]
pub enum HookCommand {
    /// Ask the remote client to decide a permission request.
    Permission,
    /// Report a completed tool invocation.
    PostTool,
    /// Forward the agent's final reply.
    Stop,
}

#[derive(Args, Debug)]
pub struct ApiArgs {
    #[command(subcommand)]
    command: ApiCommand,
}

#[derive(Subcommand, Debug)]
pub enum ApiCommand {
    /// Resolve a pending permission request.
    Decide(DecideArgs),
    /// List in-flight permission requests.
    Pending(ClientArgs),
    /// Print the tool-result history.
    History(ClientArgs),
    /// Print the current window target state.
    Target(ClientArgs),
}

#[derive(Args, Debug)]
pub struct ClientArgs {
    #[arg(long, short = 'e')]
    endpoint: Option<String>,
}

#[derive(Args, Debug)]
pub struct DecideArgs {
    id: String,

    #[arg(long, short = 'd', default_value = "allow")]
    decision: Decision,

    #[command(flatten)]
    client: ClientArgs,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("server error: {0}")]
    Server(String),
    #[error("unexpected http status: {0}")]
    HttpStatus(reqwest::StatusCode),
}

pub fn run_permission_relay() -> Result<(), CliError> {
    let cli = PermissionRelayCli::parse();
    if let Err(err) = init_logging() {
        eprintln!("failed to init logging: {err}");
        return Err(err);
    }
    run_command(&cli.command)
}

/// Logs always go to stderr; hooks reserve stdout for the agent.
pub fn init_logging() -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_logfmt::builder()
                .layer()
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|err| CliError::Server(err.to_string()))
}

pub fn run_command(command: &Command) -> Result<(), CliError> {
    match command {
        Command::Server(args) => run_server(args),
        Command::Hook(args) => run_hook(&args.command),
        Command::Api(args) => run_api(&args.command),
    }
}

impl ServerArgs {
    fn coordinator_config(&self) -> CoordinatorConfig {
        let defaults = DiscoveryConfig::default();
        let discovery = DiscoveryConfig {
            title_keyword: self.title_keyword.clone(),
            terminal_classes: if self.terminal_class.is_empty() {
                defaults.terminal_classes
            } else {
                self.terminal_class.clone()
            },
            editor_class: self.editor_class.clone().unwrap_or(defaults.editor_class),
            editor_title: self.editor_title.clone().unwrap_or(defaults.editor_title),
        };
        CoordinatorConfig {
            permission_timeout: Duration::from_millis(self.permission_timeout_ms),
            history_capacity: self.history_capacity,
            snapshot_size: self.snapshot_size,
            summary_chars: self.summary_chars,
            max_pending: (self.max_pending > 0).then_some(self.max_pending),
            outbound_queue: self.outbound_queue,
            keepalive_interval: Duration::from_millis(self.keepalive_ms),
            discovery,
        }
    }
}

fn run_server(server: &ServerArgs) -> Result<(), CliError> {
    let config = server.coordinator_config();
    tracing::info!(
        timeout_ms = server.permission_timeout_ms,
        history_capacity = config.history_capacity,
        max_pending = ?config.max_pending,
        keepalive_ms = server.keepalive_ms,
        "relay configuration"
    );
    let coordinator = Arc::new(Coordinator::new(config, Arc::new(HeadlessAutomation)));
    let host = server.host.clone();
    let port = server.port;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::Server(err.to_string()))?;

    runtime.block_on(async move {
        run_server_with_coordinator(host, port, coordinator)
            .await
            .map_err(|err| CliError::Server(err.to_string()))
    })
}

/// Hooks never fail the agent: errors are logged and the exit status stays 0.
fn run_hook(command: &HookCommand) -> Result<(), CliError> {
    let kind = match command {
        HookCommand::Permission => HookKind::Permission,
        HookCommand::PostTool => HookKind::PostTool,
        HookCommand::Stop => HookKind::Stop,
    };
    let mut input = String::new();
    if let Err(err) = std::io::stdin().read_to_string(&mut input) {
        tracing::warn!(hook = ?kind, error = %err, "hook: failed to read stdin");
        return Ok(());
    }

    let context = HookContext::from_env();
    match hooks::run_hook(kind, &context, &input) {
        Ok(Some(output)) => {
            if let Err(err) = write_stdout_line(&output) {
                tracing::warn!(hook = ?kind, error = %err, "hook: failed to write output");
            }
        }
        Ok(None) => {}
        Err(err) => {
            tracing::warn!(hook = ?kind, endpoint = %context.endpoint, error = %err, "hook: no reply, falling back");
        }
    }
    Ok(())
}

fn run_api(command: &ApiCommand) -> Result<(), CliError> {
    match command {
        ApiCommand::Decide(args) => {
            let ctx = ClientContext::new(&args.client)?;
            let body = DecisionInput {
                id: Some(args.id.clone()),
                decision: Some(args.decision),
            };
            let response = ctx.post(&format!("{API_PREFIX}/permissions/decision"), &body)?;
            print_json_response(response)
        }
        ApiCommand::Pending(args) => {
            let ctx = ClientContext::new(args)?;
            let response = ctx.get(&format!("{API_PREFIX}/permissions"))?;
            print_json_response(response)
        }
        ApiCommand::History(args) => {
            let ctx = ClientContext::new(args)?;
            let response = ctx.get(&format!("{API_PREFIX}/history"))?;
            print_json_response(response)
        }
        ApiCommand::Target(args) => {
            let ctx = ClientContext::new(args)?;
            let response = ctx.get(&format!("{API_PREFIX}/target"))?;
            print_json_response(response)
        }
    }
}

struct ClientContext {
    endpoint: String,
    client: HttpClient,
}

impl ClientContext {
    fn new(args: &ClientArgs) -> Result<Self, CliError> {
        let endpoint = args
            .endpoint
            .clone()
            .or_else(|| std::env::var("PERMISSION_RELAY_ENDPOINT").ok())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let client = HttpClient::builder().build()?;
        Ok(Self { endpoint, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), path)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::blocking::RequestBuilder {
        self.client.request(method, self.url(path))
    }

    fn get(&self, path: &str) -> Result<reqwest::blocking::Response, CliError> {
        Ok(self.request(Method::GET, path).send()?)
    }

    fn post<T: Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::blocking::Response, CliError> {
        Ok(self.request(Method::POST, path).json(body).send()?)
    }
}

/// Prints the body as pretty JSON. A 404 from the decision endpoint still
/// carries a JSON status body, which is printed before the error returns.
fn print_json_response(response: reqwest::blocking::Response) -> Result<(), CliError> {
    let status = response.status();
    let text = response.text()?;

    if !status.is_success() {
        print_error_body(&text)?;
        return Err(CliError::HttpStatus(status));
    }

    let parsed: Value = serde_json::from_str(&text)?;
    let pretty = serde_json::to_string_pretty(&parsed)?;
    write_stdout_line(&pretty)?;
    Ok(())
}

fn print_error_body(text: &str) -> Result<(), CliError> {
    if let Ok(json) = serde_json::from_str::<Value>(text) {
        let pretty = serde_json::to_string_pretty(&json)?;
        write_stderr_line(&pretty)?;
    } else {
        write_stderr_line(text)?;
    }
    Ok(())
}

fn write_stdout_line(text: &str) -> Result<(), CliError> {
    let mut out = std::io::stdout();
    out.write_all(text.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

fn write_stderr_line(text: &str) -> Result<(), CliError> {
    let mut out = std::io::stderr();
    out.write_all(text.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}
