use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::config::PipelineConfig;
use crate::controllers::{register_all, DemoApp};
use crate::dispatcher::{Dispatcher, DISPATCH_ID_ATTRIBUTE};
use crate::logging::{init_logging_with_config, LogConfig};
use crate::registry::Registry;
use crate::security::{Role, TokenService};
use crate::transport::{
    EchoViews, MemoryRequest, MemoryResponse, MemorySession, Scope, TransportRequest, ViewRenderer,
};
use crate::views::TemplateViews;
use crate::worker::{dispatch_all, WorkerConfig};

#[derive(Parser, Debug)]
#[command(name = "reqpipe")]
#[command(version, about = "Inbound request dispatch pipeline", long_about = None)]
pub struct Cli {
    /// TOML pipeline configuration; REQPIPE_* variables override it
    #[arg(short, long, global = true, env = "REQPIPE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the routes of the bundled demo controllers
    Routes,
    /// Dispatch a JSON array of requests, one coroutine each
    Replay {
        /// File holding the requests
        file: PathBuf,

        /// Pre-authorized session, as TOKEN=ROLE[,ROLE...]
        #[arg(long = "grant", value_name = "TOKEN=ROLES")]
        grants: Vec<String>,

        /// Render forwarded views from this template directory
        #[arg(long)]
        views: Option<PathBuf>,
    },
}

/// One request of a replay file.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayRequest {
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Session token the request arrives with
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub context_path: String,
    /// Correlation id to dispatch under; a fresh ULID when absent or invalid
    #[serde(default)]
    pub dispatch_id: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl ReplayRequest {
    #[must_use]
    pub fn into_transport(self) -> MemoryRequest {
        let mut req = MemoryRequest::new(&self.method, &self.path).with_context_path(&self.context_path);
        req.query = self.query;
        for (key, value) in &self.params {
            req = req.with_param(key, value);
        }
        if let Some(token) = self.token.as_deref() {
            req = req.with_token(token);
        }
        if let Some(id) = self.dispatch_id {
            req.set_attribute(Scope::Request, DISPATCH_ID_ATTRIBUTE, Value::String(id));
        }
        req
    }
}

/// One JSON line of replay output.
#[derive(Debug, Serialize)]
pub struct ReplayOutcome {
    pub index: usize,
    pub method: String,
    pub path: String,
    pub dispatch_id: Option<String>,
    #[serde(flatten)]
    pub response: Option<MemoryResponse>,
    pub session: Option<MemorySession>,
}

/// Parse a `TOKEN=ROLE,ROLE` grant.
///
/// # Errors
///
/// Fails on a missing `=`, an empty token or an unknown role.
pub fn parse_grant(grant: &str) -> anyhow::Result<(String, Vec<Role>)> {
    let Some((token, roles)) = grant.split_once('=') else {
        bail!("grant must look like TOKEN=ROLE[,ROLE...]: {grant}");
    };
    if token.trim().is_empty() {
        bail!("grant has an empty token: {grant}");
    }
    let roles = roles
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(|r| r.parse::<Role>().map_err(anyhow::Error::msg))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok((token.trim().to_string(), roles))
}

/// Printable route table, one line per route.
#[must_use]
pub fn route_table(registry: &Registry) -> Vec<String> {
    let mut lines = Vec::new();
    for controller in registry.controllers() {
        for route in controller.actions() {
            let roles: Vec<&str> = route.required_roles.iter().map(Role::as_str).collect();
            lines.push(format!(
                "{:<6} /api/{}/{}{:<16} auth={:<5} roles=[{}]",
                route.method.as_str(),
                route.api_version,
                controller.name(),
                route.action_key,
                route.requires_auth,
                roles.join(",")
            ));
        }
    }
    lines
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path),
        None => Ok(PipelineConfig::from_env()),
    }
}

/// Dispatch every replay request through a dispatcher over the demo
/// controllers and collect the outcomes in input order.
///
/// # Errors
///
/// Fails when the registry cannot be built.
pub fn replay(
    requests: Vec<ReplayRequest>,
    app: &DemoApp,
    config: PipelineConfig,
    views: Arc<dyn ViewRenderer>,
    worker: &WorkerConfig,
) -> anyhow::Result<Vec<ReplayOutcome>> {
    let registry = Arc::new(register_all(app)?);
    let tokens: Arc<dyn TokenService> = app.tokens.clone();
    let dispatcher = Dispatcher::new(registry, tokens, views, config);

    let labels: Vec<(String, String)> = requests
        .iter()
        .map(|r| (r.method.to_ascii_uppercase(), r.path.clone()))
        .collect();
    let jobs: Vec<_> = requests
        .into_iter()
        .map(|r| (r.into_transport(), MemoryResponse::new()))
        .collect();

    let results = dispatch_all(&dispatcher, worker, jobs);

    Ok(labels
        .into_iter()
        .zip(results)
        .enumerate()
        .map(|(index, ((method, path), result))| {
            let (dispatch_id, session, response) = match result {
                Some((req, res)) => {
                    let id = req
                        .attribute(Scope::Request, DISPATCH_ID_ATTRIBUTE)
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    (id, Some(req.session), Some(res))
                }
                None => (None, None, None),
            };
            ReplayOutcome {
                index,
                method,
                path,
                dispatch_id,
                response,
                session,
            }
        })
        .collect())
}

/// Entry point of the `reqpipe` binary.
///
/// # Errors
///
/// Configuration, input or logging setup failures.
pub fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging_with_config(&LogConfig::from_env())?;
    let worker = WorkerConfig::from_env();
    may::config().set_stack_size(worker.stack_size);

    let config = load_config(cli.config.as_deref())?;
    let app = DemoApp::default();

    match cli.command {
        Commands::Routes => {
            let registry = register_all(&app)?;
            let mut out = std::io::stdout().lock();
            for line in route_table(&registry) {
                writeln!(out, "{line}")?;
            }
        }
        Commands::Replay {
            file,
            grants,
            views,
        } => {
            for grant in &grants {
                let (token, roles) = parse_grant(grant)?;
                app.tokens.grant(&token, roles);
            }
            let source = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let requests: Vec<ReplayRequest> = serde_json::from_str(&source)
                .with_context(|| format!("{} is not a JSON array of requests", file.display()))?;
            let renderer: Arc<dyn ViewRenderer> = match views {
                Some(dir) => Arc::new(TemplateViews::new(dir).strip_prefix(&config.view_prefix)),
                None => Arc::new(EchoViews),
            };
            info!(requests = requests.len(), "replaying requests");

            let outcomes = replay(requests, &app, config, renderer, &worker)?;
            let mut out = std::io::stdout().lock();
            for outcome in &outcomes {
                let line: Value = serde_json::to_value(outcome)?;
                writeln!(out, "{line}")?;
            }
        }
    }
    Ok(())
}
