//! chatlink - resilient realtime chat client
//!
//! Harness binary for the `chatlink` library: connects to one channel,
//! forwards stdin lines as messages and prints inbound traffic.

mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use chatlink::auth::{AuthBackend, AuthTokenProvider, HttpAuthBackend, StaticAuth};
use chatlink::config::{self, LinkConfig};
use chatlink::connection::{ConnectionHandler, ConnectionManager, ConnectionState, LinkMode};
use chatlink::error::{Error, Result};
use chatlink::fallback::{DisabledFallback, FallbackTransport, HttpFallback};
use chatlink::logging;
use chatlink::scope::{FileScopeStore, ScopeStore};
use chatlink::version::BuildInfo;

use crate::cli::{Cli, Commands, ConfigSubcommand, ScopeSubcommand};

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            print!("{}", BuildInfo::current());
            Ok(())
        }
        Commands::Config { subcommand } => handle_config_command(subcommand),
        Commands::Scope { subcommand, config } => {
            let cfg = load_or_exit(config.as_deref());
            handle_scope_command(subcommand, &cfg)
        }
        Commands::Run {
            channel,
            scope,
            origin,
            config,
        } => {
            let mut cfg = load_or_exit(config.as_deref());
            if let Some(origin) = origin {
                cfg.endpoint.origin = origin;
                if let Err(e) = cfg.validate() {
                    exit_with(&e);
                }
            }

            // Guards must outlive the runtime so buffered file output is flushed
            let _log_guards = logging::init_logging(&cfg.logging, cli.verbose, cli.quiet)?;

            let build = BuildInfo::current();
            info!(
                version = %build.full_version(),
                target = %build.target,
                profile = %build.profile,
                "Starting chatlink"
            );

            run(cfg, channel, scope)
        }
    }
}

fn load_or_exit(path: Option<&str>) -> LinkConfig {
    match LinkConfig::load(path) {
        Ok(cfg) => cfg,
        Err(e) => exit_with(&e),
    }
}

fn exit_with(error: &Error) -> ! {
    eprint!("{}", error.format_for_terminal());
    std::process::exit(error.exit_code());
}

fn run(config: LinkConfig, channel: String, scope: Option<String>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("chatlink")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))?;

    if let Err(err) = runtime.block_on(run_client(config, channel, scope)) {
        match err.downcast_ref::<Error>() {
            Some(e) => {
                tracing::error!(error = %e.format_for_log(), "Client stopped");
                exit_with(e);
            }
            None => {
                eprintln!("Error: {:#}", err);
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

async fn run_client(config: LinkConfig, channel: String, scope: Option<String>) -> anyhow::Result<()> {
    let auth = Arc::new(AuthTokenProvider::new(auth_backend(&config)?));

    let fallback: Arc<dyn FallbackTransport> = if config.fallback.enabled {
        Arc::new(HttpFallback::new(
            config.fallback_base_url(),
            Arc::clone(&auth),
            Duration::from_secs(config.fallback.timeout_secs),
        )?)
    } else {
        Arc::new(DisabledFallback)
    };

    let manager = ConnectionManager::builder()
        .config(config.connection_config())
        .endpoint(config.endpoint_config())
        .auth(auth)
        .fallback(fallback)
        .scope_store(Arc::new(FileScopeStore::new(config.state_dir())))
        .handler(Arc::new(ConsoleHandler))
        .build()?;

    if let Some(scope) = scope.as_deref() {
        manager.select_scope(Some(scope))?;
    }

    let mode = manager
        .connect(&channel)
        .await
        .with_context(|| format!("connecting to channel '{}'", channel))?;
    match mode {
        LinkMode::Realtime => info!(channel = %channel, "Realtime channel open"),
        LinkMode::Fallback => warn!(channel = %channel, "Realtime unavailable, using fallback transport"),
    }

    let outcome = pump_stdin(&manager).await;
    manager.destroy().await;
    outcome
}

/// Send each stdin line until EOF or Ctrl-C
async fn pump_stdin(manager: &ConnectionManager) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    debug!("stdin closed");
                    return Ok(());
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match manager.send(parse_input(line)).await {
                    Ok(reply) => println!("{}", reply),
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    Err(e) => eprint!("{}", e.format_for_terminal()),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                return Ok(());
            }
        }
    }
}

/// JSON objects are sent as-is; anything else becomes a text message
fn parse_input(line: &str) -> Value {
    match serde_json::from_str::<Value>(line) {
        Ok(value) if value.is_object() => value,
        _ => json!({ "type": "message", "text": line }),
    }
}

fn auth_backend(config: &LinkConfig) -> Result<Arc<dyn AuthBackend>> {
    let auth = &config.auth;
    if auth.refresh_url.is_some() || auth.verify_url.is_some() {
        let backend = HttpAuthBackend::new(
            auth.refresh_url.clone(),
            auth.verify_url.clone(),
            auth.token.clone(),
            Duration::from_secs(config.fallback.timeout_secs),
        )?;
        Ok(Arc::new(backend))
    } else {
        Ok(Arc::new(StaticAuth::new(auth.token.clone())))
    }
}

/// Prints inbound traffic to stdout; lifecycle goes to the log
struct ConsoleHandler;

impl ConnectionHandler for ConsoleHandler {
    fn on_message(&self, message: Value) {
        println!("{}", message);
    }

    fn on_error(&self, error: &Error) {
        warn!(code = %error.code(), "{}", error);
    }

    fn on_disconnect(&self, reason: &str) {
        info!(reason = %reason, "Disconnected");
    }

    fn on_state_change(&self, from: ConnectionState, to: ConnectionState) {
        debug!(from = %from, to = %to, "Connection state changed");
    }
}

fn handle_scope_command(subcommand: ScopeSubcommand, config: &LinkConfig) -> Result<()> {
    let store = FileScopeStore::new(config.state_dir());

    match subcommand {
        ScopeSubcommand::Select { scope } => {
            store.save(Some(&scope))?;
            println!("Selected scope: {}", scope);
        }
        ScopeSubcommand::Show => match store.load()? {
            Some(scope) => println!("{}", scope),
            None => println!("(none)"),
        },
        ScopeSubcommand::Clear => {
            store.save(None)?;
            println!("Scope selection cleared.");
        }
    }

    Ok(())
}

fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = load_or_exit(config.as_deref());
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Configuration written to {}", written.display());
        }
        ConfigSubcommand::Validate { config } => {
            load_or_exit(config.as_deref());
            println!("Configuration is valid.");
        }
    }

    Ok(())
}
