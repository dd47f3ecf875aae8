use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rmcp::model::JsonObject;
use sandbox_router::{SandboxConfig, SandboxError, SandboxManager, SandboxToolClient};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sandbox-router", version, about = "Acquire MCP sandboxes and route tool calls")]
struct Cli {
    /// YAML configuration file (defaults are used when omitted)
    #[arg(long, env = "SANDBOX_ROUTER_CONFIG")]
    config: Option<String>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the normalized names of all acquired servers
    Servers,
    /// Print the namespaced tool catalog
    Tools,
    /// Invoke one namespaced tool
    Call {
        /// Tool name, e.g. wikipedia_search
        tool: String,
        /// Arguments as a JSON object
        #[arg(long)]
        args: Option<String>,
    },
    /// Keep the sandboxes until Ctrl-C
    Hold,
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_json);

    let config = match &cli.config {
        Some(path) => SandboxConfig::from_file(path)
            .await
            .with_context(|| format!("loading config from {}", path))?,
        None => SandboxConfig::default(),
    }
    .with_env_proxy();

    // Reject bad arguments before provisioning anything
    let arguments: Option<JsonObject> = match &cli.command {
        Command::Call {
            args: Some(raw), ..
        } => Some(serde_json::from_str(raw).context("--args must be a JSON object")?),
        _ => None,
    };

    let manager = Arc::new(SandboxManager::new(config)?);
    let client = SandboxToolClient::new(Arc::clone(&manager));

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            futures::future::pending::<()>().await;
        }
    };
    let outcome = manager
        .run_scoped(run(cli.command, arguments, &client), interrupt)
        .await
        .unwrap_or(Ok(()));
    if let Err(e) = &outcome {
        match e.downcast_ref::<SandboxError>() {
            Some(err) if err.is_provider_error() => error!("Provider request failed: {:#}", e),
            _ => error!("{:#}", e),
        }
    }

    let metrics = manager.metrics().snapshot();
    info!(
        "Done: {} acquired, {} acquisition failures, {} release failures, {} tool calls ({:.1}% succeeded)",
        metrics.acquisitions_succeeded,
        metrics.acquisitions_failed,
        metrics.releases_failed,
        metrics.total_calls,
        metrics.success_rate()
    );
    outcome
}

async fn run(
    command: Command,
    arguments: Option<JsonObject>,
    client: &SandboxToolClient,
) -> anyhow::Result<()> {
    match command {
        Command::Servers => {
            for name in client.manager().get_all_server_names() {
                println!("{}", name);
            }
        }
        Command::Tools => {
            for tool in client.list_tools().await.iter() {
                let description = tool
                    .description
                    .as_deref()
                    .and_then(|d| d.lines().next())
                    .unwrap_or("");
                println!("{}\t{}", tool.name, description);
            }
        }
        Command::Call { tool, .. } => {
            let result = client.call_tool(&tool, arguments).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Hold => {
            let names = client.manager().get_all_server_names();
            info!("Holding {} servers: {:?}", names.len(), names);
            info!("Press Ctrl-C to release sandboxes");
            futures::future::pending::<()>().await;
        }
    }
    Ok(())
}
