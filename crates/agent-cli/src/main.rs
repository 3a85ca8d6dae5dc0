//! agent-cli
//!
//! Runs one tool-calling orchestration against an HTTP generation backend,
//! with tools served by an optional stdio tool server, and prints the result
//! as JSON on stdout. Logs go to stderr.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::{OrchestratorBuilder, ToolExecutor, ToolRegistry, ToolSchema};
use agent_runtime::{BackendConfig, HttpProvider, StdioToolServer};

#[derive(Parser, Debug)]
#[command(name = "agent-cli", version, about = "Run one tool-calling orchestration")]
struct Args {
    /// User prompt
    prompt: String,

    /// Tool server program (speaks JSON-RPC over stdio)
    #[arg(long)]
    tool_server: Option<String>,

    /// Arguments for the tool server, after `--`
    #[arg(last = true)]
    tool_server_args: Vec<String>,

    /// System prompt
    #[arg(long)]
    system: Option<String>,

    /// Model identifier
    #[arg(long, env = "AGENT_MODEL")]
    model: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Tool call budget for the run
    #[arg(long, env = "AGENT_MAX_TOOL_CALLS", default_value_t = 20)]
    max_tool_calls: usize,

    /// Expected calls per iteration, used to derive the iteration cap
    #[arg(long, default_value_t = 4)]
    batch_size: usize,

    /// Per-request timeout for the tool server, in seconds
    #[arg(long, default_value_t = 60)]
    tool_timeout_secs: u64,

    /// Print only the final answer instead of the full JSON result
    #[arg(long)]
    text: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment before clap reads env-backed flags
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let backend = BackendConfig::from_env()?;
    tracing::info!(url = %backend.url, "Using generation backend");
    let provider = Arc::new(HttpProvider::from_config(backend));

    let (executor, tools): (Arc<dyn ToolExecutor>, Vec<ToolSchema>) = match &args.tool_server {
        Some(program) => {
            let server = StdioToolServer::spawn(
                program,
                &args.tool_server_args,
                Duration::from_secs(args.tool_timeout_secs),
            )
            .await?;
            let tools = server.list_tools().await?;
            let executor: Arc<dyn ToolExecutor> = Arc::new(server);
            (executor, tools)
        }
        None => {
            tracing::warn!("No tool server given; running without tools");
            let executor: Arc<dyn ToolExecutor> = Arc::new(ToolRegistry::new());
            (executor, Vec::new())
        }
    };

    tracing::info!(count = tools.len(), "Tools available");
    for tool in &tools {
        tracing::debug!(tool = %tool.name, "  • {}", tool.description);
    }

    let mut builder = OrchestratorBuilder::new()
        .provider(provider)
        .executor(executor)
        .tools(tools)
        .max_tool_calls(args.max_tool_calls)
        .nominal_batch_size(args.batch_size);
    if let Some(system) = args.system {
        builder = builder.system_prompt(system);
    }
    if let Some(model) = args.model {
        builder = builder.model(model);
    }
    if let Some(temperature) = args.temperature {
        builder = builder.temperature(temperature);
    }
    let orchestrator = builder.build()?;

    let result = match orchestrator.run(&args.prompt).await {
        Ok(result) => result,
        Err(err) => {
            tracing::error!(error = %err, "Orchestration failed");
            anyhow::bail!(err.user_message());
        }
    };

    if args.text {
        println!("{}", result.final_content);
    } else {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    Ok(())
}
