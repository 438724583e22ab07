//! FlowAgent CLI - run workflows, one-shot agents, or the MCP server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use flowagent::agent::DefaultAgentFactory;
use flowagent::config::{load_config, Config};
use flowagent::flow::{FlowEngine, Workflow};
use flowagent::llm::{LlmClient, OpenAiClient};
use flowagent::mcp::{
    goal_channel, run_goal_consumer, Dispatcher, HandlerFactory, McpServer, McpToolBridge,
    SseClient,
};
use flowagent::tools::{FsReadTool, FsWriteTool, HttpGetTool, ToolRegistry};

#[derive(Parser)]
#[command(name = "flowagent", about = "Multi-agent workflow runtime", version)]
struct Args {
    /// Path to a JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a workflow from a JSON file
    Run {
        /// Workflow definition file
        #[arg(long)]
        workflow: PathBuf,
        /// Workflow-level input as a JSON object
        #[arg(long, default_value = "{}")]
        input: String,
    },
    /// Run a single agent against a goal
    Agent {
        /// The goal to pursue
        #[arg(long)]
        goal: String,
        /// Agent type (general, web_scraper, data_analysis, file_processor)
        #[arg(long, default_value = "general")]
        agent_type: String,
    },
    /// Host the MCP/REST server over the local tool registry
    Serve {
        /// Bind address
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port
        #[arg(long, short, default_value = "8080")]
        port: u16,
    },
}

fn build_registry() -> anyhow::Result<ToolRegistry> {
    let workspace = std::env::current_dir()?;
    let mut registry = ToolRegistry::new();
    registry.register(FsReadTool::new(workspace.clone()))?;
    registry.register(FsWriteTool::new(workspace))?;
    registry.register(HttpGetTool::new())?;
    Ok(registry)
}

/// Attach configured MCP servers: spawn their SSE clients and bridge their
/// tools into the registry. Returns the goal receiver so the caller can
/// start the consumer once the registry is frozen.
async fn attach_mcp_servers(
    config: &Config,
    registry: &mut ToolRegistry,
    cancel: &CancellationToken,
) -> (Vec<Arc<SseClient>>, tokio::sync::mpsc::Receiver<String>) {
    let handlers = HandlerFactory::new();
    let (goal_tx, goal_rx) = goal_channel(64);
    let mut clients = Vec::new();

    for (name, server_config) in &config.mcp_servers {
        let client = Arc::new(SseClient::new(
            name.clone(),
            server_config.clone(),
            Arc::new(Dispatcher::new()),
            handlers.for_server(name),
            goal_tx.clone(),
            cancel.child_token(),
        ));

        {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.run().await });
        }

        if let Err(e) = client.initialize().await {
            warn!(server = %name, "MCP initialize failed: {}", e);
            clients.push(client);
            continue;
        }
        match McpToolBridge::from_client(Arc::clone(&client)).await {
            Ok(bridges) => {
                for bridge in bridges {
                    if let Err(e) = registry.register(bridge) {
                        warn!(server = %name, "Skipping remote tool: {}", e);
                    }
                }
            }
            Err(e) => warn!(server = %name, "Could not list remote tools: {}", e),
        }
        clients.push(client);
    }

    (clients, goal_rx)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Run { workflow, input } => {
            let raw = std::fs::read_to_string(&workflow)
                .with_context(|| format!("reading {}", workflow.display()))?;
            let workflow: Workflow = serde_json::from_str(&raw).context("parsing workflow")?;
            let input: serde_json::Value = serde_json::from_str(&input).context("parsing input")?;

            let llm = Arc::new(OpenAiClient::new(config.llm.clone())?);
            let registry = Arc::new(build_registry()?);
            let engine = Arc::new(FlowEngine::new(
                llm,
                registry,
                Arc::new(DefaultAgentFactory),
                config.agent.clone(),
                config.workflow,
            ));

            let execution = engine.execute(workflow, input).await?;
            info!(execution_id = %execution.id, "Workflow started");

            let mut stream = engine
                .subscribe(&execution.id)
                .await
                .context("execution vanished")?;
            while let Some(event) = stream.recv().await {
                info!(seq = event.seq, "{}", event.message);
            }

            let terminal = engine
                .get_execution(&execution.id)
                .await
                .context("execution vanished")?;
            println!("{}", serde_json::to_string_pretty(&terminal.output)?);
            engine.cleanup(&execution.id).await;
        }
        Command::Agent { goal, agent_type } => {
            use flowagent::agent::AgentFactory;

            let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(config.llm.clone())?);
            let cancel = CancellationToken::new();
            let mut registry = build_registry()?;
            let (clients, goal_rx) = attach_mcp_servers(&config, &mut registry, &cancel).await;
            let registry = Arc::new(registry);
            if !clients.is_empty() {
                tokio::spawn(run_goal_consumer(
                    goal_rx,
                    Arc::new(DefaultAgentFactory),
                    Arc::clone(&llm),
                    Arc::clone(&registry),
                    config.agent.clone(),
                    cancel.child_token(),
                ));
            }

            let agent =
                DefaultAgentFactory.create(&agent_type, llm, Arc::clone(&registry), &config.agent);
            let output = agent.run(cancel.child_token(), &goal).await;

            match output.answer {
                Some(answer) => println!("{}", answer),
                None => {
                    eprintln!(
                        "agent failed: {}",
                        output.error.as_deref().unwrap_or("unknown")
                    );
                    std::process::exit(1);
                }
            }
        }
        Command::Serve { bind, port } => {
            let cancel = CancellationToken::new();
            let mut registry = build_registry()?;
            let (clients, goal_rx) = attach_mcp_servers(&config, &mut registry, &cancel).await;
            let registry = Arc::new(registry);
            if !clients.is_empty() {
                let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(config.llm.clone())?);
                tokio::spawn(run_goal_consumer(
                    goal_rx,
                    Arc::new(DefaultAgentFactory),
                    llm,
                    Arc::clone(&registry),
                    config.agent.clone(),
                    cancel.child_token(),
                ));
            }

            let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
            let server = McpServer::new(registry);
            server.serve(addr).await?;
        }
    }

    Ok(())
}
