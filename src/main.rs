//! `localchat` — command-line front end for the tool-augmented chat loop.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use localchat::agent_core::{
    run_tool_conversation, transport_failure_notice, AgentError, ConversationObserver,
    ConversationOptions, EventFilter, EventLogger, Message, ToolExecutionEvent,
    ToolRouter,
};
use localchat::config::AppConfig;
use localchat::inference::{AssistantTurn, ChatModel, InferenceClient};
use localchat::mcp_client::{ConnectionManager, McpRegistry};
use localchat::tools::{NativeToolRegistry, ToolContext};

#[derive(Parser)]
#[command(name = "localchat")]
#[command(version)]
#[command(about = "Local-first chat with native and MCP tools")]
#[command(long_about = "LocalChat talks to an OpenAI-compatible endpoint (a local server or \
OpenRouter), lets the model call native tools (read_file, brave_search, load_skill) and tools \
exposed by MCP servers, and records every tool execution in an audit log.\n\n\
Configuration is read from $LOCALCHAT_CONFIG, then localchat.yaml in the working directory \
or a parent, then <data_dir>/config.yaml.\n\n\
Logs are written to <data_dir>/agent.log; set RUST_LOG to change the filter.")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file to load instead of searching for one
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Send one message and run the tool loop until the model answers
    Ask {
        /// The message to send
        #[arg(required = true, trailing_var_arg = true)]
        prompt: Vec<String>,

        /// Model profile key (defaults to `active_model`)
        #[arg(short, long)]
        model: Option<String>,

        /// System prompt
        #[arg(short, long)]
        system: Option<String>,

        /// Do not offer any tools to the model
        #[arg(long)]
        no_tools: bool,

        /// API key for tools that need one (brave_search)
        #[arg(long, env = "LOCALCHAT_TOOL_API_KEY", hide_env_values = true)]
        tool_api_key: Option<String>,
    },

    /// List recorded tool executions, newest first
    Events {
        /// Substring of the tool name
        #[arg(long)]
        tool: Option<String>,

        /// running, success or error
        #[arg(long)]
        status: Option<String>,

        /// Substring of the MCP server id
        #[arg(long)]
        server: Option<String>,

        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,

        /// Print full events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Re-run a recorded tool execution
    Replay {
        event_id: String,

        #[arg(long, env = "LOCALCHAT_TOOL_API_KEY", hide_env_values = true)]
        tool_api_key: Option<String>,
    },

    /// List the tools the model would be offered
    Tools,

    /// Check that the model endpoint is reachable
    Health {
        #[arg(short, long)]
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(e) = localchat::init_tracing(&localchat::data_dir()) {
        eprintln!("warning: file logging disabled: {e}");
    }

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?.0,
    };

    match cli.command {
        Command::Ask {
            prompt,
            model,
            system,
            no_tools,
            tool_api_key,
        } => {
            let router = build_router(&config)?;
            ask(
                &config,
                &router,
                prompt.join(" "),
                model.as_deref(),
                system,
                no_tools,
                tool_api_key,
            )
            .await
        }
        Command::Events {
            tool,
            status,
            server,
            limit,
            json,
        } => {
            let log = EventLogger::open(config.event_log_path())?;
            let filter = EventFilter {
                tool_name: tool,
                status,
                server_id: server,
                limit: Some(limit),
            };
            let events = log.list_events(&filter).await?;
            for event in &events {
                if json {
                    println!("{}", serde_json::to_string(event)?);
                } else {
                    println!("{}", summarize_event(event));
                }
            }
            if events.is_empty() && !json {
                eprintln!("no events in {}", log.path().display());
            }
            Ok(())
        }
        Command::Replay {
            event_id,
            tool_api_key,
        } => {
            let router = build_router(&config)?;
            let ctx = ToolContext {
                api_key: tool_api_key,
            };
            let outcome = router.replay(&event_id, &ctx).await?;
            println!("{}", summarize_event(&outcome.event));
            println!("{}", serde_json::to_string_pretty(&outcome.result)?);
            Ok(())
        }
        Command::Tools => {
            let router = build_router(&config)?;
            for definition in router.tool_definitions().await {
                let gate = if definition.function.requires_confirmation {
                    " (requires confirmation)"
                } else {
                    ""
                };
                println!("{}{gate}", definition.name());
                println!("    {}", definition.function.description);
            }
            Ok(())
        }
        Command::Health { model } => {
            let resolved = config.models_config().resolve(model.as_deref())?;
            let client = InferenceClient::new(resolved)?;
            if client.health_check().await? {
                println!("ok: {} is reachable", client.base_url());
                Ok(())
            } else {
                anyhow::bail!("{} is not reachable", client.base_url())
            }
        }
    }
}

fn build_router(config: &AppConfig) -> anyhow::Result<ToolRouter> {
    let events = EventLogger::open(config.event_log_path())
        .context("failed to open the tool event log")?;
    let connections =
        ConnectionManager::new(config.mcp.connect_timeout(), config.mcp.operation_timeout());
    let mcp = McpRegistry::new(config.mcp.servers.clone(), connections)?;
    let native = NativeToolRegistry::with_defaults(&config.tools);
    Ok(ToolRouter::new(native, mcp, Arc::new(events)))
}

async fn ask(
    config: &AppConfig,
    router: &ToolRouter,
    prompt: String,
    model_key: Option<&str>,
    system: Option<String>,
    no_tools: bool,
    tool_api_key: Option<String>,
) -> anyhow::Result<()> {
    let resolved = config.models_config().resolve(model_key)?;
    let mut options = ConversationOptions::from_config(&config.tools, &resolved.profile);
    options.tool_api_key = tool_api_key;
    if no_tools {
        options.tools_enabled = false;
    }

    let tools = if options.tools_enabled {
        router.tool_definitions().await
    } else {
        Vec::new()
    };

    let client = InferenceClient::new(resolved)?;
    let mut messages = Vec::new();
    if let Some(system) = system {
        messages.push(Message::system(system));
    }
    messages.push(Message::user(prompt));

    let mut observer = StdoutObserver::default();
    let result = run_tool_conversation(
        &client as &dyn ChatModel,
        router,
        messages,
        &tools,
        &options,
        &mut observer,
    )
    .await;

    match result {
        Ok(outcome) => {
            println!();
            tracing::info!(
                rounds = outcome.rounds,
                stop_reason = ?outcome.stop_reason,
                messages = outcome.messages.len(),
                "conversation finished"
            );
            Ok(())
        }
        Err(e @ AgentError::Completion { .. }) => {
            println!();
            eprintln!("{}", transport_failure_notice(&e));
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

// ─── Output ─────────────────────────────────────────────────────────────────

/// Streams assistant text to stdout; tool activity and warnings go to stderr.
#[derive(Default)]
struct StdoutObserver {
    /// Bytes of the current turn already printed.
    printed: usize,
}

impl ConversationObserver for StdoutObserver {
    fn append_empty_assistant(&mut self) {
        self.printed = 0;
    }

    fn update_last_assistant(&mut self, turn: &AssistantTurn) {
        if let Some(fresh) = turn.content.get(self.printed..) {
            if !fresh.is_empty() {
                print!("{fresh}");
                let _ = std::io::stdout().flush();
                self.printed = turn.content.len();
            }
        }
    }

    fn discard_last_assistant(&mut self) {
        self.printed = 0;
    }

    fn append_message(&mut self, message: &Message) {
        if let Some(event) = &message.tool_event {
            if self.printed > 0 {
                println!();
                self.printed = 0;
            }
            eprintln!("[tool] {}", summarize_event(event));
        }
    }

    fn append_warning(&mut self, message: &Message) {
        eprintln!("\n[warning] {}", message.content);
    }
}

fn summarize_event(event: &ToolExecutionEvent) -> String {
    let mut line = format!(
        "#{} {} {} {} ({} ms)",
        event.sequence,
        event.started_at.format("%Y-%m-%d %H:%M:%S"),
        event.tool_name,
        event.status.as_str(),
        event.duration_ms.unwrap_or(0),
    );
    if let Some(origin) = &event.replay_of {
        line.push_str(&format!(" replay of {origin}"));
    }
    if let Some(error) = &event.error_message {
        line.push_str(&format!(": {error}"));
    }
    line.push_str(&format!(" [{}]", event.id));
    line
}
