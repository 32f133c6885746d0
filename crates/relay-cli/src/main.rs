//! Relay CLI: a terminal chat client whose tools come from MCP servers.

mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use commands::SlashResult;
use relay_api::OpenAiProvider;
use relay_config::{CliOverrides, RelayConfig};
use relay_core::{Agent, AgentEvent};
use relay_mcp::{McpSession, SessionError, StdioLauncher};
use relay_types::{Message, RelayError, Usage};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(
    name = "relay",
    version,
    about = "Chat with a model that can call tools on MCP servers"
)]
struct Cli {
    /// MCP server config file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Model to use
    #[arg(long)]
    model: Option<String>,

    /// Send a single prompt and print the response (non-interactive)
    #[arg(short, long)]
    print: Option<String>,

    /// Enable verbose/debug logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let config = RelayConfig::load(CliOverrides {
        mcp_config: cli.config,
        model: cli.model,
    })
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    let specs = relay_mcp::config::load(&config.mcp_config).map_err(|e| anyhow::anyhow!("{e}"))?;
    tracing::debug!(
        "Using model {} at {} with {} MCP servers",
        config.model,
        config.base_url,
        specs.len()
    );

    let provider = OpenAiProvider::new(&config.api_key, &config.base_url)
        .context("Failed to create API client")?;
    let agent = create_agent(provider, &config);

    let mut session = McpSession::new(specs, StdioLauncher, config.session);
    let result = run(&mut session, &agent, cli.print).await;

    // Every path out of `run` ends here, errors included. Shutdown
    // failures are logged by the session itself.
    session.close().await;

    result
}

fn create_agent(provider: OpenAiProvider, config: &RelayConfig) -> Agent {
    let mut agent = Agent::new(Arc::new(provider), config.model.clone());
    if let Some(prompt) = &config.system_prompt {
        agent = agent.with_system_prompt(prompt.clone());
    }
    if let Some(max_tokens) = config.max_tokens {
        agent = agent.with_max_tokens(max_tokens);
    }
    agent
}

async fn run(session: &mut McpSession, agent: &Agent, print: Option<String>) -> Result<()> {
    let interrupt = Interrupt::arm();
    match session.open(interrupt.token()).await {
        Ok(()) => {}
        Err(SessionError::Interrupted) => {
            eprintln!("Interrupted while starting MCP servers.");
            return Ok(());
        }
        Err(e) => return Err(anyhow::anyhow!("{e}")),
    }
    drop(interrupt);

    if session.is_degraded() {
        eprintln!(
            "Warning: {} of {} MCP servers failed to start:",
            session.warnings().len(),
            session.handles().len()
        );
        for warning in session.warnings() {
            eprintln!("  {warning}");
        }
    }

    if let Some(prompt) = print {
        // Print mode: single prompt, nothing kept afterwards
        let mut messages = vec![Message::user(prompt)];
        if let Some(usage) = run_turn(agent, session, &mut messages).await? {
            print_usage(&usage);
        }
        return Ok(());
    }

    repl(agent, session).await
}

async fn repl(agent: &Agent, session: &McpSession) -> Result<()> {
    eprintln!(
        "relay v{} (model: {}, tools: {} from {} servers)",
        env!("CARGO_PKG_VERSION"),
        agent.model(),
        session.registry().len(),
        session.handles().iter().filter(|h| h.is_ready()).count(),
    );
    eprintln!("Type your message. Press Ctrl+D to exit.\n");

    let mut lines = spawn_stdin_reader();
    let mut messages: Vec<Message> = Vec::new();
    let mut total_usage = Usage::default();

    loop {
        eprint!("> ");
        io::stderr().flush()?;

        let line = tokio::select! {
            line = lines.recv() => line,
            _ = tokio::signal::ctrl_c() => {
                eprintln!();
                break;
            }
        };
        let input = match line {
            Some(line) => line?,
            None => {
                eprintln!();
                break;
            }
        };

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(handled) = commands::handle_slash_command(input, &mut messages, agent, session)
        {
            match handled {
                SlashResult::Continue => continue,
                SlashResult::Break => break,
                SlashResult::Unknown => {
                    eprintln!("Unknown command: {input}. Type /help for available commands.");
                    continue;
                }
            }
        }

        let checkpoint = messages.len();
        messages.push(Message::user(input));

        match run_turn(agent, session, &mut messages).await {
            Ok(Some(usage)) => total_usage.add(&usage),
            Ok(None) => messages.truncate(checkpoint),
            Err(e) => {
                eprintln!("\nError: {e}");
                // Drop the unanswered user message
                messages.truncate(checkpoint);
            }
        }

        println!();
    }

    print_usage(&total_usage);
    Ok(())
}

/// Run one agent turn, printing its output.
///
/// Ctrl+C cancels the turn, which yields `Ok(None)` rather than an error.
async fn run_turn(
    agent: &Agent,
    session: &McpSession,
    messages: &mut Vec<Message>,
) -> Result<Option<Usage>> {
    let interrupt = Interrupt::arm();
    let cancel = interrupt.token().clone();

    let result = agent
        .run(messages, session, cancel, |event| {
            let mut out = io::stdout();
            match event {
                AgentEvent::Text(text) => {
                    let _ = write!(out, "{text}");
                    let _ = out.flush();
                }
                AgentEvent::ToolStart { name, .. } => {
                    let _ = writeln!(out);
                    let _ = writeln!(out, "  [tool: {name}]");
                }
                AgentEvent::ToolEnd {
                    name,
                    output,
                    is_error,
                } => {
                    if is_error {
                        let _ = writeln!(out, "  [tool {name} error: {output}]");
                    } else {
                        let _ = writeln!(out, "  [tool {name} done: {output}]");
                    }
                }
                AgentEvent::Usage(_) => {}
                AgentEvent::Done => {
                    let _ = writeln!(out);
                }
                AgentEvent::Cancelled => {
                    let _ = writeln!(io::stderr(), "\n[cancelled]");
                }
                AgentEvent::Error(e) => {
                    let _ = writeln!(io::stderr(), "Error: {e}");
                }
            }
        })
        .await;

    Ok(settle(result)?)
}

/// A cancelled turn is not a failure.
fn settle(result: Result<Usage, RelayError>) -> Result<Option<Usage>, RelayError> {
    match result {
        Ok(usage) => Ok(Some(usage)),
        Err(RelayError::Cancelled) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Cancels its token on the next Ctrl+C while it is alive.
struct Interrupt {
    token: CancellationToken,
    watcher: tokio::task::JoinHandle<()>,
}

impl Interrupt {
    fn arm() -> Self {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                trigger.cancel();
            }
        });
        Self { token, watcher }
    }

    fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for Interrupt {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

/// Read stdin lines on a dedicated thread so the prompt can race Ctrl+C.
///
/// The channel closes on EOF.
fn spawn_stdin_reader() -> mpsc::Receiver<io::Result<String>> {
    let (tx, rx) = mpsc::channel(1);
    std::thread::spawn(move || {
        let stdin = io::stdin();
        loop {
            let mut input = String::new();
            match stdin.lock().read_line(&mut input) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.blocking_send(Ok(input)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    break;
                }
            }
        }
    });
    rx
}

fn print_usage(usage: &Usage) {
    eprintln!(
        "Tokens: prompt {}, completion {}, total {}",
        usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
    );
}
