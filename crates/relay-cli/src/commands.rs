//! Slash commands for the interactive prompt.

use relay_core::Agent;
use relay_mcp::{McpSession, ProviderState, ServerStatus, ToolRegistry};
use relay_types::{Message, truncate_str};

pub enum SlashResult {
    Continue,
    Break,
    Unknown,
}

/// Returns `None` when `input` is not a slash command.
pub fn handle_slash_command(
    input: &str,
    messages: &mut Vec<Message>,
    agent: &Agent,
    session: &McpSession,
) -> Option<SlashResult> {
    if !input.starts_with('/') {
        return None;
    }

    let cmd = input.split_whitespace().next().unwrap_or(input);
    match cmd {
        "/quit" | "/exit" => Some(SlashResult::Break),
        "/clear" => {
            messages.clear();
            eprintln!("Conversation cleared.");
            Some(SlashResult::Continue)
        }
        "/help" => {
            print_help();
            Some(SlashResult::Continue)
        }
        "/model" => {
            eprintln!("Current model: {}", agent.model());
            Some(SlashResult::Continue)
        }
        "/tools" => {
            eprint!("{}", format_tools(session.registry()));
            Some(SlashResult::Continue)
        }
        "/servers" => {
            eprint!("{}", format_servers(&session.summary()));
            Some(SlashResult::Continue)
        }
        _ => Some(SlashResult::Unknown),
    }
}

fn format_tools(registry: &ToolRegistry) -> String {
    if registry.is_empty() {
        return "No tools available.\n".to_string();
    }
    let width = registry
        .iter()
        .map(|t| t.qualified_name.len())
        .max()
        .unwrap_or(0);
    let mut out = format!("{} tools:\n", registry.len());
    for tool in registry {
        let summary = tool.description.lines().next().unwrap_or("");
        let summary = if summary.len() > 60 {
            format!("{}...", truncate_str(summary, 60))
        } else {
            summary.to_string()
        };
        out.push_str(&format!(
            "  {:<width$}  [{}]  {}\n",
            tool.qualified_name, tool.server, summary
        ));
    }
    out
}

fn format_servers(statuses: &[ServerStatus]) -> String {
    if statuses.is_empty() {
        return "No MCP servers configured.\n".to_string();
    }
    let mut out = String::from("MCP servers:\n");
    for status in statuses {
        let detail = match (status.state, &status.error) {
            (ProviderState::Ready, _) => format!("{} tools", status.tools),
            (_, Some(err)) => err.clone(),
            (_, None) => String::new(),
        };
        out.push_str(&format!("  {:<20} {:<12} {}\n", status.name, status.state, detail));
    }
    out
}

fn print_help() {
    eprintln!("Available commands:");
    eprintln!("  /help     Show this help");
    eprintln!("  /tools    List the tools the model can call");
    eprintln!("  /servers  Show MCP server status");
    eprintln!("  /model    Show current model");
    eprintln!("  /clear    Forget the conversation so far");
    eprintln!("  /quit     Exit (also /exit or Ctrl+D)");
}
