use agent_core::agent_loop::AgentLoop;
use agent_core::config::AppConfig;
use agent_core::session::SessionManager;
use agent_core::tool_registry::ToolRegistry;
use agent_core::types::{AgentEvent, Message};
use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::{Config as RlConfig, DefaultEditor};
use std::sync::Arc;
use tokio::sync::mpsc;

const HELP: &str = "  /new [name]      — Create a new session
  /sessions        — List all sessions
  /switch <id>     — Switch to a session
  /remember <text> — Keep a memory for this session
  /memories        — List memories
  /forget <n>      — Remove memory number n
  /tools           — List available tools
  /config          — Show current config
  /clear           — Clear current session history
  /help            — Show this help
  /exit            — Quit";

/// Run the interactive REPL.
pub async fn run(
    config: AppConfig,
    tool_registry: Arc<ToolRegistry>,
    session_name: Option<String>,
) -> Result<()> {
    println!("\n  rag-agent v{}\n", env!("CARGO_PKG_VERSION"));
    println!("  Type your message and press Enter to chat.\n  Commands:\n{}\n", HELP);
    println!(
        "  Model: {}  |  Endpoint: {}",
        config.provider.model, config.provider.api_base
    );
    if !config.store.is_configured() {
        println!("\x1b[1;33m  Knowledge base not configured: set SUPABASE_URL and SUPABASE_SERVICE_KEY.\x1b[0m");
    }
    println!();

    let mut session_manager = SessionManager::new(&config)?;
    if let Some(name) = session_name {
        session_manager.create_session(name)?;
    }

    let agent_loop = Arc::new(AgentLoop::new(config.clone(), tool_registry.clone()));

    let rl_config = RlConfig::builder().auto_add_history(true).build();
    let history_path = AppConfig::data_dir().join("repl_history.txt");
    let mut rl = DefaultEditor::with_config(rl_config)?;
    let _ = rl.load_history(&history_path);

    loop {
        let session_name = session_manager
            .active_session()
            .map(|s| s.name.as_str())
            .unwrap_or("default");
        let prompt = format!("\x1b[1;36m{}\x1b[0m \x1b[1;32m❯\x1b[0m ", session_name);

        match rl.readline(&prompt) {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }

                if input.starts_with('/') {
                    let handled =
                        handle_command(input, &mut session_manager, &tool_registry, &config)?;
                    if !handled {
                        break; // /exit
                    }
                    continue;
                }

                session_manager.push_message(Message::user(input))?;
                let messages = session_manager.recent_messages();
                let memories = session_manager.memories().to_vec();

                let (tx, mut rx) = mpsc::unbounded_channel::<AgentEvent>();
                let agent_handle = {
                    let agent_loop = agent_loop.clone();
                    tokio::spawn(async move { agent_loop.run(&messages, &memories, tx).await })
                };

                print!("\x1b[1;33massistant\x1b[0m: ");
                while let Some(event) = rx.recv().await {
                    match event {
                        AgentEvent::ContentChunk(text) => print!("{}", text),
                        AgentEvent::ToolCallStart { name, .. } => {
                            println!("\n  \x1b[0;35m⚡ Calling tool: {}\x1b[0m", name);
                        }
                        AgentEvent::ToolResult(output) => {
                            let status = if output.is_error {
                                "\x1b[0;31m✗\x1b[0m"
                            } else {
                                "\x1b[0;32m✓\x1b[0m"
                            };
                            println!("  {} {}", status, preview(&output.content, 200).replace('\n', "\n    "));
                            print!("\x1b[1;33massistant\x1b[0m: ");
                        }
                        AgentEvent::Done(_) => {}
                    }
                }
                println!();

                match agent_handle.await {
                    Ok(Ok(msg)) => session_manager.push_message(msg)?,
                    Ok(Err(e)) => eprintln!("\x1b[0;31mAgent error: {}\x1b[0m", e),
                    Err(e) => eprintln!("\x1b[0;31mTask error: {}\x1b[0m", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    if let Some(parent) = history_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let _ = rl.save_history(&history_path);

    Ok(())
}

/// The first `max` characters of `text`, with an ellipsis when cut.
fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Handle a slash command. Returns `true` to continue the loop, `false` to exit.
fn handle_command(
    input: &str,
    session_manager: &mut SessionManager,
    tool_registry: &ToolRegistry,
    config: &AppConfig,
) -> Result<bool> {
    let (cmd, arg) = match input.split_once(' ') {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (input, ""),
    };

    match cmd {
        "/exit" | "/quit" | "/q" => {
            println!("Goodbye!");
            return Ok(false);
        }
        "/new" => {
            let name = if arg.is_empty() {
                format!("session-{}", chrono::Utc::now().format("%Y%m%d-%H%M%S"))
            } else {
                arg.to_string()
            };
            let session = session_manager.create_session(name)?;
            println!("Created session: {} ({})", session.name, short_id(&session.id));
        }
        "/sessions" | "/ls" => {
            let active_id = session_manager.active_session_id().unwrap_or("");
            for (id, name, updated, count) in session_manager.list_sessions() {
                let marker = if id == active_id { " ◀" } else { "" };
                println!(
                    "  {} {} ({} msgs, updated {}){marker}",
                    short_id(id),
                    name,
                    count,
                    updated.format("%Y-%m-%d %H:%M")
                );
            }
        }
        "/switch" => {
            if arg.is_empty() {
                println!("Usage: /switch <session-id-prefix>");
            } else {
                match session_manager.switch_session(arg) {
                    Ok(()) => {
                        if let Some(session) = session_manager.active_session() {
                            println!("Switched to session: {} ({})", session.name, short_id(&session.id));
                        }
                    }
                    Err(e) => println!("{}", e),
                }
            }
        }
        "/remember" => {
            if arg.is_empty() {
                println!("Usage: /remember <text>");
            } else if session_manager.remember(arg)? {
                println!("Remembered.");
            } else {
                println!("Already remembered.");
            }
        }
        "/memories" => {
            let memories = session_manager.memories();
            if memories.is_empty() {
                println!("  No memories.");
            }
            for (i, memory) in memories.iter().enumerate() {
                println!("  {}. {}", i + 1, memory);
            }
        }
        "/forget" => match arg.parse::<usize>() {
            Ok(n) => match session_manager.forget(n)? {
                Some(memory) => println!("Forgot: {}", memory),
                None => println!("No memory number {}", n),
            },
            Err(_) => println!("Usage: /forget <number>"),
        },
        "/tools" => {
            let names = tool_registry.list_names();
            println!("  Available tools ({}):", names.len());
            for name in names {
                if let Some(tool) = tool_registry.get(name) {
                    println!("    • {} — {}", name, preview(tool.description(), 80));
                }
            }
        }
        "/config" => {
            println!("{}", toml::to_string_pretty(config)?);
        }
        "/clear" => {
            session_manager.clear_history()?;
            println!("Cleared session history.");
        }
        "/help" | "/?" => println!("{}", HELP),
        _ => {
            println!("Unknown command: {}. Type /help for available commands.", cmd);
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_respects_char_boundaries() {
        assert_eq!(preview("héllo", 2), "hé...");
        assert_eq!(preview("short", 10), "short");
    }

    #[test]
    fn test_memory_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.session.history_dir = Some(dir.path().to_path_buf());
        let mut sessions = SessionManager::new(&config).unwrap();
        let registry = ToolRegistry::new();

        assert!(handle_command("/remember prefers short answers", &mut sessions, &registry, &config).unwrap());
        assert_eq!(sessions.memories(), ["prefers short answers".to_string()]);
        assert!(handle_command("/forget 1", &mut sessions, &registry, &config).unwrap());
        assert!(sessions.memories().is_empty());
        assert!(!handle_command("/exit", &mut sessions, &registry, &config).unwrap());
    }
}
