mod repl;

use agent_core::config::AppConfig;
use agent_core::tool_registry::ToolRegistry;
use agent_sandbox::{Limits, Sandbox};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "rag-agent",
    about = "A retrieval-augmented agent with web search, SQL, vision and a code sandbox",
    version,
    author
)]
struct Cli {
    /// Path to config file (default: ~/.config/rag-agent/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the model name
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Override the API base URL
    #[arg(long, global = true)]
    api_base: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start interactive chat (default)
    Chat {
        /// Session name to create
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Run a code file in the sandbox and print the result
    Exec {
        /// File to run; reads stdin when omitted
        file: Option<PathBuf>,
    },

    /// Show or manage configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Initialize default configuration file
    Init,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "rag_agent=info,warn".into()))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => {
            let mut config = AppConfig::load_from(path)
                .with_context(|| format!("reading config from {}", path.display()))?;
            config.apply_env();
            config
        }
        None => AppConfig::load()?,
    };

    // CLI flags win over file and environment.
    if let Some(model) = &cli.model {
        config.provider.model = model.clone();
    }
    if let Some(api_base) = &cli.api_base {
        config.provider.api_base = api_base.clone();
    }

    match cli.command {
        Some(Commands::Config { action }) => handle_config_command(action, &config),
        Some(Commands::Exec { file }) => run_file(file, &config),
        Some(Commands::Chat { session }) => start_chat(config, session).await,
        None => start_chat(config, None).await,
    }
}

async fn start_chat(config: AppConfig, session: Option<String>) -> Result<()> {
    let mut registry = ToolRegistry::new();
    agent_tools::register_all(&mut registry, &config);
    let registry = Arc::new(registry);

    tracing::info!(
        "Loaded {} tools, model: {}, endpoint: {}",
        registry.len(),
        config.provider.model,
        config.provider.api_base,
    );

    repl::run(config, registry, session).await
}

fn run_file(file: Option<PathBuf>, config: &AppConfig) -> Result<()> {
    let code = match &file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut code = String::new();
            std::io::stdin().read_to_string(&mut code)?;
            code
        }
    };
    let sandbox = Sandbox::new(Limits {
        recursion_limit: config.sandbox.recursion_limit,
        max_output: config.sandbox.max_output,
    })
    .with_partial_output(config.sandbox.include_partial_output);
    print!("{}", sandbox.execute(&code));
    Ok(())
}

fn handle_config_command(action: Option<ConfigAction>, config: &AppConfig) -> Result<()> {
    match action {
        Some(ConfigAction::Show) | None => {
            let toml_str = toml::to_string_pretty(config)?;
            println!("{}", toml_str);
        }
        Some(ConfigAction::Init) => {
            let path = AppConfig::default_path();
            if path.exists() {
                println!("Config already exists at: {}", path.display());
            } else {
                AppConfig::default().save()?;
                println!("Created default config at: {}", path.display());
            }
        }
        Some(ConfigAction::Path) => {
            println!("{}", AppConfig::default_path().display());
        }
    }
    Ok(())
}
