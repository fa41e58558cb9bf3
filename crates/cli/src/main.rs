mod config;
mod error;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use engine::{Engine, GeminiBackend, Outcome, Registry, builtin_tools};
use storage::{Part, Role, Session, SessionStore};
use toolserver::Manager;

use config::Config;
use error::{Error, Result};

const SYSTEM_PROMPT: &str = "You are an AI assistant.\n\
Execute tasks from users and always call the 'complete' function when a task is finished.\n\
When calling functions, do not write the function name as text, but actually call the function.";
const CONFIG_FILE: &str = "skipper.toml";

#[derive(Parser)]
#[command(name = "skipper")]
#[command(about = "A tool-using AI agent", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the config file
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a task to the agent
    Run {
        /// The task or message for the agent
        prompt: String,

        /// Resume an existing session (ID prefix match supported)
        #[arg(short, long)]
        session: Option<String>,
    },
    /// List stored sessions
    Sessions {
        /// Show only the last N sessions
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Show the full history of a session
    History {
        /// Session ID (prefix match supported)
        session: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { prompt, session } => cmd_run(&cli.config, &prompt, session.as_deref()).await,
        Commands::Sessions { limit } => cmd_sessions(limit),
        Commands::History { session } => cmd_history(&session),
    }
}

async fn cmd_run(config_path: &PathBuf, prompt: &str, session_prefix: Option<&str>) -> Result<()> {
    let config = if config_path.exists() {
        Config::load(config_path).map_err(Error::Config)?
    } else {
        Config::default()
    };
    let api_key = config.api_key()?;

    let store = SessionStore::new(sessions_dir());
    let session = match session_prefix {
        Some(prefix) => resolve_session(&store, prefix)?,
        None => Session::new(),
    };

    // Launch and handshake every configured tool server; any failure here
    // aborts before the model is ever contacted.
    let manager = Arc::new(Manager::new());
    manager.initialize_from_config(&config.servers).await?;

    manager
        .setup_notification_handlers(|server, notification| {
            debug!(server, method = %notification.method, "tool server notification");
        })
        .await;
    drain_stderr(&manager).await;

    let mut builder = GeminiBackend::builder(api_key, &config.backend.model);
    if let Some(max) = config.backend.max_output_tokens {
        builder = builder.max_tokens(max);
    }
    let backend = builder.build();

    let (registry, listing_failures) = Registry::new(Arc::clone(&manager), builtin_tools()).await;
    if let Some(err) = listing_failures {
        warn!(error = %err, "some tool servers failed to list tools");
    }

    let mut engine =
        Engine::new(backend, registry, store, session).with_system(SYSTEM_PROMPT);

    println!("skipper v{}", env!("CARGO_PKG_VERSION"));
    println!("Session ID: {}", engine.session_id());
    println!("Model: {}\n", config.backend.model);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            cancel.cancel();
        });
    }

    let result = engine.process_message(&cancel, prompt).await;
    let close_result = manager.close().await;

    match result {
        Ok(Outcome::Completed { message }) => {
            println!("\nTask completed:\n{message}");
        }
        Ok(Outcome::QuestionRaised { question, options }) => {
            println!("\nQuestion:\n{question}");
            for option in options {
                println!("  - {option}");
            }
            println!(
                "\nAnswer with: skipper run --session {} \"<answer>\"",
                engine.session_id()
            );
        }
        Err(e) => return Err(e.into()),
    }

    close_result?;
    Ok(())
}

fn cmd_sessions(limit: usize) -> Result<()> {
    let store = SessionStore::new(sessions_dir());
    let sessions = store.list()?;

    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    println!("{:<36}  {:<16}  {:<5}  FIRST PROMPT", "SESSION ID", "UPDATED", "TURNS");
    println!("{}", "-".repeat(100));

    for session in sessions.into_iter().take(limit) {
        let updated = Local
            .from_utc_datetime(&session.updated_at.naive_utc())
            .format("%Y-%m-%d %H:%M");
        let prompt = session.first_user_text().unwrap_or("").replace('\n', " ");
        let prompt = if prompt.len() > 40 {
            let cut: String = prompt.chars().take(37).collect();
            format!("{cut}...")
        } else {
            prompt
        };
        println!(
            "{:<36}  {:<16}  {:<5}  {prompt}",
            session.id.to_string(),
            updated,
            session.history.len()
        );
    }

    Ok(())
}

fn cmd_history(session_prefix: &str) -> Result<()> {
    let store = SessionStore::new(sessions_dir());
    let session = resolve_session(&store, session_prefix)?;

    println!("Session: {}", session.id);
    println!("Created: {}", session.created_at.to_rfc3339());
    println!("Updated: {}\n", session.updated_at.to_rfc3339());

    for content in &session.history {
        let role = match content.role {
            Role::User => "USER",
            Role::Model => "MODEL",
        };
        println!("--- {role} ---");
        for part in &content.parts {
            match part {
                Part::Text(text) => println!("{text}"),
                Part::FunctionCall(call) => {
                    println!("[call] {}({})", call.name, serde_json::to_string(&call.args).unwrap_or_default())
                }
                Part::FunctionResponse(response) => {
                    println!(
                        "[result] {} -> {}",
                        response.name,
                        serde_json::to_string(&response.response).unwrap_or_default()
                    )
                }
            }
        }
        println!();
    }

    Ok(())
}

/// Resolve a session by ID prefix, erroring on zero or many matches.
fn resolve_session(store: &SessionStore, prefix: &str) -> Result<Session> {
    let sessions = store.list()?;
    let matching: Vec<&Session> = sessions
        .iter()
        .filter(|s| s.id.to_string().starts_with(prefix))
        .collect();

    match matching.len() {
        0 => Err(Error::SessionNotFound {
            prefix: prefix.to_string(),
        }),
        1 => store.load(matching[0].id).map_err(Error::Storage),
        _ => Err(Error::AmbiguousSession {
            prefix: prefix.to_string(),
            matches: matching.iter().map(|s| s.id.to_string()).collect(),
        }),
    }
}

/// Forward each tool server's stderr to the log, line by line.
async fn drain_stderr(manager: &Manager) {
    for (server, stderr) in manager.stderr_readers().await {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(server = %server, "{line}");
            }
        });
    }
}

fn sessions_dir() -> PathBuf {
    data_dir()
        .unwrap_or_else(|| PathBuf::from(".skipper"))
        .join("sessions")
}

fn data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share/skipper"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
            .map(|p| p.join("skipper"))
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|h| PathBuf::from(h).join("skipper"))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        None
    }
}
