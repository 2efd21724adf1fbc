use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use flowchat::settings::{self, AppSettings};
use flowchat::streaming::PromptResponsePair;
use flowchat::token;
use flowchat::{
    spawn_session, LiveBackend, SessionError, SessionHandle, SessionObserver, SessionOptions,
    SessionStatus,
};

/// Environment variable holding a ready-made Flow token
const FLOW_TOKEN_ENV: &str = "FLOW_TOKEN";

#[derive(Parser)]
#[command(name = "flowchat")]
#[command(about = "Talk to a Speechmatics Flow assistant from the terminal")]
struct Args {
    /// Flow token (defaults to $FLOW_TOKEN)
    #[arg(long)]
    token: Option<String>,

    /// Mint a temporary token from $SPEECHMATICS_API_KEY for every start
    #[arg(long)]
    fetch_token: bool,

    /// Assistant template id
    #[arg(long)]
    template_id: Option<String>,

    /// Flow WebSocket endpoint
    #[arg(long)]
    endpoint: Option<String>,

    /// Initial playback speed (0.5 - 2.0)
    #[arg(long)]
    speed: Option<f32>,

    /// Settings file (defaults to the user config directory)
    #[arg(long)]
    settings: Option<PathBuf>,
}

/// Prints session output to the terminal
struct TerminalObserver;

impl SessionObserver for TerminalObserver {
    fn on_status(&self, status: &SessionStatus) {
        println!("[status] {}", status);
    }

    fn on_pair(&self, _pair: &PromptResponsePair, display: &PromptResponsePair) {
        if !display.prompt.is_empty() {
            println!("you: {}", display.prompt);
        }
        println!("assistant: {}", display.response);
    }

    fn on_error(&self, error: &SessionError) {
        eprintln!("[error] {}", error);
    }

    fn on_speed(&self, speed: f32) {
        println!("[speed] {:.2}x", speed);
    }

    fn on_log_cleared(&self) {
        println!("[log cleared]");
    }
}

fn load_settings(args: &Args) -> AppSettings {
    let path = match &args.settings {
        Some(path) => Some(path.clone()),
        None => match settings::default_settings_path() {
            Ok(path) => Some(path),
            Err(e) => {
                log::warn!("Settings: {}", e);
                None
            }
        },
    };

    let mut settings = path
        .map(|p| settings::load_settings(&p))
        .unwrap_or_default();

    if let Some(template_id) = &args.template_id {
        settings.template_id = template_id.clone();
    }
    if let Some(endpoint) = &args.endpoint {
        settings.endpoint = endpoint.clone();
    }
    if let Some(speed) = args.speed {
        settings.playback_speed = speed;
    }
    settings
}

/// Flag, then $FLOW_TOKEN, then a freshly minted token. An empty result is
/// passed through so the session reports the missing credential itself.
async fn resolve_credential(args: &Args, settings: &AppSettings) -> String {
    if !args.fetch_token {
        if let Some(token) = args.token.clone().filter(|t| !t.trim().is_empty()) {
            return token;
        }
        if let Ok(token) = std::env::var(FLOW_TOKEN_ENV) {
            if !token.trim().is_empty() {
                return token;
            }
        }
        if !token::is_api_key_configured() {
            return String::new();
        }
    }

    let Some(api_key) = token::get_api_key() else {
        eprintln!("[error] {}", token::TokenError::MissingApiKey);
        return String::new();
    };
    match token::fetch_token(&api_key, settings.token_ttl_secs).await {
        Ok(token) => token,
        Err(e) => {
            eprintln!("[error] {}", e);
            String::new()
        }
    }
}

fn print_help() {
    println!("commands: start | stop | speed <0.5-2.0> | clear | log | quit");
}

async fn run_commands(args: &Args, settings: &AppSettings, handle: &SessionHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::error!("Failed to read stdin: {}", e);
                break;
            }
        };

        let mut words = line.split_whitespace();
        let sent = match (words.next(), words.next()) {
            (None, _) => continue,
            (Some("start"), _) => handle.start(resolve_credential(args, settings).await).await,
            (Some("stop"), _) => handle.stop().await,
            (Some("speed"), Some(value)) => match value.parse::<f32>() {
                Ok(speed) => handle.set_speed(speed).await,
                Err(_) => {
                    println!("speed must be a number");
                    continue;
                }
            },
            (Some("clear"), _) => handle.clear_log().await,
            (Some("log"), _) => handle.message_log().await.map(|entries| {
                for entry in entries {
                    println!("{}", entry);
                }
            }),
            (Some("quit") | Some("exit"), _) => break,
            _ => {
                print_help();
                continue;
            }
        };

        if sent.is_err() {
            log::error!("Session loop stopped unexpectedly");
            break;
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present (for development convenience)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let settings = load_settings(&args);
    log::info!(
        "flowchat {} (template {}, speed {:.2}x)",
        env!("CARGO_PKG_VERSION"),
        settings.template_id,
        settings.playback_speed
    );

    let backend = LiveBackend::new(&settings);
    let (handle, session) = spawn_session(
        backend,
        Arc::new(TerminalObserver),
        SessionOptions::from(&settings),
    );

    print_help();
    if handle
        .start(resolve_credential(&args, &settings).await)
        .await
        .is_ok()
    {
        run_commands(&args, &settings, &handle).await;
    }

    let _ = handle.exit().await;
    match session.await {
        Ok(report) => {
            println!("{}", report.metrics);
            println!("{} exchange(s) this run", report.pairs.len());
        }
        Err(e) => log::error!("Session loop panicked: {}", e),
    }
}
