//! Thin entrypoint: one prompt in, text (or NDJSON) out.
//!
//! Exit codes: 0 success, 1 CLI missing or unusable, 2 the CLI reported an
//! error result, 3 timeout, 4 interrupted, 5 protocol error.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use claude_session::message::{Message, PermissionMode};
use claude_session::options::{QueryOverrides, SessionOptions};
use claude_session::{Session, SessionError};

#[derive(Parser)]
#[command(
    name = "claude-session",
    about = "Drive one prompt through the Claude CLI stream-json protocol",
    version
)]
struct Cli {
    /// The prompt to send.
    prompt: String,

    /// Path to the CLI binary (default: `claude` on $PATH).
    #[arg(long, env = "CLAUDE_CLI_PATH")]
    binary: Option<PathBuf>,

    /// Model name passed through as `--model`.
    #[arg(long)]
    model: Option<String>,

    /// System prompt override.
    #[arg(long)]
    system_prompt: Option<String>,

    /// Comma-separated tool names to auto-approve.
    #[arg(long, value_delimiter = ',')]
    allowed_tools: Vec<String>,

    /// Additional directory the CLI may touch (repeatable).
    #[arg(long = "add-dir")]
    add_dirs: Vec<PathBuf>,

    /// Permission mode (default, acceptEdits, bypassPermissions, plan, ...).
    #[arg(long)]
    permission_mode: Option<String>,

    /// Per-query timeout in seconds.
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,

    /// Print every protocol message as NDJSON instead of just the final text.
    #[arg(long)]
    stream: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let binary = match &cli.binary {
        Some(path) => path.clone(),
        None => match which::which("claude") {
            Ok(path) => path,
            Err(e) => {
                eprintln!("claude-session: claude binary not found: {e}");
                return ExitCode::from(1);
            }
        },
    };

    let options = SessionOptions {
        binary,
        model: cli.model.clone(),
        system_prompt: cli.system_prompt.clone(),
        allowed_tools: cli.allowed_tools.clone(),
        add_dirs: cli.add_dirs.clone(),
        permission_mode: cli
            .permission_mode
            .as_deref()
            .map(PermissionMode::parse)
            .unwrap_or_default(),
        timeout: Duration::from_secs(cli.timeout_secs),
        ..Default::default()
    };

    let session = match Session::open(options) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("claude-session: {e}");
            return ExitCode::from(1);
        }
    };

    let outcome = tokio::select! {
        outcome = run_query(&session, &cli) => outcome,
        _ = tokio::signal::ctrl_c() => {
            let _ = session.interrupt().await;
            eprintln!("claude-session: interrupted");
            Err(SessionError::Interrupted)
        }
    };
    let _ = session.stop().await;

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("claude-session: {e}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

async fn run_query(session: &Session, cli: &Cli) -> Result<(), SessionError> {
    if cli.stream {
        let mut stream = session
            .stream(cli.prompt.as_str(), QueryOverrides::default())
            .await?;
        let mut failed = false;
        while let Some(item) = stream.next().await {
            let message = item?;
            println!("{}", message.to_json_line());
            if let Message::Result(result) = &message {
                failed = result.is_error;
            }
        }
        if failed {
            return Err(SessionError::Claude {
                subtype: "result".into(),
                message: "the CLI reported an error result".into(),
                details: None,
            });
        }
        Ok(())
    } else {
        let text = session
            .send(cli.prompt.as_str(), QueryOverrides::default())
            .await?;
        println!("{text}");
        Ok(())
    }
}

fn exit_code_for(error: &SessionError) -> u8 {
    match error {
        SessionError::CliNotFound(_)
        | SessionError::InvalidBinary(_)
        | SessionError::ProvisioningFailed(_)
        | SessionError::InvalidOption(_) => 1,
        SessionError::Claude { .. } => 2,
        SessionError::Timeout => 3,
        SessionError::Interrupted => 4,
        // Undecodable lines, oversized lines, unexpected subprocess death.
        _ => 5,
    }
}
