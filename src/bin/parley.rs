//! parley - interactive chat client
//!
//! Runs one conversation against the configured models. Lines typed on
//! stdin are sent as messages; `/reset`, `/history` and `/quit` control the
//! conversation.

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use futures_util::StreamExt;
use parley::{ChatService, Config, ReplyEvent, Secrets};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Parley chat client
#[derive(Parser)]
#[command(name = "parley")]
#[command(version = parley::PKG_VERSION)]
#[command(about = "Chat with LLM providers through parley")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Model id (default: first registered model)
    #[arg(short, long, default_value = "")]
    model: String,

    /// Conversation id
    #[arg(long, default_value_t = 1)]
    conversation: i64,

    /// System prompt (default: the model's own prompt)
    #[arg(long)]
    system: Option<String>,

    /// User id passed to plugins
    #[arg(long)]
    user: Option<i64>,

    /// Print replies as they arrive
    #[arg(short, long)]
    stream: bool,

    /// List registered models and exit
    #[arg(long)]
    list_models: bool,

    /// Send one message and exit instead of reading stdin
    message: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;

    if args.list_models {
        for model in config.model_registry()?.models() {
            let fallback = model
                .fallback
                .as_deref()
                .map(|f| format!(" -> {f}"))
                .unwrap_or_default();
            println!(
                "{} ({} by {}, {}){fallback}",
                model.id,
                model.display_name,
                model.vendor,
                model.backend.provider()
            );
        }
        return Ok(());
    }

    let service = ChatService::builder()
        .config(&config)?
        .secrets(Secrets::load()?)
        .build()?;
    let chain = service.create_or_get_chain(
        args.conversation,
        &args.model,
        args.system.as_deref(),
        args.user,
    )?;
    eprintln!(
        "parley {} - conversation {} on {}",
        parley::version_string(),
        args.conversation,
        chain.current_model().await
    );

    if let Some(message) = args.message {
        send(&service, args.conversation, &message, args.stream).await;
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => {}
            "/quit" | "/exit" => break,
            "/reset" => {
                service.reset_chain(args.conversation).await?;
                eprintln!("memory cleared");
            }
            "/history" => {
                for message in service.history(args.conversation).await? {
                    println!("{}: {}", serde_json::to_string(&message.role)?, message.content);
                }
            }
            message => send(&service, args.conversation, message, args.stream).await,
        }
        prompt();
    }
    Ok(())
}

fn prompt() {
    eprint!("> ");
    let _ = std::io::stderr().flush();
}

/// Send one message and print the reply. Failures are reported, not fatal.
async fn send(service: &ChatService, conversation: i64, message: &str, stream: bool) {
    if !stream {
        match service.generate(conversation, message).await {
            Ok(reply) => println!("{reply}"),
            Err(e) => eprintln!("error: {e}"),
        }
        return;
    }

    let mut events = match service.stream(conversation, message).await {
        Ok(events) => events,
        Err(e) => {
            eprintln!("error: {e}");
            return;
        }
    };
    let mut stdout = std::io::stdout();
    while let Some(event) = events.next().await {
        match event {
            Ok(ReplyEvent::Delta(text)) => {
                print!("{text}");
                let _ = stdout.flush();
            }
            Ok(ReplyEvent::Restart {
                from_model,
                to_model,
            }) => {
                eprintln!("\n[{from_model} failed, restarting on {to_model}]");
            }
            Ok(ReplyEvent::Done { .. }) => println!(),
            Err(e) => {
                println!();
                eprintln!("error: {e}");
            }
        }
    }
}
