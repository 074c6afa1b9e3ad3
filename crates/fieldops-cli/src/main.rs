//! FieldOps Console CLI
//!
//! Runs scripted scenarios of fieldops-core against the in-memory platform.
//!
//! ## Usage
//!
//! ```bash
//! # Log in and watch the session bootstrap (two slow profile fetches first)
//! fieldops session --timeouts 2
//!
//! # Log in to an account that has no profile row
//! fieldops session --not-found
//!
//! # Open a topic, send messages (first write rejected), print the result
//! fieldops chat --topic case-42 --fail-first "On my way" "ETA 5 min"
//!
//! # Raise three alerts and acknowledge them in order
//! fieldops alert --count 3 --double-ack
//!
//! # Print the effective configuration
//! fieldops --config fieldops.json config
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fieldops_core::backend::memory::{FetchBehavior, MemoryPlatform, RecordingNavigator};
use fieldops_core::{
    ChatClient, ChatEvent, ConversationView, CoreConfig, CoreError, Credentials, DeliveryState,
    Identity, InterruptChannel, InterruptEvent, InterruptId, Profile, Role, SessionManager,
    TopicId,
};
use tokio::sync::broadcast;

const DEMO_EMAIL: &str = "officer@fieldops.example";
const DEMO_PASSWORD: &str = "correct horse";

/// How long scenarios wait for background tasks to catch up
const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

/// FieldOps Console - scripted client scenarios
#[derive(Parser)]
#[command(name = "fieldops")]
#[command(version = "0.1.0")]
#[command(about = "FieldOps Console - scripted client scenarios")]
#[command(
    long_about = "Runs the console's session, chat and alert logic against an in-memory platform and prints what happens."
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// JSON config file (defaults apply for anything missing)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and print every session state transition
    Session {
        /// Number of profile fetches that hang before one responds
        #[arg(long, default_value_t = 0)]
        timeouts: usize,

        /// Sign in to an account without a profile row
        #[arg(long)]
        not_found: bool,

        /// Latency of the responding profile fetch
        #[arg(long, default_value_t = 100)]
        latency_ms: u64,
    },

    /// Send messages to a topic and print the reconciled conversation
    Chat {
        /// Topic to open
        #[arg(short, long, default_value = "case-1")]
        topic: String,

        /// Reject the first write, then resend it
        #[arg(long)]
        fail_first: bool,

        /// Messages to send
        #[arg(required = true)]
        messages: Vec<String>,
    },

    /// Raise interrupts and acknowledge them in order
    Alert {
        /// Number of interrupts to broadcast
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,

        /// Acknowledge each interrupt twice
        #[arg(long)]
        double_ack: bool,
    },

    /// Print the effective configuration as JSON
    Config,
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<CoreConfig> {
    match path {
        Some(path) => {
            let config = CoreConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            tracing::debug!(path = %path.display(), "Loaded config");
            Ok(config)
        }
        None => Ok(CoreConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Session {
            timeouts,
            not_found,
            latency_ms,
        } => run_session(&config, timeouts, not_found, latency_ms).await?,

        Commands::Chat {
            topic,
            fail_first,
            messages,
        } => run_chat(&config, TopicId::new(topic), fail_first, &messages).await?,

        Commands::Alert { count, double_ack } => run_alert(&config, count, double_ack).await?,

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn run_session(
    config: &CoreConfig,
    timeouts: usize,
    not_found: bool,
    latency_ms: u64,
) -> Result<()> {
    let platform = MemoryPlatform::new();
    let identity = Identity::new("officer-1");
    if not_found {
        platform.add_account_without_profile(DEMO_EMAIL, DEMO_PASSWORD, identity);
    } else {
        platform.add_account(
            DEMO_EMAIL,
            DEMO_PASSWORD,
            Profile::new(identity, Role::Officer, "Field Officer").verified(),
        );
    }

    let mut script = vec![FetchBehavior::Hang; timeouts];
    script.push(FetchBehavior::Respond {
        latency: Duration::from_millis(latency_ms),
    });
    platform.script_profile_fetches(script);

    let session = SessionManager::new(
        Arc::new(platform.clone()),
        Arc::new(platform.clone()),
        config.session.clone(),
    );
    let mut transitions = session.subscribe_transitions();
    session.initialize()?;

    println!("Signing in as {}", DEMO_EMAIL);
    session
        .login(&Credentials::new(DEMO_EMAIL, DEMO_PASSWORD))
        .await?;

    let final_state = session
        .subscribe()
        .wait_for(|s| s.is_authenticated() || s.is_failed())
        .await?
        .clone();

    println!();
    println!("Transitions:");
    while let Ok(state) = transitions.try_recv() {
        println!("  -> {}", state);
    }
    println!();
    println!("Final: {}", final_state);
    if let Some(profile) = final_state.profile() {
        println!("Role: {}", profile.role);
        println!("Profile fetches: {}", platform.profile_fetch_calls());
    }

    session.logout().await;
    println!("After logout: {}", session.state());
    session.shutdown();
    Ok(())
}

async fn run_chat(
    config: &CoreConfig,
    topic: TopicId,
    fail_first: bool,
    messages: &[String],
) -> Result<()> {
    let platform = MemoryPlatform::new();
    let me = Identity::new("officer-1");
    let dispatch = Identity::new("dispatch");

    platform.inject_message(&topic, &dispatch, "Dispatch online");

    let chat = ChatClient::new(
        me.clone(),
        Arc::new(platform.clone()),
        Arc::new(platform.clone()),
        config.chat.clone(),
    );
    let mut events = chat.subscribe();
    let view = chat.open(topic.clone()).await?;
    println!("Opened {} ({} in history)", topic, view.len());
    println!();

    if fail_first {
        platform.fail_next_writes(1);
    }

    for body in messages {
        match chat.send(body.as_str()).await {
            Ok(sent) => print_sent("sent", &sent),
            Err(CoreError::SendFailure {
                local_id, reason, ..
            }) => {
                println!("  failed  {} ({})", local_id, reason);
                let resent = chat.retry_send(local_id).await?;
                print_sent("resent", &resent);
            }
            Err(e) => return Err(e.into()),
        }
    }

    let reply = platform.inject_message(&topic, &dispatch, "Copy that");
    platform.redeliver(&reply);
    wait_for_len(&view, &mut events, messages.len() + 2).await;

    println!();
    println!("Conversation {}:", topic);
    for message in view.messages() {
        let sender = if message.is_from(&me) {
            "You".to_string()
        } else {
            message.sender_id.to_string()
        };
        let marker = match message.delivery {
            DeliveryState::Confirmed => String::new(),
            other => format!(" ({})", other),
        };
        println!("  [{}] {}{}", sender, message.body, marker);
    }
    println!();
    println!("Messages: {}", view.len());
    println!("Unread: {}", chat.unread_count());

    chat.mark_read();
    println!("Unread after mark_read: {}", chat.unread_count());

    chat.close();
    Ok(())
}

fn print_sent(label: &str, message: &fieldops_core::Message) {
    let id = message
        .id
        .as_ref()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!("  {:<7} {} -> {}", label, message.body, id);
}

/// Wait until the pump has applied enough rows, or give up after the settle timeout.
async fn wait_for_len(
    view: &ConversationView,
    events: &mut broadcast::Receiver<ChatEvent>,
    expected: usize,
) {
    let deadline = tokio::time::Instant::now() + SETTLE_TIMEOUT;
    while view.len() < expected {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => break,
        }
    }
}

async fn run_alert(config: &CoreConfig, count: usize, double_ack: bool) -> Result<()> {
    let platform = MemoryPlatform::new();
    let navigator = RecordingNavigator::new();
    let channel = InterruptChannel::start(
        Arc::new(platform.clone()),
        Arc::new(navigator.clone()),
        config.interrupts.clone(),
    )?;

    if count == 0 {
        println!("No interrupts raised");
        channel.shutdown();
        return Ok(());
    }

    for n in 1..=count {
        platform.broadcast_interrupt(InterruptEvent::new(
            InterruptId::new(format!("alert-{}", n)),
            "emergency_alert",
            serde_json::json!({ "title": format!("Alert {}", n) }),
        ));
    }

    // Wait for the pump to take in every broadcast
    let deadline = tokio::time::Instant::now() + SETTLE_TIMEOUT;
    while channel.queued().len() + 1 < count || !channel.is_blocking() {
        if tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    if let Some(active) = channel.active() {
        println!("Active: {}", active.headline());
    }
    println!("Queued: {}", channel.queued().len());
    println!();

    while let Some(active) = channel.active() {
        let acknowledged = channel.acknowledge(&active.id);
        println!("  acknowledge {} -> {}", active.id, acknowledged);
        if double_ack {
            let again = channel.acknowledge(&active.id);
            println!("  acknowledge {} -> {}", active.id, again);
        }
    }

    println!();
    println!("Blocking: {}", channel.is_blocking());
    println!("Navigations: {}", navigator.count());

    channel.shutdown();
    Ok(())
}
