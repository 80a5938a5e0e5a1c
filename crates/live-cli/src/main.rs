//! Live Receiver CLI - join a live stream control channel from the command line
//!
//! Announces attendance on a channel, prints every control message the
//! sender publishes, and can check the broker or send a one-off message.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use live_client::{
    ClientError, ConnectionError, Session, SessionBuilder, SessionConfig, SessionEvent,
};
use live_transport::MqttTransport;
use std::path::{Path, PathBuf};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Live stream receiver
#[derive(Parser)]
#[command(name = "live-receiver")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(flatten)]
    session: SessionArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Session options; each overrides the configuration file
#[derive(Args, Default)]
struct SessionArgs {
    /// Broker host[:port]
    #[arg(short, long, global = true, env = "LIVE_SERVER")]
    server: Option<String>,

    /// Channel to join
    #[arg(long, global = true, env = "LIVE_CHANNEL")]
    channel: Option<String>,

    /// Broker username
    #[arg(long, global = true, env = "LIVE_USERNAME")]
    username: Option<String>,

    /// Broker password
    #[arg(long, global = true, env = "LIVE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Client identity (generated when absent)
    #[arg(long, global = true, env = "LIVE_CLIENT")]
    client: Option<String>,

    /// Display name announced with attendance
    #[arg(long, global = true)]
    name: Option<String>,

    /// Display image announced with attendance
    #[arg(long, global = true)]
    image: Option<String>,

    /// Heartbeat interval in milliseconds
    #[arg(long, global = true)]
    interval: Option<u64>,
}

impl SessionArgs {
    fn apply(self, config: &mut SessionConfig) {
        if let Some(server) = self.server {
            config.server = server;
        }
        if let Some(channel) = self.channel {
            config.channel = channel;
        }
        if let Some(username) = self.username {
            config.username = username;
        }
        if let Some(password) = self.password {
            config.password = password;
        }
        if let Some(client) = self.client {
            config.client = Some(client);
        }
        if let Some(name) = self.name {
            config.name = name;
        }
        if let Some(image) = self.image {
            config.image = image;
        }
        if let Some(interval) = self.interval {
            config.interval = interval;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Join the channel and print events until Ctrl+C
    Join {
        /// Check the broker before starting
        #[arg(long)]
        preauth: bool,
    },

    /// Check that the broker is reachable and accepts the credentials
    Preauth,

    /// Join, send one JSON message on the sender topic, and leave
    Send {
        /// Message (JSON format)
        message: String,
    },

    /// Show version, topics and client identity
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(&cli.log_level, cli.json_logs)?;

    let mut config = load_config(cli.config.as_deref())?;
    cli.session.apply(&mut config);

    // Handle Ctrl+C
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(()).await;
        }
    });

    match cli.command {
        Commands::Join { preauth } => {
            let session = build_session(&config)?;
            if preauth {
                run_preauth(&session).await?;
            }
            run_join(&session, &mut shutdown_rx).await?;
        }

        Commands::Preauth => {
            let session = build_session(&config)?;
            run_preauth(&session).await?;
        }

        Commands::Send { message } => {
            let message: serde_json::Value =
                serde_json::from_str(&message).context("Message is not valid JSON")?;
            let session = build_session(&config)?;
            run_send(&session, &message).await?;
        }

        Commands::Info => {
            print_info(&config)?;
        }
    }

    Ok(())
}

fn setup_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to parse log level")?;

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).compact())
            .init();
    }

    Ok(())
}

/// Load the configuration file, or defaults when none is given
fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    let Some(path) = path else {
        return Ok(SessionConfig::default());
    };

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("Failed to parse config {}", path.display()))
}

fn build_session(config: &SessionConfig) -> Result<Session<MqttTransport>> {
    config.validate().context("Invalid configuration")?;
    SessionBuilder::from_config(config)
        .build()
        .context("Failed to create session")
}

async fn run_preauth(session: &Session<MqttTransport>) -> Result<()> {
    println!(
        "{} Probing {}",
        "LIVE".cyan().bold(),
        session.broker()
    );

    match session.preauth().await {
        Ok(()) => {
            println!("{} Broker accepted the connection", "OK".green().bold());
            Ok(())
        }
        Err(ClientError::Connection(ConnectionError::DnsNotFound { host })) => {
            bail!("host {} could not be resolved", host)
        }
        Err(ClientError::Connection(ConnectionError::ConnectionRefused { address, port })) => {
            bail!("connection refused by {}:{}", address, port)
        }
        Err(e) => Err(e).context("Preauthentication failed"),
    }
}

async fn run_join(
    session: &Session<MqttTransport>,
    shutdown_rx: &mut mpsc::Receiver<()>,
) -> Result<()> {
    let mut events = session.events();
    session.start().await.context("Failed to join channel")?;

    println!(
        "{} Joined {} as {}",
        "LIVE".cyan().bold(),
        session.channel().green(),
        session.client_id()
    );

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => warn!("Missed {} events", n),
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown_rx.recv() => break,
        }
    }

    session.stop().await;
    println!("{}", "Session stopped".yellow());

    Ok(())
}

async fn run_send(session: &Session<MqttTransport>, message: &serde_json::Value) -> Result<()> {
    session.start().await.context("Failed to join channel")?;
    let result = session.send(message).await;
    session.stop().await;

    result.context("Send failed")?;
    println!(
        "{} Sent to {}",
        "OK".green().bold(),
        session.topics().sender()
    );

    Ok(())
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::Message(message) => {
            println!("{} [{}] {}", "MSG".cyan(), message.scope, message.payload)
        }
        SessionEvent::Reconnect => println!("{}", "reconnecting".yellow()),
        SessionEvent::Disconnect { reason } => {
            println!("{} ({})", "disconnected".yellow(), reason.as_str())
        }
        SessionEvent::Error(detail) => println!("{} {}", "error".red(), detail),
        SessionEvent::SendError(detail) => println!("{} {}", event.name().red(), detail),
        SessionEvent::Sent(text) | SessionEvent::SendSuccess(text) => {
            println!("{} {}", event.name().dimmed(), text)
        }
    }
}

fn print_info(config: &SessionConfig) -> Result<()> {
    println!("{}", "Live Receiver".cyan().bold());
    println!();
    println!("Version:    {}", env!("CARGO_PKG_VERSION"));
    println!("Platform:   {}", std::env::consts::OS);
    println!("Arch:       {}", std::env::consts::ARCH);

    if config.server.is_empty() || config.channel.is_empty() {
        println!();
        println!("Set --server and --channel to show the session topics.");
        return Ok(());
    }

    let session = build_session(config)?;
    println!();
    println!("{}", "Session:".green());
    println!("  Broker:     {}", session.broker());
    println!("  Client:     {}", session.client_id());
    println!("  Sender:     {}", session.topics().sender());
    println!("  Broadcast:  {}", session.topics().broadcast());
    println!("  Unicast:    {}", session.topics().unicast());

    Ok(())
}
