use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use dechat_core::{ChatError, ConversationSession};
use dechat_pod::{PodConfig, SolidIdentity, SolidPod};
use dechat_types::models::{Message, Profile, WebId};
use dechat_types::snapshot::{LogSnapshot, LogStatus};

#[derive(Parser)]
#[command(name = "dechat")]
#[command(about = "Two-party chat stored in Solid pods")]
struct Cli {
    /// WebId to act as; overrides DECHAT_WEB_ID
    #[arg(long, global = true)]
    web_id: Option<String>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the signed-in profile
    Whoami,

    /// List friends
    Friends,

    /// Print the conversation with a peer
    Show { peer: String },

    /// Send a message to a peer
    Send {
        peer: String,
        /// Message text; several words are joined with spaces
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Follow a conversation until interrupted
    Watch { peer: String },

    /// Add a peer to the friend list
    AddPeer { peer: String },

    /// Remove a peer and delete our side of the conversation with them
    RemovePeer { peer: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dechat=info,dechat_core=info,dechat_pod=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Config
    let config = PodConfig::from_lookup(|name| match name {
        "DECHAT_WEB_ID" => cli.web_id.clone().or_else(|| std::env::var(name).ok()),
        _ => std::env::var(name).ok(),
    })?;
    info!("Acting as {}", config.web_id);

    let pod = SolidPod::new(&config)?;
    let identity = SolidIdentity::new(pod.clone(), Some(config.web_id.clone()));
    let session = ConversationSession::new(Arc::new(pod), Arc::new(identity));
    let out = Output { json: cli.json };

    match cli.command {
        Commands::Whoami => {
            let profile = session.load_profile().await?;
            out.profiles(std::slice::from_ref(&profile));
        }
        Commands::Friends => {
            let friends = session.load_friends().await?;
            out.profiles(&friends);
        }
        Commands::Show { peer } => {
            open(&session, &WebId::new(peer)).await?;
            out.log(&session.snapshot());
        }
        Commands::Send { peer, text } => {
            // the sender's display name falls back to the WebId without it
            if let Err(e) = session.load_profile().await {
                warn!("Could not load profile: {}", e);
            }
            open(&session, &WebId::new(peer)).await?;
            let resource = session
                .send(&text.join(" "))
                .await
                .context("sending message")?;
            if let Some(resource) = resource {
                info!("Sent {}", resource);
            }
            out.log(&session.snapshot());
        }
        Commands::Watch { peer } => {
            watch(&session, &WebId::new(peer), config.poll_interval, &out).await?;
        }
        Commands::AddPeer { peer } => {
            session.add_peer(&WebId::new(peer)).await?;
            out.profiles(&session.friends());
        }
        Commands::RemovePeer { peer } => {
            session.remove_peer(&WebId::new(peer)).await?;
            out.profiles(&session.friends());
        }
    }

    Ok(())
}

/// Switch to `peer`; waiting for the peer is reported, not fatal.
async fn open(session: &ConversationSession, peer: &WebId) -> Result<()> {
    match session.switch_to(peer).await {
        Ok(count) => {
            info!("{} messages with {}", count, peer);
            Ok(())
        }
        Err(e) if e.is_recoverable() => {
            warn!("{}", e);
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("opening conversation with {}", peer)),
    }
}

async fn watch(
    session: &ConversationSession,
    peer: &WebId,
    every: std::time::Duration,
    out: &Output,
) -> Result<()> {
    open(session, peer).await?;

    let mut seen = HashSet::new();
    out.new_messages(&session.snapshot(), &mut seen);

    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping");
                return Ok(());
            }
            _ = interval.tick() => {
                match session.refresh().await {
                    Ok(_) | Err(ChatError::PeerNotReady) => {}
                    Err(e) => warn!("Refresh failed: {}", e),
                }
                out.new_messages(&session.snapshot(), &mut seen);
            }
        }
    }
}

// -- Output --

struct Output {
    json: bool,
}

impl Output {
    fn print<T: Serialize>(&self, value: &T, text: impl FnOnce() -> String) {
        if self.json {
            match serde_json::to_string(value) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!("Could not encode output: {}", e),
            }
        } else {
            println!("{}", text());
        }
    }

    fn profiles(&self, profiles: &[Profile]) {
        for profile in profiles {
            self.print(profile, || format!("{}  <{}>", profile.name, profile.web_id));
        }
    }

    fn message(&self, message: &Message) {
        self.print(message, || {
            format!(
                "[{}] {}: {}",
                message.sent_at.format("%Y-%m-%d %H:%M:%S"),
                message.sender_name,
                message.text
            )
        });
    }

    fn log(&self, snapshot: &LogSnapshot) {
        match &snapshot.status {
            LogStatus::WaitingForPeer => {
                self.print(&snapshot.status, || "(waiting for the other party)".to_string())
            }
            LogStatus::Failed(reason) => {
                self.print(&snapshot.status, || format!("(failed: {})", reason))
            }
            _ => {
                for message in snapshot.messages.iter() {
                    self.message(message);
                }
            }
        }
    }

    /// Print messages not printed before, keyed by their resource.
    fn new_messages(&self, snapshot: &LogSnapshot, seen: &mut HashSet<String>) {
        for message in snapshot.messages.iter() {
            if let Some(resource) = &message.resource {
                if seen.insert(resource.clone()) {
                    self.message(message);
                }
            }
        }
    }
}
