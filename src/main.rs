mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use webrtc_rooms::client::{RoomClient, RoomEvent};
use webrtc_rooms::config::{ClientConfig, ServerConfig};
use webrtc_rooms::media::PlaceholderSource;
use webrtc_rooms::peer::WebRtcFactory;
use webrtc_rooms::server::{self, Hub};
use webrtc_rooms::signaling::SignalingClient;

use crate::cli::{parse_command, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    webrtc_rooms::logging::init(&cli.log_config())?;

    match cli.command {
        Commands::Serve(args) => run_server(args.into()).await,
        Commands::Join(args) => run_participant(args.into()).await,
    }
}

async fn run_server(config: ServerConfig) -> Result<()> {
    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    let hub = Arc::new(Hub::new(&config));
    info!(max_participants = config.max_participants, "starting signaling relay");
    server::serve(listener, hub).await?;
    Ok(())
}

async fn run_participant(config: ClientConfig) -> Result<()> {
    let signaling = SignalingClient::connect(&config.url)
        .await
        .with_context(|| format!("failed to connect to {}", config.url))?;
    let factory = Arc::new(WebRtcFactory::new(config.ice_servers.clone()));
    let (mut client, mut events) = RoomClient::new(
        config,
        signaling,
        factory,
        Arc::new(PlaceholderSource::default()),
    );

    client.open_local_media().await?;
    let as_host = client.join().await?;
    println!("joined{}", if as_host { " as host" } else { "" });

    let (commands_tx, commands) = mpsc::channel(32);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match parse_command(&line) {
                Some(command) => {
                    if commands_tx.send(command).await.is_err() {
                        break;
                    }
                }
                None => warn!(%line, "unknown command"),
            }
        }
    });

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                RoomEvent::JoinRequested { conn_id, name } => {
                    println!("{name} wants to join (approve {conn_id} / deny {conn_id})");
                }
                RoomEvent::Chat { name, text, .. } => println!("<{name}> {text}"),
                RoomEvent::Typing { name, typing: true, .. } => println!("{name} is typing..."),
                RoomEvent::Typing { .. } => {}
                RoomEvent::Kicked => println!("removed from the room by the host"),
                other => println!("{other:?}"),
            }
        }
    });

    if let Err(e) = client.run(commands).await {
        error!(error = %e, "participant stopped");
        return Err(e.into());
    }
    Ok(())
}
