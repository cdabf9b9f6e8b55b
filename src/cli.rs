use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use webrtc_rooms::client::RoomCommand;
use webrtc_rooms::config::{
    default_ice_servers, generate_session_id, merge_ice_servers, ClientConfig, IceServer, LogConfig,
    LogFormat, ServerConfig, DEFAULT_NEGOTIATION_TIMEOUT,
};
use webrtc_rooms::room::JoinIntent;
use webrtc_rooms::sync::WatchCommand;

#[derive(Parser, Debug)]
#[command(name = "webrtc-rooms")]
#[command(about = "Room signaling relay and headless room participant")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[arg(long, global = true, value_enum, default_value = "pretty")]
    pub log_format: LogFormatArg,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

impl Cli {
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level.clone(),
            format: match self.log_format {
                LogFormatArg::Pretty => LogFormat::Pretty,
                LogFormatArg::Json => LogFormat::Json,
            },
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the signaling relay
    Serve(ServeArgs),
    /// Join a room and read commands from stdin
    Join(JoinArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[arg(long, env = "ROOMS_BIND", default_value = "0.0.0.0:8080")]
    pub bind: String,

    /// Live connections allowed per room
    #[arg(long, env = "ROOMS_MAX_PARTICIPANTS", default_value_t = 10)]
    pub max_participants: usize,
}

impl From<ServeArgs> for ServerConfig {
    fn from(args: ServeArgs) -> Self {
        ServerConfig {
            bind: args.bind,
            max_participants: args.max_participants,
        }
    }
}

#[derive(Args, Debug)]
pub struct JoinArgs {
    /// Relay URL (e.g., ws://localhost:8080)
    #[arg(short, long, default_value = "ws://127.0.0.1:8080")]
    pub url: String,

    #[arg(short, long)]
    pub room: String,

    #[arg(short, long)]
    pub name: String,

    /// Session token; reuse it to replace a previous connection
    #[arg(long)]
    pub session: Option<String>,

    /// Open the room instead of joining an existing one
    #[arg(long, conflicts_with = "existing")]
    pub create: bool,

    /// Fail with room-inactive if nobody is in the room
    #[arg(long)]
    pub existing: bool,

    #[arg(long, default_value_t = 15)]
    pub admission_timeout_secs: u64,

    /// STUN server URL; replaces the public defaults (repeatable)
    #[arg(long = "ice-server")]
    pub ice_servers: Vec<String>,

    /// TURN server URL, added after the STUN servers (repeatable)
    #[arg(long = "turn-url", env = "ROOMS_TURN_URL", value_delimiter = ',')]
    pub turn_urls: Vec<String>,

    #[arg(long, env = "ROOMS_TURN_USERNAME", requires = "turn_urls")]
    pub turn_username: Option<String>,

    #[arg(long, env = "ROOMS_TURN_CREDENTIAL", requires = "turn_urls")]
    pub turn_credential: Option<String>,
}

impl JoinArgs {
    fn ice_servers(&self) -> Vec<IceServer> {
        let stun = if self.ice_servers.is_empty() {
            default_ice_servers()
        } else {
            self.ice_servers.iter().cloned().map(IceServer::stun).collect()
        };
        let turn = if self.turn_urls.is_empty() {
            Vec::new()
        } else {
            vec![IceServer {
                urls: self.turn_urls.clone(),
                username: self.turn_username.clone(),
                credential: self.turn_credential.clone(),
            }]
        };
        merge_ice_servers(stun, turn)
    }
}

impl From<JoinArgs> for ClientConfig {
    fn from(args: JoinArgs) -> Self {
        let intent = if args.create {
            Some(JoinIntent::Create)
        } else if args.existing {
            Some(JoinIntent::Join)
        } else {
            None
        };
        let ice_servers = args.ice_servers();
        ClientConfig {
            url: args.url,
            room: args.room.into(),
            name: args.name,
            session_id: args.session.map(Into::into).unwrap_or_else(generate_session_id),
            intent,
            admission_timeout: Duration::from_secs(args.admission_timeout_secs),
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
            ice_servers,
        }
    }
}

/// Parses one stdin line of the interactive participant.
pub fn parse_command(line: &str) -> Option<RoomCommand> {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let arg = || (!rest.is_empty()).then(|| rest.to_string());

    let command = match word {
        "approve" => RoomCommand::Approve(arg()?.into()),
        "deny" => RoomCommand::Deny(arg()?.into()),
        "kick" => RoomCommand::Kick(arg()?.into()),
        "play" => RoomCommand::Watch(WatchCommand::Play),
        "pause" => RoomCommand::Watch(WatchCommand::Pause),
        "seek" => RoomCommand::Watch(WatchCommand::Seek {
            time: rest.parse().ok()?,
        }),
        "url" => RoomCommand::WatchUrl(rest.to_string()),
        "filter" => RoomCommand::Filter(arg()?),
        "flip" => RoomCommand::FlipCamera,
        "share" => RoomCommand::StartScreenShare,
        "unshare" => RoomCommand::StopScreenShare,
        "mute" => RoomCommand::SetAudio(false),
        "unmute" => RoomCommand::SetAudio(true),
        "video" => match rest {
            "on" => RoomCommand::SetVideo(true),
            "off" => RoomCommand::SetVideo(false),
            _ => return None,
        },
        "typing" => match rest {
            "on" => RoomCommand::Typing(true),
            "off" => RoomCommand::Typing(false),
            _ => return None,
        },
        "chat" => RoomCommand::Chat(arg()?),
        "browse" => RoomCommand::BrowserUrl(arg()?),
        "leave" | "quit" => RoomCommand::Leave,
        _ => return None,
    };
    Some(command)
}
