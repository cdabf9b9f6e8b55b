use serde::{Deserialize, Serialize};

/// Seeks closer than this to one we just applied are treated as its echo.
const SEEK_TOLERANCE_SECS: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WatchCommand {
    Play,
    Pause,
    Seek { time: f64 },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlaybackState {
    /// Active media URL; empty when no watch party is running.
    pub url: String,
    pub playing: bool,
    pub position: f64,
}

/// Local replica of the room's watch-party transport. Remote commands are
/// applied only when they change something, and the player's own change hook
/// is filtered through [`WatchParty::local_change`] so applying a remote
/// command never bounces it back to the room.
#[derive(Debug, Default)]
pub struct WatchParty {
    state: PlaybackState,
    applied_seek: Option<f64>,
}

impl WatchParty {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        !self.state.url.is_empty()
    }

    /// Applies a command from another member. Returns true if the local
    /// player needs to be driven.
    pub fn apply_remote(&mut self, command: WatchCommand) -> bool {
        match command {
            WatchCommand::Play if self.state.playing => false,
            WatchCommand::Pause if !self.state.playing => false,
            WatchCommand::Play => {
                self.state.playing = true;
                true
            }
            WatchCommand::Pause => {
                self.state.playing = false;
                true
            }
            WatchCommand::Seek { time } => {
                self.state.position = time;
                self.state.playing = true;
                self.applied_seek = Some(time);
                true
            }
        }
    }

    /// Feeds a state change reported by the local player. Returns the command
    /// to broadcast, or `None` if the change only echoes what is already known.
    pub fn local_change(&mut self, command: WatchCommand) -> Option<WatchCommand> {
        match command {
            WatchCommand::Play if self.state.playing => None,
            WatchCommand::Pause if !self.state.playing => None,
            WatchCommand::Play => {
                self.state.playing = true;
                Some(command)
            }
            WatchCommand::Pause => {
                self.state.playing = false;
                Some(command)
            }
            WatchCommand::Seek { time } => {
                if let Some(applied) = self.applied_seek.take() {
                    if (applied - time).abs() <= SEEK_TOLERANCE_SECS {
                        return None;
                    }
                }
                self.state.position = time;
                self.state.playing = true;
                Some(command)
            }
        }
    }

    /// Local user picked a new URL. Returns it if it should be broadcast.
    pub fn set_url(&mut self, url: String) -> Option<String> {
        if self.apply_remote_url(url) {
            Some(self.state.url.clone())
        } else {
            None
        }
    }

    /// Switching media resets the transport.
    pub fn apply_remote_url(&mut self, url: String) -> bool {
        if self.state.url == url {
            return false;
        }
        self.state = PlaybackState {
            url,
            playing: false,
            position: 0.0,
        };
        self.applied_seek = None;
        true
    }
}
