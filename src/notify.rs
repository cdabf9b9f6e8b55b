use tracing::info;

use crate::room::state::RoomId;

/// Outbound notifications about room activity. Calls are fire-and-forget:
/// implementations must not block and the hub ignores whatever they do.
pub trait Notifier: Send + Sync {
    fn room_created(&self, room: &RoomId, host_name: &str);
    fn member_joined(&self, room: &RoomId, name: &str);
}

/// Writes notifications to the log and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn room_created(&self, room: &RoomId, host_name: &str) {
        info!(room = %room, host = host_name, "room created");
    }

    fn member_joined(&self, room: &RoomId, name: &str) {
        info!(room = %room, member = name, "member joined");
    }
}
