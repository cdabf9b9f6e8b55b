pub mod filter;
pub mod watch;

pub use filter::{FilterBook, NO_FILTER};
pub use watch::{PlaybackState, WatchCommand, WatchParty};
