pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod media;
pub mod notify;
pub mod peer;
pub mod relay;
pub mod room;
pub mod server;
pub mod signaling;
pub mod sync;

pub use error::{Error, Result};
