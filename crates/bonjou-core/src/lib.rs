//! bonjou-core — configuration and wire format shared by the Bonjou crates.
//! Nothing in here touches a socket.

pub mod config;
pub mod wire;

pub use config::BonjouConfig;
pub use wire::Announcement;
