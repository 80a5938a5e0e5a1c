//! Live Receiver Client Library
//!
//! Joins a live stream channel as a receiver: announces attendance to the
//! channel's sender, keeps it fresh with a heartbeat, and delivers the
//! sender's broadcast and unicast control messages.
//!
//! # Example
//!
//! ```ignore
//! use live_client::{SessionBuilder, SessionEvent};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = SessionBuilder::new("10.0.0.2:8883", "room1")
//!         .credentials("app", "secret")
//!         .name("Alice")
//!         .build()?;
//!
//!     let mut events = session.events();
//!     session.start().await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         if let SessionEvent::Message(msg) = event {
//!             println!("{} {}", msg.scope, msg.payload);
//!         }
//!     }
//!
//!     session.stop().await;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod events;
pub mod preauth;
pub mod session;
pub mod state;

mod heartbeat;
mod publisher;

pub use builder::SessionBuilder;
pub use config::SessionConfig;
pub use error::{ClientError, ConnectionError, Result};
pub use events::{DisconnectReason, LogCallback, LogLevel, SessionEvent};
pub use preauth::preauth;
pub use session::Session;
pub use state::ConnectionState;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::builder::SessionBuilder;
    pub use crate::error::{ClientError, ConnectionError, Result};
    pub use crate::events::{DisconnectReason, SessionEvent};
    pub use crate::session::Session;
    pub use crate::state::ConnectionState;
    pub use live_core::{InboundMessage, Participant, Scope, Topics};
}
