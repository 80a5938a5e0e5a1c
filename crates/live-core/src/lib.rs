//! Live Core
//!
//! Protocol primitives shared by the live receiver crates.
//!
//! This crate provides:
//! - Topic addressing and inbound classification ([`Topics`], [`TopicClass`])
//! - The attendance envelope ([`AttendanceEvent`], [`Envelope`])
//! - Inbound message decoding ([`InboundMessage`], [`Scope`])
//!
//! Everything here is pure: no I/O, no clocks, no async.

pub mod attendance;
pub mod error;
pub mod inbound;
pub mod topic;

pub use attendance::{AttendanceData, AttendanceEvent, Envelope, Participant};
pub use error::{Error, Result};
pub use inbound::InboundMessage;
pub use topic::{broadcast_topic, classify, sender_topic, unicast_topic, Scope, TopicClass, Topics};

/// Value of the `id` field in every envelope published by a receiver
pub const SENDER_ID: &str = "live-sender";

/// Value of the `event` field in attendance envelopes
pub const ATTENDANCE_EVENT: &str = "attendance";

/// First segment of every stream topic
pub const TOPIC_ROOT: &str = "stream";

/// Default attendance refresh period (10 minutes)
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 600_000;

/// Upper bound for a single connect attempt
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 20_000;

/// Fixed delay between automatic reconnect attempts
pub const DEFAULT_RECONNECT_PERIOD_MS: u64 = 1_000;
