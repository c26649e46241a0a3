//! # rlgl-sync: status synchronization between clients and a central server
//!
//! Clients push a small status document over an authenticated WebSocket;
//! the server keeps the latest document per client and republishes it over
//! JSON and Server-Sent Events.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   WebSocket (JSON)   ┌──────────┐     ┌─────────────┐
//! │ StatusClient │ ───────────────────► │   Hub    │ ──► │  Session    │
//! │ (per client) │ ◄─────────────────── │ AuthGate │     │ (per conn)  │
//! └──────────────┘    ack/pong/error    └──────────┘     └──────┬──────┘
//!                                                               │ set
//!                                                               ▼
//!                     ┌────────────┐  get_all / first   ┌─────────────┐
//!                     │  readers   │ ◄───────────────── │ ConfigStore │
//!                     │ /status …  │                    └──────┬──────┘
//!                     └────────────┘                           │ detached
//!                                                              ▼
//!                                                       ┌─────────────┐
//!                                                       │PresenceSync │
//!                                                       └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`document`]: the status document and its YAML loader
//! - [`store`]: concurrent client id → document map
//! - [`auth`]: connection credential check, token helpers
//! - [`protocol`]: JSON wire frames
//! - [`session`]: per-connection push/ping state machine
//! - [`hub`]: authenticated WebSocket entry point
//! - [`presence`]: best-effort presence API sync
//! - [`readers`]: read-only HTTP routes
//! - [`server`]: composes the above into one HTTP server
//! - [`client`]: pushing client

pub mod auth;
pub mod client;
pub mod document;
pub mod hub;
pub mod presence;
pub mod protocol;
pub mod readers;
pub mod server;
pub mod session;
pub mod store;

// Re-exports for convenience
pub use auth::{generate_token, validate_token_format, AuthError, AuthGate};
pub use client::{fetch_status, ClientError, StatusClient};
pub use document::{Contributor, DocumentError, PresenceSettings, StatusDocument};
pub use hub::{Hub, HubStats, HubStatsSnapshot};
pub use presence::{PresenceError, PresenceStatus, PresenceSync};
pub use protocol::{Frame, Inbound, MessageType, ProtocolError};
pub use server::{ServerConfig, ServerError, StatusServer};
pub use session::{Session, SessionState};
pub use store::ConfigStore;
