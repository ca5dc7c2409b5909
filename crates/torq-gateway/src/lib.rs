//! torq-gateway: HTTP API and event stream for the TORQ console
//!
//! Serves the REST endpoints the chat frontend uses (agents, chat, sessions)
//! and a WebSocket stream of agent status changes and new messages.

pub mod auth;
pub mod events;
pub mod protocol;
pub mod server;
pub mod session;

pub use server::{GatewayServer, GatewayState};
