//! The gateway's front side: WebSocket client sessions, the REST surface
//! for chat/message CRUD and feedback, and the server wiring around the
//! upstream multiplexer.

pub mod api;
pub mod config;
pub mod server;
pub mod session;
