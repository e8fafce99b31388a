//! Multiplexing client for the neural inference backend.
//!
//! One persistent WebSocket carries every in-flight request; responses are
//! correlated back to callers by message UUID. See [`NeuralClient`] for
//! the connection lifecycle and [`PendingRegistry`] for the correlation
//! table.

mod client;
mod error;
mod pending;

pub use {
    client::NeuralClient,
    error::{Error, Result},
    pending::PendingRegistry,
};
