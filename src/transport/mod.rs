//! Transport abstraction.
//!
//! The client talks to the gateway through a [`Transport`], which opens a
//! framed text channel. The default implementation rides on
//! tokio-tungstenite; tests substitute a channel-backed mock.

mod ws;

pub use ws::WsTransport;

use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// An open connection: a pair of frame channels.
///
/// Dropping `sender` closes the connection; the connection closing (for any
/// reason) closes `receiver`.
pub struct Connection {
    /// Outbound text frames, client to gateway.
    pub sender: mpsc::UnboundedSender<String>,
    /// Inbound text frames, gateway to client.
    pub receiver: mpsc::UnboundedReceiver<String>,
}

/// Opens framed text connections to a gateway.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Connection>;
}
