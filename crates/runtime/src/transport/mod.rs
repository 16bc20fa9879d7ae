//! Byte pipes underneath a [`Connection`](crate::Connection).
//!
//! A [`Connector`] opens a socket and hands back [`TransportParts`]: a sender
//! for outbound frames and a receiver that yields inbound frames until the
//! socket closes. A socket failure arrives as one `Err` item and ends the stream.

#[cfg(test)]
mod tests;

mod memory;
mod websocket;

use std::future::Future;
use std::pin::Pin;

use runlink_protocol::WireFrame;
use tokio::sync::mpsc;
use url::Url;

use crate::error::Result;

pub use memory::{MemoryConnector, MemoryServer};
pub use websocket::WebSocketConnector;

/// Writing half of an open socket.
pub trait TransportSender: Send {
	fn send(&mut self, frame: WireFrame) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

	/// Closes the socket. Safe to call more than once.
	fn close(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Both halves of an open socket.
pub struct TransportParts {
	pub sender: Box<dyn TransportSender>,
	pub receiver: mpsc::UnboundedReceiver<Result<WireFrame>>,
}

/// Opens sockets.
pub trait Connector: Send + Sync {
	fn connect<'a>(&'a self, url: &'a Url) -> Pin<Box<dyn Future<Output = Result<TransportParts>> + Send + 'a>>;
}
