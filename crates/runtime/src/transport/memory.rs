use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use runlink_protocol::{Frame, Payload, WireFrame, events};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use url::Url;

use super::{Connector, TransportParts, TransportSender};
use crate::error::{Error, Result};

/// In-process connector. Every successful connect hands a [`MemoryServer`]
/// to whoever holds the receiver returned by [`MemoryConnector::new`].
pub struct MemoryConnector {
	servers: mpsc::UnboundedSender<MemoryServer>,
	connects: AtomicUsize,
	refuse: Mutex<Option<String>>,
}

impl MemoryConnector {
	pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MemoryServer>) {
		let (tx, rx) = mpsc::unbounded_channel();
		let connector = Arc::new(Self {
			servers: tx,
			connects: AtomicUsize::new(0),
			refuse: Mutex::new(None),
		});
		(connector, rx)
	}

	/// Makes every following connect attempt fail with `reason`.
	pub fn refuse(&self, reason: &str) {
		*self.refuse.lock() = Some(reason.to_string());
	}

	/// Number of sockets opened so far.
	pub fn connect_count(&self) -> usize {
		self.connects.load(Ordering::SeqCst)
	}
}

impl Connector for MemoryConnector {
	fn connect<'a>(&'a self, url: &'a Url) -> Pin<Box<dyn Future<Output = Result<TransportParts>> + Send + 'a>> {
		Box::pin(async move {
			if let Some(reason) = self.refuse.lock().clone() {
				return Err(Error::ConnectionFailed {
					url: url.to_string(),
					reason,
				});
			}

			let (client_tx, server_rx) = mpsc::unbounded_channel();
			let (server_tx, client_rx) = mpsc::unbounded_channel();

			let server = MemoryServer {
				url: url.clone(),
				from_client: server_rx,
				to_client: server_tx,
			};
			self.servers.send(server).map_err(|_| Error::ConnectionFailed {
				url: url.to_string(),
				reason: "memory server receiver dropped".to_string(),
			})?;
			self.connects.fetch_add(1, Ordering::SeqCst);

			Ok(TransportParts {
				sender: Box::new(MemorySender { tx: Some(client_tx) }),
				receiver: client_rx,
			})
		})
	}
}

struct MemorySender {
	tx: Option<mpsc::UnboundedSender<WireFrame>>,
}

impl TransportSender for MemorySender {
	fn send(&mut self, frame: WireFrame) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move {
			let tx = self.tx.as_ref().ok_or(Error::ChannelClosed)?;
			tx.send(frame).map_err(|_| Error::Transport("memory server hung up".to_string()))
		})
	}

	fn close(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
		Box::pin(async move {
			self.tx = None;
		})
	}
}

/// Server end of an in-memory socket.
pub struct MemoryServer {
	url: Url,
	from_client: mpsc::UnboundedReceiver<WireFrame>,
	to_client: mpsc::UnboundedSender<Result<WireFrame>>,
}

impl MemoryServer {
	pub fn url(&self) -> &Url {
		&self.url
	}

	/// Next frame from the client, heartbeats included. `None` once the client closed.
	pub async fn recv_raw(&mut self) -> Option<Frame> {
		let wire = self.from_client.recv().await?;
		match Frame::decode_client(wire) {
			Ok(frame) => Some(frame),
			Err(e) => panic!("client sent an undecodable frame: {e}"),
		}
	}

	/// Next non-heartbeat frame from the client.
	pub async fn recv(&mut self) -> Option<Frame> {
		loop {
			let frame = self.recv_raw().await?;
			if frame.topic != events::SOCKET_TOPIC {
				return Some(frame);
			}
		}
	}

	/// Like [`recv`](Self::recv), but gives up after `timeout`.
	pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Frame> {
		tokio::time::timeout(timeout, self.recv()).await.ok().flatten()
	}

	/// Returns a frame the client already sent, if any, without waiting.
	pub fn try_recv(&mut self) -> Option<Frame> {
		loop {
			let wire = self.from_client.try_recv().ok()?;
			let frame = Frame::decode_client(wire).ok()?;
			if frame.topic != events::SOCKET_TOPIC {
				return Some(frame);
			}
		}
	}

	/// Answers `request` with a `phx_reply`.
	pub fn reply(&self, request: &Frame, status: &str, response: Value) {
		let reply = Frame::new(request.topic.clone(), events::REPLY, json!({ "status": status, "response": response }))
			.with_refs(request.join_ref.clone(), request.msg_ref.clone());
		self.send(reply);
	}

	/// Sends an event on `topic` that belongs to the join identified by `join_ref`.
	pub fn push(&self, topic: &str, join_ref: Option<&str>, event: &str, payload: impl Into<Payload>) {
		let frame = Frame::new(topic, event, payload).with_refs(join_ref.map(str::to_string), None);
		self.send(frame);
	}

	/// Sends an event on `topic` to every member.
	pub fn broadcast(&self, topic: &str, event: &str, payload: impl Into<Payload>) {
		self.send(Frame::new(topic, event, payload));
	}

	pub fn send(&self, frame: Frame) {
		match frame.encode_server() {
			Ok(wire) => {
				let _ = self.to_client.send(Ok(wire));
			}
			Err(e) => panic!("server frame could not be encoded: {e}"),
		}
	}

	/// Sends raw bytes, bypassing the codec.
	pub fn send_wire(&self, wire: WireFrame) {
		let _ = self.to_client.send(Ok(wire));
	}

	/// Breaks the socket with a transport error.
	pub fn fail(&self, reason: &str) {
		let _ = self.to_client.send(Err(Error::Transport(reason.to_string())));
	}

	/// Closes the socket from the server side.
	pub fn close(self) {}
}
