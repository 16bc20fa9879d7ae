//! Socket connection shared by the channels of one session.
//!
//! The connection owns the transport and three background tasks:
//!
//! - **writer**: drains the outbound queue into the transport
//! - **reader**: decodes inbound frames and dispatches them
//! - **heartbeat**: pings the `phoenix` topic and fails the socket when a
//!   ping goes unanswered for a whole interval
//!
//! Inbound replies are correlated with pending requests by ref. Every other
//! frame is routed by topic to the channel registered for it, provided the
//! frame's join ref (if any) matches the channel's current join.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use runlink_protocol::{ConnectionStatus, Frame, InboundMessage, Payload, Reply, WireFrame, events};
use tokio::sync::{Mutex as TokioMutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use url::Url;

use crate::error::{Error, Result};
use crate::transport::{Connector, TransportParts};

/// Something that happened on a channel, as seen by the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
	/// A regular event addressed to the channel.
	Message { event: String, payload: Payload },
	/// The server crashed the channel process (`phx_error`).
	Errored,
	/// The server closed the channel (`phx_close`).
	Closed,
}

struct ChannelSink {
	join_ref: String,
	tx: mpsc::UnboundedSender<ChannelEvent>,
}

/// State shared with the background tasks.
struct Shared {
	status: watch::Sender<ConnectionStatus>,
	last_error: Mutex<Option<String>>,
	channels: Mutex<HashMap<String, ChannelSink>>,
	pending: Mutex<HashMap<String, oneshot::Sender<Reply>>>,
	heartbeat_ref: Mutex<Option<String>>,
}

impl Shared {
	fn set_status(&self, status: ConnectionStatus) {
		self.status.send_replace(status);
	}

	/// Marks the socket as failed and releases everyone waiting on it.
	fn fail(&self, reason: String) {
		if *self.status.borrow() == ConnectionStatus::Error {
			return;
		}
		tracing::warn!(reason = %reason, "connection failed");
		*self.last_error.lock() = Some(reason);
		self.pending.lock().clear();
		*self.heartbeat_ref.lock() = None;
		self.set_status(ConnectionStatus::Error);
	}

	fn dispatch(&self, message: InboundMessage) {
		match message {
			InboundMessage::Reply(reply) => self.dispatch_reply(reply),
			InboundMessage::Event(frame) => self.dispatch_event(frame),
		}
	}

	fn dispatch_reply(&self, reply: Reply) {
		let Some(msg_ref) = reply.msg_ref.clone() else {
			tracing::debug!(topic = %reply.topic, "reply without ref (ignored)");
			return;
		};

		if let Some(callback) = self.pending.lock().remove(&msg_ref) {
			let _ = callback.send(reply);
			return;
		}

		let mut heartbeat = self.heartbeat_ref.lock();
		if reply.topic == events::SOCKET_TOPIC && heartbeat.as_deref() == Some(msg_ref.as_str()) {
			*heartbeat = None;
			return;
		}
		tracing::debug!(topic = %reply.topic, r#ref = %msg_ref, status = reply.status.as_str(), "reply for unknown request (ignored)");
	}

	fn dispatch_event(&self, frame: Frame) {
		let channels = self.channels.lock();
		let Some(sink) = channels.get(&frame.topic) else {
			tracing::debug!(topic = %frame.topic, event = %frame.event, "event for unknown topic (ignored)");
			return;
		};

		if frame.join_ref.as_ref().is_some_and(|join_ref| *join_ref != sink.join_ref) {
			tracing::debug!(topic = %frame.topic, event = %frame.event, "event from a stale join (ignored)");
			return;
		}

		let event = match frame.event.as_str() {
			events::ERROR => ChannelEvent::Errored,
			events::CLOSE => ChannelEvent::Closed,
			_ => ChannelEvent::Message {
				event: frame.event,
				payload: frame.payload,
			},
		};
		let _ = sink.tx.send(event);
	}
}

struct Live {
	outbound: mpsc::UnboundedSender<WireFrame>,
	writer: JoinHandle<()>,
	reader: JoinHandle<()>,
	heartbeat: JoinHandle<()>,
}

impl Live {
	fn abort(self) {
		self.writer.abort();
		self.reader.abort();
		self.heartbeat.abort();
	}
}

/// One realtime socket.
pub struct Connection {
	url: Url,
	socket_id: String,
	heartbeat_interval: Duration,
	connector: Arc<dyn Connector>,
	shared: Arc<Shared>,
	next_ref: Arc<AtomicU64>,
	live: Mutex<Option<Live>>,
	/// Serializes connect attempts.
	connecting: TokioMutex<()>,
}

impl Connection {
	pub fn new(url: Url, socket_id: String, heartbeat_interval: Duration, connector: Arc<dyn Connector>) -> Self {
		let (status, _) = watch::channel(ConnectionStatus::Disconnected);
		Self {
			url,
			socket_id,
			heartbeat_interval,
			connector,
			shared: Arc::new(Shared {
				status,
				last_error: Mutex::new(None),
				channels: Mutex::new(HashMap::new()),
				pending: Mutex::new(HashMap::new()),
				heartbeat_ref: Mutex::new(None),
			}),
			next_ref: Arc::new(AtomicU64::new(1)),
			live: Mutex::new(None),
			connecting: TokioMutex::new(()),
		}
	}

	pub fn url(&self) -> &Url {
		&self.url
	}

	/// Identifier sent as the `id` socket param and used for channel auth.
	pub fn socket_id(&self) -> &str {
		&self.socket_id
	}

	pub fn status(&self) -> ConnectionStatus {
		*self.shared.status.borrow()
	}

	pub fn is_connected(&self) -> bool {
		self.status() == ConnectionStatus::Connected
	}

	/// Watches status changes. The receiver starts at the current status.
	pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
		self.shared.status.subscribe()
	}

	/// Reason of the most recent failure, if any.
	pub fn last_error(&self) -> Option<String> {
		self.shared.last_error.lock().clone()
	}

	/// Allocates a fresh message ref.
	pub fn next_ref(&self) -> String {
		self.next_ref.fetch_add(1, Ordering::SeqCst).to_string()
	}

	/// Opens the socket. A no-op when already connected.
	///
	/// A socket left in the error state is torn down and reopened.
	pub async fn connect(&self) -> Result<()> {
		let _guard = self.connecting.lock().await;
		if self.is_connected() {
			return Ok(());
		}
		if let Some(stale) = self.live.lock().take() {
			stale.abort();
		}

		self.shared.set_status(ConnectionStatus::Connecting);
		tracing::debug!(url = %self.url, "connecting");

		let parts = match self.connector.connect(&self.url).await {
			Ok(parts) => parts,
			Err(e) => {
				self.shared.fail(e.to_string());
				return Err(e);
			}
		};

		*self.shared.last_error.lock() = None;
		let live = self.spawn_tasks(parts);
		*self.live.lock() = Some(live);
		self.shared.set_status(ConnectionStatus::Connected);
		tracing::info!(url = %self.url, socket_id = %self.socket_id, "connected");
		Ok(())
	}

	fn spawn_tasks(&self, parts: TransportParts) -> Live {
		let TransportParts { mut sender, mut receiver } = parts;
		let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<WireFrame>();

		let writer_shared = Arc::clone(&self.shared);
		let writer = tokio::spawn(async move {
			while let Some(frame) = outbound_rx.recv().await {
				if let Err(e) = sender.send(frame).await {
					writer_shared.fail(e.to_string());
					break;
				}
			}
			sender.close().await;
		});

		let reader_shared = Arc::clone(&self.shared);
		let reader = tokio::spawn(async move {
			while let Some(item) = receiver.recv().await {
				match item.and_then(|wire| InboundMessage::decode(wire).map_err(Error::from)) {
					Ok(message) => reader_shared.dispatch(message),
					Err(Error::Protocol(e)) => tracing::warn!(error = %e, "dropping undecodable frame"),
					Err(e) => {
						reader_shared.fail(e.to_string());
						return;
					}
				}
			}
			if *reader_shared.status.borrow() == ConnectionStatus::Connected {
				reader_shared.fail("connection closed by server".to_string());
			}
		});

		let heartbeat_shared = Arc::clone(&self.shared);
		let heartbeat_out = outbound.clone();
		let next_ref = Arc::clone(&self.next_ref);
		let interval = self.heartbeat_interval;
		let heartbeat = tokio::spawn(async move {
			let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
			loop {
				ticker.tick().await;
				if heartbeat_shared.heartbeat_ref.lock().take().is_some() {
					heartbeat_shared.fail("heartbeat timeout".to_string());
					return;
				}

				let msg_ref = next_ref.fetch_add(1, Ordering::SeqCst).to_string();
				let frame = Frame::new(events::SOCKET_TOPIC, events::HEARTBEAT, Payload::empty()).with_refs(None, Some(msg_ref.clone()));
				let Ok(wire) = frame.encode() else {
					return;
				};
				*heartbeat_shared.heartbeat_ref.lock() = Some(msg_ref);
				if heartbeat_out.send(wire).is_err() {
					return;
				}
			}
		});

		Live {
			outbound,
			writer,
			reader,
			heartbeat,
		}
	}

	/// Closes the socket. Safe to call when not connected.
	pub fn disconnect(&self) {
		let Some(live) = self.live.lock().take() else {
			return;
		};
		tracing::info!(url = %self.url, "disconnecting");

		// Dropping the outbound sender lets the writer flush and close the transport.
		let Live {
			outbound,
			writer: _,
			reader,
			heartbeat,
		} = live;
		drop(outbound);
		reader.abort();
		heartbeat.abort();

		self.shared.channels.lock().clear();
		self.shared.pending.lock().clear();
		*self.shared.heartbeat_ref.lock() = None;
		self.shared.set_status(ConnectionStatus::Disconnected);
	}

	/// Routes events for `topic` to the returned receiver, replacing any
	/// previous registration for the same topic.
	pub fn register_channel(&self, topic: &str, join_ref: &str) -> mpsc::UnboundedReceiver<ChannelEvent> {
		let (tx, rx) = mpsc::unbounded_channel();
		self.shared.channels.lock().insert(
			topic.to_string(),
			ChannelSink {
				join_ref: join_ref.to_string(),
				tx,
			},
		);
		rx
	}

	/// Stops routing events for `topic`, unless the topic has since been
	/// registered again under another join.
	pub fn unregister_channel(&self, topic: &str, join_ref: &str) {
		let mut channels = self.shared.channels.lock();
		if channels.get(topic).is_some_and(|sink| sink.join_ref == join_ref) {
			channels.remove(topic);
		}
	}

	/// Queues a frame for sending without waiting for any reply.
	pub fn send(&self, frame: &Frame) -> Result<()> {
		let wire = frame.encode()?;
		let live = self.live.lock();
		let live = live.as_ref().ok_or(Error::ChannelClosed)?;
		if !self.is_connected() {
			return Err(Error::ChannelClosed);
		}
		live.outbound.send(wire).map_err(|_| Error::ChannelClosed)
	}

	/// Sends a frame carrying a ref and waits for the matching reply.
	pub async fn request(&self, frame: Frame, timeout: Duration) -> Result<Reply> {
		let msg_ref = frame
			.msg_ref
			.clone()
			.ok_or_else(|| Error::InvalidConfig("request frames need a ref".to_string()))?;

		let (tx, rx) = oneshot::channel();
		self.shared.pending.lock().insert(msg_ref.clone(), tx);

		if let Err(e) = self.send(&frame) {
			self.shared.pending.lock().remove(&msg_ref);
			return Err(e);
		}

		match tokio::time::timeout(timeout, rx).await {
			Ok(Ok(reply)) => Ok(reply),
			Ok(Err(_)) => Err(self.lost_error()),
			Err(_) => {
				self.shared.pending.lock().remove(&msg_ref);
				Err(Error::Timeout(format!("no reply to {} on {} after {}ms", frame.event, frame.topic, timeout.as_millis())))
			}
		}
	}

	fn lost_error(&self) -> Error {
		match self.last_error() {
			Some(reason) => Error::Transport(reason),
			None => Error::ChannelClosed,
		}
	}
}

impl Drop for Connection {
	fn drop(&mut self) {
		self.disconnect();
	}
}
