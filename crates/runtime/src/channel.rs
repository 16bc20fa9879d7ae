//! The run channel: one `pipelines:*` topic joined over a shared connection.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use runlink_protocol::{ChannelName, Frame, JoinState, Payload, ReplyStatus, events};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::connection::{ChannelEvent, Connection};
use crate::encoder::PushTarget;
use crate::error::{Error, Result};

/// Result of [`RunChannel::join`].
#[derive(Debug)]
pub enum JoinOutcome {
	/// The server accepted the join.
	Joined {
		/// The `response` of the join reply.
		response: Value,
		/// Events addressed to this join.
		events: mpsc::UnboundedReceiver<ChannelEvent>,
	},
	/// The channel was already joined; nothing was sent.
	AlreadyJoined,
}

/// A channel on a topic. Holds only a weak reference to its connection so a
/// dropped session tears the socket down even if a channel outlives it.
pub struct RunChannel {
	name: ChannelName,
	connection: Weak<Connection>,
	state: Mutex<JoinState>,
	join_ref: Mutex<Option<String>>,
	join_timeout: Duration,
}

impl RunChannel {
	pub fn new(name: ChannelName, connection: &Arc<Connection>, join_timeout: Duration) -> Self {
		Self {
			name,
			connection: Arc::downgrade(connection),
			state: Mutex::new(JoinState::Closed),
			join_ref: Mutex::new(None),
			join_timeout,
		}
	}

	pub fn name(&self) -> &ChannelName {
		&self.name
	}

	pub fn state(&self) -> JoinState {
		*self.state.lock()
	}

	fn connection(&self) -> Result<Arc<Connection>> {
		self.connection.upgrade().ok_or(Error::ChannelClosed)
	}

	/// Joins the topic with `params` as the join payload.
	pub async fn join(&self, params: Value) -> Result<JoinOutcome> {
		{
			let mut state = self.state.lock();
			match *state {
				JoinState::Joined => return Ok(JoinOutcome::AlreadyJoined),
				JoinState::Joining => return Err(Error::InvalidConfig(format!("join of {} already in progress", self.name))),
				_ => *state = JoinState::Joining,
			}
		}

		match self.join_inner(params).await {
			Ok(outcome) => Ok(outcome),
			Err(e) => {
				{
					let mut state = self.state.lock();
					if *state == JoinState::Joining {
						*state = JoinState::Errored;
					}
				}
				let join_ref = self.join_ref.lock().take();
				if let (Some(connection), Some(join_ref)) = (self.connection.upgrade(), join_ref) {
					connection.unregister_channel(self.name.as_str(), &join_ref);
				}
				Err(e)
			}
		}
	}

	async fn join_inner(&self, params: Value) -> Result<JoinOutcome> {
		let connection = self.connection()?;
		let join_ref = connection.next_ref();
		let topic = self.name.as_str();

		// Registered before the join goes out so nothing sent right after the
		// reply is lost.
		let events_rx = connection.register_channel(topic, &join_ref);
		*self.join_ref.lock() = Some(join_ref.clone());

		tracing::debug!(topic, join_ref = %join_ref, "joining channel");
		let frame = Frame::new(topic, events::JOIN, params).with_refs(Some(join_ref.clone()), Some(join_ref));
		let reply = connection.request(frame, self.join_timeout).await?;
		let response = reply.response.as_json().cloned().unwrap_or(Value::Null);

		match reply.status {
			ReplyStatus::Ok => {
				{
					let mut state = self.state.lock();
					// Left while the join was in flight.
					if *state != JoinState::Joining {
						tracing::debug!(topic, "join acknowledged after leave (ignored)");
						return Err(Error::ChannelClosed);
					}
					*state = JoinState::Joined;
				}
				tracing::info!(topic, "joined channel");
				Ok(JoinOutcome::Joined { response, events: events_rx })
			}
			ReplyStatus::Timeout => Err(Error::Timeout(format!("server timed out joining {topic}"))),
			status => Err(Error::JoinRejected {
				topic: topic.to_string(),
				reason: rejection_reason(status.as_str(), &response),
			}),
		}
	}

	/// Leaves the topic. Best-effort: the leave is sent if the socket is up,
	/// and the channel is closed locally either way.
	pub fn leave(&self) {
		let previous = {
			let mut state = self.state.lock();
			let previous = *state;
			if matches!(previous, JoinState::Closed | JoinState::Leaving) {
				return;
			}
			*state = JoinState::Leaving;
			previous
		};
		let join_ref = self.join_ref.lock().take();

		if let (Some(connection), Some(join_ref)) = (self.connection.upgrade(), join_ref) {
			connection.unregister_channel(self.name.as_str(), &join_ref);
			if matches!(previous, JoinState::Joined | JoinState::Joining) {
				let frame = Frame::new(self.name.as_str(), events::LEAVE, Payload::empty()).with_refs(Some(join_ref), Some(connection.next_ref()));
				match connection.send(&frame) {
					Ok(()) => tracing::debug!(topic = %self.name, "left channel"),
					Err(e) => tracing::debug!(topic = %self.name, error = %e, "leave not sent"),
				}
			}
		}
		*self.state.lock() = JoinState::Closed;
	}

	/// Sends an event on the joined channel.
	pub fn push(&self, event: &str, payload: Payload) -> Result<()> {
		if self.state() != JoinState::Joined {
			return Err(Error::ChannelClosed);
		}
		let connection = self.connection()?;
		let join_ref = self.join_ref.lock().clone();
		let frame = Frame::new(self.name.as_str(), event, payload).with_refs(join_ref, Some(connection.next_ref()));
		connection.send(&frame)
	}
}

impl PushTarget for RunChannel {
	fn push(&self, event: &str, payload: Payload) -> Result<()> {
		RunChannel::push(self, event, payload)
	}
}

fn rejection_reason(status: &str, response: &Value) -> String {
	match response.get("reason").and_then(Value::as_str) {
		Some(reason) => reason.to_string(),
		None if response.is_null() => status.to_string(),
		None => format!("{status}: {response}"),
	}
}
