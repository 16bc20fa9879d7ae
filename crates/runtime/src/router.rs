//! Routes block events from the run channel to [`RunHandlers`].

use runlink_protocol::{Payload, Topic};
use serde_json::Value;

use crate::handlers::RunHandlers;

/// Dispatches run channel events by name.
///
/// Events are matched on their parsed [`Topic`]; anything that is not a block
/// output, start, stop or error is ignored.
#[derive(Debug, Clone)]
pub struct MessageRouter {
	handlers: RunHandlers,
}

impl MessageRouter {
	pub fn new(handlers: RunHandlers) -> Self {
		Self { handlers }
	}

	/// Invokes the handler for `event` and hands the payload back unchanged.
	pub fn route(&self, event: &str, payload: Payload) -> Payload {
		match Topic::parse(event) {
			Topic::Output { block_id, output_name } => {
				let metadata = payload.as_json().and_then(|json| json.get("metadata"));
				(self.handlers.on_block_output)(block_id, output_name, &payload, metadata);
			}
			Topic::Start { block_id } => (self.handlers.on_block_status_change)(block_id, true),
			Topic::Stop { block_id } => (self.handlers.on_block_status_change)(block_id, false),
			Topic::Error { block_id } => {
				let errors = block_errors(&payload);
				tracing::debug!(block_id, count = errors.len(), "block reported errors");
				(self.handlers.on_block_error)(block_id, &errors);
			}
			Topic::Input { .. } | Topic::Unknown => {
				tracing::trace!(event, "ignoring event");
			}
		}
		payload
	}
}

/// Reads the `errors` field of a block error payload.
fn block_errors(payload: &Payload) -> Vec<String> {
	match payload.as_json().and_then(|json| json.get("errors")) {
		Some(Value::Array(items)) => items
			.iter()
			.map(|item| match item {
				Value::String(message) => message.clone(),
				other => other.to_string(),
			})
			.collect(),
		Some(Value::String(message)) => vec![message.clone()],
		_ => Vec::new(),
	}
}
