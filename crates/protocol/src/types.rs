//! Status enums, run arguments and the channel auth exchange.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle of a run as seen by the host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
	#[default]
	Idle,
	Starting,
	Running,
}

impl fmt::Display for RunStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			RunStatus::Idle => "idle",
			RunStatus::Starting => "starting",
			RunStatus::Running => "running",
		})
	}
}

/// Join state of a single channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinState {
	#[default]
	Closed,
	Joining,
	Joined,
	Leaving,
	Errored,
}

/// State of the underlying socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
	#[default]
	Disconnected,
	Connecting,
	Connected,
	Error,
}

/// A value handed to a block input at the moment the run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialInput {
	/// `{block_id}:{input_name}`
	pub name: String,
	pub value: Value,
}

/// Arguments for starting a fresh run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartArgs {
	#[serde(default)]
	pub initial_inputs: Vec<InitialInput>,
	#[serde(default)]
	pub metadata: Map<String, Value>,
	/// Pipeline alias to run instead of the latest version.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub alias: Option<String>,
}

/// Arguments for attaching to a run that is already executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinArgs {
	pub run_id: u64,
}

/// Body of `POST /channel_auth`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAuthRequest {
	pub socket_id: String,
	pub channel_name: String,
}

/// Fields returned by `/channel_auth`, forwarded verbatim in the join payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelAuth(pub Map<String, Value>);

impl ChannelAuth {
	/// Join payload for starting a run: auth fields first, then the run arguments.
	pub fn start_payload(self, args: &StartArgs) -> Value {
		let mut payload = self.0;
		payload.insert("initial_inputs".to_string(), serde_json::to_value(&args.initial_inputs).unwrap_or(Value::Array(Vec::new())));
		payload.insert("metadata".to_string(), Value::Object(args.metadata.clone()));
		if let Some(alias) = &args.alias {
			payload.insert("alias".to_string(), Value::String(alias.clone()));
		}
		Value::Object(payload)
	}

	/// Join payload for attaching to an existing run.
	pub fn join_payload(self) -> Value {
		Value::Object(self.0)
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn run_status_serializes_lowercase() {
		assert_eq!(serde_json::to_string(&RunStatus::Starting).unwrap(), r#""starting""#);
		assert_eq!(RunStatus::Running.to_string(), "running");
		assert_eq!(RunStatus::default(), RunStatus::Idle);
	}

	#[test]
	fn start_payload_merges_auth_and_args() {
		let auth: ChannelAuth = serde_json::from_value(json!({"auth": "sig", "user_data": "{}"})).unwrap();
		let args = StartArgs {
			initial_inputs: vec![InitialInput {
				name: "text_input:input".into(),
				value: json!("hello"),
			}],
			metadata: json!({"interface": "form"}).as_object().cloned().unwrap(),
			alias: None,
		};

		let payload = auth.start_payload(&args);
		assert_eq!(
			payload,
			json!({
				"auth": "sig",
				"user_data": "{}",
				"initial_inputs": [{"name": "text_input:input", "value": "hello"}],
				"metadata": {"interface": "form"}
			})
		);
	}

	#[test]
	fn start_payload_includes_alias() {
		let args = StartArgs {
			alias: Some("v2".into()),
			..Default::default()
		};
		let payload = ChannelAuth::default().start_payload(&args);
		assert_eq!(payload["alias"], "v2");
		assert_eq!(payload["initial_inputs"], json!([]));
	}

	#[test]
	fn auth_request_shape() {
		let request = ChannelAuthRequest {
			socket_id: "abc".into(),
			channel_name: "pipelines:1:2".into(),
		};
		assert_eq!(serde_json::to_value(&request).unwrap(), json!({"socket_id": "abc", "channel_name": "pipelines:1:2"}));
	}
}
