//! Channel frames in the v2 serializer.
//!
//! JSON payloads travel as text frames holding a five element array
//! `[join_ref, ref, topic, event, payload]`. Binary payloads travel as binary
//! frames whose header stores each string field's length in one byte:
//!
//! ```text
//! push      (client -> server)  [0, jr_len, ref_len, topic_len, event_len, join_ref, ref, topic, event, data]
//! push      (server -> client)  [0, jr_len, topic_len, event_len, join_ref, topic, event, data]
//! reply     (server -> client)  [1, jr_len, ref_len, topic_len, status_len, join_ref, ref, topic, status, data]
//! broadcast (server -> client)  [2, topic_len, event_len, topic, event, data]
//! ```

use serde_json::{Map, Value};

use crate::error::{ProtocolError, Result};

/// Reserved event and topic names used by the channel layer itself.
pub mod events {
	pub const JOIN: &str = "phx_join";
	pub const LEAVE: &str = "phx_leave";
	pub const REPLY: &str = "phx_reply";
	pub const ERROR: &str = "phx_error";
	pub const CLOSE: &str = "phx_close";
	pub const HEARTBEAT: &str = "heartbeat";
	/// Topic that carries socket-level traffic such as heartbeats.
	pub const SOCKET_TOPIC: &str = "phoenix";
}

const KIND_PUSH: u8 = 0;
const KIND_REPLY: u8 = 1;
const KIND_BROADCAST: u8 = 2;

/// A single websocket message, independent of the websocket library in use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
	Text(String),
	Binary(Vec<u8>),
}

/// Body of a channel message.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
	Json(Value),
	Binary(Vec<u8>),
}

impl Payload {
	/// The empty JSON object, used for control messages.
	pub fn empty() -> Self {
		Payload::Json(Value::Object(Map::new()))
	}

	pub fn as_json(&self) -> Option<&Value> {
		match self {
			Payload::Json(value) => Some(value),
			Payload::Binary(_) => None,
		}
	}

	pub fn as_bytes(&self) -> Option<&[u8]> {
		match self {
			Payload::Binary(data) => Some(data),
			Payload::Json(_) => None,
		}
	}

	pub fn is_binary(&self) -> bool {
		matches!(self, Payload::Binary(_))
	}
}

impl From<Value> for Payload {
	fn from(value: Value) -> Self {
		Payload::Json(value)
	}
}

impl From<Vec<u8>> for Payload {
	fn from(data: Vec<u8>) -> Self {
		Payload::Binary(data)
	}
}

/// A channel message addressed to a topic.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
	/// Ref of the join this message belongs to.
	pub join_ref: Option<String>,
	/// Ref used to correlate a reply, if one is expected.
	pub msg_ref: Option<String>,
	pub topic: String,
	pub event: String,
	pub payload: Payload,
}

impl Frame {
	pub fn new(topic: impl Into<String>, event: impl Into<String>, payload: impl Into<Payload>) -> Self {
		Self {
			join_ref: None,
			msg_ref: None,
			topic: topic.into(),
			event: event.into(),
			payload: payload.into(),
		}
	}

	pub fn with_refs(mut self, join_ref: Option<String>, msg_ref: Option<String>) -> Self {
		self.join_ref = join_ref;
		self.msg_ref = msg_ref;
		self
	}

	/// Encodes the frame for sending to the server.
	pub fn encode(&self) -> Result<WireFrame> {
		match &self.payload {
			Payload::Json(value) => {
				let array = (&self.join_ref, &self.msg_ref, &self.topic, &self.event, value);
				Ok(WireFrame::Text(serde_json::to_string(&array)?))
			}
			Payload::Binary(data) => {
				let join_ref = self.join_ref.as_deref().unwrap_or_default();
				let msg_ref = self.msg_ref.as_deref().unwrap_or_default();

				let mut out = Vec::with_capacity(5 + join_ref.len() + msg_ref.len() + self.topic.len() + self.event.len() + data.len());
				out.push(KIND_PUSH);
				out.push(field_len("join_ref", join_ref)?);
				out.push(field_len("ref", msg_ref)?);
				out.push(field_len("topic", &self.topic)?);
				out.push(field_len("event", &self.event)?);
				out.extend_from_slice(join_ref.as_bytes());
				out.extend_from_slice(msg_ref.as_bytes());
				out.extend_from_slice(self.topic.as_bytes());
				out.extend_from_slice(self.event.as_bytes());
				out.extend_from_slice(data);
				Ok(WireFrame::Binary(out))
			}
		}
	}
}

/// Server side of the codec, used by in-process test servers.
impl Frame {
	/// Encodes a server-to-client frame. Binary payloads use the broadcast layout.
	pub fn encode_server(&self) -> Result<WireFrame> {
		match &self.payload {
			Payload::Json(_) => self.encode(),
			Payload::Binary(data) => {
				let mut out = Vec::with_capacity(3 + self.topic.len() + self.event.len() + data.len());
				out.push(KIND_BROADCAST);
				out.push(field_len("topic", &self.topic)?);
				out.push(field_len("event", &self.event)?);
				out.extend_from_slice(self.topic.as_bytes());
				out.extend_from_slice(self.event.as_bytes());
				out.extend_from_slice(data);
				Ok(WireFrame::Binary(out))
			}
		}
	}

	/// Decodes a frame produced by [`Frame::encode`].
	pub fn decode_client(wire: WireFrame) -> Result<Frame> {
		match wire {
			WireFrame::Text(text) => {
				let (join_ref, msg_ref, topic, event, payload): TextFrame = serde_json::from_str(&text)?;
				Ok(Frame {
					join_ref,
					msg_ref,
					topic,
					event,
					payload: Payload::Json(payload),
				})
			}
			WireFrame::Binary(bytes) => {
				let (&kind, rest) = bytes
					.split_first()
					.ok_or_else(|| ProtocolError::Malformed("empty binary frame".to_string()))?;
				if kind != KIND_PUSH {
					return Err(ProtocolError::UnknownKind(kind));
				}
				let mut cursor = Cursor { buf: rest };
				let header = cursor.bytes(4, "header")?;
				let join_ref = cursor.text(header[0], "join_ref")?;
				let msg_ref = cursor.text(header[1], "ref")?;
				let topic = cursor.text(header[2], "topic")?;
				let event = cursor.text(header[3], "event")?;
				Ok(Frame {
					join_ref: non_empty(join_ref),
					msg_ref: non_empty(msg_ref),
					topic,
					event,
					payload: Payload::Binary(cursor.rest()),
				})
			}
		}
	}
}

fn field_len(field: &'static str, value: &str) -> Result<u8> {
	u8::try_from(value.len()).map_err(|_| ProtocolError::FieldTooLong { field, len: value.len() })
}

/// Outcome carried by a `phx_reply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyStatus {
	Ok,
	Error,
	Timeout,
	Other(String),
}

impl ReplyStatus {
	pub fn parse(status: &str) -> Self {
		match status {
			"ok" => ReplyStatus::Ok,
			"error" => ReplyStatus::Error,
			"timeout" => ReplyStatus::Timeout,
			other => ReplyStatus::Other(other.to_string()),
		}
	}

	pub fn as_str(&self) -> &str {
		match self {
			ReplyStatus::Ok => "ok",
			ReplyStatus::Error => "error",
			ReplyStatus::Timeout => "timeout",
			ReplyStatus::Other(other) => other,
		}
	}
}

/// Server acknowledgment of a request that carried a ref.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
	pub join_ref: Option<String>,
	pub msg_ref: Option<String>,
	pub topic: String,
	pub status: ReplyStatus,
	pub response: Payload,
}

impl Reply {
	pub fn is_ok(&self) -> bool {
		self.status == ReplyStatus::Ok
	}
}

/// Anything the server can send down the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
	Reply(Reply),
	Event(Frame),
}

impl InboundMessage {
	pub fn decode(wire: WireFrame) -> Result<Self> {
		match wire {
			WireFrame::Text(text) => decode_text(&text),
			WireFrame::Binary(bytes) => decode_binary(&bytes),
		}
	}
}

type TextFrame = (Option<String>, Option<String>, String, String, Value);

fn decode_text(text: &str) -> Result<InboundMessage> {
	let (join_ref, msg_ref, topic, event, payload): TextFrame = serde_json::from_str(text)?;

	if event != events::REPLY {
		return Ok(InboundMessage::Event(Frame {
			join_ref,
			msg_ref,
			topic,
			event,
			payload: Payload::Json(payload),
		}));
	}

	let Value::Object(mut body) = payload else {
		return Err(ProtocolError::Malformed("reply payload is not an object".to_string()));
	};
	let status = body
		.get("status")
		.and_then(Value::as_str)
		.map(ReplyStatus::parse)
		.ok_or_else(|| ProtocolError::Malformed("reply without status".to_string()))?;
	let response = body.remove("response").unwrap_or(Value::Null);

	Ok(InboundMessage::Reply(Reply {
		join_ref,
		msg_ref,
		topic,
		status,
		response: Payload::Json(response),
	}))
}

fn decode_binary(bytes: &[u8]) -> Result<InboundMessage> {
	let (&kind, rest) = bytes
		.split_first()
		.ok_or_else(|| ProtocolError::Malformed("empty binary frame".to_string()))?;
	let mut cursor = Cursor { buf: rest };

	match kind {
		KIND_PUSH => {
			let header = cursor.bytes(3, "header")?;
			let join_ref = cursor.text(header[0], "join_ref")?;
			let topic = cursor.text(header[1], "topic")?;
			let event = cursor.text(header[2], "event")?;
			Ok(InboundMessage::Event(Frame {
				join_ref: non_empty(join_ref),
				msg_ref: None,
				topic,
				event,
				payload: Payload::Binary(cursor.rest()),
			}))
		}
		KIND_REPLY => {
			let header = cursor.bytes(4, "header")?;
			let join_ref = cursor.text(header[0], "join_ref")?;
			let msg_ref = cursor.text(header[1], "ref")?;
			let topic = cursor.text(header[2], "topic")?;
			let status = cursor.text(header[3], "status")?;
			Ok(InboundMessage::Reply(Reply {
				join_ref: non_empty(join_ref),
				msg_ref: non_empty(msg_ref),
				topic,
				status: ReplyStatus::parse(&status),
				response: Payload::Binary(cursor.rest()),
			}))
		}
		KIND_BROADCAST => {
			let header = cursor.bytes(2, "header")?;
			let topic = cursor.text(header[0], "topic")?;
			let event = cursor.text(header[1], "event")?;
			Ok(InboundMessage::Event(Frame {
				join_ref: None,
				msg_ref: None,
				topic,
				event,
				payload: Payload::Binary(cursor.rest()),
			}))
		}
		other => Err(ProtocolError::UnknownKind(other)),
	}
}

fn non_empty(value: String) -> Option<String> {
	if value.is_empty() { None } else { Some(value) }
}

struct Cursor<'a> {
	buf: &'a [u8],
}

impl<'a> Cursor<'a> {
	fn bytes(&mut self, len: usize, field: &'static str) -> Result<&'a [u8]> {
		if self.buf.len() < len {
			return Err(ProtocolError::Malformed(format!("binary frame truncated in {field}")));
		}
		let (head, tail) = self.buf.split_at(len);
		self.buf = tail;
		Ok(head)
	}

	fn text(&mut self, len: u8, field: &'static str) -> Result<String> {
		let raw = self.bytes(len as usize, field)?;
		String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::Malformed(format!("{field} is not valid utf-8")))
	}

	fn rest(self) -> Vec<u8> {
		self.buf.to_vec()
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn json_push_encodes_as_five_element_array() {
		let frame = Frame::new("pipelines:1:2", "input:block_1:text", json!({"message": "hi"})).with_refs(Some("1".into()), Some("3".into()));

		let WireFrame::Text(text) = frame.encode().unwrap() else {
			panic!("expected text frame");
		};
		let value: Value = serde_json::from_str(&text).unwrap();
		assert_eq!(value, json!(["1", "3", "pipelines:1:2", "input:block_1:text", {"message": "hi"}]));
	}

	#[test]
	fn null_refs_stay_null() {
		let frame = Frame::new("phoenix", events::HEARTBEAT, Payload::empty());
		let WireFrame::Text(text) = frame.encode().unwrap() else {
			panic!("expected text frame");
		};
		assert!(text.starts_with("[null,null,"));
	}

	#[test]
	fn binary_push_header_layout() {
		let frame = Frame::new("t", "input:b:doc", vec![0xde, 0xad]).with_refs(Some("1".into()), Some("22".into()));

		let WireFrame::Binary(bytes) = frame.encode().unwrap() else {
			panic!("expected binary frame");
		};
		assert_eq!(&bytes[..5], &[0, 1, 2, 1, 11]);
		assert_eq!(&bytes[5..9], b"122t");
		assert_eq!(&bytes[9..20], b"input:b:doc");
		assert_eq!(&bytes[20..], &[0xde, 0xad]);
	}

	#[test]
	fn binary_push_rejects_long_topic() {
		let frame = Frame::new("x".repeat(300), "e", vec![1]);
		let err = frame.encode().unwrap_err();
		assert!(matches!(err, ProtocolError::FieldTooLong { field: "topic", len: 300 }));
	}

	#[test]
	fn decodes_text_event() {
		let text = r#"[null,null,"pipelines:1:2","output:block_1:result",{"message":"hi"}]"#;
		match InboundMessage::decode(WireFrame::Text(text.into())).unwrap() {
			InboundMessage::Event(frame) => {
				assert_eq!(frame.topic, "pipelines:1:2");
				assert_eq!(frame.event, "output:block_1:result");
				assert_eq!(frame.payload, Payload::Json(json!({"message": "hi"})));
				assert!(frame.join_ref.is_none());
			}
			other => panic!("expected event, got {other:?}"),
		}
	}

	#[test]
	fn decodes_text_reply() {
		let text = r#"["1","1","pipelines:1:2","phx_reply",{"status":"ok","response":{"run":{"id":7}}}]"#;
		match InboundMessage::decode(WireFrame::Text(text.into())).unwrap() {
			InboundMessage::Reply(reply) => {
				assert!(reply.is_ok());
				assert_eq!(reply.msg_ref.as_deref(), Some("1"));
				assert_eq!(reply.response, Payload::Json(json!({"run": {"id": 7}})));
			}
			other => panic!("expected reply, got {other:?}"),
		}
	}

	#[test]
	fn reply_without_status_is_malformed() {
		let text = r#"["1","1","t","phx_reply",{"response":{}}]"#;
		assert!(matches!(InboundMessage::decode(WireFrame::Text(text.into())), Err(ProtocolError::Malformed(_))));
	}

	#[test]
	fn decodes_binary_broadcast() {
		let mut bytes = vec![2, 1, 8];
		bytes.extend_from_slice(b"toutput:b");
		bytes.extend_from_slice(&[1, 2, 3]);

		match InboundMessage::decode(WireFrame::Binary(bytes)).unwrap() {
			InboundMessage::Event(frame) => {
				assert_eq!(frame.topic, "t");
				assert_eq!(frame.event, "output:b");
				assert_eq!(frame.payload, Payload::Binary(vec![1, 2, 3]));
			}
			other => panic!("expected event, got {other:?}"),
		}
	}

	#[test]
	fn decodes_binary_reply() {
		let mut bytes = vec![1, 1, 1, 1, 5];
		bytes.extend_from_slice(b"12terror");
		bytes.extend_from_slice(b"oops");

		match InboundMessage::decode(WireFrame::Binary(bytes)).unwrap() {
			InboundMessage::Reply(reply) => {
				assert_eq!(reply.status, ReplyStatus::Error);
				assert_eq!(reply.join_ref.as_deref(), Some("1"));
				assert_eq!(reply.msg_ref.as_deref(), Some("2"));
				assert_eq!(reply.response, Payload::Binary(b"oops".to_vec()));
			}
			other => panic!("expected reply, got {other:?}"),
		}
	}

	#[test]
	fn truncated_binary_frame_is_malformed() {
		let err = InboundMessage::decode(WireFrame::Binary(vec![2, 10, 10, b'a'])).unwrap_err();
		assert!(err.to_string().contains("truncated in topic"));
	}

	#[test]
	fn server_binary_frames_arrive_as_broadcasts() {
		let frame = Frame::new("pipelines:1:2", "output:audio:chunk", vec![7, 7]);
		let wire = frame.encode_server().unwrap();

		match InboundMessage::decode(wire).unwrap() {
			InboundMessage::Event(decoded) => assert_eq!(decoded, frame),
			other => panic!("expected event, got {other:?}"),
		}
	}

	#[test]
	fn client_binary_push_is_readable_by_servers() {
		let frame = Frame::new("pipelines:1:2", "input:block_2:doc", b"%PDF".to_vec()).with_refs(Some("4".into()), Some("9".into()));
		let decoded = Frame::decode_client(frame.encode().unwrap()).unwrap();
		assert_eq!(decoded, frame);
	}

	#[test]
	fn unknown_binary_kind() {
		let err = InboundMessage::decode(WireFrame::Binary(vec![9])).unwrap_err();
		assert!(matches!(err, ProtocolError::UnknownKind(9)));
	}
}
