//! NDJSON rendering of run events.

use std::io::Write;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use runlink::{Payload, RunEvent};
use serde_json::Value;

use crate::error::Result;

/// JSON form of `event`. Block outputs also carry their payload: JSON as
/// `payload`, binary as base64 in `payload_base64`.
pub fn event_json(event: &RunEvent) -> Result<Value> {
	let mut value = serde_json::to_value(event)?;
	if let (RunEvent::BlockOutput { payload, .. }, Value::Object(map)) = (event, &mut value) {
		match payload {
			Payload::Json(json) => {
				map.insert("payload".to_string(), json.clone());
			}
			Payload::Binary(bytes) => {
				map.insert("payload_base64".to_string(), Value::String(STANDARD.encode(bytes)));
			}
		}
	}
	Ok(value)
}

/// Writes `event` as one line and flushes.
pub fn write_event(out: &mut impl Write, event: &RunEvent) -> Result<()> {
	let line = serde_json::to_string(&event_json(event)?)?;
	writeln!(out, "{line}")?;
	out.flush()?;
	Ok(())
}
