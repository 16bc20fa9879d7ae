//! Event names used by pipeline runs.
//!
//! Every block-level message on a run channel is named
//! `{category}:{block_id}[:{name}]`. [`Topic::parse`] turns that string into a
//! tagged value once, so call sites never split strings themselves.

use std::fmt;

/// A parsed block event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic<'a> {
	/// `output:{block_id}:{output_name}`
	Output { block_id: &'a str, output_name: &'a str },
	/// `start:{block_id}`, the block began working.
	Start { block_id: &'a str },
	/// `stop:{block_id}`, the block finished working.
	Stop { block_id: &'a str },
	/// `error:{block_id}`, the block reported execution errors.
	Error { block_id: &'a str },
	/// `input:{block_id}:{input_name}`, only ever sent by clients.
	Input { block_id: &'a str, input_name: &'a str },
	/// Anything else, including malformed names of a known category.
	Unknown,
}

impl<'a> Topic<'a> {
	/// Parses an event name. Never fails: names that do not fit a known shape
	/// become [`Topic::Unknown`].
	///
	/// Segments past the ones a category needs are ignored.
	pub fn parse(event: &'a str) -> Self {
		let mut parts = event.split(':');
		let category = parts.next().unwrap_or_default();
		let block_id = match parts.next() {
			Some(id) if !id.is_empty() => id,
			_ => return Topic::Unknown,
		};
		let name = parts.next().filter(|name| !name.is_empty());

		match (category, name) {
			("output", Some(output_name)) => Topic::Output { block_id, output_name },
			("input", Some(input_name)) => Topic::Input { block_id, input_name },
			("start", _) => Topic::Start { block_id },
			("stop", _) => Topic::Stop { block_id },
			("error", _) => Topic::Error { block_id },
			_ => Topic::Unknown,
		}
	}
}

impl fmt::Display for Topic<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Topic::Output { block_id, output_name } => write!(f, "output:{block_id}:{output_name}"),
			Topic::Start { block_id } => write!(f, "start:{block_id}"),
			Topic::Stop { block_id } => write!(f, "stop:{block_id}"),
			Topic::Error { block_id } => write!(f, "error:{block_id}"),
			Topic::Input { block_id, input_name } => write!(f, "input:{block_id}:{input_name}"),
			Topic::Unknown => f.write_str("unknown"),
		}
	}
}

/// Builds the event name for pushing a value into a block input.
pub fn input_topic(block_id: &str, input_name: &str) -> String {
	Topic::Input { block_id, input_name }.to_string()
}

/// Name of the channel a run lives on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelName(String);

impl ChannelName {
	/// Channel used to start a fresh run of a pipeline.
	pub fn pipeline(organization_id: u64, pipeline_id: u64) -> Self {
		Self(format!("pipelines:{organization_id}:{pipeline_id}"))
	}

	/// Channel used to attach to a run that is already executing.
	pub fn run(organization_id: u64, pipeline_id: u64, run_id: u64) -> Self {
		Self(format!("pipelines:{organization_id}:{pipeline_id}:{run_id}"))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ChannelName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl AsRef<str> for ChannelName {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_output() {
		assert_eq!(
			Topic::parse("output:block_1:result"),
			Topic::Output {
				block_id: "block_1",
				output_name: "result"
			}
		);
	}

	#[test]
	fn parses_start_and_stop() {
		assert_eq!(Topic::parse("start:block_1"), Topic::Start { block_id: "block_1" });
		assert_eq!(Topic::parse("stop:block_1"), Topic::Stop { block_id: "block_1" });
	}

	#[test]
	fn parses_error() {
		assert_eq!(Topic::parse("error:llm"), Topic::Error { block_id: "llm" });
	}

	#[test]
	fn parses_input() {
		assert_eq!(
			Topic::parse("input:block_2:doc"),
			Topic::Input {
				block_id: "block_2",
				input_name: "doc"
			}
		);
	}

	#[test]
	fn unknown_prefix() {
		assert_eq!(Topic::parse("foo:bar"), Topic::Unknown);
		assert_eq!(Topic::parse(""), Topic::Unknown);
		assert_eq!(Topic::parse("phx_reply"), Topic::Unknown);
	}

	#[test]
	fn output_without_name_is_unknown() {
		assert_eq!(Topic::parse("output:block_1"), Topic::Unknown);
		assert_eq!(Topic::parse("output:block_1:"), Topic::Unknown);
		assert_eq!(Topic::parse("start:"), Topic::Unknown);
	}

	#[test]
	fn extra_segments_are_ignored() {
		assert_eq!(
			Topic::parse("output:a:b:c"),
			Topic::Output {
				block_id: "a",
				output_name: "b"
			}
		);
	}

	#[test]
	fn input_topic_format() {
		assert_eq!(input_topic("block_2", "doc"), "input:block_2:doc");
	}

	#[test]
	fn channel_names() {
		assert_eq!(ChannelName::pipeline(3, 14).as_str(), "pipelines:3:14");
		assert_eq!(ChannelName::run(3, 14, 159).to_string(), "pipelines:3:14:159");
	}
}
