//! Parsing of `--input`, `--file` and `--upload` arguments.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde_json::Value;

/// A block input, written `block:input`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRef {
	pub block_id: String,
	pub input_name: String,
}

impl FromStr for InputRef {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (block_id, input_name) = s.split_once(':').ok_or_else(|| format!("expected BLOCK:INPUT, got '{s}'"))?;
		if block_id.is_empty() || input_name.is_empty() || input_name.contains(':') {
			return Err(format!("expected BLOCK:INPUT, got '{s}'"));
		}
		Ok(Self {
			block_id: block_id.to_string(),
			input_name: input_name.to_string(),
		})
	}
}

impl fmt::Display for InputRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.block_id, self.input_name)
	}
}

fn split_assignment(s: &str) -> Result<(InputRef, &str), String> {
	let (target, value) = s.split_once('=').ok_or_else(|| format!("expected BLOCK:INPUT=VALUE, got '{s}'"))?;
	Ok((target.parse()?, value))
}

/// `block:input=value`. The value is read as JSON when it parses, otherwise
/// as a plain string, so `count=3` sends a number and `text=hello` a string.
#[derive(Debug, Clone, PartialEq)]
pub struct InputAssignment {
	pub target: InputRef,
	pub value: Value,
}

impl FromStr for InputAssignment {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (target, raw) = split_assignment(s)?;
		let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
		Ok(Self { target, value })
	}
}

/// `block:input=PATH`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAssignment {
	pub target: InputRef,
	pub path: PathBuf,
}

impl FromStr for FileAssignment {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (target, path) = split_assignment(s)?;
		if path.is_empty() {
			return Err(format!("missing file path in '{s}'"));
		}
		Ok(Self {
			target,
			path: PathBuf::from(path),
		})
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn input_ref_needs_block_and_name() {
		let parsed: InputRef = "llm_1:prompt".parse().unwrap();
		assert_eq!(parsed.block_id, "llm_1");
		assert_eq!(parsed.input_name, "prompt");
		assert_eq!(parsed.to_string(), "llm_1:prompt");

		assert!("llm_1".parse::<InputRef>().is_err());
		assert!(":prompt".parse::<InputRef>().is_err());
		assert!("llm_1:".parse::<InputRef>().is_err());
		assert!("a:b:c".parse::<InputRef>().is_err());
	}

	#[test]
	fn assignment_values_prefer_json() {
		let number: InputAssignment = "calc:count=3".parse().unwrap();
		assert_eq!(number.value, json!(3));

		let object: InputAssignment = r#"form:data={"a":1}"#.parse().unwrap();
		assert_eq!(object.value, json!({"a": 1}));

		let text: InputAssignment = "llm:prompt=hello world".parse().unwrap();
		assert_eq!(text.value, json!("hello world"));
	}

	#[test]
	fn assignment_splits_on_first_equals() {
		let parsed: InputAssignment = "llm:prompt=a=b".parse().unwrap();
		assert_eq!(parsed.target.input_name, "prompt");
		assert_eq!(parsed.value, json!("a=b"));
	}

	#[test]
	fn file_assignment_requires_path() {
		let parsed: FileAssignment = "docs:files=./report.pdf".parse().unwrap();
		assert_eq!(parsed.path, PathBuf::from("./report.pdf"));
		assert!("docs:files=".parse::<FileAssignment>().is_err());
		assert!("docs:files".parse::<FileAssignment>().is_err());
	}
}
