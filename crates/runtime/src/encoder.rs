//! Converts input values into run channel pushes.
//!
//! Every value is pushed on `input:{block_id}:{input_name}`:
//!
//! - JSON values go out as text frames
//! - each file goes out as one binary frame holding its raw bytes, in the
//!   order given
//! - inputs configured for [`FileDelivery::RestUpload`] upload each file first
//!   and push the returned file record instead

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use runlink_protocol::{Payload, input_topic};
use serde_json::Value;

use crate::config::{self, FileDelivery};
use crate::error::{Error, Result};
use crate::upload::FileUploader;

/// Where a file input's bytes come from.
#[derive(Debug, Clone, PartialEq)]
pub enum FileSource {
	Path(PathBuf),
	Memory { name: String, bytes: Vec<u8> },
}

impl FileSource {
	pub fn path(path: impl Into<PathBuf>) -> Self {
		FileSource::Path(path.into())
	}

	pub fn memory(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
		FileSource::Memory {
			name: name.into(),
			bytes: bytes.into(),
		}
	}

	pub fn file_name(&self) -> String {
		match self {
			FileSource::Path(path) => path
				.file_name()
				.map(|name| name.to_string_lossy().into_owned())
				.unwrap_or_else(|| path.display().to_string()),
			FileSource::Memory { name, .. } => name.clone(),
		}
	}

	/// Loads the whole file.
	pub async fn read(&self) -> Result<Vec<u8>> {
		match self {
			FileSource::Path(path) => tokio::fs::read(path).await.map_err(Error::from),
			FileSource::Memory { bytes, .. } => Ok(bytes.clone()),
		}
	}
}

impl From<PathBuf> for FileSource {
	fn from(path: PathBuf) -> Self {
		FileSource::Path(path)
	}
}

impl From<&Path> for FileSource {
	fn from(path: &Path) -> Self {
		FileSource::Path(path.to_path_buf())
	}
}

/// A value pushed into a block input.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
	Json(Value),
	File(FileSource),
	Files(Vec<FileSource>),
}

impl From<Value> for InputValue {
	fn from(value: Value) -> Self {
		InputValue::Json(value)
	}
}

impl From<FileSource> for InputValue {
	fn from(file: FileSource) -> Self {
		InputValue::File(file)
	}
}

impl From<Vec<FileSource>> for InputValue {
	fn from(files: Vec<FileSource>) -> Self {
		InputValue::Files(files)
	}
}

/// Anything an encoded input can be pushed to.
pub trait PushTarget: Send + Sync {
	fn push(&self, event: &str, payload: Payload) -> Result<()>;
}

#[derive(Default)]
pub struct InputEncoder {
	uploader: Option<Arc<dyn FileUploader>>,
	delivery: HashMap<String, FileDelivery>,
}

impl InputEncoder {
	pub fn new(delivery: HashMap<String, FileDelivery>, uploader: Option<Arc<dyn FileUploader>>) -> Self {
		Self { uploader, delivery }
	}

	async fn encode_file(&self, block_id: &str, file: &FileSource, delivery: FileDelivery) -> Result<Payload> {
		match delivery {
			FileDelivery::Channel => Ok(Payload::Binary(file.read().await?)),
			FileDelivery::RestUpload => {
				let uploader = self
					.uploader
					.as_ref()
					.ok_or_else(|| Error::InvalidConfig(format!("no uploader configured for block '{block_id}'")))?;
				let record = uploader.upload(block_id, file).await?;
				tracing::debug!(block_id, file = %file.file_name(), "file uploaded");
				Ok(Payload::Json(record))
			}
		}
	}

	/// Encodes `value` and pushes it to `target`, one message at a time.
	///
	/// Files are read (or uploaded) one after another, and each is pushed as
	/// soon as it is ready, so a failure part-way leaves the earlier files sent.
	/// Returns the number of messages pushed.
	pub async fn push(&self, target: &dyn PushTarget, block_id: &str, input_name: &str, value: InputValue) -> Result<usize> {
		let topic = input_topic(block_id, input_name);
		let files = match value {
			InputValue::Json(json) => {
				target.push(&topic, json.into())?;
				return Ok(1);
			}
			InputValue::File(file) => vec![file],
			InputValue::Files(files) => files,
		};

		let delivery = config::delivery_for(&self.delivery, block_id, input_name);
		for file in &files {
			let payload = self.encode_file(block_id, file, delivery).await?;
			tracing::trace!(topic = %topic, file = %file.file_name(), binary = payload.is_binary(), "pushing file");
			target.push(&topic, payload)?;
		}
		Ok(files.len())
	}
}
