//! REST upload for file inputs delivered out of band.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use url::Url;

use crate::config::{self, SessionConfig};
use crate::encoder::FileSource;
use crate::error::{Error, Result};

/// Stores a file and returns the record to push in its place.
#[async_trait]
pub trait FileUploader: Send + Sync {
	async fn upload(&self, block_id: &str, file: &FileSource) -> Result<Value>;
}

/// Uploads into the organization's memory collections:
/// `POST {api_url}/organizations/{org}/memories` with the file and a
/// `collection_name` of `{pipeline_id}_{block_id}`.
#[derive(Debug, Clone)]
pub struct MemoryUploader {
	client: reqwest::Client,
	endpoint: Url,
	pipeline_id: u64,
	token: Option<String>,
}

impl MemoryUploader {
	pub fn new(api_url: &Url, organization_id: u64, pipeline_id: u64, token: Option<String>) -> Result<Self> {
		Ok(Self {
			client: reqwest::Client::new(),
			endpoint: config::api_endpoint(api_url, &format!("organizations/{organization_id}/memories"))?,
			pipeline_id,
			token,
		})
	}

	pub fn from_config(config: &SessionConfig, token: Option<String>) -> Result<Self> {
		let api_url = config
			.api_url
			.as_ref()
			.ok_or_else(|| Error::InvalidConfig("api_url is required for file uploads".to_string()))?;
		Self::new(api_url, config.organization_id, config.pipeline_id, token)
	}

	fn collection_name(&self, block_id: &str) -> String {
		format!("{}_{block_id}", self.pipeline_id)
	}
}

#[async_trait]
impl FileUploader for MemoryUploader {
	async fn upload(&self, block_id: &str, file: &FileSource) -> Result<Value> {
		let file_name = file.file_name();
		let bytes = file.read().await?;
		let size = bytes.len();

		let form = Form::new()
			.part("file", Part::bytes(bytes).file_name(file_name.clone()))
			.text("collection_name", self.collection_name(block_id));

		let mut builder = self.client.post(self.endpoint.clone()).multipart(form);
		if let Some(token) = &self.token {
			builder = builder.bearer_auth(token);
		}

		let response = builder.send().await.map_err(|e| Error::Upload(e.to_string()))?;
		let status = response.status();
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(Error::Upload(format!("{file_name}: {status}: {body}")));
		}

		let mut body: Value = response.json().await.map_err(|e| Error::Upload(format!("{file_name}: invalid response: {e}")))?;
		tracing::info!(block_id, file = %file_name, size, "uploaded file");
		Ok(match body.get_mut("data") {
			Some(data) => data.take(),
			None => body,
		})
	}
}
