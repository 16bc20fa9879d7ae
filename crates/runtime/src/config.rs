//! Session configuration.
//!
//! [`SessionConfig`] is built through [`SessionConfigBuilder`], which validates
//! everything up front so a session never starts with a half-usable setup.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Protocol version appended to the socket URL.
const SERIALIZER_VSN: &str = "2.0.0";

/// How channel joins are authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
	/// Join without a token.
	Open,
	/// Fetch a token from `/channel_auth` before every join.
	#[default]
	Token,
}

/// How file-type inputs reach the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileDelivery {
	/// Raw bytes pushed as binary frames on the run channel.
	#[default]
	Channel,
	/// Multipart upload over REST, then the returned file record is pushed.
	RestUpload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
	/// Socket endpoint, for example `wss://host/super-api/socket`.
	pub endpoint: Url,
	/// REST base URL, for example `https://host/super-api`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub api_url: Option<Url>,
	pub organization_id: u64,
	pub pipeline_id: u64,
	#[serde(default)]
	pub auth: AuthMode,
	#[serde(default = "default_heartbeat_ms")]
	pub heartbeat_interval_ms: u64,
	#[serde(default = "default_join_timeout_ms")]
	pub join_timeout_ms: u64,
	/// Delivery policy per `{block_id}:{input_name}`. Missing entries use [`FileDelivery::Channel`].
	#[serde(default)]
	pub file_delivery: HashMap<String, FileDelivery>,
}

fn default_heartbeat_ms() -> u64 {
	DEFAULT_HEARTBEAT_INTERVAL.as_millis() as u64
}

fn default_join_timeout_ms() -> u64 {
	DEFAULT_JOIN_TIMEOUT.as_millis() as u64
}

impl SessionConfig {
	pub fn builder(endpoint: &str, organization_id: u64, pipeline_id: u64) -> SessionConfigBuilder {
		SessionConfigBuilder {
			endpoint: endpoint.to_string(),
			api_url: None,
			organization_id,
			pipeline_id,
			auth: AuthMode::default(),
			heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
			join_timeout: DEFAULT_JOIN_TIMEOUT,
			file_delivery: HashMap::new(),
		}
	}

	pub fn heartbeat_interval(&self) -> Duration {
		Duration::from_millis(self.heartbeat_interval_ms)
	}

	pub fn join_timeout(&self) -> Duration {
		Duration::from_millis(self.join_timeout_ms)
	}

	pub fn file_delivery_for(&self, block_id: &str, input_name: &str) -> FileDelivery {
		delivery_for(&self.file_delivery, block_id, input_name)
	}

	pub fn uses_rest_upload(&self) -> bool {
		self.file_delivery.values().any(|delivery| *delivery == FileDelivery::RestUpload)
	}

	/// Full websocket URL for a socket identified by `socket_id`.
	///
	/// `http(s)` endpoints are rewritten to `ws(s)` and `/websocket` is appended
	/// to the path, keeping any query parameters already present.
	pub fn socket_url(&self, socket_id: &str) -> Result<Url> {
		let mut url = self.endpoint.clone();
		let scheme = match url.scheme() {
			"http" | "ws" => "ws",
			"https" | "wss" => "wss",
			other => return Err(Error::InvalidConfig(format!("unsupported endpoint scheme '{other}'"))),
		};
		url.set_scheme(scheme)
			.map_err(|_| Error::InvalidConfig(format!("cannot use scheme '{scheme}' for {}", self.endpoint)))?;

		let path = format!("{}/websocket", url.path().trim_end_matches('/'));
		url.set_path(&path);
		url.query_pairs_mut().append_pair("vsn", SERIALIZER_VSN).append_pair("id", socket_id);
		Ok(url)
	}

	/// Joins a REST path onto `api_url`.
	pub fn api_endpoint(&self, path: &str) -> Result<Url> {
		let base = self
			.api_url
			.as_ref()
			.ok_or_else(|| Error::InvalidConfig("api_url is required for REST calls".to_string()))?;
		api_endpoint(base, path)
	}

	/// Checks the invariants [`SessionConfigBuilder::build`] enforces. Configs
	/// read through serde are checked again when a session is built from them.
	pub fn validate(&self) -> Result<()> {
		if self.organization_id == 0 {
			return Err(Error::InvalidConfig("organization_id must be set".to_string()));
		}
		if self.pipeline_id == 0 {
			return Err(Error::InvalidConfig("pipeline_id must be set".to_string()));
		}
		if !matches!(self.endpoint.scheme(), "ws" | "wss" | "http" | "https") {
			return Err(Error::InvalidConfig(format!("unsupported endpoint scheme '{}'", self.endpoint.scheme())));
		}
		if self.heartbeat_interval_ms == 0 {
			return Err(Error::InvalidConfig("heartbeat interval must be positive".to_string()));
		}
		if self.join_timeout_ms == 0 {
			return Err(Error::InvalidConfig("join timeout must be positive".to_string()));
		}
		if self.api_url.is_none() {
			if self.auth == AuthMode::Token {
				return Err(Error::InvalidConfig("api_url is required when auth mode is token".to_string()));
			}
			if self.uses_rest_upload() {
				return Err(Error::InvalidConfig("api_url is required for REST file uploads".to_string()));
			}
		}
		Ok(())
	}
}

/// Delivery policy for `block_id:input_name` in `table`, defaulting to the channel.
pub(crate) fn delivery_for(table: &HashMap<String, FileDelivery>, block_id: &str, input_name: &str) -> FileDelivery {
	table.get(&format!("{block_id}:{input_name}")).copied().unwrap_or_default()
}

pub(crate) fn api_endpoint(base: &Url, path: &str) -> Result<Url> {
	let joined = format!("{}/{}", base.as_str().trim_end_matches('/'), path.trim_start_matches('/'));
	Url::parse(&joined).map_err(|e| Error::InvalidConfig(format!("invalid API URL '{joined}': {e}")))
}

pub struct SessionConfigBuilder {
	endpoint: String,
	api_url: Option<String>,
	organization_id: u64,
	pipeline_id: u64,
	auth: AuthMode,
	heartbeat_interval: Duration,
	join_timeout: Duration,
	file_delivery: HashMap<String, FileDelivery>,
}

impl SessionConfigBuilder {
	pub fn api_url(mut self, api_url: &str) -> Self {
		self.api_url = Some(api_url.to_string());
		self
	}

	pub fn auth(mut self, auth: AuthMode) -> Self {
		self.auth = auth;
		self
	}

	pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
		self.heartbeat_interval = interval;
		self
	}

	pub fn join_timeout(mut self, timeout: Duration) -> Self {
		self.join_timeout = timeout;
		self
	}

	pub fn file_delivery(mut self, block_id: &str, input_name: &str, delivery: FileDelivery) -> Self {
		self.file_delivery.insert(format!("{block_id}:{input_name}"), delivery);
		self
	}

	pub fn build(self) -> Result<SessionConfig> {
		let endpoint = Url::parse(&self.endpoint).map_err(|e| Error::InvalidConfig(format!("invalid endpoint '{}': {e}", self.endpoint)))?;
		let api_url = self
			.api_url
			.map(|raw| Url::parse(&raw).map_err(|e| Error::InvalidConfig(format!("invalid api_url '{raw}': {e}"))))
			.transpose()?;

		let config = SessionConfig {
			endpoint,
			api_url,
			organization_id: self.organization_id,
			pipeline_id: self.pipeline_id,
			auth: self.auth,
			heartbeat_interval_ms: self.heartbeat_interval.as_millis() as u64,
			join_timeout_ms: self.join_timeout.as_millis() as u64,
			file_delivery: self.file_delivery,
		};
		config.validate()?;
		Ok(config)
	}
}
