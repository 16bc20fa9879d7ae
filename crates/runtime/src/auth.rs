//! Channel join authorization.

use async_trait::async_trait;
use runlink_protocol::{ChannelAuth, ChannelAuthRequest};
use url::Url;

use crate::config::{self, SessionConfig};
use crate::error::{Error, Result};

/// Fetches the fields a channel join must carry.
#[async_trait]
pub trait ChannelAuthorizer: Send + Sync {
	async fn authorize(&self, request: &ChannelAuthRequest) -> Result<ChannelAuth>;
}

/// Authorizes joins through `POST {api_url}/channel_auth`.
#[derive(Debug, Clone)]
pub struct HttpAuthorizer {
	client: reqwest::Client,
	endpoint: Url,
	token: Option<String>,
}

impl HttpAuthorizer {
	/// `token` is sent as a bearer token when present.
	pub fn new(api_url: &Url, token: Option<String>) -> Result<Self> {
		Ok(Self {
			client: reqwest::Client::new(),
			endpoint: config::api_endpoint(api_url, "channel_auth")?,
			token,
		})
	}

	pub fn from_config(config: &SessionConfig, token: Option<String>) -> Result<Self> {
		let api_url = config
			.api_url
			.as_ref()
			.ok_or_else(|| Error::InvalidConfig("api_url is required for channel authorization".to_string()))?;
		Self::new(api_url, token)
	}
}

#[async_trait]
impl ChannelAuthorizer for HttpAuthorizer {
	async fn authorize(&self, request: &ChannelAuthRequest) -> Result<ChannelAuth> {
		tracing::debug!(channel = %request.channel_name, "requesting channel token");

		let mut builder = self.client.post(self.endpoint.clone()).json(request);
		if let Some(token) = &self.token {
			builder = builder.bearer_auth(token);
		}

		let response = builder.send().await.map_err(|e| Error::Auth(e.to_string()))?;
		let status = response.status();
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(Error::Auth(format!("{status}: {body}")));
		}
		response.json::<ChannelAuth>().await.map_err(|e| Error::Auth(format!("invalid response: {e}")))
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;
	use wiremock::matchers::{body_json, header, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	use super::*;

	fn request() -> ChannelAuthRequest {
		ChannelAuthRequest {
			socket_id: "sock-1".into(),
			channel_name: "pipelines:1:2".into(),
		}
	}

	fn api_url(server: &MockServer) -> Url {
		Url::parse(&format!("{}/api", server.uri())).unwrap()
	}

	#[tokio::test]
	async fn posts_socket_and_channel() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/api/channel_auth"))
			.and(header("authorization", "Bearer secret"))
			.and(body_json(json!({"socket_id": "sock-1", "channel_name": "pipelines:1:2"})))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "signed"})))
			.expect(1)
			.mount(&server)
			.await;

		let authorizer = HttpAuthorizer::new(&api_url(&server), Some("secret".into())).unwrap();
		let auth = authorizer.authorize(&request()).await.unwrap();
		assert_eq!(auth.0.get("token"), Some(&json!("signed")));
	}

	#[tokio::test]
	async fn non_success_status_is_auth_error() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/api/channel_auth"))
			.respond_with(ResponseTemplate::new(403).set_body_json(json!({"errors": "forbidden"})))
			.expect(1)
			.mount(&server)
			.await;

		let authorizer = HttpAuthorizer::new(&api_url(&server), None).unwrap();
		let err = authorizer.authorize(&request()).await.unwrap_err();
		assert!(matches!(err, Error::Auth(ref message) if message.contains("403") && message.contains("forbidden")));

		let received = server.received_requests().await.unwrap();
		assert!(received[0].headers.get("authorization").is_none());
	}

	#[tokio::test]
	async fn malformed_response_is_auth_error() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/api/channel_auth"))
			.respond_with(ResponseTemplate::new(200).set_body_string("not json"))
			.mount(&server)
			.await;

		let authorizer = HttpAuthorizer::new(&api_url(&server), None).unwrap();
		let err = authorizer.authorize(&request()).await.unwrap_err();
		assert!(matches!(err, Error::Auth(ref message) if message.starts_with("invalid response")));
	}

	#[test]
	fn from_config_requires_api_url() {
		let config = SessionConfig::builder("ws://localhost/socket", 1, 2).auth(crate::config::AuthMode::Open).build().unwrap();
		assert!(HttpAuthorizer::from_config(&config, None).is_err());
	}
}
