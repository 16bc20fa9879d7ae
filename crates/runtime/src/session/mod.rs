//! The run session state machine.
//!
//! A [`RunSession`] owns one socket and at most one joined run channel. Its
//! status moves `idle -> starting -> running` and falls back to `idle` when the
//! host stops the run or the attempt fails. Each start or join is tagged with an
//! attempt number; results that arrive for an attempt that is no longer current
//! are discarded, so a late join reply can never revive a stopped run.


use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use runlink_protocol::{ChannelAuth, ChannelAuthRequest, ChannelName, ConnectionStatus, JoinArgs, RunStatus, StartArgs};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::auth::{ChannelAuthorizer, HttpAuthorizer};
use crate::channel::{JoinOutcome, RunChannel};
use crate::config::{AuthMode, SessionConfig};
use crate::connection::{ChannelEvent, Connection};
use crate::encoder::{InputEncoder, InputValue};
use crate::error::{Error, Result};
use crate::handlers::RunHandlers;
use crate::router::MessageRouter;
use crate::transport::{Connector, WebSocketConnector};
use crate::upload::{FileUploader, MemoryUploader};

/// Shown when inputs are pushed before the run is up.
const NOT_RUNNING_WARNING: &str = "Start process first";

enum Launch {
	Start(StartArgs),
	Join(JoinArgs),
}

struct ActiveRun {
	channel: Arc<RunChannel>,
	pump: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct State {
	status: RunStatus,
	run: Option<ActiveRun>,
	run_id: Option<u64>,
}

struct Inner {
	config: SessionConfig,
	handlers: RunHandlers,
	router: MessageRouter,
	encoder: InputEncoder,
	authorizer: Option<Arc<dyn ChannelAuthorizer>>,
	connection: Arc<Connection>,
	state: Mutex<State>,
	/// Bumped, under the state lock, whenever a new attempt begins or the current one is stopped.
	attempt: AtomicU64,
	closed: AtomicBool,
}

/// Client side of one pipeline run.
pub struct RunSession {
	inner: Arc<Inner>,
}

impl RunSession {
	pub fn builder(config: SessionConfig, handlers: RunHandlers) -> RunSessionBuilder {
		RunSessionBuilder {
			config,
			handlers,
			connector: None,
			authorizer: None,
			uploader: None,
		}
	}

	/// Session with the HTTP authorizer and uploader its config calls for.
	///
	/// `token` is the bearer token for the REST API.
	pub fn from_config(config: SessionConfig, handlers: RunHandlers, token: Option<String>) -> Result<Self> {
		let mut builder = Self::builder(config.clone(), handlers);
		if config.auth == AuthMode::Token {
			builder = builder.authorizer(Arc::new(HttpAuthorizer::from_config(&config, token.clone())?));
		}
		if config.uses_rest_upload() {
			builder = builder.uploader(Arc::new(MemoryUploader::from_config(&config, token)?));
		}
		builder.build()
	}

	pub fn config(&self) -> &SessionConfig {
		&self.inner.config
	}

	pub fn status(&self) -> RunStatus {
		self.inner.state.lock().status
	}

	/// Id of the run the session is attached to, once running.
	pub fn run_id(&self) -> Option<u64> {
		self.inner.state.lock().run_id
	}

	pub fn socket_id(&self) -> &str {
		self.inner.connection.socket_id()
	}

	pub fn connection_status(&self) -> ConnectionStatus {
		self.inner.connection.status()
	}

	/// Starts a new run of the pipeline.
	///
	/// Does nothing but warn unless the session is idle. Failures are reported
	/// through `on_error`; check [`status`](Self::status) afterwards to see
	/// whether the run came up.
	pub async fn start_run(&self, args: StartArgs) {
		self.inner.begin(Launch::Start(args)).await;
	}

	/// Attaches to a run that is already executing.
	pub async fn join_run(&self, args: JoinArgs) {
		self.inner.begin(Launch::Join(args)).await;
	}

	/// Leaves the run channel and returns to idle. The socket stays open.
	pub fn stop_run(&self) {
		self.inner.stop();
	}

	/// Pushes a value into `block_id`'s `input_name` input.
	///
	/// Returns the number of messages sent: one for JSON values, one per file.
	pub async fn push(&self, block_id: &str, input_name: &str, value: impl Into<InputValue>) -> Result<usize> {
		let channel = {
			let state = self.inner.state.lock();
			if state.status != RunStatus::Running {
				let status = state.status;
				drop(state);
				self.inner.warn(NOT_RUNNING_WARNING);
				return Err(Error::NotRunning(status));
			}
			match &state.run {
				Some(run) => Arc::clone(&run.channel),
				None => {
					debug_assert!(false, "running session without a channel");
					return Err(Error::MissingChannel);
				}
			}
		};

		match self.inner.encoder.push(channel.as_ref(), block_id, input_name, value.into()).await {
			Ok(sent) => {
				tracing::debug!(block_id, input_name, sent, "input pushed");
				Ok(sent)
			}
			Err(e) => {
				tracing::error!(block_id, input_name, error = %e, "input push failed");
				Err(e)
			}
		}
	}

	/// Stops the run and closes the socket. Further calls are no-ops.
	pub fn close(&self) {
		if self.inner.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		self.inner.stop();
		self.inner.connection.disconnect();
	}
}

impl Drop for RunSession {
	fn drop(&mut self) {
		self.close();
	}
}

impl Inner {
	fn is_current(&self, attempt: u64) -> bool {
		self.attempt.load(Ordering::SeqCst) == attempt
	}

	fn notify(&self, status: RunStatus) {
		tracing::debug!(%status, "run status changed");
		(self.handlers.on_status_change)(status);
	}

	fn warn(&self, message: &str) {
		tracing::warn!("{message}");
		if let Some(on_warning) = &self.handlers.on_warning {
			on_warning(message);
		}
	}

	async fn begin(self: &Arc<Self>, launch: Launch) {
		if self.closed.load(Ordering::SeqCst) {
			self.warn("session is closed");
			return;
		}

		let attempt = {
			let mut state = self.state.lock();
			if state.status != RunStatus::Idle {
				let status = state.status;
				drop(state);
				self.warn(&format!("run is already {status}"));
				return;
			}
			state.status = RunStatus::Starting;
			self.attempt.fetch_add(1, Ordering::SeqCst) + 1
		};
		self.notify(RunStatus::Starting);

		if let Err(e) = self.launch(attempt, launch).await {
			self.fail(attempt, &e.to_string());
		}
	}

	async fn launch(self: &Arc<Self>, attempt: u64, launch: Launch) -> Result<()> {
		self.connection.connect().await?;

		let (organization_id, pipeline_id) = (self.config.organization_id, self.config.pipeline_id);
		let name = match &launch {
			Launch::Start(_) => ChannelName::pipeline(organization_id, pipeline_id),
			Launch::Join(args) => ChannelName::run(organization_id, pipeline_id, args.run_id),
		};

		let auth = self.authorize(&name).await?;
		let params = match &launch {
			Launch::Start(args) => auth.start_payload(args),
			Launch::Join(_) => auth.join_payload(),
		};

		let channel = Arc::new(RunChannel::new(name, &self.connection, self.config.join_timeout()));
		{
			let mut state = self.state.lock();
			if !self.is_current(attempt) {
				return Ok(());
			}
			state.run = Some(ActiveRun {
				channel: Arc::clone(&channel),
				pump: None,
			});
		}

		let JoinOutcome::Joined { response, events } = channel.join(params).await? else {
			return Ok(());
		};
		let run_id = match &launch {
			Launch::Start(_) => response.pointer("/run/id").and_then(Value::as_u64),
			Launch::Join(args) => Some(args.run_id),
		};

		{
			let mut state = self.state.lock();
			let owns_channel = state.run.as_ref().is_some_and(|run| Arc::ptr_eq(&run.channel, &channel));
			if !self.is_current(attempt) || !owns_channel {
				drop(state);
				tracing::debug!(topic = %channel.name(), "join completed after the run was stopped");
				channel.leave();
				return Ok(());
			}

			let pump = tokio::spawn(pump(Arc::downgrade(self), attempt, events, self.connection.subscribe()));
			if let Some(run) = state.run.as_mut() {
				run.pump = Some(pump);
			}
			state.run_id = run_id;
			state.status = RunStatus::Running;
		}

		tracing::info!(topic = %channel.name(), ?run_id, "run started");
		self.notify(RunStatus::Running);
		Ok(())
	}

	async fn authorize(&self, name: &ChannelName) -> Result<ChannelAuth> {
		if self.config.auth == AuthMode::Open {
			return Ok(ChannelAuth::default());
		}
		let authorizer = self
			.authorizer
			.as_ref()
			.ok_or_else(|| Error::InvalidConfig("token auth requires an authorizer".to_string()))?;
		authorizer
			.authorize(&ChannelAuthRequest {
				socket_id: self.connection.socket_id().to_string(),
				channel_name: name.to_string(),
			})
			.await
	}

	/// Ends `attempt` with an error. Ignored when the attempt is stale or
	/// already over, so every failure reaches `on_error` at most once.
	fn fail(&self, attempt: u64, message: &str) {
		let run = {
			let mut state = self.state.lock();
			if !self.is_current(attempt) || state.status == RunStatus::Idle {
				return;
			}
			state.status = RunStatus::Idle;
			state.run_id = None;
			state.run.take()
		};

		if let Some(run) = run {
			run.channel.leave();
			if let Some(pump) = run.pump {
				pump.abort();
			}
		}
		tracing::error!(error = message, "run failed");
		self.notify(RunStatus::Idle);
		(self.handlers.on_error)(message);
	}

	fn stop(&self) {
		let (run, changed) = {
			let mut state = self.state.lock();
			self.attempt.fetch_add(1, Ordering::SeqCst);
			let changed = state.status != RunStatus::Idle;
			state.status = RunStatus::Idle;
			state.run_id = None;
			(state.run.take(), changed)
		};

		if let Some(run) = run {
			run.channel.leave();
			if let Some(pump) = run.pump {
				pump.abort();
			}
		}
		if changed {
			tracing::info!("run stopped");
			self.notify(RunStatus::Idle);
		}
	}
}

/// Feeds channel events to the router until the run ends.
async fn pump(inner: Weak<Inner>, attempt: u64, mut events: mpsc::UnboundedReceiver<ChannelEvent>, mut status: watch::Receiver<ConnectionStatus>) {
	if *status.borrow_and_update() != ConnectionStatus::Connected {
		if let Some(inner) = inner.upgrade() {
			lost_connection(&inner, attempt);
		}
		return;
	}

	loop {
		tokio::select! {
			biased;
			event = events.recv() => {
				let Some(inner) = inner.upgrade() else {
					return;
				};
				let Some(event) = event else {
					inner.fail(attempt, "run channel stopped receiving events");
					return;
				};
				match event {
					ChannelEvent::Message { event, payload } => {
						inner.router.route(&event, payload);
					}
					ChannelEvent::Errored => {
						inner.fail(attempt, "run channel crashed");
						return;
					}
					ChannelEvent::Closed => {
						inner.fail(attempt, "run channel closed by server");
						return;
					}
				}
			}
			changed = status.changed() => {
				if changed.is_err() {
					return;
				}
				let current = *status.borrow_and_update();
				if matches!(current, ConnectionStatus::Error | ConnectionStatus::Disconnected) {
					if let Some(inner) = inner.upgrade() {
						lost_connection(&inner, attempt);
					}
					return;
				}
			}
		}
	}
}

fn lost_connection(inner: &Inner, attempt: u64) {
	let reason = inner.connection.last_error().unwrap_or_else(|| "connection lost".to_string());
	inner.fail(attempt, &reason);
}

pub struct RunSessionBuilder {
	config: SessionConfig,
	handlers: RunHandlers,
	connector: Option<Arc<dyn Connector>>,
	authorizer: Option<Arc<dyn ChannelAuthorizer>>,
	uploader: Option<Arc<dyn FileUploader>>,
}

impl RunSessionBuilder {
	/// Socket implementation. Defaults to [`WebSocketConnector`].
	pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
		self.connector = Some(connector);
		self
	}

	pub fn authorizer(mut self, authorizer: Arc<dyn ChannelAuthorizer>) -> Self {
		self.authorizer = Some(authorizer);
		self
	}

	pub fn uploader(mut self, uploader: Arc<dyn FileUploader>) -> Self {
		self.uploader = Some(uploader);
		self
	}

	pub fn build(self) -> Result<RunSession> {
		let Self {
			config,
			handlers,
			connector,
			authorizer,
			uploader,
		} = self;

		config.validate()?;
		if config.auth == AuthMode::Token && authorizer.is_none() {
			return Err(Error::InvalidConfig("token auth requires an authorizer".to_string()));
		}
		if config.uses_rest_upload() && uploader.is_none() {
			return Err(Error::InvalidConfig("REST file delivery requires an uploader".to_string()));
		}

		let socket_id = Uuid::new_v4().to_string();
		let url = config.socket_url(&socket_id)?;
		let connector = connector.unwrap_or_else(|| Arc::new(WebSocketConnector) as Arc<dyn Connector>);
		let connection = Arc::new(Connection::new(url, socket_id, config.heartbeat_interval(), connector));

		Ok(RunSession {
			inner: Arc::new(Inner {
				router: MessageRouter::new(handlers.clone()),
				encoder: InputEncoder::new(config.file_delivery.clone(), uploader),
				config,
				handlers,
				authorizer,
				connection,
				state: Mutex::new(State::default()),
				attempt: AtomicU64::new(0),
				closed: AtomicBool::new(false),
			}),
		})
	}
}
