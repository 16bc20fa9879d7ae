//! Callbacks through which a session reports to its host.
//!
//! All five callbacks are required. [`RunHandlersBuilder::build`] names the
//! first one that is missing instead of quietly substituting a no-op.

use std::fmt;
use std::sync::Arc;

use runlink_protocol::{Payload, RunStatus};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// `(block_id, output_name, payload, metadata)`
pub type BlockOutputFn = dyn Fn(&str, &str, &Payload, Option<&Value>) + Send + Sync;
/// `(block_id, is_working)`
pub type BlockStatusFn = dyn Fn(&str, bool) + Send + Sync;
/// `(block_id, errors)`
pub type BlockErrorFn = dyn Fn(&str, &[String]) + Send + Sync;
pub type ErrorFn = dyn Fn(&str) + Send + Sync;
pub type StatusFn = dyn Fn(RunStatus) + Send + Sync;
pub type WarningFn = dyn Fn(&str) + Send + Sync;

#[derive(Clone)]
pub struct RunHandlers {
	/// A block produced a value on one of its outputs.
	pub on_block_output: Arc<BlockOutputFn>,
	/// A block started (`true`) or stopped (`false`) working.
	pub on_block_status_change: Arc<BlockStatusFn>,
	/// A block reported execution errors. The run keeps going.
	pub on_block_error: Arc<BlockErrorFn>,
	/// The run attempt ended because of a connection or join failure.
	pub on_error: Arc<ErrorFn>,
	/// The session moved between `idle`, `starting` and `running`.
	pub on_status_change: Arc<StatusFn>,
	/// User-facing notice for misuse, such as pushing before the run started.
	/// Always logged; forwarded here when set.
	pub on_warning: Option<Arc<WarningFn>>,
}

impl fmt::Debug for RunHandlers {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RunHandlers").field("on_warning", &self.on_warning.is_some()).finish_non_exhaustive()
	}
}

impl RunHandlers {
	pub fn builder() -> RunHandlersBuilder {
		RunHandlersBuilder::default()
	}

	/// Handlers that forward every callback as a [`RunEvent`] on a channel.
	pub fn channel() -> (RunHandlers, mpsc::UnboundedReceiver<RunEvent>) {
		let (tx, rx) = mpsc::unbounded_channel();

		let output_tx = tx.clone();
		let status_tx = tx.clone();
		let block_error_tx = tx.clone();
		let error_tx = tx.clone();
		let run_status_tx = tx.clone();
		let warning_tx = tx;

		let handlers = RunHandlers {
			on_block_output: Arc::new(move |block_id: &str, output_name: &str, payload: &Payload, metadata: Option<&Value>| {
				let _ = output_tx.send(RunEvent::BlockOutput {
					block_id: block_id.to_string(),
					output_name: output_name.to_string(),
					payload: payload.clone(),
					metadata: metadata.cloned(),
				});
			}),
			on_block_status_change: Arc::new(move |block_id: &str, is_working: bool| {
				let _ = status_tx.send(RunEvent::BlockStatus {
					block_id: block_id.to_string(),
					is_working,
				});
			}),
			on_block_error: Arc::new(move |block_id: &str, errors: &[String]| {
				let _ = block_error_tx.send(RunEvent::BlockError {
					block_id: block_id.to_string(),
					errors: errors.to_vec(),
				});
			}),
			on_error: Arc::new(move |message: &str| {
				let _ = error_tx.send(RunEvent::Error { message: message.to_string() });
			}),
			on_status_change: Arc::new(move |status: RunStatus| {
				let _ = run_status_tx.send(RunEvent::Status { status });
			}),
			on_warning: Some(Arc::new(move |message: &str| {
				let _ = warning_tx.send(RunEvent::Warning { message: message.to_string() });
			})),
		};
		(handlers, rx)
	}
}

/// One callback invocation, as delivered by [`RunHandlers::channel`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
	BlockOutput {
		block_id: String,
		output_name: String,
		#[serde(skip)]
		payload: Payload,
		metadata: Option<Value>,
	},
	BlockStatus {
		block_id: String,
		is_working: bool,
	},
	BlockError {
		block_id: String,
		errors: Vec<String>,
	},
	Error {
		message: String,
	},
	Status {
		status: RunStatus,
	},
	Warning {
		message: String,
	},
}

#[derive(Default)]
pub struct RunHandlersBuilder {
	on_block_output: Option<Arc<BlockOutputFn>>,
	on_block_status_change: Option<Arc<BlockStatusFn>>,
	on_block_error: Option<Arc<BlockErrorFn>>,
	on_error: Option<Arc<ErrorFn>>,
	on_status_change: Option<Arc<StatusFn>>,
	on_warning: Option<Arc<WarningFn>>,
}

impl RunHandlersBuilder {
	pub fn on_block_output(mut self, f: impl Fn(&str, &str, &Payload, Option<&Value>) + Send + Sync + 'static) -> Self {
		self.on_block_output = Some(Arc::new(f));
		self
	}

	pub fn on_block_status_change(mut self, f: impl Fn(&str, bool) + Send + Sync + 'static) -> Self {
		self.on_block_status_change = Some(Arc::new(f));
		self
	}

	pub fn on_block_error(mut self, f: impl Fn(&str, &[String]) + Send + Sync + 'static) -> Self {
		self.on_block_error = Some(Arc::new(f));
		self
	}

	pub fn on_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
		self.on_error = Some(Arc::new(f));
		self
	}

	pub fn on_status_change(mut self, f: impl Fn(RunStatus) + Send + Sync + 'static) -> Self {
		self.on_status_change = Some(Arc::new(f));
		self
	}

	pub fn on_warning(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
		self.on_warning = Some(Arc::new(f));
		self
	}

	pub fn build(self) -> Result<RunHandlers> {
		fn required<T: ?Sized>(value: Option<Arc<T>>, name: &str) -> Result<Arc<T>> {
			value.ok_or_else(|| Error::InvalidConfig(format!("missing handler: {name}")))
		}

		Ok(RunHandlers {
			on_block_output: required(self.on_block_output, "on_block_output")?,
			on_block_status_change: required(self.on_block_status_change, "on_block_status_change")?,
			on_block_error: required(self.on_block_error, "on_block_error")?,
			on_error: required(self.on_error, "on_error")?,
			on_status_change: required(self.on_status_change, "on_status_change")?,
			on_warning: self.on_warning,
		})
	}
}
