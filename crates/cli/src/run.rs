//! The `run` and `join` commands.

use std::io::Write;
use std::time::Duration;

use anyhow::Context;
use runlink::{AuthMode, FileDelivery, FileSource, JoinArgs, RunEvent, RunHandlers, RunSession, RunStatus, SessionConfig, StartArgs};
use serde_json::{Map, Value};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::cli::{Cli, Commands, RunCommand};
use crate::error::{CliError, Result};
use crate::inputs::{FileAssignment, InputAssignment};
use crate::output::write_event;

/// What to do once the session exists.
#[derive(Debug)]
pub enum Launch {
	Start {
		args: StartArgs,
		inputs: Vec<InputAssignment>,
		files: Vec<FileAssignment>,
	},
	Join(JoinArgs),
}

#[derive(Debug)]
pub struct Plan {
	pub launch: Launch,
	/// Inactivity window after which the run is stopped.
	pub wait: Duration,
}

impl Plan {
	pub fn from_command(command: &Commands) -> Result<Self> {
		let wait = Duration::from_secs(command.pipeline().wait);
		let launch = match command {
			Commands::Run(cmd) => Launch::Start {
				args: start_args(cmd)?,
				inputs: cmd.inputs.clone(),
				files: cmd.files.clone(),
			},
			Commands::Join(cmd) => Launch::Join(JoinArgs { run_id: cmd.run_id }),
		};
		Ok(Self { launch, wait })
	}
}

fn start_args(cmd: &RunCommand) -> Result<StartArgs> {
	let mut metadata = match &cmd.metadata {
		Some(raw) => match serde_json::from_str::<Value>(raw).context("--metadata must be valid JSON")? {
			Value::Object(map) => map,
			other => return Err(CliError::InvalidArgument(format!("--metadata must be a JSON object, got {other}"))),
		},
		None => Map::new(),
	};
	metadata.entry("interface").or_insert_with(|| Value::String("cli".to_string()));

	Ok(StartArgs {
		initial_inputs: Vec::new(),
		metadata,
		alias: cmd.alias.clone(),
	})
}

pub fn session_config(cli: &Cli) -> Result<SessionConfig> {
	let pipeline = cli.command.pipeline();
	let mut builder = SessionConfig::builder(&cli.endpoint, pipeline.organization_id, pipeline.pipeline_id)
		.auth(if cli.open { AuthMode::Open } else { AuthMode::Token })
		.heartbeat_interval(Duration::from_secs(cli.heartbeat));
	if let Some(api_url) = &cli.api_url {
		builder = builder.api_url(api_url);
	}
	if let Commands::Run(cmd) = &cli.command {
		for upload in &cmd.uploads {
			builder = builder.file_delivery(&upload.block_id, &upload.input_name, FileDelivery::RestUpload);
		}
	}
	Ok(builder.build()?)
}

pub async fn execute(cli: Cli) -> Result<()> {
	let config = session_config(&cli)?;
	let plan = Plan::from_command(&cli.command)?;
	let (handlers, events) = RunHandlers::channel();
	let session = RunSession::from_config(config, handlers, cli.token.clone())?;
	tracing::info!(socket_id = session.socket_id(), "session created");

	drive(&session, events, plan, &mut std::io::stdout()).await
}

/// Runs `plan` on `session`, writing every event to `out` until the run goes
/// quiet for `plan.wait`, fails, or the user interrupts.
pub async fn drive(session: &RunSession, mut events: UnboundedReceiver<RunEvent>, plan: Plan, out: &mut impl Write) -> Result<()> {
	let result = match plan.launch {
		Launch::Start { args, inputs, files } => {
			session.start_run(args).await;
			match ensure_running(session, &mut events, out) {
				Ok(()) => push_inputs(session, inputs, files).await,
				Err(e) => Err(e),
			}
		}
		Launch::Join(args) => {
			session.join_run(args).await;
			ensure_running(session, &mut events, out)
		}
	};

	let result = match result {
		Ok(()) => stream(&mut events, plan.wait, out).await,
		Err(e) => Err(e),
	};

	session.close();
	while let Ok(event) = events.try_recv() {
		write_event(out, &event)?;
	}
	result
}

/// Flushes the events of the start attempt and checks it succeeded.
fn ensure_running(session: &RunSession, events: &mut UnboundedReceiver<RunEvent>, out: &mut impl Write) -> Result<()> {
	let mut failure = None;
	while let Ok(event) = events.try_recv() {
		write_event(out, &event)?;
		if let RunEvent::Error { message } = event {
			failure = Some(message);
		}
	}
	if session.status() == RunStatus::Running {
		return Ok(());
	}
	Err(CliError::RunFailed(failure.unwrap_or_else(|| "run did not start".to_string())))
}

async fn push_inputs(session: &RunSession, inputs: Vec<InputAssignment>, files: Vec<FileAssignment>) -> Result<()> {
	for input in inputs {
		session.push(&input.target.block_id, &input.target.input_name, input.value).await?;
	}
	for file in files {
		let target = file.target.to_string();
		session
			.push(&file.target.block_id, &file.target.input_name, FileSource::Path(file.path))
			.await
			.with_context(|| format!("pushing file into {target}"))?;
	}
	Ok(())
}

async fn stream(events: &mut UnboundedReceiver<RunEvent>, wait: Duration, out: &mut impl Write) -> Result<()> {
	let ctrl_c = tokio::signal::ctrl_c();
	tokio::pin!(ctrl_c);

	loop {
		tokio::select! {
			_ = &mut ctrl_c => {
				tracing::info!("interrupted, stopping run");
				return Ok(());
			}
			next = tokio::time::timeout(wait, events.recv()) => match next {
				Err(_) => {
					tracing::info!(secs = wait.as_secs_f64(), "no events, stopping run");
					return Ok(());
				}
				Ok(None) => return Ok(()),
				Ok(Some(event)) => {
					write_event(out, &event)?;
					if let RunEvent::Error { message } = event {
						return Err(CliError::RunFailed(message));
					}
				}
			}
		}
	}
}
