
use clap::{Args, Parser, Subcommand};

use crate::inputs::{FileAssignment, InputAssignment, InputRef};
use crate::styles::cli_styles;

#[derive(Parser, Debug)]
#[command(name = "runlink")]
#[command(about = "Start, join and feed pipeline runs from the terminal")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Realtime socket endpoint, for example wss://host/super-api/socket
	#[arg(long, env = "RUNLINK_ENDPOINT", value_name = "URL")]
	pub endpoint: String,

	/// REST base URL used for channel tokens and file uploads
	#[arg(long, env = "RUNLINK_API_URL", value_name = "URL")]
	pub api_url: Option<String>,

	/// Bearer token for the REST API
	#[arg(long, env = "RUNLINK_TOKEN", hide_env_values = true, value_name = "TOKEN")]
	pub token: Option<String>,

	/// Join channels without requesting a channel token
	#[arg(long)]
	pub open: bool,

	/// Seconds between socket heartbeats
	#[arg(long, value_name = "SECS", default_value_t = 30)]
	pub heartbeat: u64,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Start a new run, push inputs and stream its events.
	Run(RunCommand),
	/// Attach to a run that is already executing and stream its events.
	Join(JoinCommand),
}

#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
	/// Organization id
	#[arg(long = "org", value_name = "ID")]
	pub organization_id: u64,

	/// Pipeline id
	#[arg(long = "pipeline", value_name = "ID")]
	pub pipeline_id: u64,

	/// Stop after this many seconds without events
	#[arg(long, value_name = "SECS", default_value_t = 30)]
	pub wait: u64,
}

#[derive(Args, Debug, Clone)]
pub struct RunCommand {
	#[command(flatten)]
	pub pipeline: PipelineArgs,

	/// Value for a block input, pushed once the run is up (repeatable)
	#[arg(long = "input", value_name = "BLOCK:INPUT=VALUE")]
	pub inputs: Vec<InputAssignment>,

	/// File for a block input, pushed after the values (repeatable)
	#[arg(long = "file", value_name = "BLOCK:INPUT=PATH")]
	pub files: Vec<FileAssignment>,

	/// Deliver files for this input through REST upload instead of the channel (repeatable)
	#[arg(long = "upload", value_name = "BLOCK:INPUT")]
	pub uploads: Vec<InputRef>,

	/// JSON object sent as run metadata
	#[arg(long, value_name = "JSON")]
	pub metadata: Option<String>,

	/// Human-readable run alias
	#[arg(long, value_name = "NAME")]
	pub alias: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct JoinCommand {
	#[command(flatten)]
	pub pipeline: PipelineArgs,

	/// Id of the run to attach to
	#[arg(long = "run", value_name = "ID")]
	pub run_id: u64,
}

impl Commands {
	pub fn pipeline(&self) -> &PipelineArgs {
		match self {
			Commands::Run(cmd) => &cmd.pipeline,
			Commands::Join(cmd) => &cmd.pipeline,
		}
	}
}
