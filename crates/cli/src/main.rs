use clap::Parser;
use runlink_cli::cli::Cli;
use runlink_cli::{logging, run};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	if let Err(err) = run::execute(cli).await {
		eprintln!("error: {err}");
		std::process::exit(1);
	}
}
