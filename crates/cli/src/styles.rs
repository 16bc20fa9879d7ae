//! Help and usage-error colors.

use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Effects};

/// Yellow section headers, green commands and flags, and red argument errors
/// so a rejected `--input` stands out from the help around it.
pub fn cli_styles() -> Styles {
	let flag = AnsiColor::Green.on_default();
	Styles::styled()
		.header(AnsiColor::Yellow.on_default().effects(Effects::BOLD | Effects::UNDERLINE))
		.usage(AnsiColor::Yellow.on_default().bold())
		.literal(flag.bold())
		.placeholder(AnsiColor::BrightBlack.on_default().italic())
		.valid(flag)
		.invalid(AnsiColor::Red.on_default().bold())
		.error(AnsiColor::Red.on_default().bold())
}
