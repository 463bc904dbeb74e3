use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;

pub use store::*;

mod store;

#[derive(Parser)]
#[command(
	author,
	version,
	about = "Render wiki pages with transclusions and template functions.",
	long_about = "wikit expands `{{> Title}}` transclusion markers in wiki markdown with the \
	              content of other pages, binds `<<name>>` parameters, captures block content \
	              for `{{> @partial-block}}` and evaluates `{{helper|arg}}` template \
	              functions.\n\nPages are read from the `pages` directory of the project, laid \
	              out as `Namespace/Title.md`.\n\nQuick start:\n  wikit render page.md    \
	              Resolve a page\n  wikit markers page.md   List the markers a page contains\n  \
	              wikit eval '1 + 2'      Try a script in the sandbox"
)]
pub struct WikitCli {
	#[command(subcommand)]
	pub command: Option<Commands>,

	/// Path to the project root directory.
	#[arg(long, short, global = true)]
	pub path: Option<PathBuf>,

	/// Enable verbose output.
	#[arg(long, short, global = true, default_value_t = false)]
	pub verbose: bool,

	/// Disable colored output.
	#[arg(long, global = true, default_value_t = false)]
	pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
	/// Resolve every transclusion and template function in a file.
	///
	/// Referenced pages are read from the project's page directory. Markers
	/// that cannot be resolved (missing pages, restricted pages, the depth
	/// limit) are kept as written.
	Render(RenderArgs),
	/// List the transclusion markers in a file.
	///
	/// Shows each valid marker with its position, kind, target title,
	/// parameters and block pairing, followed by the markers that were
	/// rejected and why.
	Markers {
		/// The markdown file to inspect.
		file: PathBuf,

		/// Output format.
		#[arg(long, value_enum, default_value_t = OutputFormat::Text)]
		format: OutputFormat,
	},
	/// Run a script in the sandbox with an empty page context.
	Eval {
		/// The script source.
		script: String,

		/// Run the script as a function body and print its `return` value
		/// instead of evaluating the trailing expression.
		#[arg(long, default_value_t = false)]
		execute: bool,
	},
}

#[derive(Args)]
#[allow(clippy::struct_excessive_bools)]
pub struct RenderArgs {
	/// The markdown file to render.
	pub file: PathBuf,

	/// Title of the page being rendered, e.g. `Help:Intro`. Title helpers
	/// such as `{{pagename}}` report this page.
	#[arg(long)]
	pub title: Option<String>,

	/// Render as a template page.
	#[arg(long, default_value_t = false)]
	pub template: bool,

	/// Render as a preview.
	#[arg(long, default_value_t = false)]
	pub preview: bool,

	/// Render as a talk page.
	#[arg(long, default_value_t = false)]
	pub talk: bool,

	/// A parameter for the page, `name=value` or a bare positional value.
	/// May be repeated.
	#[arg(long = "param", short = 'P')]
	pub params: Vec<String>,

	/// Output format. `json` includes the referenced page titles.
	#[arg(long, value_enum, default_value_t = OutputFormat::Text)]
	pub format: OutputFormat,

	/// Print a unified diff between the source and the rendered page.
	#[arg(long, default_value_t = false)]
	pub diff: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
	Text,
	Json,
}
