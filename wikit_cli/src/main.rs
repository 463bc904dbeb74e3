use std::path::Path;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use owo_colors::OwoColorize;
use similar::ChangeTag;
use similar::TextDiff;
use tracing_subscriber::EnvFilter;
use wikit_cli::Commands;
use wikit_cli::DirectoryStore;
use wikit_cli::OutputFormat;
use wikit_cli::RenderArgs;
use wikit_cli::WikitCli;
use wikit_core::Engine;
use wikit_core::HelperContext;
use wikit_core::Marker;
use wikit_core::MarkerDiagnostic;
use wikit_core::MarkerTarget;
use wikit_core::PageTitle;
use wikit_core::ParameterValue;
use wikit_core::ScriptMode;
use wikit_core::TranscludeRequest;
use wikit_core::WikiError;
use wikit_core::WikiOptions;
use wikit_core::is_parameter_name;
use wikit_core::line_column;
use wikit_core::run_script;
use wikit_core::scan_markers;
use wikit_core::validate_markers_with_diagnostics;

static USE_COLOR: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

fn color_enabled() -> bool {
	USE_COLOR.load(std::sync::atomic::Ordering::Relaxed)
}

/// Apply ANSI color codes only when color is enabled.
macro_rules! colored {
	($text:expr,red) => {
		if color_enabled() {
			format!("{}", $text.red())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,green) => {
		if color_enabled() {
			format!("{}", $text.green())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,yellow) => {
		if color_enabled() {
			format!("{}", $text.yellow())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,bold) => {
		if color_enabled() {
			format!("{}", $text.bold())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,dimmed) => {
		if color_enabled() {
			format!("{}", $text.dimmed())
		} else {
			format!("{}", $text)
		}
	};
}

type CommandResult = Result<(), Box<dyn std::error::Error>>;

fn main() {
	let args = WikitCli::parse();

	// Respect NO_COLOR, --no-color and terminals without color support.
	let use_color = !args.no_color
		&& std::env::var_os("NO_COLOR").is_none()
		&& supports_color::on(supports_color::Stream::Stdout).is_some();
	if !use_color {
		USE_COLOR.store(false, std::sync::atomic::Ordering::Relaxed);
	}

	init_logging(args.verbose, use_color);

	// Install miette's fancy handler for rich error diagnostics.
	miette::set_hook(Box::new(move |_| {
		Box::new(
			miette::MietteHandlerOpts::new()
				.color(use_color)
				.unicode(use_color)
				.build(),
		)
	}))
	.ok();

	let result = match &args.command {
		Some(Commands::Render(render)) => run_render(&args, render),
		Some(Commands::Markers { file, format }) => run_markers(&args, file, *format),
		Some(Commands::Eval { script, execute }) => run_eval(&args, script, *execute),
		None => {
			eprintln!("No subcommand specified. Run `wikit --help` for usage.");
			process::exit(1);
		}
	};

	if let Err(e) = result {
		// Render wiki errors through miette for codes and help text.
		match e.downcast::<WikiError>() {
			Ok(wiki_err) => {
				let report: miette::Report = (*wiki_err).into();
				eprintln!("{report:?}");
			}
			Err(e) => {
				eprintln!("{} {e}", colored!("error:", red));
			}
		}
		process::exit(2);
	}
}

/// Log to stderr. `RUST_LOG` wins; otherwise `warn`, or `debug` with
/// `--verbose`.
fn init_logging(verbose: bool, use_color: bool) {
	let default_level = if verbose { "debug" } else { "warn" };
	let filter = if verbose {
		EnvFilter::new(default_level)
	} else {
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
	};

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_ansi(use_color)
		.with_target(false)
		.init();
}

fn resolve_root(args: &WikitCli) -> PathBuf {
	args.path
		.clone()
		.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

fn read_source(path: &Path) -> Result<String, WikiError> {
	std::fs::read_to_string(path).map_err(|error| {
		if error.kind() == std::io::ErrorKind::NotFound {
			WikiError::PageNotFound(path.display().to_string())
		} else {
			WikiError::Io(error)
		}
	})
}

fn run_render(args: &WikitCli, render: &RenderArgs) -> CommandResult {
	let root = resolve_root(args);
	let options = WikiOptions::load_or_default(&root)?;
	let source = read_source(&render.file)?;
	let store = DirectoryStore::from_options(&root, &options)?;

	let mut request = TranscludeRequest::new(source.clone())
		.template(render.template)
		.preview(render.preview)
		.talk(render.talk);

	if let Some(title) = &render.title {
		request = request.title(PageTitle::parse(title)?);
	}

	for param in &render.params {
		request = match parse_param(param)? {
			(Some(name), value) => request.parameter(name, value),
			(None, value) => request.argument(value),
		};
	}

	let engine = Engine::new(store);
	let rt = tokio::runtime::Runtime::new()?;
	let result = rt.block_on(engine.transclude(&options, request));

	match render.format {
		OutputFormat::Text if render.diff => print_diff(&source, &result.text),
		OutputFormat::Text => print!("{}", result.text),
		OutputFormat::Json => {
			let transcluded: Vec<String> = result.transcluded.iter().map(ToString::to_string).collect();
			let output = serde_json::json!({
				"text": result.text,
				"transcluded": transcluded,
				"changed": result.text != source,
			});
			println!("{output}");
		}
	}

	Ok(())
}

/// `name=value` binds a named parameter; anything else is positional.
fn parse_param(param: &str) -> Result<(Option<String>, ParameterValue), WikiError> {
	match param.split_once('=') {
		Some((name, value)) if is_parameter_name(name) => {
			Ok((Some(name.to_string()), ParameterValue::parse(value)))
		}
		Some(("", _)) => Err(WikiError::InvalidParameter(param.to_string())),
		_ => Ok((None, ParameterValue::parse(param))),
	}
}

fn print_diff(source: &str, rendered: &str) {
	if source == rendered {
		println!("{}", colored!("no changes", dimmed));
		return;
	}

	let diff = TextDiff::from_lines(source, rendered);
	for change in diff.iter_all_changes() {
		match change.tag() {
			ChangeTag::Delete => print!("{}", colored!(format!("-{change}"), red)),
			ChangeTag::Insert => print!("{}", colored!(format!("+{change}"), green)),
			ChangeTag::Equal => print!(" {change}"),
		}
		if change.missing_newline() {
			println!();
		}
	}
}

fn run_markers(args: &WikitCli, file: &Path, format: OutputFormat) -> CommandResult {
	let root = resolve_root(args);
	let options = WikiOptions::load_or_default(&root)?;
	let source = read_source(file)?;

	let spans = scan_markers(&source);
	let (markers, diagnostics) = validate_markers_with_diagnostics(&source, &spans, &options);

	match format {
		OutputFormat::Text => print_markers(&source, &markers, &diagnostics),
		OutputFormat::Json => {
			let entries: Vec<serde_json::Value> = markers
				.iter()
				.map(|marker| {
					let (line, column) = line_column(&source, marker.span.start);
					let partner = marker.partner.map(|partner| {
						let (line, column) = line_column(&source, markers[partner].span.start);
						serde_json::json!({ "line": line, "column": column })
					});
					serde_json::json!({
						"line": line,
						"column": column,
						"kind": marker.kind(),
						"name": marker.name,
						"target": target_label(marker),
						"parameters": marker.parameters_text(&source),
						"partner": partner,
					})
				})
				.collect();
			let diagnostic_entries: Vec<serde_json::Value> = diagnostics
				.iter()
				.map(|diagnostic| {
					let (line, column) = line_column(&source, diagnostic.start());
					serde_json::json!({
						"line": line,
						"column": column,
						"message": diagnostic.to_string(),
						"detail": diagnostic,
					})
				})
				.collect();
			let output = serde_json::json!({
				"markers": entries,
				"diagnostics": diagnostic_entries,
			});
			println!("{output}");
		}
	}

	Ok(())
}

fn target_label(marker: &Marker) -> String {
	match &marker.target {
		MarkerTarget::Page(title) => title.to_string(),
		MarkerTarget::PartialBlock => "@partial-block".to_string(),
	}
}

fn print_markers(source: &str, markers: &[Marker], diagnostics: &[MarkerDiagnostic]) {
	if markers.is_empty() {
		println!("{}", colored!("No markers found.", dimmed));
	}

	for marker in markers {
		let (line, column) = line_column(source, marker.span.start);
		let position = format!("{line}:{column}");
		let kind = format!("{:<9}", marker.kind().to_string());
		let mut entry = format!(
			"{position:<8} {} {}",
			colored!(kind, bold),
			target_label(marker)
		);

		let parameters = marker.parameters_text(source);
		if !parameters.is_empty() {
			entry.push_str(&format!("  {}", colored!(parameters, dimmed)));
		}

		if let Some(partner) = marker.partner {
			let (line, column) = line_column(source, markers[partner].span.start);
			entry.push_str(&format!("  (closes at {line}:{column})"));
		}

		println!("{entry}");
	}

	for diagnostic in diagnostics {
		let (line, column) = line_column(source, diagnostic.start());
		eprintln!(
			"{} {line}:{column} {diagnostic}",
			colored!("warning:", yellow)
		);
	}
}

fn run_eval(args: &WikitCli, script: &str, execute: bool) -> CommandResult {
	let root = resolve_root(args);
	let options = WikiOptions::load_or_default(&root)?;
	let mode = if execute {
		ScriptMode::Execute
	} else {
		ScriptMode::Evaluate
	};

	let limits = options.script;
	let context = HelperContext::new(options);
	println!("{}", run_script(script, mode, &context, &limits));

	Ok(())
}
