use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use crate::FunctionLibrary;
use crate::HelperContext;
use crate::Marker;
use crate::MarkerKind;
use crate::MarkerTarget;
use crate::Page;
use crate::PageStore;
use crate::PageTitle;
use crate::ParameterSet;
use crate::ParameterValue;
use crate::WikiOptions;
use crate::parse_parameters;
use crate::scan_markers;
use crate::substitute_placeholders;
use crate::validate_markers;

/// Transclusion depth at which markers stop being expanded.
pub const MAX_TRANSCLUSION_DEPTH: usize = 100;

type ResolveFuture<'a> = Pin<Box<dyn Future<Output = String> + Send + 'a>>;

/// Everything a caller supplies for one top-level resolution.
#[derive(Debug, Clone)]
pub struct TranscludeRequest {
	pub markdown: String,
	/// The page being generated. Title helpers report this page throughout.
	pub title: Option<PageTitle>,
	pub is_template: bool,
	pub is_preview: bool,
	pub is_talk: bool,
	/// Positional parameters, bound to `<<1>>`, `<<2>>`, ...
	pub arguments: Vec<ParameterValue>,
	/// Named parameters.
	pub parameters: BTreeMap<String, ParameterValue>,
	pub cancellation: Option<CancellationToken>,
}

impl TranscludeRequest {
	pub fn new(markdown: impl Into<String>) -> Self {
		Self {
			markdown: markdown.into(),
			title: None,
			is_template: false,
			is_preview: false,
			is_talk: false,
			arguments: Vec::new(),
			parameters: BTreeMap::new(),
			cancellation: None,
		}
	}

	#[must_use]
	pub fn title(mut self, title: PageTitle) -> Self {
		self.title = Some(title);
		self
	}

	#[must_use]
	pub fn template(mut self, is_template: bool) -> Self {
		self.is_template = is_template;
		self
	}

	#[must_use]
	pub fn preview(mut self, is_preview: bool) -> Self {
		self.is_preview = is_preview;
		self
	}

	#[must_use]
	pub fn talk(mut self, is_talk: bool) -> Self {
		self.is_talk = is_talk;
		self
	}

	#[must_use]
	pub fn argument(mut self, value: impl Into<ParameterValue>) -> Self {
		self.arguments.push(value.into());
		self
	}

	#[must_use]
	pub fn parameter(mut self, name: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
		self.parameters.insert(name.into(), value.into());
		self
	}

	#[must_use]
	pub fn cancellation(mut self, token: CancellationToken) -> Self {
		self.cancellation = Some(token);
		self
	}

	fn parameter_set(&self) -> ParameterSet {
		ParameterSet::from_parts(
			self.arguments.iter().cloned(),
			self.parameters
				.iter()
				.map(|(name, value)| (name.clone(), value.clone())),
		)
	}
}

/// The outcome of a top-level resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Transclusion {
	pub text: String,
	/// Every title referenced anywhere in the call tree, including references
	/// that could not be expanded.
	pub transcluded: BTreeSet<PageTitle>,
}

/// State threaded through one top-level call.
#[derive(Debug, Clone)]
pub struct ResolutionContext {
	pub title: Option<PageTitle>,
	pub is_template: bool,
	pub is_preview: bool,
	pub is_talk: bool,
	/// Depth of the text currently being resolved. The top-level text is 0.
	pub depth: usize,
	pub referenced: BTreeSet<PageTitle>,
	pub cancellation: Option<CancellationToken>,
	expansions: usize,
}

impl ResolutionContext {
	fn new(request: &TranscludeRequest) -> Self {
		Self {
			title: request.title.clone(),
			is_template: request.is_template,
			is_preview: request.is_preview,
			is_talk: request.is_talk,
			depth: 0,
			referenced: BTreeSet::new(),
			cancellation: request.cancellation.clone(),
			expansions: 0,
		}
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancellation
			.as_ref()
			.is_some_and(CancellationToken::is_cancelled)
	}

	/// Number of pages expanded so far.
	pub fn expansions(&self) -> usize {
		self.expansions
	}
}

/// Parameters and captured block content visible to the text being resolved.
#[derive(Debug, Clone, Default)]
struct Frame {
	parameters: ParameterSet,
	partial_block: Option<String>,
}

/// Expands transclusion markers against a page store and then evaluates
/// template functions over the result.
pub struct Engine<S> {
	store: S,
	functions: Arc<FunctionLibrary>,
}

impl<S: PageStore> Engine<S> {
	/// An engine using the built-in helpers.
	pub fn new(store: S) -> Self {
		Self::with_library(store, Arc::new(FunctionLibrary::builtin()))
	}

	pub fn with_library(store: S, functions: Arc<FunctionLibrary>) -> Self {
		Self { store, functions }
	}

	pub fn store(&self) -> &S {
		&self.store
	}

	pub fn functions(&self) -> &FunctionLibrary {
		&self.functions
	}

	/// Resolve every marker in the request's markdown, then run the function
	/// pass once over the composed text. Never fails: anything that cannot be
	/// expanded is left as written.
	pub async fn transclude(&self, options: &WikiOptions, request: TranscludeRequest) -> Transclusion {
		let mut context = ResolutionContext::new(&request);
		let frame = Frame {
			parameters: request.parameter_set(),
			partial_block: None,
		};

		let resolved = self
			.resolve_page(&request.markdown, &frame, &mut context, options)
			.await;

		debug!(
			expansions = context.expansions,
			referenced = context.referenced.len(),
			"markers resolved"
		);

		let helper_context = HelperContext {
			title: request.title,
			is_template: request.is_template,
			is_preview: request.is_preview,
			is_talk: request.is_talk,
			parameters: frame.parameters,
			options: options.clone(),
			cancellation: request.cancellation,
		};
		let text = self.functions.render(&resolved, helper_context);

		Transclusion {
			text,
			transcluded: context.referenced,
		}
	}

	/// Substitute placeholders, then resolve markers.
	fn resolve_page<'a>(
		&'a self,
		markdown: &'a str,
		frame: &'a Frame,
		context: &'a mut ResolutionContext,
		options: &'a WikiOptions,
	) -> ResolveFuture<'a> {
		Box::pin(async move {
			let substituted =
				substitute_placeholders(markdown, &frame.parameters, frame.partial_block.as_deref());
			self.resolve_markers(&substituted, frame, context, options)
				.await
		})
	}

	fn resolve_markers<'a>(
		&'a self,
		source: &'a str,
		frame: &'a Frame,
		context: &'a mut ResolutionContext,
		options: &'a WikiOptions,
	) -> ResolveFuture<'a> {
		Box::pin(async move {
			let markers = validate_markers(source, &scan_markers(source), options);
			if markers.is_empty() {
				return source.to_string();
			}

			let mut output = String::with_capacity(source.len());
			let mut cursor = 0;

			for marker in &markers {
				// Ends are copied with the surrounding text; markers inside an
				// expanded block were consumed with it.
				if marker.span.start < cursor || marker.kind() == MarkerKind::BlockEnd {
					continue;
				}

				output.push_str(&source[cursor..marker.span.start]);
				let text = marker.span.text(source);

				match marker.kind() {
					MarkerKind::Reference => {
						cursor = marker.span.end;
						let expanded = self
							.expand_reference(source, marker, frame, context, options)
							.await;
						output.push_str(expanded.as_deref().unwrap_or(text));
					}
					MarkerKind::BlockOpen => {
						let expanded = match marker.partner.map(|partner| &markers[partner]) {
							Some(end) => {
								self.expand_block(source, marker, end, frame, context, options)
									.await
							}
							None => None,
						};

						match expanded {
							Some((text, end)) => {
								output.push_str(&text);
								cursor = end;
							}
							None => {
								output.push_str(text);
								cursor = marker.span.end;
							}
						}
					}
					MarkerKind::BlockEnd => {}
				}
			}

			output.push_str(&source[cursor..]);
			output
		})
	}

	async fn expand_reference(
		&self,
		source: &str,
		marker: &Marker,
		frame: &Frame,
		context: &mut ResolutionContext,
		options: &WikiOptions,
	) -> Option<String> {
		let title = match &marker.target {
			MarkerTarget::PartialBlock => return frame.partial_block.clone(),
			MarkerTarget::Page(title) => title,
		};

		let page = self.fetch(title, context, options).await?;
		let child = Frame {
			parameters: bind_parameters(marker.parameters_text(source), frame),
			partial_block: frame.partial_block.clone(),
		};

		Some(self.descend(&page.markdown, &child, context, options).await)
	}

	/// Expand a block pair. Returns the expansion and the byte offset after
	/// the block-end.
	async fn expand_block(
		&self,
		source: &str,
		open: &Marker,
		end: &Marker,
		frame: &Frame,
		context: &mut ResolutionContext,
		options: &WikiOptions,
	) -> Option<(String, usize)> {
		let title = open.title()?;
		let page = self.fetch(title, context, options).await?;

		let inner = &source[open.span.end..end.span.start];
		context.depth += 1;
		let captured = self.resolve_markers(inner, frame, context, options).await;
		context.depth -= 1;

		let child = Frame {
			parameters: bind_parameters(open.parameters_text(source), frame),
			partial_block: Some(captured),
		};
		let expanded = self.descend(&page.markdown, &child, context, options).await;

		Some((expanded, end.span.end))
	}

	async fn descend(
		&self,
		markdown: &str,
		frame: &Frame,
		context: &mut ResolutionContext,
		options: &WikiOptions,
	) -> String {
		context.depth += 1;
		let resolved = self.resolve_page(markdown, frame, context, options).await;
		context.depth -= 1;
		resolved
	}

	/// Record the title and fetch its page when every guard allows it.
	async fn fetch(
		&self,
		title: &PageTitle,
		context: &mut ResolutionContext,
		options: &WikiOptions,
	) -> Option<Page> {
		context.referenced.insert(title.clone());

		if context.depth >= MAX_TRANSCLUSION_DEPTH {
			debug!(%title, depth = context.depth, "depth limit reached, keeping marker");
			return None;
		}

		if context.is_cancelled() {
			debug!(%title, "resolution cancelled, keeping marker");
			return None;
		}

		if context.expansions >= options.max_transclusions {
			debug!(%title, limit = options.max_transclusions, "transclusion limit reached, keeping marker");
			return None;
		}

		trace!(%title, depth = context.depth, "fetching page");
		let Some(page) = self.store.get_page(title).await else {
			debug!(%title, "page not found, keeping marker");
			return None;
		};

		if !page.exists || page.markdown.is_empty() {
			debug!(%title, "page is missing or empty, keeping marker");
			return None;
		}

		if !page.permission().has_read() {
			debug!(%title, "page is not readable, keeping marker");
			return None;
		}

		context.expansions += 1;
		Some(page)
	}
}

/// A marker's own parameters, with gaps filled from the enclosing frame.
fn bind_parameters(text: &str, frame: &Frame) -> ParameterSet {
	let mut parameters = parse_parameters(text);
	parameters.merge_inherited(&frame.parameters);
	parameters
}
