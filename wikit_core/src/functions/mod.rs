//! Template functions: `{{name|arg|...}}` helpers evaluated once over fully
//! transcluded text.
//!
//! The text is compiled into a [`minijinja`] template in which every known
//! helper invocation becomes a call to a single dispatch function. Literal
//! text, unknown helpers and code regions are carried through as string
//! output.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use minijinja::Environment;
use minijinja::State;
use minijinja::Value;
use minijinja::value::Object;
use minijinja::value::Rest;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use tracing::warn;

use crate::PageTitle;
use crate::ParameterSet;
use crate::WikiOptions;

pub use builtins::is_truthy;
pub use builtins::values_equal;
pub use compile::MAX_INVOCATION_DEPTH;

mod builtins;
mod compile;

/// Name of the dispatch function in compiled templates.
pub(crate) const DISPATCH_FUNCTION: &str = "wikit_helper";
/// Name of the context variable holding the current [`CallScope`].
pub(crate) const SCOPE_VARIABLE: &str = "wikit_scope";

/// The state every helper can read: the top-level page and the request flags.
#[derive(Debug, Clone)]
pub struct HelperContext {
	pub title: Option<PageTitle>,
	pub is_template: bool,
	pub is_preview: bool,
	pub is_talk: bool,
	pub parameters: ParameterSet,
	pub options: WikiOptions,
	pub cancellation: Option<CancellationToken>,
}

impl HelperContext {
	pub fn new(options: WikiOptions) -> Self {
		Self {
			title: None,
			is_template: false,
			is_preview: false,
			is_talk: false,
			parameters: ParameterSet::new(),
			options,
			cancellation: None,
		}
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancellation
			.as_ref()
			.is_some_and(CancellationToken::is_cancelled)
	}

	pub fn namespace(&self) -> Option<&str> {
		self.title.as_ref().and_then(|title| title.namespace.as_deref())
	}
}

/// A template function. Arguments arrive already evaluated, as text.
pub trait Helper: Send + Sync {
	fn call(&self, args: &[String], context: &HelperContext) -> String;
}

impl<F> Helper for F
where
	F: Fn(&[String], &HelperContext) -> String + Send + Sync,
{
	fn call(&self, args: &[String], context: &HelperContext) -> String {
		self(args, context)
	}
}

/// Helpers keyed by lower-case name.
#[derive(Clone, Default)]
pub struct HelperRegistry {
	helpers: BTreeMap<String, Arc<dyn Helper>>,
}

impl HelperRegistry {
	/// An empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// A registry holding every built-in helper.
	pub fn builtin() -> Self {
		let mut registry = Self::new();
		builtins::register(&mut registry);
		registry
	}

	pub fn register(&mut self, name: &str, helper: impl Helper + 'static) {
		self.helpers
			.insert(name.to_ascii_lowercase(), Arc::new(helper));
	}

	/// Make `alias` call the helper registered as `target`.
	pub fn alias(&mut self, alias: &str, target: &str) {
		if let Some(helper) = self.helpers.get(&target.to_ascii_lowercase()).cloned() {
			self.helpers.insert(alias.to_ascii_lowercase(), helper);
		}
	}

	pub fn get(&self, name: &str) -> Option<&dyn Helper> {
		self.helpers
			.get(&name.to_ascii_lowercase())
			.map(|helper| &**helper)
	}

	pub fn contains(&self, name: &str) -> bool {
		self.helpers.contains_key(&name.to_ascii_lowercase())
	}

	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.helpers.keys().map(String::as_str)
	}
}

impl fmt::Debug for HelperRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_set().entries(self.helpers.keys()).finish()
	}
}

/// What a compiled template sees while rendering.
#[derive(Debug)]
struct CallScope {
	context: HelperContext,
	registry: Arc<HelperRegistry>,
}

impl Object for CallScope {}

impl CallScope {
	fn call(&self, name: &str, args: &[String]) -> String {
		match self.registry.get(name) {
			Some(helper) => {
				trace!(helper = name, args = args.len(), "calling helper");
				helper.call(args, &self.context)
			}
			None => String::new(),
		}
	}
}

fn dispatch(state: &State, name: String, args: Rest<String>) -> String {
	let Some(scope) = state.lookup(SCOPE_VARIABLE) else {
		return String::new();
	};
	let Some(scope) = scope.downcast_object_ref::<CallScope>() else {
		return String::new();
	};

	scope.call(&name, &args)
}

/// The helper registry together with the template environment that runs it.
/// Built once and shared by every call.
pub struct FunctionLibrary {
	registry: Arc<HelperRegistry>,
	environment: Environment<'static>,
}

impl FunctionLibrary {
	pub fn new(registry: HelperRegistry) -> Self {
		let mut environment = Environment::new();
		environment.set_keep_trailing_newline(true);
		environment.add_function(DISPATCH_FUNCTION, dispatch);

		Self {
			registry: Arc::new(registry),
			environment,
		}
	}

	/// A library with every built-in helper.
	pub fn builtin() -> Self {
		Self::new(HelperRegistry::builtin())
	}

	pub fn registry(&self) -> &HelperRegistry {
		&self.registry
	}

	/// Evaluate every helper invocation in `text`. On any template failure the
	/// input is returned unchanged.
	pub fn render(&self, text: &str, context: HelperContext) -> String {
		if !text.contains("{{") {
			return text.to_string();
		}

		let compiled = compile::compile(text, &self.registry);
		if compiled.calls == 0 {
			return text.to_string();
		}

		let scope = CallScope {
			context,
			registry: Arc::clone(&self.registry),
		};
		let ctx = minijinja::context! { wikit_scope => Value::from_object(scope) };

		match self.environment.render_str(&compiled.source, ctx) {
			Ok(rendered) => rendered,
			Err(error) => {
				warn!(%error, "template functions failed, keeping text unchanged");
				text.to_string()
			}
		}
	}
}

impl Default for FunctionLibrary {
	fn default() -> Self {
		Self::builtin()
	}
}

impl fmt::Debug for FunctionLibrary {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FunctionLibrary")
			.field("registry", &self.registry)
			.finish_non_exhaustive()
	}
}
