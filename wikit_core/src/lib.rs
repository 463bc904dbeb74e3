//! `wikit_core` is the core library for the wikit transclusion engine. It
//! expands `{{> Title}}` markers in wiki markdown with the content of other
//! pages, binds parameters into `<<name>>` placeholders, captures block content
//! for `{{> @partial-block}}`, and finally evaluates `{{helper|arg}}` template
//! functions over the composed text.
//!
//! ## Processing Pipeline
//!
//! ```text
//! Wiki markdown
//!   -> Scanner (finds marker spans, skipping code fences, indented code and inline code)
//!   -> Validator (parses names into page titles, splits parameters, pairs blocks)
//!   -> Engine (fetches pages, substitutes placeholders, recurses up to depth 100)
//!   -> Function library (one pass of template helpers over the result)
//!   -> Script sandbox (only for `evaluate` / `execute`)
//! ```
//!
//! ## Modules
//!
//! - [`config`] - Options loaded from `wikit.toml`: namespaces, table of
//!   contents defaults, script limits and page store settings.
//! - [`sandbox`] - Resource-bounded Lua evaluation used by the `evaluate` and
//!   `execute` helpers.
//!
//! ## Key Types
//!
//! - [`Engine`] - Resolves a [`TranscludeRequest`] against a [`PageStore`].
//! - [`PageTitle`] - A normalized `(domain):Namespace:Title`.
//! - [`Marker`] - A validated transclusion marker.
//! - [`ParameterSet`] - Typed parameters bound to a transclusion.
//! - [`FunctionLibrary`] - The template helpers and the environment that runs
//!   them.
//! - [`WikiOptions`] - Configuration passed to every top-level call.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wikit_core::{Engine, MemoryStore, PageTitle, TranscludeRequest, WikiOptions};
//!
//! # async fn run() {
//! let store = MemoryStore::new();
//! store.insert(PageTitle::new(Some("Transclusion"), "Greeting"), "Hello, <<name>>!");
//!
//! let engine = Engine::new(store);
//! let request = TranscludeRequest::new("{{> Greeting name=Ada}}");
//! let result = engine.transclude(&WikiOptions::default(), request).await;
//!
//! assert_eq!(result.text, "Hello, Ada!");
//! # }
//! ```

pub use config::*;
pub use engine::*;
pub use error::*;
pub use functions::*;
pub use lexer::*;
pub use parameters::*;
pub use parser::*;
pub use placeholders::*;
pub use sandbox::ScriptMode;
pub use sandbox::run_script;
pub use store::*;
pub use title::*;
pub use tokens::*;

pub mod config;
mod engine;
#[allow(unused_assignments)]
mod error;
mod functions;
mod lexer;
mod parameters;
mod parser;
mod placeholders;
pub mod sandbox;
mod store;
mod title;
mod tokens;

#[cfg(test)]
mod __fixtures;
#[cfg(test)]
mod __tests;
