use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::WikiError;
use crate::WikiResult;

/// Supported config file locations in discovery order (highest precedence
/// first).
pub const CONFIG_FILE_CANDIDATES: [&str; 3] = ["wikit.toml", ".wikit.toml", ".config/wikit.toml"];

/// Default upper bound on page expansions performed by a single top-level
/// call.
pub const DEFAULT_MAX_TRANSCLUSIONS: usize = 10_000;

/// Options shared by every call into the engine.
///
/// ```toml
/// transclusion_namespace = "Transclusion"
/// category_namespace = "Category"
/// main_page_title = "Main Page"
/// toc_depth = 3
/// toc_start_level = 1
/// toc_title = "Contents"
/// number_style = { tolerate_group_separators = false }
///
/// [script]
/// timeout_ms = 1000
/// memory_limit = 4194304
///
/// [pages]
/// root = "pages"
/// restricted = ["Secret:*"]
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WikiOptions {
	/// Namespace given to transclusion references that do not name one. Set to
	/// an empty string to leave unqualified references in no namespace.
	pub transclusion_namespace: String,
	/// Namespace whose pages are categories (`ifcategory`).
	pub category_namespace: String,
	/// Title treated as the home page. A reference to it is stored with an
	/// empty title.
	pub main_page_title: String,
	/// Default heading depth for `toc`.
	pub toc_depth: u8,
	/// Default first heading level for `toc`.
	pub toc_start_level: u8,
	/// Default heading for `toc`.
	pub toc_title: String,
	/// Upper bound on page expansions in one call.
	pub max_transclusions: usize,
	/// How `ifequal` reads numbers.
	pub number_style: NumberStyle,
	/// Resource limits for `evaluate` and `execute`.
	pub script: ScriptLimits,
	/// Directory page store settings, used by the command line.
	pub pages: PagesConfig,
}

impl Default for WikiOptions {
	fn default() -> Self {
		Self {
			transclusion_namespace: "Transclusion".to_string(),
			category_namespace: "Category".to_string(),
			main_page_title: "Main Page".to_string(),
			toc_depth: 3,
			toc_start_level: 1,
			toc_title: "Contents".to_string(),
			max_transclusions: DEFAULT_MAX_TRANSCLUSIONS,
			number_style: NumberStyle::default(),
			script: ScriptLimits::default(),
			pages: PagesConfig::default(),
		}
	}
}

impl WikiOptions {
	/// Find the first config file that exists under `root`.
	pub fn resolve_path(root: &Path) -> Option<PathBuf> {
		CONFIG_FILE_CANDIDATES
			.iter()
			.map(|candidate| root.join(candidate))
			.find(|path| path.is_file())
	}

	/// Load the config from the first discovered config file at `root`.
	/// Returns `None` if the file does not exist.
	pub fn load(root: &Path) -> WikiResult<Option<WikiOptions>> {
		let Some(config_path) = Self::resolve_path(root) else {
			return Ok(None);
		};

		let content = std::fs::read_to_string(&config_path)?;
		let options = Self::from_toml(&content)?;

		Ok(Some(options))
	}

	/// Load the config at `root`, falling back to the defaults when no config
	/// file exists.
	pub fn load_or_default(root: &Path) -> WikiResult<WikiOptions> {
		Ok(Self::load(root)?.unwrap_or_default())
	}

	/// Parse options from TOML text.
	pub fn from_toml(content: &str) -> WikiResult<WikiOptions> {
		toml::from_str(content).map_err(|e| WikiError::ConfigParse(e.to_string()))
	}

	/// The namespace for unqualified transclusion references, if any.
	pub fn default_namespace(&self) -> Option<&str> {
		let namespace = self.transclusion_namespace.trim();
		(!namespace.is_empty()).then_some(namespace)
	}
}

/// Numeric comparison settings for `ifequal` and `ifnotequal`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct NumberStyle {
	/// Strip `,` group separators (`1,000`) before reading numbers.
	pub tolerate_group_separators: bool,
}

/// Resource ceilings applied to every script invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScriptLimits {
	/// Wall-clock budget in milliseconds.
	pub timeout_ms: u64,
	/// Interpreter memory ceiling in bytes.
	pub memory_limit: usize,
	/// Maximum number of VM instructions.
	pub max_instructions: u64,
	/// Maximum nesting of function calls.
	pub max_call_depth: usize,
}

impl Default for ScriptLimits {
	fn default() -> Self {
		Self {
			timeout_ms: 1000,
			memory_limit: 4 * 1024 * 1024,
			max_instructions: 1_000_000,
			max_call_depth: 64,
		}
	}
}

/// `[pages]` section: where a directory page store reads from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PagesConfig {
	/// Root of the page tree, relative to the project root.
	pub root: PathBuf,
	/// Glob patterns over full page titles that may not be read.
	pub restricted: Vec<String>,
}

impl Default for PagesConfig {
	fn default() -> Self {
		Self {
			root: PathBuf::from("pages"),
			restricted: Vec::new(),
		}
	}
}
