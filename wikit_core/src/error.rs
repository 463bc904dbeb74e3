use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum WikiError {
	#[error(transparent)]
	#[diagnostic(code(wikit::io_error))]
	Io(#[from] std::io::Error),

	#[error("failed to parse config file: {0}")]
	#[diagnostic(
		code(wikit::config_parse),
		help("check that wikit.toml is valid TOML with optional [script] and [pages] sections")
	)]
	ConfigParse(String),

	#[error("invalid page title `{title}`: {reason}")]
	#[diagnostic(
		code(wikit::invalid_title),
		help("titles use the form `(domain):Namespace:Title` and may not contain `{{ }} [ ] < > | #`")
	)]
	InvalidTitle { title: String, reason: String },

	#[error("page not found: `{0}`")]
	#[diagnostic(code(wikit::page_not_found))]
	PageNotFound(String),

	#[error("invalid parameter `{0}`")]
	#[diagnostic(
		code(wikit::invalid_parameter),
		help("parameters are passed as `name=value`")
	)]
	InvalidParameter(String),

	#[error("invalid restricted page pattern `{pattern}`: {reason}")]
	#[diagnostic(
		code(wikit::invalid_pattern),
		help("restricted patterns are globs matched against the full page title")
	)]
	InvalidPattern { pattern: String, reason: String },
}

pub type WikiResult<T> = Result<T, WikiError>;
pub type AnyError = Box<dyn std::error::Error>;
pub type AnyEmptyResult = Result<(), AnyError>;
