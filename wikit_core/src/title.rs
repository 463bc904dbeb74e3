use std::fmt;

use serde::Serialize;

use crate::WikiError;
use crate::WikiOptions;
use crate::WikiResult;

/// Longest accepted title, counted in characters.
pub const MAX_TITLE_LENGTH: usize = 255;

/// Characters that may never appear in a namespace or title.
const FORBIDDEN_CHARACTERS: [char; 8] = ['{', '}', '[', ']', '<', '>', '|', '#'];

/// A fully qualified wiki page title: `(domain):Namespace:Title`.
///
/// Namespace and title are stored in wiki title case. An empty `title` is the
/// home page of its namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PageTitle {
	pub domain: Option<String>,
	pub namespace: Option<String>,
	pub title: String,
}

/// How a raw reference spelled its namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
enum NamespacePart {
	/// No namespace segment at all.
	Unqualified,
	/// `-:` or an empty segment.
	Cleared,
	Named(String),
}

impl PageTitle {
	pub fn new(namespace: Option<&str>, title: &str) -> Self {
		Self {
			domain: None,
			namespace: namespace.map(normalize_title_text),
			title: normalize_title_text(title),
		}
	}

	/// Parse a title exactly as written, without namespace defaulting.
	pub fn parse(text: &str) -> WikiResult<Self> {
		let (domain, namespace, title) = split_title(text)?;
		let namespace = match namespace {
			NamespacePart::Unqualified | NamespacePart::Cleared => None,
			NamespacePart::Named(name) => Some(name),
		};

		Ok(Self {
			domain,
			namespace,
			title,
		})
	}

	/// Parse a title used in a transclusion reference. Unqualified titles
	/// receive the configured transclusion namespace and the configured main
	/// page title collapses to the home page.
	pub fn parse_reference(text: &str, options: &WikiOptions) -> WikiResult<Self> {
		let (domain, namespace, title) = split_title(text)?;
		let namespace = match namespace {
			NamespacePart::Unqualified => options.default_namespace().map(normalize_title_text),
			NamespacePart::Cleared => None,
			NamespacePart::Named(name) => Some(name),
		};
		let main_page = normalize_title_text(&options.main_page_title);
		let title = if !main_page.is_empty() && title.eq_ignore_ascii_case(&main_page) {
			String::new()
		} else {
			title
		};

		Ok(Self {
			domain,
			namespace,
			title,
		})
	}

	#[must_use]
	pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
		self.domain = Some(domain.into());
		self
	}

	pub fn is_home_page(&self) -> bool {
		self.title.is_empty()
	}

	/// `Namespace:Title` without the domain.
	pub fn full_title(&self) -> String {
		match &self.namespace {
			Some(namespace) => format!("{namespace}:{}", self.title),
			None => self.title.clone(),
		}
	}

	/// Compare titles ignoring ASCII case.
	pub fn matches(&self, other: &PageTitle) -> bool {
		fn eq(a: Option<&String>, b: Option<&String>) -> bool {
			match (a, b) {
				(Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
				(None, None) => true,
				_ => false,
			}
		}

		eq(self.domain.as_ref(), other.domain.as_ref())
			&& eq(self.namespace.as_ref(), other.namespace.as_ref())
			&& self.title.eq_ignore_ascii_case(&other.title)
	}
}

impl fmt::Display for PageTitle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if let Some(domain) = &self.domain {
			write!(f, "({domain}):")?;
		}

		match self.namespace.as_deref() {
			Some("-") => write!(f, "\\-:{}", self.title),
			Some(namespace) => write!(f, "{namespace}:{}", self.title),
			None if self.title.contains(':') || self.domain.is_some() => {
				write!(f, "-:{}", self.title)
			}
			None => f.write_str(&self.title),
		}
	}
}

/// Collapse runs of whitespace and underscores into single spaces, trim, and
/// upper-case the first character.
pub fn normalize_title_text(text: &str) -> String {
	let mut collapsed = String::with_capacity(text.len());
	let mut pending_space = false;

	for ch in text.chars() {
		if ch.is_whitespace() || ch == '_' {
			pending_space = !collapsed.is_empty();
			continue;
		}

		if pending_space {
			collapsed.push(' ');
			pending_space = false;
		}

		collapsed.push(ch);
	}

	let mut chars = collapsed.chars();
	match chars.next() {
		Some(first) => first.to_uppercase().chain(chars).collect(),
		None => String::new(),
	}
}

fn split_title(text: &str) -> WikiResult<(Option<String>, NamespacePart, String)> {
	let invalid = |reason: &str| {
		WikiError::InvalidTitle {
			title: text.to_string(),
			reason: reason.to_string(),
		}
	};

	let trimmed = text.trim();
	if trimmed.chars().count() > MAX_TITLE_LENGTH {
		return Err(invalid("title is too long"));
	}

	if let Some(ch) = trimmed.chars().find(|ch| ch.is_control()) {
		return Err(invalid(&format!("contains control character {ch:?}")));
	}

	let mut rest = trimmed;
	let mut domain = None;

	if let Some(after_paren) = rest.strip_prefix('(') {
		let Some(close) = after_paren.find(')') else {
			return Err(invalid("unterminated domain"));
		};
		let name = after_paren[..close].trim();
		if name.is_empty() {
			return Err(invalid("empty domain"));
		}
		domain = Some(name.to_string());
		rest = after_paren[close + 1..].trim_start();
		rest = match rest.strip_prefix(':') {
			Some(stripped) => stripped,
			None if rest.is_empty() => rest,
			None => return Err(invalid("domain must be followed by `:`")),
		};
	}

	let (namespace, title) = match rest.split_once(':') {
		Some((namespace, title)) => {
			let namespace = namespace.trim();
			let part = match namespace {
				"" | "-" => NamespacePart::Cleared,
				"\\-" => NamespacePart::Named("-".to_string()),
				other => NamespacePart::Named(normalize_title_text(other)),
			};
			(part, title)
		}
		None => (NamespacePart::Unqualified, rest),
	};

	if let NamespacePart::Named(name) = &namespace {
		if name.contains(FORBIDDEN_CHARACTERS) {
			return Err(invalid("namespace contains a forbidden character"));
		}
	}

	if title.contains(FORBIDDEN_CHARACTERS) {
		return Err(invalid("title contains a forbidden character"));
	}

	Ok((domain, namespace, normalize_title_text(title)))
}
