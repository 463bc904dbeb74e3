use std::fmt::Display;
use std::ops::Range;

use serde::Serialize;

/// The three marker shapes recognised in wiki markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MarkerKind {
	/// `{{> Title params}}`
	Reference,
	/// `{{#> Title params}}`
	BlockOpen,
	/// `{{/Title}}`
	BlockEnd,
}

impl MarkerKind {
	/// The opening delimiter of this marker kind.
	pub fn opener(self) -> &'static str {
		match self {
			MarkerKind::Reference => "{{>",
			MarkerKind::BlockOpen => "{{#>",
			MarkerKind::BlockEnd => "{{/",
		}
	}
}

impl Display for MarkerKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			MarkerKind::Reference => write!(f, "reference"),
			MarkerKind::BlockOpen => write!(f, "block"),
			MarkerKind::BlockEnd => write!(f, "end"),
		}
	}
}

/// Byte offsets of a raw marker in its source text.
///
/// `start..end` covers the whole marker including delimiters and
/// `content_start..content_end` covers the trimmed text between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MarkerSpan {
	pub kind: MarkerKind,
	pub start: usize,
	pub content_start: usize,
	pub content_end: usize,
	pub end: usize,
}

impl MarkerSpan {
	pub fn range(&self) -> Range<usize> {
		self.start..self.end
	}

	pub fn content_range(&self) -> Range<usize> {
		self.content_start..self.content_end
	}

	/// The full marker text.
	pub fn text<'a>(&self, source: &'a str) -> &'a str {
		&source[self.range()]
	}

	/// The trimmed text between the delimiters.
	pub fn content<'a>(&self, source: &'a str) -> &'a str {
		&source[self.content_range()]
	}
}

/// One-based line and column of a byte offset.
pub fn line_column(source: &str, offset: usize) -> (usize, usize) {
	let offset = offset.min(source.len());
	let before = &source[..offset];
	let line = before.matches('\n').count() + 1;
	let line_start = before.rfind('\n').map_or(0, |index| index + 1);
	let column = before[line_start..].chars().count() + 1;

	(line, column)
}
