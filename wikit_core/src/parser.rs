use std::fmt;
use std::ops::Range;

use serde::Serialize;

use crate::PageTitle;
use crate::WikiError;
use crate::WikiOptions;
use crate::placeholders::PARTIAL_BLOCK;
use crate::tokens::MarkerKind;
use crate::tokens::MarkerSpan;

/// What a validated marker points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "title", rename_all = "camelCase")]
pub enum MarkerTarget {
	/// A page to fetch from the store.
	Page(PageTitle),
	/// `@partial-block`: the content captured by the enclosing block.
	PartialBlock,
}

/// A marker whose name parsed and, for blocks, whose partner was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Marker {
	pub span: MarkerSpan,
	/// The name as written, before title normalization.
	pub name: String,
	pub target: MarkerTarget,
	/// Byte range of the parameter text, if any.
	pub parameters: Option<Range<usize>>,
	/// For block-opens, the index of the paired block-end in the same list.
	pub partner: Option<usize>,
}

impl Marker {
	pub fn kind(&self) -> MarkerKind {
		self.span.kind
	}

	pub fn title(&self) -> Option<&PageTitle> {
		match &self.target {
			MarkerTarget::Page(title) => Some(title),
			MarkerTarget::PartialBlock => None,
		}
	}

	/// The parameter text, or an empty string.
	pub fn parameters_text<'a>(&self, source: &'a str) -> &'a str {
		self.parameters
			.as_ref()
			.map_or("", |range| &source[range.clone()])
	}

	fn names_match(&self, end: &Marker) -> bool {
		if self.name.eq_ignore_ascii_case(&end.name) {
			return true;
		}

		match (&self.target, &end.target) {
			(MarkerTarget::Page(open), MarkerTarget::Page(close)) => open.matches(close),
			_ => false,
		}
	}
}

/// Problems found while validating markers. None of these stop resolution;
/// the affected marker is left as literal text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
#[non_exhaustive]
pub enum MarkerDiagnostic {
	/// The marker's name is not a valid page title.
	InvalidTitle { name: String, reason: String, start: usize },
	/// A block-open without a matching block-end.
	UnclosedBlock { name: String, start: usize },
	/// A block-end that no block-open claimed.
	UnmatchedEnd { name: String, start: usize },
	/// A block cannot target `@partial-block`.
	PartialBlockBlock { start: usize },
}

impl MarkerDiagnostic {
	/// Byte offset of the marker the diagnostic is about.
	pub fn start(&self) -> usize {
		match self {
			MarkerDiagnostic::InvalidTitle { start, .. }
			| MarkerDiagnostic::UnclosedBlock { start, .. }
			| MarkerDiagnostic::UnmatchedEnd { start, .. }
			| MarkerDiagnostic::PartialBlockBlock { start } => *start,
		}
	}
}

impl fmt::Display for MarkerDiagnostic {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			MarkerDiagnostic::InvalidTitle { name, reason, .. } => {
				write!(f, "invalid title `{name}`: {reason}")
			}
			MarkerDiagnostic::UnclosedBlock { name, .. } => write!(f, "block `{name}` is never closed"),
			MarkerDiagnostic::UnmatchedEnd { name, .. } => {
				write!(f, "`{{{{/{name}}}}}` does not close any block")
			}
			MarkerDiagnostic::PartialBlockBlock { .. } => {
				f.write_str("`@partial-block` cannot open a block")
			}
		}
	}
}

/// Validate raw spans: parse names into titles and pair blocks. Markers that
/// fail validation are dropped.
pub fn validate_markers(source: &str, spans: &[MarkerSpan], options: &WikiOptions) -> Vec<Marker> {
	validate_markers_with_diagnostics(source, spans, options).0
}

/// Like [`validate_markers`], also reporting why markers were dropped.
pub fn validate_markers_with_diagnostics(
	source: &str,
	spans: &[MarkerSpan],
	options: &WikiOptions,
) -> (Vec<Marker>, Vec<MarkerDiagnostic>) {
	let mut diagnostics = Vec::new();
	let mut candidates = Vec::with_capacity(spans.len());

	for span in spans {
		let (name, parameters) = split_content(source, span);

		let target = if name == PARTIAL_BLOCK {
			if span.kind == MarkerKind::BlockOpen {
				diagnostics.push(MarkerDiagnostic::PartialBlockBlock { start: span.start });
				continue;
			}
			MarkerTarget::PartialBlock
		} else {
			match PageTitle::parse_reference(&unescape_name(name), options) {
				Ok(title) => MarkerTarget::Page(title),
				Err(error) => {
					let reason = match error {
						WikiError::InvalidTitle { reason, .. } => reason,
						other => other.to_string(),
					};
					diagnostics.push(MarkerDiagnostic::InvalidTitle {
						name: name.to_string(),
						reason,
						start: span.start,
					});
					continue;
				}
			}
		};

		candidates.push(Marker {
			span: *span,
			name: name.to_string(),
			target,
			parameters,
			partner: None,
		});
	}

	let claimed = pair_blocks(&mut candidates);

	// Keep references, paired openers and claimed ends; remap partner indexes.
	let mut kept = vec![None; candidates.len()];
	let mut next = 0;
	for (index, marker) in candidates.iter().enumerate() {
		let keep = match marker.kind() {
			MarkerKind::Reference => true,
			MarkerKind::BlockOpen => marker.partner.is_some(),
			MarkerKind::BlockEnd => claimed[index],
		};

		if keep {
			kept[index] = Some(next);
			next += 1;
		} else if marker.kind() == MarkerKind::BlockOpen {
			diagnostics.push(MarkerDiagnostic::UnclosedBlock {
				name: marker.name.clone(),
				start: marker.span.start,
			});
		} else {
			diagnostics.push(MarkerDiagnostic::UnmatchedEnd {
				name: marker.name.clone(),
				start: marker.span.start,
			});
		}
	}

	let markers = candidates
		.into_iter()
		.enumerate()
		.filter(|(index, _)| kept[*index].is_some())
		.map(|(_, mut marker)| {
			marker.partner = marker.partner.and_then(|partner| kept[partner]);
			marker
		})
		.collect();

	diagnostics.sort_by_key(MarkerDiagnostic::start);

	(markers, diagnostics)
}

/// Visit block-opens from last to first; each claims the nearest following
/// unclaimed block-end with a matching name. Returns which ends were claimed.
fn pair_blocks(markers: &mut [Marker]) -> Vec<bool> {
	let mut claimed = vec![false; markers.len()];

	for open in (0..markers.len()).rev() {
		if markers[open].kind() != MarkerKind::BlockOpen {
			continue;
		}

		// Span ends are exclusive: an end marker starting at `open_end` follows
		// the opener directly and encloses an empty block.
		let open_end = markers[open].span.end;
		let partner = (open + 1..markers.len()).find(|&index| {
			let candidate = &markers[index];
			candidate.kind() == MarkerKind::BlockEnd
				&& !claimed[index]
				&& candidate.span.start >= open_end
				&& markers[open].names_match(candidate)
		});

		if let Some(end) = partner {
			claimed[end] = true;
			markers[open].partner = Some(end);
		}
	}

	claimed
}

/// Split marker content into the name (up to the first unescaped whitespace)
/// and the absolute range of the remaining parameter text.
fn split_content<'a>(source: &'a str, span: &MarkerSpan) -> (&'a str, Option<Range<usize>>) {
	let content = span.content(source);
	let mut escaped = false;
	let mut name_end = content.len();

	for (index, ch) in content.char_indices() {
		if escaped {
			escaped = false;
		} else if ch == '\\' {
			escaped = true;
		} else if ch.is_whitespace() {
			name_end = index;
			break;
		}
	}

	let name = &content[..name_end];
	let rest = &content[name_end..];
	let leading = rest.len() - rest.trim_start().len();
	let parameters_start = span.content_start + name_end + leading;

	let parameters =
		(parameters_start < span.content_end).then_some(parameters_start..span.content_end);

	(name, parameters)
}

/// Names may escape whitespace (`Foo\ Bar`). Other escapes, including the
/// `\-` namespace sentinel, are kept.
fn unescape_name(name: &str) -> String {
	let mut output = String::with_capacity(name.len());
	let mut chars = name.chars().peekable();

	while let Some(ch) = chars.next() {
		if ch == '\\' && chars.peek().is_some_and(|next| next.is_whitespace()) {
			continue;
		}
		output.push(ch);
	}

	output
}

#[cfg(test)]
mod tests {
	use similar_asserts::assert_eq;

	use super::*;
	use crate::scan_markers;

	fn validate(source: &str) -> Vec<Marker> {
		validate_markers(source, &scan_markers(source), &WikiOptions::default())
	}

	#[test]
	fn separates_name_and_parameters() {
		let source = "{{> Greet  name=Ada 2}}";
		let markers = validate(source);
		assert_eq!(markers.len(), 1);
		assert_eq!(markers[0].name, "Greet");
		assert_eq!(markers[0].parameters_text(source), "name=Ada 2");
		assert_eq!(
			markers[0].title(),
			Some(&PageTitle::new(Some("Transclusion"), "Greet"))
		);
	}

	#[test]
	fn partial_block_is_a_placeholder() {
		let markers = validate("{{> @partial-block}}");
		assert_eq!(markers[0].target, MarkerTarget::PartialBlock);
	}

	#[test]
	fn invalid_titles_are_dropped() {
		let source = "{{> Bad|Name}} {{> Good}}";
		let spans = scan_markers(source);
		let (markers, diagnostics) =
			validate_markers_with_diagnostics(source, &spans, &WikiOptions::default());
		assert_eq!(markers.len(), 1);
		assert_eq!(markers[0].name, "Good");
		assert!(matches!(
			diagnostics.as_slice(),
			[MarkerDiagnostic::InvalidTitle { .. }]
		));
	}

	#[test]
	fn nested_blocks_pair_innermost_first() {
		let source = "{{#> W}}a{{#> w}}b{{/W}}c{{/w}}";
		let markers = validate(source);
		let kinds: Vec<_> = markers.iter().map(Marker::kind).collect();
		assert_eq!(
			kinds,
			vec![
				MarkerKind::BlockOpen,
				MarkerKind::BlockOpen,
				MarkerKind::BlockEnd,
				MarkerKind::BlockEnd,
			]
		);
		assert_eq!(markers[0].partner, Some(3));
		assert_eq!(markers[1].partner, Some(2));
	}

	#[test]
	fn adjacent_end_closes_an_empty_block() {
		let source = "{{#> W}}{{/W}}";
		let markers = validate(source);
		assert_eq!(markers.len(), 2);
		assert_eq!(markers[0].partner, Some(1));
		assert_eq!(markers[1].span.start, markers[0].span.end);
	}

	#[test]
	fn qualified_and_unqualified_names_pair() {
		let markers = validate("{{#> Transclusion:Wrap}}x{{/wrap}}");
		assert_eq!(markers.len(), 2);
		assert_eq!(markers[0].partner, Some(1));
	}

	#[test]
	fn unmatched_blocks_are_dropped() {
		let source = "{{#> Open}} text {{/Other}} {{> Keep}}";
		let spans = scan_markers(source);
		let (markers, diagnostics) =
			validate_markers_with_diagnostics(source, &spans, &WikiOptions::default());
		assert_eq!(markers.len(), 1);
		assert_eq!(markers[0].name, "Keep");
		assert_eq!(diagnostics.len(), 2);
	}

	#[test]
	fn escaped_whitespace_stays_in_name() {
		let markers = validate("{{> Big\\ Page x}}");
		assert_eq!(
			markers[0].title(),
			Some(&PageTitle::new(Some("Transclusion"), "Big Page"))
		);
	}
}
