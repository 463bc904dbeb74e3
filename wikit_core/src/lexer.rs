use std::ops::Range;

use logos::Logos;

use crate::tokens::MarkerKind;
use crate::tokens::MarkerSpan;

/// Columns a tab advances to when measuring indentation.
const TAB_WIDTH: usize = 4;

/// Raw tokens produced by logos for a single line of markup.
#[derive(Logos, Debug, Clone, Copy, PartialEq)]
enum RawToken {
	#[token("{{#>")]
	BlockOpen,
	#[token("{{>")]
	ReferenceOpen,
	#[token("{{/")]
	BlockEndOpen,
	#[token("}}")]
	Close,
	#[token("{")]
	BraceOpen,
	#[token("}")]
	BraceClose,
	#[token("\\")]
	Escape,
	#[regex("`+")]
	Backticks,
	#[regex(r"[ \t\r]+")]
	Whitespace,
	#[regex(r"[^{}\\` \t\r\n]+")]
	Text,
}

/// The result of scanning markup: every raw marker plus the byte ranges that
/// are code and therefore inert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scan {
	pub markers: Vec<MarkerSpan>,
	pub inert: Vec<Range<usize>>,
}

/// Scan `source` for transclusion markers. Never fails; malformed markers are
/// simply not reported.
pub fn scan_markers(source: &str) -> Vec<MarkerSpan> {
	scan(source).markers
}

/// The byte ranges of fenced code, indented code and inline code spans.
pub fn inert_ranges(source: &str) -> Vec<Range<usize>> {
	scan(source).inert
}

/// Run the scanner once and return both markers and inert ranges.
pub fn scan(source: &str) -> Scan {
	let mut scanner = MarkerScanner::default();
	let mut offset = 0;

	for raw_line in source.split_inclusive('\n') {
		let line_start = offset;
		offset += raw_line.len();
		let line = raw_line.strip_suffix('\n').unwrap_or(raw_line);

		if let Some(fence) = scanner.fence {
			if fence.is_closed_by(line) {
				scanner.fence = None;
			}
			scanner.push_inert(line_start..offset);
			continue;
		}

		if let Some(fence) = Fence::open(line) {
			scanner.fence = Some(fence);
			scanner.push_inert(line_start..offset);
			continue;
		}

		if !line.trim().is_empty() && indentation(line) >= TAB_WIDTH {
			scanner.push_inert(line_start..offset);
			continue;
		}

		scanner.scan_line(line, line_start);
	}

	Scan {
		markers: scanner.markers,
		inert: scanner.inert,
	}
}

/// An open fenced code block.
#[derive(Debug, Clone, Copy)]
struct Fence {
	marker: char,
	length: usize,
}

impl Fence {
	fn open(line: &str) -> Option<Self> {
		let rest = strip_fence_indent(line)?;
		let marker = rest.chars().next().filter(|ch| matches!(ch, '`' | '~'))?;
		let length = rest.chars().take_while(|ch| *ch == marker).count();

		if length < 3 {
			return None;
		}

		// A backtick fence's info string may not contain backticks.
		if marker == '`' && rest[length..].contains('`') {
			return None;
		}

		Some(Self { marker, length })
	}

	fn is_closed_by(self, line: &str) -> bool {
		let Some(rest) = strip_fence_indent(line) else {
			return false;
		};
		let length = rest.chars().take_while(|ch| *ch == self.marker).count();

		length >= self.length && rest[length..].trim().is_empty()
	}
}

/// Strip up to three leading spaces, or return `None` when the line is
/// indented further.
fn strip_fence_indent(line: &str) -> Option<&str> {
	let spaces = line.len() - line.trim_start_matches(' ').len();
	(spaces <= 3).then(|| &line[spaces..])
}

fn indentation(line: &str) -> usize {
	let mut columns = 0;

	for ch in line.chars() {
		match ch {
			' ' => columns += 1,
			'\t' => columns += TAB_WIDTH - columns % TAB_WIDTH,
			_ => break,
		}
	}

	columns
}

/// A marker whose opener has been seen on the current line.
#[derive(Debug, Clone, Copy)]
struct PendingMarker {
	kind: MarkerKind,
	start: usize,
	content_start: usize,
	content_end: usize,
}

impl PendingMarker {
	fn new(kind: MarkerKind, opener: &Range<usize>) -> Self {
		Self {
			kind,
			start: opener.start,
			content_start: opener.end,
			content_end: opener.end,
		}
	}

	fn has_content(&self) -> bool {
		self.content_end > self.content_start
	}

	fn push_content(&mut self, span: &Range<usize>) {
		self.content_end = span.end;
	}

	fn push_whitespace(&mut self, span: &Range<usize>) {
		if !self.has_content() {
			self.content_start = span.end;
			self.content_end = span.end;
		}
	}

	fn finish(self, close: &Range<usize>) -> Option<MarkerSpan> {
		self.has_content().then_some(MarkerSpan {
			kind: self.kind,
			start: self.start,
			content_start: self.content_start,
			content_end: self.content_end,
			end: close.end,
		})
	}
}

#[derive(Debug, Default)]
struct MarkerScanner {
	fence: Option<Fence>,
	markers: Vec<MarkerSpan>,
	inert: Vec<Range<usize>>,
}

impl MarkerScanner {
	/// Record an inert range, merging it with the previous one when they touch.
	fn push_inert(&mut self, range: Range<usize>) {
		if let Some(last) = self.inert.last_mut() {
			if last.end == range.start {
				last.end = range.end;
				return;
			}
		}

		self.inert.push(range);
	}

	fn scan_line(&mut self, line: &str, base: usize) {
		let tokens: Vec<_> = RawToken::lexer(line)
			.spanned()
			.map(|(token, span)| (token.ok(), base + span.start..base + span.end))
			.collect();

		let mut pending: Option<PendingMarker> = None;
		let mut escaped = false;
		let mut code_span: Option<(usize, usize)> = None;

		for (index, (token, span)) in tokens.iter().enumerate() {
			if let Some((length, code_start)) = code_span {
				if *token == Some(RawToken::Backticks) && span.len() == length {
					code_span = None;
					self.push_inert(code_start..span.end);
				}
				continue;
			}

			if escaped {
				escaped = false;
				if let Some(marker) = pending.as_mut() {
					marker.push_content(span);
				}
				continue;
			}

			match token {
				Some(RawToken::Escape) => {
					escaped = true;
					if let Some(marker) = pending.as_mut() {
						marker.push_content(span);
					}
				}
				Some(RawToken::Backticks) if pending.is_none() => {
					let length = span.len();
					let closes = tokens[index + 1..].iter().any(|(other, other_span)| {
						*other == Some(RawToken::Backticks) && other_span.len() == length
					});

					if closes {
						code_span = Some((length, span.start));
					}
				}
				Some(RawToken::ReferenceOpen) => {
					pending = Some(PendingMarker::new(MarkerKind::Reference, span));
				}
				Some(RawToken::BlockOpen) => {
					pending = Some(PendingMarker::new(MarkerKind::BlockOpen, span));
				}
				Some(RawToken::BlockEndOpen) => {
					pending = Some(PendingMarker::new(MarkerKind::BlockEnd, span));
				}
				Some(RawToken::Close) => {
					if let Some(marker) = pending.take().and_then(|marker| marker.finish(span)) {
						self.markers.push(marker);
					}
				}
				Some(RawToken::Whitespace) => {
					if let Some(marker) = pending.as_mut() {
						marker.push_whitespace(span);
					}
				}
				_ => {
					if let Some(marker) = pending.as_mut() {
						marker.push_content(span);
					}
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;
	use similar_asserts::assert_eq;

	use super::*;

	fn contents(source: &str) -> Vec<(MarkerKind, &str)> {
		scan_markers(source)
			.into_iter()
			.map(|span| (span.kind, span.content(source)))
			.collect()
	}

	#[test]
	fn finds_every_marker_kind() {
		let source = "a {{> Greet}} b {{#> Wrap x=1}}inner{{/Wrap}} c";
		assert_eq!(
			contents(source),
			vec![
				(MarkerKind::Reference, "Greet"),
				(MarkerKind::BlockOpen, "Wrap x=1"),
				(MarkerKind::BlockEnd, "Wrap"),
			]
		);
	}

	#[test]
	fn span_offsets_cover_delimiters() {
		let source = "x{{>  Greet  }}y";
		let spans = scan_markers(source);
		assert_eq!(spans.len(), 1);
		let span = spans[0];
		assert_eq!(span.text(source), "{{>  Greet  }}");
		assert_eq!(span.content(source), "Greet");
		assert!(span.start <= span.content_start);
		assert!(span.content_start <= span.content_end);
		assert!(span.content_end <= span.end);
	}

	#[rstest]
	#[case::empty("{{>}}")]
	#[case::blank("{{>   }}")]
	#[case::unterminated("{{> Greet")]
	#[case::split_across_lines("{{> Greet\n}}")]
	#[case::escaped_opener("\\{{> Greet}}")]
	#[case::inline_code("`{{> Greet}}`")]
	#[case::double_backtick_code("``{{> Greet}}``")]
	#[case::indented_code("    {{> Greet}}")]
	#[case::tab_indented_code("\t{{> Greet}}")]
	#[case::fenced_code("```\n{{> Greet}}\n```")]
	#[case::tilde_fence("~~~~\n{{> Greet}}\n~~~~~")]
	fn ignores_inert_markers(#[case] source: &str) {
		assert_eq!(scan_markers(source), vec![]);
	}

	#[test]
	fn unmatched_backtick_is_literal() {
		assert_eq!(
			contents("`{{> Greet}}"),
			vec![(MarkerKind::Reference, "Greet")]
		);
	}

	#[test]
	fn fence_needs_matching_length_to_close() {
		let source = "````\n```\n{{> Hidden}}\n````\n{{> Shown}}";
		assert_eq!(contents(source), vec![(MarkerKind::Reference, "Shown")]);
	}

	#[test]
	fn escaped_close_keeps_marker_open() {
		let source = "{{> Greet a=\\}} b}}";
		assert_eq!(
			contents(source),
			vec![(MarkerKind::Reference, "Greet a=\\}} b")]
		);
	}

	#[test]
	fn later_opener_replaces_pending_one() {
		assert_eq!(
			contents("{{> First {{> Second}}"),
			vec![(MarkerKind::Reference, "Second")]
		);
	}

	#[test]
	fn inert_ranges_cover_code() {
		let source = "text `code` more\n```\nfenced\n```\nafter";
		let ranges = inert_ranges(source);
		assert_eq!(ranges.len(), 2);
		assert_eq!(&source[ranges[0].clone()], "`code`");
		assert_eq!(&source[ranges[1].clone()], "```\nfenced\n```\n");
	}

	#[test]
	fn markers_are_sorted_by_start() {
		let spans = scan_markers("{{> A}}\n{{> B}} {{> C}}");
		let starts: Vec<_> = spans.iter().map(|span| span.start).collect();
		let mut sorted = starts.clone();
		sorted.sort_unstable();
		assert_eq!(starts, sorted);
	}
}
