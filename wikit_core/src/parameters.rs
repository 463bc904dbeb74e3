use std::collections::BTreeMap;
use std::fmt;

use chrono::DateTime;
use chrono::FixedOffset;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use chrono::Timelike;
use derive_more::Deref;
use float_cmp::approx_eq;
use serde::Serialize;
use snailquote::unescape;

/// Accepted layouts for timestamps without an explicit offset. Values are read
/// as UTC.
const NAIVE_DATE_TIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Lists nested deeper than this are kept as their raw text.
pub const MAX_LIST_DEPTH: usize = 32;

/// A typed transclusion parameter.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ParameterValue {
	String(String),
	Bool(bool),
	Int(i64),
	Float(f64),
	Timestamp(DateTime<FixedOffset>),
	List(Vec<ParameterValue>),
}

impl Eq for ParameterValue {}
impl PartialEq for ParameterValue {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(ParameterValue::String(value), ParameterValue::String(other_value)) => {
				value == other_value
			}
			(ParameterValue::Bool(value), ParameterValue::Bool(other_value)) => value == other_value,
			(ParameterValue::Int(value), ParameterValue::Int(other_value)) => value == other_value,
			(ParameterValue::Float(value), ParameterValue::Float(other_value)) => {
				approx_eq!(f64, *value, *other_value, ulps = 2)
			}
			(ParameterValue::Timestamp(value), ParameterValue::Timestamp(other_value)) => {
				value == other_value
			}
			(ParameterValue::List(value), ParameterValue::List(other_value)) => value == other_value,
			_ => false,
		}
	}
}

impl ParameterValue {
	/// Infer a value from raw parameter text: quoted string, list, boolean,
	/// timestamp, integer, float, then plain string.
	pub fn parse(raw: &str) -> Self {
		Self::parse_nested(raw, 0)
	}

	fn parse_nested(raw: &str, depth: usize) -> Self {
		let text = raw.trim();

		if let Some(inner) = strip_quotes(text) {
			return ParameterValue::String(unescape_quoted(inner));
		}

		if depth < MAX_LIST_DEPTH {
			if let Some(inner) = text.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
				return ParameterValue::List(
					split_list(inner)
						.into_iter()
						.map(|item| Self::parse_nested(item, depth + 1))
						.collect(),
				);
			}
		}

		if text.eq_ignore_ascii_case("true") {
			return ParameterValue::Bool(true);
		}

		if text.eq_ignore_ascii_case("false") {
			return ParameterValue::Bool(false);
		}

		if let Some(timestamp) = parse_timestamp(text) {
			return ParameterValue::Timestamp(timestamp);
		}

		if let Some(value) = parse_integer(text) {
			return ParameterValue::Int(value);
		}

		if let Some(value) = parse_float(text) {
			return ParameterValue::Float(value);
		}

		ParameterValue::String(text.to_string())
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			ParameterValue::String(value) => Some(value),
			_ => None,
		}
	}
}

impl From<&str> for ParameterValue {
	fn from(value: &str) -> Self {
		ParameterValue::String(value.to_string())
	}
}

impl From<String> for ParameterValue {
	fn from(value: String) -> Self {
		ParameterValue::String(value)
	}
}

impl From<bool> for ParameterValue {
	fn from(value: bool) -> Self {
		ParameterValue::Bool(value)
	}
}

impl From<i64> for ParameterValue {
	fn from(value: i64) -> Self {
		ParameterValue::Int(value)
	}
}

impl From<f64> for ParameterValue {
	fn from(value: f64) -> Self {
		ParameterValue::Float(value)
	}
}

impl fmt::Display for ParameterValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ParameterValue::String(value) => f.write_str(value),
			ParameterValue::Bool(value) => write!(f, "{value}"),
			ParameterValue::Int(value) => write!(f, "{value}"),
			ParameterValue::Float(value) => write!(f, "{value:?}"),
			ParameterValue::Timestamp(value) => f.write_str(&format_timestamp(value)),
			ParameterValue::List(values) => {
				for (index, value) in values.iter().enumerate() {
					if index > 0 {
						f.write_str(", ")?;
					}
					write!(f, "{value}")?;
				}
				Ok(())
			}
		}
	}
}

/// Render a timestamp as a date when it falls on UTC midnight, otherwise as
/// RFC 3339.
pub fn format_timestamp(value: &DateTime<FixedOffset>) -> String {
	let is_midnight = value.offset().local_minus_utc() == 0
		&& value.hour() == 0
		&& value.minute() == 0
		&& value.second() == 0
		&& value.nanosecond() == 0;

	if is_midnight {
		value.format("%Y-%m-%d").to_string()
	} else {
		value.to_rfc3339()
	}
}

/// Read a timestamp in RFC 3339, `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD` form.
pub fn parse_timestamp(text: &str) -> Option<DateTime<FixedOffset>> {
	if let Ok(value) = DateTime::parse_from_rfc3339(text) {
		return Some(value);
	}

	for layout in NAIVE_DATE_TIME_FORMATS {
		if let Ok(value) = NaiveDateTime::parse_from_str(text, layout) {
			return Some(value.and_utc().fixed_offset());
		}
	}

	NaiveDate::parse_from_str(text, "%Y-%m-%d")
		.ok()
		.and_then(|date| date.and_hms_opt(0, 0, 0))
		.map(|value| value.and_utc().fixed_offset())
}

/// Parse a canonical decimal integer. Leading zeros are not canonical so that
/// values such as `007` keep their spelling as strings.
pub fn parse_integer(text: &str) -> Option<i64> {
	let digits = text.strip_prefix(['-', '+']).unwrap_or(text);
	let canonical = !digits.is_empty()
		&& digits.bytes().all(|byte| byte.is_ascii_digit())
		&& (digits == "0" || !digits.starts_with('0'));

	if canonical { text.parse().ok() } else { None }
}

/// Parse a plain decimal float (`1.5`, `-2e3`). Words such as `inf` and `NaN`
/// are not numbers here.
pub fn parse_float(text: &str) -> Option<f64> {
	let body = text.strip_prefix(['-', '+']).unwrap_or(text);
	let starts_numeric = body
		.bytes()
		.next()
		.is_some_and(|byte| byte.is_ascii_digit() || byte == b'.');
	let numeric = body
		.bytes()
		.all(|byte| byte.is_ascii_digit() || matches!(byte, b'.' | b'e' | b'E' | b'-' | b'+'));

	if starts_numeric && numeric {
		text.parse().ok().filter(|value: &f64| value.is_finite())
	} else {
		None
	}
}

fn strip_quotes(text: &str) -> Option<&str> {
	let bytes = text.as_bytes();
	let quote = *bytes.first()?;

	if text.len() >= 2 && matches!(quote, b'"' | b'\'') && bytes[text.len() - 1] == quote {
		Some(&text[1..text.len() - 1])
	} else {
		None
	}
}

fn unescape_quoted(inner: &str) -> String {
	if inner.contains('\\') {
		unescape(inner).unwrap_or_else(|_| inner.to_string())
	} else {
		inner.to_string()
	}
}

/// Split list contents at top-level commas, honouring quotes and nested
/// brackets.
fn split_list(inner: &str) -> Vec<&str> {
	if inner.trim().is_empty() {
		return Vec::new();
	}

	let mut items = Vec::new();
	let mut quote: Option<char> = None;
	let mut depth = 0usize;
	let mut escaped = false;
	let mut start = 0;

	for (index, ch) in inner.char_indices() {
		if escaped {
			escaped = false;
			continue;
		}

		match ch {
			'\\' => escaped = true,
			'"' | '\'' if quote == Some(ch) => quote = None,
			'"' | '\'' if quote.is_none() && inner[start..index].trim().is_empty() => {
				quote = Some(ch);
			}
			'[' if quote.is_none() => depth += 1,
			']' if quote.is_none() => depth = depth.saturating_sub(1),
			',' if quote.is_none() && depth == 0 => {
				items.push(&inner[start..index]);
				start = index + 1;
			}
			_ => {}
		}
	}

	items.push(&inner[start..]);
	items
}

/// Parameters bound to one transclusion: unnamed values under `"1"`, `"2"`,
/// ... and named values under their names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deref, Serialize)]
#[serde(transparent)]
pub struct ParameterSet {
	#[deref]
	values: BTreeMap<String, ParameterValue>,
	#[serde(skip)]
	next_position: usize,
}

impl ParameterSet {
	pub fn new() -> Self {
		Self::default()
	}

	/// Build a set from positional arguments followed by named parameters.
	pub fn from_parts(
		arguments: impl IntoIterator<Item = ParameterValue>,
		named: impl IntoIterator<Item = (String, ParameterValue)>,
	) -> Self {
		let mut set = Self::new();

		for argument in arguments {
			set.push_positional(argument);
		}

		for (name, value) in named {
			set.insert(name, value);
		}

		set
	}

	/// Append an unnamed value under the next positional key.
	pub fn push_positional(&mut self, value: ParameterValue) {
		self.next_position += 1;
		self.values.insert(self.next_position.to_string(), value);
	}

	pub fn insert(&mut self, name: impl Into<String>, value: ParameterValue) {
		self.values.insert(name.into(), value);
	}

	/// The contiguous run of positional values starting at `"1"`.
	pub fn positional(&self) -> Vec<&ParameterValue> {
		(1..)
			.map_while(|index: usize| self.values.get(&index.to_string()))
			.collect()
	}

	/// Values whose key is not a position.
	pub fn named(&self) -> impl Iterator<Item = (&String, &ParameterValue)> {
		self.values
			.iter()
			.filter(|(key, _)| !key.bytes().all(|byte| byte.is_ascii_digit()))
	}

	/// Fill gaps from an ancestor's parameters. Values already present win.
	pub fn merge_inherited(&mut self, parent: &ParameterSet) {
		for (key, value) in &parent.values {
			self.values
				.entry(key.clone())
				.or_insert_with(|| value.clone());
		}
	}
}

/// Parse the parameter text of a marker: whitespace-separated tokens, each
/// either `value` or `name=value`. Quotes and brackets group, `\` escapes.
pub fn parse_parameters(text: &str) -> ParameterSet {
	let mut set = ParameterSet::new();

	for token in split_tokens(text) {
		match split_named(token) {
			Some((name, value)) => set.insert(name, ParameterValue::parse_token(value)),
			None => set.push_positional(ParameterValue::parse_token(token)),
		}
	}

	set
}

impl ParameterValue {
	/// Parse a raw token, dropping escaping backslashes outside quotes.
	fn parse_token(raw: &str) -> Self {
		let trimmed = raw.trim();
		let grouped = strip_quotes(trimmed).is_some() || trimmed.starts_with('[');

		if grouped || !trimmed.contains('\\') {
			ParameterValue::parse(trimmed)
		} else {
			ParameterValue::parse(&remove_escapes(trimmed))
		}
	}
}

fn remove_escapes(text: &str) -> String {
	let mut output = String::with_capacity(text.len());
	let mut chars = text.chars();

	while let Some(ch) = chars.next() {
		if ch == '\\' {
			if let Some(next) = chars.next() {
				output.push(next);
				continue;
			}
		}
		output.push(ch);
	}

	output
}

/// Split parameter text at unescaped whitespace outside quotes and brackets.
fn split_tokens(text: &str) -> Vec<&str> {
	let mut tokens = Vec::new();
	let mut quote: Option<char> = None;
	let mut depth = 0usize;
	let mut escaped = false;
	let mut start: Option<usize> = None;
	let mut previous: Option<char> = None;

	for (index, ch) in text.char_indices() {
		let at_value_start = start.is_none() || matches!(previous, Some('=' | '[' | ','));

		if escaped {
			escaped = false;
		} else if let Some(open) = quote {
			if ch == '\\' {
				escaped = true;
			} else if ch == open {
				quote = None;
			}
		} else if ch == '\\' {
			escaped = true;
		} else if ch.is_whitespace() && depth == 0 {
			if let Some(token_start) = start.take() {
				tokens.push(&text[token_start..index]);
			}
			previous = Some(ch);
			continue;
		} else if matches!(ch, '"' | '\'') && at_value_start {
			quote = Some(ch);
		} else if ch == '[' && (at_value_start || depth > 0) {
			depth += 1;
		} else if ch == ']' && depth > 0 {
			depth -= 1;
		}

		if start.is_none() {
			start = Some(index);
		}
		previous = Some(ch);
	}

	if let Some(token_start) = start {
		tokens.push(&text[token_start..]);
	}

	tokens
}

/// Split `name=value` when `name` is an identifier or a position.
fn split_named(token: &str) -> Option<(&str, &str)> {
	if strip_quotes(token).is_some() || token.starts_with('[') {
		return None;
	}

	let (name, value) = token.split_once('=')?;
	is_parameter_name(name).then_some((name, value))
}

/// `[A-Za-z_@][A-Za-z0-9_-]*` or all digits.
pub fn is_parameter_name(name: &str) -> bool {
	let mut chars = name.chars();
	let Some(first) = chars.next() else {
		return false;
	};

	if first.is_ascii_digit() {
		return name.bytes().all(|byte| byte.is_ascii_digit());
	}

	(first.is_ascii_alphabetic() || matches!(first, '_' | '@'))
		&& chars.all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-'))
}

#[cfg(test)]
mod tests {
	use rstest::rstest;
	use similar_asserts::assert_eq;

	use super::*;

	#[rstest]
	#[case::double_quoted("\"hello world\"", ParameterValue::from("hello world"))]
	#[case::single_quoted("'hello'", ParameterValue::from("hello"))]
	#[case::escaped_quote(r#""say \"hi\"""#, ParameterValue::from("say \"hi\""))]
	#[case::boolean("TRUE", ParameterValue::Bool(true))]
	#[case::integer("42", ParameterValue::Int(42))]
	#[case::negative("-3", ParameterValue::Int(-3))]
	#[case::leading_zero("007", ParameterValue::from("007"))]
	#[case::float("1.5", ParameterValue::Float(1.5))]
	#[case::not_a_number("inf", ParameterValue::from("inf"))]
	#[case::plain("plain", ParameterValue::from("plain"))]
	#[case::list("[1, two, \"3\"]", ParameterValue::List(vec![
		ParameterValue::Int(1),
		ParameterValue::from("two"),
		ParameterValue::from("3"),
	]))]
	#[case::empty_list("[]", ParameterValue::List(vec![]))]
	fn infers_value_types(#[case] raw: &str, #[case] expected: ParameterValue) {
		assert_eq!(ParameterValue::parse(raw), expected);
	}

	#[test]
	fn deep_lists_keep_raw_text_past_limit() {
		let levels = 50_000;
		let raw = format!("{}1{}", "[".repeat(levels), "]".repeat(levels));
		let mut value = ParameterValue::parse(&raw);
		let mut lists = 0;

		while let ParameterValue::List(mut items) = value {
			assert_eq!(items.len(), 1);
			lists += 1;
			value = items.remove(0);
		}

		assert_eq!(lists, MAX_LIST_DEPTH);
		let inner = format!(
			"{}1{}",
			"[".repeat(levels - MAX_LIST_DEPTH),
			"]".repeat(levels - MAX_LIST_DEPTH)
		);
		assert_eq!(value, ParameterValue::String(inner));
	}

	#[test]
	fn reads_timestamps() {
		let Some(date) = parse_timestamp("2024-03-01") else {
			panic!("date should parse");
		};
		assert_eq!(ParameterValue::Timestamp(date).to_string(), "2024-03-01");

		let Some(moment) = parse_timestamp("2024-03-01T10:30:00+02:00") else {
			panic!("rfc3339 should parse");
		};
		assert_eq!(
			ParameterValue::Timestamp(moment).to_string(),
			"2024-03-01T10:30:00+02:00"
		);
	}

	#[test]
	fn binds_positional_and_named_parameters() {
		let set = parse_parameters("first name=\"Ada Lovelace\" 2 tags=[a, b] @flag=true");

		assert_eq!(
			set.positional(),
			vec![&ParameterValue::from("first"), &ParameterValue::Int(2)]
		);
		assert_eq!(set.get("name"), Some(&ParameterValue::from("Ada Lovelace")));
		assert_eq!(
			set.get("tags"),
			Some(&ParameterValue::List(vec![
				ParameterValue::from("a"),
				ParameterValue::from("b"),
			]))
		);
		assert_eq!(set.get("@flag"), Some(&ParameterValue::Bool(true)));
		assert_eq!(set.named().count(), 3);
	}

	#[test]
	fn escaped_whitespace_stays_in_token() {
		let set = parse_parameters("hello\\ world other");
		assert_eq!(
			set.positional(),
			vec![&ParameterValue::from("hello world"), &ParameterValue::from("other")]
		);
	}

	#[test]
	fn apostrophes_inside_words_do_not_quote() {
		let set = parse_parameters("Bob's cat");
		assert_eq!(
			set.positional(),
			vec![&ParameterValue::from("Bob's"), &ParameterValue::from("cat")]
		);
	}

	#[test]
	fn invalid_names_stay_positional() {
		let set = parse_parameters("a+b=c");
		assert_eq!(set.positional(), vec![&ParameterValue::from("a+b=c")]);
	}

	#[test]
	fn child_values_win_when_merging() {
		let mut child = parse_parameters("name=child");
		let parent = parse_parameters("inherited name=parent");
		child.merge_inherited(&parent);

		assert_eq!(child.get("name"), Some(&ParameterValue::from("child")));
		assert_eq!(child.get("1"), Some(&ParameterValue::from("inherited")));
	}
}
