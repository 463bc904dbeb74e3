use std::borrow::Cow;

use chrono::DateTime;
use chrono::FixedOffset;
use chrono::format::Item;
use chrono::format::StrftimeItems;
use float_cmp::approx_eq;

use super::HelperContext;
use super::HelperRegistry;
use crate::NumberStyle;
use crate::PageTitle;
use crate::normalize_title_text;
use crate::parameters::format_timestamp;
use crate::parameters::parse_float;
use crate::parameters::parse_integer;
use crate::parameters::parse_timestamp;
use crate::sandbox::ScriptMode;
use crate::sandbox::run_script;

/// Widest padding `padleft` and `padright` will produce.
const MAX_PAD_WIDTH: usize = 4096;
/// Largest precision accepted in a numeric format.
const MAX_PRECISION: usize = 30;

pub(super) fn register(registry: &mut HelperRegistry) {
	registry.register("if", if_helper);
	registry.register("ifequal", |args: &[String], context: &HelperContext| {
		if_equal(args, context, true)
	});
	registry.register("ifnotequal", |args: &[String], context: &HelperContext| {
		if_equal(args, context, false)
	});
	registry.register("ifcategory", |args: &[String], context: &HelperContext| {
		let is_category = context
			.namespace()
			.is_some_and(|namespace| namespace.eq_ignore_ascii_case(&context.options.category_namespace));
		choose(args, 0, is_category)
	});
	registry.register("iftemplate", |args: &[String], context: &HelperContext| {
		choose(args, 0, context.is_template)
	});
	registry.register("ifnottemplate", |args: &[String], context: &HelperContext| {
		choose(args, 0, !context.is_template)
	});
	registry.register("ifpreview", |args: &[String], context: &HelperContext| {
		choose(args, 0, context.is_preview)
	});
	registry.register("ifnotpreview", |args: &[String], context: &HelperContext| {
		choose(args, 0, !context.is_preview)
	});
	registry.register("iftalk", |args: &[String], context: &HelperContext| {
		choose(args, 0, context.is_talk)
	});
	registry.register("ifnottalk", |args: &[String], context: &HelperContext| {
		choose(args, 0, !context.is_talk)
	});
	registry.register("format", format_helper);
	registry.register("padleft", |args: &[String], _: &HelperContext| pad(args, true));
	registry.register("padright", |args: &[String], _: &HelperContext| pad(args, false));
	registry.register("pagename", |_: &[String], context: &HelperContext| {
		context
			.title
			.as_ref()
			.map(|title| title.title.clone())
			.unwrap_or_default()
	});
	registry.register("fullpagename", |_: &[String], context: &HelperContext| {
		context
			.title
			.as_ref()
			.map(PageTitle::full_title)
			.unwrap_or_default()
	});
	registry.register("namespace", |_: &[String], context: &HelperContext| {
		context.namespace().unwrap_or_default().to_string()
	});
	registry.register("domain", |_: &[String], context: &HelperContext| {
		context
			.title
			.as_ref()
			.and_then(|title| title.domain.clone())
			.unwrap_or_default()
	});
	registry.register("toc", toc_helper);
	registry.register("notoc", |_: &[String], _: &HelperContext| {
		"<!-- wikit:notoc -->".to_string()
	});
	registry.register("titlecase", |args: &[String], _: &HelperContext| {
		let value = arg(args, 0);
		if is_truthy(arg(args, 1)) {
			general_title_case(value)
		} else {
			normalize_title_text(value)
		}
	});
	registry.register("tolower", |args: &[String], _: &HelperContext| {
		arg(args, 0).to_lowercase()
	});
	registry.register("toupper", |args: &[String], _: &HelperContext| {
		arg(args, 0).to_uppercase()
	});
	registry.register("preview", |args: &[String], context: &HelperContext| {
		if context.is_preview {
			format!("<!-- wikit:preview -->{}<!-- /wikit:preview -->", arg(args, 0))
		} else {
			String::new()
		}
	});
	registry.register("evaluate", |args: &[String], context: &HelperContext| {
		script_helper(args, context, ScriptMode::Evaluate)
	});
	registry.register("execute", |args: &[String], context: &HelperContext| {
		script_helper(args, context, ScriptMode::Execute)
	});

	registry.alias("ifeq", "ifequal");
	registry.alias("ifneq", "ifnotequal");
	registry.alias("eval", "evaluate");
	registry.alias("exec", "execute");
}

fn arg(args: &[String], index: usize) -> &str {
	args.get(index).map_or("", String::as_str)
}

/// `args[offset]` when `condition` holds, otherwise `args[offset + 1]`.
fn choose(args: &[String], offset: usize, condition: bool) -> String {
	let index = if condition { offset } else { offset + 1 };
	arg(args, index).to_string()
}

/// Booleans by name, numbers when greater than zero, any other non-empty text.
pub fn is_truthy(value: &str) -> bool {
	let value = value.trim();

	if value.eq_ignore_ascii_case("true") {
		return true;
	}

	if value.eq_ignore_ascii_case("false") {
		return false;
	}

	if let Some(number) = parse_float(value) {
		return number > 0.0;
	}

	!value.is_empty()
}

fn if_helper(args: &[String], _: &HelperContext) -> String {
	choose(args, 1, is_truthy(arg(args, 0)))
}

fn if_equal(args: &[String], context: &HelperContext, expected: bool) -> String {
	let equal = values_equal(arg(args, 0), arg(args, 1), context.options.number_style);
	choose(args, 2, equal == expected)
}

/// Compare two helper arguments as booleans, integers, floats and finally as
/// exact text.
pub fn values_equal(left: &str, right: &str, style: NumberStyle) -> bool {
	let (left_trimmed, right_trimmed) = (left.trim(), right.trim());

	if let (Some(a), Some(b)) = (parse_bool(left_trimmed), parse_bool(right_trimmed)) {
		return a == b;
	}

	let left_number = number_text(left_trimmed, style);
	let right_number = number_text(right_trimmed, style);

	if let (Some(a), Some(b)) = (parse_integer(&left_number), parse_integer(&right_number)) {
		return a == b;
	}

	if let (Some(a), Some(b)) = (parse_float(&left_number), parse_float(&right_number)) {
		return approx_eq!(f64, a, b, ulps = 4);
	}

	left == right
}

fn parse_bool(value: &str) -> Option<bool> {
	if value.eq_ignore_ascii_case("true") {
		Some(true)
	} else if value.eq_ignore_ascii_case("false") {
		Some(false)
	} else {
		None
	}
}

/// Strip well-formed `,` group separators when the style allows them.
fn number_text(value: &str, style: NumberStyle) -> Cow<'_, str> {
	if !style.tolerate_group_separators || !value.contains(',') {
		return Cow::Borrowed(value);
	}

	let unsigned = value.trim_start_matches(['-', '+']);
	let integer_part = unsigned.split('.').next().unwrap_or_default();
	let mut groups = integer_part.split(',');
	let first_ok = groups
		.next()
		.is_some_and(|group| (1..=3).contains(&group.len()) && group.bytes().all(|b| b.is_ascii_digit()));
	let rest_ok = groups.all(|group| group.len() == 3 && group.bytes().all(|b| b.is_ascii_digit()));
	let fraction_ok = !unsigned[integer_part.len()..].contains(',');

	if first_ok && rest_ok && fraction_ok {
		Cow::Owned(value.replace(',', ""))
	} else {
		Cow::Borrowed(value)
	}
}

fn format_helper(args: &[String], _: &HelperContext) -> String {
	let value = arg(args, 0);
	let trimmed = value.trim();
	let format = arg(args, 1).trim();

	if let Some(integer) = parse_integer(trimmed) {
		return format_integer(integer, format).unwrap_or_else(|| integer.to_string());
	}

	if let Some(float) = parse_float(trimmed) {
		return format_float(float, format).unwrap_or_else(|| float.to_string());
	}

	if let Some(timestamp) = parse_timestamp(trimmed) {
		return format_date(&timestamp, format).unwrap_or_else(|| format_timestamp(&timestamp));
	}

	value.to_string()
}

/// Split `N2` into the specifier and an optional precision.
fn numeric_format(format: &str) -> Option<(char, Option<usize>)> {
	let mut chars = format.chars();
	let specifier = chars.next()?;
	let digits = chars.as_str();

	if !specifier.is_ascii_alphabetic() {
		return None;
	}

	if digits.is_empty() {
		return Some((specifier, None));
	}

	let precision = digits.parse::<usize>().ok().filter(|p| *p <= MAX_PRECISION)?;
	Some((specifier, Some(precision)))
}

fn format_integer(value: i64, format: &str) -> Option<String> {
	let (specifier, precision) = numeric_format(format)?;

	match specifier {
		'D' | 'd' => {
			let width = precision.unwrap_or(0);
			let digits = format!("{:0width$}", value.unsigned_abs());
			Some(if value < 0 { format!("-{digits}") } else { digits })
		}
		'X' => Some(format!("{value:0width$X}", width = precision.unwrap_or(0))),
		'x' => Some(format!("{value:0width$x}", width = precision.unwrap_or(0))),
		_ => format_float(value as f64, format),
	}
}

fn format_float(value: f64, format: &str) -> Option<String> {
	let (specifier, precision) = numeric_format(format)?;

	match specifier {
		'N' | 'n' => Some(fixed(value, precision.unwrap_or(2), true)),
		'F' | 'f' => Some(fixed(value, precision.unwrap_or(2), false)),
		'P' | 'p' => Some(format!("{}%", fixed(value * 100.0, precision.unwrap_or(2), true))),
		'E' | 'e' => Some(scientific(value, precision.unwrap_or(6), specifier)),
		_ => None,
	}
}

fn fixed(value: f64, precision: usize, grouped: bool) -> String {
	let text = format!("{:.precision$}", value.abs());
	let (integer, fraction) = match text.split_once('.') {
		Some((integer, fraction)) => (integer, Some(fraction)),
		None => (text.as_str(), None),
	};

	let mut output = String::new();
	let is_zero = text.bytes().all(|byte| matches!(byte, b'0' | b'.'));
	if value.is_sign_negative() && !is_zero {
		output.push('-');
	}

	if grouped {
		output.push_str(&group_thousands(integer));
	} else {
		output.push_str(integer);
	}

	if let Some(fraction) = fraction {
		output.push('.');
		output.push_str(fraction);
	}

	output
}

fn group_thousands(digits: &str) -> String {
	let mut output = String::with_capacity(digits.len() + digits.len() / 3);

	for (index, ch) in digits.chars().enumerate() {
		if index > 0 && (digits.len() - index) % 3 == 0 {
			output.push(',');
		}
		output.push(ch);
	}

	output
}

fn scientific(value: f64, precision: usize, specifier: char) -> String {
	let text = format!("{value:.precision$e}");
	let (mantissa, exponent) = text.split_once('e').unwrap_or((text.as_str(), "0"));
	let exponent: i32 = exponent.parse().unwrap_or(0);
	let sign = if exponent < 0 { '-' } else { '+' };
	let marker = if specifier == 'E' { 'E' } else { 'e' };

	format!("{mantissa}{marker}{sign}{:03}", exponent.abs())
}

fn format_date(value: &DateTime<FixedOffset>, format: &str) -> Option<String> {
	let pattern = match format {
		"" => return None,
		"d" => "%Y-%m-%d",
		"D" => "%A, %B %-d, %Y",
		"t" => "%H:%M",
		"T" => "%H:%M:%S",
		"g" => "%Y-%m-%d %H:%M",
		"G" => "%Y-%m-%d %H:%M:%S",
		"s" => "%Y-%m-%dT%H:%M:%S",
		"o" | "O" => return Some(value.to_rfc3339()),
		custom if custom.contains('%') => custom,
		_ => return None,
	};

	let invalid = StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error));
	if invalid {
		return None;
	}

	Some(value.format(pattern).to_string())
}

fn pad(args: &[String], left: bool) -> String {
	let value = arg(args, 0);
	let Ok(width) = arg(args, 1).trim().parse::<usize>() else {
		return value.to_string();
	};
	let width = width.min(MAX_PAD_WIDTH);
	let length = value.chars().count();

	if width <= length {
		return value.to_string();
	}

	let fill = arg(args, 2).chars().next().unwrap_or('0');
	let padding: String = std::iter::repeat_n(fill, width - length).collect();

	if left {
		format!("{padding}{value}")
	} else {
		format!("{value}{padding}")
	}
}

fn toc_helper(args: &[String], context: &HelperContext) -> String {
	let options = &context.options;
	let depth = level_or(arg(args, 0), options.toc_depth);
	let start = level_or(arg(args, 1), options.toc_start_level);
	let title = match arg(args, 2).trim() {
		"" | "*" => options.toc_title.as_str(),
		title => title,
	};
	let title = title.replace('"', "&quot;").replace("--", "&#45;&#45;");

	format!("<!-- wikit:toc depth={depth} start={start} title=\"{title}\" -->")
}

/// Heading levels run from 1 to 6; `*`, empty and invalid values use the
/// default.
fn level_or(value: &str, default: u8) -> u8 {
	value
		.trim()
		.parse::<u8>()
		.ok()
		.filter(|level| (1..=6).contains(level))
		.unwrap_or(default)
}

/// Capitalise each word; words written entirely in capitals are kept.
fn general_title_case(value: &str) -> String {
	let mut output = String::with_capacity(value.len());
	let mut word = String::new();

	let flush = |word: &mut String, output: &mut String| {
		if word.is_empty() {
			return;
		}

		let is_acronym = word.chars().any(char::is_alphabetic)
			&& word.chars().filter(|ch| ch.is_alphabetic()).all(char::is_uppercase);
		if is_acronym {
			output.push_str(word);
		} else {
			let mut chars = word.chars();
			if let Some(first) = chars.next() {
				output.extend(first.to_uppercase());
				output.push_str(&chars.as_str().to_lowercase());
			}
		}
		word.clear();
	};

	for ch in value.chars() {
		if ch.is_whitespace() {
			flush(&mut word, &mut output);
			output.push(ch);
		} else {
			word.push(ch);
		}
	}
	flush(&mut word, &mut output);

	output
}

fn script_helper(args: &[String], context: &HelperContext, mode: ScriptMode) -> String {
	if context.is_cancelled() {
		return String::new();
	}

	run_script(arg(args, 0), mode, context, &context.options.script)
}
