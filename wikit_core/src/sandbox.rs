//! Resource-bounded Lua evaluation for the `evaluate` and `execute` helpers.
//!
//! Every invocation gets a fresh interpreter with only the `table`, `string`,
//! `math` and `utf8` libraries. A hook enforces an instruction ceiling, a
//! wall-clock timeout and a call-depth ceiling; the allocator enforces a
//! memory ceiling. Lua's pattern matcher runs inside C where the hook never
//! fires, so `string.find`, `match`, `gmatch` and `gsub` only accept calls
//! whose worst-case matching cost fits [`MAX_PATTERN_STEPS`]. Any failure
//! produces an empty string.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use mlua::DebugEvent;
use mlua::Function;
use mlua::HookTriggers;
use mlua::Lua;
use mlua::LuaOptions;
use mlua::MultiValue;
use mlua::StdLib;
use mlua::Table;
use mlua::Value;
use mlua::VmState;
use tracing::debug;
use tracing::warn;

use crate::HelperContext;
use crate::ParameterValue;
use crate::ScriptLimits;

/// Instructions executed between two limit checks.
const INSTRUCTION_STEP: u32 = 1000;
/// Lua allows 200 locals per function; leave room for the prelude and the
/// script's own locals.
const MAX_PARAMETER_LOCALS: usize = 120;
/// Base functions removed before any script runs. Without `pcall` and
/// `xpcall` a limit error cannot be caught by the script.
const REMOVED_GLOBALS: [&str; 9] = [
	"pcall",
	"xpcall",
	"load",
	"loadstring",
	"dofile",
	"loadfile",
	"require",
	"collectgarbage",
	"print",
];
/// Names bound by the prelude. Parameters with these names are not bound.
const PRELUDE_NAMES: [&str; 8] = [
	"title",
	"namespace",
	"domain",
	"fullTitle",
	"isTemplate",
	"isPreview",
	"isTalk",
	"args",
];
/// String library functions that run Lua's backtracking matcher.
const PATTERN_FUNCTIONS: [&str; 4] = ["find", "match", "gmatch", "gsub"];
/// Upper bound on matcher steps a single pattern call may need.
pub const MAX_PATTERN_STEPS: u64 = 50_000_000;
const LUA_KEYWORDS: [&str; 22] = [
	"and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if", "in",
	"local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

/// How the script's result is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptMode {
	/// The value of the trailing expression.
	Evaluate,
	/// The script is a function body; its explicit `return` is the result.
	Execute,
}

/// Run `script` in a fresh sandbox. Returns the result as text, or an empty
/// string on any failure, timeout or limit violation.
pub fn run_script(
	script: &str,
	mode: ScriptMode,
	context: &HelperContext,
	limits: &ScriptLimits,
) -> String {
	if context.is_cancelled() || script.trim().is_empty() {
		return String::new();
	}

	match execute(script, mode, context, limits) {
		Ok(output) => output,
		Err(error) => {
			warn!(%error, ?mode, "script failed");
			String::new()
		}
	}
}

fn execute(
	script: &str,
	mode: ScriptMode,
	context: &HelperContext,
	limits: &ScriptLimits,
) -> mlua::Result<String> {
	let lua = Lua::new_with(
		StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8,
		LuaOptions::default(),
	)?;
	lua.set_memory_limit(limits.memory_limit)?;

	let globals = lua.globals();
	for name in REMOVED_GLOBALS {
		globals.set(name, Value::Nil)?;
	}

	guard_patterns(&lua)?;
	install_limits(&lua, limits)?;

	let prelude = prelude(context);
	let function = compile(&lua, &prelude, script, mode)?;
	let output: String = function.call(())?;
	debug!(?mode, bytes = output.len(), "script finished");

	Ok(output)
}

fn install_limits(lua: &Lua, limits: &ScriptLimits) -> mlua::Result<()> {
	let started = Instant::now();
	let timeout = Duration::from_millis(limits.timeout_ms);
	let max_instructions = limits.max_instructions;
	let max_call_depth = limits.max_call_depth;
	let executed = AtomicU64::new(0);
	let depth = AtomicUsize::new(0);

	let triggers = HookTriggers::new()
		.on_calls()
		.on_returns()
		.every_nth_instruction(INSTRUCTION_STEP);

	lua.set_hook(triggers, move |_lua, debug| {
		match debug.event() {
			DebugEvent::Call => {
				if depth.fetch_add(1, Ordering::Relaxed) + 1 > max_call_depth {
					return Err(mlua::Error::runtime("call depth limit exceeded"));
				}
			}
			DebugEvent::Ret => {
				let current = depth.load(Ordering::Relaxed);
				depth.store(current.saturating_sub(1), Ordering::Relaxed);
			}
			DebugEvent::Count => {
				let total =
					executed.fetch_add(u64::from(INSTRUCTION_STEP), Ordering::Relaxed) + u64::from(INSTRUCTION_STEP);
				if total > max_instructions {
					return Err(mlua::Error::runtime("instruction limit exceeded"));
				}
				if started.elapsed() > timeout {
					return Err(mlua::Error::runtime("script timed out"));
				}
			}
			_ => {}
		}

		Ok(VmState::Continue)
	})
}

/// Replace the pattern functions of the `string` table (which also backs
/// string methods) with versions that refuse calls too costly to finish
/// within the limits.
fn guard_patterns(lua: &Lua) -> mlua::Result<()> {
	let string: Table = lua.globals().get("string")?;

	for name in PATTERN_FUNCTIONS {
		let original: Function = string.get(name)?;
		let guarded = lua.create_function(move |_, args: MultiValue| {
			let cost = pattern_cost(name, &args);
			if cost > MAX_PATTERN_STEPS {
				return Err(mlua::Error::runtime(format!(
					"string.{name}: pattern too costly for its subject"
				)));
			}
			original.call::<MultiValue>(args)
		})?;
		string.set(name, guarded)?;
	}

	Ok(())
}

/// Worst-case matcher steps for a call to the string function `name`.
fn pattern_cost(name: &str, args: &MultiValue) -> u64 {
	let plain = name == "find" && args.get(3).is_some_and(is_truthy_value);
	let subject = args.front().map_or(0, text_length);
	let positions = subject as u64 + 1;

	let shape = match args.get(1) {
		Some(Value::String(pattern)) => pattern_shape(&pattern.as_bytes()),
		_ => PatternShape::default(),
	};

	if plain {
		return positions;
	}

	// `gmatch` ignores the anchor.
	let starts = if shape.anchored && name != "gmatch" {
		1
	} else {
		positions
	};

	positions
		.saturating_pow(shape.branching)
		.saturating_mul(starts)
}

fn is_truthy_value(value: &Value) -> bool {
	!matches!(value, Value::Nil | Value::Boolean(false))
}

/// Byte length of a value the string library would coerce to text.
fn text_length(value: &Value) -> usize {
	match value {
		Value::String(text) => text.as_bytes().len(),
		Value::Integer(_) | Value::Number(_) => 32,
		_ => 0,
	}
}

/// How a Lua pattern can backtrack: whether it is anchored and how many of
/// its items try more than one length.
#[derive(Debug, Default, PartialEq, Eq)]
struct PatternShape {
	anchored: bool,
	branching: u32,
}

fn pattern_shape(pattern: &[u8]) -> PatternShape {
	let mut shape = PatternShape::default();
	let mut index = 0;

	if pattern.first() == Some(&b'^') {
		shape.anchored = true;
		index = 1;
	}

	while index < pattern.len() {
		let item_end = match pattern[index] {
			b'(' | b')' => {
				index += 1;
				continue;
			}
			b'%' => {
				match pattern.get(index + 1) {
					// `%bxy` scans ahead for the balance.
					Some(b'b') => {
						shape.branching += 1;
						index += 4;
						continue;
					}
					Some(b'f') => {
						index = set_end(pattern, index + 2);
						continue;
					}
					// Back-references compare a whole capture.
					Some(digit) if digit.is_ascii_digit() => {
						shape.branching += 1;
						index += 2;
						continue;
					}
					_ => index + 2,
				}
			}
			b'[' => set_end(pattern, index),
			_ => index + 1,
		};

		index = item_end;
		if matches!(pattern.get(index), Some(b'*' | b'+' | b'-' | b'?')) {
			shape.branching += 1;
			index += 1;
		}
	}

	shape
}

/// Index just past the character set opening at `start`.
fn set_end(pattern: &[u8], start: usize) -> usize {
	let mut index = start + 1;
	if pattern.get(index) == Some(&b'^') {
		index += 1;
	}
	// A leading `]` is a member of the set.
	if pattern.get(index) == Some(&b']') {
		index += 1;
	}

	while index < pattern.len() {
		match pattern[index] {
			b'%' => index += 2,
			b']' => return index + 1,
			_ => index += 1,
		}
	}

	pattern.len()
}

/// Wrap the body so the result always comes back as a string.
fn wrap(prelude: &str, body: &str) -> String {
	format!(
		"local __wikit_result = (function()\n{prelude}{body}\nend)()\nif __wikit_result == nil then \
		 return \"\" end\nreturn tostring(__wikit_result)\n"
	)
}

fn compile(lua: &Lua, prelude: &str, script: &str, mode: ScriptMode) -> mlua::Result<Function> {
	let load = |body: &str| lua.load(wrap(prelude, body)).into_function();

	match mode {
		ScriptMode::Execute => load(script),
		ScriptMode::Evaluate => {
			let expression = script.trim().trim_end_matches(';');
			match load(&format!("return {expression}")) {
				Ok(function) => Ok(function),
				Err(error) => {
					let Some((head, tail)) = split_last_statement(script) else {
						return Err(error);
					};
					let body = if starts_with_keyword(tail, "return") {
						format!("{head}\n{tail}")
					} else {
						format!("{head}\nreturn {tail}")
					};
					load(&body)
				}
			}
		}
	}
}

fn starts_with_keyword(text: &str, keyword: &str) -> bool {
	text.strip_prefix(keyword)
		.is_some_and(|rest| !rest.starts_with(|ch: char| ch.is_alphanumeric() || ch == '_'))
}

/// Split at the last top-level `;` or newline, outside strings and brackets.
fn split_last_statement(script: &str) -> Option<(&str, &str)> {
	let trimmed = script.trim().trim_end_matches(';').trim_end();
	let bytes = trimmed.as_bytes();
	let mut quote: Option<u8> = None;
	let mut depth = 0i32;
	let mut split = None;
	let mut index = 0;

	while index < bytes.len() {
		let byte = bytes[index];

		if let Some(open) = quote {
			if byte == b'\\' {
				index += 2;
				continue;
			}
			if byte == open {
				quote = None;
			}
			index += 1;
			continue;
		}

		match byte {
			b'"' | b'\'' => quote = Some(byte),
			b'(' | b'{' | b'[' => depth += 1,
			b')' | b'}' | b']' => depth -= 1,
			b';' | b'\n' if depth == 0 => split = Some(index),
			_ => {}
		}
		index += 1;
	}

	let at = split?;
	let tail = trimmed[at + 1..].trim();
	(!tail.is_empty()).then_some((&trimmed[..at], tail))
}

/// Local declarations describing the calling page and its parameters.
fn prelude(context: &HelperContext) -> String {
	let title = context.title.as_ref();
	let mut output = String::new();

	let mut declare = |name: &str, value: String| {
		output.push_str("local ");
		output.push_str(name);
		output.push_str(" = ");
		output.push_str(&value);
		output.push('\n');
	};

	declare("title", lua_string(title.map_or("", |title| title.title.as_str())));
	declare("namespace", lua_string(context.namespace().unwrap_or_default()));
	declare(
		"domain",
		lua_string(title.and_then(|title| title.domain.as_deref()).unwrap_or_default()),
	);
	declare(
		"fullTitle",
		lua_string(&title.map(crate::PageTitle::full_title).unwrap_or_default()),
	);
	declare("isTemplate", context.is_template.to_string());
	declare("isPreview", context.is_preview.to_string());
	declare("isTalk", context.is_talk.to_string());

	let positional: Vec<String> = context
		.parameters
		.positional()
		.into_iter()
		.map(lua_literal)
		.collect();
	declare("args", format!("{{{}}}", positional.join(", ")));

	for (name, value) in context
		.parameters
		.named()
		.filter(|(name, _)| is_lua_identifier(name) && !PRELUDE_NAMES.contains(&name.as_str()))
		.take(MAX_PARAMETER_LOCALS)
	{
		declare(name, lua_literal(value));
	}

	output
}

fn is_lua_identifier(name: &str) -> bool {
	let mut chars = name.chars();
	let valid_start = chars
		.next()
		.is_some_and(|ch| ch.is_ascii_alphabetic() || ch == '_');

	valid_start
		&& chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
		&& !LUA_KEYWORDS.contains(&name)
}

fn lua_literal(value: &ParameterValue) -> String {
	match value {
		ParameterValue::String(text) => lua_string(text),
		ParameterValue::Bool(flag) => flag.to_string(),
		ParameterValue::Int(number) => number.to_string(),
		ParameterValue::Float(number) if number.is_nan() => "(0/0)".to_string(),
		ParameterValue::Float(number) if number.is_infinite() && number.is_sign_negative() => {
			"(-1/0)".to_string()
		}
		ParameterValue::Float(number) if number.is_infinite() => "(1/0)".to_string(),
		ParameterValue::Float(number) => format!("{number:?}"),
		ParameterValue::Timestamp(timestamp) => timestamp.timestamp().to_string(),
		ParameterValue::List(values) => {
			let items: Vec<String> = values.iter().map(lua_literal).collect();
			format!("{{{}}}", items.join(", "))
		}
	}
}

/// Quote text as a Lua string literal.
fn lua_string(text: &str) -> String {
	let mut output = String::with_capacity(text.len() + 2);
	output.push('"');

	for ch in text.chars() {
		match ch {
			'\\' => output.push_str("\\\\"),
			'"' => output.push_str("\\\""),
			'\n' => output.push_str("\\n"),
			'\r' => output.push_str("\\r"),
			'\t' => output.push_str("\\t"),
			ch if ch.is_ascii_control() => output.push_str(&format!("\\{:03}", u32::from(ch))),
			ch => output.push(ch),
		}
	}

	output.push('"');
	output
}
