use std::collections::HashMap;
use std::ops::Range;

use super::DISPATCH_FUNCTION;
use super::HelperRegistry;
use crate::lexer::inert_ranges;

/// Template source produced from wiki text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CompiledTemplate {
	pub source: String,
	/// Number of helper calls, including nested ones.
	pub calls: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
	Text(String),
	Call { name: String, args: Vec<Vec<Node>> },
}

/// Deepest helper invocation compiled into a call. Invocations nested deeper
/// stay literal text.
pub const MAX_INVOCATION_DEPTH: usize = 32;

/// Compile wiki text into template source where each known helper invocation
/// is a dispatch call and everything else renders as literal text.
pub(crate) fn compile(text: &str, registry: &HelperRegistry) -> CompiledTemplate {
	let inert = inert_ranges(text);
	let closing = closing_offsets(text.as_bytes(), &inert);
	let parser = InvocationParser {
		source: text,
		bytes: text.as_bytes(),
		inert: &inert,
		closing,
		registry,
	};
	let nodes = parser.parse_document();

	let mut source = String::with_capacity(text.len() + 32);
	let mut calls = 0;
	emit_document(&nodes, &mut source, &mut calls);

	CompiledTemplate { source, calls }
}

/// Map every `{{` to the offset just past the `}}` closing it. Escaped bytes
/// and code regions are skipped, unmatched braces are left out.
fn closing_offsets(bytes: &[u8], inert: &[Range<usize>]) -> HashMap<usize, usize> {
	let mut closing = HashMap::new();
	let mut open = Vec::new();
	let mut next_inert = 0;
	let mut position = 0;

	while position < bytes.len() {
		while inert
			.get(next_inert)
			.is_some_and(|range| range.start < position)
		{
			next_inert += 1;
		}

		if let Some(range) = inert
			.get(next_inert)
			.filter(|range| range.start == position)
		{
			position = range.end;
			next_inert += 1;
			continue;
		}

		match bytes.get(position..position + 2) {
			Some([b'\\', _]) => position += 2,
			Some(b"{{") => {
				open.push(position);
				position += 2;
			}
			Some(b"}}") => {
				if let Some(start) = open.pop() {
					closing.insert(start, position + 2);
				}
				position += 2;
			}
			_ => position += 1,
		}
	}

	closing
}

struct InvocationParser<'a> {
	source: &'a str,
	bytes: &'a [u8],
	inert: &'a [Range<usize>],
	closing: HashMap<usize, usize>,
	registry: &'a HelperRegistry,
}

impl InvocationParser<'_> {
	fn starts_with(&self, position: usize, pattern: &str) -> bool {
		self.bytes
			.get(position..position + pattern.len())
			.is_some_and(|slice| slice == pattern.as_bytes())
	}

	fn inert_end(&self, position: usize) -> Option<usize> {
		let index = self.inert.partition_point(|range| range.start < position);
		self.inert
			.get(index)
			.filter(|range| range.start == position)
			.map(|range| range.end)
	}

	fn next_char_len(&self, position: usize) -> usize {
		self.source[position..]
			.chars()
			.next()
			.map_or(1, char::len_utf8)
	}

	fn parse_document(&self) -> Vec<Node> {
		let mut nodes = Vec::new();
		let mut literal_start = 0;
		let mut position = 0;

		while position < self.bytes.len() {
			if let Some(end) = self.inert_end(position) {
				position = end;
				continue;
			}

			if self.bytes[position] == b'\\' {
				position += 1;
				if position < self.bytes.len() {
					position += self.next_char_len(position);
				}
				continue;
			}

			if self.starts_with(position, "{{") {
				if let Some((node, end)) = self.parse_invocation(position, 0) {
					push_text(&mut nodes, &self.source[literal_start..position]);
					push_node(&mut nodes, node);
					position = end;
					literal_start = end;
				} else {
					position += 2;
				}
				continue;
			}

			position += self.next_char_len(position);
		}

		push_text(&mut nodes, &self.source[literal_start..]);
		nodes
	}

	/// Parse `{{name}}` or `{{name|arg|...}}` starting at `open`. Unknown
	/// names and invocations at `MAX_INVOCATION_DEPTH` become their literal
	/// text.
	fn parse_invocation(&self, open: usize, depth: usize) -> Option<(Node, usize)> {
		let end = *self.closing.get(&open)?;
		let name_start = open + 2;
		let first = *self.bytes.get(name_start)?;
		if !first.is_ascii_alphabetic() {
			return None;
		}

		let name_end = self.bytes[name_start..]
			.iter()
			.position(|byte| !(byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-')))
			.map_or(self.bytes.len(), |offset| name_start + offset);
		let name = &self.source[name_start..name_end];

		if !self.starts_with(name_end, "}}") && self.bytes.get(name_end) != Some(&b'|') {
			return None;
		}

		if !self.registry.contains(name) || depth >= MAX_INVOCATION_DEPTH {
			return Some((Node::Text(self.source[open..end].to_string()), end));
		}

		let mut args = Vec::new();
		if self.bytes[name_end] == b'|' {
			let mut position = name_end;
			loop {
				let (arg, stop) = self.parse_argument(position + 1, depth + 1)?;
				args.push(arg);
				if self.bytes[stop] == b'|' {
					position = stop;
				} else {
					break;
				}
			}
		}

		Some((
			Node::Call {
				name: name.to_ascii_lowercase(),
				args,
			},
			end,
		))
	}

	/// Parse one argument starting at `start`. Returns its nodes and the index
	/// of the terminating `|` or `}}`.
	fn parse_argument(&self, start: usize, depth: usize) -> Option<(Vec<Node>, usize)> {
		let mut nodes = Vec::new();
		let mut buffer = String::new();
		let mut open_groups = 0usize;
		let mut position = start;

		while position < self.bytes.len() {
			let byte = self.bytes[position];

			if let Some(end) = self.inert_end(position) {
				buffer.push_str(&self.source[position..end]);
				position = end;
				continue;
			}

			if byte == b'\\' {
				match self.bytes.get(position + 1) {
					Some(next @ (b'|' | b'{' | b'}' | b'\\')) => {
						buffer.push(char::from(*next));
						position += 2;
					}
					_ => {
						buffer.push('\\');
						position += 1;
					}
				}
				continue;
			}

			if self.starts_with(position, "{{") {
				if let Some((node, end)) = self.parse_invocation(position, depth) {
					push_text(&mut nodes, &std::mem::take(&mut buffer));
					push_node(&mut nodes, node);
					position = end;
				} else {
					buffer.push_str("{{");
					open_groups += 1;
					position += 2;
				}
				continue;
			}

			if self.starts_with(position, "}}") {
				if open_groups == 0 {
					push_text(&mut nodes, &buffer);
					return Some((nodes, position));
				}
				open_groups -= 1;
				buffer.push_str("}}");
				position += 2;
				continue;
			}

			if byte == b'|' && open_groups == 0 {
				push_text(&mut nodes, &buffer);
				return Some((nodes, position));
			}

			let length = self.next_char_len(position);
			buffer.push_str(&self.source[position..position + length]);
			position += length;
		}

		None
	}
}

fn push_text(nodes: &mut Vec<Node>, text: &str) {
	if text.is_empty() {
		return;
	}

	if let Some(Node::Text(previous)) = nodes.last_mut() {
		previous.push_str(text);
	} else {
		nodes.push(Node::Text(text.to_string()));
	}
}

fn push_node(nodes: &mut Vec<Node>, node: Node) {
	match node {
		Node::Text(text) => push_text(nodes, &text),
		call @ Node::Call { .. } => nodes.push(call),
	}
}

fn emit_document(nodes: &[Node], output: &mut String, calls: &mut usize) {
	for node in nodes {
		match node {
			Node::Text(text) if text.contains(['{', '}']) => {
				output.push_str("{{ ");
				output.push_str(&string_literal(text));
				output.push_str(" }}");
			}
			Node::Text(text) => output.push_str(text),
			Node::Call { .. } => {
				output.push_str("{{ ");
				emit_expression(node, output, calls);
				output.push_str(" }}");
			}
		}
	}
}

fn emit_expression(node: &Node, output: &mut String, calls: &mut usize) {
	match node {
		Node::Text(text) => output.push_str(&string_literal(text)),
		Node::Call { name, args } => {
			*calls += 1;
			output.push_str(DISPATCH_FUNCTION);
			output.push('(');
			output.push_str(&string_literal(name));

			for arg in args {
				output.push_str(", ");
				if arg.is_empty() {
					output.push_str("\"\"");
					continue;
				}

				for (index, part) in arg.iter().enumerate() {
					if index > 0 {
						output.push_str(" ~ ");
					}
					emit_expression(part, output, calls);
				}
			}

			output.push(')');
		}
	}
}

fn string_literal(text: &str) -> String {
	serde_json::to_string(text).unwrap_or_else(|_| String::from("\"\""))
}
