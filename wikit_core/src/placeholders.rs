use crate::ParameterSet;
use crate::parameters::is_parameter_name;

/// Name of the placeholder and marker that stand for a block's captured
/// content.
pub const PARTIAL_BLOCK: &str = "@partial-block";

/// Replace `<<name>>`, `<<1>>` and `<<@partial-block>>` placeholders.
///
/// Unknown placeholders are left as written and `\<<` is never a placeholder.
pub fn substitute_placeholders(
	text: &str,
	parameters: &ParameterSet,
	partial_block: Option<&str>,
) -> String {
	if !text.contains("<<") {
		return text.to_string();
	}

	let mut output = String::with_capacity(text.len());
	let mut cursor = 0;
	let mut search = 0;

	while let Some(found) = text[search..].find("<<") {
		let open = search + found;
		search = open + 1;

		if text[..open].ends_with('\\') {
			continue;
		}

		let Some(length) = text[open + 2..].find(">>") else {
			break;
		};
		let name = &text[open + 2..open + 2 + length];
		let close = open + 2 + length + 2;

		let replacement = if name == PARTIAL_BLOCK {
			partial_block.map(str::to_string)
		} else if is_parameter_name(name) {
			parameters.get(name).map(ToString::to_string)
		} else {
			None
		};

		if let Some(replacement) = replacement {
			output.push_str(&text[cursor..open]);
			output.push_str(&replacement);
			cursor = close;
			search = close;
		}
	}

	output.push_str(&text[cursor..]);
	output
}
