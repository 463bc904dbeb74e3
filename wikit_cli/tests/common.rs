use std::path::Path;

use assert_cmd::Command;
use insta_cmd::get_cargo_bin;
use wikit_core::AnyEmptyResult;

pub fn wikit_cmd() -> Command {
	let mut cmd = Command::new(get_cargo_bin("wikit"));
	cmd.env("NO_COLOR", "1");
	cmd.env_remove("RUST_LOG");
	cmd
}

/// Write a page under `pages/`, e.g. `Transclusion/Greeting`.
pub fn write_page(root: &Path, path: &str, content: &str) -> AnyEmptyResult {
	let file = root.join("pages").join(format!("{path}.md"));
	if let Some(parent) = file.parent() {
		std::fs::create_dir_all(parent)?;
	}
	std::fs::write(file, content)?;

	Ok(())
}

/// A project with the pages most tests use.
pub fn project() -> Result<tempfile::TempDir, Box<dyn std::error::Error>> {
	let tmp = tempfile::tempdir()?;
	write_page(tmp.path(), "Transclusion/Greeting", "Hello, <<name>>!")?;
	write_page(tmp.path(), "Transclusion/Wrap", "[<<@partial-block>>]")?;
	write_page(tmp.path(), "Transclusion/Secret", "classified")?;

	Ok(tmp)
}
