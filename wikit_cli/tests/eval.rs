mod common;

use rstest::rstest;
use similar_asserts::assert_eq;
use wikit_core::AnyEmptyResult;

#[rstest]
#[case::expression(&["1 + 2"], "3\n")]
#[case::statements(&["local x = 6\nx * 7"], "42\n")]
#[case::execute(&["--execute", "local s = 'wiki'\nreturn s:upper()"], "WIKI\n")]
#[case::execute_without_return(&["--execute", "local s = 1"], "\n")]
#[case::infinite_loop(&["while true do end"], "\n")]
#[case::no_io(&["io == nil and os == nil"], "true\n")]
fn eval_runs_scripts(#[case] args: &[&str], #[case] expected: &str) -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;

	let output = common::wikit_cmd()
		.arg("eval")
		.args(args)
		.arg("--path")
		.arg(tmp.path())
		.output()?;

	assert!(output.status.success());
	assert_eq!(String::from_utf8(output.stdout)?, expected);

	Ok(())
}

#[test]
fn eval_reads_script_limits_from_config() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	std::fs::write(
		tmp.path().join("wikit.toml"),
		"[script]\nmax_instructions = 2000\n",
	)?;

	let output = common::wikit_cmd()
		.arg("eval")
		.arg("--execute")
		.arg("local n = 0\nfor i = 1, 100000 do n = n + i end\nreturn n")
		.arg("--path")
		.arg(tmp.path())
		.output()?;

	assert!(output.status.success());
	assert_eq!(String::from_utf8(output.stdout)?, "\n");

	Ok(())
}
