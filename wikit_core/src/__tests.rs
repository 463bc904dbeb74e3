use std::collections::BTreeSet;
use std::sync::Arc;

use rstest::rstest;
use similar_asserts::assert_eq;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

use super::__fixtures::*;
use super::__fixtures::{engine, store};
use super::*;

type TestEngine = Engine<Arc<MemoryStore>>;

#[rstest]
#[case::empty("")]
#[case::prose("Just some *markdown* text.\n")]
#[case::braces("{ not a marker } {{ neither }}")]
#[case::inline_code("`{{> Greeting name=Ada}}`")]
#[case::fenced_code("```\n{{> Greeting}}\n```\n")]
#[case::indented_code("    {{> Greeting}}\n")]
#[case::escaped(r"\{{> Greeting}}")]
#[tokio::test]
async fn text_without_markers_is_unchanged(engine: TestEngine, #[case] markdown: &str) {
	let result = render(&engine, markdown).await;
	assert_eq!(result.text, markdown);
	assert!(result.transcluded.is_empty());
}

#[rstest]
#[case::named("{{> Greeting name=Ada}}", "Hello, Ada!")]
#[case::quoted(r#"{{> Greeting name="Ada Lovelace"}}"#, "Hello, Ada Lovelace!")]
#[case::positional("{{> Positional one two}}", "one and two")]
#[case::unbound_placeholder("{{> Greeting}}", "Hello, <<name>>!")]
#[case::inherited("{{> Outer name=Ada}}", "outer(inner Ada)")]
#[case::surrounding_text("a {{> Positional 1 2}} b", "a 1 and 2 b")]
#[case::qualified("{{> Transclusion:Greeting name=Bo}}", "Hello, Bo!")]
#[case::cleared_namespace("{{> -:Plain}}", "no namespace")]
#[tokio::test]
async fn resolves_references(engine: TestEngine, #[case] markdown: &str, #[case] expected: &str) {
	let result = render(&engine, markdown).await;
	assert_eq!(result.text, expected);
}

#[rstest]
#[tokio::test]
async fn records_referenced_titles(engine: TestEngine) {
	let result = render(&engine, "{{> Outer}} {{> Greeting}}").await;
	let expected: BTreeSet<PageTitle> = ["Outer", "Inner", "Greeting"]
		.into_iter()
		.map(transclusion)
		.collect();
	assert_eq!(result.transcluded, expected);
}

#[rstest]
#[tokio::test]
async fn missing_reference_is_literal_and_recorded(engine: TestEngine) {
	let markdown = "before {{> Missing}} after";
	let result = render(&engine, markdown).await;
	assert_eq!(result.text, markdown);
	assert!(result.transcluded.contains(&transclusion("Missing")));
}

#[rstest]
#[tokio::test]
async fn empty_page_is_literal(engine: TestEngine) {
	let result = render(&engine, "{{> Empty}}").await;
	assert_eq!(result.text, "{{> Empty}}");
	assert!(result.transcluded.contains(&transclusion("Empty")));
}

#[rstest]
#[tokio::test]
async fn unreadable_page_is_literal_and_recorded(store: Arc<MemoryStore>) {
	store.insert_page(
		transclusion("Secret"),
		Page::new("hidden").with_permission(|| Permission::WRITE),
	);
	let engine = Engine::new(store);

	let result = render(&engine, "{{> Secret}}").await;
	assert_eq!(result.text, "{{> Secret}}");
	assert!(result.transcluded.contains(&transclusion("Secret")));
}

#[rstest]
#[tokio::test]
async fn self_transclusion_stops_at_depth_limit(engine: TestEngine) {
	let result = render(&engine, "{{> Loop}}").await;
	let expected = format!("{}{{{{> Loop}}}}", "x".repeat(MAX_TRANSCLUSION_DEPTH));
	assert_eq!(result.text, expected);
	assert_eq!(result.transcluded.len(), 1);
}

#[rstest]
#[tokio::test]
async fn fan_out_stops_at_transclusion_limit(engine: TestEngine) {
	let options = WikiOptions {
		max_transclusions: 50,
		..WikiOptions::default()
	};
	let result = engine
		.transclude(&options, TranscludeRequest::new("{{> Fork}}"))
		.await;

	// Fifty expansions of a page with two references leave fifty-one leaves.
	assert_eq!(result.text.matches("{{> Fork}}").count(), 51);
	assert_eq!(result.text.len(), 51 * "{{> Fork}}".len());
}

#[rstest]
#[tokio::test]
async fn binds_request_parameters(engine: TestEngine) {
	let request = TranscludeRequest::new("<<who>> says <<1>>, \\<<who>>")
		.argument("hi")
		.parameter("who", "Ada");
	let result = engine.transclude(&WikiOptions::default(), request).await;
	assert_eq!(result.text, "Ada says hi, \\<<who>>");
}

#[rstest]
#[tokio::test]
async fn child_parameters_win_over_inherited(store: Arc<MemoryStore>) {
	store.insert(transclusion("Relay"), "{{> Inner name=Child}}");
	let engine = Engine::new(store);

	let result = render(&engine, "{{> Relay name=Parent}}").await;
	assert_eq!(result.text, "inner Child");
}

#[rstest]
#[case::placeholder("{{#> Wrap}}inner{{/Wrap}}", "[inner]")]
#[case::marker("{{#> Frame}}**x**{{/Frame}}", "<div>**x**</div>")]
#[case::case_insensitive_end("{{#> Wrap}}inner{{/wrap}}", "[inner]")]
#[case::nested_reference("{{#> Wrap}}{{> Greeting name=Bo}}{{/Wrap}}", "[Hello, Bo!]")]
#[case::nested_blocks("{{#> Wrap}}a{{#> Wrap}}b{{/Wrap}}c{{/Wrap}}", "[a[b]c]")]
#[case::surrounding("< {{#> Wrap}}x{{/Wrap}} >", "< [x] >")]
#[case::empty("{{#> Wrap}}{{/Wrap}}", "[]")]
#[tokio::test]
async fn captures_block_content(engine: TestEngine, #[case] markdown: &str, #[case] expected: &str) {
	let result = render(&engine, markdown).await;
	assert_eq!(result.text, expected);
}

#[rstest]
#[tokio::test]
async fn block_content_reaches_nested_transclusions(store: Arc<MemoryStore>) {
	store.insert(transclusion("Shell"), "({{> Wrap}})");
	let engine = Engine::new(store);

	let result = render(&engine, "{{#> Shell}}body{{/Shell}}").await;
	assert_eq!(result.text, "([body])");
}

#[rstest]
#[tokio::test]
async fn failed_block_keeps_markers_and_resolves_inside(engine: TestEngine) {
	let result = render(&engine, "{{#> Missing}}a {{> Greeting name=Cy}}{{/Missing}}").await;
	assert_eq!(result.text, "{{#> Missing}}a Hello, Cy!{{/Missing}}");
	assert!(result.transcluded.contains(&transclusion("Missing")));
	assert!(result.transcluded.contains(&transclusion("Greeting")));
}

#[rstest]
#[tokio::test]
async fn partial_block_outside_block_is_literal(engine: TestEngine) {
	let result = render(&engine, "{{> @partial-block}}").await;
	assert_eq!(result.text, "{{> @partial-block}}");
	assert!(result.transcluded.is_empty());
}

#[rstest]
#[tokio::test]
async fn cancelled_request_keeps_markers(engine: TestEngine) {
	let token = CancellationToken::new();
	token.cancel();
	let request = TranscludeRequest::new("{{> Greeting name=Ada}}").cancellation(token);

	let result = engine.transclude(&WikiOptions::default(), request).await;
	assert_eq!(result.text, "{{> Greeting name=Ada}}");
	assert!(result.transcluded.contains(&transclusion("Greeting")));
}

#[rstest]
#[case::conditional("{{if|true|success}}", "success")]
#[case::conditional_else("{{if||yes|no}}", "no")]
#[case::pad_zero("{{padleft|1|3}}", "001")]
#[case::pad_char("{{padleft|1|3|:}}", "::1")]
#[case::nested("{{toupper|{{if|1|a|b}}}}", "A")]
#[case::unknown_helper("{{nothing|x}}", "{{nothing|x}}")]
#[case::evaluate("{{evaluate|1 + 2}}", "3")]
#[case::runaway_script("[{{execute|while true do end}}]", "[]")]
#[case::memory_hungry_script("[{{execute|local s = 'x' while true do s = s .. s end}}]", "[]")]
#[tokio::test]
async fn runs_template_functions(engine: TestEngine, #[case] markdown: &str, #[case] expected: &str) {
	let result = render(&engine, markdown).await;
	assert_eq!(result.text, expected);
}

#[rstest]
#[tokio::test]
async fn deeply_nested_functions_stay_literal_past_limit(engine: TestEngine) {
	let levels = 10_000;
	let markdown = format!("{}x{}", "{{toupper|".repeat(levels), "}}".repeat(levels));
	let result = render(&engine, &markdown).await;

	let remaining = levels - MAX_INVOCATION_DEPTH;
	let expected = format!("{}X{}", "{{TOUPPER|".repeat(remaining), "}}".repeat(remaining));
	assert_eq!(result.text, expected);
}

#[rstest]
#[tokio::test]
async fn deeply_nested_list_parameter_is_bounded(engine: TestEngine) {
	let levels = 50_000;
	let markdown = format!(
		"{{{{> Greeting name={}1{}}}}}",
		"[".repeat(levels),
		"]".repeat(levels)
	);
	let result = render(&engine, &markdown).await;

	let remaining = levels - MAX_LIST_DEPTH;
	let expected = format!("Hello, {}1{}!", "[".repeat(remaining), "]".repeat(remaining));
	assert_eq!(result.text, expected);
}

#[rstest]
#[tokio::test]
async fn functions_run_after_transclusion(store: Arc<MemoryStore>) {
	store.insert(transclusion("Name"), "{{fullpagename}} / {{if|<<flag>>|on|off}}");
	let engine = Engine::new(store);
	let request = TranscludeRequest::new("{{> Name flag=true}}")
		.title(PageTitle::new(Some("Help"), "Intro"));

	let result = engine.transclude(&WikiOptions::default(), request).await;
	assert_eq!(result.text, "Help:Intro / on");
}

#[rstest]
#[tokio::test]
async fn request_flags_reach_helpers(engine: TestEngine) {
	let request = TranscludeRequest::new("{{iftemplate|t|f}}{{ifpreview|p|-}}{{iftalk|k|-}}")
		.template(true)
		.talk(true);

	let result = engine.transclude(&WikiOptions::default(), request).await;
	assert_eq!(result.text, "t-k");
}

#[tokio::test]
#[traced_test]
async fn logs_skipped_markers() {
	let engine = Engine::new(MemoryStore::new());
	let result = engine
		.transclude(&WikiOptions::default(), TranscludeRequest::new("{{> Nowhere}}"))
		.await;

	assert_eq!(result.text, "{{> Nowhere}}");
	assert!(logs_contain("page not found, keeping marker"));
}

#[rstest]
#[tokio::test]
async fn renders_a_composed_page(engine: TestEngine) {
	let markdown = "# <<heading>>\n\n{{> Greeting name=Ada}}\n\n{{#> \
	                Wrap}}{{toupper|inner}}{{/Wrap}}\n\n```text\n{{> Greeting}}\n```";
	let request = TranscludeRequest::new(markdown).parameter("heading", "Report");

	let result = engine.transclude(&WikiOptions::default(), request).await;

	insta::assert_snapshot!(result.text, @r"
	# Report

	Hello, Ada!

	[INNER]

	```text
	{{> Greeting}}
	```
	");
}

#[test]
fn loads_options_from_config_file() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	std::fs::create_dir_all(tmp.path().join(".config"))?;
	std::fs::write(
		tmp.path().join(".config/wikit.toml"),
		"transclusion_namespace = \"Snippet\"\ntoc_depth = 2\n\n[script]\ntimeout_ms = 50\n\n[pages]\nrestricted = [\"Secret:*\"]\n",
	)?;

	let options = WikiOptions::load_or_default(tmp.path())?;
	assert_eq!(options.transclusion_namespace, "Snippet");
	assert_eq!(options.toc_depth, 2);
	assert_eq!(options.toc_title, "Contents");
	assert_eq!(options.script.timeout_ms, 50);
	assert_eq!(options.script.max_call_depth, 64);
	assert_eq!(options.pages.restricted, vec!["Secret:*".to_string()]);

	Ok(())
}

#[test]
fn config_discovery_prefers_root_file() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	std::fs::write(tmp.path().join("wikit.toml"), "toc_depth = 4\n")?;
	std::fs::write(tmp.path().join(".wikit.toml"), "toc_depth = 5\n")?;

	assert_eq!(
		WikiOptions::resolve_path(tmp.path()),
		Some(tmp.path().join("wikit.toml"))
	);
	assert_eq!(WikiOptions::load_or_default(tmp.path())?.toc_depth, 4);

	Ok(())
}

#[test]
fn missing_config_uses_defaults() -> WikiResult<()> {
	let tmp = tempfile::tempdir()?;
	assert_eq!(WikiOptions::load(tmp.path())?, None);
	assert_eq!(WikiOptions::load_or_default(tmp.path())?, WikiOptions::default());

	Ok(())
}

#[test]
fn invalid_config_is_a_parse_error() {
	let result = WikiOptions::from_toml("max_transclusions = \"many\"");
	assert!(matches!(result, Err(WikiError::ConfigParse(_))));
}

#[rstest]
#[tokio::test]
async fn empty_transclusion_namespace_leaves_references_unqualified(engine: TestEngine) {
	let options = WikiOptions {
		transclusion_namespace: String::new(),
		..WikiOptions::default()
	};
	let result = engine
		.transclude(&options, TranscludeRequest::new("{{> Plain}}"))
		.await;
	assert_eq!(result.text, "no namespace");
}
