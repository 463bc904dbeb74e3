use std::sync::Arc;

use rstest::fixture;

use crate::Engine;
use crate::MemoryStore;
use crate::PageTitle;
use crate::TranscludeRequest;
use crate::Transclusion;
use crate::WikiOptions;

/// A title in the default transclusion namespace.
pub fn transclusion(title: &str) -> PageTitle {
	PageTitle::new(Some("Transclusion"), title)
}

/// A store holding the pages most tests use.
#[fixture]
pub fn store() -> Arc<MemoryStore> {
	let store = MemoryStore::new();
	store.insert(transclusion("Greeting"), "Hello, <<name>>!");
	store.insert(transclusion("Positional"), "<<1>> and <<2>>");
	store.insert(transclusion("Wrap"), "[<<@partial-block>>]");
	store.insert(transclusion("Frame"), "<div>{{> @partial-block}}</div>");
	store.insert(transclusion("Loop"), "x{{> Loop}}");
	store.insert(transclusion("Fork"), "{{> Fork}}{{> Fork}}");
	store.insert(transclusion("Outer"), "outer({{> Inner}})");
	store.insert(transclusion("Inner"), "inner <<name>>");
	store.insert(transclusion("Empty"), "");
	store.insert(PageTitle::new(None, "Plain"), "no namespace");

	Arc::new(store)
}

#[fixture]
pub fn engine(store: Arc<MemoryStore>) -> Engine<Arc<MemoryStore>> {
	Engine::new(store)
}

/// Resolve `markdown` with default options.
pub async fn render(engine: &Engine<Arc<MemoryStore>>, markdown: &str) -> Transclusion {
	engine
		.transclude(&WikiOptions::default(), TranscludeRequest::new(markdown))
		.await
}
