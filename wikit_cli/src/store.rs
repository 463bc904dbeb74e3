use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use globset::GlobBuilder;
use globset::GlobSet;
use globset::GlobSetBuilder;
use tracing::trace;
use tracing::warn;
use wikit_core::Page;
use wikit_core::PageStore;
use wikit_core::PageTitle;
use wikit_core::Permission;
use wikit_core::WikiError;
use wikit_core::WikiOptions;
use wikit_core::WikiResult;

/// Pages stored as markdown files: `(domain)/Namespace/Title.md` under a
/// root directory. The home page of a namespace is stored under the main page
/// title.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
	root: PathBuf,
	main_page_title: String,
	restricted: GlobSet,
}

impl DirectoryStore {
	/// A store rooted at `root` with no restricted pages.
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self {
			root: root.into(),
			main_page_title: WikiOptions::default().main_page_title,
			restricted: GlobSet::empty(),
		}
	}

	/// A store configured by the `[pages]` section, relative to the project
	/// root.
	pub fn from_options(project_root: &Path, options: &WikiOptions) -> WikiResult<Self> {
		Ok(Self {
			root: project_root.join(&options.pages.root),
			main_page_title: options.main_page_title.clone(),
			restricted: build_glob_set(&options.pages.restricted)?,
		})
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Whether a restricted pattern matches the title.
	pub fn is_restricted(&self, title: &PageTitle) -> bool {
		self.restricted.is_match(title.full_title())
	}

	/// The file that holds `title`.
	pub fn page_path(&self, title: &PageTitle) -> PathBuf {
		let mut path = self.root.clone();

		if let Some(domain) = &title.domain {
			path.push(format!("({})", path_segment(domain)));
		}

		if let Some(namespace) = &title.namespace {
			path.push(path_segment(namespace));
		}

		let name = if title.is_home_page() {
			&self.main_page_title
		} else {
			&title.title
		};
		path.push(format!("{}.md", path_segment(name)));

		path
	}
}

#[async_trait]
impl PageStore for DirectoryStore {
	async fn get_page(&self, title: &PageTitle) -> Option<Page> {
		let path = self.page_path(title);
		trace!(%title, path = %path.display(), "reading page");

		let markdown = match tokio::fs::read_to_string(&path).await {
			Ok(markdown) => markdown,
			Err(error) if error.kind() == ErrorKind::NotFound => return None,
			Err(error) => {
				warn!(%title, path = %path.display(), %error, "failed to read page");
				return None;
			}
		};

		let page = Page::new(markdown);
		if self.is_restricted(title) {
			return Some(page.with_permission(|| Permission::NONE));
		}

		Some(page)
	}
}

/// Build a case-insensitive `GlobSet` from restricted title patterns.
fn build_glob_set(patterns: &[String]) -> WikiResult<GlobSet> {
	let mut builder = GlobSetBuilder::new();

	for pattern in patterns {
		let glob = GlobBuilder::new(pattern)
			.case_insensitive(true)
			.build()
			.map_err(|error| {
				WikiError::InvalidPattern {
					pattern: pattern.clone(),
					reason: error.kind().to_string(),
				}
			})?;
		builder.add(glob);
	}

	builder.build().map_err(|error| {
		WikiError::InvalidPattern {
			pattern: patterns.join(", "),
			reason: error.to_string(),
		}
	})
}

/// Keep a title component inside its directory.
fn path_segment(text: &str) -> String {
	let escaped = text.replace('%', "%25").replace('/', "%2F").replace('\\', "%5C");

	match escaped.strip_prefix('.') {
		Some(rest) => format!("%2E{rest}"),
		None => escaped,
	}
}

#[cfg(test)]
mod tests {
	use similar_asserts::assert_eq;

	use super::*;

	#[test]
	fn maps_titles_to_files() {
		let store = DirectoryStore::new("pages");
		let title = PageTitle::new(Some("Transclusion"), "Greeting");
		assert_eq!(
			store.page_path(&title),
			PathBuf::from("pages/Transclusion/Greeting.md")
		);

		let home = PageTitle::new(Some("Help"), "").with_domain("docs");
		assert_eq!(
			store.page_path(&home),
			PathBuf::from("pages/(docs)/Help/Main Page.md")
		);
	}

	#[test]
	fn escapes_separators() {
		let store = DirectoryStore::new("pages");
		let title = PageTitle::new(Some(".."), "a/b");
		assert_eq!(
			store.page_path(&title),
			PathBuf::from("pages/%2E./A%2Fb.md")
		);
	}

	#[test]
	fn invalid_patterns_are_errors() {
		let mut options = WikiOptions::default();
		options.pages.restricted = vec!["Secret:[".to_string()];
		let result = DirectoryStore::from_options(Path::new("."), &options);
		assert!(matches!(result, Err(WikiError::InvalidPattern { .. })));
	}

	#[test]
	fn restricted_patterns_ignore_case() -> WikiResult<()> {
		let mut options = WikiOptions::default();
		options.pages.restricted = vec!["secret:*".to_string()];
		let store = DirectoryStore::from_options(Path::new("."), &options)?;
		assert!(store.is_restricted(&PageTitle::new(Some("Secret"), "Plans")));
		assert!(!store.is_restricted(&PageTitle::new(Some("Public"), "Plans")));

		Ok(())
	}

	#[tokio::test]
	async fn reads_pages_from_disk() -> WikiResult<()> {
		let tmp = tempfile::tempdir()?;
		let namespace = tmp.path().join("pages").join("Transclusion");
		std::fs::create_dir_all(&namespace)?;
		std::fs::write(namespace.join("Greeting.md"), "hello")?;
		std::fs::write(namespace.join("Secret.md"), "hidden")?;

		let mut options = WikiOptions::default();
		options.pages.restricted = vec!["Transclusion:Secret".to_string()];
		let store = DirectoryStore::from_options(tmp.path(), &options)?;

		let greeting = store
			.get_page(&PageTitle::new(Some("Transclusion"), "Greeting"))
			.await;
		assert!(greeting.as_ref().is_some_and(Page::is_usable));
		assert_eq!(greeting.map(|page| page.markdown), Some("hello".to_string()));

		let secret = store
			.get_page(&PageTitle::new(Some("Transclusion"), "Secret"))
			.await;
		assert!(secret.is_some_and(|page| !page.permission().has_read()));

		let missing = store
			.get_page(&PageTitle::new(Some("Transclusion"), "Missing"))
			.await;
		assert!(missing.is_none());

		Ok(())
	}
}
