use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::PageTitle;

/// Access rights a caller holds on a page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Permission(u8);

impl Permission {
	pub const NONE: Permission = Permission(0);
	pub const READ: Permission = Permission(1);
	pub const WRITE: Permission = Permission(1 << 1);
	pub const ALL: Permission = Permission(Self::READ.0 | Self::WRITE.0);

	pub fn has_read(self) -> bool {
		self.0 & Self::READ.0 != 0
	}
}

impl BitOr for Permission {
	type Output = Permission;

	fn bitor(self, rhs: Self) -> Self::Output {
		Permission(self.0 | rhs.0)
	}
}

type PermissionFn = Arc<dyn Fn() -> Permission + Send + Sync>;

/// A page as seen by the engine.
#[derive(Clone)]
pub struct Page {
	pub markdown: String,
	pub exists: bool,
	permission: PermissionFn,
}

impl Page {
	/// An existing page readable by everyone.
	pub fn new(markdown: impl Into<String>) -> Self {
		Self {
			markdown: markdown.into(),
			exists: true,
			permission: Arc::new(|| Permission::ALL),
		}
	}

	/// A page record for a title that has no content.
	pub fn missing() -> Self {
		Self {
			markdown: String::new(),
			exists: false,
			permission: Arc::new(|| Permission::ALL),
		}
	}

	/// Replace the permission check. It is evaluated on every lookup.
	#[must_use]
	pub fn with_permission(mut self, permission: impl Fn() -> Permission + Send + Sync + 'static) -> Self {
		self.permission = Arc::new(permission);
		self
	}

	pub fn permission(&self) -> Permission {
		(self.permission)()
	}

	/// Whether the engine may transclude this page.
	pub fn is_usable(&self) -> bool {
		self.exists && !self.markdown.is_empty() && self.permission().has_read()
	}
}

impl fmt::Debug for Page {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Page")
			.field("markdown", &self.markdown)
			.field("exists", &self.exists)
			.field("permission", &self.permission())
			.finish()
	}
}

/// Source of page content for transclusion.
#[async_trait]
pub trait PageStore: Send + Sync {
	/// Fetch the current content of `title`, or `None` when the store has no
	/// record of it.
	async fn get_page(&self, title: &PageTitle) -> Option<Page>;
}

#[async_trait]
impl<T: PageStore + ?Sized> PageStore for Arc<T> {
	async fn get_page(&self, title: &PageTitle) -> Option<Page> {
		(**self).get_page(title).await
	}
}

/// An in-memory page store.
#[derive(Debug, Default)]
pub struct MemoryStore {
	pages: RwLock<HashMap<PageTitle, Page>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Store readable markdown under `title`.
	pub fn insert(&self, title: PageTitle, markdown: impl Into<String>) {
		self.insert_page(title, Page::new(markdown));
	}

	pub fn insert_page(&self, title: PageTitle, page: Page) {
		self.pages
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(title, page);
	}

	pub fn remove(&self, title: &PageTitle) -> Option<Page> {
		self.pages
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.remove(title)
	}

	pub fn len(&self) -> usize {
		self.pages.read().unwrap_or_else(PoisonError::into_inner).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[async_trait]
impl PageStore for MemoryStore {
	async fn get_page(&self, title: &PageTitle) -> Option<Page> {
		self.pages
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.get(title)
			.cloned()
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case::all(Permission::ALL, true)]
	#[case::read(Permission::READ, true)]
	#[case::write_only(Permission::WRITE, false)]
	#[case::none(Permission::NONE, false)]
	fn only_readable_pages_are_usable(#[case] permission: Permission, #[case] usable: bool) {
		let page = Page::new("text").with_permission(move || permission);
		assert_eq!(page.is_usable(), usable);
		assert_eq!(Permission::NONE | permission, permission);
	}
}
