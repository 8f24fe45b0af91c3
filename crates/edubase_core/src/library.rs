//! crates/edubase_core/src/library.rs
//!
//! Enumerates the books of the signed-in account.

use tokio::time::sleep;
use tracing::{debug, info};

use crate::config::EdubaseConfig;
use crate::domain::{Book, BookId};
use crate::ports::{LoadState, Locator, PageDriver, PortResult};
use crate::selectors;

pub struct LibraryLister<'a> {
    driver: &'a dyn PageDriver,
    config: &'a EdubaseConfig,
}

impl<'a> LibraryLister<'a> {
    pub fn new(driver: &'a dyn PageDriver, config: &'a EdubaseConfig) -> Self {
        Self { driver, config }
    }

    /// Returns the books in display order. An account without books, or a library
    /// that never renders, yields an empty list rather than an error.
    pub async fn get_books(&self) -> PortResult<Vec<Book>> {
        // A reused session may still sit inside a book.
        let url = self.driver.current_url().await?;
        if url.contains("#doc/") {
            self.driver
                .goto(
                    &self.config.base_url,
                    LoadState::Load,
                    self.config.timeouts.book_navigation,
                )
                .await?;
        }

        sleep(self.config.delays.initial).await;

        let items = Locator::new(selectors::LIBRARY_ITEMS);
        if let Err(e) = self
            .driver
            .wait_for_visible(&items, self.config.timeouts.element_visible)
            .await
        {
            info!("No library items visible, assuming an empty library: {}", e);
            return Ok(Vec::new());
        }

        let count = self.driver.count(selectors::LIBRARY_ITEMS).await?;
        let mut books = Vec::with_capacity(count);
        for index in 0..count {
            let item = items.clone().nth(index);

            let raw_id = match self
                .driver
                .attribute(&item, selectors::LIBRARY_ITEM_ID_ATTRIBUTE)
                .await
            {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    debug!("Library entry {} has no book id, skipping", index);
                    continue;
                }
                Err(e) => {
                    debug!("Could not read id of library entry {}: {}", index, e);
                    continue;
                }
            };

            let Some(id) = raw_id.trim().parse::<i64>().ok().and_then(BookId::new) else {
                debug!("Library entry {} has a non-numeric id {:?}, skipping", index, raw_id);
                continue;
            };

            let title = match self
                .driver
                .inner_text(&item.child(selectors::LIBRARY_ITEM_TITLE))
                .await
            {
                Ok(title) => title.trim().to_string(),
                Err(e) => {
                    debug!("Could not read title of library entry {}: {}", index, e);
                    continue;
                }
            };

            books.push(Book { id, title });
        }

        info!("Found {} books in the library", books.len());
        Ok(books)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedPage;

    #[tokio::test]
    async fn lists_books_in_display_order() {
        let page = ScriptedPage::builder()
            .book("58216", "Mathematik 1")
            .book("1200", "Deutsch: Grammatik")
            .build();
        let config = EdubaseConfig::immediate();

        let books = LibraryLister::new(&page, &config).get_books().await.unwrap();

        let ids: Vec<u32> = books.iter().map(|b| b.id.get()).collect();
        assert_eq!(ids, vec![58216, 1200]);
        assert_eq!(books[1].title, "Deutsch: Grammatik");
    }

    #[tokio::test]
    async fn skips_entries_with_unreadable_ids() {
        let page = ScriptedPage::builder()
            .book("abc", "Broken")
            .book("0", "Zero")
            .book("77", "Physik")
            .build();
        let config = EdubaseConfig::immediate();

        let books = LibraryLister::new(&page, &config).get_books().await.unwrap();

        assert_eq!(books.len(), 1);
        assert_eq!(books[0].title, "Physik");
    }

    #[tokio::test]
    async fn empty_library_is_not_an_error() {
        let page = ScriptedPage::builder().build();
        let config = EdubaseConfig::immediate();

        let books = LibraryLister::new(&page, &config).get_books().await.unwrap();

        assert!(books.is_empty());
    }
}
