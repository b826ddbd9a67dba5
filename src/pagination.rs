use std::collections::HashSet;

use crate::prelude::*;
use crate::query::require_data;

/// Folds a freshly fetched page into the accumulated listing. Books already present keep their place and content,
/// new ones are appended in the order they came, and the pagination metadata is taken from `incoming` as is.
pub fn merge_page(current: &BookPage, incoming: BookPage) -> BookPage {
    let mut seen: HashSet<BookId> = current.books.iter().map(|b| b.id.clone()).collect();
    let mut books = current.books.clone();
    for book in incoming.books {
        if seen.insert(book.id.clone()) {
            books.push(book);
        }
    }

    BookPage {
        books,
        pagination: incoming.pagination,
    }
}

// Holds the "load more" slot of a listing key. The slot is freed however the request ends.
struct LoadMoreGuard<'a, E>
where
    E: QueryExecutor,
{
    store: &'a QueryStore<E>,
    key:   CacheKey,
}

impl<'a, E> LoadMoreGuard<'a, E>
where
    E: QueryExecutor,
{
    fn acquire(store: &'a QueryStore<E>, key: &CacheKey) -> Result<Self> {
        if !store.loading_more_mut().insert(key.clone()) {
            return Err(CacheError::LoadMoreInFlight(key.clone()));
        }
        Ok(Self {
            store,
            key: key.clone(),
        })
    }
}

impl<E> Drop for LoadMoreGuard<'_, E>
where
    E: QueryExecutor,
{
    fn drop(&mut self) {
        self.store.loading_more_mut().remove(&self.key);
    }
}

impl<E> QueryStore<E>
where
    E: QueryExecutor,
{
    /// Fetches the page after the last accumulated one and merges it into the listing entry of `args`. The listing
    /// itself must have been fetched before. Returns the new pagination, or `None` when there is nothing more to load.
    pub async fn load_more(&self, args: &BookListArgs) -> Result<Option<PageInfo>> {
        let key = args.key();
        let _guard = LoadMoreGuard::acquire(self, &key)?;

        let next = self
            .payload(&key)
            .await
            .and_then(|p| p.as_books().and_then(|page| page.pagination.next_page));
        let Some(next) = next
        else {
            log::debug!("[{}] Nothing more to load for {key}", self.name());
            return Ok(None);
        };

        log::debug!("[{}] Loading page {next} into {key}", self.name());
        let query = Query::Books(args.with_page(next));
        let body = self.executor().execute(query.request()).await?;
        let incoming: BookPage = require_data(Endpoint::GetBooks, body)?;
        let pagination = incoming.pagination;

        let merged = self
            .compute(&key, |current| {
                let current = current?;
                let page = current.payload()?.as_books()?;
                let merged = merge_page(page, incoming);
                Some(current.with_payload(Payload::Books(merged)))
            })
            .await;

        if merged.is_none() {
            // The listing went away while the page was in flight; there is nothing to append to.
            log::debug!("[{}] {key} is gone, page {next} dropped", self.name());
            return Ok(None);
        }

        Ok(Some(pagination))
    }

    /// Whether a "load more" of the listing is in flight.
    pub fn is_loading_more(&self, args: &BookListArgs) -> bool {
        self.loading_more().contains(&args.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::book;
    use crate::test::page_of;

    fn ids(page: &BookPage) -> Vec<&str> {
        page.books.iter().map(|b| b.id.as_str()).collect()
    }

    #[test]
    fn appends_unseen_books_in_order() {
        let first = page_of(vec![book("a", 1), book("b", 1)], 1, 2, 5);
        let second = page_of(vec![book("b", 9), book("c", 1), book("d", 1)], 2, 2, 5);

        let merged = merge_page(&first, second.clone());
        assert_eq!(ids(&merged), ["a", "b", "c", "d"]);
        // Existing entries win over the incoming duplicate.
        assert_eq!(merged.books[1].copies, 1);
        assert_eq!(merged.pagination, second.pagination);
    }

    #[test]
    fn reapplying_a_page_changes_nothing() {
        let first = page_of(vec![book("a", 1)], 1, 1, 2);
        let second = page_of(vec![book("b", 1)], 2, 1, 2);

        let once = merge_page(&first, second.clone());
        let twice = merge_page(&once, second);
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_page_still_moves_pagination() {
        let first = page_of(vec![book("a", 1)], 1, 1, 2);
        let empty = page_of(vec![], 2, 1, 1);

        let merged = merge_page(&first, empty);
        assert_eq!(ids(&merged), ["a"]);
        assert_eq!(merged.pagination.page, 2);
        assert!(!merged.pagination.has_more());
    }
}
