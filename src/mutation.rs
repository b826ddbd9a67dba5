//! Write endpoints and the optimistic behavior attached to each of them.
//!
//! Every [`Mutation`] variant declares, through plain functions, which cache keys it touches, what those keys are
//! predicted to look like once the server agrees, and how to fold the server's answer back in. The patch engine
//! itself knows nothing about books.

use chrono::DateTime;
use chrono::Utc;
use serde_json::Value;
use tracing::instrument;
use tracing::Instrument;

use crate::key::book_path;
use crate::prelude::*;
use crate::query::open_envelope;
use crate::query::require_data;
use crate::traits::ApiRequest;
use crate::traits::Method;
use crate::validation;

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// `temp_id` identifies the synthetic book in the cache until the server assigns the real id.
    CreateBook { book: NewBook, temp_id: BookId },
    UpdateBook { id: BookId, patch: BookPatch },
    DeleteBook(BookId),
    BorrowBook(BorrowRequest),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutput {
    Created(Book),
    Updated(Book),
    Deleted { message: String },
    Borrowed { message: String },
}

impl MutationOutput {
    /// The server's version of the affected book, when the endpoint returns one.
    pub fn book(&self) -> Option<&Book> {
        match self {
            Self::Created(book) | Self::Updated(book) => Some(book),
            _ => None,
        }
    }
}

pub fn temp_book_id() -> BookId {
    format!("tmp-{:016x}", rand::random::<u64>())
}

impl Mutation {
    pub fn create(book: NewBook) -> Self {
        Self::CreateBook {
            book,
            temp_id: temp_book_id(),
        }
    }

    pub fn update(id: impl Into<BookId>, patch: BookPatch) -> Self {
        Self::UpdateBook { id: id.into(), patch }
    }

    pub fn delete(id: impl Into<BookId>) -> Self {
        Self::DeleteBook(id.into())
    }

    pub fn borrow(id: impl Into<BookId>, quantity: u32, due_date: DateTime<Utc>) -> Self {
        Self::BorrowBook(BorrowRequest {
            book: id.into(),
            quantity,
            due_date,
        })
    }

    pub fn endpoint(&self) -> Endpoint {
        match self {
            Self::CreateBook { .. } => Endpoint::AddBook,
            Self::UpdateBook { .. } => Endpoint::UpdateBook,
            Self::DeleteBook(_) => Endpoint::DeleteBook,
            Self::BorrowBook(_) => Endpoint::BorrowBook,
        }
    }

    /// Id of the book the mutation is about. For a create, the temporary one.
    pub fn book_id(&self) -> &str {
        match self {
            Self::CreateBook { temp_id, .. } => temp_id,
            Self::UpdateBook { id, .. } | Self::DeleteBook(id) => id,
            Self::BorrowBook(req) => &req.book,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        match self {
            Self::CreateBook { book, .. } => validation::check(book),
            Self::UpdateBook { patch, .. } => validation::check(patch),
            Self::DeleteBook(_) => Ok(()),
            Self::BorrowBook(req) => validation::check(req),
        }
    }

    pub fn request(&self) -> Result<ApiRequest> {
        let endpoint = self.endpoint();
        let encode = |value: Result<Value, serde_json::Error>| {
            value.map_err(|err| CacheError::Encode {
                endpoint: endpoint.name(),
                message:  err.to_string(),
            })
        };

        Ok(match self {
            Self::CreateBook { book, .. } => {
                ApiRequest::new(endpoint, Method::Post, "/books").with_body(encode(serde_json::to_value(book))?)
            }
            Self::UpdateBook { id, patch } => ApiRequest::new(endpoint, Method::Put, book_path(id))
                .with_body(encode(serde_json::to_value(patch))?),
            Self::DeleteBook(id) => ApiRequest::new(endpoint, Method::Delete, book_path(id)),
            Self::BorrowBook(req) => {
                ApiRequest::new(endpoint, Method::Post, "/borrow").with_body(encode(serde_json::to_value(req))?)
            }
        })
    }

    pub fn decode(&self, body: Value) -> Result<MutationOutput> {
        let endpoint = self.endpoint();
        Ok(match self {
            Self::CreateBook { .. } => MutationOutput::Created(require_data(endpoint, body)?),
            Self::UpdateBook { .. } => MutationOutput::Updated(require_data(endpoint, body)?),
            Self::DeleteBook(_) => MutationOutput::Deleted {
                message: open_envelope::<Value>(endpoint, body)?.message,
            },
            Self::BorrowBook(_) => MutationOutput::Borrowed {
                message: open_envelope::<Value>(endpoint, body)?.message,
            },
        })
    }

    /// Cache keys the optimistic write is aimed at.
    pub fn targets<E: QueryExecutor>(&self, store: &QueryStore<E>) -> Vec<CacheKey> {
        match self {
            // New books show up on top of the default listing only.
            Self::CreateBook { .. } => vec![BookListArgs::default().key()],
            Self::UpdateBook { id, .. } | Self::BorrowBook(BorrowRequest { book: id, .. }) => {
                store.keys_where(|key, entry| {
                    matches!(key.endpoint(), Endpoint::GetBooks | Endpoint::GetBook)
                        && entry.payload().is_some_and(|p| p.holds_book(id))
                })
            }
            Self::DeleteBook(id) => store.keys_where(|key, entry| {
                key.endpoint() == Endpoint::GetBooks && entry.payload().is_some_and(|p| p.holds_book(id))
            }),
        }
    }

    /// The payload `key` is expected to hold once the server confirms. `None` leaves the key alone.
    pub fn predict(&self, _key: &CacheKey, payload: &Payload) -> Option<Payload> {
        match self {
            Self::CreateBook { book, temp_id } => {
                let page = payload.as_books()?;
                Some(Payload::Books(predict_create(page, book.to_book(temp_id.clone()))))
            }
            Self::UpdateBook { id, patch } => predict_update(payload, id, patch),
            Self::DeleteBook(id) => Some(Payload::Books(predict_delete(payload.as_books()?, id)?)),
            Self::BorrowBook(req) => predict_borrow(payload, &req.book, req.quantity),
        }
    }

    /// Folds the server's answer into a payload that went through [`Mutation::predict`].
    pub fn reconcile(&self, _key: &CacheKey, payload: &Payload, output: &MutationOutput) -> Option<Payload> {
        let server_book = output.book()?;
        match self {
            Self::CreateBook { temp_id, .. } => replace_book(payload, temp_id, server_book),
            Self::UpdateBook { id, .. } => replace_book(payload, id, server_book),
            _ => None,
        }
    }
}

/// Puts the synthetic book on top of the list.
pub fn predict_create(page: &BookPage, book: Book) -> BookPage {
    let mut books = Vec::with_capacity(page.books.len() + 1);
    books.push(book);
    books.extend(page.books.iter().cloned());
    BookPage {
        books,
        pagination: page.pagination,
    }
}

pub fn predict_update(payload: &Payload, id: &str, patch: &BookPatch) -> Option<Payload> {
    match payload {
        Payload::Books(page) => {
            let idx = page.position_of(id)?;
            let mut page = page.clone();
            patch.apply_to(&mut page.books[idx]);
            Some(Payload::Books(page))
        }
        Payload::Book(book) if book.id == id => {
            let mut book = book.clone();
            patch.apply_to(&mut book);
            Some(Payload::Book(book))
        }
        _ => None,
    }
}

/// Removes the one book with the id. `None` if the list doesn't have it.
pub fn predict_delete(page: &BookPage, id: &str) -> Option<BookPage> {
    let idx = page.position_of(id)?;
    let mut page = page.clone();
    page.books.remove(idx);
    Some(page)
}

pub fn predict_borrow(payload: &Payload, id: &str, quantity: u32) -> Option<Payload> {
    match payload {
        Payload::Books(page) => {
            let idx = page.position_of(id)?;
            let mut page = page.clone();
            page.books[idx].take_copies(quantity);
            Some(Payload::Books(page))
        }
        Payload::Book(book) if book.id == id => {
            let mut book = book.clone();
            book.take_copies(quantity);
            Some(Payload::Book(book))
        }
        _ => None,
    }
}

/// Swaps the book with `id` for the server's copy, keeping its position in a list.
pub fn replace_book(payload: &Payload, id: &str, server_book: &Book) -> Option<Payload> {
    match payload {
        Payload::Books(page) => {
            let idx = page.position_of(id)?;
            let mut page = page.clone();
            page.books[idx] = server_book.clone();
            // The server id may already be in the list if a refetch slipped in before the reconciliation.
            let mut seen = false;
            page.books.retain(|b| {
                if b.id != server_book.id {
                    return true;
                }
                let keep = !seen;
                seen = true;
                keep
            });
            Some(Payload::Books(page))
        }
        Payload::Book(book) if book.id == id => Some(Payload::Book(server_book.clone())),
        _ => None,
    }
}

impl<E> QueryStore<E>
where
    E: QueryExecutor,
{
    /// Runs a mutation: validate, patch the cache optimistically, call the server, then commit (reconciling with the
    /// server's data) or roll the patch back. Nothing is retried.
    ///
    /// Everything past validation runs on a task of its own. A caller that stops waiting for the result doesn't stop
    /// the mutation from settling its patch.
    #[instrument(level = "debug", skip(self, mutation), fields(store = %self.name(), endpoint = %mutation.endpoint()))]
    pub async fn mutate(&self, mutation: Mutation) -> Result<MutationOutput> {
        if let Err(errors) = mutation.validate() {
            log::debug!("[{}] {} rejected by validation: {errors}", self.name(), mutation.endpoint());
            return Err(CacheError::Validation(errors));
        }

        let store = self.myself_or_gone()?;
        tokio::spawn(async move { store.run_mutation(mutation).await }.in_current_span())
            .await
            .map_err(|err| CacheError::Interrupted(err.to_string()))?
    }

    async fn run_mutation(&self, mutation: Mutation) -> Result<MutationOutput> {
        let endpoint = mutation.endpoint();
        let request = mutation.request()?;
        let targets = mutation.targets(self);
        let patch = self
            .begin_optimistic_patch(endpoint.name(), targets, |key, payload| mutation.predict(key, payload))
            .await?;

        let outcome = match self.executor().execute(request).await {
            Ok(body) => mutation.decode(body),
            Err(err) => Err(err.into()),
        };

        match outcome {
            Ok(output) => {
                if output.book().is_some() {
                    patch
                        .commit_with(|key, payload| mutation.reconcile(key, payload, &output))
                        .await;
                }
                else {
                    patch.commit().await;
                }
                self.follow_up(&mutation).await;
                Ok(output)
            }
            Err(err) => {
                let report = patch.rollback().await;
                log::warn!(
                    "[{}] {endpoint} of '{}' failed, {} key(s) rolled back: {err}",
                    self.name(),
                    mutation.book_id(),
                    report.restored.len()
                );
                Err(err)
            }
        }
    }

    // Entries the optimistic write can't fix up by itself.
    async fn follow_up(&self, mutation: &Mutation) {
        match mutation {
            Mutation::DeleteBook(id) => self.evict(&book_key(id)).await,
            Mutation::BorrowBook(_) => {
                self.invalidate_endpoint(Endpoint::GetBorrowSummary).await;
            }
            _ => (),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::book;
    use crate::test::page_of;

    #[test]
    fn borrow_keeps_availability_in_line() {
        let payload = Payload::Books(page_of(vec![book("a", 2), book("b", 5)], 1, 12, 2));

        let Some(Payload::Books(after)) = predict_borrow(&payload, "a", 2)
        else {
            panic!("borrow must patch a list holding the book");
        };
        assert_eq!(after.books[0].copies, 0);
        assert!(!after.books[0].available);
        assert_eq!(after.books[1], book("b", 5));

        let Some(Payload::Books(after)) = predict_borrow(&payload, "a", 1)
        else {
            panic!("borrow must patch a list holding the book");
        };
        assert_eq!(after.books[0].copies, 1);
        assert!(after.books[0].available);

        assert!(predict_borrow(&payload, "zzz", 1).is_none());
    }

    #[test]
    fn delete_removes_exactly_one() {
        let page = page_of(vec![book("a", 1), book("b", 1), book("c", 1)], 1, 12, 3);
        let after = predict_delete(&page, "b").unwrap();
        assert_eq!(after.books.iter().map(|b| b.id.as_str()).collect::<Vec<_>>(), ["a", "c"]);
        assert!(predict_delete(&page, "x").is_none());
    }

    #[test]
    fn update_merges_only_provided_fields() {
        let payload = Payload::Book(book("a", 3));
        let patch = BookPatch {
            title: Some("New title".into()),
            copies: Some(0),
            ..Default::default()
        };
        let Some(Payload::Book(updated)) = predict_update(&payload, "a", &patch)
        else {
            panic!("update must patch the matching detail");
        };
        assert_eq!(updated.title, "New title");
        assert_eq!(updated.author, book("a", 3).author);
        assert_eq!(updated.copies, 0);
        assert!(!updated.available);
    }

    #[test]
    fn create_reconciles_in_place() {
        let page = page_of(vec![book("a", 1)], 1, 12, 1);
        let mut draft = book("tmp1", 4);
        draft.title = "Draft".into();
        let predicted = Payload::Books(predict_create(&page, draft));

        let server = book("srv99", 4);
        let Some(Payload::Books(reconciled)) = replace_book(&predicted, "tmp1", &server)
        else {
            panic!("reconciliation must find the temporary book");
        };
        assert_eq!(reconciled.books.iter().map(|b| b.id.as_str()).collect::<Vec<_>>(), ["srv99", "a"]);
    }

    #[test]
    fn book_paths_are_normalized_and_escaped() {
        let update = Mutation::update(" a ", BookPatch::default()).request().unwrap();
        assert_eq!(update.to_string(), "PUT /books/a");
        let delete = Mutation::delete("a/b").request().unwrap();
        assert_eq!(delete.to_string(), "DELETE /books/a%2Fb");
    }

    #[test]
    fn temporary_ids_are_distinct() {
        assert_ne!(temp_book_id(), temp_book_id());
        assert!(temp_book_id().starts_with("tmp-"));
    }
}
