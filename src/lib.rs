//! # shelf-cache
//!
//! Client-side normalized query cache for a library catalogue API, with optimistic mutations and exact rollback.
//!
//! Think of it as the data layer sitting between the views of a library-management client and its REST backend.
//!
//! # The Basics
//!
//! The crate is designed for the following use case:
//!
//! - Many views showing overlapping slices of the same data: paginated listings, book details, borrow summaries.
//! - User actions (borrow, create, update, delete) that should be reflected immediately, before the server confirms.
//! - A server that may still say "no", in which case the client must look exactly as if nothing happened.
//!
//! The cache operates on the following principles:
//!
//! - Every result is stored once, under a [`CacheKey`] made of the endpoint and its normalized arguments. Argument
//!   order, omitted defaults, and stray whitespace don't produce distinct keys.
//! - Implemented as a controller over the [moka](https://crates.io/crates/moka) cache; every write to a key goes
//!   through moka's per-key compute, so writes to one key are serialized even on a multi-threaded runtime.
//! - Concurrent fetches of one key are coalesced into a single network call.
//! - The network is behind the [`QueryExecutor`] trait. The crate ships an HTTP implementation (feature `http`) and
//!   a scripted one for tests (feature `test`).
//! - The store is an explicitly constructed object. There are no globals; independent stores don't interfere.
//!
//! # Optimistic Mutations
//!
//! A [`Mutation`] knows which cached keys it affects and what they should look like once the server agrees.
//! [`QueryStore::mutate`] validates it, snapshots and patches the affected keys, and only then calls the server. On
//! success the patch is committed, optionally replacing the predicted data with the server's; on failure every patched
//! key gets its snapshot back.
//!
//! Overlapping mutations are applied in the order they are issued. A rollback restores its own snapshots regardless of
//! what was written in between; such overwrites are reported (see [`patch::RollbackReport`]) but not prevented.
//!
//! # Pagination
//!
//! [`QueryStore::load_more`] appends the next page of a listing to the same cache entry, skipping books the listing
//! already has. Only one "load more" per listing can be in flight.
//!
//! # Subscriptions
//!
//! Observers subscribe to a key and are called synchronously after each change of its entry. An entry nobody observes
//! is evicted once the store's grace period has passed without a new subscriber.

pub mod cache;
pub mod config;
pub mod debounce;
pub mod entry;
pub mod error;
#[cfg(feature = "http")]
pub mod http;
pub mod key;
pub mod mutation;
pub mod notifier;
pub mod pagination;
pub mod patch;
pub mod query;
pub mod test;
pub mod traits;
pub mod types;
pub mod validation;

#[doc(inline)]
pub use cache::QueryStore;
#[doc(inline)]
pub use mutation::Mutation;
#[doc(inline)]
pub use traits::QueryExecutor;

pub mod prelude {
    pub use crate::cache::QueryHandle;
    pub use crate::cache::QueryStore;
    pub use crate::cache::Subscription;
    pub use crate::config::ClientConfig;
    pub use crate::debounce::Debouncer;
    pub use crate::entry::CacheEntry;
    pub use crate::entry::EntryStatus;
    pub use crate::error::ApiError;
    pub use crate::error::CacheError;
    pub use crate::error::FetchError;
    pub use crate::error::Result;
    pub use crate::key::book_key;
    pub use crate::key::BookListArgs;
    pub use crate::key::BorrowSummaryArgs;
    pub use crate::key::CacheKey;
    pub use crate::key::Endpoint;
    pub use crate::key::DEFAULT_LIMIT;
    pub use crate::mutation::Mutation;
    pub use crate::mutation::MutationOutput;
    pub use crate::pagination::merge_page;
    pub use crate::patch::PendingPatch;
    pub use crate::patch::RollbackReport;
    pub use crate::query::Query;
    pub use crate::traits::CacheObserver;
    pub use crate::traits::QueryExecutor;
    pub use crate::types::*;
    pub use crate::validation::ValidationErrors;
}
