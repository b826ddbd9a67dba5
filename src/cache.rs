use crate::prelude::*;
use fieldx_plus::fx_plus;
use moka::future::Cache;
use moka::ops::compute::CompResult;
use moka::ops::compute::Op;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::watch;
use tracing::instrument;

use crate::notifier::Notifier;
use crate::notifier::ObserverId;

enum FetchRole {
    Owner(watch::Sender<bool>),
    Waiter(watch::Receiver<bool>),
}

/// The single source of truth for every query result.
///
/// ```ignore
/// let store = QueryStore::builder()
///     .executor(HttpExecutor::new("http://localhost:3000/api", Duration::from_secs(10))?)
///     .keep_unused_for(Duration::from_secs(60))
///     .build()?;
///
/// let handle = store
///     .query(Query::Books(BookListArgs::default()), |key: &CacheKey, entry: Option<&CacheEntry>| {
///         render(key, entry);
///     })
///     .await?;
///
/// store.mutate(Mutation::borrow(book_id, 2, due_date)).await?;
/// ```
#[fx_plus(
    parent,
    no_new,
    default(off),
    sync,
    builder(
        doc("Builder object of [`QueryStore`].", "", "See [`QueryStore::builder()`] method."),
        method_doc("Implement builder pattern for [`QueryStore`]."),
    )
)]
pub struct QueryStore<E>
where
    E: QueryExecutor,
{
    #[fieldx(vis(pub(crate)), builder(vis(pub), required, into), get(clone))]
    executor: Arc<E>,

    /// Store name. Most useful for debugging and logging.
    #[fieldx(get, builder(into), default("shelf".to_string()))]
    name: String,

    /// How long an entry nobody observes anymore is kept around before eviction.
    #[fieldx(get(copy), default(Duration::from_secs(60)))]
    keep_unused_for: Duration,

    #[fieldx(get(copy), default(10_000))]
    max_capacity: u64,

    #[fieldx(vis(pub(crate)), lazy, get(clone), builder(off))]
    entries: Arc<Cache<CacheKey, CacheEntry>>,

    #[fieldx(get(clone), builder(off), default(Arc::new(Notifier::new())))]
    notifier: Arc<Notifier>,

    // Keys being fetched right now. Late arrivals wait on the receiver instead of issuing their own request.
    #[fieldx(private, lock, get_mut, builder(off), default(HashMap::new()))]
    in_flight: HashMap<CacheKey, watch::Receiver<bool>>,

    // Listing keys with a "load more" in flight.
    #[fieldx(vis(pub(crate)), lock, get, get_mut, builder(off), default(HashSet::new()))]
    loading_more: HashSet<CacheKey>,

    // Eviction tickets of unobserved keys. A scheduled eviction only proceeds if its ticket is still the current one.
    #[fieldx(private, lock, get_mut, builder(off), default(HashMap::new()))]
    eviction_tickets: HashMap<CacheKey, u64>,

    #[fieldx(private, get(off), builder(off), default(AtomicU64::new(0)))]
    version_seq: AtomicU64,
}

impl<E> QueryStore<E>
where
    E: QueryExecutor,
{
    fn build_entries(&self) -> Arc<Cache<CacheKey, CacheEntry>> {
        Arc::new(
            Cache::builder()
                .max_capacity(self.max_capacity())
                .name(self.name())
                .build(),
        )
    }

    fn next_version(&self) -> u64 {
        self.version_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn myself_or_gone(&self) -> Result<Arc<Self>> {
        self.myself().ok_or(CacheError::StoreGone)
    }

    /// The current entry of the key, with its live subscriber count.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries().get(key).await.map(|mut entry| {
            entry.subscribers = self.notifier().observer_count(key);
            entry
        })
    }

    pub async fn payload(&self, key: &CacheKey) -> Option<Arc<Payload>> {
        self.entries().get(key).await.and_then(|e| e.shared_payload())
    }

    // The only write path of the store. `f` runs while the key is locked and decides what, if anything, gets written;
    // observers are notified after the lock is released. Returns the written entry.
    pub(crate) async fn compute<F>(&self, key: &CacheKey, f: F) -> Option<CacheEntry>
    where
        F: FnOnce(Option<CacheEntry>) -> Option<CacheEntry> + Send,
    {
        let result = self
            .entries()
            .entry(key.clone())
            .and_compute_with(|current| {
                let op = match f(current.map(|e| e.into_value())) {
                    Some(mut next) => {
                        next.version = self.next_version();
                        Op::Put(next)
                    }
                    None => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;

        let mut written = match result {
            CompResult::Inserted(e) | CompResult::ReplacedWith(e) => e.into_value(),
            CompResult::Unchanged(_) | CompResult::StillNone(_) | CompResult::Removed(_) => return None,
        };
        written.subscribers = self.notifier().observer_count(key);

        self.notifier().notify(key, Some(&written));
        Some(written)
    }

    /// Applies `f` to the current entry of the key, or to a fresh idle entry if there is none, and stores the result.
    pub async fn upsert<F>(&self, key: &CacheKey, f: F) -> CacheEntry
    where
        F: FnOnce(CacheEntry) -> CacheEntry + Send,
    {
        // `compute` only skips the write when the closure says so, which this one never does.
        self.compute(key, |current| Some(f(current.unwrap_or_default())))
            .await
            .unwrap_or_default()
    }

    /// Marks the entry stale; the next fetch goes to the network. Returns `false` if there was nothing to invalidate.
    pub async fn invalidate(&self, key: &CacheKey) -> bool {
        log::debug!("[{}] INVALIDATE({key})", self.name());
        self.compute(key, |current| {
            current.map(|mut entry| {
                entry.stale = true;
                entry
            })
        })
        .await
        .is_some()
    }

    /// Invalidates every cached key of the endpoint.
    pub async fn invalidate_endpoint(&self, endpoint: Endpoint) -> usize {
        let mut count = 0;
        for key in self.keys_where(|key, _| key.endpoint() == endpoint) {
            if self.invalidate(&key).await {
                count += 1;
            }
        }
        count
    }

    /// Drops the entry altogether. Observers are told with a `None` entry.
    pub async fn evict(&self, key: &CacheKey) {
        log::debug!("[{}] EVICT({key})", self.name());
        self.entries().invalidate(key).await;
        self.notifier().notify(key, None);
    }

    /// Keys of the entries matching the predicate, in no particular order.
    pub fn keys_where<P>(&self, predicate: P) -> Vec<CacheKey>
    where
        P: Fn(&CacheKey, &CacheEntry) -> bool,
    {
        self.entries()
            .iter()
            .filter(|(key, entry)| predicate(&**key, entry))
            .map(|(key, _)| (*key).clone())
            .collect()
    }

    pub fn subscribe(&self, key: &CacheKey, observer: impl CacheObserver) -> Result<Subscription<E>> {
        let myself = self.myself_or_gone()?;
        // Registered first: a pending eviction that already got past its ticket check must see the observer.
        let id = self.notifier().subscribe(key, Arc::new(observer));
        self.eviction_tickets_mut().remove(key);
        Ok(Subscription {
            store: Arc::downgrade(&myself),
            key: key.clone(),
            id,
            released: false,
        })
    }

    fn release(&self, key: &CacheKey, id: ObserverId) {
        if self.notifier().unsubscribe(key, id) == 0 {
            self.schedule_eviction(key.clone());
        }
    }

    fn schedule_eviction(&self, key: CacheKey) {
        let Some(myself) = self.myself()
        else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current()
        else {
            log::debug!("[{}] No runtime to schedule eviction of {key}; keeping it.", self.name());
            return;
        };

        let ticket = self.next_version();
        self.eviction_tickets_mut().insert(key.clone(), ticket);

        let store = Arc::downgrade(&myself);
        let grace = self.keep_unused_for();
        runtime.spawn(async move {
            tokio::time::sleep(grace).await;
            let Some(store) = store.upgrade()
            else {
                return;
            };
            let current = {
                let mut tickets = store.eviction_tickets_mut();
                if tickets.get(&key) == Some(&ticket) {
                    tickets.remove(&key);
                    true
                }
                else {
                    false
                }
            };
            if current && store.notifier().observer_count(&key) == 0 {
                store.evict(&key).await;
            }
        });
    }

    /// Subscribes the observer to the query's key and makes sure there is data for it: served from the store when
    /// fresh, fetched otherwise. A failed fetch doesn't fail the call; it is visible as the entry's error state.
    pub async fn query(&self, query: Query, observer: impl CacheObserver) -> Result<QueryHandle<E>> {
        let subscription = self.subscribe(&query.key(), observer)?;
        if let Err(err) = self.fetch(&query).await {
            log::debug!("[{}] Query {} failed: {err}", self.name(), query.key());
        }
        Ok(QueryHandle { query, subscription })
    }

    /// Returns the fresh entry of the query, going to the network only on a miss or a stale entry.
    pub async fn fetch(&self, query: &Query) -> Result<CacheEntry> {
        let key = query.key();
        if let Some(entry) = self.get(&key).await {
            if entry.is_fresh() {
                log::debug!("[{}] HIT({key})", self.name());
                return Ok(entry);
            }
        }
        log::debug!("[{}] MISS({key})", self.name());
        self.refetch(query).await
    }

    /// Fetches regardless of what's cached. If the same key is already being fetched, waits for that instead.
    #[instrument(level = "debug", skip(self, query), fields(store = %self.name(), key = %query.key()))]
    pub async fn refetch(&self, query: &Query) -> Result<CacheEntry> {
        let key = query.key();

        let role = {
            let mut in_flight = self.in_flight_mut();
            if let Some(rx) = in_flight.get(&key) {
                FetchRole::Waiter(rx.clone())
            }
            else {
                let (tx, rx) = watch::channel(false);
                in_flight.insert(key.clone(), rx);
                FetchRole::Owner(tx)
            }
        };

        match role {
            FetchRole::Waiter(mut rx) => {
                log::debug!("[{}] Joining in-flight fetch of {key}", self.name());
                // An error here means the owner is gone; whatever it managed to store is all there is.
                let _ = rx.wait_for(|done| *done).await;
                let entry = self.get(&key).await.unwrap_or_default();
                match entry.error() {
                    Some(err) if entry.status() == EntryStatus::Error => Err(err.clone().into()),
                    _ => Ok(entry),
                }
            }
            FetchRole::Owner(tx) => {
                let _done = InFlight {
                    store: self,
                    key:   &key,
                    tx,
                };
                self.upsert(&key, CacheEntry::loading).await;

                let outcome = match self.executor().execute(query.request()).await {
                    Ok(body) => query.decode(body),
                    Err(err) => Err(err.into()),
                };

                let result = match outcome {
                    Ok(payload) => Ok(self.upsert(&key, |e| e.succeeded(payload)).await),
                    Err(err) => {
                        log::warn!("[{}] Fetching {key} failed: {err}", self.name());
                        let recorded = match &err {
                            CacheError::Fetch(fetch_err) => fetch_err.clone(),
                            other => FetchError::Api(ApiError {
                                status:  None,
                                message: Some(other.to_string()),
                                code:    None,
                            }),
                        };
                        self.upsert(&key, |e| e.failed(recorded)).await;
                        Err(err)
                    }
                };

                // Nobody is looking at it: let it go after the grace period like any other abandoned entry.
                if self.notifier().observer_count(&key) == 0 {
                    self.schedule_eviction(key.clone());
                }

                result
            }
        }
    }

    pub async fn close(&self) {
        self.entries().invalidate_all();
        self.entries().run_pending_tasks().await;
        self.in_flight_mut().clear();
        self.eviction_tickets_mut().clear();
    }
}

// Releases the in-flight slot of a key and wakes the waiters, no matter how the owning fetch ended.
struct InFlight<'a, E>
where
    E: QueryExecutor,
{
    store: &'a QueryStore<E>,
    key:   &'a CacheKey,
    tx:    watch::Sender<bool>,
}

impl<E> Drop for InFlight<'_, E>
where
    E: QueryExecutor,
{
    fn drop(&mut self) {
        self.store.in_flight_mut().remove(self.key);
        self.tx.send_replace(true);
    }
}

/// Observer registration on a key. Unsubscribes when dropped; the entry is evicted once the last subscription is gone
/// and the store's grace period has passed.
pub struct Subscription<E>
where
    E: QueryExecutor,
{
    store:    Weak<QueryStore<E>>,
    key:      CacheKey,
    id:       ObserverId,
    released: bool,
}

impl<E> Subscription<E>
where
    E: QueryExecutor,
{
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(store) = self.store.upgrade() {
            store.release(&self.key, self.id);
        }
    }
}

impl<E> Drop for Subscription<E>
where
    E: QueryExecutor,
{
    fn drop(&mut self) {
        self.release();
    }
}

impl<E> std::fmt::Debug for Subscription<E>
where
    E: QueryExecutor,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}

/// What a view holds on to while it shows a query.
pub struct QueryHandle<E>
where
    E: QueryExecutor,
{
    query:        Query,
    subscription: Subscription<E>,
}

impl<E> QueryHandle<E>
where
    E: QueryExecutor,
{
    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn key(&self) -> &CacheKey {
        self.subscription.key()
    }

    fn store(&self) -> Result<Arc<QueryStore<E>>> {
        self.subscription.store.upgrade().ok_or(CacheError::StoreGone)
    }

    pub async fn entry(&self) -> Result<Option<CacheEntry>> {
        Ok(self.store()?.get(self.key()).await)
    }

    pub async fn refetch(&self) -> Result<CacheEntry> {
        self.store()?.refetch(&self.query).await
    }

    /// Stops observing. The data stays in the store for the grace period.
    pub fn release(self) {
        self.subscription.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::book;
    use crate::test::book_body;
    use crate::test::store_with_grace;
    use crate::test::MockExecutor;
    use crate::test::Recorder;
    use crate::traits::Method;

    #[tokio::test(start_paused = true)]
    async fn subscribing_withdraws_a_pending_eviction() {
        let executor = Arc::new(MockExecutor::new());
        let store = store_with_grace(&executor, Duration::from_secs(5));
        let key = book_key("a");
        executor.reply(Method::Get, "/books/a", book_body(&book("a", 1)));

        store.fetch(&Query::Book("a".into())).await.unwrap();
        assert!(store.eviction_tickets_mut().contains_key(&key));

        let _subscription = store.subscribe(&key, Recorder::new()).unwrap();
        assert_eq!(store.notifier().observer_count(&key), 1);
        assert!(!store.eviction_tickets_mut().contains_key(&key));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(store.get(&key).await.is_some());
    }

    #[tokio::test]
    async fn observers_see_live_subscriber_counts() {
        let executor = Arc::new(MockExecutor::new());
        let store = store_with_grace(&executor, Duration::from_secs(5));
        let key = book_key("a");
        let first = Recorder::new();
        let second = Recorder::new();

        let _one = store.subscribe(&key, first.clone()).unwrap();
        let _two = store.subscribe(&key, second.clone()).unwrap();
        let written = store.upsert(&key, |e| e.succeeded(Payload::Book(book("a", 1)))).await;

        assert_eq!(written.subscribers(), 2);
        assert_eq!(first.last().flatten().map(|e| e.subscribers()), Some(2));
        assert_eq!(second.last().flatten().map(|e| e.subscribers()), Some(2));
    }
}
