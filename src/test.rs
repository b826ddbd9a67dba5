#![cfg(any(test, feature = "test"))]
//! Test support: a scripted in-memory executor and catalogue fixtures.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use serde_json::Value;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::prelude::*;
use crate::traits::ApiRequest;
use crate::traits::Method;

#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Fail(FetchError),
}

struct Scripted {
    reply: Reply,
    gate:  Option<oneshot::Receiver<()>>,
}

/// Holds a scripted reply back until opened. Dropping the gate opens it too.
pub struct Gate(Option<oneshot::Sender<()>>);

impl Gate {
    pub fn open(mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

/// Executor answering from per-route queues of scripted replies, in order. A call with nothing scripted for its route
/// fails as a network error.
#[derive(Default)]
pub struct MockExecutor {
    replies: Mutex<HashMap<(Method, String), VecDeque<Scripted>>>,
    calls:   Mutex<Vec<ApiRequest>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, method: Method, path: &str, scripted: Scripted) {
        self.replies
            .lock()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(scripted);
    }

    pub fn reply(&self, method: Method, path: &str, body: Value) {
        self.push(
            method,
            path,
            Scripted {
                reply: Reply::Json(body),
                gate:  None,
            },
        );
    }

    pub fn fail(&self, method: Method, path: &str, err: impl Into<FetchError>) {
        self.push(
            method,
            path,
            Scripted {
                reply: Reply::Fail(err.into()),
                gate:  None,
            },
        );
    }

    /// Scripts a reply that is only delivered once the returned gate is opened.
    pub fn gated(&self, method: Method, path: &str, reply: Reply) -> Gate {
        let (tx, rx) = oneshot::channel();
        self.push(method, path, Scripted { reply, gate: Some(rx) });
        Gate(Some(tx))
    }

    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, method: Method, path: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }
}

#[async_trait]
impl QueryExecutor for MockExecutor {
    async fn execute(&self, request: ApiRequest) -> Result<Value, FetchError> {
        self.calls.lock().push(request.clone());
        let scripted = self
            .replies
            .lock()
            .get_mut(&(request.method, request.path.clone()))
            .and_then(VecDeque::pop_front);

        let Some(Scripted { reply, gate }) = scripted
        else {
            return Err(FetchError::Network(format!("nothing scripted for {request}")));
        };

        if let Some(gate) = gate {
            let _ = gate.await;
        }

        match reply {
            Reply::Json(body) => Ok(body),
            Reply::Fail(err) => Err(err),
        }
    }
}

pub fn book(id: &str, copies: u32) -> Book {
    Book {
        id:             id.to_string(),
        title:          format!("Book {id}"),
        author:         format!("Author {id}"),
        genre:          "FICTION".to_string(),
        isbn:           9_780_000_000_000,
        description:    None,
        publisher:      None,
        published_year: Some(2001),
        language:       Some("English".to_string()),
        pages:          Some(320),
        copies,
        price:          None,
        available:      copies > 0,
        image:          None,
        rating:         None,
        review_count:   None,
    }
}

pub fn new_book(title: &str, copies: u32) -> NewBook {
    NewBook {
        title: title.to_string(),
        author: "Anonymous".to_string(),
        genre: "FICTION".to_string(),
        isbn: 9_780_000_000_001,
        description: None,
        publisher: None,
        published_year: Some(2020),
        language: None,
        pages: None,
        copies,
        price: None,
        available: None,
        image: None,
    }
}

pub fn page_of(books: Vec<Book>, page: u32, limit: u32, total_items: u64) -> BookPage {
    BookPage {
        books,
        pagination: PageInfo::new(page, limit, total_items),
    }
}

pub fn books_body(page: &BookPage) -> Value {
    json!({ "success": true, "message": "Books retrieved successfully", "data": page })
}

pub fn book_body(book: &Book) -> Value {
    json!({ "success": true, "message": "Book retrieved successfully", "data": book })
}

pub fn ack(message: &str) -> Value {
    json!({ "success": true, "message": message })
}

pub fn store(executor: &Arc<MockExecutor>) -> Arc<QueryStore<MockExecutor>> {
    store_with_grace(executor, Duration::from_secs(60))
}

pub fn store_with_grace(executor: &Arc<MockExecutor>, keep_unused_for: Duration) -> Arc<QueryStore<MockExecutor>> {
    QueryStore::builder()
        .executor(Arc::clone(executor))
        .name("test")
        .keep_unused_for(keep_unused_for)
        .build()
        .unwrap()
}

/// Observer recording every announcement it receives.
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<(CacheKey, Option<CacheEntry>)>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn last(&self) -> Option<Option<CacheEntry>> {
        self.seen.lock().last().map(|(_, e)| e.clone())
    }

    pub fn statuses(&self) -> Vec<Option<EntryStatus>> {
        self.seen
            .lock()
            .iter()
            .map(|(_, e)| e.as_ref().map(CacheEntry::status))
            .collect()
    }
}

impl CacheObserver for Recorder {
    fn on_change(&self, key: &CacheKey, entry: Option<&CacheEntry>) {
        self.seen.lock().push((key.clone(), entry.cloned()));
    }
}
