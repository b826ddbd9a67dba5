use shelf_cache::prelude::*;
use shelf_cache::test::*;
use shelf_cache::traits::Method;
use std::sync::Arc;

fn args() -> BookListArgs {
    BookListArgs {
        limit: 2,
        ..Default::default()
    }
}

async fn ids(store: &QueryStore<MockExecutor>, args: &BookListArgs) -> Vec<String> {
    store
        .payload(&args.key())
        .await
        .and_then(|p| p.as_books().map(|page| page.books.iter().map(|b| b.id.clone()).collect()))
        .unwrap_or_default()
}

async fn first_page(executor: &MockExecutor, store: &QueryStore<MockExecutor>) {
    executor.reply(
        Method::Get,
        "/books",
        books_body(&page_of(vec![book("a", 1), book("b", 1)], 1, 2, 5)),
    );
    store.fetch(&Query::Books(args())).await.unwrap();
}

#[tokio::test]
async fn pages_accumulate_in_order_without_duplicates() {
    let executor = Arc::new(MockExecutor::new());
    let store = store(&executor);
    first_page(&executor, &store).await;

    // The server shifted by one between the two requests: "b" shows up again.
    executor.reply(
        Method::Get,
        "/books",
        books_body(&page_of(vec![book("b", 1), book("c", 1)], 2, 2, 5)),
    );
    executor.reply(
        Method::Get,
        "/books",
        books_body(&page_of(vec![book("d", 1), book("e", 1)], 3, 2, 5)),
    );

    let info = store.load_more(&args()).await.unwrap().unwrap();
    assert_eq!(info.page, 2);
    assert_eq!(info.next_page, Some(3));
    assert_eq!(ids(&store, &args()).await, ["a", "b", "c"]);

    let info = store.load_more(&args()).await.unwrap().unwrap();
    assert_eq!(info.next_page, None);
    assert_eq!(ids(&store, &args()).await, ["a", "b", "c", "d", "e"]);

    // Exhausted: no request goes out.
    assert_eq!(store.load_more(&args()).await.unwrap(), None);
    assert_eq!(executor.call_count(Method::Get, "/books"), 3);

    let pages: Vec<String> = executor
        .calls()
        .iter()
        .filter_map(|r| r.query.iter().find(|(k, _)| k == "page").map(|(_, v)| v.clone()))
        .collect();
    assert_eq!(pages, ["1", "2", "3"]);
}

#[tokio::test]
async fn one_load_more_at_a_time() {
    let executor = Arc::new(MockExecutor::new());
    let store = store(&executor);
    first_page(&executor, &store).await;

    let gate = executor.gated(
        Method::Get,
        "/books",
        Reply::Json(books_body(&page_of(vec![book("c", 1), book("d", 1)], 2, 2, 5))),
    );
    let pending = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.load_more(&args()).await })
    };

    while executor.call_count(Method::Get, "/books") < 2 {
        tokio::task::yield_now().await;
    }
    assert!(store.is_loading_more(&args()));
    assert!(matches!(
        store.load_more(&args()).await,
        Err(CacheError::LoadMoreInFlight(_))
    ));

    gate.open();
    assert!(pending.await.unwrap().unwrap().is_some());
    assert!(!store.is_loading_more(&args()));
    assert_eq!(ids(&store, &args()).await, ["a", "b", "c", "d"]);
}

#[tokio::test]
async fn failed_load_more_keeps_the_listing() {
    let executor = Arc::new(MockExecutor::new());
    let store = store(&executor);
    first_page(&executor, &store).await;

    executor.fail(Method::Get, "/books", ApiError::new(500, "Internal server error"));
    assert!(matches!(
        store.load_more(&args()).await,
        Err(CacheError::Fetch(FetchError::Api(_)))
    ));
    assert!(!store.is_loading_more(&args()));
    assert_eq!(ids(&store, &args()).await, ["a", "b"]);

    let entry = store.get(&args().key()).await.unwrap();
    assert_eq!(entry.status(), EntryStatus::Success);
    assert_eq!(entry.payload().and_then(Payload::as_books).map(|p| p.pagination.page), Some(1));
}

#[tokio::test]
async fn nothing_to_load_without_a_listing() {
    let executor = Arc::new(MockExecutor::new());
    let store = store(&executor);

    assert_eq!(store.load_more(&args()).await.unwrap(), None);
    assert!(executor.calls().is_empty());
}
