//! Search and pagination integration tests

use chrono::{Duration, Utc};
use snip::config::CodeConfig;
use snip::models::{ClickLimit, NewShortUrl, Owner, OwnerKey};
use snip::storage::{SqliteStorage, Storage};
use snip::{QueryEngine, RedirectResolver, ShortUrlStore};
use std::sync::Arc;

async fn create_test_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 5).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

fn setup(storage: Arc<dyn Storage>) -> (ShortUrlStore, QueryEngine) {
    (
        ShortUrlStore::new(Arc::clone(&storage), &CodeConfig::default()),
        QueryEngine::new(storage),
    )
}

#[tokio::test]
async fn test_pagination_bounds_are_rejected() {
    let (_store, query) = setup(create_test_storage().await);

    assert!(query.by_user(1, 0, 10).await.unwrap_err().is_validation());
    assert!(query.by_user(1, 1, 0).await.unwrap_err().is_validation());
    assert!(query.by_user(1, 1, 1001).await.unwrap_err().is_validation());
    assert!(query.by_user(1, 1, 1000).await.is_ok());
}

#[tokio::test]
async fn test_owner_scoped_listing_newest_first() {
    let (store, query) = setup(create_test_storage().await);
    let start = Utc::now();

    for i in 0..5 {
        store
            .add_at(
                NewShortUrl::new(format!("https://example.com/{i}"), Owner::user(1)),
                start + Duration::seconds(i),
            )
            .await
            .unwrap();
    }
    store
        .add(NewShortUrl::new("https://example.com/org", Owner::organization(3, 30)))
        .await
        .unwrap();
    store
        .add(NewShortUrl::new("https://example.com/anon", Owner::anonymous("sess-9", None)))
        .await
        .unwrap();

    let first = query.by_user(1, 1, 2).await.unwrap();
    assert_eq!(first.total, 5);
    assert_eq!(first.total_pages(), 3);
    assert_eq!(first.items.len(), 2);
    assert_eq!(first.items[0].original_url, "https://example.com/4");
    assert_eq!(first.items[1].original_url, "https://example.com/3");

    let last = query.by_user(1, 3, 2).await.unwrap();
    assert_eq!(last.items.len(), 1);
    assert_eq!(last.items[0].original_url, "https://example.com/0");

    let beyond = query.by_user(1, 4, 2).await.unwrap();
    assert!(beyond.items.is_empty());
    assert_eq!(beyond.total, 5);

    assert_eq!(query.by_organization(3, 1, 10).await.unwrap().total, 1);
    assert_eq!(query.by_anonymous_session("sess-9", 1, 10).await.unwrap().total, 1);
    assert_eq!(query.by_anonymous_session("other", 1, 10).await.unwrap().total, 0);
}

#[tokio::test]
async fn test_created_between_and_expired_as_of() {
    let (store, query) = setup(create_test_storage().await);
    let start = Utc::now();

    for i in 0..4 {
        store
            .add_at(
                NewShortUrl::new(format!("https://example.com/{i}"), Owner::user(1))
                    .with_expiry(start + Duration::hours(i + 1)),
                start + Duration::minutes(i),
            )
            .await
            .unwrap();
    }

    let window = query
        .created_between(start + Duration::minutes(1), start + Duration::minutes(2), 1, 10)
        .await
        .unwrap();
    assert_eq!(window.total, 2);

    let expired = query
        .expired_as_of(start + Duration::hours(2), 1, 10)
        .await
        .unwrap();
    assert_eq!(expired.total, 2);

    assert!(query
        .created_between(start, start - Duration::minutes(1), 1, 10)
        .await
        .unwrap_err()
        .is_validation());
}

#[tokio::test]
async fn test_approaching_click_limit_and_unused() {
    let storage = create_test_storage().await;
    let (store, query) = setup(Arc::clone(&storage));
    let resolver = RedirectResolver::new(Arc::clone(&storage));

    store
        .add(
            NewShortUrl::new("https://example.com/hot", Owner::user(1))
                .with_custom_code("heat")
                .with_click_limit(ClickLimit::Max(10)),
        )
        .await
        .unwrap();
    store
        .add(
            NewShortUrl::new("https://example.com/warm", Owner::user(1))
                .with_custom_code("warm")
                .with_click_limit(ClickLimit::Max(10)),
        )
        .await
        .unwrap();
    store
        .add(NewShortUrl::new("https://example.com/cold", Owner::user(1)).with_custom_code("icy"))
        .await
        .unwrap();

    for _ in 0..9 {
        resolver.resolve("heat", None).await.unwrap();
    }
    for _ in 0..2 {
        resolver.resolve("warm", None).await.unwrap();
    }

    let near = query.approaching_click_limit(0.8, 1, 10).await.unwrap();
    assert_eq!(near.total, 1);
    assert_eq!(near.items[0].short_code.as_deref(), Some("heat"));

    assert!(query
        .approaching_click_limit(1.5, 1, 10)
        .await
        .unwrap_err()
        .is_validation());

    let unused = query.unused(None, 1, 10).await.unwrap();
    assert_eq!(unused.total, 1);
    assert_eq!(unused.items[0].short_code.as_deref(), Some("icy"));

    let unused_old = query
        .unused(Some(Utc::now() - Duration::days(1)), 1, 10)
        .await
        .unwrap();
    assert_eq!(unused_old.total, 0);
}

#[tokio::test]
async fn test_duplicates_grouped_by_original_url() {
    let (store, query) = setup(create_test_storage().await);

    for (url, owner) in [
        ("https://b.example.com", Owner::user(1)),
        ("https://a.example.com", Owner::user(1)),
        ("https://b.example.com", Owner::user(1)),
        ("https://a.example.com", Owner::user(2)),
        ("https://c.example.com", Owner::user(1)),
        ("https://a.example.com", Owner::user(1)),
        ("https://b.example.com", Owner::user(2)),
    ] {
        store.add(NewShortUrl::new(url, owner)).await.unwrap();
    }

    let all = query.duplicates(None, 1, 10).await.unwrap();
    assert_eq!(all.total, 2);
    assert_eq!(all.items[0].original_url, "https://a.example.com");
    assert_eq!(all.items[0].urls.len(), 3);
    assert_eq!(all.items[1].original_url, "https://b.example.com");
    assert_eq!(all.items[1].urls.len(), 3);

    let mine = query
        .duplicates(Some(&OwnerKey::User(1)), 1, 10)
        .await
        .unwrap();
    assert_eq!(mine.total, 2);
    assert!(mine.items.iter().all(|group| group.urls.len() == 2));

    let second_page = query.duplicates(None, 2, 1).await.unwrap();
    assert_eq!(second_page.items.len(), 1);
    assert_eq!(second_page.items[0].original_url, "https://b.example.com");

    let theirs = query
        .duplicates(Some(&OwnerKey::User(2)), 1, 10)
        .await
        .unwrap();
    assert_eq!(theirs.total, 0);
    assert!(theirs.items.is_empty());
}
