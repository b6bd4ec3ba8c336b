//! Redirect integration tests
//!
//! These tests verify the order of redirect checks, the click limit boundary
//! under concurrency and password-protected links.

use chrono::{Duration, Utc};
use snip::config::CodeConfig;
use snip::models::{ClickLimit, NewShortUrl, Owner};
use snip::storage::{CachedStorage, SqliteStorage, Storage};
use snip::{RedirectOutcome, RedirectResolver, ShortUrlStore};
use std::sync::Arc;

async fn create_test_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 5).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

fn setup(storage: Arc<dyn Storage>) -> (ShortUrlStore, RedirectResolver) {
    (
        ShortUrlStore::new(Arc::clone(&storage), &CodeConfig::default()),
        RedirectResolver::new(storage),
    )
}

fn redirect_to(url: &str) -> RedirectOutcome {
    RedirectOutcome::Redirect {
        url: url.to_string(),
    }
}

#[tokio::test]
async fn test_redirect_counts_click() {
    let (store, resolver) = setup(create_test_storage().await);
    store
        .add(NewShortUrl::new("https://example.com/page", Owner::user(1)).with_custom_code("jump"))
        .await
        .unwrap();

    let outcome = resolver.resolve("jump", None).await.unwrap();
    assert_eq!(outcome, redirect_to("https://example.com/page"));

    let url = store.get_by_code("jump").await.unwrap().unwrap();
    assert_eq!(url.total_clicks, 1);
}

#[tokio::test]
async fn test_missing_code_is_not_found() {
    let (_store, resolver) = setup(create_test_storage().await);

    assert_eq!(
        resolver.resolve("nothing", None).await.unwrap(),
        RedirectOutcome::NotFound
    );
    assert!(resolver.is_active("nothing").await.unwrap_err().is_not_found());
    assert!(resolver
        .verify_password("nothing", "pw")
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_inactive_wins_over_expired_and_limit() {
    let (store, resolver) = setup(create_test_storage().await);
    let now = Utc::now();

    let url = store
        .add_at(
            NewShortUrl::new("https://example.com", Owner::user(1))
                .with_custom_code("barred")
                .with_click_limit(ClickLimit::Max(0))
                .with_expiry(now + Duration::hours(1)),
            now,
        )
        .await
        .unwrap();

    let mut inactive = url.clone();
    inactive.is_active = false;
    let inactive = store.update(&inactive).await.unwrap();

    let later = now + Duration::hours(2);
    assert_eq!(
        resolver.resolve_at("barred", None, later).await.unwrap(),
        RedirectOutcome::Inactive
    );

    let mut active = inactive.clone();
    active.is_active = true;
    store.update(&active).await.unwrap();

    // Expired and over the limit: expiry is checked first
    assert_eq!(
        resolver.resolve_at("barred", None, later).await.unwrap(),
        RedirectOutcome::Expired
    );
    // Before expiry only the limit applies
    assert_eq!(
        resolver.resolve_at("barred", None, now).await.unwrap(),
        RedirectOutcome::LimitReached
    );
}

#[tokio::test]
async fn test_expiry_boundary_is_inclusive() {
    let (store, resolver) = setup(create_test_storage().await);
    let now = Utc::now();
    let expires_at = now + Duration::minutes(10);

    store
        .add_at(
            NewShortUrl::new("https://example.com", Owner::user(1))
                .with_custom_code("ticking")
                .with_expiry(expires_at),
            now,
        )
        .await
        .unwrap();

    assert!(resolver
        .resolve_at("ticking", None, expires_at - Duration::milliseconds(1))
        .await
        .unwrap()
        .is_redirect());
    assert_eq!(
        resolver.resolve_at("ticking", None, expires_at).await.unwrap(),
        RedirectOutcome::Expired
    );
}

#[tokio::test]
async fn test_click_limit_boundary() {
    let (store, resolver) = setup(create_test_storage().await);
    store
        .add(
            NewShortUrl::new("https://example.com", Owner::user(1))
                .with_custom_code("five")
                .with_click_limit(ClickLimit::Max(5)),
        )
        .await
        .unwrap();

    for _ in 0..4 {
        assert!(resolver.resolve("five", None).await.unwrap().is_redirect());
    }
    assert!(!resolver.is_click_limit_reached("five").await.unwrap());

    // Fifth click is the last one allowed
    assert!(resolver.resolve("five", None).await.unwrap().is_redirect());
    assert!(resolver.is_click_limit_reached("five").await.unwrap());
    assert!(!resolver.is_valid("five").await.unwrap());

    assert_eq!(
        resolver.resolve("five", None).await.unwrap(),
        RedirectOutcome::LimitReached
    );
    let url = store.get_by_code("five").await.unwrap().unwrap();
    assert_eq!(url.total_clicks, 5);
}

#[tokio::test]
async fn test_concurrent_redirects_never_exceed_limit() {
    let storage = create_test_storage().await;
    let (store, _) = setup(Arc::clone(&storage));
    // Serve lookups from the cache so every task sees the link as valid
    let cached: Arc<dyn Storage> = Arc::new(CachedStorage::new(Arc::clone(&storage), 100, 60));
    let resolver = Arc::new(RedirectResolver::new(cached));

    store
        .add(
            NewShortUrl::new("https://example.com", Owner::user(1))
                .with_custom_code("burst")
                .with_click_limit(ClickLimit::Max(5)),
        )
        .await
        .unwrap();
    assert!(resolver.is_valid("burst").await.unwrap());

    let mut handles = vec![];
    for _ in 0..20 {
        let resolver = Arc::clone(&resolver);
        handles.push(tokio::spawn(async move {
            resolver.resolve("burst", None).await.unwrap()
        }));
    }

    let mut redirects = 0;
    let mut limited = 0;
    for handle in handles {
        match handle.await.unwrap() {
            RedirectOutcome::Redirect { .. } => redirects += 1,
            RedirectOutcome::LimitReached => limited += 1,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(redirects, 5);
    assert_eq!(limited, 15);
    let url = storage.get_by_code("burst").await.unwrap().unwrap();
    assert_eq!(url.total_clicks, 5);
}

#[tokio::test]
async fn test_password_protected_link() {
    let (store, resolver) = setup(create_test_storage().await);
    store
        .add(
            NewShortUrl::new("https://example.com/secret", Owner::user(1))
                .with_custom_code("guarded")
                .with_password("s3cret"),
        )
        .await
        .unwrap();

    assert!(resolver.is_password_protected("guarded").await.unwrap());
    assert_eq!(
        resolver.resolve("guarded", None).await.unwrap(),
        RedirectOutcome::PasswordRequired
    );
    assert_eq!(
        resolver.resolve("guarded", Some("wrong")).await.unwrap(),
        RedirectOutcome::PasswordIncorrect
    );
    assert_eq!(
        resolver.resolve("guarded", Some("s3cret")).await.unwrap(),
        redirect_to("https://example.com/secret")
    );
    assert!(resolver.verify_password("guarded", "s3cret").await.unwrap());
    assert!(!resolver.verify_password("guarded", "nope").await.unwrap());

    // Only the successful attempt counted
    let url = store.get_by_code("guarded").await.unwrap().unwrap();
    assert_eq!(url.total_clicks, 1);
}

#[tokio::test]
async fn test_probes_on_plain_link() {
    let (store, resolver) = setup(create_test_storage().await);
    store
        .add(NewShortUrl::new("https://example.com", Owner::anonymous("sess-1", None)).with_custom_code("bare"))
        .await
        .unwrap();

    assert!(resolver.is_active("bare").await.unwrap());
    assert!(resolver.is_valid("bare").await.unwrap());
    assert!(!resolver.is_click_limit_reached("bare").await.unwrap());
    assert!(!resolver.is_password_protected("bare").await.unwrap());
    assert!(!resolver.verify_password("bare", "anything").await.unwrap());
}
