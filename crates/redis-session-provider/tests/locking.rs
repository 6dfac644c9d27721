//! Locking protocol tests against the in-memory backend.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use redis_session_client::backend::memory::MemoryStore;
use redis_session_client::{RemoteClient, RetryPolicy};
use redis_session_core::{ProviderConfig, SessionItems, Ticks};
use redis_session_provider::SessionCacheConnection;
use serde_json::json;

fn make_client() -> Arc<RemoteClient> {
    Arc::new(RemoteClient::new(
        Arc::new(MemoryStore::new()),
        RetryPolicy::new(Duration::from_secs(1)),
    ))
}

fn config() -> ProviderConfig {
    ProviderConfig::new("APPTEST")
}

fn connection(client: &Arc<RemoteClient>, session_id: &str) -> SessionCacheConnection {
    SessionCacheConnection::new(Arc::clone(client), &config(), session_id)
}

fn unique_session() -> String {
    uuid::Uuid::new_v4().to_string()
}

const LOCK_TTL: Duration = Duration::from_secs(900);
const SESSION_TTL: Duration = Duration::from_secs(900);

#[tokio::test]
async fn take_contend_release_cycle() {
    let client = make_client();
    let conn = connection(&client, &unique_session());

    let t0 = SystemTime::now();
    let expected_token = Ticks::from_system_time(t0).to_string();

    let first = conn.take_write_lock_and_read(t0, LOCK_TTL).await.unwrap();
    assert!(first.lock_taken);
    assert_eq!(first.lock_token.as_deref(), Some(expected_token.as_str()));
    assert!(first.items.is_some());

    let second = conn
        .take_write_lock_and_read(t0 + Duration::from_secs(1), LOCK_TTL)
        .await
        .unwrap();
    assert!(!second.lock_taken);
    assert_eq!(second.lock_token.as_deref(), Some(expected_token.as_str()));
    assert!(second.items.is_none());

    let released = conn
        .release_lock_if_match(&expected_token, SESSION_TTL)
        .await
        .unwrap();
    assert!(released);

    let after = conn.check_write_lock_and_read().await.unwrap();
    assert!(after.lock_taken);
    assert_eq!(after.lock_token, None);
}

#[tokio::test]
async fn no_reentrancy_with_same_timestamp() {
    let client = make_client();
    let conn = connection(&client, &unique_session());

    let t0 = SystemTime::now();
    assert!(conn.take_write_lock_and_read(t0, LOCK_TTL).await.unwrap().lock_taken);
    assert!(!conn.take_write_lock_and_read(t0, LOCK_TTL).await.unwrap().lock_taken);
}

#[tokio::test]
async fn exactly_one_concurrent_take_succeeds() {
    let client = make_client();
    let session_id = unique_session();
    let base = SystemTime::now();

    let mut handles = Vec::new();
    for i in 0..8u64 {
        let client = Arc::clone(&client);
        let session_id = session_id.clone();
        handles.push(tokio::spawn(async move {
            let conn = connection(&client, &session_id);
            let now = base + Duration::from_millis(i + 1);
            conn.take_write_lock_and_read(now, LOCK_TTL).await.unwrap()
        }));
    }

    let mut winners = Vec::new();
    let mut losers = Vec::new();
    for handle in handles {
        let outcome = handle.await.unwrap();
        if outcome.lock_taken {
            winners.push(outcome.lock_token.unwrap());
        } else {
            losers.push(outcome.lock_token.unwrap());
        }
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(losers.len(), 7);
    // Every loser observed the winner's token.
    assert!(losers.iter().all(|token| *token == winners[0]));
}

#[tokio::test]
async fn release_with_mismatched_token_is_a_noop() {
    let client = make_client();
    let conn = connection(&client, &unique_session());

    let t0 = SystemTime::now();
    let holder = conn.take_write_lock_and_read(t0, LOCK_TTL).await.unwrap();
    let holder_token = holder.lock_token.unwrap();

    let stranger = Ticks::from_system_time(t0 + Duration::from_secs(5)).to_string();
    let released = conn
        .release_lock_if_match(&stranger, SESSION_TTL)
        .await
        .unwrap();
    assert!(!released);

    let check = conn.check_write_lock_and_read().await.unwrap();
    assert!(!check.lock_taken);
    assert_eq!(check.lock_token.as_deref(), Some(holder_token.as_str()));
}

#[tokio::test]
async fn update_applies_exactly_the_diff() {
    let client = make_client();
    let conn = connection(&client, &unique_session());

    let mut seed = SessionItems::new();
    seed.set("key1", json!("v1"));
    seed.set("key2", json!("v2"));
    seed.set("key3", json!("v3"));
    conn.write_all(&mut seed, SESSION_TTL).await.unwrap();

    let t0 = SystemTime::now();
    let outcome = conn.take_write_lock_and_read(t0, LOCK_TTL).await.unwrap();
    assert!(outcome.lock_taken);
    let token = outcome.lock_token.unwrap();
    let mut items = outcome.items.unwrap();
    assert_eq!(items.len(), 3);

    items.set("key2", json!("v2b"));
    items.remove("key3");
    let diff = items.diff().unwrap();
    assert_eq!(diff.modified.len(), 1);
    assert_eq!(diff.modified[0].0, "key2");
    assert_eq!(diff.deleted, vec!["key3".to_string()]);

    let applied = conn
        .update_and_release(Some(&token), &mut items, SESSION_TTL)
        .await
        .unwrap();
    assert!(applied);
    assert!(!items.is_dirty());

    let after = conn.check_write_lock_and_read().await.unwrap();
    assert!(after.lock_taken);
    let mut stored = after.items.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored.get("key1").unwrap(), Some(&json!("v1")));
    assert_eq!(stored.get("key2").unwrap(), Some(&json!("v2b")));
    assert_eq!(stored.get("key3").unwrap(), None);
}

#[tokio::test]
async fn update_with_lost_lock_discards_the_write() {
    let client = make_client();
    let conn = connection(&client, &unique_session());

    let t0 = SystemTime::now();
    let outcome = conn.take_write_lock_and_read(t0, LOCK_TTL).await.unwrap();
    let holder_token = outcome.lock_token.unwrap();

    let mut items = outcome.items.unwrap();
    items.set("key", json!("doomed"));
    let stranger = Ticks::from_system_time(t0 + Duration::from_secs(9)).to_string();
    let applied = conn
        .update_and_release(Some(&stranger), &mut items, SESSION_TTL)
        .await
        .unwrap();
    assert!(!applied);
    assert!(items.is_dirty());

    // The real holder still owns the lock and sees no data.
    let check = conn.check_write_lock_and_read().await.unwrap();
    assert!(!check.lock_taken);
    assert_eq!(check.lock_token.as_deref(), Some(holder_token.as_str()));

    conn.release_lock_if_match(&holder_token, SESSION_TTL)
        .await
        .unwrap();
    let mut after = conn.check_write_lock_and_read().await.unwrap().items.unwrap();
    assert_eq!(after.get("key").unwrap(), None);
}

#[tokio::test]
async fn lock_free_update_applies_unconditionally() {
    let client = make_client();
    let conn = connection(&client, &unique_session());

    let mut items = SessionItems::new();
    items.set("counter", json!(7));
    let applied = conn
        .update_and_release(None, &mut items, SESSION_TTL)
        .await
        .unwrap();
    assert!(applied);

    let mut stored = conn.check_write_lock_and_read().await.unwrap().items.unwrap();
    assert_eq!(stored.get("counter").unwrap(), Some(&json!(7)));
}

#[tokio::test]
async fn lock_free_update_ignores_a_held_lock() {
    let client = make_client();
    let conn = connection(&client, &unique_session());

    let t0 = SystemTime::now();
    let holder = conn.take_write_lock_and_read(t0, LOCK_TTL).await.unwrap();
    let holder_token = holder.lock_token.unwrap();

    let mut items = SessionItems::new();
    items.set("key", json!("forced"));
    assert!(conn.update_and_release(None, &mut items, SESSION_TTL).await.unwrap());

    // The holder's lock is untouched.
    let check = conn.check_write_lock_and_read().await.unwrap();
    assert!(!check.lock_taken);
    assert_eq!(check.lock_token.as_deref(), Some(holder_token.as_str()));
}

#[tokio::test]
async fn remove_is_conditional_on_the_token() {
    let client = make_client();
    let conn = connection(&client, &unique_session());

    let mut seed = SessionItems::new();
    seed.set("key", json!("v"));
    conn.write_all(&mut seed, SESSION_TTL).await.unwrap();

    let t0 = SystemTime::now();
    let token = conn
        .take_write_lock_and_read(t0, LOCK_TTL)
        .await
        .unwrap()
        .lock_token
        .unwrap();

    let stranger = Ticks::from_system_time(t0 + Duration::from_secs(3)).to_string();
    assert!(!conn.remove_and_release(Some(&stranger)).await.unwrap());

    assert!(conn.remove_and_release(Some(&token)).await.unwrap());
    let after = conn.check_write_lock_and_read().await.unwrap();
    assert!(after.lock_taken);
    assert!(after.items.unwrap().is_empty());
}

#[tokio::test]
async fn remove_without_token_is_unconditional() {
    let client = make_client();
    let conn = connection(&client, &unique_session());

    let mut seed = SessionItems::new();
    seed.set("key", json!("v"));
    conn.write_all(&mut seed, SESSION_TTL).await.unwrap();
    conn.take_write_lock_and_read(SystemTime::now(), LOCK_TTL)
        .await
        .unwrap();

    assert!(conn.remove_and_release(None).await.unwrap());
    let after = conn.check_write_lock_and_read().await.unwrap();
    assert!(after.lock_taken);
    assert!(after.items.unwrap().is_empty());
}

#[tokio::test]
async fn lock_age_tracks_the_token_timestamp() {
    let client = make_client();
    let conn = connection(&client, &unique_session());

    let outcome = conn
        .take_write_lock_and_read(SystemTime::now(), LOCK_TTL)
        .await
        .unwrap();
    let fresh_age = conn.lock_age(&outcome.lock_token.unwrap());
    assert!(fresh_age < Duration::from_secs(2));

    // A token from an hour ago still parses after the lock entry is gone.
    let old = Ticks::from_system_time(SystemTime::now() - Duration::from_secs(3600));
    let old_age = conn.lock_age(&old.to_string());
    assert!(old_age >= Duration::from_secs(3599));
    assert!(old_age < Duration::from_secs(3700));

    // Garbage tokens read as very old so callers break the lock.
    let garbage_age = conn.lock_age("not-a-timestamp");
    assert!(garbage_age > Duration::from_secs(365 * 24 * 3600));
}

#[tokio::test(start_paused = true)]
async fn lock_ttl_expiry_frees_the_session() {
    let client = make_client();
    let conn = connection(&client, &unique_session());

    let t0 = SystemTime::now();
    assert!(
        conn.take_write_lock_and_read(t0, Duration::from_secs(2))
            .await
            .unwrap()
            .lock_taken
    );

    tokio::time::advance(Duration::from_secs(3)).await;

    let retry = conn
        .take_write_lock_and_read(t0 + Duration::from_secs(3), Duration::from_secs(2))
        .await
        .unwrap();
    assert!(retry.lock_taken);
}

#[tokio::test(start_paused = true)]
async fn refresh_expiry_extends_the_session_life() {
    let client = make_client();
    let conn = connection(&client, &unique_session());

    let mut seed = SessionItems::new();
    seed.set("key", json!("v"));
    conn.write_all(&mut seed, Duration::from_secs(2)).await.unwrap();

    tokio::time::advance(Duration::from_secs(1)).await;
    conn.refresh_expiry(Duration::from_secs(10)).await.unwrap();

    tokio::time::advance(Duration::from_secs(5)).await;
    let mut alive = conn.check_write_lock_and_read().await.unwrap().items.unwrap();
    assert_eq!(alive.get("key").unwrap(), Some(&json!("v")));

    tokio::time::advance(Duration::from_secs(20)).await;
    let expired = conn.check_write_lock_and_read().await.unwrap().items.unwrap();
    assert!(expired.is_empty());
}

#[tokio::test]
async fn stored_timeout_round_trips_in_minutes() {
    let client = make_client();
    let conn = connection(&client, &unique_session());

    // Fresh session: nothing persisted, so the configured default applies.
    let fresh = conn.check_write_lock_and_read().await.unwrap();
    assert_eq!(fresh.timeout_minutes, 20);

    let mut seed = SessionItems::new();
    seed.set("key", json!("v"));
    conn.write_all(&mut seed, Duration::from_secs(900)).await.unwrap();

    let stored = conn.check_write_lock_and_read().await.unwrap();
    assert_eq!(stored.timeout_minutes, 15);
}

#[tokio::test]
async fn values_survive_a_full_store_cycle() {
    let client = make_client();
    let session_id = unique_session();
    let conn = connection(&client, &session_id);

    let value = json!({"cart": ["a", "b"], "total": 42.5});
    let mut items = SessionItems::new();
    items.set("state", value.clone());
    conn.update_and_release(None, &mut items, SESSION_TTL)
        .await
        .unwrap();

    // A second connection reads through a fresh deserialization.
    let other = connection(&client, &session_id);
    let mut stored = other.check_write_lock_and_read().await.unwrap().items.unwrap();
    assert_eq!(stored.get("state").unwrap(), Some(&value));
}
