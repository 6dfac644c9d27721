//! End-to-end demo of the session locking flow against a live Redis.
//!
//! Set `REDIS_URL` to point at your server (defaults to localhost).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use redis_session_client::backend::redis::RedisStore;
use redis_session_client::{RemoteClient, RetryPolicy, SharedConnection};
use redis_session_core::ProviderConfig;
use redis_session_provider::SessionStateProvider;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let url = std::env::var("REDIS_URL")
        .unwrap_or_else(|_| "redis://localhost:6379/0".to_string());
    let config = ProviderConfig::new("session-demo")
        .with_connection_string(url)
        .with_retry_timeout(Duration::from_secs(5));
    config.validate().context("invalid configuration")?;

    let shared = SharedConnection::new();
    let factory_config = config.clone();
    let client = shared
        .get_or_create(|| async move {
            let retry = RetryPolicy::new(factory_config.retry_timeout);
            let store = RedisStore::connect(&factory_config).await?;
            Ok(RemoteClient::new(Arc::new(store), retry))
        })
        .await
        .context("connecting to redis")?;

    let provider = SessionStateProvider::new(client, config)?;
    let session_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(%session_id, "starting session cycle");

    let fetch = provider.get_item_exclusive(&session_id).await?;
    let token = fetch.lock_token.context("expected a lock token")?;
    let mut items = fetch.items.context("expected session data")?;
    tracing::info!(%token, timeout_minutes = fetch.timeout_minutes, "lock acquired");

    items.set("user", json!("demo"));
    items.set("visits", json!(1));

    // A second exclusive fetch while the lock is held reports contention.
    let contended = provider.get_item_exclusive(&session_id).await?;
    tracing::info!(
        locked = contended.locked,
        lock_age = ?contended.lock_age,
        "contending fetch observed the holder"
    );

    provider
        .set_and_release_item(&session_id, &mut items, Some(&token), false, 20)
        .await?;
    tracing::info!("diff written and lock released");

    let mut after = provider.get_item(&session_id).await?;
    let stored = after.items.as_mut().context("expected session data")?;
    let user = stored.get("user")?.cloned();
    tracing::info!(?user, "read back");

    provider.remove_item(&session_id, None).await?;
    tracing::info!("session removed");
    Ok(())
}
