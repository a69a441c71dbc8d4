use redis::Client;
use redis::aio::ConnectionManager;

/// Create a Redis connection manager shared by the queue and metrics backends.
///
/// The manager reconnects on its own; a `PING` is issued up front so a bad
/// `REDIS_URL` fails at startup instead of on the first tick.
pub async fn create_redis_pool(redis_url: &str) -> anyhow::Result<ConnectionManager> {
    let client = Client::open(redis_url)?;
    let mut manager = ConnectionManager::new(client).await?;

    let _: String = redis::cmd("PING").query_async(&mut manager).await?;

    tracing::info!("Connected to Redis");
    Ok(manager)
}
