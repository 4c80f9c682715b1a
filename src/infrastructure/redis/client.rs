use redis::{Client, aio::MultiplexedConnection};
use tracing::info;

#[derive(Clone)]
pub struct RedisService {
    client: Client,
}

impl RedisService {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let service = Self::open(connection_string)?;

        // Fail fast if the store is unreachable at startup
        let _conn = service.get_conn().await?;

        info!("✅ Connected to Redis");
        Ok(service)
    }

    /// Parses the URL without connecting.
    pub fn open(connection_string: &str) -> Result<Self, redis::RedisError> {
        Ok(Self {
            client: Client::open(connection_string)?,
        })
    }

    pub async fn get_conn(&self) -> Result<MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    pub async fn ping(&self) -> bool {
        let Ok(mut conn) = self.get_conn().await else {
            return false;
        };
        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        pong.is_ok()
    }
}
