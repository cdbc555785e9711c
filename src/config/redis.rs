use redis::aio::ConnectionManager;
use redis::RedisError;

pub async fn connect(uri: &str) -> Result<ConnectionManager, RedisError> {
    let client = redis::Client::open(uri)?;

    ConnectionManager::new(client).await
}
