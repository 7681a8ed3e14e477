//! [StoreDriver] implementation backed by Redis.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client, RedisError};

use crate::{
    config::StoreOptions,
    store::{HashConnection, StoreDriver, StoreError},
};

/// Sort a driver error into a lost connection or a rejected command.
fn classify(error: RedisError) -> StoreError {
    if error.is_io_error()
        || error.is_connection_dropped()
        || error.is_connection_refusal()
        || error.is_timeout()
    {
        StoreError::connection(error)
    } else {
        StoreError::command(error)
    }
}

pub struct RedisDriver {
    client: Client,
    endpoint: String,
}

impl RedisDriver {
    pub fn new(options: &StoreOptions) -> Result<Self, StoreError> {
        let client = Client::open(options.url()).map_err(StoreError::connection)?;
        Ok(Self {
            client,
            endpoint: options.redacted_url(),
        })
    }
}

#[async_trait]
impl StoreDriver for RedisDriver {
    type Connection = RedisConnection;

    async fn connect(&self) -> Result<RedisConnection, StoreError> {
        let connection = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(classify)?;
        Ok(RedisConnection(connection))
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

pub struct RedisConnection(MultiplexedConnection);

#[async_trait]
impl HashConnection for RedisConnection {
    async fn hset(&mut self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.0
            .hset::<_, _, _, ()>(key, field, value)
            .await
            .map_err(classify)
    }

    async fn hget(&mut self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.0.hget(key, field).await.map_err(classify)
    }

    async fn hgetall(&mut self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.0.hgetall(key).await.map_err(classify)
    }

    async fn ping(&mut self) -> Result<(), StoreError> {
        redis::cmd("PING")
            .query_async::<_, ()>(&mut self.0)
            .await
            .map_err(classify)
    }

    async fn quit(mut self) -> Result<(), StoreError> {
        redis::cmd("QUIT")
            .query_async::<_, ()>(&mut self.0)
            .await
            .map_err(classify)
    }
}
