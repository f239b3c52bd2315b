//! Redis entity store backend.
//!
//! Each row is a hash at `TABLE|key`. Surrogate ids come from `INCR TABLE_SEQ`.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

use super::{sort_rows, EntityStore};
use crate::error::{FabricError, FabricResult};
use crate::fields::{FieldValues, FieldValuesExt, Filter};
use crate::tables::TABLE_KEY_SEPARATOR;

/// Configuration for the Redis connection.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis server hostname or IP
    pub host: String,
    /// Redis server port
    pub port: u16,
    /// Database number
    pub db: u32,
}

impl RedisConfig {
    pub fn new(host: impl Into<String>, port: u16, db: u32) -> Self {
        Self {
            host: host.into(),
            port,
            db,
        }
    }

    /// Returns the Redis connection URI.
    pub fn uri(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

/// Entity store backed by a Redis database.
pub struct RedisStore {
    config: RedisConfig,
    connection: ConnectionManager,
}

fn row_key(table: &str, key: &str) -> String {
    format!("{}{}{}", table, TABLE_KEY_SEPARATOR, key)
}

fn seq_key(table: &str) -> String {
    format!("{}_SEQ", table)
}

impl RedisStore {
    /// Connects to Redis.
    pub async fn connect(config: RedisConfig) -> FabricResult<Self> {
        let uri = config.uri();

        let client = redis::Client::open(uri.clone())
            .map_err(|e| FabricError::connect(&uri, e.to_string()))?;

        let connection = client
            .get_connection_manager()
            .await
            .map_err(|e| FabricError::connect(&uri, format!("connection manager: {}", e)))?;

        info!(host = %config.host, db = config.db, "Connected to Redis entity store");

        Ok(Self { config, connection })
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    async fn read_rows(&self, table: &str) -> FabricResult<Vec<(String, FieldValues)>> {
        let mut conn = self.connection.clone();
        let pattern = row_key(table, "*");
        let keys: Vec<String> = conn
            .keys(&pattern)
            .await
            .map_err(|e| FabricError::store("keys", e.to_string()))?;

        let mut rows = Vec::with_capacity(keys.len());
        for full_key in keys {
            let fvs: HashMap<String, String> = conn
                .hgetall(&full_key)
                .await
                .map_err(|e| FabricError::store("hgetall", e.to_string()))?;
            let key = full_key
                .split_once(TABLE_KEY_SEPARATOR)
                .map(|(_, k)| k.to_string())
                .unwrap_or_default();
            rows.push((key, fvs.into_iter().collect()));
        }
        Ok(rows)
    }
}

#[async_trait]
impl EntityStore for RedisStore {
    async fn insert(
        &self,
        table: &str,
        key: Option<&str>,
        fields: FieldValues,
    ) -> FabricResult<String> {
        let mut conn = self.connection.clone();
        let key = match key {
            Some(key) => key.to_string(),
            None => {
                let id: u64 = conn
                    .incr(seq_key(table), 1)
                    .await
                    .map_err(|e| FabricError::store("incr", e.to_string()))?;
                id.to_string()
            }
        };

        let full_key = row_key(table, &key);
        let _: () = conn
            .del(&full_key)
            .await
            .map_err(|e| FabricError::store("del", e.to_string()))?;
        let _: () = conn
            .hset_multiple(&full_key, fields.as_slice())
            .await
            .map_err(|e| FabricError::store("hset", e.to_string()))?;

        debug!(key = %full_key, "Inserted row");
        Ok(key)
    }

    async fn get(&self, table: &str, key: &str) -> FabricResult<Option<FieldValues>> {
        let mut conn = self.connection.clone();
        let fvs: HashMap<String, String> = conn
            .hgetall(row_key(table, key))
            .await
            .map_err(|e| FabricError::store("hgetall", e.to_string()))?;
        if fvs.is_empty() {
            Ok(None)
        } else {
            Ok(Some(fvs.into_iter().collect()))
        }
    }

    async fn find(&self, table: &str, filter: &Filter) -> FabricResult<Vec<(String, FieldValues)>> {
        let mut rows: Vec<_> = self
            .read_rows(table)
            .await?
            .into_iter()
            .filter(|(_, fields)| fields.matches(filter))
            .collect();
        sort_rows(&mut rows);
        Ok(rows)
    }

    async fn delete(&self, table: &str, filter: &Filter) -> FabricResult<u64> {
        let rows = self.find(table, filter).await?;
        if rows.is_empty() {
            return Ok(0);
        }
        let keys: Vec<String> = rows.iter().map(|(k, _)| row_key(table, k)).collect();
        let mut conn = self.connection.clone();
        let removed: u64 = conn
            .del(&keys)
            .await
            .map_err(|e| FabricError::store("del", e.to_string()))?;
        Ok(removed)
    }

    async fn update_all(
        &self,
        table: &str,
        filter: &Filter,
        fields: &FieldValues,
    ) -> FabricResult<u64> {
        let rows = self.find(table, filter).await?;
        if fields.is_empty() {
            return Ok(rows.len() as u64);
        }
        let mut conn = self.connection.clone();
        for (key, _) in &rows {
            let _: () = conn
                .hset_multiple(row_key(table, key), fields.as_slice())
                .await
                .map_err(|e| FabricError::store("hset", e.to_string()))?;
        }
        Ok(rows.len() as u64)
    }

    async fn ping(&self) -> FabricResult<()> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| FabricError::store("ping", e.to_string()))?;
        Ok(())
    }
}
