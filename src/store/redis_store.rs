use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};

use crate::error::StoreError;

use super::Store;

/// Redis-backed `Store`. Keys follow the frozen `route:<id>`,
/// `processed:<id>`, `ack:<id>` prefixes (§6); every write carries its
/// own TTL, and a missing key is translated to an empty/false read
/// rather than propagated as an error.
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(addr: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(addr)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    fn route_key(target_id: &str) -> String {
        format!("route:{target_id}")
    }

    fn processed_key(msg_id: &str) -> String {
        format!("processed:{msg_id}")
    }

    fn ack_key(msg_id: &str) -> String {
        format!("ack:{msg_id}")
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn set_route(&self, target_id: &str, sdk_url: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let ttl = super::DEFAULT_TTL.as_secs();
        conn.set_ex::<_, _, ()>(Self::route_key(target_id), sdk_url, ttl)
            .await?;
        Ok(())
    }

    async fn get_route(&self, target_id: &str) -> Result<String, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(Self::route_key(target_id)).await?;
        Ok(value.unwrap_or_default())
    }

    async fn is_processed(&self, msg_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.exists(Self::processed_key(msg_id)).await?;
        Ok(count > 0)
    }

    async fn mark_processed(&self, msg_id: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(Self::processed_key(msg_id), "1", ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn set_ack_status(
        &self,
        msg_id: &str,
        status: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(Self::ack_key(msg_id), status, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }
}
