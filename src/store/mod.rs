//! Store (C2): route table, processed-set, and ack-status, each with a
//! TTL, behind one narrow trait so the memory and Redis backends are
//! interchangeable to the hub.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// Capability set a route/dedup/ack backend must provide. All operations
/// are fallible only for genuine backend failures — "key not found" is
/// never an error, it is an empty/false result (§4.1).
#[async_trait]
pub trait Store: Send + Sync {
    async fn set_route(&self, target_id: &str, sdk_url: &str) -> Result<(), StoreError>;

    /// Returns the empty string when no route is stored or it has expired.
    async fn get_route(&self, target_id: &str) -> Result<String, StoreError>;

    async fn is_processed(&self, msg_id: &str) -> Result<bool, StoreError>;

    async fn mark_processed(&self, msg_id: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn set_ack_status(
        &self,
        msg_id: &str,
        status: &str,
        ttl: Duration,
    ) -> Result<(), StoreError>;
}

/// Default TTL applied to routes, processed entries, and ack-status
/// writes unless a call site overrides it.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
