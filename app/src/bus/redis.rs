// ==============================================================================
// bus/redis.rs - Redis Message Bus
// ==============================================================================
// Description: One Redis list per stage. Publishers LPUSH, workers BRPOP, which
//              gives FIFO delivery per stage and none across stages.
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use super::MessageBus;
use crate::error::Result;
use crate::lineage::StageName;

const STAGE_KEY_PREFIX: &str = "annotation:stage:";

/// Redis list key backing a stage topic
pub fn stage_key(stage: &StageName) -> String {
    format!("{}{}", STAGE_KEY_PREFIX, stage)
}

/// Stage name from a Redis list key, if it is a stage topic
pub fn stage_from_key(key: &str) -> Option<StageName> {
    key.strip_prefix(STAGE_KEY_PREFIX)
        .and_then(|name| StageName::new(name).ok())
}

/// Publisher side of the Redis bus
#[derive(Clone)]
pub struct RedisBus {
    conn: ConnectionManager,
}

impl RedisBus {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Messages waiting on a stage topic
    pub async fn depth(&self, stage: &StageName) -> Result<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn.llen(stage_key(stage)).await?;
        Ok(len)
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, stage: &StageName, body: String) -> Result<()> {
        let mut conn = self.conn.clone();
        let len = body.len();
        conn.lpush::<_, _, ()>(stage_key(stage), body).await?;
        debug!("Published {} bytes to {}", len, stage);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_key_round_trip() {
        let stage = StageName::new("merge").unwrap();
        let key = stage_key(&stage);
        assert_eq!(key, "annotation:stage:merge");
        assert_eq!(stage_from_key(&key), Some(stage));
        assert_eq!(stage_from_key("annotation:progress:run-1"), None);
    }
}
