// ==============================================================================
// bus/mod.rs - Message Bus Abstraction
// ==============================================================================
// Description: Publishing serialized Task Envelopes to stage topics, the only
//              inter-task RPC mechanism
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use async_trait::async_trait;

use crate::error::Result;
use crate::lineage::StageName;

pub mod memory;
pub mod redis;

pub use memory::{Delivery, MemoryBus};
pub use self::redis::{stage_from_key, stage_key, RedisBus};

/// Stage-addressed message bus
///
/// Delivery order between messages is not guaranteed and publishing never
/// waits for the receiving stage to run.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    async fn publish(&self, stage: &StageName, body: String) -> Result<()>;
}
