// ==============================================================================
// bus/memory.rs - In-Memory Message Bus
// ==============================================================================
// Description: FIFO bus with publish history, drained by the local runtime
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::MessageBus;
use crate::error::{PipelineError, Result};
use crate::lineage::StageName;

/// A published message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub stage: StageName,
    pub body: String,
}

#[derive(Debug, Default)]
struct BusState {
    queue: VecDeque<Delivery>,
    history: Vec<Delivery>,
}

/// In-memory bus for tests and single-process runs
#[derive(Debug, Default)]
pub struct MemoryBus {
    state: Mutex<BusState>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the oldest undelivered message
    pub fn pop(&self) -> Option<Delivery> {
        self.state.lock().ok()?.queue.pop_front()
    }

    /// Messages published but not yet taken
    pub fn pending(&self) -> usize {
        self.state.lock().map(|s| s.queue.len()).unwrap_or(0)
    }

    /// Every message ever published to `stage`
    pub fn published(&self, stage: &str) -> Vec<Delivery> {
        self.state
            .lock()
            .map(|s| {
                s.history
                    .iter()
                    .filter(|d| d.stage.as_str() == stage)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn total_published(&self) -> usize {
        self.state.lock().map(|s| s.history.len()).unwrap_or(0)
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, stage: &StageName, body: String) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| PipelineError::Bus("bus lock poisoned".to_string()))?;
        let delivery = Delivery {
            stage: stage.clone(),
            body,
        };
        state.history.push(delivery.clone());
        state.queue.push_back(delivery);
        Ok(())
    }
}
