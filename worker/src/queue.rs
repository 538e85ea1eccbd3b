// ==============================================================================
// queue.rs - Redis Stage Queues (Worker Side)
// ==============================================================================
// Description: Consumes Task Envelopes from the per-stage Redis lists and
//              publishes invocation outcomes for watchers
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;

use annotation_pipeline::bus::{stage_from_key, stage_key};
use annotation_pipeline::lineage::StageName;
use annotation_pipeline::Outcome;

/// Blocking-pop timeout in seconds
const POP_TIMEOUT_SECS: f64 = 1.0;

/// One message taken off a stage list
#[derive(Debug)]
pub struct Delivery {
    pub stage: StageName,
    pub body: String,
}

/// Outcome notice published on `annotation:progress:<run_id>`
#[derive(Debug, Serialize)]
pub struct OutcomeNotice<'a> {
    pub stage: &'a str,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'a str>,
}

impl<'a> OutcomeNotice<'a> {
    pub fn new(stage: &'a StageName, outcome: &'a Outcome) -> Self {
        let (label, message) = match outcome {
            Outcome::Completed { resent: false } => ("completed", None),
            Outcome::Completed { resent: true } => ("resumed", None),
            Outcome::Aborted => ("aborted", None),
            Outcome::Failed { message, .. } => ("failed", Some(message.as_str())),
        };
        Self {
            stage: stage.as_str(),
            outcome: label,
            message,
        }
    }
}

pub fn progress_channel(run_id: &str) -> String {
    format!("annotation:progress:{}", run_id)
}

/// Consumer over the lists of every stage this worker serves
pub struct StageQueue {
    conn: ConnectionManager,
    keys: Vec<String>,
}

impl StageQueue {
    pub fn new(conn: ConnectionManager, stages: &[StageName]) -> Self {
        Self {
            conn,
            keys: stages.iter().map(stage_key).collect(),
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Pop the next envelope from any served stage (blocking with timeout)
    ///
    /// Redis checks the keys in order, so earlier stages are drained first
    /// when several have messages waiting.
    pub async fn dequeue(&mut self) -> Result<Option<Delivery>> {
        let result: Option<(String, String)> = self
            .conn
            .brpop(&self.keys, POP_TIMEOUT_SECS)
            .await
            .context("Failed to pop from stage queues")?;

        match result {
            Some((key, body)) => {
                let stage = stage_from_key(&key)
                    .with_context(|| format!("Message popped from unknown key {}", key))?;
                Ok(Some(Delivery { stage, body }))
            }
            None => Ok(None),
        }
    }

    /// Publish an invocation outcome to the run's progress channel
    pub async fn publish_outcome(
        &mut self,
        run_id: &str,
        stage: &StageName,
        outcome: &Outcome,
    ) -> Result<()> {
        let message = serde_json::to_string(&OutcomeNotice::new(stage, outcome))?;
        self.conn
            .publish::<_, _, ()>(progress_channel(run_id), message)
            .await
            .context("Failed to publish outcome")?;
        Ok(())
    }
}
