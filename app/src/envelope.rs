// ==============================================================================
// envelope.rs - Task Envelope
// ==============================================================================
// Description: Message carried over the bus between invocations, with
//              transparent blob-store indirection for oversized payloads
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::lineage::Lineage;
use crate::logging::{truncate_middle, MAX_LOG_LENGTH};
use crate::paths;
use crate::storage::BlobStore;

/// Envelope keys owned by the dispatcher. Payload objects may not use them.
pub const RESERVED_FIELDS: [&str; 4] = ["run_id", "lineage", "tracked", "blob_ref"];

/// Bus message for one task invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub run_id: String,
    /// Position in the dispatch tree; doubles as the liveness-marker key
    pub lineage: Lineage,
    /// Whether a liveness marker was created for this task
    pub tracked: bool,
    #[serde(default)]
    pub payload: Value,
    /// Temp-store key holding the payload when it was too large for the bus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_ref: Option<String>,
}

impl TaskEnvelope {
    pub fn new(lineage: Lineage, tracked: bool, payload: Value) -> Self {
        Self {
            run_id: lineage.run_id().to_string(),
            lineage,
            tracked,
            payload,
            blob_ref: None,
        }
    }

    /// Serialize for the bus, moving the payload to `temp` if the message
    /// would exceed `limit` bytes
    pub async fn encode(&self, temp: &dyn BlobStore, limit: usize) -> Result<String> {
        let body = serde_json::to_string(self)?;
        if body.len() <= limit {
            return Ok(body);
        }

        let key = paths::payload_key(&self.lineage);
        info!(
            "Envelope for {} too large ({} bytes), offloading payload to {}",
            self.lineage,
            body.len(),
            key
        );
        temp.put(&key, serde_json::to_vec(&self.payload)?).await?;

        let reference = TaskEnvelope {
            run_id: self.run_id.clone(),
            lineage: self.lineage.clone(),
            tracked: self.tracked,
            payload: Value::Null,
            blob_ref: Some(key),
        };
        Ok(serde_json::to_string(&reference)?)
    }

    /// Parse a bus message, loading an offloaded payload from `temp`
    pub async fn decode(body: &str, temp: &dyn BlobStore) -> Result<Self> {
        debug!("Envelope received: {}", truncate_middle(body, MAX_LOG_LENGTH));
        let mut envelope: TaskEnvelope = serde_json::from_str(body)?;

        if envelope.run_id != envelope.lineage.run_id() {
            return Err(PipelineError::InvalidLineage(format!(
                "lineage {} does not belong to run {}",
                envelope.lineage, envelope.run_id
            )));
        }

        if let Some(key) = &envelope.blob_ref {
            debug!("Loading offloaded payload from {}", key);
            let bytes = temp.get(key).await?;
            envelope.payload = serde_json::from_slice(&bytes)?;
        }
        Ok(envelope)
    }
}

/// Reject payload objects that try to set dispatcher-owned fields
pub fn check_reserved(payload: &Value) -> Result<()> {
    if let Value::Object(map) = payload {
        if let Some(field) = RESERVED_FIELDS.iter().find(|f| map.contains_key(**f)) {
            return Err(PipelineError::InvalidPayload(format!(
                "field '{}' is set by the orchestrator",
                field
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlobStore;
    use serde_json::json;

    fn lineage() -> Lineage {
        "run-1/0_split/4_annotate".parse().unwrap()
    }

    #[tokio::test]
    async fn test_small_payload_stays_inline() {
        let temp = MemoryBlobStore::new();
        let envelope = TaskEnvelope::new(lineage(), true, json!({"region": "chr1:1-200"}));

        let body = envelope.encode(&temp, 1024).await.unwrap();
        assert!(temp.is_empty());
        assert!(!body.contains("blob_ref"));
        assert_eq!(TaskEnvelope::decode(&body, &temp).await.unwrap(), envelope);
    }

    #[tokio::test]
    async fn test_oversized_payload_is_offloaded() {
        let temp = MemoryBlobStore::new();
        let rows: Vec<String> = (0..200).map(|i| format!("row-{}", i)).collect();
        let envelope = TaskEnvelope::new(lineage(), false, json!({ "rows": rows }));

        let body = envelope.encode(&temp, 256).await.unwrap();
        assert!(body.len() < 256);
        assert_eq!(temp.len(), 1);

        let decoded = TaskEnvelope::decode(&body, &temp).await.unwrap();
        assert_eq!(decoded.payload, envelope.payload);
        assert_eq!(decoded.blob_ref, Some(paths::payload_key(&lineage())));
        assert!(!decoded.tracked);
    }

    #[tokio::test]
    async fn test_decode_rejects_mismatched_run() {
        let temp = MemoryBlobStore::new();
        let body = r#"{"run_id":"run-2","lineage":"run-1/0_join","tracked":false,"payload":null}"#;
        assert!(matches!(
            TaskEnvelope::decode(body, &temp).await,
            Err(PipelineError::InvalidLineage(_))
        ));
    }

    #[test]
    fn test_reserved_fields() {
        assert!(check_reserved(&json!({"units": []})).is_ok());
        assert!(check_reserved(&json!(["run_id"])).is_ok());
        assert!(matches!(
            check_reserved(&json!({"lineage": "x"})),
            Err(PipelineError::InvalidPayload(_))
        ));
    }
}
