// ==============================================================================
// format.rs - Branch Output Writer
// ==============================================================================
// Description: Writes annotated rows as a TSV fragment named after the
//              task's lineage so concat can order branch outputs
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::Result;
use crate::orchestrator::Orchestrator;
use crate::paths;
use crate::runtime::StageHandler;
use crate::storage::BlobStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatTask {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

impl FormatTask {
    pub fn to_tsv(&self) -> String {
        let mut out = String::new();
        for row in &self.rows {
            let cells: Vec<String> = self.columns.iter().map(|c| cell(row.get(c))).collect();
            out.push_str(&cells.join("\t"));
            out.push('\n');
        }
        out
    }
}

fn cell(value: Option<&Value>) -> String {
    let text = match value {
        None | Some(Value::Null) => return "-".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    text.replace(['\t', '\n', '\r'], " ")
}

pub struct FormatStage;

#[async_trait]
impl StageHandler for FormatStage {
    async fn handle(&self, orc: &mut Orchestrator) -> Result<()> {
        let task: FormatTask = orc.parse_payload()?;
        let key = paths::branch_key(orc.lineage());
        debug!("Writing {} row(s) to {}", task.rows.len(), key);
        orc.services().regions.put(&key, task.to_tsv().into_bytes()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rows_follow_column_order() {
        let task: FormatTask = serde_json::from_value(json!({
            "columns": ["rsId", "type", "region", "af"],
            "rows": [
                {"region": "1:10-10", "rsId": "rs1", "type": "SNV", "af": 0.25},
                {"region": "1:20-20", "rsId": "rs2", "type": "a\tb"},
            ]
        }))
        .unwrap();

        assert_eq!(
            task.to_tsv(),
            "rs1\tSNV\t1:10-10\t0.25\nrs2\ta b\t1:20-20\t-\n"
        );
    }
}
