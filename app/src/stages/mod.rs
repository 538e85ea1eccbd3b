// ==============================================================================
// stages/mod.rs - Built-in Pipeline Stages
// ==============================================================================
// Description: Fan-out, branch output, join barrier, reduce-tree merge and
//              finalization handlers. Annotation stages are external and
//              publish their rows to `format`.
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::lineage::StageName;
use crate::runtime::StageRegistry;

pub mod barrier;
pub mod finalize;
pub mod format;
pub mod merge;
pub mod split;

pub use barrier::{JoinStage, JoinTask};
pub use finalize::{FinalizeStage, FinalizeTask};
pub use format::{FormatStage, FormatTask};
pub use merge::{ConcatStage, ConcatTask, MergeStage, MergeTask};
pub use split::{SplitStage, SplitTask};

pub const SPLIT: &str = "split";
pub const FORMAT: &str = "format";
pub const JOIN: &str = "join";
pub const CONCAT: &str = "concat";
pub const MERGE: &str = "merge";
pub const FINALIZE: &str = "finalize";

pub fn stage_name(name: &str) -> Result<StageName> {
    StageName::new(name)
}

/// Registry holding every built-in stage
pub fn standard_registry(config: &PipelineConfig) -> Result<StageRegistry> {
    let mut registry = StageRegistry::new();
    registry
        .register(
            stage_name(SPLIT)?,
            Arc::new(SplitStage::new(stage_name(&config.split_target_stage)?)),
        )
        .register(stage_name(FORMAT)?, Arc::new(FormatStage))
        .register(stage_name(JOIN)?, Arc::new(JoinStage))
        .register(stage_name(CONCAT)?, Arc::new(ConcatStage))
        .register(stage_name(MERGE)?, Arc::new(MergeStage))
        .register(stage_name(FINALIZE)?, Arc::new(FinalizeStage));
    Ok(registry)
}
