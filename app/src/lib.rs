// ==============================================================================
// lib.rs - Annotation Pipeline Core
// ==============================================================================
// Description: Orchestration primitives for the serverless annotation
//              pipeline: dispatch with liveness tracking, checkpoint/resume,
//              join barrier, reduce-tree merge and position indexing
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

pub mod bus;
pub mod config;
pub mod deadline;
pub mod envelope;
pub mod error;
pub mod fragments;
pub mod index;
pub mod ingress;
pub mod jobs;
pub mod lineage;
pub mod liveness;
pub mod logging;
pub mod maintenance;
pub mod orchestrator;
pub mod paths;
pub mod reclaim;
pub mod results;
pub mod runtime;
pub mod stages;
pub mod storage;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use ingress::start_run;
pub use orchestrator::{DispatchOptions, Orchestrator, Progress, Services};
pub use runtime::{run_invocation, LocalRuntime, Outcome, StageHandler, StageRegistry};
