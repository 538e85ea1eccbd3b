// ==============================================================================
// lineage.rs - Stage Names and Lineage Tokens
// ==============================================================================
// Description: Structured identity of a dispatched task. A lineage is the run
//              id followed by one segment per dispatch hop; it is rendered to
//              a string only at the bus and blob-store boundary.
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================
//
// Rendered form:
//
//   <run_id>/<seg>/<seg>...
//   seg = [<suffix>_]<counter>_<stage>[<resume>]
//
// `counter` is the per-(parent, suffix, stage) dispatch index allocated by the
// parent invocation. `resume` counts self re-dispatches of the same logical
// task and is omitted while zero, so `run/0_split` resumes as `run/0_split1`,
// then `run/0_split2`.
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{PipelineError, Result};

/// Validated stage identifier
///
/// ASCII letters, digits and `-`; starts with a letter and does not end with
/// a digit, which keeps the trailing resume index unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StageName(String);

impl StageName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let valid = name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
            && !name.chars().last().is_some_and(|c| c.is_ascii_digit())
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if valid {
            Ok(Self(name))
        } else {
            Err(PipelineError::InvalidStage(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StageName {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<StageName> for String {
    fn from(value: StageName) -> Self {
        value.0
    }
}

impl FromStr for StageName {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// One dispatch hop
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Segment {
    pub suffix: Option<String>,
    pub counter: u32,
    pub stage: StageName,
    pub resume: u32,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(suffix) = &self.suffix {
            write!(f, "{}_", suffix)?;
        }
        write!(f, "{}_{}", self.counter, self.stage)?;
        if self.resume > 0 {
            write!(f, "{}", self.resume)?;
        }
        Ok(())
    }
}

impl FromStr for Segment {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || PipelineError::InvalidLineage(format!("bad segment '{}'", s));

        let digits_start = s.trim_end_matches(|c: char| c.is_ascii_digit()).len();
        let (head, resume) = s.split_at(digits_start);
        let resume = if resume.is_empty() {
            0
        } else {
            resume.parse().map_err(|_| invalid())?
        };

        let (head, stage) = head.rsplit_once('_').ok_or_else(invalid)?;
        let stage = StageName::new(stage).map_err(|_| invalid())?;

        let (suffix, counter) = match head.rsplit_once('_') {
            Some((suffix, counter)) => (Some(suffix.to_string()), counter),
            None => (None, head),
        };
        let counter = counter.parse().map_err(|_| invalid())?;

        Ok(Self {
            suffix,
            counter,
            stage,
            resume,
        })
    }
}

/// Caller-owned dispatch counter
///
/// Tracks, per invocation, how many children have been dispatched for each
/// (suffix, stage) pair so sibling lineages never collide.
#[derive(Debug, Default, Clone)]
pub struct DispatchCounter {
    counts: HashMap<(Option<String>, StageName), u32>,
}

impl DispatchCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the next index for `(suffix, stage)` and advance it
    pub fn next(&mut self, suffix: Option<&str>, stage: &StageName) -> u32 {
        let slot = self
            .counts
            .entry((suffix.map(str::to_string), stage.clone()))
            .or_insert(0);
        let index = *slot;
        *slot += 1;
        index
    }
}

/// Position of a task in its run's dispatch tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Lineage {
    run_id: String,
    segments: Vec<Segment>,
}

impl Lineage {
    /// Lineage of the ingress request that starts a run
    pub fn root(run_id: impl Into<String>) -> Result<Self> {
        let run_id = run_id.into();
        if run_id.is_empty() || run_id.contains('/') || run_id.chars().any(char::is_whitespace) {
            return Err(PipelineError::InvalidLineage(format!("bad run id '{}'", run_id)));
        }
        Ok(Self {
            run_id,
            segments: Vec::new(),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Stage of the task this lineage identifies
    pub fn stage(&self) -> Option<&StageName> {
        self.segments.last().map(|s| &s.stage)
    }

    /// How many times this task has re-dispatched itself
    pub fn resume_index(&self) -> u32 {
        self.segments.last().map_or(0, |s| s.resume)
    }

    /// Allocate the lineage of a child task dispatched to `stage`
    pub fn child(
        &self,
        stage: &StageName,
        suffix: Option<&str>,
        counter: &mut DispatchCounter,
    ) -> Result<Self> {
        if let Some(suffix) = suffix {
            if suffix.is_empty() || suffix.contains('/') {
                return Err(PipelineError::InvalidLineage(format!("bad suffix '{}'", suffix)));
            }
        }
        let mut segments = self.segments.clone();
        segments.push(Segment {
            suffix: suffix.map(str::to_string),
            counter: counter.next(suffix, stage),
            stage: stage.clone(),
            resume: 0,
        });
        Ok(Self {
            run_id: self.run_id.clone(),
            segments,
        })
    }

    /// The same logical task, one self re-dispatch further along
    pub fn resumed(&self) -> Result<Self> {
        let mut next = self.clone();
        let last = next.segments.last_mut().ok_or_else(|| {
            PipelineError::InvalidLineage(format!("root lineage {} cannot resume", self.run_id))
        })?;
        last.resume += 1;
        Ok(next)
    }

    /// Prefix shared by every descendant of this task
    pub fn descendant_prefix(&self) -> String {
        format!("{}/", self)
    }
}

impl fmt::Display for Lineage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.run_id)?;
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for Lineage {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('/');
        let run_id = parts.next().unwrap_or_default();
        let mut lineage = Self::root(run_id)?;
        for part in parts {
            lineage.segments.push(part.parse()?);
        }
        Ok(lineage)
    }
}

impl TryFrom<String> for Lineage {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Lineage> for String {
    fn from(value: Lineage) -> Self {
        value.to_string()
    }
}
