// ==============================================================================
// results.rs - Results Query
// ==============================================================================
// Description: Random access into a finished run's merged result by page or
//              genomic position, with whole-content and read-handle fallbacks
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use serde::Serialize;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::index::{PageEntry, PositionIndex};
use crate::paths;
use crate::storage::{BlobStore, ReadHandle};

/// Which page of a chromosome to return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    Page(usize),
    Position(u64),
}

impl Default for Selector {
    fn default() -> Self {
        Selector::Page(1)
    }
}

#[derive(Debug, Clone)]
pub struct ResultQuery {
    pub project: String,
    pub run_id: String,
    /// Defaults to the first indexed chromosome
    pub chromosome: Option<String>,
    pub selector: Selector,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageCount {
    pub chromosome: String,
    pub pages: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultView {
    /// Small result returned in full
    Whole { content: String },
    /// One indexed page
    Page {
        chromosome: String,
        page: usize,
        pages: Vec<PageCount>,
        byte_start: u64,
        byte_end: u64,
        content: String,
    },
    /// No index: read the raw result directly
    Handle { handle: ReadHandle },
}

/// Answer a results query against the `results` store
pub async fn query_results(
    store: &dyn BlobStore,
    config: &PipelineConfig,
    query: &ResultQuery,
) -> Result<ResultView> {
    let result_key = paths::result_key(&query.project, &query.run_id, &config.result_suffix);
    let meta = store
        .head(&result_key)
        .await?
        .ok_or_else(|| PipelineError::NotFound(result_key.clone()))?;

    if meta.size < config.inline_result_limit {
        debug!("Returning {} whole ({} bytes)", result_key, meta.size);
        let content = store.get(&result_key).await?;
        return Ok(ResultView::Whole {
            content: String::from_utf8_lossy(&content).into_owned(),
        });
    }

    let index = match store.get(&paths::index_key(&result_key)).await {
        Ok(bytes) => PositionIndex::from_gzip_json(&bytes)?,
        Err(PipelineError::NotFound(_)) => {
            debug!("No index for {}, returning read handle", result_key);
            let handle = store.read_handle(&result_key, config.result_url_ttl).await?;
            return Ok(ResultView::Handle { handle });
        }
        Err(e) => return Err(e),
    };

    let chromosome = match &query.chromosome {
        Some(c) if index.contains(c) => c.clone(),
        Some(_) => return Err(PipelineError::InvalidRequest("Invalid chromosome.".to_string())),
        None => index
            .first_chromosome()
            .map(str::to_string)
            .ok_or_else(|| PipelineError::InvalidRequest("Result has no indexed records.".to_string()))?,
    };

    let entry = select_page(&index, &chromosome, query.selector)?;
    let content = store.get_range(&result_key, entry.byte_range()).await?;

    Ok(ResultView::Page {
        pages: index
            .page_counts()
            .into_iter()
            .map(|(chromosome, pages)| PageCount { chromosome, pages })
            .collect(),
        chromosome,
        page: entry.page,
        byte_start: entry.page_start_f,
        byte_end: entry.page_end_f,
        content: String::from_utf8_lossy(&content).into_owned(),
    })
}

/// Resolve a selector; a position outside every page serves the last page
pub fn select_page(index: &PositionIndex, chromosome: &str, selector: Selector) -> Result<PageEntry> {
    let entry = match selector {
        Selector::Page(n) => index.page(chromosome, n).ok_or_else(|| {
            PipelineError::InvalidRequest(format!("Page {} does not exist for {}", n, chromosome))
        })?,
        Selector::Position(p) => index
            .search(chromosome, p)
            .or_else(|| index.last_page(chromosome))
            .ok_or_else(|| PipelineError::InvalidRequest("Invalid chromosome.".to_string()))?,
    };
    Ok(entry)
}
