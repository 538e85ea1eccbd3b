// ==============================================================================
// index.rs - Position Index
// ==============================================================================
// Description: Per-chromosome page table over a merged result, mapping genomic
//              positions and page numbers to byte ranges
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================
//
// Records are tab-separated with `chromosome:start-end` in the third field.
// A page closes when it reaches the record or byte limit, or when the
// chromosome changes, so no page spans two chromosomes.
// ==============================================================================

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Read, Write};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::storage::{BlobStore, ChunkReader, READ_CHUNK_BYTES};

/// Parallel page arrays for one chromosome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChromosomePages {
    pub chromosome: String,
    pub page_start_f: Vec<u64>,
    pub page_end_f: Vec<u64>,
    pub chromosome_start: Vec<u64>,
    pub chromosome_end: Vec<u64>,
}

impl ChromosomePages {
    fn new(chromosome: String) -> Self {
        Self {
            chromosome,
            page_start_f: Vec::new(),
            page_end_f: Vec::new(),
            chromosome_start: Vec::new(),
            chromosome_end: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.page_start_f.len()
    }

    pub fn is_empty(&self) -> bool {
        self.page_start_f.is_empty()
    }

    fn entry(&self, idx: usize) -> PageEntry {
        PageEntry {
            page: idx + 1,
            page_start_f: self.page_start_f[idx],
            page_end_f: self.page_end_f[idx],
            chromosome_start: self.chromosome_start[idx],
            chromosome_end: self.chromosome_end[idx],
        }
    }
}

/// One page of one chromosome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageEntry {
    /// 1-based page number within the chromosome
    pub page: usize,
    pub page_start_f: u64,
    pub page_end_f: u64,
    pub chromosome_start: u64,
    pub chromosome_end: u64,
}

impl PageEntry {
    pub fn byte_range(&self) -> std::ops::Range<u64> {
        self.page_start_f..self.page_end_f
    }
}

/// Immutable index over a merged result, chromosomes in file order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionIndex {
    chromosomes: Vec<ChromosomePages>,
}

impl PositionIndex {
    /// Index a record stream in a single sequential pass
    pub fn build<R: BufRead>(mut reader: R, page_records: usize, page_bytes: usize) -> Result<Self> {
        let mut builder = IndexBuilder::new(page_records, page_bytes);
        let mut line = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            builder.push_line(&line)?;
        }
        Ok(builder.finish())
    }

    /// Index a stored object without holding it in memory
    pub async fn build_from_store(
        store: &dyn BlobStore,
        key: &str,
        page_records: usize,
        page_bytes: usize,
    ) -> Result<Self> {
        Self::build_chunked(store, key, READ_CHUNK_BYTES, page_records, page_bytes).await
    }

    async fn build_chunked(
        store: &dyn BlobStore,
        key: &str,
        chunk: u64,
        page_records: usize,
        page_bytes: usize,
    ) -> Result<Self> {
        let mut reader = ChunkReader::open(store, key, chunk).await?;
        let mut builder = IndexBuilder::new(page_records, page_bytes);
        // partial line carried into the next chunk
        let mut carry = Vec::new();

        while let Some(bytes) = reader.next_chunk().await? {
            carry.extend_from_slice(&bytes);
            let mut consumed = 0;
            while let Some(nl) = carry[consumed..].iter().position(|b| *b == b'\n') {
                let end = consumed + nl + 1;
                builder.push_line(&carry[consumed..end])?;
                consumed = end;
            }
            carry.drain(..consumed);
        }
        if !carry.is_empty() {
            builder.push_line(&carry)?;
        }
        Ok(builder.finish())
    }

    pub fn chromosomes(&self) -> impl Iterator<Item = &str> {
        self.chromosomes.iter().map(|c| c.chromosome.as_str())
    }

    pub fn first_chromosome(&self) -> Option<&str> {
        self.chromosomes.first().map(|c| c.chromosome.as_str())
    }

    pub fn contains(&self, chromosome: &str) -> bool {
        self.pages_for(chromosome).is_some()
    }

    pub fn pages_for(&self, chromosome: &str) -> Option<&ChromosomePages> {
        self.chromosomes.iter().find(|c| c.chromosome == chromosome)
    }

    /// Page count per chromosome, in file order
    pub fn page_counts(&self) -> Vec<(String, usize)> {
        self.chromosomes
            .iter()
            .map(|c| (c.chromosome.clone(), c.len()))
            .collect()
    }

    /// Direct access by 1-based page number
    pub fn page(&self, chromosome: &str, page: usize) -> Option<PageEntry> {
        let pages = self.pages_for(chromosome)?;
        (page >= 1 && page <= pages.len()).then(|| pages.entry(page - 1))
    }

    pub fn last_page(&self, chromosome: &str) -> Option<PageEntry> {
        let pages = self.pages_for(chromosome)?;
        pages.len().checked_sub(1).map(|idx| pages.entry(idx))
    }

    /// Page covering `position`, or `None` when it falls between or beyond
    /// the indexed pages
    pub fn search(&self, chromosome: &str, position: u64) -> Option<PageEntry> {
        let pages = self.pages_for(chromosome)?;
        let idx = pages.chromosome_start.partition_point(|&start| start <= position);
        let idx = idx.checked_sub(1)?;
        (position <= pages.chromosome_end[idx]).then(|| pages.entry(idx))
    }

    pub fn to_gzip_json(&self) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&serde_json::to_vec(self)?)?;
        Ok(encoder.finish()?)
    }

    pub fn from_gzip_json(bytes: &[u8]) -> Result<Self> {
        let mut json = Vec::new();
        GzDecoder::new(bytes).read_to_end(&mut json)?;
        Ok(serde_json::from_slice(&json)?)
    }
}

struct OpenPage {
    chromosome: String,
    start_f: u64,
    end_f: u64,
    first_position: u64,
    last_position: u64,
    records: usize,
    bytes: usize,
}

/// Incremental index construction, one line at a time
pub struct IndexBuilder {
    page_records: usize,
    page_bytes: usize,
    offset: u64,
    line_number: usize,
    current: Option<OpenPage>,
    index: PositionIndex,
}

impl IndexBuilder {
    pub fn new(page_records: usize, page_bytes: usize) -> Self {
        Self {
            page_records: page_records.max(1),
            page_bytes: page_bytes.max(1),
            offset: 0,
            line_number: 0,
            current: None,
            index: PositionIndex::default(),
        }
    }

    /// Feed one raw line, including its terminating newline if present
    pub fn push_line(&mut self, line: &[u8]) -> Result<()> {
        self.line_number += 1;
        let start_f = self.offset;
        self.offset += line.len() as u64;

        if line.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        let (chromosome, start, end) = parse_locus(line, self.line_number)?;

        let full = self.current.as_ref().is_some_and(|page| {
            page.chromosome != chromosome
                || page.records >= self.page_records
                || page.bytes >= self.page_bytes
        });
        if full {
            self.flush();
        }

        let page = self.current.get_or_insert_with(|| OpenPage {
            chromosome: chromosome.to_string(),
            start_f,
            end_f: start_f,
            first_position: start,
            last_position: end,
            records: 0,
            bytes: 0,
        });
        page.records += 1;
        page.bytes += line.len();
        page.end_f = self.offset;
        page.last_position = page.last_position.max(end);
        Ok(())
    }

    pub fn finish(mut self) -> PositionIndex {
        self.flush();
        debug!(
            "Built position index over {} bytes: {:?}",
            self.offset,
            self.index.page_counts()
        );
        self.index
    }

    fn flush(&mut self) {
        let Some(page) = self.current.take() else {
            return;
        };
        let position = self
            .index
            .chromosomes
            .iter()
            .position(|c| c.chromosome == page.chromosome);
        let pages = match position {
            Some(idx) => &mut self.index.chromosomes[idx],
            None => {
                self.index
                    .chromosomes
                    .push(ChromosomePages::new(page.chromosome.clone()));
                let last = self.index.chromosomes.len() - 1;
                &mut self.index.chromosomes[last]
            }
        };
        pages.page_start_f.push(page.start_f);
        pages.page_end_f.push(page.end_f);
        pages.chromosome_start.push(page.first_position);
        pages.chromosome_end.push(page.last_position);
    }
}

fn parse_locus(line: &[u8], line_number: usize) -> Result<(&str, u64, u64)> {
    let malformed = |reason: &str| PipelineError::MalformedRecord {
        line: line_number,
        reason: reason.to_string(),
    };

    let text = std::str::from_utf8(line).map_err(|_| malformed("not valid UTF-8"))?;
    let locus = text
        .trim_end_matches(['\r', '\n'])
        .split('\t')
        .nth(2)
        .ok_or_else(|| malformed("missing locus field"))?;
    let (chromosome, range) = locus
        .split_once(':')
        .ok_or_else(|| malformed("locus is not chromosome:start-end"))?;
    let (start, end) = range
        .split_once('-')
        .ok_or_else(|| malformed("locus is not chromosome:start-end"))?;
    let start = start.parse().map_err(|_| malformed("bad start position"))?;
    let end = end.parse().map_err(|_| malformed("bad end position"))?;
    Ok((chromosome, start, end))
}
