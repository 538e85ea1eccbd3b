// ==============================================================================
// main.rs - Annotation Pipeline Operator CLI
// ==============================================================================
// Description: Local tools for operators: index a merged result, look up
//              pages, query stored results and reclaim a run's intermediates
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;
use tracing::info;

use annotation_pipeline::index::PositionIndex;
use annotation_pipeline::logging;
use annotation_pipeline::reclaim::reclaim_intermediates;
use annotation_pipeline::results::{query_results, select_page, ResultQuery, Selector};
use annotation_pipeline::storage::StoreSet;
use annotation_pipeline::PipelineConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a position index over a merged TSV result
    BuildIndex {
        /// Merged result file
        #[arg(short, long)]
        input: PathBuf,

        /// Index output (default: <input>.index.json.gz)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Records per page
        #[arg(long, env = "INDEX_PAGE_RECORDS", default_value_t = 1_000)]
        page_records: usize,

        /// Bytes per page
        #[arg(long, env = "INDEX_PAGE_BYTES", default_value_t = 10_000_000)]
        page_bytes: usize,
    },

    /// Print one page of a local result using its index
    Lookup {
        /// Index file written by build-index
        #[arg(long)]
        index: PathBuf,

        /// Result file to read the page from; only the entry is printed if absent
        #[arg(long)]
        result: Option<PathBuf>,

        /// Chromosome (default: first indexed)
        #[arg(short, long)]
        chromosome: Option<String>,

        /// 1-based page number
        #[arg(short, long, conflicts_with = "position")]
        page: Option<usize>,

        /// Genomic position
        #[arg(long)]
        position: Option<u64>,
    },

    /// Query a stored run result the way the gateway does
    Query {
        #[arg(long, env = "PIPELINE_DATA_DIR", default_value = "/mnt/annotation-data")]
        data_dir: PathBuf,

        #[arg(long)]
        project: String,

        #[arg(long)]
        run_id: String,

        #[arg(short, long)]
        chromosome: Option<String>,

        #[arg(short, long, conflicts_with = "position")]
        page: Option<usize>,

        #[arg(long)]
        position: Option<u64>,
    },

    /// Delete markers, payloads and fragments left behind by a run
    Reclaim {
        #[arg(long, env = "PIPELINE_DATA_DIR", default_value = "/mnt/annotation-data")]
        data_dir: PathBuf,

        #[arg(long)]
        run_id: String,
    },
}

fn selector(page: Option<usize>, position: Option<u64>) -> Selector {
    match (page, position) {
        (_, Some(position)) => Selector::Position(position),
        (Some(page), None) => Selector::Page(page),
        (None, None) => Selector::default(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init("annotation_pipeline=info");

    let args = Args::parse();

    match args.command {
        Command::BuildIndex {
            input,
            output,
            page_records,
            page_bytes,
        } => {
            let file = File::open(&input).with_context(|| format!("Failed to open {:?}", input))?;
            let index = PositionIndex::build(BufReader::new(file), page_records, page_bytes)
                .context("Failed to index result")?;

            let output = output.unwrap_or_else(|| {
                let mut name = input.clone().into_os_string();
                name.push(".index.json.gz");
                PathBuf::from(name)
            });
            std::fs::write(&output, index.to_gzip_json()?)
                .with_context(|| format!("Failed to write {:?}", output))?;

            info!("Wrote index to {:?}", output);
            for (chromosome, pages) in index.page_counts() {
                println!("{}\t{}", chromosome, pages);
            }
        }

        Command::Lookup {
            index,
            result,
            chromosome,
            page,
            position,
        } => {
            let bytes = std::fs::read(&index).with_context(|| format!("Failed to read {:?}", index))?;
            let index = PositionIndex::from_gzip_json(&bytes).context("Failed to decode index")?;

            let chromosome = match chromosome {
                Some(c) => c,
                None => index
                    .first_chromosome()
                    .context("Index is empty")?
                    .to_string(),
            };
            let entry = select_page(&index, &chromosome, selector(page, position))?;
            println!("{}", serde_json::to_string_pretty(&entry)?);

            if let Some(result) = result {
                let mut file = File::open(&result).with_context(|| format!("Failed to open {:?}", result))?;
                file.seek(SeekFrom::Start(entry.page_start_f))?;
                let mut content = String::new();
                file.take(entry.page_end_f - entry.page_start_f)
                    .read_to_string(&mut content)?;
                print!("{}", content);
            }
        }

        Command::Query {
            data_dir,
            project,
            run_id,
            chromosome,
            page,
            position,
        } => {
            let config = PipelineConfig::from_env()?;
            let stores = StoreSet::open_fs(&data_dir).await?;
            let query = ResultQuery {
                project,
                run_id,
                chromosome,
                selector: selector(page, position),
            };
            let view = query_results(stores.results.as_ref(), &config, &query).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }

        Command::Reclaim { data_dir, run_id } => {
            let stores = StoreSet::open_fs(&data_dir).await?;
            let stats =
                reclaim_intermediates(stores.temp.as_ref(), stores.regions.as_ref(), &run_id).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_prefers_position() {
        assert_eq!(selector(Some(3), Some(100)), Selector::Position(100));
        assert_eq!(selector(Some(3), None), Selector::Page(3));
        assert_eq!(selector(None, None), Selector::Page(1));
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let args = Args::try_parse_from([
            "annotation-pipeline",
            "lookup",
            "--index",
            "r.tsv.index.json.gz",
            "--chromosome",
            "X",
            "--position",
            "1200",
        ])
        .unwrap();
        assert!(matches!(
            args.command,
            Command::Lookup { position: Some(1200), .. }
        ));
    }
}
