//! Benchmark harness for the Proxima ANN engine.
//!
//! Builds an index over deterministic random vectors per a JSON config,
//! measures recall and latency against brute-force ground truth, and writes
//! CSV + JSON results alongside a `<output>.checkpoint.json` companion.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;
use serde::{Deserialize, Serialize};

use proxima_core::{
    Bits, BuildScoreProvider, DenseVectorSource, GraphBuilder, GraphSearcher,
    RandomAccessScoreProvider, VectorSimilarity,
};

#[derive(Parser)]
#[command(name = "proxima", version, about = "Proxima recall/latency benchmark")]
struct Args {
    /// Benchmark configuration file (JSON).
    #[arg(long)]
    config: PathBuf,

    /// Output path stem; writes `<output>.csv`, `<output>.json` and
    /// `<output>.checkpoint.json`.
    #[arg(long)]
    output: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BenchConfig {
    #[serde(default = "default_num_vectors")]
    num_vectors: usize,
    #[serde(default = "default_dimension")]
    dimension: usize,
    #[serde(default = "default_queries")]
    queries: usize,
    #[serde(default = "default_top_k")]
    top_k: usize,
    #[serde(default = "default_max_degree")]
    max_degree: usize,
    #[serde(default = "default_beam_width")]
    beam_width: usize,
    #[serde(default = "default_rerank_k")]
    rerank_k: usize,
    #[serde(default = "default_alpha")]
    alpha: f32,
    #[serde(default = "default_overflow")]
    neighbor_overflow: f32,
    #[serde(default)]
    add_hierarchy: bool,
    #[serde(default = "default_similarity")]
    similarity: VectorSimilarity,
    #[serde(default = "default_seed")]
    seed: u64,
}

fn default_num_vectors() -> usize {
    10_000
}
fn default_dimension() -> usize {
    64
}
fn default_queries() -> usize {
    100
}
fn default_top_k() -> usize {
    10
}
fn default_max_degree() -> usize {
    16
}
fn default_beam_width() -> usize {
    100
}
fn default_rerank_k() -> usize {
    100
}
fn default_alpha() -> f32 {
    1.2
}
fn default_overflow() -> f32 {
    1.2
}
fn default_similarity() -> VectorSimilarity {
    VectorSimilarity::Euclidean
}
fn default_seed() -> u64 {
    42
}

#[derive(Debug, Serialize)]
struct QueryRecord {
    query: usize,
    recall: f32,
    latency_us: u128,
    visited: usize,
    expanded: usize,
}

#[derive(Debug, Serialize)]
struct BenchSummary {
    num_vectors: usize,
    dimension: usize,
    queries: usize,
    top_k: usize,
    build_seconds: f64,
    mean_recall: f32,
    mean_latency_us: f64,
}

#[derive(Debug, Serialize)]
struct Checkpoint {
    completed: bool,
    queries_done: usize,
    results_path: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::MissingRequiredArgument => 1,
                // --help / --version are not failures
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                    let _ = err.print();
                    std::process::exit(0);
                }
                _ => 1,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    if let Err(err) = run(&args) {
        eprintln!("error: {err:#}");
        std::process::exit(2);
    }
}

fn xorshift(state: &mut u64) -> u64 {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    *state
}

fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut state = seed | 1;
    (0..n)
        .map(|_| {
            (0..dim)
                .map(|_| (xorshift(&mut state) >> 40) as f32 / (1u64 << 24) as f32)
                .collect()
        })
        .collect()
}

fn brute_force_top_k(
    rows: &[Vec<f32>],
    query: &[f32],
    similarity: VectorSimilarity,
    k: usize,
) -> Vec<u32> {
    let mut scored: Vec<(u32, f32)> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| (i as u32, similarity.compare(query, row)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.into_iter().take(k).map(|(node, _)| node).collect()
}

fn run(args: &Args) -> anyhow::Result<()> {
    let config_text = fs::read_to_string(&args.config)
        .with_context(|| format!("reading config {}", args.config.display()))?;
    let config: BenchConfig =
        serde_json::from_str(&config_text).context("parsing benchmark config")?;

    tracing::info!(?config, "starting benchmark");

    let rows = random_vectors(config.num_vectors, config.dimension, config.seed);
    let source = Arc::new(DenseVectorSource::from_rows(&rows, config.dimension)?);
    let provider = Arc::new(RandomAccessScoreProvider::new(
        source.clone(),
        config.similarity,
    ));

    let build_start = Instant::now();
    let builder = GraphBuilder::new(
        provider.clone(),
        config.max_degree,
        config.beam_width,
        config.neighbor_overflow,
        config.alpha,
        config.add_hierarchy,
    )?;
    builder.build(source.as_ref())?;
    let build_seconds = build_start.elapsed().as_secs_f64();
    tracing::info!(build_seconds, "index built");

    let queries = random_vectors(config.queries, config.dimension, config.seed.wrapping_add(1));
    let mut searcher = GraphSearcher::new();
    let mut records = Vec::with_capacity(queries.len());

    for (i, query) in queries.iter().enumerate() {
        let truth = brute_force_top_k(&rows, query, config.similarity, config.top_k);

        let started = Instant::now();
        let ssp = provider.search_provider_for(query)?;
        let result = searcher.search(
            builder.graph(),
            &ssp,
            config.top_k,
            config.rerank_k,
            &Bits::All,
        );
        let latency_us = started.elapsed().as_micros();

        let hits = truth
            .iter()
            .filter(|node| result.node_scores.iter().any(|ns| ns.node == **node))
            .count();
        records.push(QueryRecord {
            query: i,
            recall: hits as f32 / config.top_k as f32,
            latency_us,
            visited: result.visited,
            expanded: result.expanded,
        });
    }

    let mean_recall =
        records.iter().map(|r| r.recall).sum::<f32>() / records.len().max(1) as f32;
    let mean_latency_us = records.iter().map(|r| r.latency_us as f64).sum::<f64>()
        / records.len().max(1) as f64;
    let summary = BenchSummary {
        num_vectors: config.num_vectors,
        dimension: config.dimension,
        queries: config.queries,
        top_k: config.top_k,
        build_seconds,
        mean_recall,
        mean_latency_us,
    };
    tracing::info!(mean_recall, mean_latency_us, "benchmark finished");

    write_outputs(&args.output, &records, &summary)
}

fn write_outputs(
    output: &Path,
    records: &[QueryRecord],
    summary: &BenchSummary,
) -> anyhow::Result<()> {
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating output directory {}", parent.display()))?;
        }
    }

    let csv_path = output.with_extension("csv");
    let mut csv = String::from("query,recall,latency_us,visited,expanded\n");
    for record in records {
        csv.push_str(&format!(
            "{},{},{},{},{}\n",
            record.query, record.recall, record.latency_us, record.visited, record.expanded
        ));
    }
    fs::write(&csv_path, csv).with_context(|| format!("writing {}", csv_path.display()))?;

    let json_path = output.with_extension("json");
    fs::write(&json_path, serde_json::to_string_pretty(summary)?)
        .with_context(|| format!("writing {}", json_path.display()))?;

    let checkpoint_path = output.with_extension("checkpoint.json");
    let checkpoint = Checkpoint {
        completed: true,
        queries_done: records.len(),
        results_path: json_path.display().to_string(),
    };
    fs::write(&checkpoint_path, serde_json::to_string_pretty(&checkpoint)?)
        .with_context(|| format!("writing {}", checkpoint_path.display()))?;

    Ok(())
}
