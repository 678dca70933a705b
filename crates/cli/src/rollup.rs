//! Wiring of one complete rollup run.

use std::sync::Arc;

use anyhow::{Context, Result};

use esrollup_core::{ElasticConfig, RollupConfig};
use esrollup_elastic::{BulkConfig, BulkProcessor, ElasticClient};
use esrollup_pipeline::{
    Coordinator, IndexMatcher, PipelineConfig, ProgressRenderer, RollupSummary, SilentRenderer,
};

use crate::progress::ConsoleProgress;

/// Validate `config`, connect both clusters and roll up every matching index.
///
/// Configuration errors surface before any reader starts.
pub async fn run_once(
    config: &RollupConfig,
    elastic: &ElasticConfig,
    silent: bool,
) -> Result<RollupSummary> {
    let matcher = IndexMatcher::from_config(config).context("invalid configuration")?;

    let source = ElasticClient::new(&config.in_host, elastic)
        .with_context(|| format!("failed to connect to input host {}", config.in_host))?;
    let destination = ElasticClient::new(config.out_host(), elastic)
        .with_context(|| format!("failed to connect to output host {}", config.out_host()))?;
    let sink = BulkProcessor::start(destination, BulkConfig::new(elastic, config.buffer_size));

    let renderer: Box<dyn ProgressRenderer> = if silent {
        Box::new(SilentRenderer)
    } else {
        Box::new(ConsoleProgress::new())
    };

    let mut coordinator = Coordinator::new(
        Arc::new(source),
        Arc::new(sink),
        renderer,
        PipelineConfig::new(config.threads, config.buffer_size),
    );
    coordinator
        .rollup(&matcher)
        .await
        .context("rollup failed")
}
