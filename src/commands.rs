//! CLI command implementations.
//!
//! Each `run_*` function builds [`Services`] from config, performs one
//! operation, prints a human-readable result to stdout, and closes the
//! database pool.

use anyhow::{bail, Context, Result};
use std::io::Read;
use std::path::Path;

use ragvault_core::error::VaultError;
use ragvault_core::ingest::{validate_id, IngestRequest};
use ragvault_core::models::QueryMatch;

use crate::app::Services;
use crate::config::Config;

/// Source of document text for `rvault ingest`.
pub enum TextSource<'a> {
    File(&'a Path),
    Inline(&'a str),
    Stdin,
}

fn read_text(source: TextSource<'_>) -> Result<String> {
    match source {
        TextSource::File(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        TextSource::Inline(text) => Ok(text.to_string()),
        TextSource::Stdin => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}

fn format_timestamp(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn print_matches(matches: &[QueryMatch]) {
    if matches.is_empty() {
        println!("No results.");
        return;
    }
    for (i, m) in matches.iter().enumerate() {
        match &m.metadata {
            Some(meta) => {
                println!("{}. [{:.4}] {} ({})", i + 1, m.score, m.id, meta.title);
                println!("    {}", meta.preview());
            }
            None => println!("{}. [{:.4}] {}", i + 1, m.score, m.id),
        }
    }
}

pub async fn run_ingest(
    config: &Config,
    user_id: &str,
    item_id: &str,
    title: Option<String>,
    source: TextSource<'_>,
    source_confidence: Option<f32>,
) -> Result<()> {
    let title = match (&title, &source) {
        (Some(t), _) => t.clone(),
        (None, TextSource::File(path)) => path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| item_id.to_string()),
        (None, _) => item_id.to_string(),
    };
    let text = read_text(source)?;

    let services = Services::from_config(config).await?;
    let result = services
        .ingest
        .ingest(&IngestRequest {
            user_id: user_id.to_string(),
            item_id: item_id.to_string(),
            title,
            text,
            source_confidence,
        })
        .await;
    services.close().await;
    let outcome = result?;

    println!("Ingested {} chunk(s) for {}/{}", outcome.ids.len(), user_id, item_id);
    if let Some(evicted) = outcome.evicted {
        println!("Evicted oldest document: {}", evicted);
    }
    Ok(())
}

pub async fn run_query(
    config: &Config,
    user_id: &str,
    query: &str,
    top_k: Option<i64>,
) -> Result<()> {
    let services = Services::from_config(config).await?;
    let result = services.retrieval.semantic_search(user_id, query, top_k).await;
    services.close().await;
    print_matches(&result?);
    Ok(())
}

pub async fn run_ask(config: &Config, user_id: &str, query: &str, top_k: Option<i64>) -> Result<()> {
    let services = Services::from_config(config).await?;
    let result = services.ask(user_id, query, top_k).await;
    services.close().await;
    let (answer, matches) = result?;

    println!("{}", answer);
    if !matches.is_empty() {
        println!();
        println!("Sources:");
        let mut seen = std::collections::HashSet::new();
        for m in &matches {
            if let Some(meta) = &m.metadata {
                if seen.insert(meta.item_id.as_str()) {
                    println!("  - {} ({})", meta.title, meta.item_id);
                }
            }
        }
    }
    Ok(())
}

pub async fn run_documents(config: &Config, user_id: &str) -> Result<()> {
    validate_id("user_id", user_id)?;
    let services = Services::from_config(config).await?;
    let result = services.catalog.list_documents(user_id).await;
    let max = services.catalog.max_documents();
    services.close().await;
    let docs = result?;

    println!("{} of {} document(s) for {}", docs.len(), max, user_id);
    for d in docs {
        println!(
            "  {}  {:<24} {:>4} chunk(s) {:>8} chars  {}",
            format_timestamp(d.created_at),
            d.item_id,
            d.chunk_count,
            d.text_length,
            d.title
        );
    }
    Ok(())
}

pub async fn run_delete(config: &Config, user_id: &str, item_id: &str) -> Result<()> {
    validate_id("user_id", user_id)?;
    validate_id("item_id", item_id)?;
    let services = Services::from_config(config).await?;
    let result = services.catalog.delete_document(user_id, item_id).await;
    services.close().await;
    if !result? {
        return Err(VaultError::NotFound {
            item_id: item_id.to_string(),
        }
        .into());
    }
    println!("Deleted {}/{}", user_id, item_id);
    Ok(())
}

pub async fn run_reconcile(config: &Config, user_id: &str) -> Result<()> {
    validate_id("user_id", user_id)?;
    let services = Services::from_config(config).await?;
    let dims = services.gateway.dims();
    if dims == 0 {
        services.close().await;
        bail!("reconcile needs an enabled embedding provider to size the scan vector");
    }
    let result = services.catalog.reconcile(user_id, dims).await;
    services.close().await;
    let docs = result?;
    println!("Rebuilt index for {}: {} document(s)", user_id, docs.len());
    for d in docs {
        println!("  {} ({} chunk(s))", d.item_id, d.chunk_count);
    }
    Ok(())
}
