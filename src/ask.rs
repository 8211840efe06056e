//! `docent ask`: index local files and answer one question without a server.

use std::path::PathBuf;

use anyhow::{bail, Result};

use crate::config::Config;
use crate::extract::load_file;
use crate::orchestrator::{ChatRequest, QueryOrchestrator};

pub async fn run_ask(config: &Config, question: &str, files: &[PathBuf]) -> Result<()> {
    if files.is_empty() {
        bail!("at least one --file is required");
    }

    let documents = files
        .iter()
        .map(|p| load_file(p))
        .collect::<Result<Vec<_>>>()?;

    let orchestrator = QueryOrchestrator::new(config.clone())?;
    let stats = orchestrator.index_documents(&documents).await?;
    tracing::info!(
        documents = stats.documents,
        chunks = stats.chunks,
        embedding_calls = stats.embedding_calls,
        "indexed local files"
    );

    let response = orchestrator
        .chat("cli", ChatRequest::new(question))
        .await?;

    println!("{}", response.answer);
    if !response.sources.is_empty() {
        println!();
        println!("Sources:");
        for (i, source) in response.sources.iter().enumerate() {
            let m = &source.metadata;
            println!(
                "{}. [{:.3}] {} (chunk {})",
                i + 1,
                m.score,
                m.file_name,
                m.chunk_index
            );
            println!("    {}", source.content.replace('\n', " "));
        }
    }

    Ok(())
}
