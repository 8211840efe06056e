//! `docent chunk`: show how a file would be split before indexing.

use std::path::Path;

use anyhow::Result;

use crate::chunk::Chunker;
use crate::config::Config;
use crate::extract::load_file;

pub fn run_chunk(config: &Config, path: &Path) -> Result<()> {
    let document = load_file(path)?;
    let chunks = Chunker::from_config(&config.chunking).split_document(&document);

    println!(
        "{} ({}, id {}): {} chunks",
        document.source_name,
        document.mime_type,
        document.id,
        chunks.len()
    );
    println!();

    for chunk in &chunks {
        let page = chunk
            .page
            .map(|p| format!(", page {}", p))
            .unwrap_or_default();
        println!(
            "--- chunk {} ({} chars{}) ---",
            chunk.chunk_index,
            chunk.text.chars().count(),
            page
        );
        println!("{}", chunk.text);
        println!();
    }

    Ok(())
}
