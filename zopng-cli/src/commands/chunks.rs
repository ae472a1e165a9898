//! Chunks command implementation.

use serde::Serialize;
use std::path::Path;
use zopng_core::{ChunkInfo, PNG_SIGNATURE, list_chunks};

/// JSON serializable chunk data.
#[derive(Debug, Serialize)]
struct ChunkJson {
    offset: u64,
    name: String,
    length: u32,
    crc: u32,
    crc_ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    frame_index: Option<u32>,
}

/// JSON output for a chunk listing.
#[derive(Debug, Serialize)]
struct ChunkListJson {
    file: String,
    size: u64,
    chunks: Vec<ChunkJson>,
}

/// Start offset of each chunk within the file.
fn offsets(chunks: &[ChunkInfo]) -> Vec<u64> {
    let mut offset = PNG_SIGNATURE.len() as u64;
    chunks
        .iter()
        .map(|c| {
            let start = offset;
            offset += 12 + u64::from(c.length);
            start
        })
        .collect()
}

pub fn cmd_chunks(file: &Path, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let data = std::fs::read(file)?;
    let chunks = list_chunks(&data)?;
    let offsets = offsets(&chunks);

    if json {
        let list = ChunkListJson {
            file: file.display().to_string(),
            size: data.len() as u64,
            chunks: chunks
                .iter()
                .zip(&offsets)
                .map(|(c, &offset)| ChunkJson {
                    offset,
                    name: c.name.to_string(),
                    length: c.length,
                    crc: c.stored_crc,
                    crc_ok: c.crc_ok(),
                    frame_index: c.frame_index,
                })
                .collect(),
        };
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    println!("File: {} ({} bytes)", file.display(), data.len());
    println!();
    println!(
        "{:>10} {:>4} {:>10} {:>10} {:>6}",
        "Offset", "Name", "Length", "CRC", "Frame"
    );
    println!("{}", "-".repeat(46));

    let mut bad_crc = 0;
    for (chunk, offset) in chunks.iter().zip(&offsets) {
        let frame = chunk
            .frame_index
            .map(|i| i.to_string())
            .unwrap_or_else(|| "-".to_string());
        let mark = if chunk.crc_ok() { "" } else { "  (bad CRC)" };
        if !chunk.crc_ok() {
            bad_crc += 1;
        }
        println!(
            "{:>10} {:>4} {:>10} {:>10} {:>6}{}",
            offset,
            chunk.name,
            chunk.length,
            format!("{:08x}", chunk.stored_crc),
            frame,
            mark
        );
    }

    println!("{}", "-".repeat(46));
    println!("{} chunks, {} with bad CRC", chunks.len(), bad_crc);
    Ok(())
}
