//! Decoding defmt frames captured from the guest.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use defmt_decoder::{DecodeError, Table};

/// Decode a raw semihosting capture into one formatted line per frame.
///
/// A fault scenario is cut short by the abort, so a truncated trailing
/// frame just ends the stream instead of failing the decode.
pub fn decode_output(elf_path: &Path, raw_output: &[u8]) -> Result<String> {
    let elf_data = fs::read(elf_path).context("Failed to read ELF file")?;
    let table = Table::parse(&elf_data)
        .context("Failed to parse defmt table from ELF")?
        .ok_or_else(|| anyhow::anyhow!("No defmt data found in ELF"))?;

    let mut decoder = table.new_stream_decoder();
    decoder.received(raw_output);

    let mut output = String::new();
    loop {
        match decoder.decode() {
            Ok(frame) => {
                let level = frame
                    .level()
                    .map(|l| l.as_str())
                    .unwrap_or("print")
                    .to_uppercase();
                output.push_str(&format!("[{level:<5}] {}\n", frame.display_message()));
            }
            Err(DecodeError::UnexpectedEof | DecodeError::Malformed) => break,
        }
    }

    Ok(output)
}
