//! Split command - lay a local file out as parity-striped parts.
//!
//! Produces the parts an uploader would place on N independent hosts, plus
//! a ticket skeleton listing them. Replace the ticket's URLs with wherever
//! the parts end up being served from.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use cloudraid::config::format_size;
use cloudraid::encode::StripeEncoder;
use cloudraid::{StripeLayout, TransferTicket};

use super::common::file_identity_of;
use crate::error::CliError;

/// Arguments for the split command.
pub struct SplitArgs {
    pub input: PathBuf,
    pub output_dir: Option<PathBuf>,
    pub sources: usize,
    pub sector_size: u64,
}

/// Run the split command.
pub fn run(args: SplitArgs) -> Result<(), CliError> {
    let dir = match &args.output_dir {
        Some(dir) => dir.clone(),
        None => args
            .input
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };

    let split = split_file(&args.input, &dir, args.sources, args.sector_size)?;

    println!("Split {} into {} parts:", args.input.display(), split.parts.len());
    for (index, (path, size)) in split.parts.iter().enumerate() {
        let role = if index == 0 { "parity" } else { "data" };
        println!("  [{}] {:<6} {:>10}  {}", index, role, format_size(*size), path.display());
    }
    println!();
    println!("Ticket skeleton: {}", split.ticket_path.display());
    Ok(())
}

/// What [`split_file`] wrote.
#[derive(Debug)]
pub struct SplitOutput {
    /// Part path and size, in source order.
    pub parts: Vec<(PathBuf, u64)>,
    pub ticket_path: PathBuf,
}

/// Writes `<name>.part<i>` for every source and `<name>.ticket.json`.
pub fn split_file(
    input: &Path,
    dir: &Path,
    sources: usize,
    sector_size: u64,
) -> Result<SplitOutput, CliError> {
    let file_error = |path: &Path| {
        let path = path.to_path_buf();
        move |error| CliError::File { path, error }
    };

    let data = std::fs::read(input).map_err(file_error(input))?;
    let layout = StripeLayout::new(sources, sector_size, data.len() as u64)?;
    std::fs::create_dir_all(dir).map_err(file_error(dir))?;

    let name = file_identity_of(input);
    let paths: Vec<PathBuf> = (0..sources)
        .map(|i| dir.join(format!("{}.part{}", name, i)))
        .collect();
    let mut writers = Vec::with_capacity(sources);
    for path in &paths {
        let file = File::create(path).map_err(file_error(path))?;
        writers.push(BufWriter::new(file));
    }

    StripeEncoder::new(layout).write_parts(&data, &mut writers)?;
    for (writer, path) in writers.iter_mut().zip(&paths) {
        writer.flush().map_err(file_error(path))?;
    }

    let urls = paths.iter().map(|p| p.display().to_string()).collect();
    let ticket = TransferTicket::new(name.clone(), data.len() as u64, urls).with_sector_size(sector_size);
    let ticket_path = dir.join(format!("{}.ticket.json", name));
    let json = serde_json::to_string_pretty(&ticket)
        .map_err(|e| CliError::Ticket(format!("cannot serialize ticket: {}", e)))?;
    std::fs::write(&ticket_path, json).map_err(file_error(&ticket_path))?;

    let parts = paths
        .into_iter()
        .enumerate()
        .map(|(i, path)| (path, layout.part_size(i)))
        .collect();
    Ok(SplitOutput { parts, ticket_path })
}
