//! Stream command - write a byte range of a striped file to stdout.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use cloudraid::{start_streaming, HttpTransport};

use super::common::{TicketArgs, TransferArgs};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the stream command.
pub struct StreamArgs {
    pub ticket: TicketArgs,
    pub transfer: TransferArgs,
    pub offset: u64,
    pub length: Option<u64>,
}

/// Run the stream command.
pub fn run(args: StreamArgs, debug: bool) -> Result<(), CliError> {
    // Stdout carries the data, so logs only go to the file.
    let runner = CliRunner::quiet(debug)?;
    runner.log_startup("stream");

    let ticket = args.ticket.resolve("stream")?;
    let config = args.transfer.apply(runner.config().transfer.clone())?;
    let length = args
        .length
        .unwrap_or_else(|| ticket.file_size.saturating_sub(args.offset));
    let transport = HttpTransport::new()
        .map_err(|e| CliError::Config(format!("Failed to create HTTP client: {}", e)))?;

    let runtime = runner.runtime()?;
    runtime.block_on(async move {
        let mut stream =
            start_streaming(ticket, Arc::new(transport), args.offset, length, config)?;
        let mut stdout = io::stdout().lock();

        while let Some(chunk) = stream.next_chunk().await {
            if let Err(error) = stdout.write_all(&chunk) {
                stream.cancel();
                if error.kind() == io::ErrorKind::BrokenPipe {
                    // Reader went away (e.g. `| head`); not an error.
                    info!("Stdout closed, stopping stream");
                    return Ok(());
                }
                return Err(CliError::File {
                    path: PathBuf::from("<stdout>"),
                    error,
                });
            }
        }
        stdout.flush().map_err(|error| CliError::File {
            path: PathBuf::from("<stdout>"),
            error,
        })?;

        let report = stream.finish().await?;
        if !report.is_complete() {
            warn!(contiguous = report.contiguous_bytes, "Stream ended early");
        }
        Ok(())
    })
}
