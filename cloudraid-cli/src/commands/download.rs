//! Download command - fetch a striped file into a local file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use cloudraid::config::format_size;
use cloudraid::{
    FileResumeStore, FileSink, HttpTransport, ResumeStore, ResumeToken, TransferConfig,
    TransferSession, TransferTicket,
};

use super::common::{file_identity_of, TicketArgs, TransferArgs};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the download command.
pub struct DownloadArgs {
    pub ticket: TicketArgs,
    pub transfer: TransferArgs,
    pub output: PathBuf,
    pub resume_file: Option<PathBuf>,
    pub restart: bool,
}

/// Run the download command.
pub fn run(args: DownloadArgs, debug: bool) -> Result<(), CliError> {
    let runner = CliRunner::with_debug(debug)?;
    runner.log_startup("download");

    let ticket = args.ticket.resolve(&file_identity_of(&args.output))?;
    let config = args.transfer.apply(runner.config().transfer.clone())?;

    let resume_path = args
        .resume_file
        .clone()
        .unwrap_or_else(|| runner.config().resume_token_path(&ticket.file_identity));
    if let Some(parent) = resume_path.parent() {
        std::fs::create_dir_all(parent).map_err(|error| CliError::File {
            path: parent.to_path_buf(),
            error,
        })?;
    }
    let store = Arc::new(FileResumeStore::new(&resume_path));
    let token = if args.restart {
        store.clear()?;
        None
    } else {
        // A token without its partial output is useless.
        store.load()?.filter(|_| args.output.exists())
    };

    println!("Downloading {}", ticket.file_identity);
    println!("  Size:    {}", format_size(ticket.file_size));
    println!("  Sources: {} (sector {} bytes)", ticket.source_count, ticket.sector_size);
    println!("  Output:  {}", args.output.display());
    if let Some(token) = &token {
        println!("  Resuming from byte {}", token.contiguous_bytes);
    }
    println!();

    let transport = HttpTransport::new()
        .map_err(|e| CliError::Config(format!("Failed to create HTTP client: {}", e)))?;

    let runtime = runner.runtime()?;
    runtime.block_on(download(
        ticket,
        token,
        Arc::new(transport),
        config,
        store,
        &args.output,
        resume_path,
    ))
}

async fn download(
    ticket: TransferTicket,
    token: Option<ResumeToken>,
    transport: Arc<HttpTransport>,
    config: TransferConfig,
    store: Arc<FileResumeStore>,
    output: &Path,
    resume_path: PathBuf,
) -> Result<(), CliError> {
    let resumed_from = token.as_ref().map(|t| t.contiguous_bytes);
    let session = match token {
        Some(token) => TransferSession::resume(ticket, token, transport, config)?,
        None => TransferSession::new(ticket, transport, config)?,
    }
    .with_resume_store(store);

    let sink = match resumed_from {
        Some(_) => FileSink::open_existing(output).await,
        None => FileSink::create(output).await,
    };
    let mut sink = sink.map_err(|error| CliError::File {
        path: output.to_path_buf(),
        error,
    })?;

    let range = session.range();
    let bar = progress_bar(range.end - range.start);
    bar.set_position(resumed_from.unwrap_or(range.start) - range.start);
    let bar_in_callback = bar.clone();
    let session = session.with_progress(Box::new(move |_, contiguous| {
        bar_in_callback.set_position(contiguous - range.start);
    }));

    let cancel = session.cancellation_token();
    ctrlc::set_handler(move || {
        cancel.cancel();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let start = Instant::now();
    match session.run(&mut sink).await {
        Ok(report) if report.is_complete() => {
            bar.finish();
            let elapsed = start.elapsed();
            info!(
                bytes = report.contiguous_bytes,
                elapsed_ms = elapsed.as_millis() as u64,
                "Download complete"
            );
            println!(
                "Downloaded {} in {:.2}s",
                format_size(report.contiguous_bytes),
                elapsed.as_secs_f64()
            );
            if !report.failed_sources.is_empty() {
                println!(
                    "  Reconstructed around failed source(s): {:?}",
                    report.failed_sources
                );
            }
            Ok(())
        }
        Ok(report) => {
            bar.abandon();
            Err(CliError::Cancelled {
                resume_path,
                contiguous: report.contiguous_bytes,
            })
        }
        Err(failure) => {
            bar.abandon();
            Err(failure.into())
        }
    }
}

fn progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    bar.set_style(style);
    bar
}
