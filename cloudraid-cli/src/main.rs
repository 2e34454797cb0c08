//! CloudRAID CLI - Command-line interface
//!
//! This binary provides a command-line interface to the CloudRAID library.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use cloudraid::layout::{DEFAULT_SECTOR_SIZE, DEFAULT_SOURCE_COUNT};

use commands::common::{TicketArgs, TransferArgs};

#[derive(Parser)]
#[command(name = "cloudraid")]
#[command(version = cloudraid::VERSION)]
#[command(about = "Download files striped with parity across independent hosts", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a striped file, resuming a previous attempt if possible
    Download {
        #[command(flatten)]
        ticket: TicketArgs,

        #[command(flatten)]
        transfer: TransferArgs,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Resume token file (defaults to the configured resume directory)
        #[arg(long)]
        resume_file: Option<PathBuf>,

        /// Discard any saved progress and start over
        #[arg(long)]
        restart: bool,
    },

    /// Stream a byte range of a striped file to stdout
    Stream {
        #[command(flatten)]
        ticket: TicketArgs,

        #[command(flatten)]
        transfer: TransferArgs,

        /// First byte to stream
        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Number of bytes to stream (defaults to the rest of the file)
        #[arg(long)]
        length: Option<u64>,
    },

    /// Split a local file into parity-striped parts
    Split {
        /// File to split
        input: PathBuf,

        /// Directory for the parts (defaults to the input's directory)
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Number of parts, parity included
        #[arg(long, default_value_t = DEFAULT_SOURCE_COUNT)]
        sources: usize,

        /// Stripe sector size in bytes
        #[arg(long, default_value_t = DEFAULT_SECTOR_SIZE)]
        sector_size: u64,
    },

    /// Print a saved resume token as JSON
    Token {
        /// Token file
        path: Option<PathBuf>,

        /// Look the token up by file identity in the resume directory
        #[arg(long, conflicts_with = "path")]
        id: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Download {
            ticket,
            transfer,
            output,
            resume_file,
            restart,
        } => commands::download::run(
            commands::download::DownloadArgs {
                ticket,
                transfer,
                output,
                resume_file,
                restart,
            },
            cli.debug,
        ),
        Commands::Stream {
            ticket,
            transfer,
            offset,
            length,
        } => commands::stream::run(
            commands::stream::StreamArgs {
                ticket,
                transfer,
                offset,
                length,
            },
            cli.debug,
        ),
        Commands::Split {
            input,
            output_dir,
            sources,
            sector_size,
        } => commands::split::run(commands::split::SplitArgs {
            input,
            output_dir,
            sources,
            sector_size,
        }),
        Commands::Token { path, id } => {
            commands::token::run(commands::token::TokenArgs { path, id })
        }
    };

    if let Err(e) = result {
        e.exit();
    }
}
