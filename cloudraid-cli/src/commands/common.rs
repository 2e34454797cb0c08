//! Common argument groups and helpers shared across CLI commands.

use std::path::{Path, PathBuf};

use clap::Args;
use cloudraid::config::parse_size;
use cloudraid::layout::DEFAULT_SECTOR_SIZE;
use cloudraid::{TransferConfig, TransferTicket};

use crate::error::CliError;

/// Where the striped file lives: a ticket file, or its parts listed inline.
#[derive(Debug, Clone, Args)]
pub struct TicketArgs {
    /// Ticket file (JSON) describing the striped file
    #[arg(long, conflicts_with_all = ["urls", "size"])]
    pub ticket: Option<PathBuf>,

    /// Part URL; repeat once per source, parity part first
    #[arg(long = "url")]
    pub urls: Vec<String>,

    /// Size of the original file in bytes
    #[arg(long)]
    pub size: Option<u64>,

    /// File identity used to key resume tokens (defaults to the output name)
    #[arg(long)]
    pub id: Option<String>,

    /// Stripe sector size in bytes
    #[arg(long, default_value_t = DEFAULT_SECTOR_SIZE)]
    pub sector_size: u64,
}

impl TicketArgs {
    /// Builds and checks the ticket. `fallback_id` names the file when
    /// neither the ticket nor `--id` does.
    pub fn resolve(&self, fallback_id: &str) -> Result<TransferTicket, CliError> {
        let ticket = match &self.ticket {
            Some(path) => read_ticket(path)?,
            None => {
                if self.urls.is_empty() {
                    return Err(CliError::Ticket(
                        "either --ticket or at least one --url is required".to_string(),
                    ));
                }
                let size = self.size.ok_or_else(|| {
                    CliError::Ticket("--size is required when parts are given with --url".to_string())
                })?;
                let id = self.id.clone().unwrap_or_else(|| fallback_id.to_string());
                TransferTicket::new(id, size, self.urls.clone()).with_sector_size(self.sector_size)
            }
        };
        ticket.layout()?;
        Ok(ticket)
    }
}

/// Loads a JSON ticket file.
pub fn read_ticket(path: &Path) -> Result<TransferTicket, CliError> {
    let text = std::fs::read_to_string(path).map_err(|error| CliError::File {
        path: path.to_path_buf(),
        error,
    })?;
    serde_json::from_str(&text)
        .map_err(|e| CliError::Ticket(format!("{}: {}", path.display(), e)))
}

/// Transfer tuning that overrides the config file.
#[derive(Debug, Clone, Default, Args)]
pub struct TransferArgs {
    /// Maximum concurrent range requests across all sources
    #[arg(long)]
    pub connections: Option<usize>,

    /// Aggregate speed limit, e.g. 2MB (bytes per second)
    #[arg(long)]
    pub max_speed: Option<String>,
}

impl TransferArgs {
    pub fn apply(&self, config: TransferConfig) -> Result<TransferConfig, CliError> {
        let mut config = config;
        if let Some(connections) = self.connections {
            config = config.with_max_connections(connections);
        }
        if let Some(speed) = &self.max_speed {
            let bytes = parse_size(speed)
                .map_err(|e| CliError::Config(format!("--max-speed: {}", e)))?;
            config = config.with_max_speed(Some(bytes));
        }
        Ok(config)
    }
}

/// File name of `path` as a fallback identity.
pub fn file_identity_of(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "download".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inline(urls: usize, size: Option<u64>) -> TicketArgs {
        TicketArgs {
            ticket: None,
            urls: (0..urls).map(|i| format!("https://host{}/part", i)).collect(),
            size,
            id: None,
            sector_size: DEFAULT_SECTOR_SIZE,
        }
    }

    #[test]
    fn test_inline_ticket_uses_fallback_id() {
        let ticket = inline(6, Some(1_000)).resolve("movie.mkv").unwrap();
        assert_eq!(ticket.file_identity, "movie.mkv");
        assert_eq!(ticket.source_count, 6);
        assert_eq!(ticket.file_size, 1_000);
    }

    #[test]
    fn test_inline_ticket_needs_size_and_urls() {
        assert!(matches!(
            inline(6, None).resolve("x"),
            Err(CliError::Ticket(_))
        ));
        assert!(matches!(
            inline(0, Some(10)).resolve("x"),
            Err(CliError::Ticket(_))
        ));
        assert!(matches!(inline(2, Some(10)).resolve("x"), Err(CliError::Raid(_))));
    }

    #[test]
    fn test_ticket_file_round_trip() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("file.ticket.json");
        let original = inline(6, Some(5_000)).resolve("file").unwrap();
        std::fs::write(&path, serde_json::to_string(&original).unwrap()).unwrap();

        let args = TicketArgs {
            ticket: Some(path),
            ..inline(0, None)
        };
        assert_eq!(args.resolve("ignored").unwrap(), original);
    }

    #[test]
    fn test_transfer_args_override_config() {
        let args = TransferArgs {
            connections: Some(3),
            max_speed: Some("2MB".to_string()),
        };
        let config = args.apply(TransferConfig::default()).unwrap();
        assert_eq!(config.max_connections(), 3);
        assert_eq!(config.max_speed(), Some(2 * 1024 * 1024));

        let bad = TransferArgs {
            connections: None,
            max_speed: Some("fast".to_string()),
        };
        assert!(bad.apply(TransferConfig::default()).is_err());
    }
}
