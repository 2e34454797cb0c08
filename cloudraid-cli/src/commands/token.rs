//! Token command - show a saved resume token.

use std::path::PathBuf;

use cloudraid::config::ConfigFile;
use cloudraid::{FileResumeStore, ResumeStore, ResumeToken};

use crate::error::CliError;

/// Arguments for the token command.
pub struct TokenArgs {
    pub path: Option<PathBuf>,
    pub id: Option<String>,
}

/// Run the token command.
pub fn run(args: TokenArgs) -> Result<(), CliError> {
    let path = match (args.path, args.id) {
        (Some(path), _) => path,
        (None, Some(id)) => ConfigFile::load()?.resume_token_path(&id),
        (None, None) => {
            return Err(CliError::Config(
                "give a token file or --id <file identity>".to_string(),
            ))
        }
    };

    let token = FileResumeStore::new(&path)
        .load()?
        .ok_or_else(|| CliError::Config(format!("No resume token at {}", path.display())))?;
    println!("{}", token_json(&token)?);
    Ok(())
}

fn token_json(token: &ResumeToken) -> Result<String, CliError> {
    serde_json::to_string_pretty(token)
        .map_err(|e| CliError::Config(format!("Failed to format token: {}", e)))
}
