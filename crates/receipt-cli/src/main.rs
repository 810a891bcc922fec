mod commands;
mod display;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use receipt_core::{CanonicalField, Settings};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "receipts", version, about = "Extract, rename and export receipt images")]
struct Cli {
    /// Settings file (defaults to ~/.ai_receipt_extractor/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Gemini API key; overrides `api.key` from the settings file
    #[arg(long, env = "GOOGLE_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open a folder as a workspace and list its images
    Open { folder: PathBuf },

    /// Extract receipt data from images (default: pending and failed ones)
    Process {
        folder: PathBuf,
        files: Vec<String>,
    },

    /// Rename images to <date>_<store> (default: all of them)
    Rename {
        folder: PathBuf,
        files: Vec<String>,
    },

    /// Correct one extracted field by hand
    Edit {
        folder: PathBuf,
        file: String,
        /// Field name, legacy name, or short label (date, store, total, tax10, ...)
        field: CanonicalField,
        /// New value; an empty string clears the field
        value: String,
        #[arg(long, default_value = "")]
        reason: String,
    },

    /// Export extracted data
    Export {
        folder: PathBuf,
        #[arg(long, required_unless_present = "json")]
        csv: Option<PathBuf>,
        #[arg(long)]
        json: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = load_settings(cli.config, cli.api_key)?;

    match cli.command {
        Command::Open { folder } => commands::open(&settings, &folder),
        Command::Process { folder, files } => commands::process(&settings, &folder, files).await,
        Command::Rename { folder, files } => commands::rename(&settings, &folder, files),
        Command::Edit {
            folder,
            file,
            field,
            value,
            reason,
        } => commands::edit(&settings, &folder, &file, field, &value, &reason),
        Command::Export { folder, csv, json } => {
            commands::export(&settings, &folder, csv.as_deref(), json.as_deref())
        }
    }
}

fn load_settings(path: Option<PathBuf>, api_key: Option<String>) -> anyhow::Result<Settings> {
    let path = match path {
        Some(path) => path,
        None => dirs::home_dir()
            .context("cannot determine home directory; pass --config")?
            .join(".ai_receipt_extractor")
            .join("config.json"),
    };
    let mut settings = Settings::load(&path)?;
    if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
        settings.api.key = Some(key);
    }
    Ok(settings)
}
