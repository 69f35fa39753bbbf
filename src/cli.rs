use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Translate text once and print the result
    Translate {
        /// Text to translate
        text: String,

        /// Translation service (google, microsoft, tencent, openrouter)
        #[arg(short, long)]
        service: Option<String>,

        /// Target language (zh or en); detected from the text when omitted
        #[arg(short, long)]
        direction: Option<String>,
    },

    /// Show which direction a text would be translated in
    Detect {
        /// Text to classify
        text: String,
    },

    /// Serve dispatch messages as JSON lines over stdin/stdout
    Serve,

    /// Show the cached Microsoft token, fetching a new one if needed
    Token,

    /// Manage persisted settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Write the default configuration to a file
    InitConfig {
        /// Output configuration file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum SettingsAction {
    /// Print every persisted setting
    Show,

    /// Select the default translation service
    SetService {
        /// Service id (google, microsoft, tencent, openrouter)
        service: String,
    },

    /// Store OpenRouter credentials
    SetOpenrouter {
        /// API key
        #[arg(long)]
        api_key: Option<String>,

        /// Model identifier
        #[arg(long)]
        model: Option<String>,
    },
}
