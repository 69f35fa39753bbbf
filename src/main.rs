//! Fanyi - translation dispatch core
//!
//! Command line entry point: one-shot translation, direction detection,
//! settings management, and the JSON-lines dispatch endpoint used by the
//! browser front end.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tracing_appender::{non_blocking, rolling};

use fanyi::cli::{Args, Commands, SettingsAction};
use fanyi::config::Config;
use fanyi::coordinator::Coordinator;
use fanyi::direction::{detect_direction, TargetLanguage};
use fanyi::dispatch::{self, Dispatcher};
use fanyi::error::FanyiError;
use fanyi::storage::{keys, FileStore, KeyValueStore, Settings};
use fanyi::token::{decode_expiry, TokenCache};
use fanyi::translate::{build_http_client, BackendId};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;

    // Load configuration
    let config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if std::path::Path::new("config.toml").exists() {
                info!("Found config.toml in current directory, loading...");
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };

    if let Commands::InitConfig { output } = &args.command {
        config.save_to_file(output)?;
        println!("Configuration written to {}", output.display());
        return Ok(());
    }

    if let Commands::Detect { text } = &args.command {
        println!("{}", detect_direction(text));
        return Ok(());
    }

    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&config.storage.path).await?);
    info!("Using settings store {}", config.storage.path.display());

    match args.command {
        Commands::Translate { text, service, direction } => {
            let service = service.as_deref().map(parse_backend).transpose()?;
            let direction = direction.as_deref().map(parse_direction).transpose()?;

            let coordinator = Coordinator::from_config(&config, store)?;
            let result = coordinator
                .translate(&text, service, direction)
                .await
                .map_err(FanyiError::from)?;

            info!("Translated with {} to {}", result.backend, result.target_language);
            println!("{}", result.translated_text);
        }
        Commands::Serve => {
            let coordinator = Arc::new(Coordinator::from_config(&config, store)?);
            let dispatcher = Arc::new(Dispatcher::new(coordinator));

            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            dispatch::serve(dispatcher, stdin, tokio::io::stdout()).await?;
        }
        Commands::Token => {
            let client = build_http_client(config.translate.request_timeout_secs)?;
            let tokens = TokenCache::new(client, config.microsoft.auth_endpoint.clone(), store);
            let token = tokens.get_token().await.map_err(FanyiError::from)?;

            match decode_expiry(&token).and_then(|exp| chrono::DateTime::from_timestamp(exp, 0)) {
                Some(expires_at) => {
                    let remaining = expires_at - chrono::Utc::now();
                    println!(
                        "Token expires at {} ({} left)",
                        expires_at,
                        format_duration(remaining.num_seconds())
                    );
                }
                None => println!("Token expiry could not be decoded"),
            }
        }
        Commands::Settings { action } => {
            let settings = Settings::new(store);
            match action {
                SettingsAction::Show => {
                    let entries = settings.store().entries().await?;
                    if entries.is_empty() {
                        println!("No settings stored.");
                    } else {
                        println!("{:<24} {:<50}", "Key", "Value");
                        println!("{}", "-".repeat(75));
                        for (key, value) in entries {
                            println!("{:<24} {:<50}", key, display_value(&key, &value));
                        }
                    }

                    let active = settings
                        .selected_backend()
                        .await
                        .unwrap_or(config.translate.default_backend);
                    println!("\nActive service: {}", active);
                }
                SettingsAction::SetService { service } => {
                    let backend = parse_backend(&service)?;
                    settings.set_selected_backend(backend).await?;
                    println!("Selected service: {}", backend);
                }
                SettingsAction::SetOpenrouter { api_key, model } => {
                    if api_key.is_none() && model.is_none() {
                        return Err(FanyiError::Config(
                            "Nothing to set: pass --api-key and/or --model".to_string(),
                        )
                        .into());
                    }
                    if let Some(api_key) = api_key {
                        settings.set_openrouter_api_key(&api_key).await?;
                        println!("OpenRouter API key stored");
                    }
                    if let Some(model) = model {
                        settings.set_openrouter_model_id(&model).await?;
                        println!("OpenRouter model: {}", model);
                    }
                }
            }
        }
        Commands::InitConfig { .. } | Commands::Detect { .. } => {}
    }

    Ok(())
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let fanyi_dir = std::env::current_dir()?.join(".fanyi");
    let log_dir = fanyi_dir.join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "fanyi.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // stdout carries dispatch replies, so the console layer goes to stderr
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized - console: {}, file: {}",
          log_level, log_dir.join("fanyi.log").display());

    Ok(())
}

/// Parse a translation service id
fn parse_backend(service: &str) -> Result<BackendId> {
    service.parse::<BackendId>().map_err(|_| {
        FanyiError::Config(format!(
            "Invalid service '{}'. Valid services: google, microsoft, tencent, openrouter",
            service
        ))
        .into()
    })
}

/// Parse a target language
fn parse_direction(direction: &str) -> Result<TargetLanguage> {
    direction.parse::<TargetLanguage>().map_err(|_| {
        FanyiError::Config(format!(
            "Invalid direction '{}'. Valid directions: zh, en",
            direction
        ))
        .into()
    })
}

/// Secrets are shortened when printed
fn display_value(key: &str, value: &str) -> String {
    let secret = key == keys::MS_AUTH_TOKEN || key == keys::OPENROUTER_API_KEY;
    if secret && value.chars().count() > 8 {
        let head: String = value.chars().take(4).collect();
        format!("{}... ({} chars)", head, value.chars().count())
    } else {
        value.to_string()
    }
}

/// Format duration in seconds to human readable string
fn format_duration(seconds: i64) -> String {
    if seconds <= 0 {
        "expired".to_string()
    } else if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
