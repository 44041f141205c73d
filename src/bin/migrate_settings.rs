use anyhow::{Context, Result};
use phonetic_relay::config;
use phonetic_relay::settings::{copy_settings, ExternalStore, FileStore, RedisBackend, SettingsStore};
use tracing::info;

const USAGE: &str = "Usage: migrate-settings [--to-file]\n\n\
Copies every user settings record from SETTINGS_PATH (default data/settings.json)\n\
into the Redis store at REDIS_URL. With --to-file the copy runs the other way.";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("migrate_settings=info".parse()?)
                .add_directive("phonetic_relay=info".parse()?),
        )
        .init();

    let mut to_file = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--to-file" => to_file = true,
            "-h" | "--help" => {
                println!("{}", USAGE);
                return Ok(());
            }
            other => anyhow::bail!("Unknown argument '{}'\n\n{}", other, USAGE),
        }
    }

    let redis_url = std::env::var("REDIS_URL").context("REDIS_URL not set")?;
    let force_tls = config::env_flag("REDIS_TLS", false)?;
    let settings_path = config::settings_path_from_env();

    let file = FileStore::new(&settings_path);
    let redis = ExternalStore::new(
        RedisBackend::connect(&redis_url, force_tls)
            .await
            .context("Failed to connect to Redis")?,
    );

    let (source, target): (&dyn SettingsStore, &dyn SettingsStore) = if to_file {
        (&redis, &file)
    } else {
        (&file, &redis)
    };

    info!(
        "Copying settings from {} store to {} store ({})",
        source.name(),
        target.name(),
        settings_path
    );
    let copied = copy_settings(source, target)
        .await
        .context("Settings migration failed")?;

    info!("✓ Migrated {} user settings records", copied);
    Ok(())
}
