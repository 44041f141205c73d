use anyhow::{Context, Result};
use phonetic_relay::config::Config;
use phonetic_relay::dispatcher::Dispatcher;
use phonetic_relay::resolver::Resolver;
use phonetic_relay::server::{self, AppState};
use phonetic_relay::settings::{ExternalStore, FileStore, RedisBackend, SettingsService, SettingsStore};
use phonetic_relay::telegram::TelegramClient;
use phonetic_relay::translator::TranslationClient;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("phonetic_relay=info".parse()?),
        )
        .init();

    info!("Starting phonetic translation relay");

    let config = Config::from_env().context("Invalid configuration")?;

    let store: Arc<dyn SettingsStore> = match &config.redis_url {
        Some(url) => {
            let backend = RedisBackend::connect(url, config.redis_tls)
                .await
                .context("Failed to connect to Redis")?;
            Arc::new(ExternalStore::new(backend))
        }
        None => {
            info!("REDIS_URL not set, storing settings in {}", config.settings_path);
            Arc::new(FileStore::new(&config.settings_path))
        }
    };
    let settings = SettingsService::new(store, config.store_timeout);

    let translator = Arc::new(TranslationClient::from_config(&config));
    let telegram = Arc::new(TelegramClient::from_config(&config));

    // Startup checks are informational only
    match settings.ping().await {
        Ok(()) => info!("{} settings store reachable", settings.backend_name()),
        Err(e) => warn!("{} settings store check failed: {}", settings.backend_name(), e),
    }
    match translator.check_connection().await {
        Ok(reply) => info!("Translation API reachable: {}", reply),
        Err(e) => warn!("Translation API check failed: {}", e),
    }

    let dispatcher = Dispatcher::new(
        Resolver::new(settings.clone()),
        translator,
        telegram.clone(),
    );

    let state = AppState {
        settings,
        dispatcher: Arc::new(dispatcher),
        replies: telegram,
        webhook_secret: config.telegram_webhook_secret.as_deref().map(Arc::from),
    };

    server::serve(state, config.port).await
}
